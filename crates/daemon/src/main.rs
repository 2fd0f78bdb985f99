//! TermGate Daemon
//!
//! Relay between browser terminals and SSH shell sessions.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use daemon::config::{default_config_path, Config};
use daemon::relay::RelayServer;
use daemon::session::{Registry, SshDialer};

/// TermGate Daemon - relay between browser terminals and SSH sessions.
#[derive(Parser, Debug)]
#[command(name = "termgate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for the daemon.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the relay
    Start {
        /// Listen address, overriding the configuration
        #[arg(long, value_name = "ADDR")]
        bind: Option<SocketAddr>,
    },

    /// Inspect or create the configuration file
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Subcommands for configuration management.
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Load configuration
    let mut config = if let Some(config_path) = &cli.config {
        tracing::info!("Using config file: {:?}", config_path);
        Config::load(config_path)?
    } else {
        Config::load_default()?
    };

    // Apply environment variable overrides
    config.apply_env_overrides();

    // Validate configuration
    config.validate()?;

    match cli.command {
        Commands::Start { bind } => {
            let addr = match bind {
                Some(addr) => addr,
                None => config.bind_addr()?,
            };

            let dialer = SshDialer {
                keepalive_secs: config.ssh.keepalive_interval_secs,
            };
            let registry = Arc::new(Registry::new(
                dialer,
                config.retry_policy(),
                config.probe_policy(),
                config.session_defaults(),
            ));

            let server = RelayServer::bind(addr, registry).await?;
            tracing::info!("TermGate daemon started");

            tokio::select! {
                result = server.run() => result?,
                _ = wait_for_shutdown_signal() => {
                    tracing::info!("Received shutdown signal");
                }
            }
        }
        Commands::Config(ConfigCommands::Show) => {
            print!("{}", config.to_toml()?);
        }
        Commands::Config(ConfigCommands::Init { force }) => {
            let path = cli.config.unwrap_or_else(default_config_path);
            if path.exists() && !force {
                anyhow::bail!(
                    "Config file already exists at {} (use --force to overwrite)",
                    path.display()
                );
            }
            Config::default().save(&path)?;
            println!("Wrote default configuration to {}", path.display());
        }
    }

    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to register SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to register SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_structure() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_start() {
        let cli = Cli::try_parse_from(["termgate", "start"]).unwrap();
        assert!(matches!(cli.command, Commands::Start { bind: None }));
        assert!(!cli.verbose);
    }

    #[test]
    fn test_parse_start_with_bind() {
        let cli = Cli::try_parse_from(["termgate", "start", "--bind", "0.0.0.0:9000"]).unwrap();
        match cli.command {
            Commands::Start { bind: Some(addr) } => assert_eq!(addr.port(), 9000),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_start_rejects_bad_bind() {
        assert!(Cli::try_parse_from(["termgate", "start", "--bind", "nonsense"]).is_err());
    }

    #[test]
    fn test_parse_global_flags() {
        let cli =
            Cli::try_parse_from(["termgate", "start", "-v", "-c", "/tmp/custom.toml"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/custom.toml")));
    }

    #[test]
    fn test_parse_config_show() {
        let cli = Cli::try_parse_from(["termgate", "config", "show"]).unwrap();
        assert!(matches!(cli.command, Commands::Config(ConfigCommands::Show)));
    }

    #[test]
    fn test_parse_config_init_force() {
        let cli = Cli::try_parse_from(["termgate", "config", "init", "--force"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config(ConfigCommands::Init { force: true })
        ));
    }

    #[test]
    fn test_missing_subcommand_is_an_error() {
        assert!(Cli::try_parse_from(["termgate"]).is_err());
    }
}
