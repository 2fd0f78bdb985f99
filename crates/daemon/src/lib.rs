//! # TermGate Daemon Library
//!
//! This crate provides the relay daemon for TermGate, bridging browser
//! terminal clients to SSH shell sessions.
//!
//! ## Overview
//!
//! The daemon accepts WebSocket connections from browser terminals and opens
//! SSH PTY sessions on their behalf. It provides:
//!
//! - **Session Registry**: At most one live shell per client, with reconnects
//!   superseding whatever came before
//! - **Connect Retry**: Bounded retry of reset-class faults while a target's
//!   sshd finishes starting
//! - **Readiness Probing**: TCP probing of container SSH ports before dialing
//! - **Event Delivery**: Ordered output with exactly one terminal event per
//!   session
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                      Relay Server                       │
//! │   one WebSocket per client, one event channel each      │
//! ├─────────────────────────────────────────────────────────┤
//! │                    Session Registry                     │
//! │       client id -> session slot + connect cancel        │
//! ├──────────────────────────┬──────────────────────────────┤
//! │     Readiness Prober     │    Connect/Retry + Dialer    │
//! ├──────────────────────────┴──────────────────────────────┤
//! │             SSH Transport (libssh2, PTY shell)          │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use daemon::{Config, RelayServer, Registry, SshDialer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     config.validate()?;
//!
//!     let registry = Arc::new(Registry::new(
//!         SshDialer::default(),
//!         config.retry_policy(),
//!         config.probe_policy(),
//!         config.session_defaults(),
//!     ));
//!     let server = RelayServer::bind(config.bind_addr()?, registry).await?;
//!     server.run().await
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`session`]: Shell transports, connect retry, and the session registry
//! - [`probe`]: Container SSH port readiness probing
//! - [`relay`]: WebSocket relay server

pub mod config;
pub mod probe;
pub mod relay;
pub mod session;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::{Config, ConfigError};

// Re-export probe types for convenience
pub use probe::{wait_for_ssh, ProbePolicy};

// Re-export session types for convenience
pub use session::{
    establish, ConnectError, ConnectTarget, Dialer, EventSink, Registry, RetryPolicy,
    SessionDefaults, SessionError, SessionEvent, ShellTransport, SshDialer, SshTransport,
};

// Re-export relay types for convenience
pub use relay::RelayServer;
