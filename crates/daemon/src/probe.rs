//! SSH port readiness probing.
//!
//! Freshly started containers advertise their SSH port before sshd is
//! actually accepting connections. The prober polls the port until it
//! accepts a TCP connection or the deadline expires. Callers treat a
//! negative result as advisory and dial anyway.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, trace};

/// How the prober paces itself.
#[derive(Debug, Clone)]
pub struct ProbePolicy {
    /// Delay between probe attempts, also the per-attempt timeout.
    pub interval: Duration,
    /// Total time budget before giving up.
    pub deadline: Duration,
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            deadline: Duration::from_secs(10),
        }
    }
}

/// Poll `host:port` until it accepts a TCP connection or the deadline passes.
pub async fn wait_for_ssh(host: &str, port: u16, policy: &ProbePolicy) -> bool {
    let start = Instant::now();
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match timeout(policy.interval, TcpStream::connect((host, port))).await {
            Ok(Ok(_)) => {
                debug!(host, port, attempts, "ssh port ready");
                return true;
            }
            Ok(Err(e)) => trace!(host, port, error = %e, "probe attempt failed"),
            Err(_) => trace!(host, port, "probe attempt timed out"),
        }

        if start.elapsed() >= policy.deadline {
            debug!(host, port, attempts, "ssh port not ready before deadline");
            return false;
        }
        sleep(policy.interval).await;
    }
}
