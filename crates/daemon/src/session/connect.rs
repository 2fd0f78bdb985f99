//! Connection establishment with bounded retry.
//!
//! A [`Dialer`] turns a [`ConnectTarget`] into a live shell transport.
//! [`establish`] drives the attempt loop: each attempt runs under the connect
//! timeout, and only reset-class faults are retried. Containers whose sshd is
//! still starting drop the TCP connection mid-handshake, which surfaces as a
//! reset; everything else (refused, unreachable, bad credentials) fails fast.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use protocol::SessionKind;

use super::shell::ShellTransport;

/// Fully resolved connection parameters for one session.
#[derive(Debug, Clone)]
pub struct ConnectTarget {
    /// Target host kind.
    pub kind: SessionKind,
    /// Hostname or address.
    pub host: String,
    /// SSH port.
    pub port: u16,
    /// Login username.
    pub username: String,
    /// Login password, if any.
    pub password: Option<String>,
    /// PEM-encoded private key; preferred over password auth when set.
    pub private_key: Option<String>,
    /// Passphrase for the private key.
    pub passphrase: Option<String>,
    /// Initial terminal columns.
    pub cols: u16,
    /// Initial terminal rows.
    pub rows: u16,
}

/// Errors while establishing a connection.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The peer reset or dropped the connection. Retryable.
    #[error("connection reset: {0}")]
    Reset(String),

    /// The peer actively refused the connection.
    #[error("connection refused: {0}")]
    Refused(String),

    /// The host could not be reached.
    #[error("host unreachable: {0}")]
    Unreachable(String),

    /// The SSH handshake failed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Authentication was rejected.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Opening the PTY shell channel failed.
    #[error("failed to open shell: {0}")]
    Shell(String),

    /// The attempt exceeded the connect timeout.
    #[error("connection timed out after {0:?}")]
    Timeout(Duration),

    /// Reset-class faults persisted through the whole attempt budget.
    #[error("max retries exceeded after {0} attempts")]
    MaxRetries(u32),
}

impl ConnectError {
    /// Whether another attempt is worth making.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConnectError::Reset(_))
    }

    /// Classify a raw socket error.
    pub fn from_io(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => ConnectError::Reset(err.to_string()),
            ErrorKind::ConnectionRefused => ConnectError::Refused(err.to_string()),
            ErrorKind::TimedOut => ConnectError::Timeout(Duration::ZERO),
            _ => ConnectError::Unreachable(err.to_string()),
        }
    }
}

/// How [`establish`] schedules attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempt budget, including the first attempt.
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub delay: Duration,
    /// Per-attempt timeout.
    pub connect_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_millis(1000),
            connect_timeout: Duration::from_secs(20),
        }
    }
}

/// Dials a target and produces a live shell transport.
///
/// The returned future must be `Send` so that connects can run as spawned
/// tasks while the relay keeps servicing the client socket.
pub trait Dialer: Send + Sync {
    fn dial(
        &self,
        target: &ConnectTarget,
    ) -> impl std::future::Future<Output = Result<Box<dyn ShellTransport>, ConnectError>> + Send;
}

/// Establish a shell to `target`, retrying reset-class faults.
pub async fn establish<D: Dialer>(
    dialer: &D,
    target: &ConnectTarget,
    policy: &RetryPolicy,
) -> Result<Box<dyn ShellTransport>, ConnectError> {
    let mut attempt = 1u32;
    loop {
        let result = tokio::time::timeout(policy.connect_timeout, dialer.dial(target)).await;
        let err = match result {
            Ok(Ok(transport)) => {
                debug!(
                    host = %target.host,
                    port = target.port,
                    attempt,
                    "shell established"
                );
                return Ok(transport);
            }
            Ok(Err(err)) => err,
            Err(_) => ConnectError::Timeout(policy.connect_timeout),
        };

        if err.is_retryable() {
            if attempt >= policy.max_attempts {
                return Err(ConnectError::MaxRetries(attempt));
            }
            warn!(
                host = %target.host,
                port = target.port,
                attempt,
                error = %err,
                "connection reset, retrying"
            );
            attempt += 1;
            tokio::time::sleep(policy.delay).await;
            continue;
        }

        return Err(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::events::EventSink;
    use crate::session::shell::SessionError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn target() -> ConnectTarget {
        ConnectTarget {
            kind: SessionKind::Container,
            host: "localhost".to_string(),
            port: 2222,
            username: "root".to_string(),
            password: Some("password".to_string()),
            private_key: None,
            passphrase: None,
            cols: 80,
            rows: 24,
        }
    }

    struct NullTransport;

    impl ShellTransport for NullTransport {
        fn start(&mut self, _sink: EventSink) {}
        fn write(&self, _data: &[u8]) -> Result<(), SessionError> {
            Ok(())
        }
        fn resize(&self, _cols: u16, _rows: u16) -> Result<(), SessionError> {
            Ok(())
        }
        fn close(&mut self) {}
    }

    /// Fails with the given errors in order, then succeeds.
    struct ScriptedDialer {
        failures: Vec<fn() -> ConnectError>,
        calls: AtomicU32,
    }

    impl ScriptedDialer {
        fn new(failures: Vec<fn() -> ConnectError>) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
            }
        }

        fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Dialer for ScriptedDialer {
        async fn dial(
            &self,
            _target: &ConnectTarget,
        ) -> Result<Box<dyn ShellTransport>, ConnectError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            match self.failures.get(n) {
                Some(make_err) => Err(make_err()),
                None => Ok(Box::new(NullTransport)),
            }
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            delay: Duration::from_millis(1),
            connect_timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn test_first_attempt_success() {
        let dialer = ScriptedDialer::new(vec![]);
        let result = establish(&dialer, &target(), &fast_policy()).await;
        assert!(result.is_ok());
        assert_eq!(dialer.call_count(), 1);
    }

    #[tokio::test]
    async fn test_reset_is_retried_until_success() {
        let dialer = ScriptedDialer::new(vec![
            || ConnectError::Reset("peer reset".to_string()),
            || ConnectError::Reset("peer reset".to_string()),
        ]);
        let result = establish(&dialer, &target(), &fast_policy()).await;
        assert!(result.is_ok());
        assert_eq!(dialer.call_count(), 3);
    }

    #[tokio::test]
    async fn test_reset_exhausts_attempt_budget() {
        let dialer = ScriptedDialer::new(vec![
            || ConnectError::Reset("r".to_string()),
            || ConnectError::Reset("r".to_string()),
            || ConnectError::Reset("r".to_string()),
            || ConnectError::Reset("r".to_string()),
            || ConnectError::Reset("r".to_string()),
            || ConnectError::Reset("r".to_string()),
        ]);
        let result = establish(&dialer, &target(), &fast_policy()).await;
        assert!(matches!(result, Err(ConnectError::MaxRetries(5))));
        assert_eq!(dialer.call_count(), 5);
    }

    #[tokio::test]
    async fn test_retry_waits_for_backoff() {
        let dialer = ScriptedDialer::new(vec![
            || ConnectError::Reset("r".to_string()),
            || ConnectError::Reset("r".to_string()),
        ]);
        let policy = RetryPolicy {
            max_attempts: 5,
            delay: Duration::from_millis(25),
            connect_timeout: Duration::from_millis(500),
        };
        let start = std::time::Instant::now();
        establish(&dialer, &target(), &policy).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_auth_failure_does_not_retry() {
        let dialer = ScriptedDialer::new(vec![|| ConnectError::Auth("rejected".to_string())]);
        let result = establish(&dialer, &target(), &fast_policy()).await;
        assert!(matches!(result, Err(ConnectError::Auth(_))));
        assert_eq!(dialer.call_count(), 1);
    }

    #[tokio::test]
    async fn test_refused_does_not_retry() {
        let dialer = ScriptedDialer::new(vec![|| ConnectError::Refused("refused".to_string())]);
        let result = establish(&dialer, &target(), &fast_policy()).await;
        assert!(matches!(result, Err(ConnectError::Refused(_))));
        assert_eq!(dialer.call_count(), 1);
    }

    #[tokio::test]
    async fn test_slow_dial_times_out() {
        struct StalledDialer;
        impl Dialer for StalledDialer {
            async fn dial(
                &self,
                _target: &ConnectTarget,
            ) -> Result<Box<dyn ShellTransport>, ConnectError> {
                std::future::pending().await
            }
        }

        let policy = RetryPolicy {
            connect_timeout: Duration::from_millis(20),
            ..fast_policy()
        };
        let result = establish(&StalledDialer, &target(), &policy).await;
        assert!(matches!(result, Err(ConnectError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_establish_through_shared_reference() {
        // the registry dials through an Arc
        let dialer = Arc::new(ScriptedDialer::new(vec![]));
        let result = establish(dialer.as_ref(), &target(), &fast_policy()).await;
        assert!(result.is_ok());
    }

    #[test]
    fn test_io_error_classification() {
        use std::io::{Error, ErrorKind};

        assert!(ConnectError::from_io(Error::new(ErrorKind::ConnectionReset, "x")).is_retryable());
        assert!(ConnectError::from_io(Error::new(ErrorKind::BrokenPipe, "x")).is_retryable());
        assert!(
            !ConnectError::from_io(Error::new(ErrorKind::ConnectionRefused, "x")).is_retryable()
        );
        assert!(!ConnectError::from_io(Error::new(ErrorKind::HostUnreachable, "x")).is_retryable());
    }
}
