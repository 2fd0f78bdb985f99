//! Session management module.
//!
//! This module provides SSH shell session lifecycle management: dialing with
//! bounded retry, per-client session ownership, and event delivery back to
//! the relay.

pub mod connect;
pub mod events;
pub mod registry;
pub mod shell;
pub mod ssh;

pub use connect::{establish, ConnectError, ConnectTarget, Dialer, RetryPolicy};
pub use events::{EventSink, SessionEvent};
pub use registry::{Registry, SessionDefaults};
pub use shell::{SessionError, ShellTransport};
pub use ssh::{SshDialer, SshTransport};
