//! Shell transport abstraction.
//!
//! The registry and relay only ever see a [`ShellTransport`]; the production
//! implementation is [`super::ssh::SshTransport`], and tests substitute fakes.

use thiserror::Error;

use super::events::EventSink;

/// Errors from operations on a live shell transport.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The shell channel has already been closed.
    #[error("shell channel closed")]
    ChannelClosed,

    /// Writing input to the shell failed.
    #[error("failed to write to shell: {0}")]
    WriteFailed(String),

    /// Resizing the remote PTY failed.
    #[error("failed to resize terminal: {0}")]
    ResizeFailed(String),
}

/// A live shell stream attached to one session.
///
/// `start` is called exactly once, after the `connected` event has been
/// delivered, so no output can precede it. `close` must be idempotent.
pub trait ShellTransport: Send {
    /// Begin pumping shell output into the sink.
    fn start(&mut self, sink: EventSink);

    /// Write raw input bytes to the shell.
    fn write(&self, data: &[u8]) -> Result<(), SessionError>;

    /// Resize the remote PTY.
    fn resize(&self, cols: u16, rows: u16) -> Result<(), SessionError>;

    /// Tear the shell down. Safe to call more than once.
    fn close(&mut self);
}
