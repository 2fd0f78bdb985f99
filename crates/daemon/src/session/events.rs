//! Session event delivery.
//!
//! Every session gets a fresh [`EventSink`] feeding the owning client's event
//! channel. The sink enforces the delivery contract: `connected` and `output`
//! only flow while the session is live, and exactly one terminal event
//! (`error` or `ended`) is ever delivered, after which the sink goes silent.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;

/// Events a session emits toward its client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The shell is ready. Always precedes any output.
    Connected,
    /// Terminal output, in shell read order.
    Output(String),
    /// The session failed. Terminal.
    Error(String),
    /// The shell stream closed. Terminal.
    Ended,
}

struct SinkInner {
    tx: UnboundedSender<SessionEvent>,
    finished: bool,
}

/// Clonable handle a session uses to report events.
///
/// Cheap to clone; all clones share the finished flag, so a terminal event
/// observed through any clone silences every other one.
#[derive(Clone)]
pub struct EventSink {
    inner: Arc<Mutex<SinkInner>>,
}

impl EventSink {
    pub fn new(tx: UnboundedSender<SessionEvent>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SinkInner {
                tx,
                finished: false,
            })),
        }
    }

    /// Report that the shell is ready.
    pub fn connected(&self) {
        let inner = self.inner.lock();
        if !inner.finished {
            let _ = inner.tx.send(SessionEvent::Connected);
        }
    }

    /// Deliver terminal output. Dropped once the session has finished.
    pub fn output(&self, data: String) {
        let inner = self.inner.lock();
        if !inner.finished {
            let _ = inner.tx.send(SessionEvent::Output(data));
        }
    }

    /// Finish the session with an error. Only the first terminal event wins.
    pub fn error(&self, message: impl Into<String>) {
        let mut inner = self.inner.lock();
        if !inner.finished {
            inner.finished = true;
            let _ = inner.tx.send(SessionEvent::Error(message.into()));
        }
    }

    /// Finish the session normally. Only the first terminal event wins.
    pub fn ended(&self) {
        let mut inner = self.inner.lock();
        if !inner.finished {
            inner.finished = true;
            let _ = inner.tx.send(SessionEvent::Ended);
        }
    }

    /// Silence the sink without delivering a terminal event.
    ///
    /// Used when a session is superseded: the replacement session's events
    /// take over the channel and the old session must not speak again.
    pub fn silence(&self) {
        self.inner.lock().finished = true;
    }

    /// Whether a terminal event has been delivered (or the sink silenced).
    pub fn is_finished(&self) -> bool {
        self.inner.lock().finished
    }
}
