//! Per-client session registry.
//!
//! Each relay client owns at most one shell session. A new connect supersedes
//! whatever the client had before, whether that is a live session or a
//! connect still in flight; the superseded session is silenced and torn down
//! so the client only ever hears from its current session.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use protocol::{ConnectRequest, SessionKind};

use crate::probe::{self, ProbePolicy};

use super::connect::{establish, ConnectTarget, Dialer, RetryPolicy};
use super::events::{EventSink, SessionEvent};
use super::shell::ShellTransport;

/// Fallback connection parameters for requests that omit them.
#[derive(Debug, Clone)]
pub struct SessionDefaults {
    /// Username when the request carries none.
    pub username: String,
    /// Password when the request carries none.
    pub password: Option<String>,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            username: "root".to_string(),
            password: None,
        }
    }
}

struct ActiveSession {
    transport: Box<dyn ShellTransport>,
    sink: EventSink,
}

struct ClientEntry {
    /// The client's one session slot. Held for the duration of a connect, so
    /// input and resize use try_lock and no-op while a connect is in flight.
    slot: Mutex<Option<ActiveSession>>,
    /// Cancels the in-flight connect when a new one supersedes it.
    connect_cancel: parking_lot::Mutex<CancellationToken>,
}

impl ClientEntry {
    fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            connect_cancel: parking_lot::Mutex::new(CancellationToken::new()),
        }
    }
}

/// Maps client ids to their session slots.
pub struct Registry<D: Dialer> {
    dialer: D,
    retry: RetryPolicy,
    probe: ProbePolicy,
    defaults: SessionDefaults,
    clients: DashMap<String, Arc<ClientEntry>>,
}

impl<D: Dialer> Registry<D> {
    pub fn new(
        dialer: D,
        retry: RetryPolicy,
        probe: ProbePolicy,
        defaults: SessionDefaults,
    ) -> Self {
        Self {
            dialer,
            retry,
            probe,
            defaults,
            clients: DashMap::new(),
        }
    }

    /// Create the entry for a newly accepted client. Every other operation
    /// ignores ids that were never registered or were already removed, so a
    /// connect that lands after its socket closed cannot leave a session
    /// behind.
    pub fn register(&self, client_id: &str) {
        self.clients
            .entry(client_id.to_string())
            .or_insert_with(|| Arc::new(ClientEntry::new()));
    }

    /// Open a session for `client_id`, superseding any existing one.
    ///
    /// Delivers exactly one of `connected` or `error` for this attempt,
    /// unless a later connect supersedes it, in which case it stays silent.
    pub async fn begin(
        &self,
        client_id: &str,
        request: ConnectRequest,
        events: UnboundedSender<SessionEvent>,
    ) {
        let sink = EventSink::new(events);

        let Some(entry) = self.get(client_id) else {
            debug!(client_id = %client_id, "connect for removed client, ignored");
            return;
        };

        let Some(port) = request.port else {
            warn!(client_id = %client_id, "connect request without ssh port");
            sink.error("SSH port not available");
            return;
        };
        let target = self.resolve_target(&request, port);
        let cancel = {
            let mut guard = entry.connect_cancel.lock();
            guard.cancel();
            *guard = CancellationToken::new();
            guard.clone()
        };

        let mut slot = entry.slot.lock().await;
        if let Some(mut old) = slot.take() {
            debug!(client_id = %client_id, "closing superseded session");
            old.sink.silence();
            old.transport.close();
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(client_id = %client_id, "connect superseded");
                return;
            }
            result = async {
                if target.kind == SessionKind::Container
                    && !probe::wait_for_ssh(&target.host, target.port, &self.probe).await
                {
                    warn!(
                        client_id = %client_id,
                        host = %target.host,
                        port = target.port,
                        "ssh port never became ready, dialing anyway"
                    );
                }
                establish(&self.dialer, &target, &self.retry).await
            } => result,
        };

        match result {
            Ok(mut transport) => {
                // the client may have been removed while we dialed
                let still_registered = self
                    .get(client_id)
                    .is_some_and(|current| Arc::ptr_eq(&current, &entry));
                if !still_registered {
                    debug!(client_id = %client_id, "client removed during connect, discarding shell");
                    transport.close();
                    return;
                }
                info!(
                    client_id = %client_id,
                    host = %target.host,
                    port = target.port,
                    "session connected"
                );
                sink.connected();
                transport.start(sink.clone());
                *slot = Some(ActiveSession { transport, sink });
            }
            Err(e) => {
                warn!(client_id = %client_id, error = %e, "session connect failed");
                sink.error(e.to_string());
            }
        }
    }

    /// Forward input to the client's session. No-op without a live session
    /// or while a connect is in flight.
    pub fn input(&self, client_id: &str, data: &[u8]) {
        let Some(entry) = self.get(client_id) else {
            return;
        };
        let Ok(slot) = entry.slot.try_lock() else {
            trace!(client_id = %client_id, "input during connect, dropped");
            return;
        };
        if let Some(active) = slot.as_ref() {
            if let Err(e) = active.transport.write(data) {
                debug!(client_id = %client_id, error = %e, "input write failed");
            }
        }
    }

    /// Resize the client's PTY. Same no-op rules as [`Registry::input`].
    pub fn resize(&self, client_id: &str, cols: u16, rows: u16) {
        let Some(entry) = self.get(client_id) else {
            return;
        };
        let Ok(slot) = entry.slot.try_lock() else {
            trace!(client_id = %client_id, "resize during connect, dropped");
            return;
        };
        if let Some(active) = slot.as_ref() {
            if let Err(e) = active.transport.resize(cols, rows) {
                debug!(client_id = %client_id, error = %e, "resize failed");
            }
        }
    }

    /// Tear down the client's session. Idempotent.
    pub async fn end(&self, client_id: &str) {
        let Some(entry) = self.get(client_id) else {
            return;
        };
        entry.connect_cancel.lock().cancel();

        let mut slot = entry.slot.lock().await;
        if let Some(mut active) = slot.take() {
            info!(client_id = %client_id, "session ended by client");
            active.sink.ended();
            active.transport.close();
        }
    }

    /// Drop the client's session once it has delivered its terminal event,
    /// releasing the shell handles. No-op while a connect holds the slot.
    pub fn evict_finished(&self, client_id: &str) {
        let Some(entry) = self.get(client_id) else {
            return;
        };
        let Ok(mut slot) = entry.slot.try_lock() else {
            return;
        };
        if slot.as_ref().is_some_and(|active| active.sink.is_finished()) {
            if let Some(mut active) = slot.take() {
                debug!(client_id = %client_id, "session finished, releasing shell");
                active.transport.close();
            }
        }
    }

    /// Tear down and forget the client entirely (its socket is gone).
    pub async fn remove(&self, client_id: &str) {
        self.end(client_id).await;
        self.clients.remove(client_id);
    }

    /// Number of clients with registry entries.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    fn get(&self, client_id: &str) -> Option<Arc<ClientEntry>> {
        self.clients.get(client_id).map(|e| Arc::clone(e.value()))
    }

    fn resolve_target(&self, request: &ConnectRequest, port: u16) -> ConnectTarget {
        ConnectTarget {
            kind: request.kind,
            host: request
                .host
                .clone()
                .unwrap_or_else(|| "localhost".to_string()),
            port,
            username: request
                .username
                .clone()
                .unwrap_or_else(|| self.defaults.username.clone()),
            password: request.password.clone().or_else(|| self.defaults.password.clone()),
            private_key: request.private_key.clone(),
            passphrase: request.passphrase.clone(),
            cols: request.cols,
            rows: request.rows,
        }
    }
}
