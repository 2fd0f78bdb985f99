//! WebSocket relay server.
//!
//! Accepts browser terminal connections, assigns each a client id, and
//! bridges frames to the session registry. Each connection gets a send task
//! fed by its session event channel; the receive loop dispatches client
//! messages. Connects run as spawned tasks so a slow dial never stops the
//! loop from servicing input or a disconnect.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};
use uuid::Uuid;

use protocol::{ClientMessage, ServerMessage};

use crate::session::{Dialer, Registry, SessionEvent};

/// Accepts WebSocket clients and relays them to shell sessions.
pub struct RelayServer<D: Dialer> {
    listener: TcpListener,
    registry: Arc<Registry<D>>,
}

impl<D: Dialer + 'static> RelayServer<D> {
    /// Bind the relay to `addr`.
    pub async fn bind(addr: SocketAddr, registry: Arc<Registry<D>>) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        info!(addr = %listener.local_addr()?, "relay listening");
        Ok(Self { listener, registry })
    }

    /// The address the relay actually bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the task is cancelled or accept fails.
    pub async fn run(self) -> anyhow::Result<()> {
        loop {
            let (stream, peer) = self
                .listener
                .accept()
                .await
                .context("relay accept failed")?;
            let registry = Arc::clone(&self.registry);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer, registry).await {
                    debug!(peer = %peer, error = %e, "connection closed with error");
                }
            });
        }
    }
}

fn event_to_message(event: SessionEvent) -> ServerMessage {
    match event {
        SessionEvent::Connected => ServerMessage::Connected,
        SessionEvent::Output(data) => ServerMessage::output(data),
        SessionEvent::Error(message) => ServerMessage::error(message),
        SessionEvent::Ended => ServerMessage::Ended,
    }
}

async fn handle_connection<D: Dialer + 'static>(
    stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<Registry<D>>,
) -> anyhow::Result<()> {
    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .context("websocket handshake failed")?;
    let client_id = Uuid::new_v4().to_string();
    info!(client_id = %client_id, peer = %peer, "client connected");

    // the registry only acts for registered ids, so a connect that lands
    // after this socket is gone cannot leave a session behind
    registry.register(&client_id);

    let (mut ws_tx, mut ws_rx) = ws.split();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<SessionEvent>();

    let sender_id = client_id.clone();
    let sender_registry = Arc::clone(&registry);
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let terminal = matches!(event, SessionEvent::Error(_) | SessionEvent::Ended);
            match event_to_message(event).to_json() {
                Ok(frame) => {
                    if ws_tx.send(WsMessage::Text(frame)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(client_id = %sender_id, error = %e, "failed to encode event");
                }
            }
            if terminal {
                // the session already announced its end; release its handles
                sender_registry.evict_finished(&sender_id);
            }
        }
    });

    loop {
        tokio::select! {
            _ = &mut send_task => break,
            frame = ws_rx.next() => {
                let Some(frame) = frame else { break };
                match frame {
                    Ok(WsMessage::Text(text)) => {
                        dispatch(&registry, &client_id, &event_tx, &text).await;
                    }
                    Ok(WsMessage::Close(_)) => break,
                    // pings are answered by tungstenite; binary frames ignored
                    Ok(_) => {}
                    Err(e) => {
                        debug!(client_id = %client_id, error = %e, "socket read failed");
                        break;
                    }
                }
            }
        }
    }

    send_task.abort();
    registry.remove(&client_id).await;
    info!(client_id = %client_id, "client disconnected");
    Ok(())
}

async fn dispatch<D: Dialer + 'static>(
    registry: &Arc<Registry<D>>,
    client_id: &str,
    event_tx: &mpsc::UnboundedSender<SessionEvent>,
    text: &str,
) {
    match ClientMessage::from_json(text) {
        Ok(ClientMessage::Connect(request)) => {
            debug!(client_id = %client_id, kind = ?request.kind, "connect requested");
            let registry = Arc::clone(registry);
            let client_id = client_id.to_string();
            let event_tx = event_tx.clone();
            tokio::spawn(async move {
                registry.begin(&client_id, request, event_tx).await;
            });
        }
        Ok(ClientMessage::Input(input)) => {
            registry.input(client_id, input.data.as_bytes());
        }
        Ok(ClientMessage::Resize(resize)) => {
            registry.resize(client_id, resize.cols, resize.rows);
        }
        Ok(ClientMessage::Disconnect) => {
            registry.end(client_id).await;
        }
        Err(e) => {
            warn!(client_id = %client_id, error = %e, "malformed frame, skipped");
        }
    }
}
