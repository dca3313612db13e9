//! The session seam: one live WebSocket connection.
//!
//! [`Session`] and [`SessionFactory`] decouple the client's resilience
//! logic (retry, replay, dispatch) from the wire. [`WsSessionFactory`]
//! is the production implementation over `tokio-tungstenite`; tests
//! swap in scripted fakes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use conduit_core::{ClientInvocation, PushEnvelope};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::error::SessionError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Channels a session reports into.
pub struct SessionEvents {
    /// Parsed server pushes.
    pub inbound: mpsc::Sender<PushEnvelope>,
    /// Signalled once when the session dies, however it dies.
    pub closed: mpsc::Sender<()>,
}

/// One live connection to the server.
#[async_trait]
pub trait Session: Send + Sync {
    /// Send one invocation and wait for it to reach the socket.
    async fn invoke(&self, invocation: &ClientInvocation) -> Result<(), SessionError>;

    /// Close the connection. Idempotent.
    async fn stop(&self);

    /// Whether the session is still usable.
    fn is_connected(&self) -> bool;
}

/// Opens sessions. One factory outlives many sessions.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Attempt a single connection to `url`.
    async fn connect(
        &self,
        url: &str,
        events: SessionEvents,
    ) -> Result<Arc<dyn Session>, SessionError>;
}

enum SessionCommand {
    Invoke(String, oneshot::Sender<Result<(), SessionError>>),
    Stop,
}

/// Production [`SessionFactory`] over `tokio-tungstenite`.
#[derive(Default)]
pub struct WsSessionFactory;

#[async_trait]
impl SessionFactory for WsSessionFactory {
    async fn connect(
        &self,
        url: &str,
        events: SessionEvents,
    ) -> Result<Arc<dyn Session>, SessionError> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(|err| SessionError::Connect {
                reason: err.to_string(),
            })?;
        debug!(url, "websocket session established");

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let connected = Arc::new(AtomicBool::new(true));
        let _ = tokio::spawn(session_loop(ws, cmd_rx, events, Arc::clone(&connected)));

        Ok(Arc::new(WsSession { cmd_tx, connected }))
    }
}

struct WsSession {
    cmd_tx: mpsc::Sender<SessionCommand>,
    connected: Arc<AtomicBool>,
}

#[async_trait]
impl Session for WsSession {
    async fn invoke(&self, invocation: &ClientInvocation) -> Result<(), SessionError> {
        if !self.is_connected() {
            return Err(SessionError::Closed);
        }
        let text =
            serde_json::to_string(invocation).map_err(|_| SessionError::SendFailed)?;
        let (ack_tx, ack_rx) = oneshot::channel();
        self.cmd_tx
            .send(SessionCommand::Invoke(text, ack_tx))
            .await
            .map_err(|_| SessionError::SendFailed)?;
        ack_rx.await.map_err(|_| SessionError::SendFailed)?
    }

    async fn stop(&self) {
        let _ = self.cmd_tx.send(SessionCommand::Stop).await;
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

/// Owns the socket: sends queued invocations, parses inbound pushes,
/// and reports closure exactly once on the way out.
async fn session_loop(
    ws: WsStream,
    mut cmd_rx: mpsc::Receiver<SessionCommand>,
    events: SessionEvents,
    connected: Arc<AtomicBool>,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(SessionCommand::Invoke(text, ack)) => {
                        let result = ws_tx
                            .send(Message::Text(text.into()))
                            .await
                            .map_err(|_| SessionError::SendFailed);
                        let failed = result.is_err();
                        let _ = ack.send(result);
                        if failed {
                            break;
                        }
                    }
                    Some(SessionCommand::Stop) | None => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<PushEnvelope>(&text) {
                            Ok(envelope) => {
                                let _ = events.inbound.send(envelope).await;
                            }
                            Err(err) => warn!(error = %err, "unparseable server frame"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    connected.store(false, Ordering::Relaxed);
    let _ = events.closed.try_send(());
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use parking_lot::Mutex;

    /// In-memory [`Session`] that records invocations and can be
    /// scripted to start failing after N successful sends.
    pub(crate) struct RecordingSession {
        log: Mutex<Vec<ClientInvocation>>,
        succeed_first: Option<usize>,
        connected: AtomicBool,
    }

    impl Default for RecordingSession {
        fn default() -> Self {
            Self {
                log: Mutex::new(Vec::new()),
                succeed_first: None,
                connected: AtomicBool::new(true),
            }
        }
    }

    impl RecordingSession {
        /// Succeed for the first `n` invocations, fail afterwards.
        pub(crate) fn failing_after(n: usize) -> Self {
            Self {
                succeed_first: Some(n),
                ..Self::default()
            }
        }

        pub(crate) fn invocations(&self) -> Vec<ClientInvocation> {
            self.log.lock().clone()
        }
    }

    #[async_trait]
    impl Session for RecordingSession {
        async fn invoke(&self, invocation: &ClientInvocation) -> Result<(), SessionError> {
            let mut log = self.log.lock();
            if let Some(limit) = self.succeed_first {
                if log.len() >= limit {
                    return Err(SessionError::SendFailed);
                }
            }
            log.push(invocation.clone());
            Ok(())
        }

        async fn stop(&self) {
            self.connected.store(false, Ordering::Relaxed);
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::Relaxed)
        }
    }
}
