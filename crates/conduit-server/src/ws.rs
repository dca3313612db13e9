//! Axum WebSocket gateway speaking the Conduit wire protocol.
//!
//! [`GatewaySender`] is the production [`ClientSender`]: it holds the
//! live connections and topic groups, serializes each envelope once,
//! and fans the shared frame out over per-connection queues.
//! [`ConduitGateway`] wires it to a hub and exposes the axum router
//! (`/conduit` upgrade plus `/health`).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use conduit_core::{ClientInvocation, ConnectionId, PushEnvelope};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{info, instrument, warn};

use crate::config::HubConfig;
use crate::connection::ClientConnection;
use crate::error::TransportError;
use crate::hub::ConduitHub;
use crate::registry::FilterRegistry;
use crate::transport::{ClientSender, ConnectionContext};

use async_trait::async_trait;

/// WebSocket-backed [`ClientSender`].
pub struct GatewaySender {
    connections: DashMap<ConnectionId, Arc<ClientConnection>>,
    groups: DashMap<String, HashSet<ConnectionId>>,
    queue_capacity: usize,
}

impl GatewaySender {
    /// Create a sender whose per-connection queues hold `queue_capacity`
    /// frames.
    #[must_use]
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            connections: DashMap::new(),
            groups: DashMap::new(),
            queue_capacity,
        }
    }

    /// Register a connection and return it with the receiving end of its
    /// outbound queue.
    pub fn register(&self, id: ConnectionId) -> (Arc<ClientConnection>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let conn = Arc::new(ClientConnection::new(id.clone(), tx));
        let _ = self.connections.insert(id, Arc::clone(&conn));
        (conn, rx)
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    fn encode(method: &str, payload: Value) -> Result<Arc<String>, TransportError> {
        let envelope = PushEnvelope {
            method: method.to_owned(),
            payload,
        };
        serde_json::to_string(&envelope)
            .map(Arc::new)
            .map_err(|err| TransportError::Encode {
                reason: err.to_string(),
            })
    }
}

#[async_trait]
impl ClientSender for GatewaySender {
    async fn send_many(
        &self,
        ids: &[ConnectionId],
        method: &str,
        payload: Value,
    ) -> Result<(), TransportError> {
        // One serialization per dispatch; recipients share the frame.
        let frame = Self::encode(method, payload)?;
        let mut first_error = None;
        for id in ids {
            let delivered = self
                .connections
                .get(id)
                .is_some_and(|conn| conn.send(Arc::clone(&frame)));
            if !delivered {
                warn!(connection_id = %id, method, "frame not delivered");
                counter!("conduit_send_failures_total").increment(1);
                first_error.get_or_insert(TransportError::SendFailed {
                    connection_id: id.to_string(),
                });
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn send_group(
        &self,
        topic: &str,
        method: &str,
        payload: Value,
    ) -> Result<(), TransportError> {
        let members: Vec<ConnectionId> = self
            .groups
            .get(topic)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default();
        self.send_many(&members, method, payload)
            .await
            .map_err(|err| match err {
                TransportError::Encode { .. } => err,
                _ => TransportError::GroupSendFailed {
                    topic: topic.to_owned(),
                },
            })
    }

    async fn add_to_group(&self, id: &ConnectionId, topic: &str) {
        let _ = self
            .groups
            .entry(topic.to_owned())
            .or_default()
            .insert(id.clone());
    }

    async fn remove_connection(&self, id: &ConnectionId) {
        let _ = self.connections.remove(id);
        for mut members in self.groups.iter_mut() {
            let _ = members.remove(id);
        }
        self.groups.retain(|_, members| !members.is_empty());
    }
}

/// The WebSocket front door: a hub plus its axum surface.
#[derive(Clone)]
pub struct ConduitGateway {
    hub: Arc<ConduitHub>,
    sender: Arc<GatewaySender>,
}

impl ConduitGateway {
    /// Build a gateway over a prebuilt filter registry.
    #[must_use]
    pub fn new(registry: FilterRegistry, config: HubConfig) -> Self {
        let sender = Arc::new(GatewaySender::new(config.send_queue_capacity));
        let hub = ConduitHub::new(registry, Arc::clone(&sender) as Arc<dyn ClientSender>, config);
        Self { hub, sender }
    }

    /// The hub behind this gateway; dispatch goes through it.
    #[must_use]
    pub fn hub(&self) -> &Arc<ConduitHub> {
        &self.hub
    }

    /// Build the axum router with all routes.
    #[must_use]
    pub fn router(&self) -> Router {
        Router::new()
            .route("/conduit", get(ws_handler))
            .route("/health", get(health_handler))
            .with_state(self.clone())
            .layer(CorsLayer::permissive())
    }

    /// Bind `addr` and serve until the handle is dropped.
    pub async fn serve(&self, addr: &str) -> Result<GatewayHandle, std::io::Error> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        self.hub.start_cleanup_task();

        let router = self.router();
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        info!(port = local_addr.port(), "conduit gateway started");

        Ok(GatewayHandle {
            port: local_addr.port(),
            _server: server,
        })
    }
}

/// Handle returned by [`ConduitGateway::serve`]. Dropping it stops the
/// listener task.
pub struct GatewayHandle {
    /// The bound port.
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
}

impl Drop for GatewayHandle {
    fn drop(&mut self) {
        self._server.abort();
    }
}

/// GET /conduit — WebSocket upgrade.
async fn ws_handler(
    State(gateway): State<ConduitGateway>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let metadata = header_metadata(&headers);
    ws.on_upgrade(move |socket| run_session(gateway, socket, metadata))
}

/// GET /health
async fn health_handler(State(gateway): State<ConduitGateway>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "connections": gateway.sender.connection_count(),
    }))
}

/// String-valued request headers, as filter factory context.
fn header_metadata(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_owned(), v.to_owned()))
        })
        .collect()
}

/// One connection's lifetime: register, pump frames both ways, tear down.
#[instrument(skip_all)]
async fn run_session(
    gateway: ConduitGateway,
    socket: WebSocket,
    metadata: HashMap<String, String>,
) {
    let id = ConnectionId::generate();
    let (conn, mut rx) = gateway.sender.register(id.clone());
    let mut ctx = ConnectionContext::new(id.clone());
    ctx.metadata = metadata;
    gateway.hub.on_connected(&ctx);
    gauge!("conduit_connections_active").increment(1.0);

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer task: forward queued frames to the socket.
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_tx.send(WsMessage::Text(frame.as_str().into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = ws_rx.next().await {
        match msg {
            WsMessage::Text(text) => handle_frame(&gateway, &conn, &text).await,
            WsMessage::Close(_) => break,
            // axum answers pings automatically.
            _ => {}
        }
    }

    writer.abort();
    gateway.hub.on_disconnected(&id).await;
    gauge!("conduit_connections_active").decrement(1.0);
    info!(connection_id = %id, dropped = conn.drop_count(), "session ended");
}

/// Parse one inbound text frame and route it through the hub.
///
/// Protocol errors (unparseable frames, unknown filter names, malformed
/// filter payloads) are reported back to the offending client only.
async fn handle_frame(gateway: &ConduitGateway, conn: &Arc<ClientConnection>, text: &str) {
    let invocation: ClientInvocation = match serde_json::from_str(text) {
        Ok(invocation) => invocation,
        Err(err) => {
            warn!(connection_id = %conn.id, error = %err, "unparseable client frame");
            send_error(conn, &format!("invalid message: {err}"));
            return;
        }
    };

    match invocation {
        ClientInvocation::Subscribe { event_key } => {
            gateway.hub.subscribe(&conn.id, &event_key).await;
        }
        ClientInvocation::ApplyFilter {
            filter_name,
            filter,
        } => {
            if let Err(err) = gateway.hub.apply_filter(&conn.id, &filter_name, filter) {
                warn!(connection_id = %conn.id, error = %err, "filter rejected");
                send_error(conn, &err.to_string());
            }
        }
    }
}

fn send_error(conn: &Arc<ClientConnection>, message: &str) {
    let envelope = PushEnvelope {
        method: "error".to_owned(),
        payload: json!({ "message": message }),
    };
    if let Ok(frame) = serde_json::to_string(&envelope) {
        let _ = conn.send(Arc::new(frame));
    }
}
