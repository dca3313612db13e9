//! The resilient client façade.
//!
//! A [`ConduitClient`] owns one session at a time. Every subscription
//! and filter application is remembered in the pending queue before it
//! is sent, so the client can replay the full intent set after a
//! reconnect. Connection establishment is shared: concurrent callers
//! that find no live session wait on one connect attempt instead of
//! racing their own.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use conduit_core::PushEnvelope;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::dispatch::{DispatchTable, HandlerId};
use crate::error::ClientError;
use crate::queue::PendingQueue;
use crate::session::{Session, SessionEvents, SessionFactory, WsSessionFactory};

/// Handle to the Conduit connection. Cheap to clone; all clones share
/// one session, queue, and handler table.
#[derive(Clone)]
pub struct ConduitClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    factory: Arc<dyn SessionFactory>,
    session: RwLock<Option<Arc<dyn Session>>>,
    queue: PendingQueue,
    dispatch: DispatchTable,
    connect_lock: tokio::sync::Mutex<()>,
    closed_by_user: AtomicBool,
}

impl ConduitClient {
    /// Client over the production WebSocket transport.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self::with_factory(config, Arc::new(WsSessionFactory))
    }

    /// Client over a custom session factory.
    #[must_use]
    pub fn with_factory(config: ClientConfig, factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                config,
                factory,
                session: RwLock::new(None),
                queue: PendingQueue::new(),
                dispatch: DispatchTable::new(),
                connect_lock: tokio::sync::Mutex::new(()),
                closed_by_user: AtomicBool::new(false),
            }),
        }
    }

    /// Connect if not connected, then flush pending intents.
    ///
    /// Bounded retry: after `max_connection_attempts` failed attempts
    /// spaced `retry_interval_ms` apart, gives up with
    /// [`ClientError::ConnectionFailed`].
    pub async fn start(&self) -> Result<(), ClientError> {
        ensure_connected(&self.inner).await?;
        flush_pending(&self.inner).await;
        Ok(())
    }

    /// Subscribe to a topic and register a handler for its pushes.
    ///
    /// The subscription intent is queued before anything touches the
    /// network, so it survives connect failures and replays after a
    /// reconnect. The returned id removes this handler via [`off`].
    ///
    /// [`off`]: ConduitClient::off
    pub async fn on(
        &self,
        event_key: &str,
        callback: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Result<HandlerId, ClientError> {
        if event_key.trim().is_empty() {
            return Err(ClientError::InvalidEventKey);
        }
        self.inner.queue.push_subscription(event_key);
        ensure_connected(&self.inner).await?;
        flush_pending(&self.inner).await;
        Ok(self.inner.dispatch.on(event_key, callback))
    }

    /// Remove one handler. When it was the last handler for its event
    /// key, the pending subscription intent is forgotten too.
    pub fn off(&self, id: HandlerId) -> bool {
        let Some(event_key) = self.inner.dispatch.off(id) else {
            return false;
        };
        if !self.inner.dispatch.has_handlers(&event_key) {
            let _ = self.inner.queue.remove_subscription(&event_key);
        }
        true
    }

    /// Remove every handler and pending subscription for `event_key`.
    pub fn off_event(&self, event_key: &str) -> usize {
        let removed = self.inner.dispatch.off_event(event_key);
        let _ = self.inner.queue.remove_subscription(event_key);
        removed
    }

    /// Send (or replace) this connection's filter value for a named
    /// filter type. The latest value per name wins and is replayed
    /// after reconnects.
    pub async fn apply_filter(
        &self,
        filter_name: &str,
        filter: Value,
    ) -> Result<(), ClientError> {
        if filter_name.trim().is_empty() {
            return Err(ClientError::InvalidFilterName);
        }
        if !filter.is_object() {
            return Err(ClientError::InvalidFilterValue);
        }
        self.inner.queue.push_filter(filter_name, filter);
        ensure_connected(&self.inner).await?;
        flush_pending(&self.inner).await;
        Ok(())
    }

    /// Close the connection and forget all pending intents. Handlers
    /// stay registered; a later [`start`] reconnects with a clean queue.
    ///
    /// [`start`]: ConduitClient::start
    pub async fn stop(&self) {
        self.inner.closed_by_user.store(true, Ordering::Relaxed);
        let session = self.inner.session.write().take();
        if let Some(session) = session {
            session.stop().await;
        }
        self.inner.queue.clear();
        info!("conduit client stopped");
    }

    /// Whether a live session exists right now.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner
            .session
            .read()
            .as_ref()
            .is_some_and(|s| s.is_connected())
    }

    /// Count of intents not yet delivered to the server.
    #[must_use]
    pub fn pending_intents(&self) -> usize {
        self.inner.queue.unsent_len()
    }
}

fn current_session(inner: &ClientInner) -> Option<Arc<dyn Session>> {
    inner
        .session
        .read()
        .clone()
        .filter(|s| s.is_connected())
}

async fn ensure_connected(inner: &Arc<ClientInner>) -> Result<(), ClientError> {
    if current_session(inner).is_some() {
        return Ok(());
    }
    let _guard = inner.connect_lock.lock().await;
    // Another caller may have connected while we waited.
    if current_session(inner).is_some() {
        return Ok(());
    }

    let mut attempt = 0;
    loop {
        attempt += 1;
        let (inbound_tx, inbound_rx) = mpsc::channel(inner.config.inbound_capacity);
        let (closed_tx, closed_rx) = mpsc::channel(1);
        let events = SessionEvents {
            inbound: inbound_tx,
            closed: closed_tx,
        };

        match inner.factory.connect(&inner.config.url, events).await {
            Ok(session) => {
                *inner.session.write() = Some(Arc::clone(&session));
                inner.closed_by_user.store(false, Ordering::Relaxed);
                spawn_inbound_pump(inner, inbound_rx);
                spawn_close_watcher(inner, session, closed_rx);
                info!(attempt, "conduit connected");
                return Ok(());
            }
            Err(err) => {
                warn!(attempt, error = %err, "conduit connect attempt failed");
                // Every failed attempt waits out the interval, so giving
                // up takes at least attempts * retry_interval.
                tokio::time::sleep(inner.config.retry_interval()).await;
                if attempt >= inner.config.max_connection_attempts {
                    return Err(ClientError::ConnectionFailed { attempts: attempt });
                }
            }
        }
    }
}

/// Deliver unsent intents over the live session, if any.
///
/// A send failure is not an application-visible error: the queue rolls
/// the affected items back to unsent and the next trigger (a later
/// call or a reconnect) retries them.
async fn flush_pending(inner: &Arc<ClientInner>) {
    let Some(session) = current_session(inner) else {
        // Nothing connected; intents stay queued for the next connect.
        return;
    };
    if let Err(err) = inner.queue.flush(session.as_ref()).await {
        warn!(error = %err, "pending intent flush failed, will retry on next trigger");
    }
}

fn spawn_inbound_pump(inner: &Arc<ClientInner>, mut inbound_rx: mpsc::Receiver<PushEnvelope>) {
    let inner = Arc::clone(inner);
    let _ = tokio::spawn(async move {
        while let Some(envelope) = inbound_rx.recv().await {
            inner.dispatch.route(&envelope);
        }
    });
}

/// Waits for this session's close signal, then drives recovery: reset
/// the sent marks, reconnect, replay. A close caused by [`stop`] or
/// superseded by a newer session does nothing.
///
/// [`stop`]: ConduitClient::stop
fn spawn_close_watcher(
    inner: &Arc<ClientInner>,
    session: Arc<dyn Session>,
    mut closed_rx: mpsc::Receiver<()>,
) {
    let inner = Arc::clone(inner);
    let _ = tokio::spawn(async move {
        if closed_rx.recv().await.is_none() {
            return;
        }
        {
            let mut guard = inner.session.write();
            let is_current = guard
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, &session));
            // stop() took the slot or a newer session owns recovery
            if !is_current {
                return;
            }
            *guard = None;
        }
        if inner.closed_by_user.load(Ordering::Relaxed) {
            debug!("conduit session closed by user");
            return;
        }

        warn!("conduit session lost, reconnecting");
        inner.queue.reset_all();
        match ensure_connected(&inner).await {
            Ok(()) => flush_pending(&inner).await,
            Err(err) => error!(error = %err, "reconnect abandoned"),
        }
    });
}
