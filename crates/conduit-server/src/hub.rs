//! The hub façade: lifecycle fan-out and dispatch.
//!
//! A [`ConduitHub`] sits between the transport and the per-type filter
//! indexes. Connect/disconnect events fan out to every registered filter
//! type; inbound apply-filter messages route by name; dispatch computes
//! the target connection set (topic group or predicate match) and hands
//! it to the [`ClientSender`] in a single call per target.

use std::sync::Arc;

use conduit_core::{ConduitPayload, ConnectionId, PushPayload, CONDUIT_METHOD};
use metrics::counter;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::HubConfig;
use crate::error::ConduitError;
use crate::registry::FilterRegistry;
use crate::sweeper::CleanupSweeper;
use crate::transport::{ClientSender, ConnectionContext};

/// Single entry point wired to transport connect/disconnect/message
/// events.
pub struct ConduitHub {
    registry: FilterRegistry,
    sender: Arc<dyn ClientSender>,
    config: HubConfig,
    sweeper: CleanupSweeper,
}

impl ConduitHub {
    /// Create a hub over a prebuilt registry and transport sender.
    #[must_use]
    pub fn new(
        registry: FilterRegistry,
        sender: Arc<dyn ClientSender>,
        config: HubConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            sender,
            config,
            sweeper: CleanupSweeper::default(),
        })
    }

    /// The hub's configuration.
    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// The registered filter types.
    #[must_use]
    pub fn registry(&self) -> &FilterRegistry {
        &self.registry
    }

    /// The transport sender dispatch goes through.
    #[must_use]
    pub fn sender(&self) -> &Arc<dyn ClientSender> {
        &self.sender
    }

    // ─── Lifecycle ───────────────────────────────────────────────────

    /// A connection was established: seed every filter type's index.
    pub fn on_connected(&self, ctx: &ConnectionContext) {
        info!(connection_id = %ctx.connection_id, "client connected");
        counter!("conduit_connections_total").increment(1);
        for slot in self.registry.slots() {
            slot.on_connected(ctx);
        }
    }

    /// A connection is gone (graceful close or sweep): drop its entries
    /// and group memberships.
    pub async fn on_disconnected(&self, id: &ConnectionId) {
        info!(connection_id = %id, "client disconnected");
        for slot in self.registry.slots() {
            slot.on_disconnected(id);
        }
        self.sender.remove_connection(id).await;
    }

    /// Inbound apply-filter message: route by filter type name.
    ///
    /// Unknown names and malformed payloads are client protocol errors,
    /// surfaced to the caller rather than silently dropped.
    pub fn apply_filter(
        &self,
        id: &ConnectionId,
        filter_name: &str,
        filter: serde_json::Value,
    ) -> Result<(), ConduitError> {
        debug!(connection_id = %id, filter_name, "new filter requested");
        let slot = self
            .registry
            .slot(filter_name)
            .ok_or_else(|| ConduitError::UnknownFilterType {
                name: filter_name.to_owned(),
            })?;
        slot.apply(id, filter)
    }

    /// Inbound subscribe message: join the topic group.
    pub async fn subscribe(&self, id: &ConnectionId, event_key: &str) {
        debug!(connection_id = %id, event_key, "subscribing to topic");
        self.sender.add_to_group(id, event_key).await;
    }

    // ─── Dispatch ────────────────────────────────────────────────────

    /// Broadcast to every subscriber of a topic.
    ///
    /// The payload is wrapped as `{eventKey, message}` and delivered
    /// under the single `conduit` method so one client handler can
    /// demultiplex by event key.
    pub async fn send<P: Serialize>(
        &self,
        event_key: &str,
        payload: &P,
    ) -> Result<(), ConduitError> {
        let wrapper = ConduitPayload {
            event_key: event_key.to_owned(),
            message: serde_json::to_value(payload).map_err(ConduitError::Serialize)?,
        };
        let body = serde_json::to_value(&wrapper).map_err(ConduitError::Serialize)?;
        counter!("conduit_dispatch_total", "mode" => "topic").increment(1);
        debug!(event_key, "broadcasting to topic");
        self.sender
            .send_group(event_key, CONDUIT_METHOD, body)
            .await?;
        Ok(())
    }

    /// Deliver a payload to exactly the connections whose `F` filter
    /// satisfies the predicate.
    ///
    /// An empty match set is an explicit no-op: no transport call is
    /// made. Dispatch against a type nobody registered is a
    /// configuration bug and fails with
    /// [`ConduitError::UnregisteredFilterType`]. Transport failures
    /// propagate; there is no retry.
    pub async fn send_filtered<F, P>(
        &self,
        predicate: impl Fn(&F) -> bool,
        payload: &P,
    ) -> Result<(), ConduitError>
    where
        F: Send + Sync + 'static,
        P: PushPayload,
    {
        let index = self.registry.index_of::<F>().ok_or(
            ConduitError::UnregisteredFilterType {
                type_name: std::any::type_name::<F>(),
            },
        )?;

        let ids = index.matching(predicate);
        if ids.is_empty() {
            debug!(kind = payload.kind(), "filtered dispatch matched no connections");
            return Ok(());
        }

        let body = serde_json::to_value(payload).map_err(ConduitError::Serialize)?;
        counter!("conduit_dispatch_total", "mode" => "filtered").increment(1);
        debug!(kind = payload.kind(), recipients = ids.len(), "filtered dispatch");
        self.sender.send_many(&ids, payload.kind(), body).await?;
        Ok(())
    }

    // ─── Cleanup ─────────────────────────────────────────────────────

    /// Start the periodic cleanup task. Repeated calls are no-ops.
    pub fn start_cleanup_task(self: &Arc<Self>) {
        self.sweeper.start(self);
    }

    /// Whether the cleanup task is running.
    #[must_use]
    pub fn cleanup_task_started(&self) -> bool {
        self.sweeper.is_started()
    }

    /// One sweep pass over every registered filter type. Returns the
    /// total number of purged entries.
    pub(crate) fn sweep(&self) -> usize {
        let max_lifetime = self.config.max_connection_lifetime();
        let mut total = 0;
        for slot in self.registry.slots() {
            let purged = slot.cleanup(max_lifetime);
            if purged > 0 {
                warn!(filter = slot.name(), purged, "purged stale connection entries");
            }
            total += purged;
        }
        total
    }
}

impl Drop for ConduitHub {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}
