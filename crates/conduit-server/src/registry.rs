//! Filter type registry.
//!
//! Maps a case-insensitive filter type name to its typed decode routine,
//! its [`FilterIndex`], and the factory that seeds a value on connect.
//! One registry is built at startup and handed to the hub at
//! construction; it is immutable afterwards, so there is no process-wide
//! mutable state and two hubs never share an index.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use conduit_core::ConnectionId;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ConduitError;
use crate::index::FilterIndex;
use crate::transport::ConnectionContext;

/// Builds the initial filter value for a newly connected client.
///
/// Return `None` when nothing useful can be derived from the connection
/// context; the hub then falls back to `F::default()`.
pub trait FilterFactory<F>: Send + Sync {
    /// Derive a filter value from the connection context.
    fn build(&self, ctx: &ConnectionContext) -> Option<F>;
}

/// Factory that always defers to `F::default()`.
pub struct DefaultFilterFactory;

impl<F> FilterFactory<F> for DefaultFilterFactory {
    fn build(&self, _ctx: &ConnectionContext) -> Option<F> {
        None
    }
}

/// Type-erased per-filter-type operations used by the hub and sweeper.
pub(crate) trait FilterSlot: Send + Sync {
    /// Registration name (original casing).
    fn name(&self) -> &str;
    /// Seed an entry for a new connection.
    fn on_connected(&self, ctx: &ConnectionContext);
    /// Drop the entry for a gone connection.
    fn on_disconnected(&self, id: &ConnectionId);
    /// Decode a structural payload and upsert the connection's filter.
    fn apply(&self, id: &ConnectionId, value: Value) -> Result<(), ConduitError>;
    /// Purge entries older than `max_lifetime`; returns the purge count.
    fn cleanup(&self, max_lifetime: Duration) -> usize;
    /// Downcast support for typed index lookup.
    fn as_any(&self) -> &dyn Any;
}

struct TypedSlot<F> {
    name: String,
    index: Arc<FilterIndex<F>>,
    factory: Box<dyn FilterFactory<F>>,
}

impl<F> FilterSlot for TypedSlot<F>
where
    F: DeserializeOwned + Default + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn on_connected(&self, ctx: &ConnectionContext) {
        let filter = self.factory.build(ctx).unwrap_or_default();
        self.index.on_connect(ctx.connection_id.clone(), filter);
    }

    fn on_disconnected(&self, id: &ConnectionId) {
        self.index.on_disconnect(id);
    }

    fn apply(&self, id: &ConnectionId, value: Value) -> Result<(), ConduitError> {
        let filter: F = serde_json::from_value(value).map_err(|source| {
            ConduitError::Conversion {
                filter_name: self.name.clone(),
                source,
            }
        })?;
        self.index.apply(id, filter);
        Ok(())
    }

    fn cleanup(&self, max_lifetime: Duration) -> usize {
        self.index.cleanup(max_lifetime)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Immutable table of registered filter types.
#[derive(Default)]
pub struct FilterRegistry {
    by_name: HashMap<String, Arc<dyn FilterSlot>>,
    by_type: HashMap<TypeId, Arc<dyn FilterSlot>>,
}

impl FilterRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a filter type under `name`.
    ///
    /// Names are matched case-insensitively; registering the same name
    /// (in any casing) or the same Rust type twice fails with
    /// [`ConduitError::DuplicateFilterType`].
    pub fn register<F>(
        &mut self,
        name: &str,
        factory: impl FilterFactory<F> + 'static,
    ) -> Result<(), ConduitError>
    where
        F: DeserializeOwned + Default + Send + Sync + 'static,
    {
        let key = name.to_lowercase();
        if self.by_name.contains_key(&key) || self.by_type.contains_key(&TypeId::of::<F>()) {
            return Err(ConduitError::DuplicateFilterType { name: name.into() });
        }

        let slot: Arc<dyn FilterSlot> = Arc::new(TypedSlot {
            name: name.to_owned(),
            index: Arc::new(FilterIndex::<F>::new()),
            factory: Box::new(factory),
        });
        let _ = self.by_name.insert(key, Arc::clone(&slot));
        let _ = self.by_type.insert(TypeId::of::<F>(), slot);
        Ok(())
    }

    /// Look up a slot by case-insensitive name.
    pub(crate) fn slot(&self, name: &str) -> Option<&Arc<dyn FilterSlot>> {
        self.by_name.get(&name.to_lowercase())
    }

    /// Iterate every registered slot.
    pub(crate) fn slots(&self) -> impl Iterator<Item = &Arc<dyn FilterSlot>> {
        self.by_name.values()
    }

    /// The typed index for `F`, if `F` was registered.
    #[must_use]
    pub fn index_of<F: 'static>(&self) -> Option<Arc<FilterIndex<F>>> {
        self.by_type
            .get(&TypeId::of::<F>())
            .and_then(|slot| slot.as_any().downcast_ref::<TypedSlot<F>>())
            .map(|typed| Arc::clone(&typed.index))
    }

    /// Number of registered filter types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Whether no filter type is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
