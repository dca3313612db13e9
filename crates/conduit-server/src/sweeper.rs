//! Periodic cleanup of stale connection entries.
//!
//! One sweeper task exists per hub and is started at most once. It is a
//! safety net for connections whose disconnect notification was lost;
//! regular disconnects are handled by the hub's `on_disconnected`. The
//! sweeper's removals race benignly with those: both are idempotent.

use std::sync::Arc;
use std::sync::Weak;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

use crate::hub::ConduitHub;

/// Start-once guard around the sweep task.
#[derive(Default)]
pub(crate) struct CleanupSweeper {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CleanupSweeper {
    /// Spawn the sweep loop. Repeated calls are no-ops.
    pub(crate) fn start(&self, hub: &Arc<ConduitHub>) {
        let mut guard = self.handle.lock();
        if guard.is_some() {
            return;
        }

        let weak: Weak<ConduitHub> = Arc::downgrade(hub);
        let interval = hub.config().cleanup_interval();
        *guard = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately; skip it.
            let _ = ticker.tick().await;
            loop {
                let _ = ticker.tick().await;
                let Some(hub) = weak.upgrade() else { break };
                info!("kicking off cleanup sweep");
                let _ = hub.sweep();
            }
        }));
    }

    /// Whether the sweep task has been started.
    pub(crate) fn is_started(&self) -> bool {
        self.handle.lock().is_some()
    }

    /// Abort the task if running.
    pub(crate) fn abort(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }
}
