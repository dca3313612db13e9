//! Hub configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for a [`crate::hub::ConduitHub`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HubConfig {
    /// Maximum lifetime of a connection entry before the cleanup sweeper
    /// purges it, in seconds. A safety net for lost disconnects, not a
    /// session timeout.
    pub max_connection_lifetime_secs: u64,
    /// How often the cleanup sweeper runs, in seconds.
    pub cleanup_interval_secs: u64,
    /// Outbound per-connection queue capacity for the WebSocket gateway.
    pub send_queue_capacity: usize,
}

impl HubConfig {
    /// Maximum connection entry lifetime as a [`Duration`].
    #[must_use]
    pub fn max_connection_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_connection_lifetime_secs)
    }

    /// Sweep interval as a [`Duration`].
    #[must_use]
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_connection_lifetime_secs: 4 * 60 * 60,
            cleanup_interval_secs: 60,
            send_queue_capacity: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_lifetime_is_four_hours() {
        let cfg = HubConfig::default();
        assert_eq!(cfg.max_connection_lifetime(), Duration::from_secs(14_400));
    }

    #[test]
    fn default_cleanup_interval() {
        let cfg = HubConfig::default();
        assert_eq!(cfg.cleanup_interval(), Duration::from_secs(60));
    }

    #[test]
    fn serde_round_trip() {
        let cfg = HubConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: HubConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.cleanup_interval_secs, cfg.cleanup_interval_secs);
        assert_eq!(back.send_queue_capacity, cfg.send_queue_capacity);
    }
}
