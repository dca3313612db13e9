//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for a [`crate::client::ConduitClient`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    /// WebSocket endpoint, e.g. `ws://127.0.0.1:9000/conduit`.
    pub url: String,
    /// Pause between connection attempts, in milliseconds.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    /// How many connection attempts are made before
    /// [`crate::error::ClientError::ConnectionFailed`] is surfaced.
    #[serde(default = "default_max_connection_attempts")]
    pub max_connection_attempts: u32,
    /// Inbound push queue capacity.
    #[serde(default = "default_inbound_capacity")]
    pub inbound_capacity: usize,
}

fn default_retry_interval_ms() -> u64 {
    5000
}

fn default_max_connection_attempts() -> u32 {
    5
}

fn default_inbound_capacity() -> usize {
    256
}

impl ClientConfig {
    /// Config for `url` with default retry behavior.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            retry_interval_ms: default_retry_interval_ms(),
            max_connection_attempts: default_max_connection_attempts(),
            inbound_capacity: default_inbound_capacity(),
        }
    }

    /// Retry pause as a [`Duration`].
    #[must_use]
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}
