//! The Conduit wire protocol.
//!
//! Every frame is a single JSON text message. Client→server frames are
//! [`ClientInvocation`]s tagged by `method`; server→client frames are
//! [`PushEnvelope`]s whose `method` selects the client-side handler:
//!
//! - topic pushes arrive under [`CONDUIT_METHOD`] and carry a
//!   [`ConduitPayload`] so one handler can demultiplex by event key;
//! - filtered pushes arrive under the payload's own type name and carry
//!   the typed object directly.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Method name used for topic-mode pushes.
pub const CONDUIT_METHOD: &str = "conduit";

/// A client→server invocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum ClientInvocation {
    /// Join the broadcast group for an event key.
    #[serde(rename = "SubscribeToEventAsync", rename_all = "camelCase")]
    Subscribe {
        /// The topic to join.
        event_key: String,
    },
    /// Replace this connection's filter value for a named filter type.
    #[serde(rename = "ApplyFilter", rename_all = "camelCase")]
    ApplyFilter {
        /// Registered filter type name (matched case-insensitively).
        filter_name: String,
        /// Structural filter payload, decoded server-side.
        filter: Value,
    },
}

/// A server→client frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PushEnvelope {
    /// Handler selector: [`CONDUIT_METHOD`] for topic pushes, the payload
    /// type name for filtered pushes.
    pub method: String,
    /// The frame body.
    pub payload: Value,
}

/// Body of a topic-mode push.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConduitPayload {
    /// The topic this message was broadcast to.
    pub event_key: String,
    /// The application payload.
    pub message: Value,
}

/// Names the wire method used when a payload is pushed directly to a
/// filtered connection set.
///
/// The default is the payload's bare type name, which matches how the
/// client registers its handlers. Implement `kind` manually when the
/// Rust type name and the wire name need to differ.
pub trait PushPayload: Serialize {
    /// Wire method name for direct pushes of this payload.
    fn kind(&self) -> &'static str {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full)
    }
}
