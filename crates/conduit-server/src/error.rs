//! Server-side error types.
//!
//! [`ConduitError`] covers configuration mistakes (unknown or duplicate
//! filter types), malformed client payloads, and transport failures.
//! Configuration errors are permanent and never retried; transport
//! failures are surfaced to the dispatching caller without retry.

use thiserror::Error;

/// Top-level server error.
#[derive(Debug, Error)]
pub enum ConduitError {
    /// A filter type with this name is already registered.
    #[error("a conduit filter named '{name}' is already registered")]
    DuplicateFilterType {
        /// The conflicting registration name.
        name: String,
    },

    /// A client referenced a filter name nobody registered.
    #[error("there is no conduit filter named '{name}' registered on the server")]
    UnknownFilterType {
        /// The name the client sent.
        name: String,
    },

    /// Predicate dispatch was attempted against a type with no index.
    #[error("there is no conduit filter index registered for type '{type_name}'")]
    UnregisteredFilterType {
        /// The Rust type the caller asked for.
        type_name: &'static str,
    },

    /// A structural filter payload failed to decode into its typed form.
    #[error("failed to decode filter payload for '{filter_name}'")]
    Conversion {
        /// The filter type the payload was addressed to.
        filter_name: String,
        /// The underlying decode failure.
        #[source]
        source: serde_json::Error,
    },

    /// An outbound payload could not be serialized.
    #[error("failed to serialize outbound payload")]
    Serialize(#[source] serde_json::Error),

    /// The transport layer failed to deliver.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Failure reported by a [`crate::transport::ClientSender`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Delivery to a single connection failed (closed or saturated).
    #[error("send to connection '{connection_id}' failed")]
    SendFailed {
        /// The target connection.
        connection_id: String,
    },

    /// Delivery to a topic group failed.
    #[error("group send to topic '{topic}' failed")]
    GroupSendFailed {
        /// The target topic.
        topic: String,
    },

    /// An outbound frame could not be encoded for the wire.
    #[error("failed to encode outbound frame: {reason}")]
    Encode {
        /// Serializer failure message.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_filter_message_names_the_filter() {
        let err = ConduitError::UnknownFilterType {
            name: "Sample".into(),
        };
        assert!(err.to_string().contains("Sample"));
    }

    #[test]
    fn conversion_error_preserves_source() {
        let source = serde_json::from_str::<u32>("not a number").unwrap_err();
        let err = ConduitError::Conversion {
            filter_name: "Sample".into(),
            source,
        };
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn transport_error_converts() {
        let err: ConduitError = TransportError::SendFailed {
            connection_id: "c1".into(),
        }
        .into();
        assert!(matches!(err, ConduitError::Transport(_)));
    }
}
