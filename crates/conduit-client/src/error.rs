//! Client-side error types.

use thiserror::Error;

/// Top-level client error.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Every connection attempt failed; the client gave up.
    #[error("failed to establish a conduit connection after {attempts} attempts")]
    ConnectionFailed {
        /// How many attempts were made.
        attempts: u32,
    },

    /// An empty event key was passed to a subscription call.
    #[error("event key must not be empty")]
    InvalidEventKey,

    /// An empty filter name was passed to `apply_filter`.
    #[error("filter name must not be empty")]
    InvalidFilterName,

    /// A non-object filter value was passed to `apply_filter`.
    #[error("filter value must be a JSON object")]
    InvalidFilterValue,
}

/// Failure reported by a [`crate::session::Session`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The WebSocket handshake failed.
    #[error("websocket connect failed: {reason}")]
    Connect {
        /// Handshake failure message.
        reason: String,
    },

    /// An invocation could not be delivered.
    #[error("send failed: session closed or saturated")]
    SendFailed,

    /// The session is already closed.
    #[error("session is closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_failed_reports_attempts() {
        let err = ClientError::ConnectionFailed { attempts: 5 };
        assert!(err.to_string().contains('5'));
    }

    #[test]
    fn session_errors_render_a_reason() {
        let err = SessionError::Connect {
            reason: "refused".into(),
        };
        assert!(err.to_string().contains("refused"));
    }
}
