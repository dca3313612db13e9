//! # conduit-core
//!
//! Wire messages and shared types for the Conduit selective push system.
//!
//! - [`messages`]: the client/server wire protocol (invocations and push
//!   envelopes)
//! - [`ids`]: opaque connection identifiers
//!
//! Both the server and the client crates depend on this one; it stays free
//! of any transport or runtime dependency.

#![deny(unsafe_code)]

pub mod ids;
pub mod messages;

pub use ids::ConnectionId;
pub use messages::{ClientInvocation, ConduitPayload, PushEnvelope, PushPayload, CONDUIT_METHOD};
