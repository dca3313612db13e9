//! # conduit-server
//!
//! Server half of the Conduit selective push system.
//!
//! - [`registry`]: filter type registry — name → typed decode + index
//! - [`index`]: per filter type concurrent connection→filter map
//! - [`hub`]: the façade wired to transport connect/disconnect/message
//!   events, plus topic and predicate dispatch
//! - [`sweeper`]: periodic purge of stale connection entries
//! - [`transport`]: the `ClientSender` seam and an in-process transport
//! - [`ws`]: axum WebSocket gateway speaking the Conduit wire protocol
//!
//! Dispatch fans out through [`transport::ClientSender`]; the hub never
//! talks to a socket directly, so the gateway is replaceable in tests.

#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod error;
pub mod hub;
pub mod index;
pub mod registry;
pub mod sweeper;
pub mod transport;
pub mod ws;

pub use config::HubConfig;
pub use error::{ConduitError, TransportError};
pub use hub::ConduitHub;
pub use index::FilterIndex;
pub use registry::{DefaultFilterFactory, FilterFactory, FilterRegistry};
pub use transport::{ClientSender, ConnectionContext};
pub use ws::{ConduitGateway, GatewayHandle, GatewaySender};
