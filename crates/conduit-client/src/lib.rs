//! # conduit-client
//!
//! Client half of the Conduit selective push system.
//!
//! - [`client`]: the [`ConduitClient`] façade — bounded-retry connect,
//!   automatic reconnect, and replay of pending intents
//! - [`queue`]: the pending subscription/filter intent queue
//! - [`dispatch`]: the handler table pushes are routed through
//! - [`session`]: the transport seam and its `tokio-tungstenite`
//!   implementation
//!
//! A subscription or filter application is remembered before it is
//! sent, so nothing is lost to a flaky connection: whatever the server
//! last heard is re-established after every reconnect.

#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod queue;
pub mod session;

pub use client::ConduitClient;
pub use config::ClientConfig;
pub use dispatch::{DispatchTable, HandlerId};
pub use error::{ClientError, SessionError};
pub use queue::PendingQueue;
pub use session::{Session, SessionEvents, SessionFactory, WsSessionFactory};
