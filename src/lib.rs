//! # ccpubsub
//!
//! `ccpubsub` is an async client for the Crowd Control PubSub service. It
//! keeps one WebSocket connection alive, re-establishes it with backoff,
//! re-subscribes topics after every reconnect and matches RPC responses to
//! their requests.
//!
//! ## Core Modules
//!
//! - `client`: `PubSubClient`, the facade most callers need.
//! - `connection`: connection state machine, keepalive and the per-session
//!   reader/writer tasks.
//! - `subscription`: per-topic subscription registry and handlers.
//! - `correlation`: pending request table keyed by correlation id.
//! - `transport`: envelope codec and the WebSocket transport.
//! - `config`: settings loading and the runtime `ClientConfig`.
//! - `utils`: errors, logging and token inspection.

pub mod client;
pub mod config;
pub mod connection;
pub mod correlation;
pub mod subscription;
pub mod transport;
pub mod utils;

pub use client::{ClientEvent, Credentials, PubSubClient};
pub use config::ClientConfig;
pub use connection::{Backoff, ConnectionState, Ready};
pub use subscription::{SubscriptionHandle, SubscriptionState, TopicHandler};
pub use utils::error::{
    AuthError, ConnectError, DisconnectReason, PubSubError, RequestError, SubscriptionError,
};
