//! The `client` module is the public face of `ccpubsub`.
//!
//! It provides `PubSubClient`, the facade that composes connection,
//! subscriptions and request correlation, together with the credentials it
//! connects with and the lifecycle events it reports.

pub mod credentials;
pub mod events;
pub mod pubsub_client;

pub use credentials::Credentials;
pub use events::{ClientEvent, EventRecord};
pub use pubsub_client::PubSubClient;
