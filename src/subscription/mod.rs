//! The `subscription` module tracks which topics the client wants and what
//! the broker has confirmed.
//!
//! The registry is the single owner of per-topic state. It never talks to
//! the network itself: the connection layer asks it which SUBSCRIBE
//! requests are still unsent and reports acks and connection loss back.

pub mod registry;
pub mod topic;

pub use registry::{
    HandlerSlot, PendingSubscribe, SubscriptionHandle, SubscriptionRegistry, SubscriptionState,
    TopicHandler,
};
