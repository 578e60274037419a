//! The `transport` module is responsible for the wire side of the client.
//!
//! It defines the envelope codec spoken with the Crowd Control broker and
//! the `Transport` seam the connection supervisor opens sessions through.
//! `WebSocketTransport` is the production implementation.

pub mod message;
pub mod websocket;

#[cfg(test)]
pub(crate) mod mock;

#[cfg(test)]
mod tests;
