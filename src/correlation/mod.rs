//! The `correlation` module matches responses to the requests that caused
//! them.
//!
//! Every correlated exchange (handshake, subscribe, RPC) registers an id in
//! the `CorrelationTable` and awaits an `InFlight` completion. Exactly one of
//! resolve, expire, cancel or a bulk failure completes each entry.

pub mod table;

pub use table::{CorrelationTable, InFlight, RequestKind};
