//! The `error` module defines the error types used within `ccpubsub`.
//!
//! Every failure a caller can observe is one of the typed outcomes below.
//! Transport and protocol faults are mostly recovered internally by the
//! connection supervisor; the request, subscription and connect errors are
//! what the public client surfaces.

use std::fmt;

use thiserror::Error;

use crate::transport::message::EnvelopeKind;

/// I/O level failures of the underlying WebSocket.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("failed to open transport: {0}")]
    Connect(String),

    #[error("failed to send frame: {0}")]
    Send(String),

    #[error("failed to receive frame: {0}")]
    Receive(String),

    #[error("transport closed: {0}")]
    Closed(String),
}

/// A frame that could not be understood, or an envelope that makes no sense
/// in the direction it arrived.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("malformed envelope: {0}")]
    Malformed(String),

    #[error("unknown envelope type `{0}`")]
    UnknownType(String),

    #[error("unexpected {kind} envelope: {detail}")]
    Unexpected { kind: EnvelopeKind, detail: String },
}

/// The broker refused our identity, or the credential is unusable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("handshake rejected ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("auth token expired at {expired_at}")]
    TokenExpired { expired_at: i64 },
}

/// Outcome of a failed `request`, `call` or internal correlated exchange.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("request timed out")]
    Timeout,

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("not connected")]
    NotConnected,

    #[error("server error ({code}): {message}")]
    Server { code: String, message: String },

    #[error("correlation id `{0}` is already pending")]
    Duplicate(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Per-topic failure, delivered once to the topic's handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    #[error("subscription rejected ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("subscription was not acknowledged in time")]
    Timeout,

    #[error("subscription was removed before it was acknowledged")]
    Unsubscribed,
}

/// Terminal failures of `PubSubClient::connect`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("gave up after {attempts} failed attempts: {last}")]
    RetriesExhausted { attempts: u32, last: DisconnectReason },

    #[error("connect cancelled by shutdown")]
    Cancelled,

    #[error("client is already connected or connecting")]
    AlreadyConnected,

    #[error("invalid broker url: {0}")]
    InvalidUrl(String),
}

/// Why a live session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    Transport(TransportError),
    Protocol(ProtocolError),
    KeepaliveTimeout,
    HandshakeTimeout,
    AuthRejected(AuthError),
    Shutdown,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Transport(err) => write!(f, "{err}"),
            DisconnectReason::Protocol(err) => write!(f, "too many protocol errors, last: {err}"),
            DisconnectReason::KeepaliveTimeout => f.write_str("no pong received before keepalive timeout"),
            DisconnectReason::HandshakeTimeout => f.write_str("handshake was not acknowledged in time"),
            DisconnectReason::AuthRejected(err) => write!(f, "{err}"),
            DisconnectReason::Shutdown => f.write_str("client shut down"),
        }
    }
}

/// Umbrella error for callers that do not care which layer failed.
#[derive(Debug, Error)]
pub enum PubSubError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = PubSubError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_error_display() {
        assert_eq!(RequestError::Timeout.to_string(), "request timed out");
        assert_eq!(
            RequestError::Server {
                code: "forbidden".into(),
                message: "nope".into()
            }
            .to_string(),
            "server error (forbidden): nope"
        );
    }

    #[test]
    fn disconnect_reason_display() {
        let reason = DisconnectReason::Transport(TransportError::Closed("eof".into()));
        assert_eq!(reason.to_string(), "transport closed: eof");
        assert_eq!(
            DisconnectReason::KeepaliveTimeout.to_string(),
            "no pong received before keepalive timeout"
        );
    }

    #[test]
    fn connect_error_wraps_auth() {
        let err: ConnectError = AuthError::TokenExpired { expired_at: 10 }.into();
        assert!(matches!(err, ConnectError::Auth(AuthError::TokenExpired { .. })));
        assert_eq!(err.to_string(), "auth token expired at 10");
    }

    #[test]
    fn protocol_error_converts_into_request_error() {
        let err: RequestError = ProtocolError::UnknownType("bogus".into()).into();
        assert_eq!(err.to_string(), "unknown envelope type `bogus`");
    }

    #[test]
    fn umbrella_error_from_json() {
        let json_err = serde_json::from_str::<String>("not json").unwrap_err();
        let err: PubSubError = json_err.into();
        assert!(err.to_string().starts_with("serialization error:"));
    }
}
