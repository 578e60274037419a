//! Wire envelope for the Crowd Control PubSub protocol.
//!
//! Every WebSocket frame carries exactly one JSON object tagged by `type`.
//! Optional fields are omitted on encode and default to `None` on decode,
//! and unknown fields are ignored so that broker additions do not break
//! older clients.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::error::ProtocolError;

pub type CorrelationId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnvelopeKind {
    Whoami,
    Subscribe,
    Unsubscribe,
    Publish,
    RpcRequest,
    RpcResponse,
    Error,
    Ping,
    Pong,
}

impl EnvelopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeKind::Whoami => "whoami",
            EnvelopeKind::Subscribe => "subscribe",
            EnvelopeKind::Unsubscribe => "unsubscribe",
            EnvelopeKind::Publish => "publish",
            EnvelopeKind::RpcRequest => "rpc-request",
            EnvelopeKind::RpcResponse => "rpc-response",
            EnvelopeKind::Error => "error",
            EnvelopeKind::Ping => "ping",
            EnvelopeKind::Pong => "pong",
        }
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnvelopeKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "whoami" => EnvelopeKind::Whoami,
            "subscribe" => EnvelopeKind::Subscribe,
            "unsubscribe" => EnvelopeKind::Unsubscribe,
            "publish" => EnvelopeKind::Publish,
            "rpc-request" => EnvelopeKind::RpcRequest,
            "rpc-response" => EnvelopeKind::RpcResponse,
            "error" => EnvelopeKind::Error,
            "ping" => EnvelopeKind::Ping,
            "pong" => EnvelopeKind::Pong,
            other => return Err(ProtocolError::UnknownType(other.to_string())),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl ErrorBody {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// One protocol message.
///
/// `id` links a request to its response and is absent on fire-and-forget
/// traffic. `topic` names the channel for subscribe, unsubscribe and
/// publish. `nonce` pairs a ping with its pong.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<CorrelationId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

/// Decoding goes through a loosely typed mirror so an unknown `type`
/// produces `ProtocolError::UnknownType` instead of a generic serde error.
#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    id: Option<CorrelationId>,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    nonce: Option<String>,
    #[serde(default)]
    payload: Option<Value>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

impl Envelope {
    pub fn new(kind: EnvelopeKind) -> Self {
        Self {
            kind,
            id: None,
            topic: None,
            nonce: None,
            payload: None,
            error: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<CorrelationId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_error(mut self, error: ErrorBody) -> Self {
        self.error = Some(error);
        self
    }

    pub fn whoami(id: impl Into<CorrelationId>, payload: Value) -> Self {
        Self::new(EnvelopeKind::Whoami).with_id(id).with_payload(payload)
    }

    pub fn subscribe(id: impl Into<CorrelationId>, topic: impl Into<String>, payload: Value) -> Self {
        Self::new(EnvelopeKind::Subscribe)
            .with_id(id)
            .with_topic(topic)
            .with_payload(payload)
    }

    pub fn unsubscribe(topic: impl Into<String>) -> Self {
        Self::new(EnvelopeKind::Unsubscribe).with_topic(topic)
    }

    pub fn publish(topic: impl Into<String>, payload: Value) -> Self {
        Self::new(EnvelopeKind::Publish)
            .with_topic(topic)
            .with_payload(payload)
    }

    pub fn rpc_request(id: impl Into<CorrelationId>, payload: Value) -> Self {
        Self::new(EnvelopeKind::RpcRequest)
            .with_id(id)
            .with_payload(payload)
    }

    pub fn rpc_response(id: impl Into<CorrelationId>, payload: Value) -> Self {
        Self::new(EnvelopeKind::RpcResponse)
            .with_id(id)
            .with_payload(payload)
    }

    pub fn error(id: Option<CorrelationId>, error: ErrorBody) -> Self {
        let mut envelope = Self::new(EnvelopeKind::Error).with_error(error);
        envelope.id = id;
        envelope
    }

    pub fn ping(nonce: impl Into<String>) -> Self {
        Self::new(EnvelopeKind::Ping).with_nonce(nonce)
    }

    pub fn pong(nonce: Option<String>) -> Self {
        let mut envelope = Self::new(EnvelopeKind::Pong);
        envelope.nonce = nonce;
        envelope
    }
}

/// Serialize an envelope into the text of one WebSocket frame.
pub fn encode(envelope: &Envelope) -> Result<String, ProtocolError> {
    serde_json::to_string(envelope).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Parse one inbound frame.
pub fn decode(frame: &[u8]) -> Result<Envelope, ProtocolError> {
    let raw: RawEnvelope =
        serde_json::from_slice(frame).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    let kind = raw.kind.parse::<EnvelopeKind>()?;

    Ok(Envelope {
        kind,
        id: raw.id,
        topic: raw.topic,
        nonce: raw.nonce,
        payload: raw.payload,
        error: raw.error,
    })
}
