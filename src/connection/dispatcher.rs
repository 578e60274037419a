use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::connection::keepalive::Keepalive;
use crate::connection::session::SessionHandle;
use crate::correlation::CorrelationTable;
use crate::subscription::SubscriptionRegistry;
use crate::transport::message::{Envelope, EnvelopeKind};
use crate::utils::error::{ProtocolError, RequestError};

/// Routes each inbound envelope to the component that owns it.
///
/// Runs on the session's reader task. It never fails the loop; an envelope
/// that fits nowhere is returned as a `ProtocolError` for the reader to
/// count and drop.
pub struct Dispatcher {
    correlation: Arc<CorrelationTable>,
    registry: Arc<SubscriptionRegistry>,
    keepalive: Arc<Mutex<Keepalive>>,
    session: SessionHandle,
}

impl Dispatcher {
    pub fn new(
        correlation: Arc<CorrelationTable>,
        registry: Arc<SubscriptionRegistry>,
        keepalive: Arc<Mutex<Keepalive>>,
        session: SessionHandle,
    ) -> Self {
        Self {
            correlation,
            registry,
            keepalive,
            session,
        }
    }

    pub fn dispatch(&self, envelope: Envelope) -> Result<(), ProtocolError> {
        match envelope.kind {
            EnvelopeKind::Publish => self.publish(envelope),
            EnvelopeKind::Ping => {
                // the writer may already be gone; the reader finds out soon enough
                let _ = self.session.send(Envelope::pong(envelope.nonce));
                Ok(())
            }
            EnvelopeKind::Pong => {
                self.keepalive.lock().on_pong(envelope.nonce.as_deref());
                Ok(())
            }
            EnvelopeKind::RpcResponse
            | EnvelopeKind::Error
            | EnvelopeKind::Whoami
            | EnvelopeKind::Subscribe
            | EnvelopeKind::Unsubscribe => self.response(envelope),
            EnvelopeKind::RpcRequest => Err(unexpected(&envelope, "clients do not serve requests")),
        }
    }

    fn response(&self, mut envelope: Envelope) -> Result<(), ProtocolError> {
        let Some(id) = envelope.id.take() else {
            if envelope.kind == EnvelopeKind::Unsubscribe {
                debug!("Unsubscribe confirmed for {:?}", envelope.topic);
                return Ok(());
            }
            let detail = match &envelope.error {
                Some(error) => format!("missing id ({}: {})", error.code, error.message),
                None => "missing id".to_string(),
            };
            return Err(unexpected(&envelope, &detail));
        };

        let result = match envelope.kind {
            EnvelopeKind::Error => {
                let error = envelope.error.take();
                Err(RequestError::Server {
                    code: error
                        .as_ref()
                        .map(|e| e.code.clone())
                        .unwrap_or_else(|| "unknown".to_string()),
                    message: error.map(|e| e.message).unwrap_or_default(),
                })
            }
            _ => Ok(envelope.with_id(id.clone())),
        };

        // a late or duplicate response is logged by the table
        self.correlation.resolve(&id, result);
        Ok(())
    }

    fn publish(&self, envelope: Envelope) -> Result<(), ProtocolError> {
        let Some(topic) = envelope.topic.as_deref() else {
            return Err(unexpected(&envelope, "publish without topic"));
        };

        match self.registry.handler_for(topic) {
            Some(slot) => {
                let payload = envelope.payload.as_ref().unwrap_or(&Value::Null);
                if !slot.dispatch(payload) {
                    debug!("Dropping event for unsubscribed topic {}", topic);
                }
            }
            None => debug!("Dropping event for unknown topic {}", topic),
        }
        Ok(())
    }
}

fn unexpected(envelope: &Envelope, detail: &str) -> ProtocolError {
    ProtocolError::Unexpected {
        kind: envelope.kind,
        detail: detail.to_string(),
    }
}
