use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::transport::message::{CorrelationId, Envelope};
use crate::utils::error::RequestError;

type Completion = oneshot::Sender<Result<Envelope, RequestError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Handshake,
    Subscribe,
    Rpc,
}

struct PendingRequest {
    kind: RequestKind,
    created_at: Instant,
    completion: Completion,
}

/// Pending requests keyed by correlation id.
///
/// Removal from the map is the single point of completion: whichever caller
/// takes the entry out first completes it, any later attempt for the same
/// id finds nothing and is a no-op.
#[derive(Default)]
pub struct CorrelationTable {
    pending: Mutex<HashMap<CorrelationId, PendingRequest>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh random id; v4 collisions are negligible for a session.
    pub fn next_id(&self) -> CorrelationId {
        Uuid::new_v4().to_string()
    }

    pub fn register(
        self: &Arc<Self>,
        id: CorrelationId,
        kind: RequestKind,
    ) -> Result<InFlight, RequestError> {
        let (completion, receiver) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            if pending.contains_key(&id) {
                return Err(RequestError::Duplicate(id));
            }
            pending.insert(
                id.clone(),
                PendingRequest {
                    kind,
                    created_at: Instant::now(),
                    completion,
                },
            );
        }

        Ok(InFlight {
            id,
            table: Arc::clone(self),
            receiver: Some(receiver),
        })
    }

    /// Complete `id` with `result`. Returns `false` for an unknown id.
    pub fn resolve(&self, id: &str, result: Result<Envelope, RequestError>) -> bool {
        let Some(entry) = self.pending.lock().remove(id) else {
            debug!("Dropping response for unknown correlation id {}", id);
            return false;
        };
        debug!(
            "Resolved {:?} request {} after {:?}",
            entry.kind,
            id,
            entry.created_at.elapsed()
        );
        let _ = entry.completion.send(result);
        true
    }

    /// Complete `id` with a timeout if it is still pending.
    pub fn expire(&self, id: &str) -> bool {
        let Some(entry) = self.pending.lock().remove(id) else {
            return false;
        };
        debug!("{:?} request {} timed out", entry.kind, id);
        let _ = entry.completion.send(Err(RequestError::Timeout));
        true
    }

    /// Forget `id` without completing it.
    pub fn cancel(&self, id: &str) -> bool {
        self.pending.lock().remove(id).is_some()
    }

    /// Complete every pending entry with `reason`, returning how many there were.
    pub fn fail_all(&self, reason: RequestError) -> usize {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        let count = drained.len();
        for (_, entry) in drained {
            let _ = entry.completion.send(Err(reason.clone()));
        }
        if count > 0 {
            debug!("Failed {} pending requests: {}", count, reason);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.pending.lock().contains_key(id)
    }
}

/// Caller side of a registered request. Dropping it unregisters the id.
pub struct InFlight {
    id: CorrelationId,
    table: Arc<CorrelationTable>,
    receiver: Option<oneshot::Receiver<Result<Envelope, RequestError>>>,
}

impl InFlight {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the outcome, bounded by `timeout` when one is given.
    pub async fn wait(mut self, timeout: Option<Duration>) -> Result<Envelope, RequestError> {
        let Some(mut receiver) = self.receiver.take() else {
            return Err(RequestError::Cancelled);
        };

        let outcome = match timeout {
            None => receiver.await,
            Some(limit) => match tokio::time::timeout(limit, &mut receiver).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    // a response that won the race is still sitting in the channel
                    self.table.expire(&self.id);
                    receiver.await
                }
            },
        };

        outcome.unwrap_or(Err(RequestError::Cancelled))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.table.cancel(&self.id);
    }
}
