use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::subscription::topic;
use crate::utils::error::{DisconnectReason, SubscriptionError};

/// Receives the events published to one topic.
///
/// Handlers run on the connection's reader task, in the order events arrive,
/// and must not block.
pub trait TopicHandler: Send + Sync {
    fn handle(&self, payload: &Value);

    /// Called once when the broker rejects the subscription.
    fn on_error(&self, _error: &SubscriptionError) {}

    /// Called when the connection drops while the topic is subscribed; the
    /// topic is resubscribed on the next connection.
    fn on_interrupted(&self, _reason: &DisconnectReason) {}
}

impl<F> TopicHandler for F
where
    F: Fn(&Value) + Send + Sync,
{
    fn handle(&self, payload: &Value) {
        self(payload)
    }
}

/// Shared cell through which a subscription's handler is invoked.
///
/// The lock is held for the whole handler call, so once `detach` returns no
/// call is running on another thread and none will start. The lock is
/// reentrant so a handler can unsubscribe its own topic.
pub struct HandlerSlot {
    handler: ReentrantMutex<RefCell<Option<Arc<dyn TopicHandler>>>>,
}

impl HandlerSlot {
    fn new(handler: Arc<dyn TopicHandler>) -> Self {
        Self {
            handler: ReentrantMutex::new(RefCell::new(Some(handler))),
        }
    }

    /// Invoke the handler. Returns `false` when it has been detached.
    pub fn dispatch(&self, payload: &Value) -> bool {
        self.with_handler(|handler| handler.handle(payload))
    }

    pub fn fail(&self, error: &SubscriptionError) -> bool {
        self.with_handler(|handler| handler.on_error(error))
    }

    pub fn interrupt(&self, reason: &DisconnectReason) -> bool {
        self.with_handler(|handler| handler.on_interrupted(reason))
    }

    pub fn detach(&self) {
        let guard = self.handler.lock();
        guard.borrow_mut().take();
    }

    pub fn is_attached(&self) -> bool {
        self.handler.lock().borrow().is_some()
    }

    fn with_handler(&self, f: impl FnOnce(&dyn TopicHandler)) -> bool {
        let guard = self.handler.lock();
        let handler = guard.borrow().clone();
        match handler {
            Some(handler) => {
                f(handler.as_ref());
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionState {
    Pending,
    Active,
    Failed(SubscriptionError),
}

impl SubscriptionState {
    pub fn is_failed(&self) -> bool {
        matches!(self, SubscriptionState::Failed(_))
    }
}

/// Identifies one subscription. A topic that is unsubscribed and subscribed
/// again gets a new generation, so a stale handle never touches the new
/// subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    topic: String,
    generation: u64,
}

impl SubscriptionHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// A SUBSCRIBE that has to go out on the current connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSubscribe {
    pub topic: String,
    pub generation: u64,
}

struct Subscription {
    generation: u64,
    state: SubscriptionState,
    sent: bool,
    slot: Arc<HandlerSlot>,
    status: watch::Sender<SubscriptionState>,
}

impl Subscription {
    fn set_state(&mut self, state: SubscriptionState) {
        self.state = state.clone();
        self.status.send_replace(state);
    }

    fn handle(&self, topic: &str) -> SubscriptionHandle {
        SubscriptionHandle {
            topic: topic.to_string(),
            generation: self.generation,
        }
    }
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Subscription>,
    next_generation: u64,
}

/// At most one subscription per topic.
///
/// Handler slots are always invoked after the registry lock is released, so
/// handlers may call back into the registry.
#[derive(Default)]
pub struct SubscriptionRegistry {
    inner: Mutex<Inner>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in `topic`.
    ///
    /// A Pending or Active topic keeps its handler and the existing handle
    /// is returned; a Failed topic is replaced by a fresh Pending one.
    pub fn subscribe(&self, topic: &str, handler: Arc<dyn TopicHandler>) -> SubscriptionHandle {
        if !topic::is_valid(topic) {
            warn!("Topic {} does not follow the broker topic format", topic);
        }

        let (handle, replaced) = {
            let mut inner = self.inner.lock();
            if let Some(existing) = inner.entries.get(topic) {
                if !existing.state.is_failed() {
                    debug!("Topic {} already subscribed", topic);
                    return existing.handle(topic);
                }
            }

            inner.next_generation += 1;
            let (status, _) = watch::channel(SubscriptionState::Pending);
            let subscription = Subscription {
                generation: inner.next_generation,
                state: SubscriptionState::Pending,
                sent: false,
                slot: Arc::new(HandlerSlot::new(handler)),
                status,
            };
            let handle = subscription.handle(topic);
            (handle, inner.entries.insert(topic.to_string(), subscription))
        };

        if let Some(old) = replaced {
            old.slot.detach();
        }
        handle
    }

    /// Remove the subscription behind `handle`. Returns `false` if it was
    /// already gone or replaced.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let removed = {
            let mut inner = self.inner.lock();
            let current = inner
                .entries
                .get(&handle.topic)
                .is_some_and(|entry| entry.generation == handle.generation);
            if current {
                inner.entries.remove(&handle.topic)
            } else {
                None
            }
        };

        match removed {
            Some(entry) => {
                entry.slot.detach();
                true
            }
            None => false,
        }
    }

    /// Pending subscriptions not yet sent on the current connection, marked
    /// as sent.
    pub fn take_unsent(&self) -> Vec<PendingSubscribe> {
        let mut inner = self.inner.lock();
        inner
            .entries
            .iter_mut()
            .filter(|(_, entry)| entry.state == SubscriptionState::Pending && !entry.sent)
            .map(|(topic, entry)| {
                entry.sent = true;
                PendingSubscribe {
                    topic: topic.clone(),
                    generation: entry.generation,
                }
            })
            .collect()
    }

    /// Apply the broker's answer to a SUBSCRIBE.
    ///
    /// Returns `false` when the subscription is gone, was replaced or is no
    /// longer Pending; the ack is stale then and nothing changes. A failure
    /// reaches the handler exactly once.
    pub fn on_subscribe_ack(
        &self,
        topic: &str,
        generation: u64,
        result: Result<(), SubscriptionError>,
    ) -> bool {
        let failed_slot = {
            let mut inner = self.inner.lock();
            let Some(entry) = inner.entries.get_mut(topic) else {
                debug!("Ignoring ack for unknown topic {}", topic);
                return false;
            };
            if entry.generation != generation || entry.state != SubscriptionState::Pending {
                debug!("Ignoring stale ack for topic {}", topic);
                return false;
            }

            match &result {
                Ok(()) => {
                    entry.set_state(SubscriptionState::Active);
                    None
                }
                Err(err) => {
                    entry.set_state(SubscriptionState::Failed(err.clone()));
                    Some(Arc::clone(&entry.slot))
                }
            }
        };

        if let (Some(slot), Err(err)) = (failed_slot, &result) {
            warn!("Subscription to {} failed: {}", topic, err);
            slot.fail(err);
        }
        true
    }

    /// Put a Pending subscription back in the unsent queue after its
    /// SUBSCRIBE went nowhere. Returns `false` if the handle is stale or the
    /// topic already left Pending.
    pub fn requeue(&self, topic: &str, generation: u64) -> bool {
        let mut inner = self.inner.lock();
        match inner.entries.get_mut(topic) {
            Some(entry) if entry.generation == generation && entry.state == SubscriptionState::Pending => {
                entry.sent = false;
                true
            }
            _ => false,
        }
    }

    /// Every live subscription goes back to Pending and unsent. Failed ones
    /// stay failed. Returns the handlers to notify of the interruption.
    pub fn on_connection_lost(&self) -> Vec<Arc<HandlerSlot>> {
        let mut inner = self.inner.lock();
        let mut interrupted = Vec::new();
        for entry in inner.entries.values_mut() {
            if entry.state.is_failed() {
                continue;
            }
            if entry.state == SubscriptionState::Active {
                interrupted.push(Arc::clone(&entry.slot));
            }
            entry.sent = false;
            entry.set_state(SubscriptionState::Pending);
        }
        interrupted
    }

    /// Slot for dispatching a publish on `topic`; failed subscriptions get
    /// nothing.
    pub fn handler_for(&self, topic: &str) -> Option<Arc<HandlerSlot>> {
        let inner = self.inner.lock();
        inner
            .entries
            .get(topic)
            .filter(|entry| !entry.state.is_failed())
            .map(|entry| Arc::clone(&entry.slot))
    }

    pub fn state(&self, topic: &str) -> Option<SubscriptionState> {
        self.inner.lock().entries.get(topic).map(|entry| entry.state.clone())
    }

    /// State updates for the subscription behind `handle`. The sender is
    /// dropped when the subscription is removed.
    pub fn watch(&self, handle: &SubscriptionHandle) -> Option<watch::Receiver<SubscriptionState>> {
        let inner = self.inner.lock();
        inner
            .entries
            .get(&handle.topic)
            .filter(|entry| entry.generation == handle.generation)
            .map(|entry| entry.status.subscribe())
    }

    pub fn is_current(&self, handle: &SubscriptionHandle) -> bool {
        self.inner
            .lock()
            .entries
            .get(&handle.topic)
            .is_some_and(|entry| entry.generation == handle.generation)
    }

    pub fn topics(&self) -> Vec<String> {
        self.inner.lock().entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Drop every subscription and detach its handler.
    pub fn clear(&self) {
        let drained: Vec<_> = self.inner.lock().entries.drain().collect();
        for (_, entry) in drained {
            entry.slot.detach();
        }
    }
}
