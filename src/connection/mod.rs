//! The `connection` module drives the client's single logical connection.
//!
//! A supervisor task owns the lifecycle (connect, handshake, resubscribe,
//! ready, teardown, backoff). Each transport session it opens gets its own
//! reader and writer tasks; the `Shared` context is the explicit state every
//! task and the public facade pass around.

pub(crate) mod dispatcher;
pub(crate) mod keepalive;
pub(crate) mod session;
pub mod state;
pub(crate) mod supervisor;

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::client::credentials::Credentials;
use crate::client::events::{ClientEvent, EventLog};
use crate::config::ClientConfig;
use crate::correlation::{CorrelationTable, RequestKind};
use crate::subscription::{PendingSubscribe, SubscriptionRegistry};
use crate::transport::message::Envelope;
use crate::transport::websocket::Transport;
use crate::utils::error::{ConnectError, RequestError, SubscriptionError};

use session::{SessionHandle, SessionOptions};

pub use state::{Backoff, ConnectionState, Ready};

/// A running supervisor and the means to stop it.
pub(crate) struct Supervisor {
    pub shutdown: watch::Sender<bool>,
    pub task: JoinHandle<()>,
}

/// State shared by the facade, the supervisor and the session tasks.
pub(crate) struct Shared {
    pub config: ClientConfig,
    pub transport: Arc<dyn Transport>,
    pub correlation: Arc<CorrelationTable>,
    pub registry: Arc<SubscriptionRegistry>,
    pub events: EventLog,
    state: watch::Sender<ConnectionState>,
    session: Mutex<Option<SessionHandle>>,
    credentials: Mutex<Credentials>,
    pub supervisor: Mutex<Option<Supervisor>>,
}

impl Shared {
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            events: EventLog::new(config.event_log_limit),
            config,
            transport,
            correlation: Arc::new(CorrelationTable::new()),
            registry: Arc::new(SubscriptionRegistry::new()),
            state,
            session: Mutex::new(None),
            credentials: Mutex::new(Credentials::anonymous()),
            supervisor: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("Connection state {} -> {}", previous, state);
        }
    }

    pub fn session(&self) -> Option<SessionHandle> {
        self.session.lock().clone()
    }

    pub(crate) fn install_session(&self, handle: SessionHandle) {
        *self.session.lock() = Some(handle);
    }

    /// Clear the current session, but only if it is still `id`.
    pub(crate) fn clear_session(&self, id: u64) {
        let mut session = self.session.lock();
        if session.as_ref().is_some_and(|handle| handle.id() == id) {
            *session = None;
        }
    }

    pub(crate) fn clear_any_session(&self) {
        self.session.lock().take();
    }

    pub(crate) fn set_credentials(&self, credentials: Credentials) {
        *self.credentials.lock() = credentials;
    }

    /// Token of the current credentials, sent along with RPC calls.
    pub fn token(&self) -> Option<String> {
        self.credentials.lock().token.clone()
    }

    pub(crate) fn session_options(&self) -> SessionOptions {
        SessionOptions {
            keepalive_interval: self.config.keepalive_interval,
            keepalive_timeout: self.config.keepalive_timeout,
            max_protocol_errors: self.config.max_protocol_errors,
        }
    }

    /// Send every queued SUBSCRIBE on the current session without waiting
    /// for the acks.
    pub(crate) fn flush_subscriptions(self: &Arc<Self>) {
        let Some(session) = self.session() else {
            return;
        };
        for pending in self.registry.take_unsent() {
            let ack = self.send_subscribe(&session, pending);
            tokio::spawn(ack);
        }
    }

    /// Send one SUBSCRIBE and return the future that applies its ack.
    pub(crate) fn send_subscribe(
        self: &Arc<Self>,
        session: &SessionHandle,
        pending: PendingSubscribe,
    ) -> impl Future<Output = ()> + Send + 'static {
        let shared = Arc::clone(self);
        let id = self.correlation.next_id();
        let registered = self.correlation.register(id.clone(), RequestKind::Subscribe);
        let payload = self.credentials.lock().subscribe_payload();
        let sent = registered.and_then(|in_flight| {
            session
                .send(Envelope::subscribe(id, pending.topic.clone(), payload))
                .map(|()| in_flight)
                .map_err(|e| RequestError::ConnectionLost(e.to_string()))
        });

        async move {
            let outcome = match sent {
                Ok(in_flight) => in_flight.wait(Some(shared.config.request_timeout)).await,
                Err(e) => Err(e),
            };
            shared.apply_subscribe_outcome(pending, outcome.map(|_| ()));
        }
    }

    fn apply_subscribe_outcome(
        self: &Arc<Self>,
        pending: PendingSubscribe,
        outcome: Result<(), RequestError>,
    ) {
        let result = match outcome {
            Ok(()) => Ok(()),
            Err(RequestError::Server { code, message }) => {
                Err(SubscriptionError::Rejected { code, message })
            }
            Err(RequestError::Timeout) => Err(SubscriptionError::Timeout),
            Err(err @ (RequestError::ConnectionLost(_) | RequestError::Cancelled)) => {
                // connection loss requeues every topic; disconnect drops them
                debug!("Subscribe to {} interrupted: {}", pending.topic, err);
                return;
            }
            Err(other) => {
                warn!("Subscribe to {} not sent: {}", pending.topic, other);
                if self.registry.requeue(&pending.topic, pending.generation)
                    && self.state() == ConnectionState::Ready
                {
                    self.flush_subscriptions();
                }
                return;
            }
        };

        let failure = result.as_ref().err().cloned();
        let applied = self
            .registry
            .on_subscribe_ack(&pending.topic, pending.generation, result);
        if let (true, Some(reason)) = (applied, failure) {
            self.events.emit(ClientEvent::SubscriptionFailed {
                topic: pending.topic,
                reason,
            });
        }
    }
}

/// Completes the `connect` call that started a supervisor.
pub(crate) type ConnectReply = oneshot::Sender<Result<Ready, ConnectError>>;
