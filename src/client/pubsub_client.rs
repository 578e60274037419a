//! Public client facade
//!
//! `PubSubClient` composes the connection supervisor, the subscription
//! registry and the correlation table behind a small async API. It is cheap
//! to clone; all clones drive the same connection.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Value, json};
use tokio::sync::{broadcast, oneshot, watch};
use tracing::{debug, info};
use tungstenite::client::IntoClientRequest;
use uuid::Uuid;

use crate::client::credentials::Credentials;
use crate::client::events::{ClientEvent, EventRecord};
use crate::config::ClientConfig;
use crate::connection::{ConnectionState, Ready, Shared, Supervisor, supervisor};
use crate::correlation::RequestKind;
use crate::subscription::{SubscriptionHandle, SubscriptionState, TopicHandler};
use crate::transport::message::Envelope;
use crate::transport::websocket::{Transport, WebSocketTransport};
use crate::utils::error::{ConnectError, RequestError, SubscriptionError};
use crate::utils::token;

#[derive(Clone)]
pub struct PubSubClient {
    shared: Arc<Shared>,
}

impl PubSubClient {
    /// A client that talks WebSocket to `config.url`.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_transport(config, Arc::new(WebSocketTransport::new()))
    }

    /// A client over a custom `Transport`.
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            shared: Arc::new(Shared::new(config, transport)),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_receiver()
    }

    /// Live lifecycle events from now on.
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.shared.events.subscribe()
    }

    /// Recently emitted events, optionally limited to the last `within`.
    pub fn recent_events(&self, within: Option<chrono::Duration>) -> Vec<EventRecord> {
        self.shared.events.recent(within)
    }

    /// Connect and stay connected.
    ///
    /// Resolves once the first session is Ready, or with the first fatal
    /// failure. Afterwards the connection is maintained in the background
    /// until `disconnect`.
    pub async fn connect(&self, credentials: Credentials) -> Result<Ready, ConnectError> {
        if let Some(token) = &credentials.token {
            if let Some(claims) = token::check_expiry(token, Utc::now())? {
                debug!("Connecting as {:?}", claims.cc_uid);
            }
        }
        self.shared
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ConnectError::InvalidUrl(e.to_string()))?;

        let reply = {
            let mut slot = self.shared.supervisor.lock();
            if slot.as_ref().is_some_and(|running| !running.task.is_finished()) {
                return Err(ConnectError::AlreadyConnected);
            }

            let (reply_tx, reply_rx) = oneshot::channel();
            let (shutdown, shutdown_rx) = watch::channel(false);
            let task = tokio::spawn(supervisor::run(
                Arc::clone(&self.shared),
                credentials,
                shutdown_rx,
                reply_tx,
            ));
            *slot = Some(Supervisor { shutdown, task });
            reply_rx
        };

        info!("Connecting to {}", self.shared.config.url);
        reply.await.unwrap_or(Err(ConnectError::Cancelled))
    }

    /// Close the connection for good.
    ///
    /// Pending requests fail with `RequestError::Cancelled` and every
    /// subscription is dropped. Calling it again, or without a connection,
    /// does nothing.
    pub async fn disconnect(&self) {
        let running = self.shared.supervisor.lock().take();
        let Some(Supervisor { shutdown, task }) = running else {
            return;
        };

        info!("Disconnecting");
        self.shared.set_state(ConnectionState::Closing);
        let _ = shutdown.send(true);
        let _ = task.await;

        self.shared.clear_any_session();
        self.shared.correlation.fail_all(RequestError::Cancelled);
        self.shared.registry.clear();
        self.shared.set_state(ConnectionState::Disconnected);
    }

    /// Subscribe `handler` to `topic`.
    ///
    /// Returns right away. The SUBSCRIBE goes out immediately when the
    /// connection is Ready, otherwise once it becomes Ready. Broker
    /// rejection reaches `handler.on_error` and the event stream; use
    /// `subscribe_and_wait` to await the outcome instead.
    pub fn subscribe<H>(&self, topic: &str, handler: H) -> SubscriptionHandle
    where
        H: TopicHandler + 'static,
    {
        self.subscribe_arc(topic, Arc::new(handler))
    }

    pub fn subscribe_arc(&self, topic: &str, handler: Arc<dyn TopicHandler>) -> SubscriptionHandle {
        let handle = self.shared.registry.subscribe(topic, handler);
        if self.shared.state() == ConnectionState::Ready {
            self.shared.flush_subscriptions();
        }
        handle
    }

    /// Subscribe and wait for the broker's answer.
    pub async fn subscribe_and_wait<H>(
        &self,
        topic: &str,
        handler: H,
    ) -> Result<SubscriptionHandle, SubscriptionError>
    where
        H: TopicHandler + 'static,
    {
        let handle = self.subscribe(topic, handler);
        let Some(mut status) = self.shared.registry.watch(&handle) else {
            return Err(SubscriptionError::Unsubscribed);
        };

        let outcome = status
            .wait_for(|state| *state != SubscriptionState::Pending)
            .await
            .map(|state| state.clone());
        match outcome {
            Ok(SubscriptionState::Failed(err)) => Err(err),
            Ok(_) => Ok(handle),
            Err(_) => Err(SubscriptionError::Unsubscribed),
        }
    }

    /// Stop delivery for `handle`.
    ///
    /// The handler is detached before this returns: no call to it starts
    /// afterwards. The broker is told on a best-effort basis.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        if !self.shared.registry.unsubscribe(handle) {
            debug!("Subscription to {} already gone", handle.topic());
            return;
        }

        if let Some(session) = self.shared.session() {
            if let Err(e) = session.send(Envelope::unsubscribe(handle.topic())) {
                debug!("Unsubscribe for {} not sent: {}", handle.topic(), e);
            }
        }
    }

    pub fn subscription_state(&self, topic: &str) -> Option<SubscriptionState> {
        self.shared.registry.state(topic)
    }

    /// Send an RPC request and wait for its response payload.
    ///
    /// `timeout` defaults to the configured request timeout.
    pub async fn request(
        &self,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, RequestError> {
        if self.shared.state() != ConnectionState::Ready {
            return Err(RequestError::NotConnected);
        }

        let correlation = &self.shared.correlation;
        let id = correlation.next_id();
        let in_flight = correlation.register(id.clone(), RequestKind::Rpc)?;

        // read after registering so a concurrent teardown either fails the
        // entry or leaves no session to send on
        let Some(session) = self.shared.session() else {
            return Err(RequestError::NotConnected);
        };
        session
            .send(Envelope::rpc_request(id, payload))
            .map_err(|e| RequestError::ConnectionLost(e.to_string()))?;

        let timeout = timeout.unwrap_or(self.shared.config.request_timeout);
        let response = in_flight.wait(Some(timeout)).await?;
        Ok(response.payload.unwrap_or(Value::Null))
    }

    /// Invoke a broker RPC method with the connection's token.
    pub async fn call(
        &self,
        method: &str,
        args: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, RequestError> {
        let token = self.shared.token();
        self.request(call_payload(token.as_deref(), method, args), timeout)
            .await
    }
}

pub(super) fn call_payload(token: Option<&str>, method: &str, args: Vec<Value>) -> Value {
    let mut payload = json!({
        "call": {
            "type": "call",
            "id": Uuid::new_v4().to_string(),
            "method": method,
            "args": args,
        }
    });
    if let Some(token) = token {
        payload["token"] = Value::String(token.to_string());
    }
    payload
}

