//! One transport session: a writer task, a reader task and the channel
//! between callers and the writer.
//!
//! All outbound frames go through the single writer so envelopes are never
//! interleaved on the socket. The reader decodes frames in arrival order and
//! hands them to the `Dispatcher`. Whichever task stops first reports why on
//! the `ended` channel; later reports are ignored.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::future::{self, Either};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::connection::dispatcher::Dispatcher;
use crate::connection::keepalive::{Keepalive, KeepaliveAction};
use crate::correlation::CorrelationTable;
use crate::subscription::SubscriptionRegistry;
use crate::transport::message::{Envelope, decode, encode};
use crate::transport::websocket::{Connection, FrameSink, FrameStream};
use crate::utils::error::{DisconnectReason, ProtocolError, TransportError};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// How long `close` waits for the writer to flush a close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

pub(crate) enum Outbound {
    Envelope(Envelope),
    StartKeepalive,
    Close,
}

/// Cheap handle for queueing frames on a session's writer.
#[derive(Clone)]
pub struct SessionHandle {
    id: u64,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl SessionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        self.outbound
            .send(Outbound::Envelope(envelope))
            .map_err(|_| TransportError::Closed("session writer stopped".into()))
    }

    pub(crate) fn start_keepalive(&self) {
        let _ = self.outbound.send(Outbound::StartKeepalive);
    }

    /// A handle with no writer behind it; the test reads what would be sent.
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        (Self { id: 0, outbound }, rx)
    }
}

/// Settings a session needs from the client configuration.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SessionOptions {
    pub keepalive_interval: Duration,
    pub keepalive_timeout: Duration,
    pub max_protocol_errors: u32,
}

pub(crate) struct Session {
    handle: SessionHandle,
    ended: mpsc::UnboundedReceiver<DisconnectReason>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl Session {
    pub(crate) fn start(
        connection: Connection,
        correlation: Arc<CorrelationTable>,
        registry: Arc<SubscriptionRegistry>,
        options: SessionOptions,
    ) -> Self {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (ended_tx, ended) = mpsc::unbounded_channel();
        let handle = SessionHandle {
            id,
            outbound: outbound_tx,
        };

        let keepalive = Arc::new(Mutex::new(Keepalive::new(
            options.keepalive_interval,
            options.keepalive_timeout,
        )));
        let dispatcher = Dispatcher::new(correlation, registry, Arc::clone(&keepalive), handle.clone());

        let writer = tokio::spawn(write_loop(
            id,
            connection.sink,
            outbound_rx,
            keepalive,
            ended_tx.clone(),
        ));
        let reader = tokio::spawn(read_loop(
            id,
            connection.stream,
            dispatcher,
            options.max_protocol_errors,
            ended_tx,
        ));

        debug!("Session {} started", id);
        Self {
            handle,
            ended,
            writer,
            reader,
        }
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    /// Resolves with the first reason either task stopped for.
    pub async fn ended(&mut self) -> DisconnectReason {
        self.ended.recv().await.unwrap_or_else(|| {
            DisconnectReason::Transport(TransportError::Closed("session tasks stopped".into()))
        })
    }

    /// Ask the writer to close the transport, then stop both tasks.
    pub async fn close(mut self) {
        let _ = self.handle.outbound.send(Outbound::Close);
        if tokio::time::timeout(CLOSE_GRACE, &mut self.writer).await.is_err() {
            self.writer.abort();
        }
        self.reader.abort();
        debug!("Session {} closed", self.handle.id);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.writer.abort();
        self.reader.abort();
    }
}

async fn write_loop(
    id: u64,
    mut sink: FrameSink,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    keepalive: Arc<Mutex<Keepalive>>,
    ended: mpsc::UnboundedSender<DisconnectReason>,
) {
    loop {
        let wake = keepalive.lock().next_wake();
        let tick = match wake {
            Some(at) => Either::Left(tokio::time::sleep_until(at)),
            None => Either::Right(future::pending::<()>()),
        };

        let envelope = tokio::select! {
            message = outbound.recv() => match message {
                Some(Outbound::Envelope(envelope)) => envelope,
                Some(Outbound::StartKeepalive) => {
                    keepalive.lock().start(Instant::now());
                    continue;
                }
                Some(Outbound::Close) | None => {
                    let _ = sink.close().await;
                    debug!("Session {} writer closed", id);
                    return;
                }
            },
            _ = tick => {
                let action = keepalive.lock().poll(Instant::now());
                match action {
                    KeepaliveAction::Idle => continue,
                    KeepaliveAction::Ping(nonce) => Envelope::ping(nonce),
                    KeepaliveAction::Overdue => {
                        warn!("Session {} missed its keepalive pong", id);
                        let _ = ended.send(DisconnectReason::KeepaliveTimeout);
                        return;
                    }
                }
            }
        };

        let frame = match encode(&envelope) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping unencodable {} envelope: {}", envelope.kind, e);
                continue;
            }
        };

        if let Err(e) = sink.send(frame).await {
            warn!("Session {} send failed: {}", id, e);
            let _ = ended.send(DisconnectReason::Transport(e));
            return;
        }
    }
}

async fn read_loop(
    id: u64,
    mut stream: FrameStream,
    dispatcher: Dispatcher,
    max_protocol_errors: u32,
    ended: mpsc::UnboundedSender<DisconnectReason>,
) {
    let mut consecutive_errors: u32 = 0;

    let reason = loop {
        let frame = match stream.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => break DisconnectReason::Transport(e),
            None => break DisconnectReason::Transport(TransportError::Closed("stream ended".into())),
        };

        let outcome: Result<(), ProtocolError> = decode(&frame).and_then(|envelope| dispatcher.dispatch(envelope));
        match outcome {
            Ok(()) => consecutive_errors = 0,
            Err(e) => {
                consecutive_errors += 1;
                warn!("Session {} dropped envelope: {}", id, e);
                if consecutive_errors >= max_protocol_errors.max(1) {
                    break DisconnectReason::Protocol(e);
                }
            }
        }
    };

    info!("Session {} reader stopped: {}", id, reason);
    let _ = ended.send(reason);
}
