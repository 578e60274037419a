//! In-memory `Transport` used by the unit tests.
//!
//! Each `open` either fails with a scripted error or hands the test a
//! `MockPeer`, the broker's end of a pair of futures channels.

use std::collections::VecDeque;
use std::time::Duration;

use futures::channel::mpsc as fmpsc;
use futures::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::transport::message::{Envelope, EnvelopeKind, ErrorBody, decode, encode};
use crate::transport::websocket::{Connection, Transport};
use crate::utils::error::TransportError;

pub(crate) enum Script {
    Accept,
    Fail(TransportError),
}

pub(crate) struct MockTransport {
    script: Mutex<VecDeque<Script>>,
    peers: mpsc::UnboundedSender<MockPeer>,
}

impl MockTransport {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<MockPeer>) {
        let (peers, peer_rx) = mpsc::unbounded_channel();
        (
            Self {
                script: Mutex::new(VecDeque::new()),
                peers,
            },
            peer_rx,
        )
    }

    /// Queue the outcome of the next `open`; unscripted opens are accepted.
    pub(crate) fn push(&self, step: Script) {
        self.script.lock().push_back(step);
    }
}

impl Transport for MockTransport {
    fn open(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> BoxFuture<'static, Result<Connection, TransportError>> {
        let step = self.script.lock().pop_front().unwrap_or(Script::Accept);
        let result = match step {
            Script::Fail(err) => Err(err),
            Script::Accept => {
                let (client_tx, server_rx) = fmpsc::unbounded::<String>();
                let (server_tx, client_rx) = fmpsc::unbounded::<Result<Vec<u8>, TransportError>>();
                let peer = MockPeer {
                    url: url.to_string(),
                    headers: headers.to_vec(),
                    inbound: server_rx,
                    outbound: server_tx,
                };
                match self.peers.send(peer) {
                    Ok(()) => {
                        let sink = client_tx
                            .sink_map_err(|e| TransportError::Send(e.to_string()));
                        Ok(Connection::new(Box::pin(sink), Box::pin(client_rx)))
                    }
                    Err(_) => Err(TransportError::Connect("mock broker gone".into())),
                }
            }
        };
        Box::pin(async move { result })
    }
}

/// The broker side of one mock session.
pub(crate) struct MockPeer {
    pub(crate) url: String,
    pub(crate) headers: Vec<(String, String)>,
    inbound: fmpsc::UnboundedReceiver<String>,
    outbound: fmpsc::UnboundedSender<Result<Vec<u8>, TransportError>>,
}

impl MockPeer {
    /// Next envelope the client wrote; panics if the client hung up or
    /// nothing arrives within a generous bound.
    pub(crate) async fn recv(&mut self) -> Envelope {
        let frame = tokio::time::timeout(Duration::from_secs(60), self.inbound.next())
            .await
            .expect("timed out waiting for client frame")
            .expect("client closed the session");
        decode(frame.as_bytes()).expect("client sent an undecodable frame")
    }

    /// Next envelope of `kind`, answering pings along the way.
    pub(crate) async fn recv_kind(&mut self, kind: EnvelopeKind) -> Envelope {
        loop {
            let envelope = self.recv().await;
            if envelope.kind == kind {
                return envelope;
            }
            if envelope.kind == EnvelopeKind::Ping {
                self.send(&Envelope::pong(envelope.nonce));
            }
        }
    }

    /// `None` once the client dropped its sink.
    pub(crate) async fn try_recv_closed(&mut self) -> Option<String> {
        self.inbound.next().await
    }

    pub(crate) fn send(&self, envelope: &Envelope) {
        let frame = encode(envelope).expect("encode");
        let _ = self.outbound.unbounded_send(Ok(frame.into_bytes()));
    }

    pub(crate) fn send_raw(&self, frame: &str) {
        let _ = self.outbound.unbounded_send(Ok(frame.as_bytes().to_vec()));
    }

    pub(crate) fn fail(&self, err: TransportError) {
        let _ = self.outbound.unbounded_send(Err(err));
    }

    /// Answer the whoami handshake with a connection id.
    pub(crate) async fn accept_handshake(&mut self, connection_id: &str) -> Envelope {
        let whoami = self.recv_kind(EnvelopeKind::Whoami).await;
        self.send(&Envelope::whoami(
            whoami.id.clone().expect("whoami id"),
            serde_json::json!({ "connectionID": connection_id }),
        ));
        whoami
    }

    /// Acknowledge the next subscribe and return its topic.
    pub(crate) async fn ack_subscribe(&mut self) -> String {
        let subscribe = self.recv_kind(EnvelopeKind::Subscribe).await;
        let topic = subscribe.topic.clone().expect("subscribe topic");
        self.send(
            &Envelope::new(EnvelopeKind::Subscribe)
                .with_id(subscribe.id.expect("subscribe id"))
                .with_topic(topic.clone()),
        );
        topic
    }

    pub(crate) async fn reject_subscribe(&mut self, code: &str, message: &str) -> String {
        let subscribe = self.recv_kind(EnvelopeKind::Subscribe).await;
        let topic = subscribe.topic.clone().expect("subscribe topic");
        self.send(
            &Envelope::error(subscribe.id, ErrorBody::new(code, message)).with_topic(topic.clone()),
        );
        topic
    }

    pub(crate) fn publish(&self, topic: &str, payload: Value) {
        self.send(&Envelope::publish(topic, payload));
    }

    /// End the session from the broker side.
    pub(crate) fn close(self) {
        drop(self);
    }
}
