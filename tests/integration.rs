//! End to end tests against a minimal broker speaking the PubSub protocol
//! over a real WebSocket.

use std::time::Duration;

use ccpubsub::{
    Backoff, ClientConfig, ConnectError, ConnectionState, Credentials, PubSubClient, RequestError,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

const TOPIC: &str = "pub/ccuid-01j7cnrvpbh5aw45pwpe1vqvdw";

/// Start a broker on an ephemeral port and return its URL.
///
/// Each accepted connection gets the id `it-<n>`. Every acknowledged
/// subscribe is followed by one publish naming the connection, and an RPC
/// with `{"kick": true}` makes the broker hang up.
async fn spawn_broker() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut accepted = 0u32;
        while let Ok((stream, _)) = listener.accept().await {
            accepted += 1;
            tokio::spawn(serve(stream, format!("it-{accepted}")));
        }
    });

    format!("ws://{addr}/")
}

async fn serve(stream: TcpStream, connection_id: String) {
    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (mut tx, mut rx) = ws.split();

    while let Some(Ok(message)) = rx.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let request: Value = serde_json::from_str(text.as_str()).unwrap();
        let id = request["id"].clone();

        let replies = match request["type"].as_str() {
            Some("whoami") => vec![json!({
                "type": "whoami",
                "id": id,
                "payload": { "connectionID": connection_id },
            })],
            Some("subscribe") => vec![
                json!({ "type": "subscribe", "id": id, "topic": request["topic"] }),
                json!({
                    "type": "publish",
                    "topic": request["topic"],
                    "payload": { "connection": connection_id },
                }),
            ],
            Some("rpc-request") if request["payload"]["kick"] == true => {
                let _ = tx.close().await;
                return;
            }
            Some("rpc-request") => vec![json!({
                "type": "rpc-response",
                "id": id,
                "payload": { "echo": request["payload"] },
            })],
            Some("ping") => vec![json!({ "type": "pong", "nonce": request["nonce"] })],
            _ => Vec::new(),
        };

        for reply in replies {
            if tx.send(Message::text(reply.to_string())).await.is_err() {
                return;
            }
        }
    }
}

fn config(url: &str) -> ClientConfig {
    ClientConfig::new(url)
        .with_backoff(Backoff {
            base: Duration::from_millis(50),
            multiplier: 2.0,
            max: Duration::from_millis(200),
            jitter: Duration::ZERO,
            max_attempts: None,
        })
        .with_request_timeout(Duration::from_secs(5))
}

async fn next_payload(payloads: &mut mpsc::UnboundedReceiver<Value>) -> Value {
    tokio::time::timeout(Duration::from_secs(10), payloads.recv())
        .await
        .expect("timed out waiting for a publish")
        .expect("handler dropped")
}

#[tokio::test]
async fn subscribe_publish_and_request_end_to_end() {
    let url = spawn_broker().await;
    let client = PubSubClient::new(config(&url));

    let ready = client
        .connect(Credentials::token("opaque-token"))
        .await
        .expect("connect");
    assert_eq!(ready.connection_id.as_deref(), Some("it-1"));
    assert_eq!(client.state(), ConnectionState::Ready);

    let (tx, mut payloads) = mpsc::unbounded_channel();
    let handle = client
        .subscribe_and_wait(TOPIC, move |payload: &Value| {
            let _ = tx.send(payload.clone());
        })
        .await
        .expect("subscribe");
    assert_eq!(next_payload(&mut payloads).await, json!({ "connection": "it-1" }));

    let echoed = client.request(json!({ "q": 1 }), None).await;
    assert_eq!(echoed, Ok(json!({ "echo": { "q": 1 } })));

    client.unsubscribe(&handle);
    assert_eq!(client.subscription_state(TOPIC), None);

    client.disconnect().await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(
        client.request(json!({}), None).await,
        Err(RequestError::NotConnected)
    );
}

#[tokio::test]
async fn reconnects_and_resubscribes_after_broker_hangs_up() {
    let url = spawn_broker().await;
    let client = PubSubClient::new(config(&url));
    client.connect(Credentials::anonymous()).await.expect("connect");

    let (tx, mut payloads) = mpsc::unbounded_channel();
    client
        .subscribe_and_wait(TOPIC, move |payload: &Value| {
            let _ = tx.send(payload.clone());
        })
        .await
        .expect("subscribe");
    assert_eq!(next_payload(&mut payloads).await, json!({ "connection": "it-1" }));

    let kicked = client.request(json!({ "kick": true }), None).await;
    assert!(
        matches!(kicked, Err(RequestError::ConnectionLost(_))),
        "unexpected outcome {kicked:?}"
    );

    // the resubscribe on the new connection triggers another publish
    assert_eq!(next_payload(&mut payloads).await, json!({ "connection": "it-2" }));

    let mut states = client.state_receiver();
    tokio::time::timeout(
        Duration::from_secs(10),
        states.wait_for(|state| *state == ConnectionState::Ready),
    )
    .await
    .expect("timed out waiting for Ready")
    .expect("state channel closed");

    let echoed = client.request(json!("after"), None).await;
    assert_eq!(echoed, Ok(json!({ "echo": "after" })));

    client.disconnect().await;
}

#[tokio::test]
async fn gives_up_when_nothing_listens() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config = config(&format!("ws://{addr}/"));
    config.backoff.max_attempts = Some(2);
    let client = PubSubClient::new(config);

    match client.connect(Credentials::anonymous()).await {
        Err(ConnectError::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 2),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(client.state(), ConnectionState::Disconnected);
}
