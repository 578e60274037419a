//! WebSocket transport
//!
//! The connection supervisor only needs four capabilities from the network:
//! open a session, send a frame, receive frames, and close. `Transport`
//! captures the first; the `Connection` it yields is an already split
//! sink/stream pair so the writer and reader tasks can own one half each.

use std::pin::Pin;

use futures::future::{self, BoxFuture};
use futures::{Sink, Stream};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tracing::debug;
use tungstenite::client::IntoClientRequest;
use tungstenite::http::{HeaderName, HeaderValue};
use tungstenite::protocol::Message as WsMessage;

use crate::utils::error::TransportError;

/// Outbound half: accepts the text of encoded envelopes.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Inbound half: yields raw frame bytes until the peer closes.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, TransportError>> + Send>>;

/// A freshly opened transport session.
pub struct Connection {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Connection {
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }
}

/// Opens transport sessions. A new session is opened for every connection
/// attempt; nothing is reused across reconnects.
pub trait Transport: Send + Sync + 'static {
    fn open(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> BoxFuture<'static, Result<Connection, TransportError>>;
}

/// `Transport` backed by tokio-tungstenite.
#[derive(Debug, Default, Clone)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for WebSocketTransport {
    fn open(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> BoxFuture<'static, Result<Connection, TransportError>> {
        let request = build_request(url, headers);

        Box::pin(async move {
            let request = request?;
            let (ws_stream, _response) = connect_async(request)
                .await
                .map_err(|e| TransportError::Connect(e.to_string()))?;

            let (ws_sender, ws_receiver) = ws_stream.split();

            let sink = ws_sender
                .with(|text: String| future::ready(Ok::<_, tungstenite::Error>(WsMessage::text(text))))
                .sink_map_err(|e| TransportError::Send(e.to_string()));

            let stream = ws_receiver.filter_map(|msg| {
                future::ready(match msg {
                    Ok(WsMessage::Text(text)) => Some(Ok(text.as_bytes().to_vec())),
                    Ok(WsMessage::Binary(data)) => Some(Ok(data.to_vec())),
                    Ok(WsMessage::Close(frame)) => {
                        debug!("Peer sent close frame: {:?}", frame);
                        Some(Err(TransportError::Closed(
                            frame
                                .map(|f| format!("{} {}", u16::from(f.code), f.reason.as_str()))
                                .unwrap_or_else(|| "no close frame".to_string()),
                        )))
                    }
                    // websocket level ping/pong is answered by tungstenite itself
                    Ok(_) => None,
                    Err(e) => Some(Err(TransportError::Receive(e.to_string()))),
                })
            });

            Ok(Connection::new(Box::pin(sink), Box::pin(stream)))
        })
    }
}

fn build_request(
    url: &str,
    headers: &[(String, String)],
) -> Result<tungstenite::handshake::client::Request, TransportError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| TransportError::Connect(format!("invalid url {url}: {e}")))?;

    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| TransportError::Connect(format!("invalid header name {name}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| TransportError::Connect(format!("invalid header value: {e}")))?;
        request.headers_mut().insert(name, value);
    }

    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_request_attaches_headers() {
        let headers = vec![(
            "Authorization".to_string(),
            "cc-auth-token abc".to_string(),
        )];
        let request = build_request("ws://127.0.0.1:9/", &headers).unwrap();
        assert_eq!(
            request.headers().get("authorization").unwrap(),
            "cc-auth-token abc"
        );
    }

    #[test]
    fn build_request_rejects_bad_urls() {
        let err = build_request("not a url", &[]).unwrap_err();
        assert!(matches!(err, TransportError::Connect(_)));
    }
}
