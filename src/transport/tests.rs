use serde_json::json;

use crate::transport::message::{Envelope, EnvelopeKind, ErrorBody, decode, encode};
use crate::utils::error::ProtocolError;

#[test]
fn test_encode_omits_absent_fields() {
    let frame = encode(&Envelope::unsubscribe("pub/test")).unwrap();
    let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(value, json!({ "type": "unsubscribe", "topic": "pub/test" }));
}

#[test]
fn test_encode_uses_kebab_case_types() {
    let frame = encode(&Envelope::rpc_request("abc", json!({ "x": 1 }))).unwrap();
    let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(value["type"], "rpc-request");
    assert_eq!(value["id"], "abc");
    assert_eq!(value["payload"], json!({ "x": 1 }));
}

#[test]
fn test_decode_publish() {
    let frame = br#"{"type":"publish","topic":"pub/test","payload":{"x":1}}"#;
    let envelope = decode(frame).unwrap();
    assert_eq!(envelope.kind, EnvelopeKind::Publish);
    assert_eq!(envelope.topic.as_deref(), Some("pub/test"));
    assert_eq!(envelope.payload, Some(json!({ "x": 1 })));
    assert!(envelope.id.is_none());
    assert!(envelope.nonce.is_none());
    assert!(envelope.error.is_none());
}

#[test]
fn test_decode_error_with_id() {
    let frame = br#"{"type":"error","id":"42","error":{"code":"forbidden","message":"no"}}"#;
    let envelope = decode(frame).unwrap();
    assert_eq!(envelope.kind, EnvelopeKind::Error);
    assert_eq!(envelope.id.as_deref(), Some("42"));
    assert_eq!(envelope.error, Some(ErrorBody::new("forbidden", "no")));
}

#[test]
fn test_decode_error_without_message() {
    let envelope = decode(br#"{"type":"error","error":{"code":"bad"}}"#).unwrap();
    assert_eq!(envelope.error, Some(ErrorBody::new("bad", "")));
}

#[test]
fn test_decode_ignores_unknown_fields() {
    let frame = br#"{"type":"pong","nonce":"n1","domain":"pub","extra":[1,2]}"#;
    let envelope = decode(frame).unwrap();
    assert_eq!(envelope, Envelope::pong(Some("n1".into())));
}

#[test]
fn test_decode_unknown_type() {
    let err = decode(br#"{"type":"teleport"}"#).unwrap_err();
    assert_eq!(err, ProtocolError::UnknownType("teleport".into()));
}

#[test]
fn test_decode_malformed_json() {
    assert!(matches!(decode(b"{not json"), Err(ProtocolError::Malformed(_))));
    assert!(matches!(decode(br#"{"id":"1"}"#), Err(ProtocolError::Malformed(_))));
    assert!(matches!(decode(&[0xff, 0xfe]), Err(ProtocolError::Malformed(_))));
}

#[test]
fn test_envelope_survives_the_wire() {
    let sent = Envelope::subscribe("7", "pub/ccuid-01j7cnrvpbh5aw45pwpe1vqvdw", json!({ "token": "t" }));
    let received = decode(encode(&sent).unwrap().as_bytes()).unwrap();
    assert_eq!(received, sent);
}

#[test]
fn test_kind_parses_from_str() {
    assert_eq!("rpc-response".parse::<EnvelopeKind>().unwrap(), EnvelopeKind::RpcResponse);
    assert_eq!(EnvelopeKind::Whoami.to_string(), "whoami");
}
