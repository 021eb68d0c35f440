use serde_json::json;

use super::protocol::*;
use crate::TransportError;

#[test]
fn test_handshake_request_is_terminated() {
    let request = handshake_request();
    assert!(request.ends_with(RECORD_SEPARATOR));
    let body: serde_json::Value = serde_json::from_str(request.trim_end_matches(RECORD_SEPARATOR)).unwrap();
    assert_eq!(body, json!({"protocol": "json", "version": 1}));
}

#[test]
fn test_parse_handshake_returns_trailing_frames() {
    let text = "{}\u{1e}{\"type\":6}\u{1e}";
    let rest = parse_handshake(text).unwrap();
    let frames: Vec<_> = split_frames(rest).collect();
    assert_eq!(frames, vec!["{\"type\":6}"]);
}

#[test]
fn test_parse_handshake_rejects_error_response() {
    let err = parse_handshake("{\"error\":\"Requested protocol 'json' is not available.\"}\u{1e}").unwrap_err();
    assert!(matches!(err, TransportError::Handshake(reason) if reason.contains("not available")));
}

#[test]
fn test_parse_handshake_requires_separator() {
    assert!(matches!(parse_handshake("{}"), Err(TransportError::Handshake(_))));
}

#[test]
fn test_split_frames_skips_empty_segments() {
    let text = "{\"type\":6}\u{1e}\u{1e}{\"type\":7}\u{1e}";
    assert_eq!(split_frames(text).count(), 2);
}

#[test]
fn test_parse_invocation() {
    let frame = r#"{"type":1,"target":"wishlist-trending-1h","arguments":[{"op":"i","payload":{"after":{"item":"Kite"}}}]}"#;
    match HubMessage::parse(frame).unwrap() {
        HubMessage::Invocation { target, arguments } => {
            assert_eq!(target, "wishlist-trending-1h");
            assert_eq!(arguments[0]["op"], "i");
        }
        other => panic!("unexpected message: {:?}", other),
    }
}

#[test]
fn test_parse_stream_item_and_completion() {
    let item = HubMessage::parse(r#"{"type":2,"invocationId":"a1","item":{"op":"r"}}"#).unwrap();
    assert_eq!(
        item,
        HubMessage::StreamItem {
            invocation_id: "a1".to_string(),
            item: json!({"op": "r"}),
        }
    );

    let done = HubMessage::parse(r#"{"type":3,"invocationId":"a1","error":"boom"}"#).unwrap();
    assert_eq!(
        done,
        HubMessage::Completion {
            invocation_id: "a1".to_string(),
            error: Some("boom".to_string()),
        }
    );
}

#[test]
fn test_parse_close_defaults_to_no_reconnect() {
    assert_eq!(
        HubMessage::parse(r#"{"type":7}"#).unwrap(),
        HubMessage::Close {
            error: None,
            allow_reconnect: false
        }
    );
}

#[test]
fn test_parse_unknown_type_is_tolerated() {
    assert_eq!(HubMessage::parse(r#"{"type":8,"sequenceId":1}"#).unwrap(), HubMessage::Other(8));
}

#[test]
fn test_parse_rejects_missing_fields() {
    assert!(matches!(
        HubMessage::parse(r#"{"type":2,"item":{}}"#),
        Err(TransportError::Protocol(_))
    ));
    assert!(matches!(HubMessage::parse("not json"), Err(TransportError::Protocol(_))));
}

#[test]
fn test_encode_stream_invocation() {
    let message = HubMessage::StreamInvocation {
        invocation_id: "42".to_string(),
        target: "reload".to_string(),
        arguments: vec![json!("inactive-children")],
    };
    let encoded = message.encode();
    assert!(encoded.ends_with(RECORD_SEPARATOR));
    assert_eq!(HubMessage::parse(encoded.trim_end_matches(RECORD_SEPARATOR)).unwrap(), message);
}
