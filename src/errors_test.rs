use std::time::Duration;

use crate::ConnectionError;
use crate::DecodeError;
use crate::Error;
use crate::TransportError;

#[test]
fn connection_errors_are_retryable() {
    let e: Error = ConnectionError::StartFailed("refused".to_string()).into();
    assert!(e.is_retryable());

    let e: Error = ConnectionError::Timeout(Duration::from_millis(10)).into();
    assert!(e.is_retryable());

    let e: Error = TransportError::NotConnected.into();
    assert!(e.is_retryable());
}

#[test]
fn decode_and_config_errors_are_not_retryable() {
    let e: Error = DecodeError::UnknownOp("z".to_string()).into();
    assert!(!e.is_retryable());

    let e = Error::InvalidConfig("poll interval".to_string());
    assert!(!e.is_retryable());
}

#[test]
fn json_errors_convert_into_decode_errors() {
    let parse = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
    let e: Error = parse.into();
    assert!(matches!(e, Error::Decode(DecodeError::Json(_))));
}

#[test]
fn display_messages_carry_context() {
    let e: Error = TransportError::ReloadFailed {
        channel: "trending".to_string(),
        reason: "boom".to_string(),
    }
    .into();
    assert_eq!(e.to_string(), "Reload for channel trending failed: boom");
}
