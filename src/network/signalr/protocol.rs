//! JSON hub protocol framing
//!
//! Every message is a JSON object terminated by the ASCII record separator.
//! A single WebSocket text message may carry several of them.

use serde::Deserialize;
use serde_json::json;
use serde_json::Value;

use crate::TransportError;

pub const RECORD_SEPARATOR: char = '\u{1e}';

const INVOCATION: u8 = 1;
const STREAM_ITEM: u8 = 2;
const COMPLETION: u8 = 3;
const STREAM_INVOCATION: u8 = 4;
const CANCEL_INVOCATION: u8 = 5;
const PING: u8 = 6;
const CLOSE: u8 = 7;

#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    /// Server pushes `arguments` to the handler named `target`
    Invocation { target: String, arguments: Vec<Value> },
    StreamItem { invocation_id: String, item: Value },
    Completion { invocation_id: String, error: Option<String> },
    StreamInvocation {
        invocation_id: String,
        target: String,
        arguments: Vec<Value>,
    },
    CancelInvocation { invocation_id: String },
    Ping,
    Close { error: Option<String>, allow_reconnect: bool },
    /// Message types this client does not handle
    Other(u8),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    invocation_id: Option<String>,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    arguments: Vec<Value>,
    #[serde(default)]
    item: Option<Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    allow_reconnect: bool,
}

impl HubMessage {
    pub fn parse(frame: &str) -> Result<Self, TransportError> {
        let wire: WireMessage = serde_json::from_str(frame)
            .map_err(|e| TransportError::Protocol(format!("unparsable hub message: {}", e)))?;

        let message = match wire.kind {
            INVOCATION => HubMessage::Invocation {
                target: required(wire.target, "target")?,
                arguments: wire.arguments,
            },
            STREAM_ITEM => HubMessage::StreamItem {
                invocation_id: required(wire.invocation_id, "invocationId")?,
                item: wire.item.unwrap_or(Value::Null),
            },
            COMPLETION => HubMessage::Completion {
                invocation_id: required(wire.invocation_id, "invocationId")?,
                error: wire.error,
            },
            STREAM_INVOCATION => HubMessage::StreamInvocation {
                invocation_id: required(wire.invocation_id, "invocationId")?,
                target: required(wire.target, "target")?,
                arguments: wire.arguments,
            },
            CANCEL_INVOCATION => HubMessage::CancelInvocation {
                invocation_id: required(wire.invocation_id, "invocationId")?,
            },
            PING => HubMessage::Ping,
            CLOSE => HubMessage::Close {
                error: wire.error,
                allow_reconnect: wire.allow_reconnect,
            },
            other => HubMessage::Other(other),
        };
        Ok(message)
    }

    /// Serializes the message, record separator included
    pub fn encode(&self) -> String {
        let body = match self {
            HubMessage::Invocation { target, arguments } => {
                json!({"type": INVOCATION, "target": target, "arguments": arguments})
            }
            HubMessage::StreamItem { invocation_id, item } => {
                json!({"type": STREAM_ITEM, "invocationId": invocation_id, "item": item})
            }
            HubMessage::Completion { invocation_id, error } => match error {
                Some(error) => json!({"type": COMPLETION, "invocationId": invocation_id, "error": error}),
                None => json!({"type": COMPLETION, "invocationId": invocation_id}),
            },
            HubMessage::StreamInvocation {
                invocation_id,
                target,
                arguments,
            } => json!({
                "type": STREAM_INVOCATION,
                "invocationId": invocation_id,
                "target": target,
                "arguments": arguments,
            }),
            HubMessage::CancelInvocation { invocation_id } => {
                json!({"type": CANCEL_INVOCATION, "invocationId": invocation_id})
            }
            HubMessage::Ping => json!({"type": PING}),
            HubMessage::Close { error, allow_reconnect } => match error {
                Some(error) => json!({"type": CLOSE, "error": error, "allowReconnect": allow_reconnect}),
                None => json!({"type": CLOSE, "allowReconnect": allow_reconnect}),
            },
            HubMessage::Other(kind) => json!({ "type": kind }),
        };
        let mut out = body.to_string();
        out.push(RECORD_SEPARATOR);
        out
    }
}

fn required(
    field: Option<String>,
    name: &str,
) -> Result<String, TransportError> {
    field.ok_or_else(|| TransportError::Protocol(format!("hub message is missing {}", name)))
}

/// Non-empty frames of a text message
pub fn split_frames(text: &str) -> impl Iterator<Item = &str> {
    text.split(RECORD_SEPARATOR).filter(|frame| !frame.trim().is_empty())
}

pub fn handshake_request() -> String {
    let mut out = json!({"protocol": "json", "version": 1}).to_string();
    out.push(RECORD_SEPARATOR);
    out
}

/// Checks the handshake response at the head of `text` and returns whatever
/// follows it in the same message.
pub fn parse_handshake(text: &str) -> Result<&str, TransportError> {
    let (head, rest) = text
        .split_once(RECORD_SEPARATOR)
        .ok_or_else(|| TransportError::Handshake("response is not terminated".to_string()))?;

    let response: Value =
        serde_json::from_str(head).map_err(|e| TransportError::Handshake(format!("unparsable response: {}", e)))?;
    let object = response
        .as_object()
        .ok_or_else(|| TransportError::Handshake(format!("unexpected response: {}", head)))?;

    if let Some(error) = object.get("error") {
        let reason = error.as_str().map(str::to_string).unwrap_or_else(|| error.to_string());
        return Err(TransportError::Handshake(reason));
    }
    Ok(rest)
}
