use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::DecodeError;

/// Opaque, shape-varying payload of a channel row
pub type Record = Map<String, Value>;

/// Raw JSON frame as delivered by a transport, before decoding
pub type RawFrame = Value;

/// Operation tag of a change event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Op {
    #[serde(rename = "i", alias = "insert")]
    Insert,
    #[serde(rename = "u", alias = "update")]
    Update,
    #[serde(rename = "d", alias = "delete")]
    Delete,
    #[serde(rename = "x", alias = "control")]
    Control,
    /// Row of a reload snapshot, never a live operation
    #[serde(rename = "r", alias = "reload")]
    Reload,
}

impl fmt::Display for Op {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let tag = match self {
            Op::Insert => "i",
            Op::Update => "u",
            Op::Delete => "d",
            Op::Control => "x",
            Op::Reload => "r",
        };
        f.write_str(tag)
    }
}

/// Kind carried by a control event
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ControlKind {
    /// Upstream query was torn down or invalidated; drop every row
    Cleared,
    Other(String),
}

impl From<&str> for ControlKind {
    fn from(kind: &str) -> Self {
        match kind {
            "cleared" => ControlKind::Cleared,
            other => ControlKind::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ControlKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            ControlKind::Cleared => f.write_str("cleared"),
            ControlKind::Other(kind) => f.write_str(kind),
        }
    }
}

/// One insert/update/delete/control operation on a channel's data
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub op: Op,
    pub before: Option<Record>,
    pub after: Option<Record>,
    pub control: Option<ControlKind>,
}

#[derive(Deserialize)]
struct WireEvent {
    op: Value,
    #[serde(default)]
    payload: Option<WirePayload>,
    #[serde(flatten)]
    flat: WirePayload,
}

#[derive(Deserialize, Default)]
struct WirePayload {
    #[serde(default)]
    before: Option<Record>,
    #[serde(default)]
    after: Option<Record>,
    #[serde(default)]
    kind: Option<String>,
}

impl ChangeEvent {
    pub fn insert(after: Record) -> Self {
        Self {
            op: Op::Insert,
            before: None,
            after: Some(after),
            control: None,
        }
    }

    pub fn update(
        before: Record,
        after: Record,
    ) -> Self {
        Self {
            op: Op::Update,
            before: Some(before),
            after: Some(after),
            control: None,
        }
    }

    pub fn delete(before: Record) -> Self {
        Self {
            op: Op::Delete,
            before: Some(before),
            after: None,
            control: None,
        }
    }

    pub fn control(kind: ControlKind) -> Self {
        Self {
            op: Op::Control,
            before: None,
            after: None,
            control: Some(kind),
        }
    }

    pub fn reload(after: Record) -> Self {
        Self {
            op: Op::Reload,
            before: None,
            after: Some(after),
            control: None,
        }
    }

    /// Decodes a raw transport frame.
    ///
    /// Accepts the nested form (`{op, payload: {before, after, kind}}`), the
    /// flat form (`{op, before, after, kind}`) and either of them wrapped in a
    /// JSON string.
    pub fn from_frame(frame: RawFrame) -> std::result::Result<Self, DecodeError> {
        let frame = match frame {
            Value::String(text) => serde_json::from_str::<Value>(&text)?,
            other => other,
        };
        if !frame.is_object() {
            return Err(DecodeError::Malformed(format!("expected a JSON object, got {}", frame)));
        }

        let wire: WireEvent = serde_json::from_value(frame)?;
        let op = parse_op(&wire.op)?;
        let payload = wire.payload.unwrap_or(wire.flat);

        let control = match op {
            Op::Control => Some(ControlKind::from(payload.kind.as_deref().unwrap_or_default())),
            _ => None,
        };

        Ok(Self {
            op,
            before: payload.before,
            after: payload.after,
            control,
        })
    }

    /// Encodes the event in the nested wire form
    pub fn to_frame(&self) -> RawFrame {
        let mut payload = Map::new();
        if let Some(before) = &self.before {
            payload.insert("before".to_string(), Value::Object(before.clone()));
        }
        if let Some(after) = &self.after {
            payload.insert("after".to_string(), Value::Object(after.clone()));
        }
        if let Some(kind) = &self.control {
            payload.insert("kind".to_string(), Value::String(kind.to_string()));
        }
        serde_json::json!({
            "op": self.op.to_string(),
            "payload": payload,
        })
    }

    pub fn is_cleared(&self) -> bool {
        self.op == Op::Control && self.control == Some(ControlKind::Cleared)
    }
}

fn parse_op(raw: &Value) -> std::result::Result<Op, DecodeError> {
    let tag = raw
        .as_str()
        .ok_or_else(|| DecodeError::Malformed(format!("op must be a string, got {}", raw)))?;
    serde_json::from_value::<Op>(Value::String(tag.to_string()))
        .map_err(|_| DecodeError::UnknownOp(tag.to_string()))
}
