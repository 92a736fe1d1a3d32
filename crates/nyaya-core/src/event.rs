use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::types::ResearchResult;
use crate::wire;

/// Message shown when the ceiling fires during a streaming run.
pub const STREAM_TIMEOUT_MESSAGE: &str = "Request timeout after 5 minutes";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Initialisation and query-processing messages.
    Status,
    /// A research step (tool call, sub-agent) finished or started.
    Progress,
    /// Partial answer text.
    Content,
    /// A single streamed fragment of model output.
    Token,
    /// Final result; closes the stream.
    Complete,
    /// Fault or timeout; closes the stream.
    Error,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Progress => "progress",
            Self::Content => "content",
            Self::Token => "token",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }

    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "status" => Self::Status,
            "progress" => Self::Progress,
            "content" => Self::Content,
            "token" => Self::Token,
            "complete" => Self::Complete,
            "error" => Self::Error,
            _ => return None,
        })
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventParseError {
    #[error("event is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("event is not a JSON object")]
    NotAnObject,
    #[error("event has no \"type\" field")]
    MissingType,
    #[error("unknown event type {0:?}")]
    UnknownType(String),
}

/// One incremental message of a streaming run.
///
/// The payload is free-form; on the wire `type` is always the first key,
/// followed by the payload fields in insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    kind: EventKind,
    fields: Map<String, Value>,
}

impl ProgressEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            fields: Map::new(),
        }
    }

    /// Add a payload field. `type` is reserved and ignored.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if key != "type" {
            self.fields.insert(key, value.into());
        }
        self
    }

    pub fn status(content: impl Into<String>) -> Self {
        Self::new(EventKind::Status).with("content", content.into())
    }

    pub fn progress(node: impl Into<String>, content: impl Into<Value>) -> Self {
        Self::new(EventKind::Progress)
            .with("node", node.into())
            .with("content", content)
    }

    pub fn content(text: impl Into<String>) -> Self {
        Self::new(EventKind::Content).with("content", text.into())
    }

    pub fn token(fragment: impl Into<String>) -> Self {
        Self::new(EventKind::Token).with("content", fragment.into())
    }

    /// Terminal event carrying the aggregate document of the final result.
    pub fn complete(result: &ResearchResult) -> Self {
        Self::new(EventKind::Complete).with("data", result.to_value())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(EventKind::Error).with("data", message.into())
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::with_capacity(self.fields.len() + 1);
        map.insert("type".into(), Value::from(self.kind.as_str()));
        for (k, v) in &self.fields {
            map.insert(k.clone(), v.clone());
        }
        Value::Object(map)
    }

    /// Wire text of the event (the part after `data: ` in an SSE frame).
    pub fn to_json(&self) -> String {
        wire::to_string(&self.to_value())
    }
}

impl Serialize for ProgressEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl TryFrom<Value> for ProgressEvent {
    type Error = EventParseError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let Value::Object(mut fields) = value else {
            return Err(EventParseError::NotAnObject);
        };
        let kind = match fields.remove("type") {
            Some(Value::String(s)) => {
                EventKind::parse(&s).ok_or(EventParseError::UnknownType(s))?
            }
            _ => return Err(EventParseError::MissingType),
        };
        Ok(Self { kind, fields })
    }
}

impl FromStr for ProgressEvent {
    type Err = EventParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: Value = serde_json::from_str(s)?;
        Self::try_from(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn type_is_first_key() {
        let ev = ProgressEvent::progress("case-law-researcher", "done");
        assert_eq!(
            ev.to_json(),
            r#"{"type": "progress", "node": "case-law-researcher", "content": "done"}"#
        );
    }

    #[test]
    fn type_field_cannot_be_overridden() {
        let ev = ProgressEvent::status("x").with("type", "complete");
        assert_eq!(ev.kind(), EventKind::Status);
        assert_eq!(ev.to_value()["type"], "status");
    }

    #[test]
    fn error_event_carries_message_under_data() {
        let ev = ProgressEvent::error(STREAM_TIMEOUT_MESSAGE);
        assert_eq!(
            ev.to_value(),
            json!({"type": "error", "data": "Request timeout after 5 minutes"})
        );
        assert!(ev.kind().is_terminal());
    }

    #[test]
    fn complete_embeds_result_document() {
        let ev = ProgressEvent::complete(&ResearchResult::Empty);
        assert_eq!(ev.get("data").unwrap()["error"], "No response generated");
    }

    #[test]
    fn parse_from_wire_text() {
        let ev: ProgressEvent = r#"{"type": "token", "content": "Sec"}"#.parse().unwrap();
        assert_eq!(ev, ProgressEvent::token("Sec"));
    }

    #[test]
    fn parse_rejects_unknown_or_missing_type() {
        assert!(matches!(
            "{\"type\":\"node_completed\"}".parse::<ProgressEvent>(),
            Err(EventParseError::UnknownType(t)) if t == "node_completed"
        ));
        assert!(matches!(
            "{\"content\":\"x\"}".parse::<ProgressEvent>(),
            Err(EventParseError::MissingType)
        ));
        assert!(matches!(
            "[1]".parse::<ProgressEvent>(),
            Err(EventParseError::NotAnObject)
        ));
    }
}
