use nyaya_core::ProgressEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single NDJSON message emitted by the Claude CLI (`--output-format stream-json`).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// First message on stream: session initialisation.
    System(SystemEvent),

    /// An assistant turn (text or tool calls).
    Assistant(AssistantEvent),

    /// A user turn (tool results injected back into the conversation).
    User(UserEvent),

    /// Final result message, emitted once at the very end.
    Result(ResultEvent),

    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SystemEvent {
    pub subtype: Option<String>,
    pub session_id: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssistantEvent {
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserEvent {
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Message {
    pub role: Option<String>,
    pub content: Option<Vec<ContentBlock>>,
}

/// A single content block inside an assistant or user message.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },

    ToolUse {
        id: String,
        name: String,
        input: Value,
    },

    ToolResult {
        tool_use_id: String,
        content: Option<Value>,
        is_error: Option<bool>,
    },

    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResultEvent {
    pub subtype: Option<String>,
    /// Textual output (may be empty if the last turn was a tool call).
    pub result: Option<String>,
    pub session_id: Option<String>,
    pub is_error: Option<bool>,
    #[serde(default, deserialize_with = "counter")]
    pub duration_ms: Option<u64>,
    #[serde(default, deserialize_with = "counter")]
    pub num_turns: Option<u64>,
}

/// Tagged enums buffer their fields, so exact-precision numbers arrive
/// wrapped; going through `Value` unwraps them.
fn counter<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(Value::as_u64))
}

impl AgentEvent {
    /// Progress events a client should see for this message.
    pub fn to_progress(&self) -> Vec<ProgressEvent> {
        match self {
            AgentEvent::System(e) if e.subtype.as_deref() == Some("init") => {
                vec![ProgressEvent::status("Research session started")]
            }
            AgentEvent::Assistant(e) => blocks(&e.message)
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text } if !text.trim().is_empty() => {
                        Some(ProgressEvent::content(text.as_str()))
                    }
                    ContentBlock::ToolUse { name, input, .. } => Some(tool_progress(name, input)),
                    _ => None,
                })
                .collect(),
            AgentEvent::User(e) => blocks(&e.message)
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::ToolResult {
                        is_error: Some(true),
                        ..
                    } => Some(ProgressEvent::status("A research tool call failed; continuing")),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

fn blocks(message: &Option<Message>) -> &[ContentBlock] {
    message
        .as_ref()
        .and_then(|m| m.content.as_deref())
        .unwrap_or(&[])
}

/// Delegations are reported under the sub-agent's name, other tools under
/// their own, with the most telling input field as detail.
fn tool_progress(name: &str, input: &Value) -> ProgressEvent {
    let field = |key: &str| input.get(key).and_then(Value::as_str);
    if name == "Task" {
        let node = field("subagent_type").unwrap_or("sub-agent");
        let detail = field("description").unwrap_or("Delegated research");
        return ProgressEvent::progress(node, detail);
    }
    let detail = field("query")
        .or_else(|| field("url"))
        .or_else(|| field("description"))
        .unwrap_or("");
    ProgressEvent::progress(name, detail)
}

/// What a finished stream produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamOutcome {
    pub output: String,
    pub session_id: Option<String>,
    /// The CLI flagged its result as an error.
    pub is_error: bool,
    pub num_turns: Option<u64>,
}

/// Incremental NDJSON reader: feed lines as they arrive, then `finish`.
#[derive(Debug, Default)]
pub struct StreamCollector {
    outcome: StreamOutcome,
    assistant_text: String,
    saw_result: bool,
}

impl StreamCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one line. Blank and unparseable lines yield `None`.
    pub fn feed(&mut self, line: &str) -> Option<AgentEvent> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let event: AgentEvent = serde_json::from_str(line).ok()?;
        match &event {
            AgentEvent::System(e) => {
                if let Some(sid) = &e.session_id {
                    self.outcome.session_id = Some(sid.clone());
                }
            }
            AgentEvent::Assistant(e) => {
                for block in blocks(&e.message) {
                    if let ContentBlock::Text { text } = block {
                        if !self.assistant_text.is_empty() {
                            self.assistant_text.push('\n');
                        }
                        self.assistant_text.push_str(text);
                    }
                }
            }
            AgentEvent::Result(e) => {
                self.saw_result = true;
                if let Some(sid) = &e.session_id {
                    self.outcome.session_id = Some(sid.clone());
                }
                if let Some(text) = &e.result {
                    self.outcome.output = text.clone();
                }
                self.outcome.is_error = e.is_error.unwrap_or(false);
                self.outcome.num_turns = e.num_turns;
            }
            _ => {}
        }
        Some(event)
    }

    pub fn saw_result(&self) -> bool {
        self.saw_result
    }

    pub fn finish(mut self) -> StreamOutcome {
        // Fall back to collected assistant text if result was empty
        if self.outcome.output.is_empty() && !self.assistant_text.is_empty() {
            self.outcome.output = self.assistant_text;
        }
        self.outcome
    }
}

/// Parse a full NDJSON stream.
pub fn parse_stream(data: &str) -> StreamOutcome {
    let mut collector = StreamCollector::new();
    for line in data.lines() {
        collector.feed(line);
    }
    collector.finish()
}
