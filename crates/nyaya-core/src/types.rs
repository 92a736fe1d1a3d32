use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::run::RunState;
use crate::wire;

/// Details string of the aggregate timeout document.
pub const TIMEOUT_DETAILS: &str = "Research took longer than 5 minutes";
/// Details string used whenever a run finishes without any output.
pub const EMPTY_DETAILS: &str = "Agent completed but produced no output";

// ── Request ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResearchMode {
    /// Optimal, concise research response.
    #[default]
    Normal,
    /// Comprehensive, extensive analysis.
    Detailed,
}

impl ResearchMode {
    pub const ALL: [ResearchMode; 2] = [ResearchMode::Normal, ResearchMode::Detailed];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Detailed => "detailed",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Normal => "Optimal, concise research response",
            Self::Detailed => "Comprehensive, extensive analysis",
        }
    }
}

impl fmt::Display for ResearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResearchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Self::Normal),
            "detailed" => Ok(Self::Detailed),
            other => Err(format!("unknown research mode {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("Query cannot be empty")]
    EmptyQuery,
}

/// A validated research request. Fields are private so an accepted request
/// cannot be altered on its way to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResearchRequest {
    query: String,
    mode: ResearchMode,
}

impl ResearchRequest {
    pub fn new(query: impl Into<String>, mode: ResearchMode) -> Result<Self, RequestError> {
        let query = query.into();
        if query.trim().is_empty() {
            return Err(RequestError::EmptyQuery);
        }
        Ok(Self { query, mode })
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn mode(&self) -> ResearchMode {
        self.mode
    }
}

// ── Research payload ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceKind {
    Case,
    Statute,
    Article,
    Regulation,
    Report,
}

/// A cited source, keyed by reference id in [`ResearchPayload::references`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub title: String,
    #[serde(default)]
    pub url: String,
    /// Author, bench or legislature.
    #[serde(default)]
    pub authors: String,
    #[serde(default)]
    pub year: Option<i64>,
    #[serde(rename = "type")]
    pub kind: ReferenceKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentSegment {
    pub text: String,
    #[serde(default)]
    pub refs: Vec<String>,
}

/// Typed view of a successful research answer.
///
/// The engine produces the payload; the core only checks JSON
/// well-formedness and uses this view for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchPayload {
    pub content: Vec<ContentSegment>,
    #[serde(default)]
    pub references: BTreeMap<String, Reference>,
}

impl ResearchPayload {
    /// Returns `None` when the value does not follow the content/references shape.
    pub fn from_value(value: &Value) -> Option<Self> {
        Self::deserialize(value).ok()
    }

    /// Reference ids cited in `content` with no entry in `references`,
    /// in first-seen order without duplicates.
    pub fn unresolved_refs(&self) -> Vec<&str> {
        let mut missing: Vec<&str> = Vec::new();
        for id in self.content.iter().flat_map(|c| c.refs.iter()) {
            if !self.references.contains_key(id) && !missing.contains(&id.as_str()) {
                missing.push(id);
            }
        }
        missing
    }
}

// ── Terminal outcome ─────────────────────────────────────────────────────

/// The single terminal outcome of one research run.
#[derive(Debug, Clone, PartialEq)]
pub enum ResearchResult {
    /// The engine answered with well-formed JSON.
    Success(Value),
    /// The engine raised a fault.
    Failure { reason: String },
    /// The engine answered with text that is not JSON.
    Invalid { raw_text: String },
    /// The engine finished without output (no item, or an empty string).
    Empty,
    /// The ceiling elapsed before the engine finished.
    TimedOut,
}

impl ResearchResult {
    /// Classify the engine's final text.
    pub fn from_output(text: String) -> Self {
        if text.is_empty() {
            return Self::Empty;
        }
        match serde_json::from_str::<Value>(&text) {
            Ok(value) => Self::Success(value),
            Err(_) => Self::Invalid { raw_text: text },
        }
    }

    pub fn state(&self) -> RunState {
        match self {
            Self::Success(_) => RunState::Completed,
            Self::Failure { .. } => RunState::Failed,
            Self::Invalid { .. } => RunState::InvalidOutput,
            Self::Empty => RunState::Empty,
            Self::TimedOut => RunState::TimedOut,
        }
    }

    /// The JSON document the aggregate endpoint delivers for this outcome.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Success(payload) => payload.clone(),
            Self::Failure { reason } => json!({
                "error": "Research execution failed",
                "details": reason,
            }),
            Self::Invalid { raw_text } => json!({
                "error": "Invalid JSON response",
                "raw_response": raw_text,
            }),
            Self::Empty => json!({
                "error": "No response generated",
                "details": EMPTY_DETAILS,
            }),
            Self::TimedOut => json!({
                "error": "Request timeout",
                "details": TIMEOUT_DETAILS,
            }),
        }
    }

    /// Serialized aggregate body: answers are pretty-printed, error
    /// documents are single-line. Always newline-terminated.
    pub fn to_document(&self) -> String {
        let mut body = match self {
            Self::Success(payload) => wire::to_pretty_string(payload),
            other => wire::to_string(&other.to_value()),
        };
        body.push('\n');
        body
    }
}
