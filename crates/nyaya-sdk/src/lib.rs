//! Async client for the legal research HTTP API.
//!
//! ```no_run
//! # async fn demo() -> Result<(), nyaya_sdk::Error> {
//! use nyaya_sdk::{Client, ResearchMode};
//!
//! let client = Client::new("http://localhost:8000");
//! let mut events = client
//!     .research_stream("What is the age of majority in India?", ResearchMode::Normal)
//!     .await?;
//! while let Some(event) = events.next_event().await? {
//!     println!("{}", event.to_json());
//! }
//! # Ok(())
//! # }
//! ```

pub mod sse;

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub use nyaya_core::event::EventParseError;
pub use nyaya_core::{EventKind, ProgressEvent, ResearchMode, ResearchPayload};

use crate::sse::SseDecoder;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    /// The server rejected the request (`{"detail": ...}` body).
    #[error("server returned {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid event: {0}")]
    Event(#[from] EventParseError),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Parsed body of `POST /research`.
#[derive(Debug, Clone, PartialEq)]
pub enum ResearchResponse {
    Answer(ResearchPayload),
    /// An error document: timeout, engine fault, invalid or empty output,
    /// or the engine declining an off-topic query.
    Error {
        error: String,
        details: Option<String>,
        raw_response: Option<String>,
        suggestion: Option<String>,
    },
    /// A JSON answer that does not follow the content/references shape.
    Other(Value),
}

impl ResearchResponse {
    pub fn from_value(value: Value) -> Self {
        let text = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);
        if let Some(error) = text("error") {
            return Self::Error {
                error,
                details: text("details"),
                raw_response: text("raw_response"),
                suggestion: text("suggestion"),
            };
        }
        match ResearchPayload::from_value(&value) {
            Some(payload) => Self::Answer(payload),
            None => Self::Other(value),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Client {
    base_url: String,
    http: reqwest::Client,
}

impl Client {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, reqwest::Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub async fn health(&self) -> Result<Health> {
        let resp = check(self.http.get(self.url("/health")).send().await?).await?;
        Ok(resp.json().await?)
    }

    pub async fn research(&self, query: &str, mode: ResearchMode) -> Result<ResearchResponse> {
        let resp = self.post("/research", query, mode).await?;
        let value: Value = serde_json::from_slice(&resp.bytes().await?)?;
        Ok(ResearchResponse::from_value(value))
    }

    /// Open the event stream. Read it with [`EventStream::next_event`].
    pub async fn research_stream(&self, query: &str, mode: ResearchMode) -> Result<EventStream> {
        let resp = self.post("/research/stream", query, mode).await?;
        Ok(EventStream::new(resp))
    }

    async fn post(&self, path: &str, query: &str, mode: ResearchMode) -> Result<reqwest::Response> {
        let body = json!({ "query": query, "mode": mode });
        check(self.http.post(self.url(path)).json(&body).send().await?).await
    }
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|v| v.get("detail").and_then(Value::as_str).map(str::to_string))
        .unwrap_or(text);
    Err(Error::Status {
        status: status.as_u16(),
        detail,
    })
}

/// Progress events of one streaming run, in order.
pub struct EventStream {
    response: reqwest::Response,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    done: bool,
}

impl EventStream {
    fn new(response: reqwest::Response) -> Self {
        Self {
            response,
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
            done: false,
        }
    }

    /// The next event, or `None` once the terminal event has been returned
    /// or the server closed the stream.
    pub async fn next_event(&mut self) -> Result<Option<ProgressEvent>> {
        loop {
            if let Some(data) = self.pending.pop_front() {
                let event: ProgressEvent = data.parse()?;
                if event.kind().is_terminal() {
                    self.done = true;
                    self.pending.clear();
                }
                return Ok(Some(event));
            }
            if self.done {
                return Ok(None);
            }
            match self.response.chunk().await? {
                Some(bytes) => self.pending.extend(self.decoder.feed(&bytes)),
                None => {
                    self.pending.extend(self.decoder.finish());
                    self.done = true;
                }
            }
        }
    }

    /// Drain the stream, returning every event up to and including the terminal one.
    pub async fn collect(mut self) -> Result<Vec<ProgressEvent>> {
        let mut events = Vec::new();
        while let Some(event) = self.next_event().await? {
            events.push(event);
        }
        Ok(events)
    }
}
