use std::io::{BufRead, BufReader};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use nyaya_core::supervisor::RESEARCH_CEILING;
use nyaya_core::{EventSink, ProgressEvent, ResearchEngine, ResearchRequest, ResearchResult};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::instruction::{build_instruction, strip_fences};

/// Appended to the system prompt: a local model has no search tools.
const OFFLINE_NOTE: &str = "\n\
You have no search or browsing tools in this deployment. Answer from your own\n\
knowledge, cite only authorities you are confident exist, and leave url empty\n\
when you do not know it.\n";

/// Calls a locally-hosted Ollama model via its native chat API.
///
/// Intended for deployments where queries must not leave the local machine.
/// No tool calling; the answer relies on the model's own knowledge.
pub struct OllamaEngine {
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl OllamaEngine {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            timeout: RESEARCH_CEILING,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn chat_request(&self, request: &ResearchRequest, stream: bool) -> OllamaChatRequest {
        let profile = nyaya_domains::get_profile(request.mode());
        OllamaChatRequest {
            model: self.model.clone(),
            messages: vec![
                OllamaMessage {
                    role: "system".into(),
                    content: format!("{}{OFFLINE_NOTE}", profile.system_prompt),
                },
                OllamaMessage {
                    role: "user".into(),
                    content: build_instruction(request),
                },
            ],
            stream,
            format: "json".into(),
        }
    }

    /// POST to `/api/chat`. Must be called off the async runtime.
    fn post(&self, body: &OllamaChatRequest) -> Result<reqwest::blocking::Response> {
        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        info!(
            model = %self.model,
            base_url = %self.base_url,
            stream = body.stream,
            "calling ollama chat API"
        );
        // Built per call: a blocking client may not be created on an async thread.
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .context("failed to build http client")?;
        let response = client
            .post(&url)
            .json(body)
            .send()
            .with_context(|| format!("ollama request to {url} failed"))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            warn!(status = %status, "ollama returned non-200: {}", text);
            bail!("Ollama error {status}: {text}");
        }
        Ok(response)
    }
}

#[derive(Debug, Serialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    format: String,
}

/// One chat response, or one NDJSON chunk of a streamed response.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct OllamaChatChunk {
    #[serde(default)]
    message: Option<OllamaResponseMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OllamaResponseMessage {
    #[serde(default)]
    content: String,
}

impl OllamaChatChunk {
    pub(crate) fn parse(line: &str) -> Result<Self> {
        let chunk: Self = serde_json::from_str(line).context("failed to parse ollama response")?;
        if let Some(err) = &chunk.error {
            bail!("Ollama error: {err}");
        }
        Ok(chunk)
    }

    fn content(&self) -> &str {
        self.message.as_ref().map_or("", |m| m.content.as_str())
    }
}

impl ResearchEngine for OllamaEngine {
    fn name(&self) -> &str {
        "ollama"
    }

    fn research(&self, request: &ResearchRequest, _cancel: &CancellationToken) -> Result<String> {
        let response = self.post(&self.chat_request(request, false))?;
        let text = response.text().context("failed to read ollama response")?;
        let chunk = OllamaChatChunk::parse(&text)?;
        info!(output_len = chunk.content().len(), "ollama chat finished");
        Ok(strip_fences(chunk.content()).to_string())
    }

    fn research_streaming(
        &self,
        request: &ResearchRequest,
        cancel: &CancellationToken,
        events: &mut dyn EventSink,
    ) -> Result<()> {
        events.emit(ProgressEvent::status(format!("Researching in {} mode", request.mode())));
        let response = self.post(&self.chat_request(request, true))?;

        let mut answer = String::new();
        for line in BufReader::new(response).lines() {
            if cancel.is_cancelled() {
                bail!("research cancelled");
            }
            let line = line.context("error reading ollama stream")?;
            if line.trim().is_empty() {
                continue;
            }
            let chunk = OllamaChatChunk::parse(&line)?;
            let fragment = chunk.content();
            if !fragment.is_empty() {
                answer.push_str(fragment);
                events.emit(ProgressEvent::token(fragment));
            }
            if chunk.done {
                break;
            }
        }

        info!(output_len = answer.len(), "ollama chat stream finished");
        let answer = strip_fences(&answer);
        if !answer.is_empty() {
            events.emit(ProgressEvent::complete(&ResearchResult::from_output(answer.to_string())));
        }
        Ok(())
    }
}
