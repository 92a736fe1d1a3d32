use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

use nyaya_core::event::STREAM_TIMEOUT_MESSAGE;
use nyaya_core::run::RunState;
use nyaya_core::stream::{run_aggregate, run_live, ResponseWriter};
use nyaya_core::{
    EventKind, EventSink, ProgressEvent, ResearchEngine, ResearchMode, ResearchRequest, ResponseStreamer,
    RunLimits, EMPTY_DETAILS,
};

// ── helpers ──────────────────────────────────────────────────────────────────

fn limits() -> RunLimits {
    RunLimits {
        ceiling: Duration::from_millis(300),
        batch_poll: Duration::from_millis(20),
        stream_poll: Duration::from_millis(10),
        join_grace: Duration::from_millis(500),
    }
}

fn request(mode: ResearchMode) -> ResearchRequest {
    ResearchRequest::new("Is a WhatsApp message admissible as evidence?", mode).unwrap()
}

#[derive(Clone)]
enum Step {
    Emit(ProgressEvent),
    Sleep(Duration),
    Fail(&'static str),
    Panic,
    /// Spin until cancelled, then record that the token fired.
    AwaitCancel,
}

/// Engine that replays a fixed script on every call.
struct Scripted {
    answer: String,
    steps: Vec<Step>,
    calls: AtomicUsize,
    saw_cancel: Arc<AtomicBool>,
}

impl Scripted {
    fn new(answer: &str, steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            answer: answer.to_string(),
            steps,
            calls: AtomicUsize::new(0),
            saw_cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    fn run(&self, cancel: &CancellationToken, mut sink: Option<&mut dyn EventSink>) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        for step in &self.steps {
            match step {
                Step::Emit(ev) => {
                    if let Some(sink) = sink.as_deref_mut() {
                        sink.emit(ev.clone());
                    }
                }
                Step::Sleep(d) => std::thread::sleep(*d),
                Step::Fail(msg) => return Err(anyhow!(*msg)),
                Step::Panic => panic!("boom"),
                Step::AwaitCancel => {
                    while !cancel.is_cancelled() {
                        std::thread::sleep(Duration::from_millis(5));
                    }
                    self.saw_cancel.store(true, Ordering::SeqCst);
                }
            }
        }
        Ok(())
    }
}

impl ResearchEngine for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    fn research(&self, _request: &ResearchRequest, cancel: &CancellationToken) -> Result<String> {
        self.run(cancel, None)?;
        Ok(self.answer.clone())
    }

    fn research_streaming(
        &self,
        _request: &ResearchRequest,
        cancel: &CancellationToken,
        events: &mut dyn EventSink,
    ) -> Result<()> {
        self.run(cancel, Some(events))
    }
}

async fn drain(mut rx: mpsc::UnboundedReceiver<String>) -> Vec<String> {
    let mut out = Vec::new();
    while let Some(chunk) = rx.recv().await {
        out.push(chunk);
    }
    out
}

fn parse(chunk: &str) -> Value {
    serde_json::from_str(chunk).unwrap()
}

const ANSWER: &str = r#"{"content":[{"text":"Electronic records are admissible under s.65B.","refs":["ref1"]}],"references":{"ref1":{"title":"Arjun Panditrao Khotkar v. Kailash Kushanrao Gorantyal","url":"https://indiankanoon.org/doc/172105947/","authors":"Supreme Court of India","year":2020,"type":"case"}}}"#;

// ── aggregate ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_aggregate_success_is_pretty_document() {
    let engine = Scripted::new(ANSWER, vec![]);
    let (writer, rx) = ResponseWriter::channel();
    let report = run_aggregate(engine.clone(), request(ResearchMode::Normal), limits(), writer).await;

    let chunks = drain(rx).await;
    assert_eq!(chunks.len(), 1);
    let body = &chunks[0];
    assert!(body.ends_with("}\n"));
    assert!(body.starts_with("{\n  \"content\": [\n"));
    assert_eq!(parse(body), parse(ANSWER));

    assert_eq!(report.outcome, RunState::Completed);
    assert_eq!(report.delivered, 1);
    assert!(report.worker_joined);
    assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_aggregate_invalid_json_returns_raw_text() {
    let engine = Scripted::new("Here is my analysis, not JSON", vec![]);
    let (writer, rx) = ResponseWriter::channel();
    let report = run_aggregate(engine, request(ResearchMode::Normal), limits(), writer).await;

    let chunks = drain(rx).await;
    assert_eq!(
        chunks,
        vec!["{\"error\": \"Invalid JSON response\", \"raw_response\": \"Here is my analysis, not JSON\"}\n"]
    );
    assert_eq!(report.outcome, RunState::InvalidOutput);
}

#[tokio::test]
async fn test_aggregate_empty_output_is_no_response() {
    let engine = Scripted::new("", vec![]);
    let (writer, rx) = ResponseWriter::channel();
    let report = run_aggregate(engine, request(ResearchMode::Detailed), limits(), writer).await;

    let body = parse(&drain(rx).await[0]);
    assert_eq!(body, json!({"error": "No response generated", "details": EMPTY_DETAILS}));
    assert_eq!(report.outcome, RunState::Empty);
    assert_eq!(report.mode, ResearchMode::Detailed);
}

#[tokio::test]
async fn test_aggregate_whitespace_output_is_returned_verbatim() {
    let engine = Scripted::new("  \n ", vec![]);
    let (writer, rx) = ResponseWriter::channel();
    let report = run_aggregate(engine, request(ResearchMode::Normal), limits(), writer).await;

    let body = parse(&drain(rx).await[0]);
    assert_eq!(body, json!({"error": "Invalid JSON response", "raw_response": "  \n "}));
    assert_eq!(report.outcome, RunState::InvalidOutput);
}

#[tokio::test]
async fn test_aggregate_large_integers_survive_unchanged() {
    let answer = r#"{"references": {"r": {"year": 123456789012345678901234, "score": 0.10}}}"#;
    let engine = Scripted::new(answer, vec![]);
    let (writer, rx) = ResponseWriter::channel();
    run_aggregate(engine, request(ResearchMode::Normal), limits(), writer).await;

    let doc = drain(rx).await.remove(0);
    assert!(doc.contains("\"year\": 123456789012345678901234"), "{doc}");
    assert!(doc.contains("\"score\": 0.10"), "{doc}");
}

#[tokio::test]
async fn test_aggregate_engine_fault_is_execution_failed() {
    let engine = Scripted::new(ANSWER, vec![Step::Fail("search quota exhausted")]);
    let (writer, rx) = ResponseWriter::channel();
    let report = run_aggregate(engine, request(ResearchMode::Normal), limits(), writer).await;

    let body = parse(&drain(rx).await[0]);
    assert_eq!(
        body,
        json!({"error": "Research execution failed", "details": "search quota exhausted"})
    );
    assert_eq!(report.outcome, RunState::Failed);
}

#[tokio::test]
async fn test_aggregate_engine_panic_is_execution_failed() {
    let engine = Scripted::new(ANSWER, vec![Step::Panic]);
    let (writer, rx) = ResponseWriter::channel();
    let report = run_aggregate(engine, request(ResearchMode::Normal), limits(), writer).await;

    let body = parse(&drain(rx).await[0]);
    assert_eq!(body["error"], "Research execution failed");
    assert_eq!(body["details"], "research engine panicked: boom");
    assert_eq!(report.outcome, RunState::Failed);
    assert!(report.worker_joined);
}

#[tokio::test]
async fn test_aggregate_timeout_answers_within_one_poll_and_cancels() {
    let engine = Scripted::new(ANSWER, vec![Step::AwaitCancel, Step::Sleep(Duration::from_millis(50))]);
    let saw_cancel = Arc::clone(&engine.saw_cancel);
    let (writer, rx) = ResponseWriter::channel();
    let started = Instant::now();
    let report = run_aggregate(engine, request(ResearchMode::Normal), limits(), writer).await;
    let waited = started.elapsed();

    let chunks = drain(rx).await;
    assert_eq!(
        chunks,
        vec!["{\"error\": \"Request timeout\", \"details\": \"Research took longer than 5 minutes\"}\n"]
    );
    assert_eq!(report.outcome, RunState::TimedOut);
    assert!(!report.worker_joined);
    assert!(waited >= limits().ceiling);
    assert!(waited < limits().ceiling + Duration::from_millis(250));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(saw_cancel.load(Ordering::SeqCst));
}

#[tokio::test]
#[traced_test]
async fn test_aggregate_logs_dangling_references() {
    let answer = r#"{"content":[{"text":"See ref9.","refs":["ref9"]}],"references":{}}"#;
    let engine = Scripted::new(answer, vec![]);
    let (writer, rx) = ResponseWriter::channel();
    let report = run_aggregate(engine, request(ResearchMode::Normal), limits(), writer).await;

    assert_eq!(report.outcome, RunState::Completed);
    assert_eq!(drain(rx).await.len(), 1);
    assert!(logs_contain("research payload cites undefined references"));
    assert!(logs_contain("research run finished"));
}

#[tokio::test]
async fn test_aggregate_client_gone_still_joins_worker() {
    let engine = Scripted::new(ANSWER, vec![Step::Sleep(Duration::from_millis(30))]);
    let (writer, rx) = ResponseWriter::channel();
    drop(rx);
    let report = run_aggregate(engine.clone(), request(ResearchMode::Normal), limits(), writer).await;

    assert!(report.client_gone);
    assert_eq!(report.delivered, 0);
    assert!(report.worker_joined);
    assert_eq!(report.outcome, RunState::Completed);
}

// ── live ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_live_forwards_events_in_order_and_stops_at_complete() {
    let engine = Scripted::new(
        "",
        vec![
            Step::Emit(ProgressEvent::status("Researching in normal mode")),
            Step::Emit(ProgressEvent::progress("query-analyzer", "Identified Evidence Act s.65B")),
            Step::Emit(ProgressEvent::content("Electronic records")),
            Step::Emit(ProgressEvent::complete(&nyaya_core::ResearchResult::from_output(
                ANSWER.to_string(),
            ))),
            Step::Emit(ProgressEvent::status("after the end")),
        ],
    );
    let (writer, rx) = ResponseWriter::channel();
    let report = run_live(engine, request(ResearchMode::Normal), limits(), writer).await;

    let chunks = drain(rx).await;
    let kinds: Vec<String> = chunks.iter().map(|c| parse(c)["type"].as_str().unwrap().to_string()).collect();
    assert_eq!(kinds, ["status", "progress", "content", "complete"]);
    assert_eq!(
        chunks[1],
        r#"{"type": "progress", "node": "query-analyzer", "content": "Identified Evidence Act s.65B"}"#
    );
    assert_eq!(parse(&chunks[3])["data"], parse(ANSWER));
    assert_eq!(report.outcome, RunState::Completed);
    assert_eq!(report.delivered, 4);
}

#[tokio::test]
async fn test_live_done_without_terminal_event_reports_no_output() {
    let engine = Scripted::new("", vec![Step::Emit(ProgressEvent::status("Researching in normal mode"))]);
    let (writer, rx) = ResponseWriter::channel();
    let report = run_live(engine, request(ResearchMode::Normal), limits(), writer).await;

    let chunks = drain(rx).await;
    assert_eq!(chunks.len(), 2);
    assert_eq!(parse(&chunks[1]), json!({"type": "error", "data": EMPTY_DETAILS}));
    assert_eq!(report.outcome, RunState::Empty);
}

#[tokio::test]
async fn test_live_engine_fault_becomes_error_event() {
    let engine = Scripted::new(
        "",
        vec![
            Step::Emit(ProgressEvent::status("Researching in normal mode")),
            Step::Fail("subprocess exited with status 1"),
        ],
    );
    let (writer, rx) = ResponseWriter::channel();
    let report = run_live(engine, request(ResearchMode::Normal), limits(), writer).await;

    let chunks = drain(rx).await;
    assert_eq!(
        chunks.last().unwrap(),
        r#"{"type": "error", "data": "subprocess exited with status 1"}"#
    );
    assert_eq!(report.outcome, RunState::Failed);
    assert!(report.worker_joined);
}

#[tokio::test]
async fn test_live_timeout_ends_stream_with_single_error() {
    let engine = Scripted::new(
        "",
        vec![
            Step::Emit(ProgressEvent::status("Researching in detailed mode")),
            Step::AwaitCancel,
            Step::Emit(ProgressEvent::content("too late")),
        ],
    );
    let saw_cancel = Arc::clone(&engine.saw_cancel);
    let (writer, rx) = ResponseWriter::channel();
    let report = run_live(engine, request(ResearchMode::Detailed), limits(), writer).await;

    let chunks = drain(rx).await;
    assert_eq!(chunks.len(), 2);
    assert_eq!(
        chunks[1],
        format!(r#"{{"type": "error", "data": "{STREAM_TIMEOUT_MESSAGE}"}}"#)
    );
    assert_eq!(report.outcome, RunState::TimedOut);
    assert!(saw_cancel.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_live_disconnect_keeps_running_to_completion() {
    let engine = Scripted::new(
        "",
        vec![
            Step::Emit(ProgressEvent::status("one")),
            Step::Sleep(Duration::from_millis(20)),
            Step::Emit(ProgressEvent::status("two")),
            Step::Emit(ProgressEvent::error("engine gave up")),
        ],
    );
    let (writer, rx) = ResponseWriter::channel();
    drop(rx);
    let report = run_live(engine.clone(), request(ResearchMode::Normal), limits(), writer).await;

    assert!(report.client_gone);
    assert_eq!(report.delivered, 0);
    assert_eq!(report.outcome, RunState::Failed);
    assert!(report.worker_joined);
    assert!(!engine.saw_cancel.load(Ordering::SeqCst));

    let (writer, rx) = ResponseWriter::channel();
    let next = run_live(engine.clone(), request(ResearchMode::Normal), limits(), writer).await;
    assert!(!next.client_gone);
    assert_eq!(drain(rx).await.len(), 3);
    assert_eq!(engine.calls.load(Ordering::SeqCst), 2);
}

// ── streamer ─────────────────────────────────────────────────────────────────

/// Engine with only a batch answer; streaming goes through the default wrapper.
struct BatchOnly;

impl ResearchEngine for BatchOnly {
    fn name(&self) -> &str {
        "batch-only"
    }

    fn research(&self, _request: &ResearchRequest, _cancel: &CancellationToken) -> Result<String> {
        Ok(ANSWER.to_string())
    }
}

#[tokio::test]
async fn test_streamer_spawns_runs_detached_from_reader() {
    let streamer = ResponseStreamer::new(Arc::new(BatchOnly), limits());
    assert_eq!(streamer.engine_name(), "batch-only");

    let batch = drain(streamer.aggregate(request(ResearchMode::Normal))).await;
    assert_eq!(batch.len(), 1);
    assert_eq!(parse(&batch[0]), parse(ANSWER));

    let live = drain(streamer.live(request(ResearchMode::Detailed))).await;
    let events: Vec<ProgressEvent> = live.iter().map(|c| c.parse().unwrap()).collect();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0], ProgressEvent::status("Researching in detailed mode"));
    assert_eq!(events[1].kind(), EventKind::Complete);
    assert_eq!(events[1].get("data"), Some(&parse(ANSWER)));
}

/// Holds any query mentioning "slow" until released; answers the rest at once.
struct Gated {
    release: AtomicBool,
    slow_done: AtomicBool,
}

impl ResearchEngine for Gated {
    fn name(&self) -> &str {
        "gated"
    }

    fn research(&self, request: &ResearchRequest, cancel: &CancellationToken) -> Result<String> {
        if request.query().contains("slow") {
            while !self.release.load(Ordering::SeqCst) && !cancel.is_cancelled() {
                std::thread::sleep(Duration::from_millis(5));
            }
            self.slow_done.store(true, Ordering::SeqCst);
        }
        Ok(ANSWER.to_string())
    }
}

#[tokio::test]
async fn test_streamer_slow_run_does_not_delay_another() {
    let engine = Arc::new(Gated {
        release: AtomicBool::new(false),
        slow_done: AtomicBool::new(false),
    });
    let streamer = ResponseStreamer::new(engine.clone(), limits());

    let slow_query = ResearchRequest::new("slow: full survey of sedition case law", ResearchMode::Detailed).unwrap();
    let mut slow = streamer.aggregate(slow_query);
    let fast = streamer.aggregate(request(ResearchMode::Normal));

    let fast_started = Instant::now();
    let fast_chunks = tokio::time::timeout(Duration::from_millis(200), drain(fast))
        .await
        .expect("fast run was held up behind the slow one");
    assert!(fast_started.elapsed() < Duration::from_millis(200));
    assert_eq!(parse(&fast_chunks[0]), parse(ANSWER));

    assert!(!engine.slow_done.load(Ordering::SeqCst));
    assert!(slow.try_recv().is_err());

    engine.release.store(true, Ordering::SeqCst);
    let slow_chunk = slow.recv().await.unwrap();
    assert_eq!(parse(&slow_chunk), parse(ANSWER));
    assert!(engine.slow_done.load(Ordering::SeqCst));
}
