use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::bridge::{self, WorkerMessage};
use crate::engine::ResearchEngine;
use crate::event::{EventKind, ProgressEvent, STREAM_TIMEOUT_MESSAGE};
use crate::run::{RunLifecycle, RunReport, RunState};
use crate::supervisor::{Observation, RunLimits, Supervisor};
use crate::types::{ResearchPayload, ResearchRequest, ResearchResult, EMPTY_DETAILS};

/// The client's end of the transport is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("client disconnected")]
pub struct WriteFailed;

/// Writing half of a response body. Each `write` is one chunk (aggregate)
/// or one event payload (live).
#[derive(Debug, Clone)]
pub struct ResponseWriter {
    tx: mpsc::UnboundedSender<String>,
}

impl ResponseWriter {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn write(&self, chunk: String) -> Result<(), WriteFailed> {
        self.tx.send(chunk).map_err(|_| WriteFailed)
    }
}

/// Starts research runs and renders them for the two endpoints.
///
/// Each run executes on its own tokio task, detached from the response
/// body, so a client that goes away never stops the run from being
/// drained and its worker joined.
#[derive(Clone)]
pub struct ResponseStreamer {
    engine: Arc<dyn ResearchEngine>,
    limits: RunLimits,
}

impl ResponseStreamer {
    pub fn new(engine: Arc<dyn ResearchEngine>, limits: RunLimits) -> Self {
        Self { engine, limits }
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    pub fn limits(&self) -> RunLimits {
        self.limits
    }

    /// Spawn an aggregate run; the receiver yields exactly one JSON document.
    pub fn aggregate(&self, request: ResearchRequest) -> mpsc::UnboundedReceiver<String> {
        let (writer, rx) = ResponseWriter::channel();
        tokio::spawn(run_aggregate(Arc::clone(&self.engine), request, self.limits, writer));
        rx
    }

    /// Spawn a live run; the receiver yields one event JSON per progress
    /// event and ends after the terminal event.
    pub fn live(&self, request: ResearchRequest) -> mpsc::UnboundedReceiver<String> {
        let (writer, rx) = ResponseWriter::channel();
        tokio::spawn(run_live(Arc::clone(&self.engine), request, self.limits, writer));
        rx
    }
}

/// Run one batch research and write its document as a single chunk.
pub async fn run_aggregate(
    engine: Arc<dyn ResearchEngine>,
    request: ResearchRequest,
    limits: RunLimits,
    out: ResponseWriter,
) -> RunReport {
    let started = Instant::now();
    let run_id = bridge::next_run_id();
    let mode = request.mode();
    let mut lifecycle = RunLifecycle::start(run_id);
    info!(run_id, %mode, engine = engine.name(), "research run started");

    let (result, worker) = match bridge::spawn_batch(engine, request, run_id) {
        Ok((worker, mut rx)) => {
            lifecycle.advance(RunState::Running);
            let supervisor = Supervisor::new(limits.ceiling, limits.batch_poll, worker.cancel_token().clone());
            (supervisor.await_result(&mut rx).await, Some(worker))
        }
        Err(e) => {
            error!(run_id, "could not start research worker: {e:#}");
            lifecycle.advance(RunState::Running);
            (ResearchResult::Failure { reason: format!("{e:#}") }, None)
        }
    };
    lifecycle.advance(result.state());
    inspect_payload(run_id, &result);

    let client_gone = out.write(result.to_document()).is_err();
    if client_gone {
        debug!(run_id, "client went away before the research result was written");
    }
    drop(out);

    let worker_joined = match worker {
        Some(worker) if result != ResearchResult::TimedOut => {
            worker.join_within(limits.join_grace, limits.batch_poll).await
        }
        Some(worker) => {
            worker.detach();
            false
        }
        None => false,
    };
    lifecycle.advance(RunState::Closed);

    finish(RunReport {
        run_id,
        mode,
        outcome: lifecycle.outcome(),
        delivered: usize::from(!client_gone),
        client_gone,
        worker_joined,
        elapsed: started.elapsed(),
    })
}

/// Run one streaming research, forwarding each event as it is dequeued.
///
/// The output always ends with exactly one terminal event: the engine's own
/// `complete`/`error`, or a synthetic `error` when the engine finishes
/// without one, faults, or the ceiling fires.
pub async fn run_live(
    engine: Arc<dyn ResearchEngine>,
    request: ResearchRequest,
    limits: RunLimits,
    out: ResponseWriter,
) -> RunReport {
    let started = Instant::now();
    let run_id = bridge::next_run_id();
    let mode = request.mode();
    let mut lifecycle = RunLifecycle::start(run_id);
    let mut output = LiveOutput::new(run_id, out);
    info!(run_id, %mode, engine = engine.name(), "streaming research run started");

    let (worker, mut rx) = match bridge::spawn_streaming(engine, request, run_id) {
        Ok(v) => v,
        Err(e) => {
            error!(run_id, "could not start research worker: {e:#}");
            lifecycle.advance(RunState::Running);
            output.send(&ProgressEvent::error(format!("{e:#}")));
            lifecycle.advance(RunState::Failed);
            lifecycle.advance(RunState::Closed);
            let (delivered, client_gone) = output.finish();
            return finish(RunReport {
                run_id,
                mode,
                outcome: lifecycle.outcome(),
                delivered,
                client_gone,
                worker_joined: false,
                elapsed: started.elapsed(),
            });
        }
    };
    lifecycle.advance(RunState::Running);

    let supervisor = Supervisor::new(limits.ceiling, limits.stream_poll, worker.cancel_token().clone());
    let state = loop {
        match supervisor.observe(&mut rx).await {
            Observation::Item(WorkerMessage::Event(event)) => {
                output.send(&event);
                match event.kind() {
                    EventKind::Complete => break RunState::Completed,
                    EventKind::Error => break RunState::Failed,
                    _ => {}
                }
            }
            Observation::Item(WorkerMessage::Done) | Observation::Closed => {
                output.send(&ProgressEvent::error(EMPTY_DETAILS));
                break RunState::Empty;
            }
            Observation::Item(WorkerMessage::Error(reason)) => {
                warn!(run_id, "research engine failed: {reason}");
                output.send(&ProgressEvent::error(reason));
                break RunState::Failed;
            }
            Observation::TimedOut => {
                output.send(&ProgressEvent::error(STREAM_TIMEOUT_MESSAGE));
                break RunState::TimedOut;
            }
        }
    };
    lifecycle.advance(state);

    // Close the client stream before waiting on the worker.
    let (delivered, client_gone) = output.finish();
    drop(rx);
    let worker_joined = worker.join_within(limits.join_grace, limits.stream_poll).await;
    lifecycle.advance(RunState::Closed);

    finish(RunReport {
        run_id,
        mode,
        outcome: lifecycle.outcome(),
        delivered,
        client_gone,
        worker_joined,
        elapsed: started.elapsed(),
    })
}

/// Event writer that goes quiet after the first failed write.
struct LiveOutput {
    run_id: u64,
    out: Option<ResponseWriter>,
    delivered: usize,
    client_gone: bool,
}

impl LiveOutput {
    fn new(run_id: u64, out: ResponseWriter) -> Self {
        Self {
            run_id,
            out: Some(out),
            delivered: 0,
            client_gone: false,
        }
    }

    fn send(&mut self, event: &ProgressEvent) {
        let Some(out) = &self.out else {
            return;
        };
        match out.write(event.to_json()) {
            Ok(()) => self.delivered += 1,
            Err(WriteFailed) => {
                debug!(run_id = self.run_id, "client disconnected from event stream");
                self.client_gone = true;
                self.out = None;
            }
        }
    }

    fn finish(self) -> (usize, bool) {
        (self.delivered, self.client_gone)
    }
}

fn inspect_payload(run_id: u64, result: &ResearchResult) {
    let ResearchResult::Success(value) = result else {
        return;
    };
    match ResearchPayload::from_value(value) {
        Some(payload) => {
            let missing = payload.unresolved_refs();
            if !missing.is_empty() {
                warn!(run_id, missing = ?missing, "research payload cites undefined references");
            }
        }
        None => debug!(run_id, "research payload does not follow the content/references schema"),
    }
}

fn finish(report: RunReport) -> RunReport {
    info!(
        run_id = report.run_id,
        mode = %report.mode,
        outcome = report.outcome.as_str(),
        delivered = report.delivered,
        client_gone = report.client_gone,
        worker_joined = report.worker_joined,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "research run finished"
    );
    report
}
