//! Runs a blocking [`ResearchEngine`] on its own OS thread and hands its
//! output back to the async side through an unbounded FIFO channel.
//!
//! The worker never lets a fault escape: engine errors and panics are turned
//! into a queue item. Sends are ignored once the receiving side has stopped
//! observing the run.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::engine::{EventSink, ResearchEngine};
use crate::event::ProgressEvent;
use crate::types::ResearchRequest;

static NEXT_RUN_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_run_id() -> u64 {
    NEXT_RUN_ID.fetch_add(1, Ordering::Relaxed)
}

/// The single item a batch worker pushes: the engine's answer text, or the
/// fault message.
pub type BatchMessage = std::result::Result<String, String>;

/// Items a streaming worker pushes: any number of `Event`s, then exactly one
/// of `Done` or `Error`.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerMessage {
    Event(ProgressEvent),
    Done,
    Error(String),
}

/// Handle to a research worker thread.
#[derive(Debug)]
pub struct Worker {
    run_id: u64,
    handle: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl Worker {
    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait up to `grace` for the thread to exit, checking every `poll`.
    /// Returns `false` and detaches the thread if it is still running.
    pub async fn join_within(mut self, grace: Duration, poll: Duration) -> bool {
        let deadline = Instant::now() + grace;
        loop {
            if self.is_finished() {
                if let Some(handle) = self.handle.take() {
                    if handle.join().is_err() {
                        warn!(run_id = self.run_id, "research worker panicked outside the engine");
                    }
                }
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                warn!(
                    run_id = self.run_id,
                    grace_ms = grace.as_millis() as u64,
                    "research worker still running after join bound, detaching"
                );
                return false;
            }
            tokio::time::sleep(poll.min(deadline - now)).await;
        }
    }

    /// Stop tracking the thread; it keeps running to completion on its own.
    pub fn detach(self) {
        debug!(
            run_id = self.run_id,
            finished = self.is_finished(),
            "detaching research worker"
        );
    }
}

/// Start a batch run: the engine is called once and exactly one
/// [`BatchMessage`] is pushed.
pub fn spawn_batch(
    engine: Arc<dyn ResearchEngine>,
    request: ResearchRequest,
    run_id: u64,
) -> Result<(Worker, mpsc::UnboundedReceiver<BatchMessage>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    let handle = thread::Builder::new()
        .name(format!("research-{run_id}"))
        .spawn(move || {
            let started = Instant::now();
            debug!(run_id, engine = engine.name(), "batch worker started");
            let caught = panic::catch_unwind(AssertUnwindSafe(|| engine.research(&request, &token)));
            let message = match caught {
                Ok(Ok(text)) => Ok(text),
                Ok(Err(e)) => Err(format!("{e:#}")),
                Err(payload) => Err(panic_message(payload.as_ref())),
            };
            debug!(
                run_id,
                ok = message.is_ok(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "batch worker finished"
            );
            let _ = tx.send(message);
        })
        .context("failed to spawn research worker")?;

    Ok((
        Worker {
            run_id,
            handle: Some(handle),
            cancel,
        },
        rx,
    ))
}

/// Start a streaming run: every engine event is pushed as it is produced,
/// followed by `Done` or `Error`.
pub fn spawn_streaming(
    engine: Arc<dyn ResearchEngine>,
    request: ResearchRequest,
    run_id: u64,
) -> Result<(Worker, mpsc::UnboundedReceiver<WorkerMessage>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    let handle = thread::Builder::new()
        .name(format!("research-{run_id}"))
        .spawn(move || {
            let started = Instant::now();
            debug!(run_id, engine = engine.name(), "streaming worker started");
            let mut sink = ChannelSink {
                tx: tx.clone(),
                emitted: 0,
            };
            let caught = panic::catch_unwind(AssertUnwindSafe(|| {
                engine.research_streaming(&request, &token, &mut sink)
            }));
            let last = match caught {
                Ok(Ok(())) => WorkerMessage::Done,
                Ok(Err(e)) => WorkerMessage::Error(format!("{e:#}")),
                Err(payload) => WorkerMessage::Error(panic_message(payload.as_ref())),
            };
            debug!(
                run_id,
                events = sink.emitted,
                ok = matches!(last, WorkerMessage::Done),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "streaming worker finished"
            );
            let _ = tx.send(last);
        })
        .context("failed to spawn research worker")?;

    Ok((
        Worker {
            run_id,
            handle: Some(handle),
            cancel,
        },
        rx,
    ))
}

struct ChannelSink {
    tx: mpsc::UnboundedSender<WorkerMessage>,
    emitted: usize,
}

impl EventSink for ChannelSink {
    fn emit(&mut self, event: ProgressEvent) {
        self.emitted += 1;
        let _ = self.tx.send(WorkerMessage::Event(event));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("research engine panicked: {detail}")
}
