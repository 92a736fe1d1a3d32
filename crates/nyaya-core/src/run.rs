use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::types::ResearchMode;

/// Lifecycle of one research run:
/// `Started → Running → <terminal> → Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Started,
    Running,
    Completed,
    Failed,
    Empty,
    InvalidOutput,
    TimedOut,
    Closed,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Empty => "empty",
            Self::InvalidOutput => "invalid_output",
            Self::TimedOut => "timed_out",
            Self::Closed => "closed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Empty | Self::InvalidOutput | Self::TimedOut
        )
    }

    pub fn can_advance_to(self, next: RunState) -> bool {
        match (self, next) {
            (Self::Started, Self::Running) => true,
            (Self::Running, n) => n.is_terminal(),
            (s, Self::Closed) => s.is_terminal(),
            _ => false,
        }
    }
}

/// Tracks a run through [`RunState`], refusing transitions that skip
/// `Running` or leave a terminal state for anything but `Closed`.
#[derive(Debug)]
pub(crate) struct RunLifecycle {
    run_id: u64,
    state: RunState,
    terminal: Option<RunState>,
}

impl RunLifecycle {
    pub(crate) fn start(run_id: u64) -> Self {
        Self {
            run_id,
            state: RunState::Started,
            terminal: None,
        }
    }

    pub(crate) fn advance(&mut self, next: RunState) {
        if !self.state.can_advance_to(next) {
            warn!(
                run_id = self.run_id,
                from = self.state.as_str(),
                to = next.as_str(),
                "ignoring invalid run transition"
            );
            return;
        }
        debug!(run_id = self.run_id, from = self.state.as_str(), to = next.as_str(), "run transition");
        if next.is_terminal() {
            self.terminal = Some(next);
        }
        self.state = next;
    }

    /// The terminal state the run reached, if any.
    pub(crate) fn outcome(&self) -> RunState {
        self.terminal.unwrap_or(self.state)
    }
}

/// Summary of a finished run, logged by the streamer and returned to callers.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: u64,
    pub mode: ResearchMode,
    /// Terminal state reached before the run closed.
    pub outcome: RunState,
    /// Number of chunks (aggregate) or events (live) handed to the client.
    pub delivered: usize,
    pub client_gone: bool,
    /// Whether the worker thread exited within the join bound.
    pub worker_joined: bool,
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}
