use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::bridge::BatchMessage;
use crate::types::ResearchResult;

/// Wall-clock bound on a run as seen by the client.
pub const RESEARCH_CEILING: Duration = Duration::from_secs(300);
pub const BATCH_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const STREAM_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Bound on the final worker join, so a slow-to-exit worker never delays the client.
pub const JOIN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLimits {
    pub ceiling: Duration,
    pub batch_poll: Duration,
    pub stream_poll: Duration,
    pub join_grace: Duration,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            ceiling: RESEARCH_CEILING,
            batch_poll: BATCH_POLL_INTERVAL,
            stream_poll: STREAM_POLL_INTERVAL,
            join_grace: JOIN_GRACE,
        }
    }
}

/// What one observation of the handoff queue produced.
#[derive(Debug, PartialEq)]
pub enum Observation<T> {
    Item(T),
    /// The worker dropped its end of the queue.
    Closed,
    /// The ceiling elapsed first.
    TimedOut,
}

/// Races a run's queue against its ceiling.
///
/// The deadline is re-checked at least every `poll`, so a caller is never
/// held past the ceiling by more than one poll interval. Queue items are
/// returned as soon as they arrive. The underlying worker is never stopped;
/// on expiry the run's cancellation token is triggered as a hint.
pub struct Supervisor {
    ceiling: Duration,
    poll: Duration,
    started: Instant,
    cancel: CancellationToken,
}

impl Supervisor {
    pub fn new(ceiling: Duration, poll: Duration, cancel: CancellationToken) -> Self {
        Self {
            ceiling,
            poll,
            started: Instant::now(),
            cancel,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn is_expired(&self) -> bool {
        self.elapsed() >= self.ceiling
    }

    pub async fn observe<T>(&self, rx: &mut mpsc::UnboundedReceiver<T>) -> Observation<T> {
        loop {
            if self.is_expired() {
                warn!(
                    elapsed_ms = self.elapsed().as_millis() as u64,
                    ceiling_s = self.ceiling.as_secs(),
                    "research run exceeded ceiling"
                );
                self.cancel.cancel();
                return Observation::TimedOut;
            }
            let wait = self.poll.min(self.ceiling.saturating_sub(self.elapsed()));
            tokio::select! {
                biased;
                item = rx.recv() => {
                    return match item {
                        Some(item) => Observation::Item(item),
                        None => Observation::Closed,
                    };
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Wait for a batch worker's single item and classify it.
    pub async fn await_result(&self, rx: &mut mpsc::UnboundedReceiver<BatchMessage>) -> ResearchResult {
        match self.observe(rx).await {
            Observation::Item(Ok(text)) => ResearchResult::from_output(text),
            Observation::Item(Err(reason)) => ResearchResult::Failure { reason },
            Observation::Closed => ResearchResult::Empty,
            Observation::TimedOut => ResearchResult::TimedOut,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn times_out_when_queue_stays_silent() {
        let (_tx, mut rx) = mpsc::unbounded_channel::<u32>();
        let cancel = CancellationToken::new();
        let sup = Supervisor::new(RESEARCH_CEILING, BATCH_POLL_INTERVAL, cancel.clone());
        assert!(!sup.is_expired());

        assert_eq!(sup.observe(&mut rx).await, Observation::TimedOut);
        assert!(sup.is_expired());
        assert!(cancel.is_cancelled());
        assert!(sup.elapsed() >= RESEARCH_CEILING);
        assert!(sup.elapsed() <= RESEARCH_CEILING + BATCH_POLL_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn queued_item_wins_over_poll_tick() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(1u32).unwrap();
        let sup = Supervisor::new(RESEARCH_CEILING, STREAM_POLL_INTERVAL, CancellationToken::new());
        assert_eq!(sup.observe(&mut rx).await, Observation::Item(1));
        assert!(sup.elapsed() < STREAM_POLL_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn item_arriving_late_is_still_seen() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(299)).await;
            let _ = tx.send(Ok::<String, String>("{}".into()));
        });
        let sup = Supervisor::new(RESEARCH_CEILING, BATCH_POLL_INTERVAL, CancellationToken::new());
        let result = sup.await_result(&mut rx).await;
        assert_eq!(result, ResearchResult::Success(serde_json::json!({})));
    }

    #[tokio::test]
    async fn closed_queue_is_empty_result() {
        let (tx, mut rx) = mpsc::unbounded_channel::<BatchMessage>();
        drop(tx);
        let sup = Supervisor::new(RESEARCH_CEILING, BATCH_POLL_INTERVAL, CancellationToken::new());
        assert_eq!(sup.await_result(&mut rx).await, ResearchResult::Empty);
    }

    #[tokio::test]
    async fn worker_fault_is_failure() {
        let (tx, mut rx) = mpsc::unbounded_channel::<BatchMessage>();
        tx.send(Err("search backend unavailable".into())).unwrap();
        let sup = Supervisor::new(RESEARCH_CEILING, BATCH_POLL_INTERVAL, CancellationToken::new());
        assert_eq!(
            sup.await_result(&mut rx).await,
            ResearchResult::Failure {
                reason: "search backend unavailable".into()
            }
        );
    }
}
