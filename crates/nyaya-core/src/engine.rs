use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::event::ProgressEvent;
use crate::types::{ResearchRequest, ResearchResult};

/// Receives the events of a streaming run, in order.
pub trait EventSink {
    fn emit(&mut self, event: ProgressEvent);
}

impl EventSink for Vec<ProgressEvent> {
    fn emit(&mut self, event: ProgressEvent) {
        self.push(event);
    }
}

/// The research computation behind the API.
///
/// Both methods block the calling thread until the engine is done; the core
/// always calls them from a dedicated worker thread. `cancel` is triggered
/// once nobody observes the run any more; honouring it is optional.
pub trait ResearchEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Run to completion and return the final answer text.
    fn research(&self, request: &ResearchRequest, cancel: &CancellationToken) -> Result<String>;

    /// Run to completion, emitting progress as it goes. Engines should finish
    /// with a `complete` event; the default runs [`research`](Self::research)
    /// and wraps its answer.
    fn research_streaming(
        &self,
        request: &ResearchRequest,
        cancel: &CancellationToken,
        events: &mut dyn EventSink,
    ) -> Result<()> {
        events.emit(ProgressEvent::status(format!(
            "Researching in {} mode",
            request.mode()
        )));
        let output = self.research(request, cancel)?;
        events.emit(ProgressEvent::complete(&ResearchResult::from_output(output)));
        Ok(())
    }
}
