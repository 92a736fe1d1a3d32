use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use nyaya_core::{EventSink, ProgressEvent, ResearchEngine, ResearchRequest, ResearchResult};
use nyaya_domains::ResearchProfile;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::event::StreamCollector;
use crate::instruction::{build_instruction, strip_fences};

const CANCEL_POLL: Duration = Duration::from_millis(100);

/// Runs the Claude CLI as a blocking subprocess with web research tools and
/// the legal specialist sub-agents.
pub struct ClaudeEngine {
    /// Path to the `claude` CLI binary.
    pub claude_bin: String,
    pub model: String,
    /// Working directory of the subprocess; created on first use.
    pub workdir: PathBuf,
}

impl ClaudeEngine {
    pub fn new(claude_bin: impl Into<String>, model: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            claude_bin: claude_bin.into(),
            model: model.into(),
            workdir: workdir.into(),
        }
    }

    /// CLI arguments for one research run (binary excluded).
    pub fn args(&self, request: &ResearchRequest, profile: &ResearchProfile) -> Vec<String> {
        vec![
            "--model".to_string(),
            self.model.clone(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
            "--allowedTools".to_string(),
            profile.allowed_tools.to_string(),
            "--max-turns".to_string(),
            profile.max_turns.to_string(),
            "--append-system-prompt".to_string(),
            profile.system_prompt.clone(),
            "--agents".to_string(),
            profile.agents_json().to_string(),
            "--print".to_string(),
            build_instruction(request),
        ]
    }

    fn run(
        &self,
        request: &ResearchRequest,
        cancel: &CancellationToken,
        mut events: Option<&mut dyn EventSink>,
    ) -> Result<String> {
        let profile = nyaya_domains::get_profile(request.mode());
        std::fs::create_dir_all(&self.workdir)
            .with_context(|| format!("failed to create workdir {}", self.workdir.display()))?;

        info!(
            mode = %request.mode(),
            model = %self.model,
            max_turns = profile.max_turns,
            "spawning claude subprocess"
        );

        let mut child = Command::new(&self.claude_bin)
            .args(self.args(request, &profile))
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn claude: {}", self.claude_bin))?;

        let stdout = child.stdout.take().context("failed to take stdout")?;
        let stderr = child.stderr.take().context("failed to take stderr")?;

        let stderr_reader = thread::Builder::new()
            .name("claude-stderr".into())
            .spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    if !line.is_empty() {
                        warn!("claude stderr: {}", line);
                    }
                }
            })
            .context("failed to spawn stderr reader")?;

        let child = Arc::new(Mutex::new(child));
        let finished = Arc::new(AtomicBool::new(false));
        let watcher = spawn_cancel_watcher(Arc::clone(&child), cancel.clone(), Arc::clone(&finished))?;

        let mut collector = StreamCollector::new();
        for line in BufReader::new(stdout).lines() {
            let line = line.context("error reading claude stdout")?;
            let Some(event) = collector.feed(&line) else {
                continue;
            };
            if let Some(sink) = events.as_deref_mut() {
                for progress in event.to_progress() {
                    sink.emit(progress);
                }
            }
        }

        finished.store(true, Ordering::SeqCst);
        let _ = watcher.join();
        let _ = stderr_reader.join();
        let status = child
            .lock()
            .map_err(|_| anyhow::anyhow!("claude process handle poisoned"))?
            .wait()
            .context("failed to wait for claude")?;

        if cancel.is_cancelled() {
            bail!("research cancelled");
        }

        let saw_result = collector.saw_result();
        let outcome = collector.finish();
        info!(
            success = status.success(),
            session_id = ?outcome.session_id,
            num_turns = ?outcome.num_turns,
            output_len = outcome.output.len(),
            "claude subprocess finished"
        );

        if outcome.is_error {
            bail!("claude reported an error: {}", outcome.output.trim());
        }
        if !status.success() && !saw_result {
            bail!("claude exited with {status}");
        }
        Ok(strip_fences(&outcome.output).to_string())
    }
}

/// Kills the child once `cancel` fires; exits when `finished` is set.
fn spawn_cancel_watcher(
    child: Arc<Mutex<Child>>,
    cancel: CancellationToken,
    finished: Arc<AtomicBool>,
) -> Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("claude-cancel".into())
        .spawn(move || {
            while !finished.load(Ordering::SeqCst) {
                if cancel.is_cancelled() {
                    if let Ok(mut child) = child.lock() {
                        debug!("killing claude subprocess after cancellation");
                        let _ = child.kill();
                    }
                    return;
                }
                thread::sleep(CANCEL_POLL);
            }
        })
        .context("failed to spawn cancel watcher")
}

impl ResearchEngine for ClaudeEngine {
    fn name(&self) -> &str {
        "claude"
    }

    fn research(&self, request: &ResearchRequest, cancel: &CancellationToken) -> Result<String> {
        self.run(request, cancel, None)
    }

    fn research_streaming(
        &self,
        request: &ResearchRequest,
        cancel: &CancellationToken,
        events: &mut dyn EventSink,
    ) -> Result<()> {
        events.emit(ProgressEvent::status(format!("Researching in {} mode", request.mode())));
        let output = self.run(request, cancel, Some(&mut *events))?;
        if !output.is_empty() {
            events.emit(ProgressEvent::complete(&ResearchResult::from_output(output)));
        }
        Ok(())
    }
}
