// ABOUTME: Spawns the agent CLI for one prompt, drains its output concurrently, enforces the
// execution deadline, and supports cooperative stop via SIGTERM-then-SIGKILL

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::AGENT_EXECUTION_TIMEOUT;
use crate::events::EventEmitter;
use crate::runner::output::{AgentOutput, ContentBlock};

/// Grace period between SIGTERM and SIGKILL on stop.
const STOP_GRACE: Duration = Duration::from_millis(500);

/// Bound on draining remaining output after the agent process exits. A
/// grandchild that inherited the pipes can hold them open past the exit;
/// the readers are abandoned once this lapses.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Stderr prefix length carried into a failure summary.
const STDERR_SUMMARY_LIMIT: usize = 500;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("execution timed out after {0:?}")]
    ExecutionTimeout(Duration),
    #[error("agent process error: {0}")]
    Process(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    Running,
    Completed,
    TimedOut,
    Stopped,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    TimedOut,
    Stopped,
    Failed,
}

/// Outcome of one prompt execution.
#[derive(Debug)]
pub struct RunResult {
    pub success: bool,
    pub outcome: RunOutcome,
    pub exit_code: Option<i32>,
    pub output: String,
    pub stderr: String,
}

/// Cloneable handle that requests cooperative cancellation of the current
/// prompt. Safe to call from another task while `run_prompt` is in flight.
#[derive(Clone, Default)]
pub struct StopHandle {
    requested: Arc<AtomicBool>,
    pid: Arc<Mutex<Option<u32>>>,
}

impl StopHandle {
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.requested.store(false, Ordering::SeqCst);
    }

    fn set_pid(&self, pid: Option<u32>) {
        if let Ok(mut guard) = self.pid.lock() {
            *guard = pid;
        }
    }

    fn current_pid(&self) -> Option<u32> {
        self.pid.lock().ok().and_then(|guard| *guard)
    }

    /// Set the stop flag, send SIGTERM, wait briefly, then SIGKILL if the
    /// process is still alive. The readers observe the flag and stop
    /// forwarding further output.
    pub async fn stop(&self) {
        self.requested.store(true, Ordering::SeqCst);
        let Some(raw_pid) = self.current_pid() else {
            return;
        };
        let pid = Pid::from_raw(raw_pid as i32);

        if kill(pid, Signal::SIGTERM).is_err() {
            // Already gone.
            return;
        }
        tokio::time::sleep(STOP_GRACE).await;
        if kill(pid, None).is_ok() {
            warn!("Agent process ignored SIGTERM, sending SIGKILL");
            let _ = kill(pid, Signal::SIGKILL);
        }
    }
}

enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Supervises one agent subprocess per prompt. Only one prompt may run at a
/// time; the `&mut self` receiver serializes callers.
pub struct AgentRunner {
    workspace_path: PathBuf,
    agent_binary: PathBuf,
    model: String,
    execution_timeout: Duration,
    emitter: Arc<EventEmitter>,
    stop: StopHandle,
    state: RunnerState,
}

impl AgentRunner {
    pub fn new(
        workspace_path: PathBuf,
        agent_binary: PathBuf,
        model: impl Into<String>,
        emitter: Arc<EventEmitter>,
    ) -> Self {
        Self {
            workspace_path,
            agent_binary,
            model: model.into(),
            execution_timeout: AGENT_EXECUTION_TIMEOUT,
            emitter,
            stop: StopHandle::default(),
            state: RunnerState::Idle,
        }
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    /// Handle for cancelling the in-flight prompt from another task.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Execute one prompt to completion. Always resolves to a `RunResult`;
    /// failures surface as emitted error events, never as a crash.
    pub async fn run_prompt(&mut self, prompt: &str, message_id: Option<&str>) -> RunResult {
        self.stop.reset();
        self.state = RunnerState::Running;

        let result = match self.supervise(prompt, message_id).await {
            Ok(result) => result,
            Err(err) => {
                warn!("Agent execution failed: {err}");
                self.emitter.error(&err.to_string(), message_id).await;
                RunResult {
                    success: false,
                    outcome: match err {
                        RunnerError::ExecutionTimeout(_) => RunOutcome::TimedOut,
                        RunnerError::Process(_) => RunOutcome::Failed,
                    },
                    exit_code: None,
                    output: String::new(),
                    stderr: String::new(),
                }
            }
        };

        self.state = match result.outcome {
            RunOutcome::Completed => RunnerState::Completed,
            RunOutcome::TimedOut => RunnerState::TimedOut,
            RunOutcome::Stopped => RunnerState::Stopped,
            RunOutcome::Failed => RunnerState::Failed,
        };
        result
    }

    async fn supervise(
        &mut self,
        prompt: &str,
        message_id: Option<&str>,
    ) -> Result<RunResult, RunnerError> {
        let mut child = Command::new(&self.agent_binary)
            .arg("--print")
            .args(["--output-format", "stream-json"])
            .args(["--model", &self.model])
            .arg(prompt)
            .current_dir(&self.workspace_path)
            .env("CLAUDE_CODE_NO_INTERACTIVE", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        self.stop.set_pid(child.id());
        info!("Agent process started for prompt execution");

        let stdout = child.stdout.take().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::Other, "agent stdout not captured")
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::Other, "agent stderr not captured")
        })?;

        let (line_tx, mut line_rx) = mpsc::unbounded_channel();
        let stdout_reader =
            spawn_reader(stdout, line_tx.clone(), self.stop.clone(), OutputLine::Stdout);
        let stderr_reader = spawn_reader(stderr, line_tx, self.stop.clone(), OutputLine::Stderr);

        let deadline = Instant::now() + self.execution_timeout;
        let mut stdout_lines: Vec<String> = Vec::new();
        let mut stderr_lines: Vec<String> = Vec::new();
        let mut exit_status = None;
        let mut readers_done = false;
        // Armed once the process exits; EOF may never arrive if a grandchild
        // kept the pipes open, so the drain must not wait on it.
        let mut drain_deadline: Option<Instant> = None;

        loop {
            if readers_done && exit_status.is_some() {
                break;
            }
            tokio::select! {
                line = line_rx.recv(), if !readers_done => match line {
                    Some(OutputLine::Stdout(text)) => {
                        self.handle_stdout_line(&text, message_id).await;
                        stdout_lines.push(text);
                    }
                    Some(OutputLine::Stderr(text)) => stderr_lines.push(text),
                    None => readers_done = true,
                },
                status = child.wait(), if exit_status.is_none() => {
                    exit_status = Some(status?);
                    drain_deadline = Some(Instant::now() + OUTPUT_DRAIN_GRACE);
                }
                () = tokio::time::sleep_until(drain_deadline.unwrap_or(deadline)),
                    if drain_deadline.is_some() && !readers_done =>
                {
                    warn!(
                        "Agent output not drained within {:?} of exit, abandoning readers",
                        OUTPUT_DRAIN_GRACE
                    );
                    stdout_reader.abort();
                    stderr_reader.abort();
                    readers_done = true;
                }
                () = tokio::time::sleep_until(deadline), if exit_status.is_none() => {
                    warn!("Agent execution exceeded {:?}, killing process", self.execution_timeout);
                    let _ = child.kill().await;
                    stdout_reader.abort();
                    stderr_reader.abort();
                    self.stop.set_pid(None);
                    let err = RunnerError::ExecutionTimeout(self.execution_timeout);
                    self.emitter.error(&err.to_string(), message_id).await;
                    // No execution_complete on the timeout path.
                    return Ok(RunResult {
                        success: false,
                        outcome: RunOutcome::TimedOut,
                        exit_code: None,
                        output: stdout_lines.join("\n"),
                        stderr: stderr_lines.join("\n"),
                    });
                }
            }
        }

        self.stop.set_pid(None);
        let status = exit_status.ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::Other, "agent exit status missing")
        })?;
        let success = status.code() == Some(0);
        let stderr_joined = stderr_lines.join("\n");

        let summary = if success {
            "Prompt completed".to_string()
        } else if stderr_joined.is_empty() {
            "Prompt failed".to_string()
        } else {
            let prefix: String = stderr_joined.chars().take(STDERR_SUMMARY_LIMIT).collect();
            format!("Prompt failed: {prefix}")
        };
        self.emitter
            .execution_complete(success, Some(&summary), message_id)
            .await;

        let outcome = if success {
            RunOutcome::Completed
        } else if self.stop.is_requested() {
            RunOutcome::Stopped
        } else {
            RunOutcome::Failed
        };

        Ok(RunResult {
            success,
            outcome,
            exit_code: status.code(),
            output: stdout_lines.join("\n"),
            stderr: stderr_joined,
        })
    }

    /// Turn one stdout line into exactly one emitted event (or a debug log
    /// for recognized-but-unclassified JSON). Non-JSON lines are forwarded
    /// verbatim as token events, never dropped silently.
    async fn handle_stdout_line(&self, line: &str, message_id: Option<&str>) {
        let value: serde_json::Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(_) => {
                self.emitter.token(line, message_id).await;
                return;
            }
        };

        match serde_json::from_value::<AgentOutput>(value) {
            Ok(AgentOutput::Assistant { message }) => {
                for block in message.content {
                    match block {
                        ContentBlock::Text { text } => {
                            self.emitter.token(&text, message_id).await;
                        }
                        ContentBlock::ToolUse { name, input } => {
                            self.emitter.tool_call(&name, input, message_id).await;
                        }
                        ContentBlock::Other => {
                            debug!("Skipping unclassified assistant content block");
                        }
                    }
                }
            }
            Ok(AgentOutput::ToolUse { name, input }) => {
                self.emitter
                    .tool_call(name.as_deref().unwrap_or("unknown"), input, message_id)
                    .await;
            }
            Ok(AgentOutput::ToolResult {
                name,
                output,
                error,
            }) => {
                self.emitter
                    .tool_result(
                        name.as_deref().unwrap_or("unknown"),
                        output.unwrap_or(serde_json::Value::Null),
                        error,
                        message_id,
                    )
                    .await;
            }
            Ok(AgentOutput::Error { error }) => {
                self.emitter
                    .error(error.as_deref().unwrap_or("Unknown error"), message_id)
                    .await;
            }
            Ok(AgentOutput::Other) => {
                debug!("Unclassified agent output line: {line}");
            }
            Err(err) => {
                debug!("Agent output JSON without usable discriminator: {err}");
            }
        }
    }
}

/// Drain one output pipe line-by-line into the shared channel. Stops
/// forwarding once the cooperative stop flag is raised or the channel side
/// is gone; the channel closes when both readers finish or are aborted.
fn spawn_reader<R>(
    pipe: R,
    tx: mpsc::UnboundedSender<OutputLine>,
    stop: StopHandle,
    wrap: fn(String) -> OutputLine,
) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if stop.is_requested() {
                break;
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if tx.send(wrap(trimmed.to_string())).is_err() {
                break;
            }
        }
    })
}
