//! External coding-agent boundary.
//!
//! The engine drives code-writing through `AgentAdapter`, an abstraction
//! over "send a prompt, stream back text, get an exit status". Real
//! implementation: `ClaudeAdapter`, which spawns the agent CLI and streams
//! its stdout line by line. Tests substitute scripted doubles.
//!
//! The adapter's output is treated as unstructured text here; locating the
//! completion marker and criteria list inside it is the task executor's job.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tracing::debug;

/// Raw outcome of one adapter invocation.
#[derive(Debug, Clone)]
pub struct AgentOutput {
    /// Whether the process exited cleanly. Necessary but not sufficient for
    /// task success; the executor still validates the structured output.
    pub success: bool,
    /// Accumulated output text.
    pub output: String,
    /// Process exit code (-1 if killed).
    pub exit_code: i32,
    /// Wall-clock duration of the call.
    pub duration: Duration,
}

/// Callback invoked once per output chunk during streaming execution.
pub type ChunkHandler<'a> = &'a (dyn Fn(&str) + Send + Sync);

/// Abstraction over external agent execution for testability.
/// Real implementation: `ClaudeAdapter`. Tests use scripted doubles.
#[async_trait]
pub trait AgentAdapter: Send + Sync {
    /// Run the prompt to completion, discarding intermediate chunks.
    async fn execute(&self, prompt: &str) -> Result<AgentOutput>;

    /// Run the prompt, invoking `on_chunk` for every output chunk.
    async fn execute_stream(&self, prompt: &str, on_chunk: ChunkHandler<'_>)
    -> Result<AgentOutput>;

    /// Signal the in-flight call to stop. Cooperative; the current call
    /// settles promptly with `success = false`.
    fn abort(&self);

    /// Whether a call is currently in flight.
    fn is_running(&self) -> bool;
}

/// Subset of the agent CLI's stream-json output we care about: the final
/// result record. Everything else is passed through as raw text.
#[derive(Debug, serde::Deserialize)]
#[serde(tag = "type")]
enum StreamLine {
    #[serde(rename = "result")]
    Result {
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Other,
}

/// Configuration for the agent CLI subprocess.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Command to spawn (e.g. "claude").
    pub command: String,
    /// Extra flags passed before the prompt.
    pub args: Vec<String>,
    /// Working directory for the agent (the project under construction).
    pub working_dir: PathBuf,
}

impl AgentConfig {
    pub fn new(command: &str, working_dir: PathBuf) -> Self {
        Self {
            command: command.to_string(),
            args: Vec::new(),
            working_dir,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }
}

/// Clears the running flag even when the owning future is dropped
/// mid-stream (a timed-out attempt cancels `run` without resuming it).
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Drives the agent CLI: prompt via stdin, line-streamed stdout.
pub struct ClaudeAdapter {
    config: AgentConfig,
    child: Mutex<Option<Child>>,
    aborted: AtomicBool,
    running: AtomicBool,
}

impl ClaudeAdapter {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            child: Mutex::new(None),
            aborted: AtomicBool::new(false),
            running: AtomicBool::new(false),
        }
    }

    async fn run(&self, prompt: &str, on_chunk: ChunkHandler<'_>) -> Result<AgentOutput> {
        let start = Instant::now();
        self.aborted.store(false, Ordering::SeqCst);

        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .current_dir(&self.config.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn().context("Failed to spawn agent process")?;
        debug!(command = %self.config.command, pid = child.id(), "agent spawned");

        if let Some(mut stdin) = child.stdin.take() {
            // The agent may exit without reading the prompt; that shows up
            // in the exit status, not as a write error here.
            stdin.write_all(prompt.as_bytes()).await.ok();
            stdin.shutdown().await.ok();
        }

        let stdout = child.stdout.take().context("Failed to capture agent stdout")?;
        let mut reader = BufReader::new(stdout).lines();

        {
            let mut slot = self.child.lock().expect("child lock poisoned");
            *slot = Some(child);
        }
        self.running.store(true, Ordering::SeqCst);
        let _running = RunningGuard(&self.running);

        let mut accumulated = String::new();
        let mut final_result: Option<String> = None;
        let mut stream_error = false;

        while let Some(line) = reader.next_line().await? {
            if line.is_empty() {
                continue;
            }
            on_chunk(&line);

            match serde_json::from_str::<StreamLine>(&line) {
                Ok(StreamLine::Result { result, is_error }) => {
                    final_result = result;
                    stream_error = is_error;
                }
                Ok(StreamLine::Other) => {
                    accumulated.push_str(&line);
                    accumulated.push('\n');
                }
                Err(_) => {
                    // Plain text output, not stream-json.
                    accumulated.push_str(&line);
                    accumulated.push('\n');
                }
            }
        }

        let child = {
            let mut slot = self.child.lock().expect("child lock poisoned");
            slot.take()
        };
        let status = match child {
            Some(mut child) => Some(child.wait().await.context("Failed to reap agent process")?),
            None => None,
        };

        let exit_code = status.and_then(|s| s.code()).unwrap_or(-1);
        let aborted = self.aborted.load(Ordering::SeqCst);
        let output = final_result.unwrap_or(accumulated);

        Ok(AgentOutput {
            success: exit_code == 0 && !stream_error && !aborted,
            output,
            exit_code,
            duration: start.elapsed(),
        })
    }
}

#[async_trait]
impl AgentAdapter for ClaudeAdapter {
    async fn execute(&self, prompt: &str) -> Result<AgentOutput> {
        self.run(prompt, &|_| {}).await
    }

    async fn execute_stream(
        &self,
        prompt: &str,
        on_chunk: ChunkHandler<'_>,
    ) -> Result<AgentOutput> {
        self.run(prompt, on_chunk).await
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        // Take the child out of the slot: if the run future was already
        // dropped (timeout), nothing else will ever reap it. The tokio
        // runtime reaps a killed Child on drop.
        let child = {
            let mut slot = self.child.lock().expect("child lock poisoned");
            slot.take()
        };
        if let Some(mut child) = child {
            child.start_kill().ok();
        }
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
