//! Ad-hoc shell commands issued from shell mode.
//!
//! One command runs at a time. A one-shot command is hard-capped and its
//! whole output is reported when it ends; a persistent command runs until it
//! exits or is cancelled and its output is only captured for replay.

use crate::accumulator::{OutputAccumulator, Tail};
use crate::error::{BridgeError, BridgeResult};
use crate::supervisor::{CommandSpec, ExitWatch, ProcessSupervisor};
use crate::transport::{notify, Menu, SharedTransport};
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tracing::{debug, info, warn};

/// Hard cap for one-shot commands.
pub const DEFAULT_ONESHOT_TIMEOUT: Duration = Duration::from_secs(60);

/// Grace between SIGTERM and SIGKILL when the operator cancels a command.
pub const CANCEL_GRACE: Duration = Duration::from_millis(500);

/// Lines and characters shown by a refresh.
pub const REFRESH_TAIL: (usize, usize) = (60, 4000);

/// Lines and characters shown after a cancel.
pub const CANCEL_TAIL: (usize, usize) = (30, 3000);

const TRUNCATED: &str = "\n... (truncated)";
const NO_OUTPUT: &str = "(command finished, no output)";
const CAPTURE_JOIN_TIMEOUT: Duration = Duration::from_secs(3);

/// How shell-mode commands are executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShellVariant {
    /// Run to completion under a timeout and report all output at once.
    #[default]
    Oneshot,
    /// Run unbounded, capture output for refresh, cancel on demand.
    Persistent,
}

#[derive(Debug, Clone)]
pub struct ShellConfig {
    pub shell: String,
    pub variant: ShellVariant,
    pub timeout: Duration,
    pub max_chars: usize,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            shell: "/bin/sh".to_string(),
            variant: ShellVariant::default(),
            timeout: DEFAULT_ONESHOT_TIMEOUT,
            max_chars: crate::batcher::DEFAULT_MAX_CHARS,
        }
    }
}

/// Runs shell-mode commands and keeps their recent output.
pub struct ShellRunner {
    config: ShellConfig,
    supervisor: Arc<ProcessSupervisor>,
    accumulator: Arc<Mutex<OutputAccumulator>>,
    transport: SharedTransport,
}

impl ShellRunner {
    pub fn new(config: ShellConfig, transport: SharedTransport) -> Self {
        Self {
            config,
            supervisor: Arc::new(ProcessSupervisor::default()),
            accumulator: Arc::new(Mutex::new(OutputAccumulator::default())),
            transport,
        }
    }

    pub fn variant(&self) -> ShellVariant {
        self.config.variant
    }

    /// PID of the running command, if any.
    pub async fn running(&self) -> Option<u32> {
        self.supervisor.pid().await
    }

    /// Start `line` under the configured shell. Completion is reported to the
    /// operator from a background task.
    pub async fn submit(&self, line: &str) -> BridgeResult<u32> {
        let spec = CommandSpec::shell(&self.config.shell, line);
        if self.config.variant == ShellVariant::Persistent && !self.supervisor.is_running().await {
            self.lock_accumulator().clear();
        }
        let process = self.supervisor.spawn(&spec).await?;
        let pid = process.pid;
        info!(pid, command = %line, variant = ?self.config.variant, "shell command started");

        let generation = process.generation;
        let stdout = process.stdout;
        let stderr = process.stderr;
        let exit = process.exit;
        match self.config.variant {
            ShellVariant::Oneshot => {
                tokio::spawn(run_oneshot(
                    Arc::clone(&self.supervisor),
                    generation,
                    stdout,
                    stderr,
                    exit,
                    self.config.clone(),
                    self.transport.clone(),
                ));
            }
            ShellVariant::Persistent => {
                tokio::spawn(run_persistent(
                    stdout,
                    stderr,
                    exit,
                    Arc::clone(&self.accumulator),
                    self.transport.clone(),
                ));
            }
        }
        Ok(pid)
    }

    /// Stop the running command quickly. Returns whether one was running.
    pub async fn cancel(&self) -> BridgeResult<bool> {
        self.supervisor.terminate_with_grace(CANCEL_GRACE).await
    }

    /// Stop the running command with the regular grace period.
    pub async fn terminate(&self) -> BridgeResult<bool> {
        self.supervisor.terminate().await
    }

    /// Recent captured output.
    pub fn tail(&self, (max_lines, max_chars): (usize, usize)) -> Option<Tail> {
        self.lock_accumulator().tail(max_lines, max_chars)
    }

    fn lock_accumulator(&self) -> std::sync::MutexGuard<'_, OutputAccumulator> {
        self.accumulator
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn run_oneshot<O, E>(
    supervisor: Arc<ProcessSupervisor>,
    generation: u64,
    stdout: Option<O>,
    stderr: Option<E>,
    mut exit: ExitWatch,
    config: ShellConfig,
    transport: SharedTransport,
) where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let collect = async {
        let (out, err) = tokio::join!(read_to_end(stdout), read_to_end(stderr));
        let code = exit.wait().await;
        (out, err, code)
    };

    let timeout = config.timeout;
    let finished = tokio::time::timeout(timeout, collect)
        .await
        .map_err(|_| BridgeError::Timeout(timeout));
    let text = match finished {
        Ok((out, err, code)) => {
            debug!(code, "one-shot command finished");
            format_oneshot(&out, &err, code, config.max_chars)
        }
        Err(e) => {
            warn!(generation, error = %e, "one-shot command timed out, killing");
            // The shell may be gone while its children still hold the pipes.
            if let Err(kill) = supervisor.kill_group(generation).await {
                warn!(generation, error = %kill, "failed to kill timed-out command");
            }
            if tokio::time::timeout(CANCEL_GRACE * 4, exit.wait()).await.is_err() {
                warn!("timed-out command not reaped after SIGKILL");
            }
            format!("⏰ Command {e}")
        }
    };
    notify(transport.as_ref(), &text, Some(Menu::Shell)).await;
}

async fn run_persistent<O, E>(
    stdout: Option<O>,
    stderr: Option<E>,
    mut exit: ExitWatch,
    accumulator: Arc<Mutex<OutputAccumulator>>,
    transport: SharedTransport,
) where
    O: AsyncRead + Unpin + Send + 'static,
    E: AsyncRead + Unpin + Send + 'static,
{
    let mut captures = Vec::with_capacity(2);
    if let Some(out) = stdout {
        captures.push(tokio::spawn(capture(out, Arc::clone(&accumulator))));
    }
    if let Some(err) = stderr {
        captures.push(tokio::spawn(capture(err, Arc::clone(&accumulator))));
    }

    let code = exit.wait().await;
    let deadline = tokio::time::Instant::now() + CAPTURE_JOIN_TIMEOUT;
    for mut task in captures {
        if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
            task.abort();
        }
    }
    info!(code, "persistent shell command exited");
    notify(
        transport.as_ref(),
        &format!("✅ Command exited with code {code}"),
        Some(Menu::Shell),
    )
    .await;
}

/// Copy lines from `reader` into the shared accumulator until EOF.
async fn capture<R: AsyncRead + Unpin>(reader: R, accumulator: Arc<Mutex<OutputAccumulator>>) {
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => accumulator
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .write(&line),
            Err(e) => {
                warn!(error = %e, "shell output capture failed");
                break;
            }
        }
    }
}

async fn read_to_end<R: AsyncRead + Unpin>(reader: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        if let Err(e) = reader.read_to_end(&mut buf).await {
            warn!(error = %e, "failed to read command output");
        }
    }
    buf
}

/// Render one-shot output: stdout, then stderr under a marker, cut to
/// `max_chars` overall.
pub fn format_oneshot(stdout: &[u8], stderr: &[u8], code: i32, max_chars: usize) -> String {
    let mut body = String::from_utf8_lossy(stdout).into_owned();
    if !stderr.is_empty() {
        body.push_str("\n[STDERR]\n");
        body.push_str(&String::from_utf8_lossy(stderr));
    }
    let body = body.trim_end();
    let body = if body.trim().is_empty() { NO_OUTPUT } else { body };

    let footer = if code == 0 {
        String::new()
    } else {
        format!("\n[exit code {code}]")
    };

    let budget = max_chars.saturating_sub(footer.chars().count());
    let mut out = if body.chars().count() > budget {
        let keep = budget.saturating_sub(TRUNCATED.chars().count());
        let mut cut: String = body.chars().take(keep).collect();
        cut.push_str(TRUNCATED);
        cut
    } else {
        body.to_string()
    };
    out.push_str(&footer);
    out
}
