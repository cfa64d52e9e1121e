//! Child process lifecycle: spawn, input, signals, exit, forced kill.
//!
//! At most one process is active per supervisor. Every child is started in
//! its own process group so termination reaches anything it forked.

use crate::error::{BridgeError, BridgeResult};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

/// Grace period between SIGTERM and SIGKILL in [`ProcessSupervisor::terminate`].
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(1);

/// Upper bound on one [`ProcessSupervisor::write_line`] call.
pub const DEFAULT_INPUT_TIMEOUT: Duration = Duration::from_secs(5);

/// What to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Whether the child gets a writable stdin pipe (otherwise /dev/null).
    pub stdin: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: true,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// `shell -c line`, with no stdin.
    pub fn shell(shell: impl Into<String>, line: impl Into<String>) -> Self {
        Self {
            program: shell.into(),
            args: vec!["-c".to_string(), line.into()],
            stdin: false,
        }
    }

    /// Program and arguments joined with spaces, for display.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Application-level keys understood by the supervised program.
///
/// These travel over stdin as plain lines; they are not OS signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keystroke {
    Enter,
    Refresh,
    CtrlC,
}

impl Keystroke {
    pub fn token(self) -> &'static str {
        match self {
            Keystroke::Enter => "enter",
            Keystroke::Refresh => "refresh",
            Keystroke::CtrlC => "ctrlc",
        }
    }
}

/// Argument to [`ProcessSupervisor::signal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// SIGTERM to the whole process group.
    Graceful,
    /// SIGKILL to the whole process group.
    Forceful,
    /// A synthetic key written to stdin.
    Keystroke(Keystroke),
}

/// Resolves to the exit code once the child is gone.
#[derive(Debug, Clone)]
pub struct ExitWatch(watch::Receiver<Option<i32>>);

impl ExitWatch {
    /// Exit code if the process has already exited.
    pub fn code(&self) -> Option<i32> {
        *self.0.borrow()
    }

    /// Wait for the exit code.
    pub async fn wait(&mut self) -> i32 {
        if self.0.wait_for(Option::is_some).await.is_err() {
            warn!("exit watcher dropped before reporting a code");
        }
        self.code().unwrap_or(-1)
    }
}

/// Handle returned by a successful spawn.
///
/// Carries the output pipes; the supervisor keeps stdin.
#[derive(Debug)]
pub struct SupervisedProcess {
    pub pid: u32,
    pub generation: u64,
    pub stdout: Option<ChildStdout>,
    pub stderr: Option<ChildStderr>,
    pub exit: ExitWatch,
}

/// The most recently spawned child. Stays in place after it exits so the
/// exit code and its process group remain reachable.
struct ActiveProcess {
    generation: u64,
    pid: u32,
    /// Locked separately from the slot; a stalled write must not hold the slot.
    stdin: Arc<Mutex<Option<ChildStdin>>>,
    exit: ExitWatch,
}

impl ActiveProcess {
    fn has_exited(&self) -> bool {
        self.exit.code().is_some()
    }
}

/// Owns at most one running child process.
pub struct ProcessSupervisor {
    active: Mutex<Option<ActiveProcess>>,
    next_generation: AtomicU64,
    kill_grace: Duration,
    input_timeout: Duration,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new(DEFAULT_KILL_GRACE)
    }
}

impl ProcessSupervisor {
    pub fn new(kill_grace: Duration) -> Self {
        Self {
            active: Mutex::new(None),
            next_generation: AtomicU64::new(1),
            kill_grace,
            input_timeout: DEFAULT_INPUT_TIMEOUT,
        }
    }

    pub fn with_input_timeout(mut self, input_timeout: Duration) -> Self {
        self.input_timeout = input_timeout;
        self
    }

    /// Start a child in a new process group.
    ///
    /// Fails with [`BridgeError::AlreadyRunning`] while another child is alive;
    /// the running child is left untouched.
    pub async fn spawn(&self, spec: &CommandSpec) -> BridgeResult<SupervisedProcess> {
        let mut slot = self.active.lock().await;
        if slot.as_ref().is_some_and(|a| !a.has_exited()) {
            return Err(BridgeError::AlreadyRunning);
        }

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(if spec.stdin {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| BridgeError::Spawn(format!("{}: {e}", spec.program)))?;
        let pid = child
            .id()
            .ok_or_else(|| BridgeError::Spawn(format!("{}: exited immediately", spec.program)))?;

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (exit_tx, exit_rx) = watch::channel(None);
        let exit = ExitWatch(exit_rx);

        tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => exit_code(status),
                Err(e) => {
                    warn!(pid, error = %e, "failed to wait for child");
                    -1
                }
            };
            info!(pid, code, "child exited");
            let _ = exit_tx.send(Some(code));
        });

        info!(pid, generation, command = %spec.display(), "child spawned");
        *slot = Some(ActiveProcess {
            generation,
            pid,
            stdin: Arc::new(Mutex::new(stdin)),
            exit: exit.clone(),
        });

        Ok(SupervisedProcess {
            pid,
            generation,
            stdout,
            stderr,
            exit,
        })
    }

    /// PID of the running child, if any.
    pub async fn pid(&self) -> Option<u32> {
        let slot = self.active.lock().await;
        slot.as_ref().filter(|a| !a.has_exited()).map(|a| a.pid)
    }

    pub async fn is_running(&self) -> bool {
        self.pid().await.is_some()
    }

    /// Write `text` plus a newline to the child's stdin.
    ///
    /// A child that stops reading makes this fail with
    /// [`BridgeError::Timeout`] once the input timeout passes. Signals and
    /// termination are never held up by a pending write.
    pub async fn write_line(&self, text: &str) -> BridgeResult<()> {
        let (pid, stdin) = {
            let slot = self.active.lock().await;
            let active = slot.as_ref().ok_or(BridgeError::NotRunning)?;
            if active.has_exited() {
                return Err(BridgeError::BrokenPipe);
            }
            (active.pid, Arc::clone(&active.stdin))
        };

        let mut data = Vec::with_capacity(text.len() + 1);
        data.extend_from_slice(text.as_bytes());
        data.push(b'\n');

        match tokio::time::timeout(self.input_timeout, write_stdin(&stdin, &data)).await {
            Ok(Ok(())) => {
                debug!(pid, input = %text, "wrote line to child");
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(pid, bytes = data.len(), "child is not reading its input");
                Err(BridgeError::Timeout(self.input_timeout))
            }
        }
    }

    /// Deliver a termination signal to the process group, or a keystroke to stdin.
    pub async fn signal(&self, kind: SignalKind) -> BridgeResult<()> {
        let signal = match kind {
            SignalKind::Keystroke(key) => return self.write_line(key.token()).await,
            SignalKind::Graceful => Signal::SIGTERM,
            SignalKind::Forceful => Signal::SIGKILL,
        };
        let pid = self.pid().await.ok_or(BridgeError::NotRunning)?;
        signal_group(pid, signal)
    }

    /// SIGTERM, wait for the default grace period, then SIGKILL.
    ///
    /// Returns whether a process was running. With no running process this
    /// is a no-op and sends nothing.
    pub async fn terminate(&self) -> BridgeResult<bool> {
        self.terminate_with_grace(self.kill_grace).await
    }

    /// [`terminate`](Self::terminate) with an explicit grace period.
    pub async fn terminate_with_grace(&self, grace: Duration) -> BridgeResult<bool> {
        let (pid, mut exit) = {
            let slot = self.active.lock().await;
            match slot.as_ref().filter(|a| !a.has_exited()) {
                Some(active) => (active.pid, active.exit.clone()),
                None => return Ok(false),
            }
        };

        info!(pid, "terminating child");
        signal_group(pid, Signal::SIGTERM)?;
        if tokio::time::timeout(grace, exit.wait()).await.is_ok() {
            return Ok(true);
        }

        warn!(pid, "child ignored SIGTERM, sending SIGKILL");
        signal_group(pid, Signal::SIGKILL)?;
        if tokio::time::timeout(grace.max(DEFAULT_KILL_GRACE), exit.wait())
            .await
            .is_err()
        {
            warn!(pid, "child still not reaped after SIGKILL");
        }
        Ok(true)
    }

    /// SIGKILL the process group of child `generation`, even when its leader
    /// has already exited and left descendants behind.
    ///
    /// Returns false when a newer child has replaced that one.
    pub async fn kill_group(&self, generation: u64) -> BridgeResult<bool> {
        let pid = {
            let slot = self.active.lock().await;
            match slot.as_ref().filter(|a| a.generation == generation) {
                Some(active) => active.pid,
                None => return Ok(false),
            }
        };
        info!(pid, generation, "killing process group");
        signal_group(pid, Signal::SIGKILL)?;
        Ok(true)
    }

    /// Wait for the exit code of the most recently spawned child. Resolves
    /// at once when that child has already exited.
    ///
    /// This only observes the process. Draining its output is the
    /// relay's job; see [`crate::relay::OutputRelay::run`].
    pub async fn wait(&self) -> BridgeResult<i32> {
        let mut exit = {
            let slot = self.active.lock().await;
            slot.as_ref()
                .map(|a| a.exit.clone())
                .ok_or(BridgeError::NotRunning)?
        };
        Ok(exit.wait().await)
    }
}

/// Write `data` under the stdin lock alone.
async fn write_stdin(stdin: &Mutex<Option<ChildStdin>>, data: &[u8]) -> BridgeResult<()> {
    let mut guard = stdin.lock().await;
    let pipe = guard.as_mut().ok_or(BridgeError::BrokenPipe)?;
    let written = match pipe.write_all(data).await {
        Ok(()) => pipe.flush().await,
        Err(e) => Err(e),
    };
    match written {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
            *guard = None;
            Err(BridgeError::BrokenPipe)
        }
        Err(e) => Err(BridgeError::Io(e)),
    }
}

/// Send `signal` to the process group led by `pid`. A group that is already
/// gone is not an error.
fn signal_group(pid: u32, signal: Signal) -> BridgeResult<()> {
    let raw = i32::try_from(pid).map_err(|_| BridgeError::Other(format!("invalid pid {pid}")))?;
    if raw <= 1 {
        return Err(BridgeError::Other(format!("refusing to signal pid {raw}")));
    }
    match killpg(Pid::from_raw(raw), signal) {
        Ok(()) => {
            debug!(pid, ?signal, "signalled process group");
            Ok(())
        }
        Err(nix::errno::Errno::ESRCH) => {
            debug!(pid, ?signal, "process group already gone");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Exit code, or the negated signal number for a signal-killed child.
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|s| -s))
        .unwrap_or(-1)
}
