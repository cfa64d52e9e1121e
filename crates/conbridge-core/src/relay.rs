//! Forwards a supervised process's output to the operator.
//!
//! One drain task per pipe feeds a [`StreamBatcher`] and ships each batch
//! through the transport. Exit waiting runs alongside the drains; the exit
//! code is only handed back once the drains finished (or were given up on),
//! so the completion notice never overtakes trailing output.

use crate::batcher::{BatchConfig, StreamBatcher, StreamSource};
use crate::supervisor::SupervisedProcess;
use crate::transport::SharedTransport;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Prefix that marks batches read from the child's stderr.
pub const ERROR_PREFIX: &str = "⚠️ stderr:\n";

/// How long drains may keep running after the child exited.
pub const DEFAULT_DRAIN_JOIN_TIMEOUT: Duration = Duration::from_secs(3);

pub struct OutputRelay {
    transport: SharedTransport,
    batch: BatchConfig,
    drain_join_timeout: Duration,
}

impl OutputRelay {
    pub fn new(transport: SharedTransport, batch: BatchConfig) -> Self {
        Self {
            transport,
            batch,
            drain_join_timeout: DEFAULT_DRAIN_JOIN_TIMEOUT,
        }
    }

    pub fn with_drain_join_timeout(mut self, timeout: Duration) -> Self {
        self.drain_join_timeout = timeout;
        self
    }

    /// Relay all output of `process` and return its exit code.
    pub async fn run(&self, mut process: SupervisedProcess) -> i32 {
        let mut drains = Vec::with_capacity(2);
        if let Some(stdout) = process.stdout.take() {
            drains.push(self.spawn_drain(stdout, StreamSource::Primary));
        }
        if let Some(stderr) = process.stderr.take() {
            drains.push(self.spawn_drain(stderr, StreamSource::Error));
        }

        let code = process.exit.wait().await;
        debug!(pid = process.pid, code, "child exited, joining output drains");

        let deadline = tokio::time::Instant::now() + self.drain_join_timeout;
        for mut drain in drains {
            match tokio::time::timeout_at(deadline, &mut drain).await {
                Ok(Ok(delivered)) => debug!(pid = process.pid, delivered, "drain finished"),
                Ok(Err(e)) => warn!(pid = process.pid, error = %e, "drain task failed"),
                Err(_) => {
                    warn!(pid = process.pid, "output still open after exit, abandoning drain");
                    drain.abort();
                }
            }
        }

        info!(pid = process.pid, code, "output relay finished");
        code
    }

    fn spawn_drain<R>(&self, reader: R, source: StreamSource) -> JoinHandle<usize>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let mut config = self.batch;
        if source == StreamSource::Error {
            config.max_chars = config
                .max_chars
                .saturating_sub(ERROR_PREFIX.chars().count())
                .max(1);
        }
        tokio::spawn(drain(reader, source, self.transport.clone(), config))
    }
}

/// Deliver every non-blank batch from `reader`. Returns the number delivered.
async fn drain<R>(reader: R, source: StreamSource, transport: SharedTransport, config: BatchConfig) -> usize
where
    R: AsyncRead + Unpin,
{
    let mut batcher = StreamBatcher::new(reader, source, config);
    let mut delivered = 0;
    while let Some(batch) = batcher.next_batch().await {
        if batch.is_blank() {
            continue;
        }
        let text = match source {
            StreamSource::Primary => batch.text(),
            StreamSource::Error => format!("{ERROR_PREFIX}{}", batch.text()),
        };
        match transport.send_text(&text, None).await {
            Ok(()) => delivered += 1,
            Err(e) => warn!(source = source.tag(), error = %e, "failed to deliver output batch"),
        }
    }
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::{CommandSpec, ProcessSupervisor};
    use crate::transport::testing::RecordingTransport;
    use std::sync::atomic::Ordering;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh").args(["-c", script])
    }

    fn fast() -> BatchConfig {
        BatchConfig {
            quiet_period: Duration::from_millis(200),
            ..BatchConfig::default()
        }
    }

    #[tokio::test]
    async fn output_arrives_before_exit_code() {
        let transport = RecordingTransport::new();
        let sup = ProcessSupervisor::default();
        let proc = sup.spawn(&sh("echo hello; sleep 3; exit 0")).await.unwrap();

        let relay = OutputRelay::new(transport.clone(), BatchConfig::default());
        let code = relay.run(proc).await;
        assert_eq!(code, 0);
        assert_eq!(transport.texts(), vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn stderr_batches_are_tagged() {
        let transport = RecordingTransport::new();
        let sup = ProcessSupervisor::default();
        let proc = sup.spawn(&sh("echo out; echo err >&2; exit 4")).await.unwrap();

        let code = OutputRelay::new(transport.clone(), fast()).run(proc).await;
        assert_eq!(code, 4);

        let texts = transport.texts();
        assert!(texts.contains(&"out".to_string()));
        assert!(texts.contains(&format!("{ERROR_PREFIX}err")));
    }

    #[tokio::test]
    async fn blank_output_is_not_delivered() {
        let transport = RecordingTransport::new();
        let sup = ProcessSupervisor::default();
        let proc = sup.spawn(&sh("echo; echo '   '")).await.unwrap();

        OutputRelay::new(transport.clone(), fast()).run(proc).await;
        assert!(transport.texts().is_empty());
    }

    #[tokio::test]
    async fn delivery_failures_do_not_stop_the_relay() {
        let transport = RecordingTransport::new();
        transport.fail.store(true, Ordering::SeqCst);
        let sup = ProcessSupervisor::default();
        let proc = sup.spawn(&sh("echo lost; exit 2")).await.unwrap();

        let code = OutputRelay::new(transport.clone(), fast()).run(proc).await;
        assert_eq!(code, 2);
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn lingering_pipe_holder_is_abandoned() {
        let transport = RecordingTransport::new();
        let sup = ProcessSupervisor::default();
        let proc = sup
            .spawn(&sh("sleep 30 & echo parent done"))
            .await
            .unwrap();
        let pgid = proc.pid as i32;

        let relay = OutputRelay::new(transport.clone(), fast())
            .with_drain_join_timeout(Duration::from_millis(500));
        let started = std::time::Instant::now();
        let code = relay.run(proc).await;
        assert_eq!(code, 0);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(transport.texts(), vec!["parent done".to_string()]);

        let _ = nix::sys::signal::killpg(
            nix::unistd::Pid::from_raw(pgid),
            nix::sys::signal::Signal::SIGKILL,
        );
    }
}
