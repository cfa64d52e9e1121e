//! Line batching for child process output.
//!
//! Reads an opaque byte stream line by line and coalesces lines into
//! chunks small enough for one chat message. A batch is flushed when the
//! stream goes quiet, when the next line would overflow the size cap, or
//! when the stream closes.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, warn};

/// Largest batch the transport will accept, in characters.
pub const DEFAULT_MAX_CHARS: usize = 4000;

/// How long the stream must stay silent before a pending batch is sent.
pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_secs(2);

/// Which standard stream a batch came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSource {
    Primary,
    Error,
}

impl StreamSource {
    /// Short tag used in log lines.
    pub fn tag(self) -> &'static str {
        match self {
            StreamSource::Primary => "OUT",
            StreamSource::Error => "ERR",
        }
    }
}

/// A group of consecutive output lines delivered as one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputBatch {
    pub source: StreamSource,
    pub lines: Vec<String>,
}

impl OutputBatch {
    /// Lines joined with newlines.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// Whether the batch carries nothing but whitespace.
    pub fn is_blank(&self) -> bool {
        self.lines.iter().all(|l| l.trim().is_empty())
    }
}

/// Size and timing limits for batching.
#[derive(Debug, Clone, Copy)]
pub struct BatchConfig {
    pub max_chars: usize,
    pub quiet_period: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_MAX_CHARS,
            quiet_period: DEFAULT_QUIET_PERIOD,
        }
    }
}

/// Turns a byte stream into a finite sequence of [`OutputBatch`]es.
///
/// Not restartable: once [`next_batch`](Self::next_batch) returns `None`
/// it keeps returning `None`.
pub struct StreamBatcher<R> {
    reader: BufReader<R>,
    source: StreamSource,
    config: BatchConfig,
    pending: Vec<String>,
    pending_chars: usize,
    ready: VecDeque<OutputBatch>,
    /// Bytes of the line currently being read. Survives a cancelled read.
    line_buf: Vec<u8>,
    finished: bool,
}

impl<R: AsyncRead + Unpin> StreamBatcher<R> {
    pub fn new(reader: R, source: StreamSource, config: BatchConfig) -> Self {
        let config = BatchConfig {
            max_chars: config.max_chars.max(1),
            ..config
        };
        Self {
            reader: BufReader::new(reader),
            source,
            config,
            pending: Vec::new(),
            pending_chars: 0,
            ready: VecDeque::new(),
            line_buf: Vec::new(),
            finished: false,
        }
    }

    /// Wait for the next batch. Returns `None` once the stream is exhausted
    /// (end of file or a read error) and everything pending was flushed.
    pub async fn next_batch(&mut self) -> Option<OutputBatch> {
        loop {
            if let Some(batch) = self.ready.pop_front() {
                return Some(batch);
            }
            if self.finished {
                return None;
            }

            // read_until keeps partially read bytes in line_buf when the
            // timeout drops it, so nothing is lost across quiet periods.
            let read = if self.pending.is_empty() {
                Some(self.reader.read_until(b'\n', &mut self.line_buf).await)
            } else {
                tokio::time::timeout(
                    self.config.quiet_period,
                    self.reader.read_until(b'\n', &mut self.line_buf),
                )
                .await
                .ok()
            };

            match read {
                None => self.flush_pending(),
                Some(Ok(0)) => {
                    self.take_partial_line();
                    self.flush_pending();
                    self.finished = true;
                }
                Some(Ok(_)) => {
                    if self.line_buf.ends_with(b"\n") {
                        let line = decode_line(&std::mem::take(&mut self.line_buf));
                        self.push_line(line);
                    }
                    // Otherwise EOF arrived mid-line; the next read returns 0.
                }
                Some(Err(e)) => {
                    warn!(source = self.source.tag(), error = %e, "output stream read failed");
                    self.take_partial_line();
                    self.flush_pending();
                    self.finished = true;
                }
            }
        }
    }

    fn take_partial_line(&mut self) {
        if !self.line_buf.is_empty() {
            let line = decode_line(&std::mem::take(&mut self.line_buf));
            self.push_line(line);
        }
    }

    fn push_line(&mut self, line: String) {
        debug!(source = self.source.tag(), "{line}");
        let max = self.config.max_chars;
        let len = line.chars().count();

        if len > max {
            self.flush_pending();
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(max) {
                self.ready.push_back(OutputBatch {
                    source: self.source,
                    lines: vec![piece.iter().collect()],
                });
            }
            return;
        }

        let separator = usize::from(!self.pending.is_empty());
        if self.pending_chars + separator + len > max {
            self.flush_pending();
            self.pending_chars = len;
        } else {
            self.pending_chars += separator + len;
        }
        self.pending.push(line);
    }

    fn flush_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        self.ready.push_back(OutputBatch {
            source: self.source,
            lines: std::mem::take(&mut self.pending),
        });
        self.pending_chars = 0;
    }
}

/// Lossy UTF-8 decode with the line terminator removed.
fn decode_line(bytes: &[u8]) -> String {
    let mut line = String::from_utf8_lossy(bytes).into_owned();
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    line
}
