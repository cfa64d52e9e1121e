//! Bounded capture of recent shell output for on-demand replay.
//!
//! Keeps the last N bytes written so the operator can ask for "what has the
//! command printed so far" without the bridge holding unbounded history.

use std::collections::VecDeque;

/// Bytes retained by a default accumulator.
pub const DEFAULT_ACCUMULATOR_BYTES: usize = 50_000;

/// A fixed-capacity byte buffer that drops its oldest bytes when full.
#[derive(Debug)]
pub struct OutputAccumulator {
    buf: VecDeque<u8>,
    capacity: usize,
}

impl Default for OutputAccumulator {
    fn default() -> Self {
        Self::new(DEFAULT_ACCUMULATOR_BYTES)
    }
}

impl OutputAccumulator {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity.min(64 * 1024)),
            capacity,
        }
    }

    /// Append bytes, evicting the oldest ones past capacity.
    pub fn write(&mut self, data: &[u8]) {
        if self.capacity == 0 {
            return;
        }
        let data = if data.len() > self.capacity {
            &data[data.len() - self.capacity..]
        } else {
            data
        };
        let overflow = (self.buf.len() + data.len()).saturating_sub(self.capacity);
        self.buf.drain(..overflow);
        self.buf.extend(data);
    }

    /// Retained bytes, oldest first.
    pub fn read_all(&self) -> Vec<u8> {
        self.buf.iter().copied().collect()
    }

    /// The last `max_lines` lines, then the last `max_chars` characters of
    /// those. `None` when nothing was captured.
    pub fn tail(&self, max_lines: usize, max_chars: usize) -> Option<Tail> {
        let text = String::from_utf8_lossy(&self.read_all()).into_owned();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }

        let lines: Vec<&str> = trimmed.split('\n').collect();
        let lines_dropped = lines.len() > max_lines;
        let mut out = lines[lines.len().saturating_sub(max_lines)..].join("\n");

        let char_count = out.chars().count();
        if char_count > max_chars {
            out = out.chars().skip(char_count - max_chars).collect();
        }

        Some(Tail {
            text: out,
            lines_dropped,
        })
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

/// Result of [`OutputAccumulator::tail`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tail {
    pub text: String,
    /// Whether older lines were cut to honour the line limit.
    pub lines_dropped: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_write_read() {
        let mut acc = OutputAccumulator::new(10);
        acc.write(b"hello");
        assert_eq!(acc.read_all(), b"hello");
    }

    #[test]
    fn evicts_oldest_bytes() {
        let mut acc = OutputAccumulator::new(5);
        acc.write(b"abcde");
        acc.write(b"fg");
        assert_eq!(acc.read_all(), b"cdefg");

        acc.write(b"0123456789");
        assert_eq!(acc.read_all(), b"56789");
    }

    #[test]
    fn zero_capacity_keeps_nothing() {
        let mut acc = OutputAccumulator::new(0);
        acc.write(b"test");
        assert!(acc.read_all().is_empty());
        assert!(acc.tail(10, 100).is_none());
    }

    #[test]
    fn tail_limits_lines_then_chars() {
        let mut acc = OutputAccumulator::default();
        for i in 1..=100 {
            acc.write(format!("line {i}\n").as_bytes());
        }

        let tail = acc.tail(60, 4000).unwrap();
        assert!(tail.lines_dropped);
        assert!(tail.text.starts_with("line 41\n"));
        assert!(tail.text.ends_with("line 100"));

        let short = acc.tail(60, 8).unwrap();
        assert_eq!(short.text, "line 100");
    }

    #[test]
    fn tail_of_whitespace_is_none() {
        let mut acc = OutputAccumulator::default();
        acc.write(b"  \n\n");
        assert!(acc.tail(10, 10).is_none());

        acc.clear();
        acc.write(b"only\n");
        let tail = acc.tail(10, 100).unwrap();
        assert_eq!(tail.text, "only");
        assert!(!tail.lines_dropped);
    }
}
