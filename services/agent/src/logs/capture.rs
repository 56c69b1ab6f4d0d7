//! Line capture for supervised process output.

use std::io::{self, Write};
use std::sync::Arc;

use serde_json::Value;

use super::ring::RingBuffer;

/// Number of complete lines retained per process.
pub const DEFAULT_LOG_LINES: usize = 512;

/// The most recent complete output lines of one process.
///
/// Shared between the writer side (output pumps of the running process) and
/// readers serving log tails. It outlives individual runs of the process, so a
/// tail taken after a crash still shows the lines that led up to it.
#[derive(Debug)]
pub struct LogLines {
    lines: RingBuffer<Vec<u8>>,
}

impl LogLines {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: RingBuffer::new(capacity),
        }
    }

    fn push(&self, line: Vec<u8>) {
        self.lines.write(line);
    }

    /// Up to `n` most recent lines, oldest first.
    ///
    /// Lines holding a JSON object are returned as that object, anything else
    /// as a plain string.
    pub fn tail(&self, n: usize) -> Vec<Value> {
        self.lines
            .tail(n)
            .iter()
            .map(|raw| parse_log_line(raw))
            .collect()
    }
}

impl Default for LogLines {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_LINES)
    }
}

/// Parse one captured line into a log entry.
pub fn parse_log_line(raw: &[u8]) -> Value {
    match serde_json::from_slice::<Value>(raw) {
        Ok(entry @ Value::Object(_)) => entry,
        _ => Value::String(String::from_utf8_lossy(raw).into_owned()),
    }
}

/// A [`Write`] adapter that forwards bytes to a sink and records lines.
///
/// Bytes are passed to the sink unmodified; the line side channel splits on
/// `\n` (dropping a trailing `\r`) and only records a line once it is
/// complete.
pub struct LogWriter<W> {
    sink: W,
    lines: Arc<LogLines>,
    current: Vec<u8>,
}

impl<W: Write> LogWriter<W> {
    pub fn new(sink: W, lines: Arc<LogLines>) -> Self {
        Self {
            sink,
            lines,
            current: Vec::new(),
        }
    }

    fn record(&mut self, bytes: &[u8]) {
        let mut rest = bytes;
        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            self.current.extend_from_slice(&rest[..pos]);
            let mut line = std::mem::take(&mut self.current);
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            self.lines.push(line);
            rest = &rest[pos + 1..];
        }
        self.current.extend_from_slice(rest);
    }
}

impl<W: Write> Write for LogWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sink.write_all(buf)?;
        self.record(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}
