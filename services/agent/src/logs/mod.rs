//! Captured process output.
//!
//! A supervised process writes its combined stdout/stderr through a
//! [`LogWriter`], which forwards every byte to the node's log file and keeps
//! the most recent complete lines in a [`RingBuffer`] so the API can serve a
//! tail without touching the file.

mod capture;
mod ring;

pub use capture::{parse_log_line, LogLines, LogWriter, DEFAULT_LOG_LINES};
pub use ring::RingBuffer;
