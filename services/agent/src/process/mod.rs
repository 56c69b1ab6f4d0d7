//! Native process supervision.
//!
//! A [`NativeProcess`] owns one child binary across its whole life: it spawns
//! it, polls its health endpoint until it reports ready, captures its output
//! and terminates it with an interrupt-then-kill protocol.

mod status;
mod supervisor;

use thiserror::Error;

pub use status::{LogLevel, ProcessStatus};
pub use supervisor::{NativeProcess, SupervisorPolicy, LOG_FILE_NAME};

/// Errors returned synchronously by the supervisor.
///
/// Spawn failures, crashes and health timeouts are not errors here: they
/// surface as [`ProcessStatus::Error`].
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Process is already running (status: {0})")]
    AlreadyRunning(ProcessStatus),

    #[error("Failed to allocate a local port: {0}")]
    PortAllocation(#[source] std::io::Error),

    #[error("Failed to build health check client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
