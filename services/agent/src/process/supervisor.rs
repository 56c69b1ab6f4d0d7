//! Supervisor for a single native child process.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{LogLevel, ProcessError, ProcessStatus};
use crate::logs::{LogLines, LogWriter, DEFAULT_LOG_LINES};

/// Name of the captured output file inside the working directory.
pub const LOG_FILE_NAME: &str = "log.json";

/// How long to wait for output pipes to drain after the child exited.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Timing policy for health polling and termination.
#[derive(Debug, Clone)]
pub struct SupervisorPolicy {
    /// Delay between two failed health probes.
    pub health_interval: Duration,
    /// Probes attempted before startup is declared failed.
    pub health_attempts: u32,
    /// Per-probe request timeout.
    pub health_timeout: Duration,
    /// Grace period between the interrupt and the forced kill.
    pub stop_timeout: Duration,
    /// Number of output lines retained in memory.
    pub log_capacity: usize,
}

impl Default for SupervisorPolicy {
    fn default() -> Self {
        Self {
            health_interval: Duration::from_millis(100),
            health_attempts: 100,
            health_timeout: Duration::from_secs(1),
            stop_timeout: Duration::from_secs(10),
            log_capacity: DEFAULT_LOG_LINES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopSignal {
    Interrupt,
    Kill,
}

/// Handle on the supervising task of the current run.
struct Run {
    signals: mpsc::Sender<StopSignal>,
    task: JoinHandle<()>,
}

/// One supervised native binary.
///
/// The child is launched as `<binary> --cfg <config>` from its working
/// directory. A dedicated task owns the child for the duration of a run: it
/// polls `GET /health` on the allocated port, waits for exit and is the only
/// writer of the status. Callers talk to it through [`NativeProcess::stop`].
pub struct NativeProcess {
    node_id: String,
    binary: PathBuf,
    workdir: PathBuf,
    config_path: PathBuf,
    port: u16,
    policy: SupervisorPolicy,
    client: reqwest::Client,
    logs: Arc<LogLines>,
    status: Arc<watch::Sender<ProcessStatus>>,
    run: Mutex<Option<Run>>,
}

impl NativeProcess {
    /// Create a stopped process and allocate its port.
    pub fn new(
        node_id: impl Into<String>,
        binary: impl Into<PathBuf>,
        workdir: impl Into<PathBuf>,
        config_path: impl Into<PathBuf>,
        policy: SupervisorPolicy,
    ) -> Result<Self, ProcessError> {
        let port = allocate_port().map_err(ProcessError::PortAllocation)?;
        // Health probes only ever target loopback.
        let client = reqwest::Client::builder().no_proxy().build()?;
        let (status, _) = watch::channel(ProcessStatus::Stopped);

        Ok(Self {
            node_id: node_id.into(),
            binary: binary.into(),
            workdir: workdir.into(),
            config_path: config_path.into(),
            port,
            logs: Arc::new(LogLines::new(policy.log_capacity)),
            policy,
            client,
            status: Arc::new(status),
            run: Mutex::new(None),
        })
    }

    pub fn status(&self) -> ProcessStatus {
        *self.status.borrow()
    }

    /// Subscribe to status transitions.
    pub fn watch_status(&self) -> watch::Receiver<ProcessStatus> {
        self.status.subscribe()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn health_check_url(&self) -> String {
        health_url(self.port)
    }

    /// The last `n` captured output lines, oldest first.
    pub fn logs(&self, n: usize) -> Vec<Value> {
        self.logs.tail(n)
    }

    /// Launch the child and return without waiting for it.
    ///
    /// Only fails when a run is already live or the log file cannot be
    /// opened. Spawn failures are reported through [`ProcessStatus::Error`].
    pub async fn start(&self, log_level: LogLevel) -> Result<(), ProcessError> {
        let mut run = self.run.lock().await;
        if let Some(current) = run.as_ref() {
            if !current.task.is_finished() {
                return Err(ProcessError::AlreadyRunning(self.status()));
            }
        }

        let stdout_log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.workdir.join(LOG_FILE_NAME))?;
        let stderr_log = stdout_log.try_clone()?;

        let (signals_tx, signals_rx) = mpsc::channel(4);
        let supervision = Supervision {
            node_id: self.node_id.clone(),
            binary: self.binary.clone(),
            workdir: self.workdir.clone(),
            config_path: self.config_path.clone(),
            port: self.port,
            log_level,
            policy: self.policy.clone(),
            client: self.client.clone(),
            logs: self.logs.clone(),
            status: self.status.clone(),
        };
        supervision.set_status(ProcessStatus::Starting);

        let task = tokio::spawn(supervision.run(stdout_log, stderr_log, signals_rx));
        *run = Some(Run {
            signals: signals_tx,
            task,
        });

        info!(
            node_id = %self.node_id,
            binary = %self.binary.display(),
            port = self.port,
            log_level = %log_level,
            "Process starting"
        );
        Ok(())
    }

    /// Stop the child and wait until it is gone.
    ///
    /// Sends an interrupt first and escalates to a kill once the stop timeout
    /// elapses. A no-op when nothing is running.
    pub async fn stop(&self) {
        let mut run = self.run.lock().await;
        let Some(current) = run.as_mut() else {
            return;
        };

        if !current.task.is_finished() {
            info!(node_id = %self.node_id, "Stopping process");
            let _ = current.signals.send(StopSignal::Interrupt).await;

            match tokio::time::timeout(self.policy.stop_timeout, &mut current.task).await {
                Ok(joined) => self.check_join(joined),
                Err(_) => {
                    warn!(
                        node_id = %self.node_id,
                        timeout_ms = self.policy.stop_timeout.as_millis() as u64,
                        "Process did not exit in time, killing"
                    );
                    let _ = current.signals.send(StopSignal::Kill).await;
                    let joined = (&mut current.task).await;
                    self.check_join(joined);
                }
            }
        }

        *run = None;
    }

    fn check_join(&self, joined: Result<(), tokio::task::JoinError>) {
        if let Err(e) = joined {
            error!(node_id = %self.node_id, error = %e, "Supervising task failed");
            self.status.send_replace(ProcessStatus::Error);
        }
    }
}

/// Outcome of the startup phase.
enum Startup {
    Healthy,
    StopRequested(StopSignal),
    Exited(std::io::Result<ExitStatus>),
    Exhausted,
}

/// State moved into the supervising task.
struct Supervision {
    node_id: String,
    binary: PathBuf,
    workdir: PathBuf,
    config_path: PathBuf,
    port: u16,
    log_level: LogLevel,
    policy: SupervisorPolicy,
    client: reqwest::Client,
    logs: Arc<LogLines>,
    status: Arc<watch::Sender<ProcessStatus>>,
}

impl Supervision {
    async fn run(
        self,
        stdout_log: File,
        stderr_log: File,
        mut signals: mpsc::Receiver<StopSignal>,
    ) {
        let mut child = match self.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!(
                    node_id = %self.node_id,
                    binary = %self.binary.display(),
                    error = %e,
                    "Failed to spawn process"
                );
                self.set_status(ProcessStatus::Error);
                return;
            }
        };
        let pumps = self.capture_output(&mut child, stdout_log, stderr_log);

        let mut stop_requested = false;
        match self.wait_healthy(&mut child, &mut signals).await {
            Startup::Healthy => self.set_status(ProcessStatus::Healthy),
            Startup::StopRequested(signal) => {
                stop_requested = true;
                self.deliver(&mut child, signal);
            }
            Startup::Exited(exit) => {
                error!(
                    node_id = %self.node_id,
                    exit = %describe_exit(&exit),
                    "Process exited during startup"
                );
                drain(pumps).await;
                self.set_status(ProcessStatus::Error);
                return;
            }
            Startup::Exhausted => {
                error!(
                    node_id = %self.node_id,
                    attempts = self.policy.health_attempts,
                    "Process never became healthy, killing"
                );
                if let Err(e) = child.kill().await {
                    warn!(node_id = %self.node_id, error = %e, "Failed to kill process");
                }
                drain(pumps).await;
                self.set_status(ProcessStatus::Error);
                return;
            }
        }

        let mut signals_open = true;
        let exit = loop {
            tokio::select! {
                received = signals.recv(), if signals_open => {
                    let signal = match received {
                        Some(signal) => signal,
                        None => {
                            // Handle dropped: nobody can stop us anymore.
                            signals_open = false;
                            StopSignal::Kill
                        }
                    };
                    stop_requested = true;
                    self.deliver(&mut child, signal);
                }
                exit = child.wait() => break exit,
            }
        };

        let status = match &exit {
            _ if stop_requested => ProcessStatus::Stopped,
            Ok(code) if code.success() => ProcessStatus::Stopped,
            _ => ProcessStatus::Error,
        };
        if status == ProcessStatus::Error {
            error!(node_id = %self.node_id, exit = %describe_exit(&exit), "Process exited unexpectedly");
        } else {
            info!(node_id = %self.node_id, exit = %describe_exit(&exit), "Process exited");
        }

        drain(pumps).await;
        self.set_status(status);
    }

    fn spawn(&self) -> std::io::Result<Child> {
        Command::new(&self.binary)
            .arg("--cfg")
            .arg(&self.config_path)
            .current_dir(&self.workdir)
            .env("MENMOS_LOG_LEVEL", self.log_level.as_str())
            .env("MENMOS_LOG_JSON", "true")
            .env("MENMOS_SERVER_PORT", self.port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
    }

    async fn wait_healthy(
        &self,
        child: &mut Child,
        signals: &mut mpsc::Receiver<StopSignal>,
    ) -> Startup {
        let url = health_url(self.port);
        for attempt in 1..=self.policy.health_attempts {
            tokio::select! {
                received = signals.recv() => {
                    return Startup::StopRequested(received.unwrap_or(StopSignal::Kill));
                }
                exit = child.wait() => return Startup::Exited(exit),
                healthy = self.probe(&url) => {
                    if healthy {
                        debug!(node_id = %self.node_id, attempt, "Health check passed");
                        return Startup::Healthy;
                    }
                }
            }
        }
        Startup::Exhausted
    }

    /// One health probe; sleeps for the retry interval when it fails.
    async fn probe(&self, url: &str) -> bool {
        let healthy = match self
            .client
            .get(url)
            .timeout(self.policy.health_timeout)
            .send()
            .await
        {
            Ok(response) => response.status() == StatusCode::OK,
            Err(_) => false,
        };
        if !healthy {
            tokio::time::sleep(self.policy.health_interval).await;
        }
        healthy
    }

    fn deliver(&self, child: &mut Child, signal: StopSignal) {
        self.set_status(ProcessStatus::Stopping);
        let result = match signal {
            StopSignal::Interrupt => interrupt(child),
            StopSignal::Kill => child.start_kill(),
        };
        match result {
            Ok(()) => debug!(node_id = %self.node_id, signal = ?signal, "Signal sent"),
            Err(e) => warn!(node_id = %self.node_id, signal = ?signal, error = %e, "Failed to signal process"),
        }
    }

    fn capture_output(
        &self,
        child: &mut Child,
        stdout_log: File,
        stderr_log: File,
    ) -> Vec<JoinHandle<()>> {
        let mut pumps = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            let writer = LogWriter::new(stdout_log, self.logs.clone());
            pumps.push(tokio::spawn(pump_output(stdout, writer, self.node_id.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            let writer = LogWriter::new(stderr_log, self.logs.clone());
            pumps.push(tokio::spawn(pump_output(stderr, writer, self.node_id.clone())));
        }
        pumps
    }

    fn set_status(&self, status: ProcessStatus) {
        let previous = self.status.send_replace(status);
        if previous != status {
            info!(node_id = %self.node_id, from = %previous, to = %status, "Process status changed");
        }
    }
}

async fn pump_output<R>(mut reader: R, mut writer: LogWriter<File>, node_id: String)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if let Err(e) = writer.write_all(&buf[..n]) {
                    warn!(node_id = %node_id, error = %e, "Failed to record process output");
                }
            }
            Err(e) => {
                debug!(node_id = %node_id, error = %e, "Output stream closed");
                break;
            }
        }
    }
    let _ = writer.flush();
}

/// Wait for the output pumps, bounded in case a grandchild holds a pipe.
async fn drain(pumps: Vec<JoinHandle<()>>) {
    for pump in pumps {
        let _ = tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, pump).await;
    }
}

#[cfg(unix)]
fn interrupt(child: &mut Child) -> std::io::Result<()> {
    let Some(pid) = child.id() else {
        // Already reaped.
        return Ok(());
    };
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn interrupt(child: &mut Child) -> std::io::Result<()> {
    child.start_kill()
}

fn describe_exit(exit: &std::io::Result<ExitStatus>) -> String {
    match exit {
        Ok(status) => status.to_string(),
        Err(e) => format!("wait failed: {e}"),
    }
}

fn health_url(port: u16) -> String {
    format!("http://127.0.0.1:{port}/health")
}

/// Reserve a free local port by binding to port 0.
fn allocate_port() -> std::io::Result<u16> {
    let listener = TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}
