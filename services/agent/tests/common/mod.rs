//! Shared helpers for the integration tests.
//!
//! Node binaries are faked with small shell scripts. Their health endpoint is
//! served by the test itself on the port the supervisor allocated, which lets
//! each test decide when (and whether) a node becomes healthy.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use axum::{http::StatusCode, routing::get, Router};
use menmos_agent::{NodeId, NodeInfo, ProcessStatus, SupervisorPolicy};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Runs until interrupted, then exits cleanly. Records its invocation.
pub const SERVER_SCRIPT: &str = r#"#!/bin/sh
trap 'echo "shutting down"; exit 0' INT TERM
echo "$@" > args.tmp && mv args.tmp args.txt
env | grep '^MENMOS_' | sort > env.tmp && mv env.tmp env.txt
echo '{"level":"INFO","message":"node booted"}'
echo "plain text line" >&2
while :; do sleep 0.05; done
"#;

/// Ignores interrupts; only a kill gets rid of it.
pub const STUBBORN_SCRIPT: &str = r#"#!/bin/sh
trap '' INT
echo "ignoring interrupts"
while :; do sleep 0.05; done
"#;

/// Exits with a failure right away.
pub const CRASH_SCRIPT: &str = r#"#!/bin/sh
echo "boom"
exit 3
"#;

/// Runs until a `crash` file shows up in its working directory.
pub const CRASH_ON_DEMAND_SCRIPT: &str = r#"#!/bin/sh
trap 'exit 0' INT TERM
while [ ! -f crash ]; do sleep 0.05; done
exit 1
"#;

/// Fast policy for tests that expect a node to become healthy.
pub fn fast_policy() -> SupervisorPolicy {
    SupervisorPolicy {
        health_interval: Duration::from_millis(20),
        health_attempts: 250,
        health_timeout: Duration::from_millis(200),
        stop_timeout: Duration::from_secs(5),
        ..SupervisorPolicy::default()
    }
}

/// Write an executable script.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// A `/health` endpoint answering 200, aborted on drop.
pub struct HealthServer {
    handle: JoinHandle<()>,
}

impl Drop for HealthServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub async fn serve_health(port: u16) -> HealthServer {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .unwrap();
    let app = Router::new().route("/health", get(|| async { StatusCode::OK }));
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    HealthServer { handle }
}

/// Wait until the watched status equals `target`.
pub async fn wait_for_status(
    status: &mut watch::Receiver<ProcessStatus>,
    target: ProcessStatus,
    timeout: Duration,
) {
    let reached = tokio::time::timeout(timeout, status.wait_for(|s| *s == target))
        .await
        .is_ok_and(|r| r.is_ok());
    let last = *status.borrow();
    assert!(reached, "timed out waiting for {target}, last status {last}");
}

/// Poll `fetch` until the node reports `target`.
pub async fn poll_node_status<F, Fut>(id: NodeId, target: ProcessStatus, mut fetch: F) -> NodeInfo
where
    F: FnMut(NodeId) -> Fut,
    Fut: std::future::Future<Output = NodeInfo>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let info = fetch(id).await;
        if info.status == target {
            return info;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "node {id} stuck in {} waiting for {target}",
            info.status
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
