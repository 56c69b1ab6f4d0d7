//! Integration tests for node orchestration: lifecycle invariants and
//! restore after an agent restart.

mod common;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use menmos_agent::artifact::{ArtifactError, Asset, ReleaseSource};
use menmos_agent::state::{NodeRecord, StateStore};
use menmos_agent::{Agent, AgentError, Config, NodeId, NodeInfo, NodeKind, ProcessStatus};
use serde_json::json;
use tempfile::TempDir;

use common::*;

struct NoReleases;

#[async_trait]
impl ReleaseSource for NoReleases {
    async fn fetch_release(&self, version: &str) -> Result<Vec<Asset>, ArtifactError> {
        Err(ArtifactError::ReleaseNotFound(version.to_string()))
    }
}

fn config(dir: &TempDir) -> Config {
    let bin_dir = dir.path().join("bin");
    write_script(&bin_dir, "menmosd", SERVER_SCRIPT);
    write_script(&bin_dir, "amphora", SERVER_SCRIPT);

    let mut config = Config::with_data_dir(dir.path().join("data"));
    config.local_binary_path = Some(bin_dir);
    config
}

async fn agent(config: Config) -> Agent {
    Agent::with_release_source(config, Arc::new(NoReleases))
        .await
        .unwrap()
        .with_supervisor_policy(fast_policy())
}

async fn wait_for(agent: &Agent, id: NodeId, target: ProcessStatus) -> NodeInfo {
    poll_node_status(id, target, move |id| async move { agent.get_node(&id).await.unwrap() }).await
}

fn state_store(dir: &TempDir) -> StateStore {
    StateStore::open(dir.path().join("data/state")).unwrap()
}

#[tokio::test]
async fn test_create_reports_node() {
    let dir = TempDir::new().unwrap();
    let agent = agent(config(&dir)).await;

    let info = agent
        .create_node(NodeKind::Storage, None, json!({"name": "alpha"}))
        .await
        .unwrap();
    let _health = serve_health(info.port).await;

    assert_eq!(info.kind, NodeKind::Storage);
    assert!(info.version.is_none());
    assert!(matches!(
        info.status,
        ProcessStatus::Starting | ProcessStatus::Healthy
    ));
    assert_eq!(
        info.health_check_url,
        format!("http://127.0.0.1:{}/health", info.port)
    );

    let healthy = wait_for(&agent, info.id, ProcessStatus::Healthy).await;
    assert_eq!(healthy.port, info.port);
    assert_eq!(agent.list_nodes().await, vec![healthy]);

    let workspace = agent.node_workspace(&info.id);
    let rendered = std::fs::read_to_string(workspace.join("config.toml")).unwrap();
    assert!(rendered.contains("name = \"alpha\""));
    assert!(rendered.contains(&format!("port = {}", info.port)));
    for sub in ["db", "blob", "cert"] {
        assert!(workspace.join(sub).is_dir(), "{sub} missing");
    }

    let record = state_store(&dir).get(&info.id).unwrap().unwrap();
    assert_eq!(record.kind, NodeKind::Storage);
    assert_eq!(record.config["name"], "alpha");

    agent.shutdown().await;
}

#[tokio::test]
async fn test_delete_requires_stopped_node() {
    let dir = TempDir::new().unwrap();
    let agent = agent(config(&dir)).await;

    let info = agent
        .create_node(NodeKind::Directory, None, json!({}))
        .await
        .unwrap();
    let _health = serve_health(info.port).await;
    wait_for(&agent, info.id, ProcessStatus::Healthy).await;

    let err = agent.delete_node(&info.id).await.unwrap_err();
    assert!(matches!(
        err,
        AgentError::NodeMustBeStopped(ProcessStatus::Healthy)
    ));
    // Still present everywhere.
    assert!(agent.get_node(&info.id).await.is_ok());
    assert!(state_store(&dir).get(&info.id).unwrap().is_some());
    let workspace = agent.node_workspace(&info.id);
    assert!(workspace.exists());

    agent.stop_node(&info.id).await.unwrap();
    assert_eq!(
        agent.get_node(&info.id).await.unwrap().status,
        ProcessStatus::Stopped
    );

    agent.delete_node(&info.id).await.unwrap();
    assert!(!workspace.exists());
    assert!(state_store(&dir).get(&info.id).unwrap().is_none());
    assert!(matches!(
        agent.get_node(&info.id).await,
        Err(AgentError::NodeNotFound(_))
    ));

    // Deleting again is a no-op.
    agent.delete_node(&info.id).await.unwrap();
}

#[tokio::test]
async fn test_failed_delete_keeps_node_registered() {
    let dir = TempDir::new().unwrap();
    let agent = agent(config(&dir)).await;

    let info = agent
        .create_node(NodeKind::Directory, None, json!({}))
        .await
        .unwrap();
    let _health = serve_health(info.port).await;
    wait_for(&agent, info.id, ProcessStatus::Healthy).await;
    agent.stop_node(&info.id).await.unwrap();

    // A directory where the record file should be cannot be unlinked.
    let record_path = dir.path().join(format!("data/state/{}.json", info.id));
    std::fs::remove_file(&record_path).unwrap();
    std::fs::create_dir(&record_path).unwrap();
    std::fs::write(record_path.join("pinned"), "").unwrap();

    let err = agent.delete_node(&info.id).await.unwrap_err();
    assert!(matches!(err, AgentError::Store(_)));
    assert_eq!(
        agent.get_node(&info.id).await.unwrap().status,
        ProcessStatus::Stopped
    );
    assert_eq!(agent.list_nodes().await.len(), 1);
    let workspace = agent.node_workspace(&info.id);
    assert!(workspace.join("config.toml").exists());

    // Once the obstruction is gone the delete goes through.
    std::fs::remove_dir_all(&record_path).unwrap();
    agent.delete_node(&info.id).await.unwrap();
    assert!(!workspace.exists());
    assert!(agent.list_nodes().await.is_empty());
}

#[tokio::test]
async fn test_start_stop_cycle() {
    let dir = TempDir::new().unwrap();
    let agent = agent(config(&dir)).await;

    let info = agent
        .create_node(NodeKind::Directory, None, json!({}))
        .await
        .unwrap();
    let _health = serve_health(info.port).await;
    wait_for(&agent, info.id, ProcessStatus::Healthy).await;

    assert!(matches!(
        agent.start_node(&info.id).await,
        Err(AgentError::AlreadyRunning(ProcessStatus::Healthy))
    ));

    agent.stop_node(&info.id).await.unwrap();
    // Stopping a stopped node is fine.
    agent.stop_node(&info.id).await.unwrap();

    agent.start_node(&info.id).await.unwrap();
    wait_for(&agent, info.id, ProcessStatus::Healthy).await;

    let logs = agent.node_logs(&info.id, 30).await.unwrap();
    assert!(logs.iter().any(|l| l["message"] == "node booted"));

    agent.shutdown().await;
    assert_eq!(
        agent.get_node(&info.id).await.unwrap().status,
        ProcessStatus::Stopped
    );
}

#[tokio::test]
async fn test_shutdown_stops_all_nodes() {
    let dir = TempDir::new().unwrap();
    let agent = agent(config(&dir)).await;

    let mut servers = Vec::new();
    let mut ids = Vec::new();
    for kind in [NodeKind::Directory, NodeKind::Storage, NodeKind::Storage] {
        let info = agent.create_node(kind, None, json!({})).await.unwrap();
        servers.push(serve_health(info.port).await);
        ids.push(info.id);
    }
    for id in &ids {
        wait_for(&agent, *id, ProcessStatus::Healthy).await;
    }

    agent.shutdown().await;

    for node in agent.list_nodes().await {
        assert_eq!(node.status, ProcessStatus::Stopped);
    }
}

#[tokio::test]
async fn test_restore_after_restart() {
    let dir = TempDir::new().unwrap();

    let id = {
        let agent = agent(config(&dir)).await;
        let info = agent
            .create_node(NodeKind::Storage, None, json!({"name": "alpha"}))
            .await
            .unwrap();
        let _health = serve_health(info.port).await;
        wait_for(&agent, info.id, ProcessStatus::Healthy).await;
        agent.shutdown().await;
        info.id
    };

    // A record that cannot be restored must not block the others.
    let store = state_store(&dir);
    let broken = NodeRecord {
        id: NodeId::new(),
        kind: NodeKind::Directory,
        version: Some("v9.9.9".to_string()),
        config: json!({}),
    };
    store.save(&broken).unwrap();
    std::fs::write(dir.path().join("data/state/notes.txt"), "ignored").unwrap();

    let agent = agent(config(&dir)).await;
    assert_eq!(agent.restore_all().await.unwrap(), 1);

    let restored = agent.get_node(&id).await.unwrap();
    assert_eq!(restored.kind, NodeKind::Storage);
    let _health = serve_health(restored.port).await;
    wait_for(&agent, id, ProcessStatus::Healthy).await;

    // Config was regenerated for the new port.
    let rendered =
        std::fs::read_to_string(agent.node_workspace(&id).join("config.toml")).unwrap();
    assert!(rendered.contains(&format!("port = {}", restored.port)));
    assert!(rendered.contains("name = \"alpha\""));

    assert!(matches!(
        agent.get_node(&broken.id).await,
        Err(AgentError::NodeNotFound(_))
    ));

    // Restoring again does not duplicate running nodes.
    assert_eq!(agent.restore_all().await.unwrap(), 0);
    assert_eq!(agent.list_nodes().await.len(), 1);

    agent.shutdown().await;
}

#[tokio::test]
async fn test_restore_recreates_missing_workspace() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);

    let store = StateStore::open(config.state_dir()).unwrap();
    let record = NodeRecord {
        id: NodeId::new(),
        kind: NodeKind::Directory,
        version: None,
        config: json!({"node_admin_password": "hunter2"}),
    };
    store.save(&record).unwrap();

    let agent = agent(config).await;
    assert_eq!(agent.restore_all().await.unwrap(), 1);

    let workspace = agent.node_workspace(&record.id);
    assert!(Path::new(&workspace).join("db").is_dir());
    let rendered = std::fs::read_to_string(workspace.join("config.toml")).unwrap();
    assert!(rendered.contains("admin_password = \"hunter2\""));

    agent.shutdown().await;
}
