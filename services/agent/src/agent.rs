//! Node orchestration.
//!
//! The [`Agent`] is the only owner of the running-node table and the state
//! store. Every lifecycle operation goes through it so the cross-component
//! invariants hold: a node is registered only once its process was started,
//! a running node is never deleted, and a restart can rebuild every node
//! from its persisted record alone.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::artifact::{ArtifactError, ArtifactRepository, GithubReleaseSource, ReleaseSource};
use crate::config::Config;
use crate::fs::{ensure_dir_exists, remove_dir_if_exists};
use crate::node::{NodeId, NodeKind, NodeSettings, RenderContext, SettingsError, CONFIG_FILE_NAME};
use crate::process::{NativeProcess, ProcessError, ProcessStatus, SupervisorPolicy};
use crate::state::{NodeRecord, StateStore, StateStoreError};

/// Errors from orchestration operations.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("node '{0}' not found")]
    NodeNotFound(String),

    #[error("cannot delete node in '{0}' state, node needs to be stopped")]
    NodeMustBeStopped(ProcessStatus),

    #[error("node is already running (status: {0})")]
    AlreadyRunning(ProcessStatus),

    #[error("no version requested and no local binary path configured")]
    NoLocalBinary,

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Store(#[from] StateStoreError),

    #[error(transparent)]
    Process(ProcessError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ProcessError> for AgentError {
    fn from(e: ProcessError) -> Self {
        match e {
            ProcessError::AlreadyRunning(status) => Self::AlreadyRunning(status),
            other => Self::Process(other),
        }
    }
}

/// External view of one node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInfo {
    pub id: NodeId,
    pub kind: NodeKind,
    pub version: Option<String>,
    pub port: u16,
    pub health_check_url: String,
    pub status: ProcessStatus,
}

struct ManagedNode {
    record: NodeRecord,
    process: Arc<NativeProcess>,
}

impl ManagedNode {
    fn info(&self) -> NodeInfo {
        NodeInfo {
            id: self.record.id,
            kind: self.record.kind,
            version: self.record.version.clone(),
            port: self.process.port(),
            health_check_url: self.process.health_check_url(),
            status: self.process.status(),
        }
    }
}

/// The per-host node orchestrator.
pub struct Agent {
    config: Config,
    policy: SupervisorPolicy,
    artifacts: ArtifactRepository,
    store: StateStore,
    nodes: RwLock<HashMap<NodeId, ManagedNode>>,
}

impl Agent {
    /// Create an agent fetching releases from the configured GitHub repository.
    pub async fn new(config: Config) -> Result<Self, AgentError> {
        let source = GithubReleaseSource::from_slug(reqwest::Client::new(), &config.release_repo)?
            .with_token(config.github_token.clone());
        Self::with_release_source(config, Arc::new(source)).await
    }

    /// Create an agent with a custom release source.
    ///
    /// Lays out the data directory (`pkg`, `node`, `state`) if needed.
    pub async fn with_release_source(
        mut config: Config,
        source: Arc<dyn ReleaseSource>,
    ) -> Result<Self, AgentError> {
        // Children run from their workspace, so every path handed to them
        // must be absolute.
        config.data_dir = std::path::absolute(&config.data_dir)?;
        if let Some(local) = config.local_binary_path.take() {
            config.local_binary_path = Some(std::path::absolute(local)?);
        }

        ensure_dir_exists(&config.data_dir).await?;
        ensure_dir_exists(&config.pkg_dir()).await?;
        ensure_dir_exists(&config.node_dir()).await?;
        let store = StateStore::open(config.state_dir())?;
        let artifacts = ArtifactRepository::new(config.pkg_dir(), source, reqwest::Client::new());

        info!(data_dir = %config.data_dir.display(), "Agent workspace ready");

        Ok(Self {
            config,
            policy: SupervisorPolicy::default(),
            artifacts,
            store,
            nodes: RwLock::new(HashMap::new()),
        })
    }

    /// Override the supervision policy used for new and restored nodes.
    pub fn with_supervisor_policy(mut self, policy: SupervisorPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Workspace directory of a node.
    pub fn node_workspace(&self, id: &NodeId) -> PathBuf {
        self.config.node_dir().join(id.to_string())
    }

    /// Create, configure and start a new node.
    pub async fn create_node(
        &self,
        kind: NodeKind,
        version: Option<String>,
        config: Value,
    ) -> Result<NodeInfo, AgentError> {
        let version = version.filter(|v| !v.is_empty());
        let settings = NodeSettings::decode(kind, config)?;
        let binary = self.resolve_binary(kind, version.as_deref()).await?;

        let id = NodeId::new();
        let workspace = self.node_workspace(&id);
        let record = NodeRecord {
            id,
            kind,
            version,
            config: settings.to_value(),
        };

        let process = match self.launch(&record, &settings, binary, &workspace).await {
            Ok(process) => process,
            Err(e) => {
                self.discard_workspace(&workspace).await;
                return Err(e);
            }
        };

        if let Err(e) = self.store.save(&record) {
            process.stop().await;
            self.discard_workspace(&workspace).await;
            return Err(e.into());
        }

        let managed = ManagedNode { record, process };
        let info = managed.info();
        self.nodes.write().await.insert(id, managed);

        info!(node_id = %id, kind = %kind, port = info.port, "Node created");
        Ok(info)
    }

    /// Every known node.
    pub async fn list_nodes(&self) -> Vec<NodeInfo> {
        let nodes = self.nodes.read().await;
        let mut infos: Vec<NodeInfo> = nodes.values().map(ManagedNode::info).collect();
        infos.sort_by_key(|n| n.id);
        infos
    }

    pub async fn get_node(&self, id: &NodeId) -> Result<NodeInfo, AgentError> {
        let nodes = self.nodes.read().await;
        nodes
            .get(id)
            .map(ManagedNode::info)
            .ok_or_else(|| AgentError::NodeNotFound(id.to_string()))
    }

    /// Delete a stopped (or failed) node, its record and its workspace.
    ///
    /// Deleting an unknown node succeeds. The node stays registered until
    /// both its record and its workspace are gone, so a failed delete can be
    /// retried.
    pub async fn delete_node(&self, id: &NodeId) -> Result<(), AgentError> {
        // Held across the removals so the node cannot be started meanwhile.
        let mut nodes = self.nodes.write().await;
        match nodes.get(id) {
            Some(node) => {
                let status = node.process.status();
                if status.is_running() {
                    return Err(AgentError::NodeMustBeStopped(status));
                }
            }
            None => debug!(node_id = %id, "Delete of unknown node"),
        }

        self.store.delete(id)?;
        remove_dir_if_exists(&self.node_workspace(id)).await?;
        nodes.remove(id);

        info!(node_id = %id, "Node deleted");
        Ok(())
    }

    /// Start a stopped node again.
    pub async fn start_node(&self, id: &NodeId) -> Result<(), AgentError> {
        // The read lock is held across `start` so a concurrent delete
        // cannot remove the node while its process is being launched.
        let nodes = self.nodes.read().await;
        let node = nodes
            .get(id)
            .ok_or_else(|| AgentError::NodeNotFound(id.to_string()))?;

        let status = node.process.status();
        if status.is_running() {
            return Err(AgentError::AlreadyRunning(status));
        }

        node.process.start(self.config.node_log_level).await?;
        info!(node_id = %id, "Node started");
        Ok(())
    }

    /// Stop a node and wait for it to exit. Stopping a stopped node is a no-op.
    pub async fn stop_node(&self, id: &NodeId) -> Result<(), AgentError> {
        let process = self.process(id).await?;
        process.stop().await;
        info!(node_id = %id, status = %process.status(), "Node stopped");
        Ok(())
    }

    /// The last `lines` output lines of a node.
    pub async fn node_logs(&self, id: &NodeId, lines: usize) -> Result<Vec<Value>, AgentError> {
        Ok(self.process(id).await?.logs(lines))
    }

    /// Bring back every persisted node. Returns how many were started.
    ///
    /// A node that fails to restore is logged and skipped.
    pub async fn restore_all(&self) -> Result<usize, AgentError> {
        let records = self.store.list()?;
        info!(count = records.len(), "Restoring nodes");

        let mut restored = 0;
        for record in records {
            let id = record.id;
            if self.nodes.read().await.contains_key(&id) {
                debug!(node_id = %id, "Node already running, skipping restore");
                continue;
            }

            match self.restore_node(record).await {
                Ok(()) => restored += 1,
                Err(e) => error!(node_id = %id, error = %e, "Failed to restore node"),
            }
        }

        info!(restored, "Node restore complete");
        Ok(restored)
    }

    async fn restore_node(&self, record: NodeRecord) -> Result<(), AgentError> {
        let settings = NodeSettings::decode(record.kind, record.config.clone())?;
        let binary = self
            .resolve_binary(record.kind, record.version.as_deref())
            .await?;
        let workspace = self.node_workspace(&record.id);

        let process = self.launch(&record, &settings, binary, &workspace).await?;

        info!(node_id = %record.id, kind = %record.kind, port = process.port(), "Node restored");
        self.nodes
            .write()
            .await
            .insert(record.id, ManagedNode { record, process });
        Ok(())
    }

    /// Stop every node concurrently and wait for all of them.
    pub async fn shutdown(&self) {
        let processes: Vec<(NodeId, Arc<NativeProcess>)> = {
            let nodes = self.nodes.read().await;
            nodes
                .iter()
                .map(|(id, node)| (*id, node.process.clone()))
                .collect()
        };
        info!(count = processes.len(), "Stopping all nodes");

        let mut stops = JoinSet::new();
        for (id, process) in processes {
            stops.spawn(async move {
                process.stop().await;
                debug!(node_id = %id, status = %process.status(), "Node stopped");
            });
        }
        while let Some(joined) = stops.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Node stop task failed");
            }
        }

        info!("All nodes stopped");
    }

    async fn process(&self, id: &NodeId) -> Result<Arc<NativeProcess>, AgentError> {
        let nodes = self.nodes.read().await;
        nodes
            .get(id)
            .map(|node| node.process.clone())
            .ok_or_else(|| AgentError::NodeNotFound(id.to_string()))
    }

    /// Path of the executable for a node of `kind`.
    ///
    /// Without a version, the binary is taken from the local binary directory
    /// and the artifact repository is not consulted.
    async fn resolve_binary(
        &self,
        kind: NodeKind,
        version: Option<&str>,
    ) -> Result<PathBuf, AgentError> {
        match version {
            Some(version) => Ok(self.artifacts.resolve(version, kind.binary_name()).await?),
            None => self
                .config
                .local_binary_path
                .as_ref()
                .map(|dir| dir.join(kind.binary_name()))
                .ok_or(AgentError::NoLocalBinary),
        }
    }

    /// Prepare the workspace, render the config and start the process.
    async fn launch(
        &self,
        record: &NodeRecord,
        settings: &NodeSettings,
        binary: PathBuf,
        workspace: &Path,
    ) -> Result<Arc<NativeProcess>, AgentError> {
        ensure_dir_exists(workspace).await?;
        for subdir in settings.subdirectories() {
            ensure_dir_exists(&workspace.join(subdir)).await?;
        }

        let config_path = workspace.join(CONFIG_FILE_NAME);
        let process = NativeProcess::new(
            record.id.to_string(),
            binary,
            workspace,
            &config_path,
            self.policy.clone(),
        )?;

        let rendered = settings.render(&RenderContext {
            workspace,
            port: process.port(),
            s3: &self.config.s3,
        })?;
        tokio::fs::write(&config_path, rendered).await?;

        process.start(self.config.node_log_level).await?;
        Ok(Arc::new(process))
    }

    async fn discard_workspace(&self, workspace: &Path) {
        if let Err(e) = remove_dir_if_exists(workspace).await {
            warn!(path = %workspace.display(), error = %e, "Failed to clean up node workspace");
        }
    }
}
