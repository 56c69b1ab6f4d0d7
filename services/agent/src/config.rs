//! Configuration for the agent.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::node::S3Target;
use crate::process::LogLevel;

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the control API listens on.
    pub listen_addr: SocketAddr,

    /// Root of the artifact cache, node workspaces and state store.
    pub data_dir: PathBuf,

    /// Log level for the agent itself (trace, debug, info, warn, error).
    pub log_level: String,

    /// Token for the release host, if any.
    pub github_token: Option<String>,

    /// Release repository as `owner/repo`.
    pub release_repo: String,

    /// Directory holding binaries for nodes created without a version.
    pub local_binary_path: Option<PathBuf>,

    /// Bucket and region for storage nodes using S3 blob storage.
    pub s3: S3Target,

    /// Verbosity passed to node binaries.
    pub node_log_level: LogLevel,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        // Empty values are treated as unset.
        let get = |key: &str| get(key).filter(|v| !v.is_empty());

        let listen_addr = get("MENMOS_AGENT_LISTEN_ADDR")
            .unwrap_or_else(|| "0.0.0.0:3030".to_string())
            .parse()
            .context("invalid MENMOS_AGENT_LISTEN_ADDR")?;

        let data_dir = get("MENMOS_AGENT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./menmos_agent_data"));

        let log_level = get("MENMOS_AGENT_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let node_log_level = match get("MENMOS_AGENT_NODE_LOG_LEVEL") {
            Some(level) => level
                .parse()
                .map_err(anyhow::Error::msg)
                .context("invalid MENMOS_AGENT_NODE_LOG_LEVEL")?,
            None => LogLevel::Normal,
        };

        Ok(Self {
            listen_addr,
            data_dir,
            log_level,
            github_token: get("MENMOS_AGENT_GITHUB_TOKEN"),
            release_repo: get("MENMOS_AGENT_RELEASE_REPO")
                .unwrap_or_else(|| "menmos/menmos".to_string()),
            local_binary_path: get("MENMOS_AGENT_LOCAL_BINARY_PATH").map(PathBuf::from),
            s3: S3Target {
                bucket: get("MENMOS_AGENT_S3_BUCKET"),
                region: get("MENMOS_AGENT_S3_REGION"),
            },
            node_log_level,
        })
    }

    /// Configuration rooted at `data_dir` with every other setting defaulted.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            data_dir: data_dir.into(),
            log_level: "info".to_string(),
            github_token: None,
            release_repo: "menmos/menmos".to_string(),
            local_binary_path: None,
            s3: S3Target::default(),
            node_log_level: LogLevel::Normal,
        }
    }

    /// Artifact cache directory.
    pub fn pkg_dir(&self) -> PathBuf {
        self.data_dir.join("pkg")
    }

    /// Parent of all node workspaces.
    pub fn node_dir(&self) -> PathBuf {
        self.data_dir.join("node")
    }

    /// State store directory.
    pub fn state_dir(&self) -> PathBuf {
        self.data_dir.join("state")
    }
}
