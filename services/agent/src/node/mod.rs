//! Node identity, kinds and per-kind settings.

mod settings;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use settings::{
    AmphoraSettings, BlobStorageType, MenmosdSettings, NodeSettings, RenderContext, S3Target,
    SettingsError, CONFIG_FILE_NAME,
};

/// Unique identifier of a node, generated at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for NodeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// The binaries the agent knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// Directory service.
    #[serde(rename = "menmosd")]
    Directory,
    /// Storage service.
    #[serde(rename = "amphora")]
    Storage,
}

impl NodeKind {
    /// Name of the executable, also its logical name in release assets.
    pub fn binary_name(&self) -> &'static str {
        match self {
            Self::Directory => "menmosd",
            Self::Storage => "amphora",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary_name())
    }
}

impl FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "menmosd" => Ok(Self::Directory),
            "amphora" => Ok(Self::Storage),
            other => Err(format!("unknown node type: {other}")),
        }
    }
}
