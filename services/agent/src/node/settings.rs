//! Kind-specific node settings and their `config.toml` renderers.
//!
//! Settings arrive as a loosely-shaped JSON map: unknown fields are ignored
//! and missing ones default, only a type mismatch is rejected. Each kind
//! renders to the TOML layout its binary reads with `--cfg`.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::NodeKind;

/// Name of the rendered configuration inside a node workspace.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// S3 cache size handed to storage nodes (1 GiB).
const S3_CACHE_SIZE: u64 = 1024 * 1024 * 1024;

/// Errors from decoding or rendering node settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Invalid {kind} config: {source}")]
    Invalid {
        kind: NodeKind,
        #[source]
        source: serde_json::Error,
    },

    #[error("S3 blob storage requires an S3 bucket in the agent configuration")]
    MissingS3Bucket,

    #[error("Failed to render config: {0}")]
    Render(#[from] toml::ser::Error),
}

/// Settings of a directory (`menmosd`) node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MenmosdSettings {
    pub node_admin_password: String,
    pub node_encryption_key: String,
    pub node_routing_algorithm: String,
    /// `http` or `https`.
    pub server_mode: String,
}

/// Where a storage node keeps its blobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobStorageType {
    #[default]
    Disk,
    S3,
}

/// Settings of a storage (`amphora`) node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmphoraSettings {
    pub name: String,
    pub directory_host: String,
    pub directory_port: u16,
    pub node_encryption_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum_capacity: Option<u64>,
    pub blob_storage_type: BlobStorageType,
    pub redirect_ip: String,
    pub subnet_mask: String,
}

/// S3 location shared by every storage node of this agent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct S3Target {
    pub bucket: Option<String>,
    pub region: Option<String>,
}

/// Host-side values a renderer needs besides the settings themselves.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    /// Node workspace; data paths are laid out below it.
    pub workspace: &'a Path,
    /// Port allocated to the node's server.
    pub port: u16,
    pub s3: &'a S3Target,
}

/// Decoded settings, one variant per [`NodeKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeSettings {
    Menmosd(MenmosdSettings),
    Amphora(AmphoraSettings),
}

impl NodeSettings {
    /// Decode the request map of a node of `kind`. `null` means all defaults.
    pub fn decode(kind: NodeKind, config: Value) -> Result<Self, SettingsError> {
        let invalid = |source: serde_json::Error| SettingsError::Invalid { kind, source };
        // Structs also deserialize from sequences by position; only a map
        // names its fields.
        let config = match config {
            Value::Null => Value::Object(Default::default()),
            map @ Value::Object(_) => map,
            _ => {
                return Err(invalid(serde::de::Error::custom(
                    "expected a map of settings",
                )))
            }
        };

        match kind {
            NodeKind::Directory => serde_json::from_value(config)
                .map(Self::Menmosd)
                .map_err(invalid),
            NodeKind::Storage => serde_json::from_value(config)
                .map(Self::Amphora)
                .map_err(invalid),
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Menmosd(_) => NodeKind::Directory,
            Self::Amphora(_) => NodeKind::Storage,
        }
    }

    /// Normalized JSON form, as persisted in node records.
    pub fn to_value(&self) -> Value {
        let encoded = match self {
            Self::Menmosd(s) => serde_json::to_value(s),
            Self::Amphora(s) => serde_json::to_value(s),
        };
        // Plain structs of strings and integers always encode.
        encoded.unwrap_or(Value::Null)
    }

    /// Workspace subdirectories the binary expects to exist.
    pub fn subdirectories(&self) -> &'static [&'static str] {
        match self {
            Self::Menmosd(_) => &["db"],
            Self::Amphora(s) => match s.blob_storage_type {
                BlobStorageType::Disk => &["db", "blob", "cert"],
                BlobStorageType::S3 => &["db", "cache", "cert"],
            },
        }
    }

    /// Render the `config.toml` contents for this node.
    pub fn render(&self, ctx: &RenderContext<'_>) -> Result<String, SettingsError> {
        match self {
            Self::Menmosd(s) => render_menmosd(s, ctx),
            Self::Amphora(s) => render_amphora(s, ctx),
        }
    }
}

fn render_menmosd(s: &MenmosdSettings, ctx: &RenderContext<'_>) -> Result<String, SettingsError> {
    let file = menmosd_file::Config {
        server: menmosd_file::Server {
            kind: s.server_mode.clone(),
            port: ctx.port,
        },
        node: menmosd_file::Node {
            db_path: ctx.workspace.join("db"),
            admin_password: s.node_admin_password.clone(),
            encryption_key: s.node_encryption_key.clone(),
            routing_algorithm: s.node_routing_algorithm.clone(),
        },
    };
    Ok(toml::to_string(&file)?)
}

fn render_amphora(s: &AmphoraSettings, ctx: &RenderContext<'_>) -> Result<String, SettingsError> {
    let blob_storage = match s.blob_storage_type {
        BlobStorageType::Disk => amphora_file::BlobStorage {
            kind: "Directory".to_string(),
            path: Some(ctx.workspace.join("blob")),
            ..Default::default()
        },
        BlobStorageType::S3 => {
            let bucket = ctx
                .s3
                .bucket
                .clone()
                .filter(|b| !b.is_empty())
                .ok_or(SettingsError::MissingS3Bucket)?;
            amphora_file::BlobStorage {
                kind: "S3".to_string(),
                bucket: Some(bucket),
                region: ctx.s3.region.clone().filter(|r| !r.is_empty()),
                cache_path: Some(ctx.workspace.join("cache")),
                cache_size: Some(S3_CACHE_SIZE),
                ..Default::default()
            }
        }
    };

    let file = amphora_file::Config {
        directory: amphora_file::Directory {
            url: s.directory_host.clone(),
            port: s.directory_port,
        },
        node: amphora_file::Node {
            name: s.name.clone(),
            db_path: ctx.workspace.join("db"),
            encryption_key: s.node_encryption_key.clone(),
            maximum_capacity: s.maximum_capacity,
            blob_storage,
        },
        server: amphora_file::Server {
            certificate_storage_path: ctx.workspace.join("cert"),
            port: ctx.port,
        },
        redirect: amphora_file::Redirect {
            ip: s.redirect_ip.clone(),
            subnet_mask: s.subnet_mask.clone(),
        },
    };
    Ok(toml::to_string(&file)?)
}

fn is_zero(port: &u16) -> bool {
    *port == 0
}

/// On-disk layout read by `menmosd`.
mod menmosd_file {
    use std::path::PathBuf;

    use serde::Serialize;

    use super::is_zero;

    #[derive(Serialize)]
    pub struct Config {
        pub server: Server,
        pub node: Node,
    }

    #[derive(Serialize)]
    pub struct Server {
        #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
        pub kind: String,
        #[serde(skip_serializing_if = "is_zero")]
        pub port: u16,
    }

    #[derive(Serialize)]
    pub struct Node {
        pub db_path: PathBuf,
        #[serde(skip_serializing_if = "String::is_empty")]
        pub admin_password: String,
        #[serde(skip_serializing_if = "String::is_empty")]
        pub encryption_key: String,
        #[serde(skip_serializing_if = "String::is_empty")]
        pub routing_algorithm: String,
    }
}

/// On-disk layout read by `amphora`.
mod amphora_file {
    use std::path::PathBuf;

    use serde::Serialize;

    use super::is_zero;

    #[derive(Serialize)]
    pub struct Config {
        pub directory: Directory,
        pub node: Node,
        pub server: Server,
        #[serde(skip_serializing_if = "Redirect::is_empty")]
        pub redirect: Redirect,
    }

    #[derive(Serialize)]
    pub struct Directory {
        #[serde(skip_serializing_if = "String::is_empty")]
        pub url: String,
        #[serde(skip_serializing_if = "is_zero")]
        pub port: u16,
    }

    #[derive(Serialize)]
    pub struct Node {
        #[serde(skip_serializing_if = "String::is_empty")]
        pub name: String,
        pub db_path: PathBuf,
        #[serde(skip_serializing_if = "String::is_empty")]
        pub encryption_key: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub maximum_capacity: Option<u64>,
        pub blob_storage: BlobStorage,
    }

    #[derive(Serialize, Default)]
    pub struct BlobStorage {
        #[serde(rename = "type")]
        pub kind: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub path: Option<PathBuf>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub bucket: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub region: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub cache_path: Option<PathBuf>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub cache_size: Option<u64>,
    }

    #[derive(Serialize)]
    pub struct Server {
        pub certificate_storage_path: PathBuf,
        #[serde(skip_serializing_if = "is_zero")]
        pub port: u16,
    }

    #[derive(Serialize)]
    pub struct Redirect {
        #[serde(skip_serializing_if = "String::is_empty")]
        pub ip: String,
        #[serde(skip_serializing_if = "String::is_empty")]
        pub subnet_mask: String,
    }

    impl Redirect {
        pub fn is_empty(&self) -> bool {
            self.ip.is_empty() && self.subnet_mask.is_empty()
        }
    }
}
