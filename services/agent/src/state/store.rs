//! File-backed node record store.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::node::{NodeId, NodeKind};

/// Errors from state store operations.
#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt record {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Everything needed to bring a node back after an agent restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub kind: NodeKind,
    /// Release version; `None` runs the locally configured binary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Kind-specific settings, already normalized.
    #[serde(default)]
    pub config: Value,
}

/// Directory of `<id>.json` node records.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, StateStoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        debug!(path = %dir.display(), "Opened state store");
        Ok(Self { dir })
    }

    fn record_path(&self, id: &NodeId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Get a record by id.
    pub fn get(&self, id: &NodeId) -> Result<Option<NodeRecord>, StateStoreError> {
        let path = self.record_path(id);
        match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|source| StateStoreError::Corrupt { path, source }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Insert or replace a record.
    ///
    /// The record is written to a temporary file and renamed over the old
    /// one, so readers never see a partial record.
    pub fn save(&self, record: &NodeRecord) -> Result<(), StateStoreError> {
        let path = self.record_path(&record.id);
        let tmp = self.dir.join(format!(".{}.json.tmp", record.id));

        fs::write(&tmp, serde_json::to_vec_pretty(record)?)?;
        fs::rename(&tmp, &path)?;

        debug!(node_id = %record.id, kind = %record.kind, "Saved node record");
        Ok(())
    }

    /// Delete a record. Deleting a missing record is not an error.
    pub fn delete(&self, id: &NodeId) -> Result<(), StateStoreError> {
        match fs::remove_file(self.record_path(id)) {
            Ok(()) => {
                debug!(node_id = %id, "Deleted node record");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// List every readable record, in no particular order.
    ///
    /// Files that are not `*.json` are ignored. Unparsable records are logged
    /// and skipped so one corrupt file cannot hide the others.
    pub fn list(&self) -> Result<Vec<NodeRecord>, StateStoreError> {
        let mut records = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();

            if !entry.file_type()?.is_file()
                || path.extension().and_then(|e| e.to_str()) != Some("json")
            {
                continue;
            }

            let parsed = fs::read(&path)
                .map_err(StateStoreError::from)
                .and_then(|bytes| {
                    serde_json::from_slice::<NodeRecord>(&bytes).map_err(|source| {
                        StateStoreError::Corrupt {
                            path: path.clone(),
                            source,
                        }
                    })
                });
            match parsed {
                Ok(record) => records.push(record),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable node record"),
            }
        }

        Ok(records)
    }
}
