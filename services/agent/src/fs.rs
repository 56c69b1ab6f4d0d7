//! Filesystem helpers.

use std::io::ErrorKind;
use std::path::Path;

/// Create `path` and its parents if missing.
pub async fn ensure_dir_exists(path: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(path).await
}

/// Remove a directory tree, treating a missing directory as already removed.
pub async fn remove_dir_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
