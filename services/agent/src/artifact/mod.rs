//! Artifact repository: resolves `(version, binary)` pairs to local executables.
//!
//! Releases are fetched from a [`ReleaseSource`], filtered down to the assets
//! built for this host and cached on disk as `<root>/<version>/<name>`.

mod asset;
mod platform;
mod release;
mod repository;

use thiserror::Error;

pub use asset::Asset;
pub use platform::{Architecture, HostTarget, Platform};
pub use release::{GithubReleaseSource, ReleaseSource, GITHUB_API_URL};
pub use repository::ArtifactRepository;

/// Errors from artifact resolution.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact '{name}' does not exist for version '{version}'")]
    ArtifactNotFound { name: String, version: String },

    #[error("Release not found: {0}")]
    ReleaseNotFound(String),

    #[error("Release source error: {0}")]
    ReleaseSource(String),

    #[error("Invalid release repository '{0}', expected owner/repo")]
    InvalidRepository(String),

    #[error("Invalid version or artifact name: '{0}'")]
    InvalidComponent(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
