//! On-disk artifact cache keyed by release version.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::asset::Asset;
use super::platform::HostTarget;
use super::release::ReleaseSource;
use super::ArtifactError;

/// Resolves `(version, name)` pairs to cached executables, downloading a
/// whole release on first use.
///
/// A version directory is only ever created fully populated: assets are
/// downloaded into a staging directory that is renamed into place once every
/// download finished. From then on the directory is authoritative and a
/// missing binary is a permanent error, never a re-download.
pub struct ArtifactRepository {
    root: PathBuf,
    source: Arc<dyn ReleaseSource>,
    client: reqwest::Client,
    target: HostTarget,
    /// Per-version locks so concurrent resolves of one version download once.
    version_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ArtifactRepository {
    pub fn new(
        root: impl Into<PathBuf>,
        source: Arc<dyn ReleaseSource>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            root: root.into(),
            source,
            client,
            target: HostTarget::current(),
            version_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Select assets for a different host than the one we run on.
    pub fn with_target(mut self, target: HostTarget) -> Self {
        self.target = target;
        self
    }

    /// Path of the directory holding the binaries of `version`.
    pub fn version_dir(&self, version: &str) -> PathBuf {
        self.root.join(version)
    }

    /// Resolve `name` at `version` to an executable on disk.
    pub async fn resolve(&self, version: &str, name: &str) -> Result<PathBuf, ArtifactError> {
        validate_component(version)?;
        validate_component(name)?;

        let lock = self.version_lock(version).await;
        let _guard = lock.lock().await;

        let version_dir = self.version_dir(version);
        if !tokio::fs::try_exists(&version_dir).await? {
            self.download_release(version).await?;
        } else {
            debug!(version = %version, "Release already cached");
        }

        let path = version_dir.join(name);
        if tokio::fs::try_exists(&path).await? {
            Ok(path)
        } else {
            Err(ArtifactError::ArtifactNotFound {
                name: name.to_string(),
                version: version.to_string(),
            })
        }
    }

    async fn version_lock(&self, version: &str) -> Arc<Mutex<()>> {
        let mut locks = self.version_locks.lock().await;
        locks
            .entry(version.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn download_release(&self, version: &str) -> Result<(), ArtifactError> {
        let start = Instant::now();
        let assets = self.source.fetch_release(version).await?;
        let selected = select_assets(&assets, &self.target);

        info!(
            version = %version,
            available = assets.len(),
            selected = selected.len(),
            platform = %self.target.platform,
            arch = %self.target.architecture,
            "Downloading release"
        );

        let staging = self.root.join(format!(".staging-{version}"));
        if tokio::fs::try_exists(&staging).await? {
            tokio::fs::remove_dir_all(&staging).await?;
        }
        tokio::fs::create_dir_all(&staging).await?;

        let mut downloads = JoinSet::new();
        for asset in selected {
            let client = self.client.clone();
            let dest = staging.join(asset.name());
            downloads.spawn(async move {
                let result = download_asset(&client, &asset, &dest).await;
                (asset, result)
            });
        }

        while let Some(joined) = downloads.join_next().await {
            match joined {
                Ok((asset, Ok(()))) => {
                    debug!(asset = %asset.full_name, name = %asset.name(), "Downloaded asset");
                }
                Ok((asset, Err(e))) => {
                    warn!(asset = %asset.full_name, error = %e, "Failed to download asset");
                }
                Err(e) => warn!(error = %e, "Asset download task failed"),
            }
        }

        tokio::fs::rename(&staging, self.version_dir(version)).await?;

        info!(
            version = %version,
            duration_ms = start.elapsed().as_millis() as u64,
            "Release cached"
        );
        Ok(())
    }
}

/// Pick the assets built for `target`, one per logical name.
///
/// Architectures are tried in preference order and the first one with any
/// match wins, so fallback architectures are only used when no native build
/// was published.
fn select_assets(assets: &[Asset], target: &HostTarget) -> Vec<Asset> {
    for arch in target.candidate_architectures() {
        let mut by_name: HashMap<&str, &Asset> = HashMap::new();
        for asset in assets {
            if asset.platform().matches(&target.platform) && asset.architecture().matches(&arch) {
                by_name.entry(asset.name()).or_insert(asset);
            }
        }
        if !by_name.is_empty() {
            return by_name.into_values().cloned().collect();
        }
    }
    Vec::new()
}

async fn download_asset(
    client: &reqwest::Client,
    asset: &Asset,
    dest: &Path,
) -> Result<(), ArtifactError> {
    let mut response = client
        .get(&asset.download_url)
        .header(reqwest::header::USER_AGENT, "menmos-agent")
        .send()
        .await?
        .error_for_status()?;

    // A truncated binary must not end up in the cache.
    if let Err(e) = write_body(&mut response, dest).await {
        let _ = tokio::fs::remove_file(dest).await;
        return Err(e);
    }
    set_executable(dest).await?;
    Ok(())
}

/// Stream the response body into `dest` chunk by chunk.
async fn write_body(response: &mut reqwest::Response, dest: &Path) -> Result<(), ArtifactError> {
    let mut file = tokio::fs::File::create(dest).await?;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(())
}

#[cfg(unix)]
async fn set_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await
}

#[cfg(not(unix))]
async fn set_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Reject values that would escape the cache directory.
fn validate_component(value: &str) -> Result<(), ArtifactError> {
    let invalid = value.is_empty()
        || value == "."
        || value == ".."
        || value.starts_with(".staging-")
        || value.contains(['/', '\\']);
    if invalid {
        return Err(ArtifactError::InvalidComponent(value.to_string()));
    }
    Ok(())
}
