//! Integration tests for the artifact repository.
//!
//! Release listings come from an in-memory source that counts fetches; asset
//! downloads are served by a wiremock server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use menmos_agent::artifact::{
    Architecture, ArtifactError, ArtifactRepository, Asset, HostTarget, Platform, ReleaseSource,
};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Release source backed by a map of version -> assets.
#[derive(Default)]
struct InMemoryReleases {
    releases: HashMap<String, Vec<Asset>>,
    fetches: AtomicUsize,
}

impl InMemoryReleases {
    fn with_release(mut self, version: &str, assets: Vec<Asset>) -> Self {
        self.releases.insert(version.to_string(), assets);
        self
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReleaseSource for InMemoryReleases {
    async fn fetch_release(&self, version: &str) -> Result<Vec<Asset>, ArtifactError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.releases
            .get(version)
            .cloned()
            .ok_or_else(|| ArtifactError::ReleaseNotFound(version.to_string()))
    }
}

const LINUX_AMD64: HostTarget = HostTarget {
    platform: Platform::Linux,
    architecture: Architecture::Amd64,
};

async fn serve_assets(server: &MockServer, files: &[(&str, &str)]) {
    for (name, body) in files {
        Mock::given(method("GET"))
            .and(path(format!("/download/{name}")))
            .respond_with(ResponseTemplate::new(200).set_body_string(*body))
            .mount(server)
            .await;
    }
}

fn asset(server: &MockServer, name: &str) -> Asset {
    Asset::new(name, format!("{}/download/{name}", server.uri()))
}

fn repository(dir: &TempDir, source: Arc<InMemoryReleases>) -> ArtifactRepository {
    ArtifactRepository::new(dir.path().join("pkg"), source, reqwest::Client::new())
        .with_target(LINUX_AMD64)
}

#[tokio::test]
async fn test_resolve_downloads_once_then_hits_cache() {
    let server = MockServer::start().await;
    serve_assets(
        &server,
        &[
            ("menmosd-linux-amd64", "menmosd linux"),
            ("amphora-linux-x86_64", "amphora linux"),
            ("menmosd-darwin-amd64", "menmosd darwin"),
            ("menmosd-linux-arm64", "menmosd arm"),
        ],
    )
    .await;

    let source = Arc::new(InMemoryReleases::default().with_release(
        "v0.2.6",
        vec![
            asset(&server, "menmosd-linux-amd64"),
            asset(&server, "amphora-linux-x86_64"),
            asset(&server, "menmosd-darwin-amd64"),
            asset(&server, "menmosd-linux-arm64"),
        ],
    ));
    let dir = TempDir::new().unwrap();
    let repo = repository(&dir, source.clone());

    let menmosd = repo.resolve("v0.2.6", "menmosd").await.unwrap();
    assert_eq!(menmosd, dir.path().join("pkg/v0.2.6/menmosd"));
    assert_eq!(std::fs::read_to_string(&menmosd).unwrap(), "menmosd linux");
    assert_eq!(source.fetches(), 1);

    // Only the host's assets were downloaded, under their logical names.
    let mut cached: Vec<String> = std::fs::read_dir(repo.version_dir("v0.2.6"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    cached.sort();
    assert_eq!(cached, vec!["amphora", "menmosd"]);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&menmosd).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    // Cached: no further release fetch and no further download.
    let requests_before = server.received_requests().await.unwrap().len();
    let amphora = repo.resolve("v0.2.6", "amphora").await.unwrap();
    assert_eq!(std::fs::read_to_string(amphora).unwrap(), "amphora linux");
    assert_eq!(source.fetches(), 1);
    assert_eq!(
        server.received_requests().await.unwrap().len(),
        requests_before
    );
}

#[tokio::test]
async fn test_missing_artifact_in_cached_version_is_permanent() {
    let server = MockServer::start().await;
    serve_assets(&server, &[("menmosd-linux-amd64", "menmosd")]).await;

    let source = Arc::new(
        InMemoryReleases::default()
            .with_release("v0.2.6", vec![asset(&server, "menmosd-linux-amd64")]),
    );
    let dir = TempDir::new().unwrap();
    let repo = repository(&dir, source.clone());

    let err = repo.resolve("v0.2.6", "amphora").await.unwrap_err();
    assert!(matches!(
        &err,
        ArtifactError::ArtifactNotFound { name, version } if name == "amphora" && version == "v0.2.6"
    ));
    assert_eq!(
        err.to_string(),
        "artifact 'amphora' does not exist for version 'v0.2.6'"
    );
    assert_eq!(source.fetches(), 1);

    // The version directory exists now: no re-fetch on the second miss.
    assert!(repo.resolve("v0.2.6", "amphora").await.is_err());
    assert_eq!(source.fetches(), 1);
}

#[tokio::test]
async fn test_failed_download_does_not_abort_siblings() {
    let server = MockServer::start().await;
    serve_assets(&server, &[("amphora-linux-amd64", "amphora")]).await;
    Mock::given(method("GET"))
        .and(path("/download/menmosd-linux-amd64"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let source = Arc::new(InMemoryReleases::default().with_release(
        "v0.2.6",
        vec![
            asset(&server, "menmosd-linux-amd64"),
            asset(&server, "amphora-linux-amd64"),
        ],
    ));
    let dir = TempDir::new().unwrap();
    let repo = repository(&dir, source);

    assert!(repo.resolve("v0.2.6", "amphora").await.is_ok());
    assert!(matches!(
        repo.resolve("v0.2.6", "menmosd").await,
        Err(ArtifactError::ArtifactNotFound { .. })
    ));
}

#[tokio::test]
async fn test_large_asset_is_written_intact() {
    let server = MockServer::start().await;
    let body: Vec<u8> = (0..4 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
    Mock::given(method("GET"))
        .and(path("/download/amphora-linux-amd64"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let source = Arc::new(
        InMemoryReleases::default()
            .with_release("v0.2.6", vec![asset(&server, "amphora-linux-amd64")]),
    );
    let dir = TempDir::new().unwrap();
    let repo = repository(&dir, source);

    let amphora = repo.resolve("v0.2.6", "amphora").await.unwrap();
    assert_eq!(std::fs::read(amphora).unwrap(), body);
}

#[tokio::test]
async fn test_release_without_host_assets() {
    let server = MockServer::start().await;
    let source = Arc::new(InMemoryReleases::default().with_release(
        "v0.2.6",
        vec![asset(&server, "menmosd-windows-amd64.exe")],
    ));
    let dir = TempDir::new().unwrap();
    let repo = repository(&dir, source);

    assert!(matches!(
        repo.resolve("v0.2.6", "menmosd").await,
        Err(ArtifactError::ArtifactNotFound { .. })
    ));
    // The version is materialized, just empty.
    let entries = std::fs::read_dir(repo.version_dir("v0.2.6")).unwrap().count();
    assert_eq!(entries, 0);
}

#[tokio::test]
async fn test_unknown_release_leaves_no_cache_entry() {
    let source = Arc::new(InMemoryReleases::default());
    let dir = TempDir::new().unwrap();
    let repo = repository(&dir, source.clone());

    assert!(matches!(
        repo.resolve("v9.9.9", "menmosd").await,
        Err(ArtifactError::ReleaseNotFound(_))
    ));
    assert!(!repo.version_dir("v9.9.9").exists());

    // Not cached, so the next attempt asks the source again.
    assert!(repo.resolve("v9.9.9", "menmosd").await.is_err());
    assert_eq!(source.fetches(), 2);
}

#[tokio::test]
async fn test_concurrent_resolves_fetch_once() {
    let server = MockServer::start().await;
    serve_assets(
        &server,
        &[
            ("menmosd-linux-amd64", "menmosd"),
            ("amphora-linux-amd64", "amphora"),
        ],
    )
    .await;

    let source = Arc::new(InMemoryReleases::default().with_release(
        "v0.2.6",
        vec![
            asset(&server, "menmosd-linux-amd64"),
            asset(&server, "amphora-linux-amd64"),
        ],
    ));
    let dir = TempDir::new().unwrap();
    let repo = Arc::new(repository(&dir, source.clone()));

    let a = tokio::spawn({
        let repo = repo.clone();
        async move { repo.resolve("v0.2.6", "menmosd").await }
    });
    let b = tokio::spawn({
        let repo = repo.clone();
        async move { repo.resolve("v0.2.6", "amphora").await }
    });

    assert!(a.await.unwrap().is_ok());
    assert!(b.await.unwrap().is_ok());
    assert_eq!(source.fetches(), 1);
}

#[tokio::test]
async fn test_rejects_path_traversal() {
    let source = Arc::new(InMemoryReleases::default());
    let dir = TempDir::new().unwrap();
    let repo = repository(&dir, source.clone());

    assert!(matches!(
        repo.resolve("../outside", "menmosd").await,
        Err(ArtifactError::InvalidComponent(_))
    ));
    assert!(matches!(
        repo.resolve("v0.2.6", "../../bin/sh").await,
        Err(ArtifactError::InvalidComponent(_))
    ));
    assert_eq!(source.fetches(), 0);
}
