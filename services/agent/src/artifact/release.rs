//! Release sources: where the asset list for a version comes from.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use super::asset::Asset;
use super::ArtifactError;

/// Default API host for the GitHub release source.
pub const GITHUB_API_URL: &str = "https://api.github.com";

/// Fetches the full asset list of a released version.
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// List every asset published for `version`, regardless of platform.
    async fn fetch_release(&self, version: &str) -> Result<Vec<Asset>, ArtifactError>;
}

/// Release source backed by the GitHub releases REST API.
pub struct GithubReleaseSource {
    client: reqwest::Client,
    api_url: String,
    owner: String,
    repo: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubRelease {
    #[serde(default)]
    assets: Vec<GithubAsset>,
}

#[derive(Debug, Deserialize)]
struct GithubAsset {
    name: String,
    browser_download_url: String,
}

impl GithubReleaseSource {
    /// Create a source for `owner/repo` on the public GitHub API.
    pub fn new(client: reqwest::Client, owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            client,
            api_url: GITHUB_API_URL.to_string(),
            owner: owner.into(),
            repo: repo.into(),
            token: None,
        }
    }

    /// Parse an `owner/repo` slug.
    pub fn from_slug(client: reqwest::Client, slug: &str) -> Result<Self, ArtifactError> {
        match slug.split_once('/') {
            Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') => {
                Ok(Self::new(client, owner, repo))
            }
            _ => Err(ArtifactError::InvalidRepository(slug.to_string())),
        }
    }

    /// Authenticate requests with a bearer token.
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.is_empty());
        self
    }

    /// Point the source at a different API host (GitHub Enterprise, tests).
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }

    fn release_url(&self, version: &str) -> String {
        format!(
            "{}/repos/{}/{}/releases/tags/{}",
            self.api_url, self.owner, self.repo, version
        )
    }
}

#[async_trait]
impl ReleaseSource for GithubReleaseSource {
    async fn fetch_release(&self, version: &str) -> Result<Vec<Asset>, ArtifactError> {
        let url = self.release_url(version);
        debug!(url = %url, version = %version, "Fetching release");

        let mut request = self
            .client
            .get(&url)
            .header(reqwest::header::USER_AGENT, "menmos-agent")
            .header(reqwest::header::ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Err(ArtifactError::ReleaseNotFound(version.to_string())),
            status => {
                return Err(ArtifactError::ReleaseSource(format!(
                    "unexpected status {status} fetching release {version}"
                )))
            }
        }

        let release: GithubRelease = response.json().await?;
        Ok(release
            .assets
            .into_iter()
            .map(|a| Asset::new(a.name, a.browser_download_url))
            .collect())
    }
}
