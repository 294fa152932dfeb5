//! GitHub-backed artifact store.
//!
//! Artifacts are assets of the repository's `binaries` release; the index is
//! a regular file on the default branch, written through the contents API so
//! that every write is conditioned on the blob SHA that was read.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use para_schema::RemoteAsset;
use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::artifacts::{ArtifactStore, IndexedFile, StoreError};
use crate::repo::RepoKey;

/// Public GitHub REST endpoint.
pub const API_BASE: &str = "https://api.github.com";
/// Host that receives release asset uploads.
pub const UPLOAD_BASE: &str = "https://uploads.github.com";
/// Tag of the release holding every artifact.
pub const RELEASE_TAG: &str = "binaries";

const PER_PAGE: usize = 100;
const MEDIA_TYPE: &str = "application/vnd.github+json";

/// Connection settings for [`GitHubStore`].
#[derive(Clone)]
pub struct GitHubConfig {
    pub token: String,
    pub repo: RepoKey,
    pub api_base: String,
    pub upload_base: String,
    pub release_tag: String,
    /// Limit for a single asset upload.
    pub upload_timeout: Duration,
}

impl std::fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("token", &"<redacted>")
            .field("repo", &self.repo)
            .field("api_base", &self.api_base)
            .field("upload_base", &self.upload_base)
            .field("release_tag", &self.release_tag)
            .field("upload_timeout", &self.upload_timeout)
            .finish()
    }
}

impl GitHubConfig {
    /// Settings for the public GitHub service.
    pub fn new(token: impl Into<String>, repo: RepoKey) -> Self {
        Self {
            token: token.into(),
            repo,
            api_base: API_BASE.to_string(),
            upload_base: UPLOAD_BASE.to_string(),
            release_tag: RELEASE_TAG.to_string(),
            upload_timeout: Duration::from_secs(600),
        }
    }

    /// Point both API and uploads at one base URL (test servers, GHES).
    pub fn with_base_url(mut self, base: &str) -> Self {
        let base = base.trim_end_matches('/');
        self.api_base = base.to_string();
        self.upload_base = base.to_string();
        self
    }
}

#[derive(Debug, Deserialize)]
struct ReleaseResponse {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct AssetResponse {
    id: u64,
    name: String,
    #[serde(default)]
    label: Option<String>,
    size: u64,
    browser_download_url: String,
}

impl From<AssetResponse> for RemoteAsset {
    fn from(a: AssetResponse) -> Self {
        Self {
            id: a.id,
            name: a.name,
            label: a.label.unwrap_or_default(),
            size: a.size,
            url: a.browser_download_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    sha: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Serialize)]
struct ContentsUpdate<'a> {
    message: &'a str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

/// [`ArtifactStore`] backed by one GitHub repository.
#[derive(Debug)]
pub struct GitHubStore {
    client: Client,
    config: GitHubConfig,
    release_id: OnceCell<u64>,
}

impl GitHubStore {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: GitHubConfig) -> Result<Self, StoreError> {
        let client = Client::builder()
            .user_agent(crate::USER_AGENT)
            .build()
            .map_err(|source| StoreError::Http {
                call: "build client",
                source,
            })?;
        Ok(Self {
            client,
            config,
            release_id: OnceCell::new(),
        })
    }

    fn api_url(&self, rest: &str) -> String {
        format!("{}{}{rest}", self.config.api_base, self.config.repo.api_path())
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.config.token)
            .header(ACCEPT, MEDIA_TYPE)
    }

    async fn send(call: &'static str, request: RequestBuilder) -> Result<Response, StoreError> {
        request
            .send()
            .await
            .map_err(|source| StoreError::Http { call, source })
    }

    async fn json<T: for<'de> Deserialize<'de>>(
        call: &'static str,
        response: Response,
    ) -> Result<T, StoreError> {
        response
            .json()
            .await
            .map_err(|source| StoreError::Http { call, source })
    }

    /// ID of the binaries release, looked up once.
    async fn release_id(&self) -> Result<u64, StoreError> {
        self.release_id
            .get_or_try_init(|| async {
                let call = "get release";
                let url = self.api_url(&format!("/releases/tags/{}", self.config.release_tag));
                let response = Self::send(call, self.authorized(self.client.get(url))).await?;
                if response.status() == StatusCode::NOT_FOUND {
                    return Err(StoreError::ReleaseNotFound(self.config.release_tag.clone()));
                }
                let response = ensure_success(call, response).await?;
                let release: ReleaseResponse = Self::json(call, response).await?;
                debug!(id = release.id, tag = %self.config.release_tag, "resolved release");
                Ok(release.id)
            })
            .await
            .copied()
    }
}

/// Pass successful responses through; turn anything else into a status error.
async fn ensure_success(call: &'static str, response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Status {
        call,
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl ArtifactStore for GitHubStore {
    async fn list_release_assets(&self) -> Result<Vec<RemoteAsset>, StoreError> {
        let call = "list assets";
        let id = self.release_id().await?;
        let url = self.api_url(&format!("/releases/{id}/assets"));

        let mut assets = Vec::new();
        for page in 1.. {
            let request = self
                .client
                .get(&url)
                .query(&[("per_page", PER_PAGE), ("page", page)]);
            let response = Self::send(call, self.authorized(request)).await?;
            let response = ensure_success(call, response).await?;
            let batch: Vec<AssetResponse> = Self::json(call, response).await?;
            let last = batch.len() < PER_PAGE;
            assets.extend(batch.into_iter().map(RemoteAsset::from));
            if last {
                break;
            }
        }
        debug!(count = assets.len(), "listed release assets");
        Ok(assets)
    }

    async fn upload_asset(&self, path: &Path, name: &str, label: &str) -> Result<(), StoreError> {
        let call = "upload asset";
        let id = self.release_id().await?;
        let size = tokio::fs::metadata(path).await?.len();
        let file = tokio::fs::File::open(path).await?;

        let url = format!(
            "{}{}/releases/{id}/assets",
            self.config.upload_base,
            self.config.repo.api_path()
        );
        let request = self
            .client
            .post(url)
            .query(&[("name", name), ("label", label)])
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, size)
            .timeout(self.config.upload_timeout)
            .body(file);
        let response = Self::send(call, self.authorized(request)).await?;
        ensure_success(call, response).await?;
        info!(name, size, "uploaded asset");
        Ok(())
    }

    async fn read_indexed_file(&self, path: &str) -> Result<Option<IndexedFile>, StoreError> {
        let call = "read file";
        let url = self.api_url(&format!("/contents/{path}"));
        let response = Self::send(call, self.authorized(self.client.get(url))).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = ensure_success(call, response).await?;
        let contents: ContentsResponse = Self::json(call, response).await?;

        // The API wraps base64 at 60 columns.
        let packed: String = contents
            .content
            .chars()
            .filter(|c| !c.is_ascii_whitespace())
            .collect();
        let content = STANDARD
            .decode(packed)
            .map_err(|e| StoreError::InvalidContent {
                path: path.to_string(),
                message: e.to_string(),
            })?;
        Ok(Some(IndexedFile {
            content,
            version: contents.sha,
        }))
    }

    async fn write_indexed_file(
        &self,
        path: &str,
        content: &[u8],
        version: Option<&str>,
        message: &str,
    ) -> Result<(), StoreError> {
        let call = "write file";
        let url = self.api_url(&format!("/contents/{path}"));
        let body = ContentsUpdate {
            message,
            content: STANDARD.encode(content),
            sha: version,
        };
        let response = Self::send(call, self.authorized(self.client.put(url).json(&body))).await?;
        match response.status() {
            StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => Err(StoreError::Conflict {
                path: path.to_string(),
            }),
            _ => {
                ensure_success(call, response).await?;
                info!(path, "wrote file");
                Ok(())
            }
        }
    }
}
