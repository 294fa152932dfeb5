//! The release store: where built artifacts and the index file live.
//!
//! The store is bound to one repository at construction; callers never pass
//! an organization or repository name per call.

use std::path::Path;

use async_trait::async_trait;
use para_schema::RemoteAsset;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{call} failed: {source}")]
    Http {
        call: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{call} returned HTTP {status}: {body}")]
    Status {
        call: &'static str,
        status: u16,
        body: String,
    },

    #[error("release '{0}' not found")]
    ReleaseNotFound(String),

    #[error("{path} changed since it was read; refusing to overwrite")]
    Conflict { path: String },

    #[error("invalid content for {path}: {message}")]
    InvalidContent { path: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A file read from the store together with its optimistic-concurrency token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedFile {
    /// Raw file content.
    pub content: Vec<u8>,
    /// Version token to pass back when writing.
    pub version: String,
}

/// Client for the remote artifact store.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// List every asset attached to the binaries release.
    async fn list_release_assets(&self) -> Result<Vec<RemoteAsset>, StoreError>;

    /// Upload the file at `path` as a new asset with the given name and label.
    async fn upload_asset(&self, path: &Path, name: &str, label: &str) -> Result<(), StoreError>;

    /// Read a repository file. `None` when it does not exist yet.
    async fn read_indexed_file(&self, path: &str) -> Result<Option<IndexedFile>, StoreError>;

    /// Write a repository file, conditioned on `version` (the token from the
    /// last read, `None` to create).
    ///
    /// Returns [`StoreError::Conflict`] when the file changed in between.
    async fn write_indexed_file(
        &self,
        path: &str,
        content: &[u8],
        version: Option<&str>,
        message: &str,
    ) -> Result<(), StoreError>;
}
