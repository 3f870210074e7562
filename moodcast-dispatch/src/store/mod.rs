//! Remote blob store abstraction
//!
//! The store is a versioned tree of byte blobs addressed by path. Each blob
//! carries an opaque revision token that changes on every successful write,
//! and writes are conditional on the caller's last-seen revision
//! (optimistic concurrency). There is no append or lock primitive.
//!
//! Implementations:
//! - [`GitHubContentsClient`]: GitHub Contents API over reqwest
//! - [`MemoryBlobStore`]: in-process store with the same revision rules

pub mod github;
pub mod memory;

pub use github::GitHubContentsClient;
pub use memory::{MemoryBlobStore, StoreOperation};

use async_trait::async_trait;
use moodcast_common::config::{StoreBackend, StoreConfig};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Opaque revision token of a blob (a git blob SHA for GitHub)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Revision(String);

impl Revision {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Path plus the revision last observed for it
///
/// `revision == None` means the blob did not exist when observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobRef {
    pub path: String,
    pub revision: Option<Revision>,
}

impl BlobRef {
    pub fn missing(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            revision: None,
        }
    }

    pub fn at(path: impl Into<String>, revision: Revision) -> Self {
        Self {
            path: path.into(),
            revision: Some(revision),
        }
    }
}

/// Blob content with the revision it was read at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub content: Vec<u8>,
    pub revision: Revision,
}

/// Kind of a folder listing entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    /// Symlinks, submodules and anything else
    Other,
}

/// One entry of a folder listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEntry {
    pub name: String,
    pub kind: EntryKind,
    /// Direct download URL, when the store provides one
    pub fetch_url: Option<String>,
}

/// Remote store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Path or folder does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Supplied revision is stale, or a create raced with another writer
    #[error("Revision conflict on {0}")]
    Conflict(String),

    /// Network failure, timeout, 5xx or rate limiting; safe to retry
    #[error("Transient store error: {0}")]
    Transient(String),

    /// Credentials missing, invalid or lacking permission
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Request refused for another reason (4xx)
    #[error("Store rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Response body could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Client could not be constructed
    #[error("Store configuration error: {0}")]
    Config(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Read/write/list access to a remote versioned tree
///
/// Implementations never retry on their own; retry policy belongs to callers.
#[async_trait]
pub trait RemoteBlobClient: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Read a blob and its current revision
    async fn read(&self, path: &str) -> StoreResult<Blob>;

    /// Write a blob conditionally
    ///
    /// `expected == None` creates the blob and fails with `Conflict` if it
    /// already exists. `Some(rev)` replaces it only if `rev` is still current.
    /// Returns the new revision.
    async fn write(
        &self,
        path: &str,
        content: &[u8],
        expected: Option<&Revision>,
        message: &str,
    ) -> StoreResult<Revision>;

    /// List the direct children of a folder
    ///
    /// An existing folder with no entries is `Ok(vec![])`.
    async fn list(&self, folder: &str) -> StoreResult<Vec<StoreEntry>>;

    /// URL a client can download `path` from when a listing omits one
    fn fetch_url(&self, path: &str) -> String;
}

pub type SharedBlobClient = Arc<dyn RemoteBlobClient>;

/// Build the store selected by configuration
pub fn build_client(config: &StoreConfig, token: Option<String>) -> StoreResult<SharedBlobClient> {
    match config.backend {
        StoreBackend::Github => Ok(Arc::new(GitHubContentsClient::new(config, token)?)),
        StoreBackend::Memory => Ok(Arc::new(MemoryBlobStore::new())),
    }
}

/// Join path segments with `/`, ignoring empty segments and stray slashes
pub fn join_path(parts: &[&str]) -> String {
    parts
        .iter()
        .flat_map(|p| p.split('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}
