//! In-process blob store
//!
//! Same revision semantics as the GitHub backend: every successful write
//! produces a fresh revision, creates fail if the path exists, and updates
//! fail unless the caller's revision is current. Folders exist implicitly
//! when a file lives under them, or explicitly via [`MemoryBlobStore::create_folder`].
//!
//! Also records per-operation call counts and can inject transient failures,
//! which the test suites rely on.

use super::{join_path, Blob, EntryKind, RemoteBlobClient, Revision, StoreEntry, StoreError, StoreResult};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

/// Store operation, for call counting and fault injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    Read,
    Write,
    List,
}

#[derive(Debug)]
struct StoredBlob {
    content: Vec<u8>,
    revision: Revision,
}

#[derive(Debug, Default)]
struct Inner {
    blobs: BTreeMap<String, StoredBlob>,
    folders: BTreeSet<String>,
    next_revision: u64,
    calls: HashMap<StoreOperation, usize>,
    pending_failures: HashMap<StoreOperation, u32>,
}

impl Inner {
    fn bump_revision(&mut self) -> Revision {
        self.next_revision += 1;
        Revision::new(format!("mem-{:08x}", self.next_revision))
    }

    /// Count the call and consume one injected failure, if any
    fn enter(&mut self, op: StoreOperation) -> StoreResult<()> {
        *self.calls.entry(op).or_default() += 1;
        if let Some(remaining) = self.pending_failures.get_mut(&op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StoreError::Transient(format!("injected {:?} failure", op)));
            }
        }
        Ok(())
    }

    fn folder_exists(&self, folder: &str) -> bool {
        if folder.is_empty() || self.folders.contains(folder) {
            return true;
        }
        let prefix = format!("{}/", folder);
        self.blobs.keys().any(|k| k.starts_with(&prefix))
            || self.folders.iter().any(|f| f.starts_with(&prefix))
    }
}

/// In-memory [`RemoteBlobClient`]
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    inner: Mutex<Inner>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace a blob unconditionally, returning its new revision
    pub fn put(&self, path: &str, content: impl Into<Vec<u8>>) -> Revision {
        let mut inner = self.lock();
        let revision = inner.bump_revision();
        inner.blobs.insert(
            join_path(&[path]),
            StoredBlob {
                content: content.into(),
                revision: revision.clone(),
            },
        );
        revision
    }

    /// Make an empty folder exist
    pub fn create_folder(&self, folder: &str) {
        self.lock().folders.insert(join_path(&[folder]));
    }

    /// Current content of a blob, bypassing call accounting
    pub fn content(&self, path: &str) -> Option<Vec<u8>> {
        self.lock()
            .blobs
            .get(&join_path(&[path]))
            .map(|b| b.content.clone())
    }

    /// Number of calls made for an operation
    pub fn calls(&self, op: StoreOperation) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Make the next `times` calls of `op` fail with a transient error
    pub fn fail_next(&self, op: StoreOperation, times: u32) {
        self.lock().pending_failures.insert(op, times);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock only means a test panicked mid-call; the map is still usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl RemoteBlobClient for MemoryBlobStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn read(&self, path: &str) -> StoreResult<Blob> {
        let path = join_path(&[path]);
        let mut inner = self.lock();
        inner.enter(StoreOperation::Read)?;
        inner
            .blobs
            .get(&path)
            .map(|b| Blob {
                content: b.content.clone(),
                revision: b.revision.clone(),
            })
            .ok_or(StoreError::NotFound(path))
    }

    async fn write(
        &self,
        path: &str,
        content: &[u8],
        expected: Option<&Revision>,
        message: &str,
    ) -> StoreResult<Revision> {
        let path = join_path(&[path]);
        let mut inner = self.lock();
        inner.enter(StoreOperation::Write)?;

        let current = inner.blobs.get(&path).map(|b| &b.revision);
        match (current, expected) {
            (None, None) => {}
            (Some(current), Some(expected)) if current == expected => {}
            _ => return Err(StoreError::Conflict(path)),
        }

        let revision = inner.bump_revision();
        tracing::debug!(path = %path, revision = %revision, commit_message = message, "Memory store write");
        inner.blobs.insert(
            path,
            StoredBlob {
                content: content.to_vec(),
                revision: revision.clone(),
            },
        );
        Ok(revision)
    }

    async fn list(&self, folder: &str) -> StoreResult<Vec<StoreEntry>> {
        let folder = join_path(&[folder]);
        let mut inner = self.lock();
        inner.enter(StoreOperation::List)?;

        if inner.blobs.contains_key(&folder) || !inner.folder_exists(&folder) {
            return Err(StoreError::NotFound(folder));
        }

        let prefix = if folder.is_empty() {
            String::new()
        } else {
            format!("{}/", folder)
        };

        // Direct children only; deeper paths surface as their first-level folder.
        let mut entries: Vec<StoreEntry> = Vec::new();
        let mut seen_dirs = BTreeSet::new();
        let nested_paths = inner
            .blobs
            .keys()
            .map(|k| (k.as_str(), true))
            .chain(inner.folders.iter().map(|f| (f.as_str(), false)));

        for (path, is_blob) in nested_paths {
            let Some(rest) = path.strip_prefix(&prefix) else {
                continue;
            };
            if rest.is_empty() {
                continue;
            }
            match rest.split_once('/') {
                None if is_blob => entries.push(StoreEntry {
                    name: rest.to_string(),
                    kind: EntryKind::File,
                    fetch_url: Some(format!("memory://{}", path)),
                }),
                None => {
                    seen_dirs.insert(rest.to_string());
                }
                Some((dir, _)) => {
                    seen_dirs.insert(dir.to_string());
                }
            }
        }

        entries.extend(seen_dirs.into_iter().map(|name| StoreEntry {
            name,
            kind: EntryKind::Dir,
            fetch_url: None,
        }));
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn fetch_url(&self, path: &str) -> String {
        format!("memory://{}", join_path(&[path]))
    }
}
