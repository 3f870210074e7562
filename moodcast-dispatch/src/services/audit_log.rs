//! Append-only CSV selection log in the remote store
//!
//! The store has no append primitive, so an append is read-modify-write on
//! the whole blob with the write conditioned on the revision just read. A
//! concurrent writer makes the write conflict; the append is then redone from
//! a fresh read, within a bounded number of attempts. Prior rows are copied
//! through verbatim and never reordered.

use super::retry::{retry_store_op, RetryPolicy};
use crate::store::{BlobRef, Revision, SharedBlobClient, StoreError, StoreResult};
use chrono::{DateTime, Utc};
use moodcast_common::config::AuditConfig;
use moodcast_common::time::{now, to_iso8601};
use moodcast_common::MoodKey;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{debug, info, warn};

/// First line of the log
pub const AUDIT_HEADER: &str = "timestamp,username,emotion,track_url";

/// One recorded selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRow {
    pub timestamp: DateTime<Utc>,
    pub user: String,
    pub mood: MoodKey,
    pub track_url: String,
}

impl AuditRow {
    /// Row stamped with the current time
    pub fn new(user: impl Into<String>, mood: MoodKey, track_url: impl Into<String>) -> Self {
        Self {
            timestamp: now(),
            user: user.into(),
            mood,
            track_url: track_url.into(),
        }
    }

    pub fn to_csv_line(&self) -> String {
        [
            csv_field(&to_iso8601(&self.timestamp)),
            csv_field(&self.user),
            csv_field(self.mood.as_str()),
            csv_field(&self.track_url),
        ]
        .join(",")
    }

    fn commit_message(&self) -> String {
        format!("stats: {} -> {}", self.user, self.mood)
    }
}

/// Quote a CSV field when needed
///
/// Line breaks become spaces so every row stays on one line.
fn csv_field(value: &str) -> String {
    let flat: String = value
        .chars()
        .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
        .collect();
    if flat.contains(',') || flat.contains('"') || flat != value {
        format!("\"{}\"", flat.replace('"', "\"\""))
    } else {
        flat
    }
}

/// Parsed log blob: header plus raw row lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditLogContent {
    pub header: String,
    pub rows: Vec<String>,
}

impl Default for AuditLogContent {
    fn default() -> Self {
        Self {
            header: AUDIT_HEADER.to_string(),
            rows: Vec::new(),
        }
    }
}

impl AuditLogContent {
    /// Split a blob into header and non-empty row lines
    ///
    /// An empty blob gets the standard header.
    pub fn parse(content: &[u8]) -> StoreResult<Self> {
        let text = std::str::from_utf8(content)
            .map_err(|e| StoreError::Decode(format!("audit log is not UTF-8: {}", e)))?;
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);

        let mut lines = text.lines();
        let header = match lines.next() {
            Some(h) if !h.trim().is_empty() => h.to_string(),
            _ => AUDIT_HEADER.to_string(),
        };
        let rows = lines
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self { header, rows })
    }

    pub fn push(&mut self, line: String) {
        self.rows.push(line);
    }

    /// Lines joined with `\n`, with a trailing newline
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = String::with_capacity(
            self.header.len() + self.rows.iter().map(|r| r.len() + 1).sum::<usize>() + 1,
        );
        out.push_str(&self.header);
        out.push('\n');
        for row in &self.rows {
            out.push_str(row);
            out.push('\n');
        }
        out.into_bytes()
    }
}

/// Result of a successful append
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditReceipt {
    /// Revision written by this append
    pub revision: Revision,
    /// Data rows in the log after the append
    pub rows: usize,
    /// Attempts used, including the first
    pub attempts: u32,
}

/// Audit append failures
#[derive(Debug, Error)]
pub enum AuditError {
    /// Every attempt lost the race to another writer
    #[error("Audit log still conflicting after {attempts} attempts")]
    Conflict { attempts: u32 },

    /// The store failed in a way retrying did not fix
    #[error("Audit log unavailable after {attempts} attempts: {source}")]
    Unavailable {
        attempts: u32,
        #[source]
        source: StoreError,
    },
}

/// CSV audit log stored as a single blob
pub struct AuditLog {
    store: SharedBlobClient,
    path: String,
    retry: RetryPolicy,
}

impl AuditLog {
    pub fn new(store: SharedBlobClient, config: &AuditConfig) -> Self {
        Self::with_policy(
            store,
            config.path.clone(),
            RetryPolicy::new(config.max_retries, config.retry_backoff()),
        )
    }

    pub fn with_policy(store: SharedBlobClient, path: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            store,
            path: path.into(),
            retry,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Append one row, retrying on conflicts and transient failures
    pub async fn append(&self, row: &AuditRow) -> Result<AuditReceipt, AuditError> {
        let line = row.to_csv_line();
        let message = row.commit_message();
        let unacknowledged = AtomicBool::new(false);

        let outcome = retry_store_op(
            "audit_append",
            self.retry,
            |e| matches!(e, StoreError::Conflict(_) | StoreError::Transient(_)),
            || self.try_append(&line, &message, &unacknowledged),
        )
        .await;

        match outcome {
            Ok(((revision, rows), attempts)) => {
                info!(
                    path = %self.path,
                    user = %row.user,
                    mood = %row.mood,
                    revision = %revision,
                    attempts,
                    "Selection recorded"
                );
                Ok(AuditReceipt {
                    revision,
                    rows,
                    attempts,
                })
            }
            Err(failure) => match failure.error {
                StoreError::Conflict(_) => Err(AuditError::Conflict {
                    attempts: failure.attempts,
                }),
                source => Err(AuditError::Unavailable {
                    attempts: failure.attempts,
                    source,
                }),
            },
        }
    }

    /// One read-modify-write pass
    ///
    /// `unacknowledged` is set when a write failed transiently. Such a write
    /// may still have committed, so the next pass first looks for the row.
    async fn try_append(
        &self,
        line: &str,
        message: &str,
        unacknowledged: &AtomicBool,
    ) -> StoreResult<(Revision, usize)> {
        let (current, mut content) = match self.store.read(&self.path).await {
            Ok(blob) => (
                BlobRef::at(self.path.as_str(), blob.revision),
                AuditLogContent::parse(&blob.content)?,
            ),
            Err(StoreError::NotFound(_)) => {
                debug!(path = %self.path, "Audit log missing, creating it");
                (BlobRef::missing(self.path.as_str()), AuditLogContent::default())
            }
            Err(e) => return Err(e),
        };

        if unacknowledged.load(Ordering::SeqCst) {
            if let Some(revision) = &current.revision {
                if content.rows.iter().rev().any(|r| r == line) {
                    warn!(
                        path = %self.path,
                        revision = %revision,
                        "Row already present after a failed write, not appending again"
                    );
                    return Ok((revision.clone(), content.rows.len()));
                }
            }
        }

        content.push(line.to_string());
        let written = self
            .store
            .write(&current.path, &content.serialize(), current.revision.as_ref(), message)
            .await;

        match written {
            Ok(revision) => Ok((revision, content.rows.len())),
            Err(e) => {
                if e.is_transient() {
                    unacknowledged.store(true, Ordering::SeqCst);
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Blob, MemoryBlobStore, RemoteBlobClient, StoreEntry, StoreOperation};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Barrier;

    const LOG: &str = "stats/emotions.csv";

    fn row(user: &str, mood: MoodKey) -> AuditRow {
        AuditRow {
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap(),
            user: user.to_string(),
            mood,
            track_url: format!("https://example.test/tracks/{}/a.mp3", mood),
        }
    }

    fn log_over(store: SharedBlobClient, max_retries: u32) -> AuditLog {
        AuditLog::with_policy(store, LOG, RetryPolicy::new(max_retries, Duration::from_millis(5)))
    }

    fn text(store: &MemoryBlobStore) -> String {
        String::from_utf8(store.content(LOG).unwrap()).unwrap()
    }

    #[test]
    fn test_csv_line_format() {
        let line = row("alice", MoodKey::Happy).to_csv_line();
        assert_eq!(line, "2024-05-01T12:30:00Z,alice,happy,https://example.test/tracks/happy/a.mp3");
    }

    #[test]
    fn test_csv_fields_quoted_when_needed() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_field("two\nlines"), "\"two lines\"");
    }

    #[test]
    fn test_parse_keeps_header_and_rows_verbatim() {
        let content = AuditLogContent::parse(b"Timestamp,User,Emotion,URL\r\nx,y,z,w\n\n\"a,b\",c,d,e\n").unwrap();
        assert_eq!(content.header, "Timestamp,User,Emotion,URL");
        assert_eq!(content.rows, vec!["x,y,z,w", "\"a,b\",c,d,e"]);
        assert_eq!(
            String::from_utf8(content.serialize()).unwrap(),
            "Timestamp,User,Emotion,URL\nx,y,z,w\n\"a,b\",c,d,e\n"
        );
    }

    #[test]
    fn test_parse_empty_blob_gets_default_header() {
        assert_eq!(AuditLogContent::parse(b"").unwrap(), AuditLogContent::default());
        assert!(matches!(
            AuditLogContent::parse(&[0xff, 0xfe, 0x00]),
            Err(StoreError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_first_append_creates_log_with_header() {
        let store = Arc::new(MemoryBlobStore::new());
        let log = log_over(store.clone(), 3);

        let receipt = log.append(&row("alice", MoodKey::Happy)).await.unwrap();
        assert_eq!(receipt.rows, 1);
        assert_eq!(receipt.attempts, 1);
        assert_eq!(
            text(&store),
            "timestamp,username,emotion,track_url\n2024-05-01T12:30:00Z,alice,happy,https://example.test/tracks/happy/a.mp3\n"
        );
    }

    #[tokio::test]
    async fn test_append_preserves_prior_rows() {
        let store = Arc::new(MemoryBlobStore::new());
        store.put(LOG, "timestamp,username,emotion,track_url\nold-1\nold-2\n");
        let log = log_over(store.clone(), 3);

        let receipt = log.append(&row("bob", MoodKey::Calm)).await.unwrap();
        assert_eq!(receipt.rows, 3);

        let lines: Vec<String> = text(&store).lines().map(str::to_string).collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[1], "old-1");
        assert_eq!(lines[2], "old-2");
        assert!(lines[3].contains(",bob,calm,"));
    }

    /// Holds the first two reads until both have happened, so two appends
    /// start from the same revision.
    struct LockstepStore {
        inner: Arc<MemoryBlobStore>,
        barrier: Barrier,
        reads: AtomicUsize,
    }

    #[async_trait]
    impl RemoteBlobClient for LockstepStore {
        fn name(&self) -> &'static str {
            "lockstep"
        }

        async fn read(&self, path: &str) -> StoreResult<Blob> {
            let result = self.inner.read(path).await;
            if self.reads.fetch_add(1, Ordering::SeqCst) < 2 {
                self.barrier.wait().await;
            }
            result
        }

        async fn write(
            &self,
            path: &str,
            content: &[u8],
            expected: Option<&Revision>,
            message: &str,
        ) -> StoreResult<Revision> {
            self.inner.write(path, content, expected, message).await
        }

        async fn list(&self, folder: &str) -> StoreResult<Vec<StoreEntry>> {
            self.inner.list(folder).await
        }

        fn fetch_url(&self, path: &str) -> String {
            self.inner.fetch_url(path)
        }
    }

    #[tokio::test]
    async fn test_racing_appends_both_land_exactly_once() {
        let inner = Arc::new(MemoryBlobStore::new());
        inner.put(LOG, "timestamp,username,emotion,track_url\nseed\n");
        let store = Arc::new(LockstepStore {
            inner: inner.clone(),
            barrier: Barrier::new(2),
            reads: AtomicUsize::new(0),
        });
        let log = log_over(store, 3);

        let alice = row("alice", MoodKey::Happy);
        let bob = row("bob", MoodKey::Sad);
        let (a, b) = tokio::join!(log.append(&alice), log.append(&bob));
        let (a, b) = (a.unwrap(), b.unwrap());

        // One of them lost the first race and went around again.
        let mut attempts = [a.attempts, b.attempts];
        attempts.sort();
        assert_eq!(attempts, [1, 2]);

        let content = text(&inner);
        assert_eq!(content.lines().next(), Some(AUDIT_HEADER));
        assert_eq!(content.lines().filter(|l| *l == "seed").count(), 1);
        assert_eq!(content.matches(&alice.to_csv_line()).count(), 1);
        assert_eq!(content.matches(&bob.to_csv_line()).count(), 1);
        assert_eq!(content.lines().count(), 4);
        assert_eq!(inner.calls(StoreOperation::Write), 3);
    }

    /// Every write loses to an invisible concurrent writer.
    struct AlwaysConflicting(MemoryBlobStore);

    #[async_trait]
    impl RemoteBlobClient for AlwaysConflicting {
        fn name(&self) -> &'static str {
            "conflicting"
        }

        async fn read(&self, path: &str) -> StoreResult<Blob> {
            self.0.read(path).await
        }

        async fn write(&self, path: &str, _: &[u8], _: Option<&Revision>, _: &str) -> StoreResult<Revision> {
            Err(StoreError::Conflict(path.to_string()))
        }

        async fn list(&self, folder: &str) -> StoreResult<Vec<StoreEntry>> {
            self.0.list(folder).await
        }

        fn fetch_url(&self, path: &str) -> String {
            self.0.fetch_url(path)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_conflict_gives_up_after_retries() {
        let log = log_over(Arc::new(AlwaysConflicting(MemoryBlobStore::new())), 3);
        let err = log.append(&row("carol", MoodKey::Energy)).await.unwrap_err();
        assert!(matches!(err, AuditError::Conflict { attempts: 4 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried_then_unavailable() {
        let store = Arc::new(MemoryBlobStore::new());
        store.fail_next(StoreOperation::Write, 1);
        let log = log_over(store.clone(), 2);
        let receipt = log.append(&row("dave", MoodKey::Calm)).await.unwrap();
        assert_eq!(receipt.attempts, 2);

        store.fail_next(StoreOperation::Read, 10);
        let err = log.append(&row("erin", MoodKey::Calm)).await.unwrap_err();
        assert!(matches!(err, AuditError::Unavailable { attempts: 3, .. }));
        assert_eq!(text(&store).lines().count(), 2);
    }

    /// Commits the first write, then reports it as timed out.
    struct LostAck {
        inner: MemoryBlobStore,
        dropped: AtomicUsize,
    }

    #[async_trait]
    impl RemoteBlobClient for LostAck {
        fn name(&self) -> &'static str {
            "lost-ack"
        }

        async fn read(&self, path: &str) -> StoreResult<Blob> {
            self.inner.read(path).await
        }

        async fn write(
            &self,
            path: &str,
            content: &[u8],
            expected: Option<&Revision>,
            message: &str,
        ) -> StoreResult<Revision> {
            let revision = self.inner.write(path, content, expected, message).await?;
            if self.dropped.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(StoreError::Transient("operation timed out".to_string()));
            }
            Ok(revision)
        }

        async fn list(&self, folder: &str) -> StoreResult<Vec<StoreEntry>> {
            self.inner.list(folder).await
        }

        fn fetch_url(&self, path: &str) -> String {
            self.inner.fetch_url(path)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_committed_write_with_lost_response_is_not_duplicated() {
        let store = Arc::new(LostAck {
            inner: MemoryBlobStore::new(),
            dropped: AtomicUsize::new(0),
        });
        store.inner.put(LOG, "timestamp,username,emotion,track_url
seed
");
        let log = log_over(store.clone(), 3);

        let alice = row("alice", MoodKey::Happy);
        let receipt = log.append(&alice).await.unwrap();
        assert_eq!(receipt.attempts, 2);
        assert_eq!(receipt.rows, 2);

        let content = text(&store.inner);
        assert_eq!(content.matches(&alice.to_csv_line()).count(), 1);
        assert_eq!(content.lines().count(), 3);
        assert_eq!(store.inner.calls(StoreOperation::Write), 1);

        // Same row again later is a new selection and is recorded
        log.append(&alice).await.unwrap();
        assert_eq!(text(&store.inner).matches(&alice.to_csv_line()).count(), 2);
    }

    #[test]
    fn test_commit_message_names_user_and_mood() {
        assert_eq!(row("alice", MoodKey::Nostalgia).commit_message(), "stats: alice -> nostalgia");
    }
}
