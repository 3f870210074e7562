//! Per-mood track listings with a TTL cache
//!
//! Each mood is a folder under the tracks root. Listings are filtered to
//! audio files, cached for the configured TTL and picked from uniformly at
//! random. Expired entries are refetched, never served.

use super::retry::{retry_store_op, RetryPolicy};
use crate::store::{join_path, EntryKind, SharedBlobClient, StoreEntry, StoreError};
use moodcast_common::config::{CatalogConfig, StoreConfig};
use moodcast_common::MoodKey;
use rand::seq::SliceRandom;
use serde::Serialize;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// A playable track
///
/// Equality and hashing use the name only; names are unique within a folder.
#[derive(Debug, Clone, Serialize)]
pub struct TrackEntry {
    pub name: String,
    pub fetch_url: String,
}

impl PartialEq for TrackEntry {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for TrackEntry {}

impl Hash for TrackEntry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

/// Cached listing of one mood folder
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub folder_key: MoodKey,
    pub fetched_at: Instant,
    pub tracks: Arc<Vec<TrackEntry>>,
    pub ttl: Duration,
}

impl CatalogEntry {
    pub fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.fetched_at) < self.ttl
    }
}

/// Catalog errors
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The mood folder does not exist in the store
    #[error("No track folder for mood '{0}'")]
    NoSuchMood(MoodKey),

    /// The store could not be reached within the retry budget
    #[error("Track listing for '{mood}' unavailable: {source}")]
    Unavailable {
        mood: MoodKey,
        #[source]
        source: StoreError,
    },
}

/// Mood folder catalog backed by a remote store
pub struct TrackCatalog {
    store: SharedBlobClient,
    tracks_root: String,
    /// Lowercase, each with a leading dot
    extensions: Vec<String>,
    ttl: Duration,
    retry: RetryPolicy,
    cache: RwLock<HashMap<MoodKey, CatalogEntry>>,
}

impl TrackCatalog {
    pub fn new(
        store: SharedBlobClient,
        tracks_root: impl Into<String>,
        extensions: &[String],
        ttl: Duration,
        retry: RetryPolicy,
    ) -> Self {
        let extensions = extensions
            .iter()
            .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .map(|e| format!(".{}", e))
            .collect();

        Self {
            store,
            tracks_root: tracks_root.into(),
            extensions,
            ttl,
            retry,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(store: SharedBlobClient, store_config: &StoreConfig, config: &CatalogConfig) -> Self {
        Self::new(
            store,
            store_config.tracks_root.clone(),
            &config.extensions,
            config.ttl(),
            RetryPolicy::new(config.transient_retries, config.retry_backoff()),
        )
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Playable tracks for a mood, from cache when fresh
    pub async fn get(&self, mood: MoodKey) -> Result<Arc<Vec<TrackEntry>>, CatalogError> {
        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(&mood) {
                if entry.is_fresh(Instant::now()) {
                    debug!(mood = %mood, tracks = entry.tracks.len(), "Catalog cache hit");
                    return Ok(Arc::clone(&entry.tracks));
                }
            }
        }

        let folder = join_path(&[&self.tracks_root, mood.as_str()]);
        let listing = retry_store_op("list_tracks", self.retry, StoreError::is_transient, || {
            self.store.list(&folder)
        })
        .await;

        let entries = match listing {
            Ok((entries, _attempts)) => entries,
            Err(failure) => {
                return Err(match failure.error {
                    StoreError::NotFound(_) => {
                        info!(mood = %mood, folder = %folder, "Mood folder does not exist");
                        CatalogError::NoSuchMood(mood)
                    }
                    error => {
                        warn!(mood = %mood, attempts = failure.attempts, error = %error, "Track listing failed");
                        CatalogError::Unavailable { mood, source: error }
                    }
                });
            }
        };

        let tracks = Arc::new(self.to_tracks(&folder, entries));
        debug!(mood = %mood, tracks = tracks.len(), "Catalog refreshed");

        let entry = CatalogEntry {
            folder_key: mood,
            fetched_at: Instant::now(),
            tracks: Arc::clone(&tracks),
            ttl: self.ttl,
        };
        self.cache.write().await.insert(mood, entry);

        Ok(tracks)
    }

    /// Uniformly random track for a mood; `None` when the folder has none
    pub async fn pick(&self, mood: MoodKey) -> Result<Option<TrackEntry>, CatalogError> {
        let tracks = self.get(mood).await?;
        Ok(tracks.choose(&mut rand::thread_rng()).cloned())
    }

    /// Drop the cached listing for one mood
    pub async fn invalidate(&self, mood: MoodKey) -> bool {
        self.cache.write().await.remove(&mood).is_some()
    }

    /// Drop every cached listing, returning how many were held
    pub async fn clear(&self) -> usize {
        let mut cache = self.cache.write().await;
        let count = cache.len();
        cache.clear();
        count
    }

    fn is_audio(&self, name: &str) -> bool {
        let lower = name.to_ascii_lowercase();
        self.extensions.iter().any(|ext| lower.ends_with(ext.as_str()))
    }

    fn to_tracks(&self, folder: &str, entries: Vec<StoreEntry>) -> Vec<TrackEntry> {
        entries
            .into_iter()
            .filter(|e| e.kind == EntryKind::File && self.is_audio(&e.name))
            .map(|e| {
                let fetch_url = e
                    .fetch_url
                    .unwrap_or_else(|| self.store.fetch_url(&join_path(&[folder, &e.name])));
                TrackEntry {
                    name: e.name,
                    fetch_url,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryBlobStore, StoreOperation};

    fn catalog_with(store: Arc<MemoryBlobStore>, ttl: Duration) -> TrackCatalog {
        let extensions: Vec<String> = ["mp3", ".M4A", "ogg", "wav"].iter().map(|s| s.to_string()).collect();
        TrackCatalog::new(
            store,
            "tracks",
            &extensions,
            ttl,
            RetryPolicy::new(2, Duration::from_millis(200)),
        )
    }

    #[tokio::test]
    async fn test_filters_to_audio_files_in_listing_order() {
        let store = Arc::new(MemoryBlobStore::new());
        store.put("tracks/happy/b.mp3", "b");
        store.put("tracks/happy/a.M4A", "a");
        store.put("tracks/happy/cover.jpg", "c");
        store.put("tracks/happy/notes.txt", "n");
        store.put("tracks/happy/live/x.mp3", "x");

        let catalog = catalog_with(store, Duration::from_secs(60));
        let tracks = catalog.get(MoodKey::Happy).await.unwrap();

        let names: Vec<_> = tracks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a.M4A", "b.mp3"]);
        assert_eq!(tracks[1].fetch_url, "memory://tracks/happy/b.mp3");
    }

    #[tokio::test]
    async fn test_missing_folder_is_no_such_mood() {
        let store = Arc::new(MemoryBlobStore::new());
        store.put("tracks/happy/a.mp3", "a");

        let catalog = catalog_with(store, Duration::from_secs(60));
        let err = catalog.get(MoodKey::Sad).await.unwrap_err();
        assert!(matches!(err, CatalogError::NoSuchMood(MoodKey::Sad)));
    }

    #[tokio::test]
    async fn test_empty_folder_picks_none() {
        let store = Arc::new(MemoryBlobStore::new());
        store.create_folder("tracks/calm");
        store.put("tracks/calm/readme.md", "hi");

        let catalog = catalog_with(store, Duration::from_secs(60));
        assert!(catalog.get(MoodKey::Calm).await.unwrap().is_empty());
        assert_eq!(catalog.pick(MoodKey::Calm).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_listing_cached_within_ttl_and_refetched_after() {
        let store = Arc::new(MemoryBlobStore::new());
        store.put("tracks/happy/a.mp3", "a");
        let catalog = catalog_with(Arc::clone(&store), Duration::from_secs(60));

        catalog.get(MoodKey::Happy).await.unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;
        catalog.pick(MoodKey::Happy).await.unwrap();
        catalog.get(MoodKey::Happy).await.unwrap();
        assert_eq!(store.calls(StoreOperation::List), 1);

        store.put("tracks/happy/b.mp3", "b");
        tokio::time::advance(Duration::from_secs(31)).await;
        let tracks = catalog.get(MoodKey::Happy).await.unwrap();
        assert_eq!(store.calls(StoreOperation::List), 2);
        assert_eq!(tracks.len(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_and_clear_force_refetch() {
        let store = Arc::new(MemoryBlobStore::new());
        store.put("tracks/happy/a.mp3", "a");
        store.put("tracks/calm/b.mp3", "b");
        let catalog = catalog_with(Arc::clone(&store), Duration::from_secs(60));

        catalog.get(MoodKey::Happy).await.unwrap();
        catalog.get(MoodKey::Calm).await.unwrap();
        assert!(catalog.invalidate(MoodKey::Happy).await);
        assert!(!catalog.invalidate(MoodKey::Happy).await);
        catalog.get(MoodKey::Happy).await.unwrap();
        assert_eq!(store.calls(StoreOperation::List), 3);

        assert_eq!(catalog.clear().await, 2);
        catalog.get(MoodKey::Calm).await.unwrap();
        assert_eq!(store.calls(StoreOperation::List), 4);
    }

    #[tokio::test]
    async fn test_pick_is_roughly_uniform() {
        let store = Arc::new(MemoryBlobStore::new());
        for name in ["a.mp3", "b.mp3", "c.mp3", "d.mp3"] {
            store.put(&format!("tracks/energy/{}", name), name);
        }
        let catalog = catalog_with(store, Duration::from_secs(60));

        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..4000 {
            let track = catalog.pick(MoodKey::Energy).await.unwrap().unwrap();
            *counts.entry(track.name).or_default() += 1;
        }

        assert_eq!(counts.len(), 4);
        for (name, count) in counts {
            // Expected 1000 each; this band is many standard deviations wide.
            assert!((800..=1200).contains(&count), "{} picked {} times", name, count);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_listing_failure_retried() {
        let store = Arc::new(MemoryBlobStore::new());
        store.put("tracks/happy/a.mp3", "a");
        store.fail_next(StoreOperation::List, 2);
        let catalog = catalog_with(Arc::clone(&store), Duration::from_secs(60));

        let tracks = catalog.get(MoodKey::Happy).await.unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(store.calls(StoreOperation::List), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_beyond_budget_are_unavailable() {
        let store = Arc::new(MemoryBlobStore::new());
        store.put("tracks/happy/a.mp3", "a");
        store.fail_next(StoreOperation::List, 3);
        let catalog = catalog_with(Arc::clone(&store), Duration::from_secs(60));

        let err = catalog.get(MoodKey::Happy).await.unwrap_err();
        assert!(matches!(err, CatalogError::Unavailable { mood: MoodKey::Happy, .. }));
        assert_eq!(store.calls(StoreOperation::List), 3);

        // Failures are not cached
        assert_eq!(catalog.get(MoodKey::Happy).await.unwrap().len(), 1);
    }
}
