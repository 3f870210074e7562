//! Mood and photo dispatch
//!
//! The orchestrator owns every collaborator explicitly; there is no global
//! state. Catalog failures become [`DispatchResult`] variants, and selections
//! are recorded in the audit log in the background so a slow or failing
//! store never delays the reply.

use super::audit_log::{AuditLog, AuditRow};
use super::emotion_classifier::{EmotionClassifier, EmotionResult};
use super::mood_resolver::MoodResolver;
use super::track_catalog::{CatalogError, TrackCatalog, TrackEntry};
use crate::store::SharedBlobClient;
use moodcast_common::config::TomlConfig;
use moodcast_common::MoodKey;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

/// Outcome of one dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchResult {
    Track { mood: MoodKey, name: String, url: String },
    /// The mood folder exists but holds no playable tracks
    NoTrackAvailable { mood: MoodKey },
    /// The mood has no folder in the store
    CategoryNotFound { mood: MoodKey },
    /// The store could not be reached
    TemporarilyUnavailable { mood: MoodKey },
}

impl DispatchResult {
    pub fn mood(&self) -> MoodKey {
        match self {
            DispatchResult::Track { mood, .. }
            | DispatchResult::NoTrackAvailable { mood }
            | DispatchResult::CategoryNotFound { mood }
            | DispatchResult::TemporarilyUnavailable { mood } => *mood,
        }
    }

    /// Track name and URL, when one was dispatched
    pub fn track(&self) -> Option<(&str, &str)> {
        match self {
            DispatchResult::Track { name, url, .. } => Some((name, url)),
            _ => None,
        }
    }
}

/// Photo dispatch outcome with the emotion that chose the mood
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhotoDispatch {
    pub emotion: EmotionResult,
    pub result: DispatchResult,
}

/// Routes selections to tracks and records them
pub struct DispatchOrchestrator {
    catalog: Arc<TrackCatalog>,
    classifier: Arc<EmotionClassifier>,
    resolver: MoodResolver,
    audit: Option<Arc<AuditLog>>,
    audit_tasks: TaskTracker,
}

impl DispatchOrchestrator {
    pub fn new(
        catalog: Arc<TrackCatalog>,
        classifier: Arc<EmotionClassifier>,
        resolver: MoodResolver,
        audit: Option<Arc<AuditLog>>,
    ) -> Self {
        Self {
            catalog,
            classifier,
            resolver,
            audit,
            audit_tasks: TaskTracker::new(),
        }
    }

    /// Wire every collaborator from configuration over one store
    pub fn from_config(store: SharedBlobClient, config: &TomlConfig) -> Self {
        let catalog = TrackCatalog::from_config(Arc::clone(&store), &config.store, &config.catalog);
        let classifier = EmotionClassifier::from_config(&config.classifier);
        let resolver = MoodResolver::from_config(&config.moods);
        let audit = config
            .audit
            .enabled
            .then(|| Arc::new(AuditLog::new(store, &config.audit)));

        if audit.is_none() {
            info!("Audit log disabled");
        }

        Self::new(Arc::new(catalog), Arc::new(classifier), resolver, audit)
    }

    pub fn catalog(&self) -> &TrackCatalog {
        &self.catalog
    }

    pub fn classifier(&self) -> &EmotionClassifier {
        &self.classifier
    }

    pub fn resolver(&self) -> &MoodResolver {
        &self.resolver
    }

    pub fn audit_log(&self) -> Option<&AuditLog> {
        self.audit.as_deref()
    }

    /// Pick a track for an explicitly chosen mood
    pub async fn handle_mood_selection(&self, mood: MoodKey, user: &str) -> DispatchResult {
        let span = tracing::info_span!("dispatch", id = %Uuid::new_v4(), user = %user, mood = %mood);
        self.dispatch(mood, user).instrument(span).await
    }

    /// Classify a photo, resolve its mood and pick a track
    pub async fn handle_photo_selection(&self, image: &Path, user: &str) -> PhotoDispatch {
        let span = tracing::info_span!("photo_dispatch", id = %Uuid::new_v4(), user = %user);
        async {
            let emotion = self.classifier.classify(image).await;
            let mood = self.resolver.resolve(&emotion.label);
            info!(
                label = %emotion.label,
                detector = %emotion.detector,
                mood = %mood,
                "Photo classified"
            );
            let result = self.dispatch(mood, user).await;
            PhotoDispatch { emotion, result }
        }
        .instrument(span)
        .await
    }

    /// Wait for background audit appends started so far
    pub async fn flush_audits(&self) {
        self.audit_tasks.close();
        self.audit_tasks.wait().await;
        self.audit_tasks.reopen();
    }

    /// Background audit appends still running
    pub fn pending_audits(&self) -> usize {
        self.audit_tasks.len()
    }

    async fn dispatch(&self, mood: MoodKey, user: &str) -> DispatchResult {
        let track = match self.catalog.pick(mood).await {
            Ok(Some(track)) => track,
            Ok(None) => {
                info!("No tracks in mood folder");
                return DispatchResult::NoTrackAvailable { mood };
            }
            Err(CatalogError::NoSuchMood(_)) => {
                return DispatchResult::CategoryNotFound { mood };
            }
            Err(e @ CatalogError::Unavailable { .. }) => {
                warn!(error = %e, "Track catalog unavailable");
                return DispatchResult::TemporarilyUnavailable { mood };
            }
        };

        info!(track = %track.name, "Dispatching track");
        self.record(user, mood, &track);

        DispatchResult::Track {
            mood,
            name: track.name,
            url: track.fetch_url,
        }
    }

    fn record(&self, user: &str, mood: MoodKey, track: &TrackEntry) {
        let Some(audit) = &self.audit else {
            return;
        };

        let audit = Arc::clone(audit);
        let row = AuditRow::new(user, mood, track.fetch_url.as_str());
        self.audit_tasks.spawn(
            async move {
                if let Err(e) = audit.append(&row).await {
                    warn!(error = %e, path = %audit.path(), "Failed to record selection");
                }
            }
            .in_current_span(),
        );
    }
}
