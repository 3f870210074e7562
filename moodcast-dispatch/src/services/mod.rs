//! Dispatch services

pub mod audit_log;
pub mod detectors;
pub mod dispatch;
pub mod emotion_classifier;
pub mod mood_resolver;
pub mod retry;
pub mod track_catalog;

pub use audit_log::{AuditError, AuditLog, AuditReceipt, AuditRow, AUDIT_HEADER};
pub use detectors::{CommandDetector, OutputFormat};
pub use dispatch::{DispatchOrchestrator, DispatchResult, PhotoDispatch};
pub use emotion_classifier::{Detection, DetectorError, EmotionClassifier, EmotionDetector, EmotionResult};
pub use mood_resolver::MoodResolver;
pub use retry::RetryPolicy;
pub use track_catalog::{CatalogError, TrackCatalog, TrackEntry};
