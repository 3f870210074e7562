//! Emotion classification with a detector fallback chain
//!
//! Detectors are tried in configured order, each on its own task under a
//! deadline. The first detector to return a non-empty label wins. A detector
//! that errors, panics, times out or finds no face is skipped. When nothing
//! succeeds the result is the neutral fallback, so classification itself
//! never fails.

use super::detectors::CommandDetector;
use async_trait::async_trait;
use moodcast_common::config::{ClassifierConfig, DetectorConfig};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Label used when no detector produced one
pub const FALLBACK_LABEL: &str = "neutral";

/// Detector name reported with the fallback result
pub const FALLBACK_DETECTOR: &str = "fallback";

/// Classification outcome
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmotionResult {
    /// Lowercase emotion label
    pub label: String,
    /// Score in 0.0..=1.0, when the detector reports one
    pub confidence: Option<f32>,
    /// Name of the detector that produced the label
    pub detector: String,
}

impl EmotionResult {
    pub fn fallback() -> Self {
        Self {
            label: FALLBACK_LABEL.to_string(),
            confidence: None,
            detector: FALLBACK_DETECTOR.to_string(),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.detector == FALLBACK_DETECTOR
    }
}

/// Raw detector output
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Empty when no face was found
    pub label: String,
    pub confidence: Option<f32>,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: Option<f32>) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }

    pub fn no_face() -> Self {
        Self::new("", None)
    }
}

/// Detector failures
#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("Failed to start detector: {0}")]
    Spawn(String),

    #[error("Detector failed: {0}")]
    Failed(String),

    #[error("Unparseable detector output: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A pluggable emotion inference backend
#[async_trait]
pub trait EmotionDetector: Send + Sync {
    fn name(&self) -> &str;

    /// Infer the dominant emotion of the face in `image`
    async fn detect(&self, image: &Path) -> Result<Detection, DetectorError>;
}

struct Candidate {
    detector: Arc<dyn EmotionDetector>,
    timeout: Duration,
}

/// Ordered detector chain
#[derive(Default)]
pub struct EmotionClassifier {
    candidates: Vec<Candidate>,
}

impl EmotionClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a detector with its deadline
    pub fn with_detector(mut self, detector: Arc<dyn EmotionDetector>, timeout: Duration) -> Self {
        self.candidates.push(Candidate { detector, timeout });
        self
    }

    /// Build the chain from configuration, in declared order
    pub fn from_config(config: &ClassifierConfig) -> Self {
        let mut classifier = Self::new();

        for entry in &config.detectors {
            let (detector, timeout_secs) = match entry {
                DetectorConfig::Deepface(cmd) => (CommandDetector::deepface(cmd), cmd.timeout_secs),
                DetectorConfig::Fer(cmd) => (CommandDetector::fer(cmd), cmd.timeout_secs),
                DetectorConfig::None => continue,
            };
            let timeout = timeout_secs
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.default_timeout());

            info!(detector = detector.name(), timeout_secs = timeout.as_secs(), "Registered emotion detector");
            classifier = classifier.with_detector(Arc::new(detector), timeout);
        }

        if classifier.is_empty() {
            info!("No emotion detectors configured; photos resolve to '{}'", FALLBACK_LABEL);
        }

        classifier
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn detector_names(&self) -> Vec<&str> {
        self.candidates.iter().map(|c| c.detector.name()).collect()
    }

    /// Upper bound on how long [`classify`](Self::classify) can take
    pub fn time_budget(&self) -> Duration {
        self.candidates.iter().map(|c| c.timeout).sum()
    }

    /// Classify the face in `image`
    pub async fn classify(&self, image: &Path) -> EmotionResult {
        for candidate in &self.candidates {
            let name = candidate.detector.name().to_string();
            let detector = Arc::clone(&candidate.detector);
            let path = image.to_path_buf();

            // Own task so a panic or a stuck detector cannot take the caller down.
            let mut handle = tokio::spawn(async move { detector.detect(&path).await });

            let detection = match tokio::time::timeout(candidate.timeout, &mut handle).await {
                Ok(Ok(Ok(detection))) => detection,
                Ok(Ok(Err(e))) => {
                    warn!(detector = %name, error = %e, "Emotion detector failed, trying next");
                    continue;
                }
                Ok(Err(e)) => {
                    warn!(detector = %name, error = %e, "Emotion detector task aborted, trying next");
                    continue;
                }
                Err(_) => {
                    handle.abort();
                    warn!(
                        detector = %name,
                        timeout_ms = candidate.timeout.as_millis() as u64,
                        "Emotion detector timed out, trying next"
                    );
                    continue;
                }
            };

            let label = detection.label.trim().to_lowercase();
            if label.is_empty() {
                debug!(detector = %name, "No face detected, trying next");
                continue;
            }

            let confidence = detection
                .confidence
                .filter(|c| c.is_finite())
                .map(|c| c.clamp(0.0, 1.0));

            debug!(detector = %name, label = %label, ?confidence, "Emotion classified");
            return EmotionResult {
                label,
                confidence,
                detector: name,
            };
        }

        debug!("No detector produced a label, using fallback");
        EmotionResult::fallback()
    }
}
