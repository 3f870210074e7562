//! External command emotion detectors
//!
//! Each detector runs a configured program with the image path appended as
//! the last argument and parses the JSON it prints on stdout. Children are
//! spawned with `kill_on_drop`, so a detector abandoned on timeout does not
//! leave a process behind.

use super::emotion_classifier::{Detection, DetectorError, EmotionDetector};
use async_trait::async_trait;
use moodcast_common::config::CommandDetectorConfig;
use serde_json::Value;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Output format understood by a [`CommandDetector`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// DeepFace `analyze`: object or array of objects with `dominant_emotion`
    /// and an `emotion` map scored in percent
    DeepFace,
    /// FER `detect_emotions`: array of faces with an `emotions` map scored
    /// 0..1, or the `[label, score]` pair from `top_emotion`
    Fer,
}

impl OutputFormat {
    fn default_name(self) -> &'static str {
        match self {
            OutputFormat::DeepFace => "deepface",
            OutputFormat::Fer => "fer",
        }
    }

    pub fn parse(self, stdout: &str) -> Result<Detection, DetectorError> {
        let value: Value = serde_json::from_str(stdout.trim())
            .map_err(|e| DetectorError::Parse(format!("invalid JSON: {}", e)))?;
        match self {
            OutputFormat::DeepFace => parse_deepface(&value),
            OutputFormat::Fer => parse_fer(&value),
        }
    }
}

/// Detector backed by an external program
#[derive(Debug, Clone)]
pub struct CommandDetector {
    name: String,
    format: OutputFormat,
    program: String,
    args: Vec<String>,
}

impl CommandDetector {
    pub fn new(format: OutputFormat, config: &CommandDetectorConfig) -> Self {
        Self {
            name: config
                .name
                .clone()
                .unwrap_or_else(|| format.default_name().to_string()),
            format,
            program: config.program.clone(),
            args: config.args.clone(),
        }
    }

    pub fn deepface(config: &CommandDetectorConfig) -> Self {
        Self::new(OutputFormat::DeepFace, config)
    }

    pub fn fer(config: &CommandDetectorConfig) -> Self {
        Self::new(OutputFormat::Fer, config)
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }
}

#[async_trait]
impl EmotionDetector for CommandDetector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn detect(&self, image: &Path) -> Result<Detection, DetectorError> {
        debug!(detector = %self.name, program = %self.program, image = %image.display(), "Running detector");

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(image)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| DetectorError::Spawn(format!("{}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DetectorError::Failed(format!(
                "exit code {:?}: {}",
                output.status.code(),
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        self.format.parse(&stdout)
    }
}

fn parse_deepface(value: &Value) -> Result<Detection, DetectorError> {
    // `analyze` returns one object per face; older versions return a bare object.
    let face = match value {
        Value::Array(faces) => match faces.first() {
            Some(face) => face,
            None => return Ok(Detection::no_face()),
        },
        other => other,
    };

    let label = face
        .get("dominant_emotion")
        .and_then(Value::as_str)
        .ok_or_else(|| DetectorError::Parse("missing dominant_emotion".to_string()))?;

    let confidence = face
        .get("emotion")
        .and_then(|scores| scores.get(label))
        .and_then(Value::as_f64)
        .map(|percent| (percent / 100.0) as f32);

    Ok(Detection::new(label, confidence))
}

fn parse_fer(value: &Value) -> Result<Detection, DetectorError> {
    let items = value
        .as_array()
        .ok_or_else(|| DetectorError::Parse("expected a JSON array".to_string()))?;

    // `top_emotion` shape: ["happy", 0.93] or [null, null]
    if let Some(first) = items.first() {
        if first.is_string() || first.is_null() {
            let label = first.as_str().unwrap_or_default();
            let confidence = items.get(1).and_then(Value::as_f64).map(|s| s as f32);
            return Ok(Detection::new(label, confidence));
        }
    }

    let Some(face) = items.first() else {
        return Ok(Detection::no_face());
    };

    let scores = face
        .get("emotions")
        .and_then(Value::as_object)
        .ok_or_else(|| DetectorError::Parse("face without emotions map".to_string()))?;

    let best = scores
        .iter()
        .filter_map(|(label, score)| score.as_f64().map(|s| (label, s)))
        .max_by(|a, b| a.1.total_cmp(&b.1));

    Ok(match best {
        Some((label, score)) => Detection::new(label.as_str(), Some(score as f32)),
        None => Detection::no_face(),
    })
}
