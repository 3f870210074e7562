//! Configuration loading and resolution
//!
//! Bootstrap configuration comes from a single TOML file. Every section and
//! field is optional; anything missing falls back to a compiled default.
//!
//! # Config file priority
//!
//! 1. Command-line argument (`--config`)
//! 2. Environment variable (`MOODCAST_CONFIG`)
//! 3. `{config_dir}/moodcast/config.toml` (per-platform, via `dirs`)
//! 4. Compiled defaults (no file)
//!
//! Secrets follow the same idea: the GitHub token is taken from
//! `MOODCAST_GITHUB_TOKEN` before the TOML value. The repository coordinates
//! can likewise come from `MOODCAST_GITHUB_OWNER`, `MOODCAST_GITHUB_REPO` and
//! `MOODCAST_GITHUB_BRANCH`, which win over the file.

use crate::mood::{MoodButton, MoodKey};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "MOODCAST_CONFIG";

/// Environment variable holding the GitHub token
pub const TOKEN_ENV_VAR: &str = "MOODCAST_GITHUB_TOKEN";

pub const OWNER_ENV_VAR: &str = "MOODCAST_GITHUB_OWNER";
pub const REPO_ENV_VAR: &str = "MOODCAST_GITHUB_REPO";
pub const BRANCH_ENV_VAR: &str = "MOODCAST_GITHUB_BRANCH";

/// Top-level bootstrap configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub store: StoreConfig,
    pub catalog: CatalogConfig,
    pub audit: AuditConfig,
    pub classifier: ClassifierConfig,
    pub moods: MoodsConfig,
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to bind (default 127.0.0.1:5730)
    pub bind: String,
    /// Largest accepted photo upload in bytes
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5730".to_string(),
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` wins when set
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Which remote store implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// GitHub Contents API
    #[default]
    Github,
    /// In-process store, empty at startup
    Memory,
}

/// Remote store (GitHub repository) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Repository owner (user or organisation)
    pub owner: String,
    /// Repository name
    pub repo: String,
    /// Branch used for reads and commits
    pub branch: String,
    /// Access token; required for private repositories and for writes
    pub token: Option<String>,
    /// Contents API base URL
    pub api_base: String,
    /// Raw file host used when the API omits a download URL
    pub raw_base: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Minimum spacing between API requests in milliseconds
    pub min_interval_ms: u64,
    pub user_agent: String,
    /// Folder holding one sub-folder per mood
    pub tracks_root: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Github,
            owner: String::new(),
            repo: String::new(),
            branch: "main".to_string(),
            token: None,
            api_base: "https://api.github.com".to_string(),
            raw_base: "https://raw.githubusercontent.com".to_string(),
            timeout_secs: 10,
            min_interval_ms: 100,
            user_agent: concat!("moodcast/", env!("CARGO_PKG_VERSION")).to_string(),
            tracks_root: "tracks".to_string(),
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    /// Replace owner, repo and branch with their environment values, if set
    ///
    /// **Priority:** ENV → TOML. Blank values are ignored.
    pub fn apply_env_overrides(&mut self) {
        let fields = [
            (OWNER_ENV_VAR, &mut self.owner),
            (REPO_ENV_VAR, &mut self.repo),
            (BRANCH_ENV_VAR, &mut self.branch),
        ];
        for (var, field) in fields {
            if let Some(value) = std::env::var(var).ok().filter(|v| is_valid_key(v)) {
                if !field.is_empty() && field.as_str() != value.trim() {
                    info!("{} overrides configured value '{}'", var, field);
                }
                *field = value.trim().to_string();
            }
        }
    }
}

/// Track catalog settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Listing cache lifetime in seconds
    pub ttl_secs: u64,
    /// Recognised audio extensions, without the dot
    pub extensions: Vec<String>,
    /// Extra attempts after a transient listing failure
    pub transient_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 60,
            extensions: ["mp3", "m4a", "ogg", "wav"]
                .iter()
                .map(|e| e.to_string())
                .collect(),
            transient_retries: 2,
            retry_backoff_ms: 200,
        }
    }
}

impl CatalogConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Audit log settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Disable to skip recording selections entirely
    pub enabled: bool,
    /// Path of the CSV blob in the remote store
    pub path: String,
    /// Extra attempts after a conflicting or transient write
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "stats/emotions.csv".to_string(),
            max_retries: 3,
            retry_backoff_ms: 250,
        }
    }
}

impl AuditConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Emotion classifier settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Budget for a detector that does not set its own
    pub default_timeout_secs: u64,
    /// Detectors in priority order
    pub detectors: Vec<DetectorConfig>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 15,
            detectors: Vec::new(),
        }
    }
}

impl ClassifierConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }
}

/// One configured emotion detector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DetectorConfig {
    /// External command printing DeepFace `analyze` JSON
    Deepface(CommandDetectorConfig),
    /// External command printing FER `detect_emotions` JSON
    Fer(CommandDetectorConfig),
    /// Placeholder that registers nothing
    None,
}

/// External command detector settings
///
/// The image path is appended as the last argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDetectorConfig {
    /// Name reported in results; defaults to the detector kind
    #[serde(default)]
    pub name: Option<String>,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Overrides `classifier.default_timeout_secs`
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Mood table and buttons
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MoodsConfig {
    /// Mood for labels missing from `emotions`
    pub default: MoodKey,
    /// Emotion label -> mood
    pub emotions: BTreeMap<String, MoodKey>,
    pub buttons: Vec<MoodButton>,
}

impl Default for MoodsConfig {
    fn default() -> Self {
        let emotions = [
            ("happy", MoodKey::Happy),
            ("neutral", MoodKey::Calm),
            ("sad", MoodKey::Sad),
            ("angry", MoodKey::Angry),
            ("disgust", MoodKey::Angry),
            ("fear", MoodKey::Calm),
            ("surprise", MoodKey::Energy),
        ]
        .into_iter()
        .map(|(label, mood)| (label.to_string(), mood))
        .collect();

        Self {
            default: MoodKey::Calm,
            emotions,
            buttons: MoodButton::defaults(),
        }
    }
}

impl TomlConfig {
    /// Parse and validate TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the dispatcher cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.store.backend == StoreBackend::Github
            && (self.store.owner.trim().is_empty() || self.store.repo.trim().is_empty())
        {
            return Err(Error::Config(
                "store.owner and store.repo are required for the github backend".to_string(),
            ));
        }
        if self.store.timeout_secs == 0 {
            return Err(Error::Config("store.timeout_secs must be positive".to_string()));
        }
        if self.catalog.ttl_secs == 0 {
            return Err(Error::Config("catalog.ttl_secs must be positive".to_string()));
        }
        if self.catalog.extensions.iter().all(|e| e.trim().is_empty()) {
            return Err(Error::Config("catalog.extensions must not be empty".to_string()));
        }
        if self.audit.path.trim().is_empty() {
            return Err(Error::Config("audit.path must not be empty".to_string()));
        }
        for detector in &self.classifier.detectors {
            if let DetectorConfig::Deepface(cmd) | DetectorConfig::Fer(cmd) = detector {
                if cmd.program.trim().is_empty() {
                    return Err(Error::Config("detector program must not be empty".to_string()));
                }
            }
        }

        let mut seen = HashSet::new();
        for button in &self.moods.buttons {
            let id = button.id.trim().to_ascii_lowercase();
            if id.is_empty() {
                return Err(Error::Config("mood button id must not be empty".to_string()));
            }
            if !seen.insert(id) {
                return Err(Error::Config(format!("duplicate mood button id '{}'", button.id)));
            }
        }

        Ok(())
    }
}

/// Locates and loads the bootstrap config file
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    cli_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new(cli_path: Option<PathBuf>) -> Self {
        Self { cli_path }
    }

    /// Find the config file to use, if any
    ///
    /// An explicitly named file (CLI or environment) is returned even when it
    /// does not exist so that `load` can report it.
    pub fn locate(&self) -> Option<PathBuf> {
        if let Some(path) = &self.cli_path {
            return Some(path.clone());
        }

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            if !path.trim().is_empty() {
                return Some(PathBuf::from(path));
            }
        }

        default_config_path().filter(|p| p.exists())
    }

    /// Load configuration, falling back to defaults when no file is found
    ///
    /// A missing default-location file is not an error. A file named on the
    /// command line or in the environment must exist and parse.
    pub fn load(&self) -> Result<TomlConfig> {
        match self.locate() {
            Some(path) => {
                let config = load_toml_config(&path)?;
                info!("Loaded configuration from {}", path.display());
                Ok(config)
            }
            None => {
                warn!("No configuration file found, using compiled defaults");
                let mut config = TomlConfig::default();
                config.store.apply_env_overrides();
                config.validate()?;
                Ok(config)
            }
        }
    }
}

/// Read and parse a TOML config file, apply environment overrides, validate
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let mut config: TomlConfig = toml::from_str(&content)?;
    config.store.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

/// Per-platform default config file location
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("moodcast").join("config.toml"))
}

/// Resolve the GitHub token
///
/// **Priority:** ENV → TOML. Returns `None` for anonymous access.
pub fn resolve_github_token(toml_token: Option<&str>) -> Option<String> {
    let env_token = std::env::var(TOKEN_ENV_VAR).ok().filter(|t| is_valid_key(t));
    let toml_token = toml_token.filter(|t| is_valid_key(t));

    if env_token.is_some() && toml_token.is_some() {
        warn!("GitHub token found in environment and TOML. Using environment (highest priority).");
    }

    if let Some(token) = env_token {
        info!("GitHub token loaded from environment variable");
        return Some(token);
    }

    if let Some(token) = toml_token {
        info!("GitHub token loaded from TOML config");
        return Some(token.to_string());
    }

    None
}

/// Validate a secret (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = TomlConfig::default();
        assert_eq!(config.catalog.ttl(), Duration::from_secs(60));
        assert_eq!(config.classifier.default_timeout(), Duration::from_secs(15));
        assert_eq!(config.store.timeout(), Duration::from_secs(10));
        assert_eq!(config.audit.path, "stats/emotions.csv");
        assert_eq!(config.audit.max_retries, 3);
        assert_eq!(config.moods.default, MoodKey::Calm);
        assert_eq!(config.moods.emotions.get("surprise"), Some(&MoodKey::Energy));
    }

    #[test]
    fn test_default_github_backend_requires_repo() {
        let err = TomlConfig::default().validate().unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("store.owner")));
    }

    #[test]
    fn test_memory_backend_validates_without_repo() {
        let mut config = TomlConfig::default();
        config.store.backend = StoreBackend::Memory;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let mut config = TomlConfig::default();
        config.store.backend = StoreBackend::Memory;
        config.catalog.ttl_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_button_ids_rejected() {
        let mut config = TomlConfig::default();
        config.store.backend = StoreBackend::Memory;
        config
            .moods
            .buttons
            .push(MoodButton::new("RAVE", "again", MoodKey::Sad));
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("duplicate")));
    }

    #[test]
    fn test_is_valid_key() {
        assert!(is_valid_key("ghp_abc"));
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("   "));
    }
}
