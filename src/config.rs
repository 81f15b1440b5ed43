//! Configuration for hybridfeed.
//!
//! Values are layered, lowest precedence first: built-in defaults, an
//! optional TOML file, environment variables, then command-line flags.
//! The file is optional; a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde but logged as warnings.
//!
//! Nothing below `main` reads the environment. [`Config::apply_env`] takes a
//! lookup function so the caller decides where values come from.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable overriding [`Config::cache_dir`].
pub const ENV_CACHE_DIR: &str = "HYBRIDFEED_CACHE";
/// Environment variable overriding [`Config::max_age_secs`].
pub const ENV_MAX_AGE: &str = "HYBRIDFEED_MAX_AGE";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// An environment override could not be interpreted.
    #[error("Invalid value for {name}: {value:?}")]
    InvalidEnv { name: &'static str, value: String },
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Runtime configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding one cached payload per feed URL.
    pub cache_dir: PathBuf,

    /// Cached payloads older than this are refetched. 0 = always fetch.
    pub max_age_secs: u64,

    /// Maximum number of feeds fetched at once. Unset = all at once.
    pub max_concurrency: Option<usize>,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Maximum accepted feed body size in bytes.
    pub max_feed_bytes: usize,

    /// User-Agent header sent with every request.
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("./cache"),
            max_age_secs: 3600,
            max_concurrency: None,
            request_timeout_secs: 30,
            max_feed_bytes: 10 * 1024 * 1024,
            user_agent: concat!("hybridfeed/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 6] = [
        "cache_dir",
        "max_age_secs",
        "max_concurrency",
        "request_timeout_secs",
        "max_feed_bytes",
        "user_agent",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → silently accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            cache_dir = %config.cache_dir.display(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Applies environment overrides fetched through `lookup`.
    ///
    /// Empty values are ignored.
    pub fn apply_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_CACHE_DIR).filter(|v| !v.is_empty()) {
            self.cache_dir = PathBuf::from(dir);
        }

        if let Some(value) = lookup(ENV_MAX_AGE).filter(|v| !v.is_empty()) {
            self.max_age_secs = value.trim().parse::<u64>().map_err(|_| ConfigError::InvalidEnv {
                name: ENV_MAX_AGE,
                value,
            })?;
        }

        Ok(self)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// ============================================================================
// Tests
// ============================================================================
