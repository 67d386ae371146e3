//! Configuration file parser for ~/.config/feedsift/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde, but logged as warnings so typos show
//! up in the logs.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::feed::RemoteSource;
use crate::ingest::{PoolOptions, SourceDescriptor};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Candidates per batch; one store handle per batch.
    pub batch_size: usize,

    /// Concurrent fetches inside a batch.
    pub workers: usize,

    /// Upper bound for one fetch, in seconds.
    pub fetch_timeout_secs: u64,

    /// Retries for 429/5xx responses.
    pub max_retries: u32,

    /// File extension of manifests found by the directory scan.
    pub manifest_extension: String,

    /// Directory scanned for manifests by `add-lists` when `--dir` is absent.
    pub scan_dir: Option<PathBuf>,

    /// Keep candidates that point at loopback or private addresses.
    pub allow_private_hosts: bool,

    pub user_agent: String,

    pub remote_sources: Vec<RemoteSource>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            batch_size: 100,
            workers: 5,
            fetch_timeout_secs: 70,
            max_retries: 2,
            manifest_extension: "opml".to_string(),
            scan_dir: None,
            allow_private_hosts: false,
            user_agent: concat!("feedsift/", env!("CARGO_PKG_VERSION")).to_string(),
            remote_sources: Vec::new(),
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Upper bound for `max_retries`; backoff doubles per retry.
    pub const MAX_RETRIES: u32 = 10;

    const KNOWN_KEYS: [&'static str; 9] = [
        "batch_size",
        "workers",
        "fetch_timeout_secs",
        "max_retries",
        "manifest_extension",
        "scan_dir",
        "allow_private_hosts",
        "user_agent",
        "remote_sources",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading
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
                // File deleted between metadata and read
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
            batch_size = config.batch_size,
            workers = config.workers,
            remote_sources = config.remote_sources.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".into()));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.max_retries > Self::MAX_RETRIES {
            return Err(ConfigError::Invalid(format!(
                "max_retries must be at most {}",
                Self::MAX_RETRIES
            )));
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            workers: self.workers,
            fetch_timeout: self.fetch_timeout(),
        }
    }

    /// Sources for `add-lists`: the scan directory (if any), the configured
    /// remote sources, then `extra` remote URLs.
    pub fn sources(&self, dir: Option<&Path>, extra: &[String]) -> Vec<SourceDescriptor> {
        let mut sources = Vec::new();
        if let Some(root) = dir.or(self.scan_dir.as_deref()) {
            sources.push(SourceDescriptor::Directory {
                root: root.to_path_buf(),
                extension: self.manifest_extension.clone(),
            });
        }
        sources.extend(self.remote_sources.iter().cloned().map(SourceDescriptor::Remote));
        sources.extend(
            extra
                .iter()
                .map(|url| SourceDescriptor::Remote(RemoteSource::new(url.as_str()))),
        );
        sources
    }
}

// ============================================================================
// Tests
// ============================================================================
