//! Application configuration.
//!
//! Configuration is loaded from the first of:
//! 1. the `--config` path given on the command line
//! 2. `$GMAIL_ARCHIVER_CONFIG` (environment variable)
//! 3. `~/.config/gmail-archiver/config.json` (Linux)
//!    `~/Library/Application Support/gmail-archiver/config.json` (macOS)
//!    `%APPDATA%\gmail-archiver\config.json` (Windows)
//! 4. Built-in defaults
//!
//! Files are JSON unless the name ends in `.toml`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::archive::{CompressionKind, CompressorOptions, DEFAULT_MAX_MESSAGE_SIZE_MB};
use crate::error::{ArchiveError, Result};
use crate::source::SourceFilter;

/// Environment variable naming a config file.
pub const CONFIG_ENV_VAR: &str = "GMAIL_ARCHIVER_CONFIG";

/// Accepted range for `maxMessageSizeMB`.
pub const MAX_MESSAGE_SIZE_MB_RANGE: std::ops::RangeInclusive<u32> = 1..=1000;

const LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

const APP_DIR: &str = "gmail-archiver";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Compression selector: "lzma", "gzip", "bzip2", "xz" (case-insensitive).
    pub compression: String,
    /// Messages above this size (MiB) are streamed rather than buffered.
    #[serde(rename = "maxMessageSizeMB")]
    pub max_message_size_mb: u32,
    /// Where archives are written when no output path is given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_directory: Option<PathBuf>,
    /// Staging directory for the XZ and LZMA backends.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_directory: Option<PathBuf>,
    /// Override for the log file directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_directory: Option<PathBuf>,
    /// Only archive messages carrying this Gmail label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            compression: "lzma".to_string(),
            max_message_size_mb: DEFAULT_MAX_MESSAGE_SIZE_MB,
            output_directory: None,
            temp_directory: None,
            cache_directory: None,
            label: None,
            log_level: "warn".to_string(),
        }
    }
}

impl Config {
    /// Read, parse and validate one config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ArchiveError::FileNotFound(path.to_path_buf())
            } else {
                ArchiveError::io(path, e)
            }
        })?;

        let config: Config = if is_toml(path) {
            toml::from_str(&contents)
                .map_err(|e| ArchiveError::InvalidConfig(format!("{}: {e}", path.display())))?
        } else {
            serde_json::from_str(&contents)
                .map_err(|e| ArchiveError::InvalidConfig(format!("{}: {e}", path.display())))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges. Unknown compression selectors are not an error;
    /// they fall back to LZMA when resolved.
    pub fn validate(&self) -> Result<()> {
        if !MAX_MESSAGE_SIZE_MB_RANGE.contains(&self.max_message_size_mb) {
            return Err(ArchiveError::InvalidConfig(format!(
                "maxMessageSizeMB must be between {} and {}, got {}",
                MAX_MESSAGE_SIZE_MB_RANGE.start(),
                MAX_MESSAGE_SIZE_MB_RANGE.end(),
                self.max_message_size_mb
            )));
        }

        let level = self.log_level.trim().to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(ArchiveError::InvalidConfig(format!(
                "logLevel must be one of {}, got '{}'",
                LOG_LEVELS.join(", "),
                self.log_level
            )));
        }

        if let Some(dir) = &self.temp_directory {
            if !dir.is_dir() {
                return Err(ArchiveError::InvalidConfig(format!(
                    "tempDirectory '{}' is not a directory",
                    dir.display()
                )));
            }
        }

        Ok(())
    }

    pub fn compression_kind(&self) -> CompressionKind {
        CompressionKind::from_selector(&self.compression)
    }

    pub fn source_filter(&self) -> SourceFilter {
        SourceFilter::with_label(self.label.as_deref())
    }

    pub fn compressor_options(&self) -> CompressorOptions {
        match &self.temp_directory {
            Some(dir) => CompressorOptions {
                temp_dir: dir.clone(),
            },
            None => CompressorOptions::default(),
        }
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"))
}

/// Load configuration.
///
/// An explicit path must load cleanly. A discovered file that cannot be read
/// or parsed is logged and replaced by the defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    if let Some(path) = explicit {
        let config = Config::from_file(path)?;
        tracing::info!(path = %path.display(), "Loaded config");
        return Ok(config);
    }

    if let Some(path) = config_file_path() {
        if path.exists() {
            match Config::from_file(&path) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "Loaded config");
                    return Ok(config);
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to load config, using defaults"
                    );
                }
            }
        }
    }
    Ok(Config::default())
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var(CONFIG_ENV_VAR) {
        if !env_path.trim().is_empty() {
            return Some(PathBuf::from(env_path));
        }
    }

    dirs::config_dir().map(|d| d.join(APP_DIR).join("config.json"))
}

/// Return the directory for log files.
pub fn cache_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.cache_directory {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// Return the log file path.
pub fn log_file_path(config: &Config) -> PathBuf {
    cache_dir(config).join("gmail-archiver.log")
}
