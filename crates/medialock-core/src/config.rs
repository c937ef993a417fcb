use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{MediaError, MediaResult};
use crate::types::MediaType;

/// Top-level configuration (loaded from medialock.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaLockConfig {
    pub logging: LoggingConfig,
    pub stream: StreamConfig,
    pub keys: KeysConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Bytes requested per `read` call when copying to a sink (default: 8192)
    pub read_size: usize,
    /// Media type used when none is given on the command line
    pub default_media_type: MediaType,
    /// Produce a sidecar for VIDEO/AUDIO unless told otherwise
    pub sidecar: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    /// Default 32-byte root key file
    pub key_file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            read_size: 8192,
            default_media_type: MediaType::Document,
            sidecar: false,
        }
    }
}

impl MediaLockConfig {
    /// Load from `path`, or fall back to defaults when the file does not exist.
    pub fn load(path: &Path) -> MediaResult<Self> {
        if !path.exists() {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: MediaLockConfig = toml::from_str(&content)
            .map_err(|e| MediaError::Config(format!("parsing {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> MediaResult<()> {
        if self.stream.read_size == 0 {
            return Err(MediaError::Config("stream.read_size must be > 0".into()));
        }
        match self.logging.format.as_str() {
            "json" | "text" => Ok(()),
            other => Err(MediaError::Config(format!(
                "logging.format must be \"json\" or \"text\", got {other:?}"
            ))),
        }
    }
}
