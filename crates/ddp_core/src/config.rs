//! TOML-backed settings.
//!
//! Settings are organized into sections that map to TOML tables; every
//! field is serde-defaulted so a partial or absent file still yields a
//! working configuration.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::validate::DEFAULT_SIZE_TOLERANCE;

/// Root settings structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// External tool locations.
    #[serde(default)]
    pub tools: ToolSettings,

    /// Conversion safeguards.
    #[serde(default)]
    pub conversion: ConversionSettings,
}

/// External tool locations (bare names resolve via PATH).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSettings {
    /// Metadata prober binary.
    #[serde(default = "default_ffprobe")]
    pub ffprobe: String,

    /// Encoder binary.
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,
}

fn default_ffprobe() -> String {
    "ffprobe".to_string()
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            ffprobe: default_ffprobe(),
            ffmpeg: default_ffmpeg(),
        }
    }
}

/// Conversion safeguard settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionSettings {
    /// Symmetric fractional size tolerance for the validation safeguard.
    #[serde(default = "default_size_tolerance")]
    pub size_tolerance: f64,

    /// Wall-clock limit per encode in seconds; absent means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encode_timeout_secs: Option<u64>,
}

fn default_size_tolerance() -> f64 {
    DEFAULT_SIZE_TOLERANCE
}

impl Default for ConversionSettings {
    fn default() -> Self {
        Self {
            size_tolerance: default_size_tolerance(),
            encode_timeout_secs: None,
        }
    }
}

/// Error type for settings load/save.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Settings file could not be read or written.
    #[error("Failed to access settings file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Settings file content is not valid TOML.
    #[error("Failed to parse settings file {path}: {message}")]
    Parse { path: String, message: String },
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Load settings, falling back to defaults when the file is absent.
    /// A present-but-invalid file is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(
                "Settings file {} not found, using defaults",
                path.display()
            );
            Ok(Self::default())
        }
    }

    /// Write settings as TOML.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        fs::write(path, text).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })
    }
}
