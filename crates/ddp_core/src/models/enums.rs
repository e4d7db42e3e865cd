//! Core enums used throughout the conversion pipeline.

use serde::{Deserialize, Serialize};

/// Audio codec family as reported by the prober.
///
/// Only the formats the qualification rule cares about get their own
/// variant; everything else collapses to `Other` (the raw codec name is
/// kept on the track for diagnostics).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AudioFormat {
    Dts,
    Ac3,
    Eac3,
    Aac,
    Other,
}

impl AudioFormat {
    /// Parse an ffprobe codec name (e.g. "dts", "eac3", "truehd").
    pub fn from_codec_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "dts" | "dca" => Self::Dts,
            "ac3" => Self::Ac3,
            "eac3" => Self::Eac3,
            "aac" => Self::Aac,
            _ => Self::Other,
        }
    }

    /// Whether this format is already playable without conversion.
    ///
    /// The presence of any compatible track disqualifies a file from
    /// conversion, regardless of DTS tracks also being present.
    pub fn is_compatible(self) -> bool {
        matches!(self, Self::Ac3 | Self::Eac3 | Self::Aac)
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioFormat::Dts => write!(f, "DTS"),
            AudioFormat::Ac3 => write!(f, "AC-3"),
            AudioFormat::Eac3 => write!(f, "E-AC-3"),
            AudioFormat::Aac => write!(f, "AAC"),
            AudioFormat::Other => write!(f, "other"),
        }
    }
}
