//! Audio track and inventory structures.

use serde::{Deserialize, Serialize};

use super::AudioFormat;
use crate::qualify::is_lossless_dts;

/// A single audio stream within a media container.
///
/// Immutable once parsed from a probe; it has no identity beyond its
/// position within the [`TrackInventory`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioTrack {
    /// Codec family.
    pub format: AudioFormat,
    /// Raw codec name as reported by the prober (kept for diagnostics).
    pub codec_name: String,
    /// Normalized language code ("en", "ja", "und", ...).
    #[serde(default = "default_lang")]
    pub language: String,
    /// Free-text profile/format-info string (e.g. "DTS-HD MA").
    #[serde(default)]
    pub profile: String,
    /// Whether this looks like a lossless DTS variant. Derived from the
    /// profile text at parse time.
    #[serde(default)]
    pub lossless: bool,
}

fn default_lang() -> String {
    "und".to_string()
}

impl AudioTrack {
    /// Create a new track with the given format and raw codec name.
    pub fn new(format: AudioFormat, codec_name: impl Into<String>) -> Self {
        Self {
            format,
            codec_name: codec_name.into(),
            language: default_lang(),
            profile: String::new(),
            lossless: false,
        }
    }

    /// Set the language code.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Set the profile text and re-derive the lossless flag from it.
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = profile.into();
        self.lossless = self.format == AudioFormat::Dts && is_lossless_dts(&self.profile);
        self
    }

    /// Whether this track's language matches English.
    pub fn is_english(&self) -> bool {
        self.language.eq_ignore_ascii_case("en")
    }

    /// One-line description for log output.
    pub fn display_name(&self, index: usize) -> String {
        let lossless_note = if self.lossless { " (lossless DTS-HD)" } else { "" };
        format!(
            "index={} format={} language={}{}",
            index, self.format, self.language, lossless_note
        )
    }
}

/// Ordered sequence of a container's audio streams.
///
/// Index order must exactly match the stream order consumed by the
/// transcoder; index drift here silently misconverts the wrong track.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInventory {
    tracks: Vec<AudioTrack>,
}

impl TrackInventory {
    /// Create an empty inventory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an inventory from tracks already in stream order.
    pub fn from_tracks(tracks: Vec<AudioTrack>) -> Self {
        Self { tracks }
    }

    /// Number of audio tracks.
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    /// Whether the container has no audio tracks.
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Get a track by its stream index.
    pub fn get(&self, index: usize) -> Option<&AudioTrack> {
        self.tracks.get(index)
    }

    /// Iterate over tracks in stream order.
    pub fn iter(&self) -> std::slice::Iter<'_, AudioTrack> {
        self.tracks.iter()
    }

    /// Whether any track has the given format.
    pub fn has_format(&self, format: AudioFormat) -> bool {
        self.tracks.iter().any(|t| t.format == format)
    }

    /// Per-track description lines for log output.
    pub fn describe(&self) -> Vec<String> {
        self.tracks
            .iter()
            .enumerate()
            .map(|(i, t)| t.display_name(i))
            .collect()
    }
}
