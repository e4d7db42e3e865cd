//! Qualification engine: decides whether a file needs conversion and which
//! audio stream is the target.
//!
//! The decision function is pure and total over any well-formed inventory.
//! That purity is what makes the whole pipeline testable without invoking
//! the external probe or encoder tools.

use serde::{Deserialize, Serialize};

use crate::models::{AudioFormat, TrackInventory};

/// Language a DTS track must carry to qualify for conversion.
pub const TARGET_LANGUAGE: &str = "en";

/// Substrings identifying lossless DTS variants in profile text.
///
/// The set is intentionally permissive: a false negative only re-enables
/// the size safeguard, while a false positive would silently bypass it.
/// Do not extend this list without treating it as a behavior change.
const LOSSLESS_KEYWORDS: &[&str] = &["ma", "master audio", "xll", "dts:x"];

/// Why a file was not selected for conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// The container has no audio tracks at all.
    NoAudioTracks,
    /// At least one already-compatible track (AC-3, E-AC-3, AAC) exists.
    CompatibleTrackExists { formats: Vec<AudioFormat> },
    /// No DTS track in the container.
    NoDtsTracks,
    /// DTS present, but none in the target language.
    NoEnglishDtsTrack,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::NoAudioTracks => write!(f, "no audio tracks found"),
            SkipReason::CompatibleTrackExists { formats } => {
                let names: Vec<String> = formats.iter().map(|fmt| fmt.to_string()).collect();
                write!(f, "existing compatible format(s): {}", names.join(", "))
            }
            SkipReason::NoDtsTracks => write!(f, "no DTS tracks present"),
            SkipReason::NoEnglishDtsTrack => {
                write!(f, "DTS present but no English DTS track")
            }
        }
    }
}

/// Outcome of qualifying a track inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualificationResult {
    /// The file is not a conversion target.
    Skip(SkipReason),
    /// Convert the audio stream at `index`.
    Target { index: usize, lossless: bool },
}

impl QualificationResult {
    /// Whether the file qualified for conversion.
    pub fn is_target(&self) -> bool {
        matches!(self, QualificationResult::Target { .. })
    }
}

/// Decide if and which audio stream is a conversion target.
///
/// Evaluation order is fixed and short-circuits:
/// 1. Empty inventory → skip.
/// 2. Any compatible track (AC-3, E-AC-3, AAC) → skip, regardless of DTS
///    presence.
/// 3. First (lowest-index) DTS track in the target language → target.
///    Multiple English DTS tracks are a committed limitation: only the
///    lowest index is ever selected.
/// 4. Otherwise → skip with the most specific reason.
pub fn qualify(inventory: &TrackInventory) -> QualificationResult {
    if inventory.is_empty() {
        return QualificationResult::Skip(SkipReason::NoAudioTracks);
    }

    let mut compatible: Vec<AudioFormat> = Vec::new();
    for track in inventory.iter() {
        if track.format.is_compatible() && !compatible.contains(&track.format) {
            compatible.push(track.format);
        }
    }
    if !compatible.is_empty() {
        return QualificationResult::Skip(SkipReason::CompatibleTrackExists {
            formats: compatible,
        });
    }

    for (index, track) in inventory.iter().enumerate() {
        if track.format == AudioFormat::Dts && track.is_english() {
            return QualificationResult::Target {
                index,
                lossless: track.lossless,
            };
        }
    }

    if inventory.has_format(AudioFormat::Dts) {
        QualificationResult::Skip(SkipReason::NoEnglishDtsTrack)
    } else {
        QualificationResult::Skip(SkipReason::NoDtsTracks)
    }
}

/// Heuristic detection of lossless DTS variants (DTS-HD MA, DTS:X).
///
/// Case-insensitive substring match over the track's profile text. An
/// absent or empty profile is never lossless.
pub fn is_lossless_dts(profile: &str) -> bool {
    if profile.is_empty() {
        return false;
    }
    let blob = profile.to_lowercase();
    LOSSLESS_KEYWORDS.iter().any(|k| blob.contains(k))
}
