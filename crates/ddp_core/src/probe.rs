//! Container probing via ffprobe.
//!
//! Parses `ffprobe -show_streams` JSON into a [`TrackInventory`]. Only
//! audio streams are selected, in container order, so the inventory index
//! matches the `a:N` stream specifier consumed by the encoder.

use std::path::{Path, PathBuf};
use std::process::Command;

use serde_json::Value;
use thiserror::Error;

use crate::models::{AudioFormat, AudioTrack, TrackInventory};

/// Error type for probe operations.
#[derive(Error, Debug)]
pub enum ProbeError {
    /// File not found.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// The probe tool could not be started.
    #[error("Failed to run {tool}: {message}")]
    ToolLaunchFailed { tool: String, message: String },

    /// The probe tool ran but reported failure.
    #[error("{tool} failed with exit code {exit_code}: {message}")]
    CommandFailed {
        tool: String,
        exit_code: i32,
        message: String,
    },

    /// The probe output could not be parsed.
    #[error("Failed to parse probe output for {path}: {message}")]
    ParseError { path: String, message: String },
}

/// Result type for probe operations.
pub type ProbeResult<T> = Result<T, ProbeError>;

/// Metadata prober collaborator.
///
/// Implementations must report tracks in stable stream order and expose
/// the free-text profile field used by the lossless heuristic.
pub trait Prober {
    /// Probe a container file and return its audio-track inventory.
    fn probe(&self, path: &Path) -> ProbeResult<TrackInventory>;
}

/// Prober backed by the ffprobe binary.
pub struct FfprobeProber {
    tool: PathBuf,
}

impl FfprobeProber {
    /// Create a prober using the given ffprobe binary (name or full path).
    pub fn new(tool: impl Into<PathBuf>) -> Self {
        Self { tool: tool.into() }
    }

    /// The configured tool path.
    pub fn tool(&self) -> &Path {
        &self.tool
    }
}

impl Default for FfprobeProber {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

impl Prober for FfprobeProber {
    fn probe(&self, path: &Path) -> ProbeResult<TrackInventory> {
        if !path.exists() {
            return Err(ProbeError::FileNotFound(path.to_path_buf()));
        }

        tracing::debug!("Probing file: {}", path.display());

        let output = Command::new(&self.tool)
            .args(["-v", "error", "-select_streams", "a", "-show_streams", "-of", "json"])
            .arg(path)
            .output()
            .map_err(|e| ProbeError::ToolLaunchFailed {
                tool: self.tool.display().to_string(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProbeError::CommandFailed {
                tool: self.tool.display().to_string(),
                exit_code: output.status.code().unwrap_or(-1),
                message: stderr.trim().to_string(),
            });
        }

        let json: Value =
            serde_json::from_slice(&output.stdout).map_err(|e| ProbeError::ParseError {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;

        parse_inventory(&json, path)
    }
}

/// Parse ffprobe `-show_streams` JSON into a track inventory.
pub fn parse_inventory(json: &Value, path: &Path) -> ProbeResult<TrackInventory> {
    let Some(streams) = json.get("streams").and_then(|s| s.as_array()) else {
        return Err(ProbeError::ParseError {
            path: path.display().to_string(),
            message: "missing 'streams' array".to_string(),
        });
    };

    let mut tracks = Vec::new();
    for stream in streams {
        // With -select_streams a only audio streams appear, but guard
        // against callers feeding unfiltered output.
        let codec_type = stream
            .get("codec_type")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        if codec_type != "audio" {
            continue;
        }

        let codec_name = stream
            .get("codec_name")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let format = AudioFormat::from_codec_name(&codec_name);

        let language = stream
            .get("tags")
            .and_then(|t| t.get("language"))
            .and_then(|l| l.as_str())
            .map(normalize_language)
            .unwrap_or_else(|| "und".to_string());

        let profile = stream
            .get("profile")
            .and_then(|p| p.as_str())
            .unwrap_or("")
            .to_string();

        tracks.push(
            AudioTrack::new(format, codec_name)
                .with_language(language)
                .with_profile(profile),
        );
    }

    Ok(TrackInventory::from_tracks(tracks))
}

/// Normalize a language tag to the two-letter form used by qualification.
///
/// ffprobe reports ISO 639-2 codes ("eng"); the qualification rule compares
/// against "en".
fn normalize_language(raw: &str) -> String {
    let lang = raw.trim().to_ascii_lowercase();
    match lang.as_str() {
        "" => "und".to_string(),
        "eng" => "en".to_string(),
        _ => lang,
    }
}
