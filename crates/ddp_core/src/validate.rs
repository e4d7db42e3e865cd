//! Post-transform validation safeguards.
//!
//! The produced output is inspected against the transformation plan and
//! either accepted or handed to the quarantine path. Any single failure is
//! terminal for the attempt; the caller must never repair in place.

use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::models::{AudioFormat, TrackInventory};
use crate::probe::Prober;
use crate::transcode::TranscodeRequest;

/// Default symmetric size tolerance (±10%).
pub const DEFAULT_SIZE_TOLERANCE: f64 = 0.10;

/// Why a produced output was rejected.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ValidationFailure {
    /// Temp output missing or zero bytes.
    EmptyOrMissingOutput,
    /// Output size fell outside the allowed fraction of the source size.
    SizeOutOfTolerance {
        original_bytes: u64,
        output_bytes: u64,
        tolerance: f64,
    },
    /// The output could not be re-probed.
    OutputUnreadable { message: String },
    /// Audio track count changed.
    TrackCountMismatch { original: usize, output: usize },
    /// The target index is not E-AC-3 in the output.
    TargetCodecNotApplied { index: usize, found: String },
    /// No E-AC-3 track anywhere in the output (defensive redundancy).
    NoCompatibleTrackProduced,
}

impl std::fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationFailure::EmptyOrMissingOutput => {
                write!(f, "output missing or zero bytes")
            }
            ValidationFailure::SizeOutOfTolerance {
                original_bytes,
                output_bytes,
                tolerance,
            } => write!(
                f,
                "size outside tolerance: original={} output={} (+/-{:.0}% allowed)",
                original_bytes,
                output_bytes,
                tolerance * 100.0
            ),
            ValidationFailure::OutputUnreadable { message } => {
                write!(f, "output could not be probed: {}", message)
            }
            ValidationFailure::TrackCountMismatch { original, output } => write!(
                f,
                "audio track count changed: original={} output={}",
                original, output
            ),
            ValidationFailure::TargetCodecNotApplied { index, found } => write!(
                f,
                "target track at index {} is not E-AC-3 (found {})",
                index, found
            ),
            ValidationFailure::NoCompatibleTrackProduced => {
                write!(f, "no E-AC-3 track found in output")
            }
        }
    }
}

/// Result of validating one produced output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ValidationOutcome {
    Passed,
    Failed(ValidationFailure),
}

impl ValidationOutcome {
    /// Whether the output was accepted.
    pub fn passed(&self) -> bool {
        matches!(self, ValidationOutcome::Passed)
    }

    /// The failure, if any.
    pub fn failure(&self) -> Option<&ValidationFailure> {
        match self {
            ValidationOutcome::Passed => None,
            ValidationOutcome::Failed(failure) => Some(failure),
        }
    }
}

/// Whether an output size lies within a symmetric fractional tolerance of
/// the source size.
pub fn size_within_tolerance(original: u64, output: u64, tolerance: f64) -> bool {
    let lower = (1.0 - tolerance) * original as f64;
    let upper = (1.0 + tolerance) * original as f64;
    let output = output as f64;
    lower <= output && output <= upper
}

/// Structural checks over the re-probed output inventory (checks 3-5).
///
/// Pure over the inventories; evaluated in fixed order with the first
/// failure winning.
pub fn check_streams(
    output: &TrackInventory,
    original_len: usize,
    target_index: usize,
) -> Option<ValidationFailure> {
    if output.len() != original_len {
        return Some(ValidationFailure::TrackCountMismatch {
            original: original_len,
            output: output.len(),
        });
    }

    match output.get(target_index) {
        Some(track) if track.format == AudioFormat::Eac3 => {}
        Some(track) => {
            return Some(ValidationFailure::TargetCodecNotApplied {
                index: target_index,
                found: track.format.to_string(),
            });
        }
        None => {
            return Some(ValidationFailure::TargetCodecNotApplied {
                index: target_index,
                found: "missing".to_string(),
            });
        }
    }

    if !output.has_format(AudioFormat::Eac3) {
        return Some(ValidationFailure::NoCompatibleTrackProduced);
    }

    None
}

/// Validate a produced temp output against the plan.
///
/// Checks, in order, each with a distinct failure reason:
/// 1. Output exists and is non-zero.
/// 2. Size within `tolerance` of the source — skipped for lossless
///    sources, which legitimately shrink unpredictably.
/// 3. Re-probe track count equals the original inventory length.
/// 4. The target index now reports E-AC-3.
/// 5. At least one E-AC-3 track exists anywhere.
pub fn validate_output(
    prober: &dyn Prober,
    request: &TranscodeRequest,
    original_inventory: &TrackInventory,
    tolerance: f64,
) -> ValidationOutcome {
    let output_size = match fs::metadata(&request.temp_output) {
        Ok(meta) => meta.len(),
        Err(_) => return ValidationOutcome::Failed(ValidationFailure::EmptyOrMissingOutput),
    };
    if output_size == 0 {
        return ValidationOutcome::Failed(ValidationFailure::EmptyOrMissingOutput);
    }

    if request.lossless_source {
        tracing::debug!(
            "Skipping size tolerance check (lossless DTS source, shrink expected)"
        );
    } else {
        let original_size = match source_size(&request.source) {
            Ok(size) => size,
            Err(message) => {
                return ValidationOutcome::Failed(ValidationFailure::OutputUnreadable { message });
            }
        };
        if !size_within_tolerance(original_size, output_size, tolerance) {
            return ValidationOutcome::Failed(ValidationFailure::SizeOutOfTolerance {
                original_bytes: original_size,
                output_bytes: output_size,
                tolerance,
            });
        }
    }

    let output_inventory = match prober.probe(&request.temp_output) {
        Ok(inventory) => inventory,
        Err(e) => {
            return ValidationOutcome::Failed(ValidationFailure::OutputUnreadable {
                message: e.to_string(),
            });
        }
    };

    match check_streams(
        &output_inventory,
        original_inventory.len(),
        request.target_audio_index,
    ) {
        Some(failure) => ValidationOutcome::Failed(failure),
        None => ValidationOutcome::Passed,
    }
}

fn source_size(path: &Path) -> Result<u64, String> {
    fs::metadata(path).map(|m| m.len()).map_err(|e| {
        format!("failed to stat source {}: {}", path.display(), e)
    })
}
