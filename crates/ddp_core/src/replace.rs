//! Safe-replace file-state machine.
//!
//! File state is encoded purely in filename suffixes so an operator can
//! inspect and recover artifacts by hand; no sidecar metadata exists. This
//! module owns the suffix vocabulary, the pure next-name computations, and
//! the rename primitives shared by the live-conversion, reverify, and
//! cleanup paths.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Marker inserted before the extension for in-flight encoder output.
pub const TEMP_MARKER: &str = ".temp";
/// Marker for output that failed validation and was preserved.
pub const QUARANTINE_MARKER: &str = ".BAD_CONVERT";
/// Marker for an original renamed aside during reverify promotion.
pub const BACKUP_MARKER: &str = ".ORIG_BACKUP";

/// Upper bound on the ordinal collision search. Exceeding it is reported
/// rather than looping forever or silently overwriting.
const MAX_SUFFIX_ATTEMPTS: u32 = 4096;

/// Role a file plays in the replacement protocol, decoded from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    /// The authoritative source file.
    Original,
    /// In-flight encoder output (`<base>.temp.<ext>`).
    Pending,
    /// Failed-validation output kept for inspection
    /// (`<base>.BAD_CONVERT[_n].<ext>`).
    Quarantined,
    /// Original renamed aside by a reverify promotion
    /// (`<base>.ORIG_BACKUP[_n].<ext>`).
    BackedUp,
}

/// Error type for replacement operations.
#[derive(Error, Debug)]
pub enum ReplaceError {
    /// No free candidate name found within the attempt cap.
    #[error("no free '{marker}' name for {base} after {attempts} attempts")]
    CollisionSearchExhausted {
        marker: String,
        base: PathBuf,
        attempts: u32,
    },

    /// The path has no usable file name.
    #[error("path has no file name: {0}")]
    InvalidPath(PathBuf),

    /// Filesystem operation failed.
    #[error("I/O error during {operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: io::Error,
    },
}

impl ReplaceError {
    fn io(operation: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }
}

/// Result type for replacement operations.
pub type ReplaceResult<T> = Result<T, ReplaceError>;

/// Split a file name into (stem, extension-with-dot).
///
/// "movie.mkv" → ("movie", ".mkv"); an extensionless name yields an empty
/// extension.
fn split_name(path: &Path) -> Option<(String, String)> {
    let name = path.file_name()?.to_str()?;
    match name.rfind('.') {
        Some(pos) if pos > 0 => Some((name[..pos].to_string(), name[pos..].to_string())),
        _ => Some((name.to_string(), String::new())),
    }
}

/// Classify a file by the suffix markers in its name.
pub fn classify(path: &Path) -> FileState {
    if original_for_temp(path).is_some() {
        FileState::Pending
    } else if original_for_marked(path, QUARANTINE_MARKER).is_some() {
        FileState::Quarantined
    } else if original_for_marked(path, BACKUP_MARKER).is_some() {
        FileState::BackedUp
    } else {
        FileState::Original
    }
}

/// Compute the temp output path for a source: `<stem>.temp<ext>`, a sibling
/// in the same directory.
pub fn temp_path(source: &Path) -> ReplaceResult<PathBuf> {
    let (stem, ext) = split_name(source).ok_or_else(|| {
        ReplaceError::InvalidPath(source.to_path_buf())
    })?;
    Ok(source.with_file_name(format!("{}{}{}", stem, TEMP_MARKER, ext)))
}

/// Candidate name for the nth attempt of a marker suffix.
///
/// Attempt 1 is unsuffixed (`movie.BAD_CONVERT.mkv`); attempt n ≥ 2 carries
/// a numeric ordinal (`movie.BAD_CONVERT_2.mkv`).
pub fn marker_name(source: &Path, marker: &str, attempt: u32) -> ReplaceResult<PathBuf> {
    let (stem, ext) = split_name(source).ok_or_else(|| {
        ReplaceError::InvalidPath(source.to_path_buf())
    })?;
    let name = if attempt <= 1 {
        format!("{}{}{}", stem, marker, ext)
    } else {
        format!("{}{}_{}{}", stem, marker, attempt, ext)
    };
    Ok(source.with_file_name(name))
}

/// Find the first non-colliding marker name for a source path.
pub fn next_free_name(source: &Path, marker: &str) -> ReplaceResult<PathBuf> {
    for attempt in 1..=MAX_SUFFIX_ATTEMPTS {
        let candidate = marker_name(source, marker, attempt)?;
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(ReplaceError::CollisionSearchExhausted {
        marker: marker.to_string(),
        base: source.to_path_buf(),
        attempts: MAX_SUFFIX_ATTEMPTS,
    })
}

/// Recover the original path for a temp-suffixed file.
///
/// `my movie.temp.mkv` → `my movie.mkv`. Marker match is case-insensitive.
pub fn original_for_temp(path: &Path) -> Option<PathBuf> {
    let (stem, ext) = split_name(path)?;
    let marker = TEMP_MARKER.to_ascii_lowercase();
    let lower = stem.to_ascii_lowercase();
    if lower.ends_with(&marker) && stem.len() > marker.len() {
        let base = &stem[..stem.len() - marker.len()];
        Some(path.with_file_name(format!("{}{}", base, ext)))
    } else {
        None
    }
}

/// Recover the original path for a quarantined file
/// (`<base>.BAD_CONVERT[_n].<ext>` → `<base>.<ext>`).
pub fn original_for_quarantined(path: &Path) -> Option<PathBuf> {
    original_for_marked(path, QUARANTINE_MARKER)
}

/// Recover the original path for a `<base><marker>[_n]<ext>` name.
fn original_for_marked(path: &Path, marker: &str) -> Option<PathBuf> {
    let (stem, ext) = split_name(path)?;
    let lower = stem.to_ascii_lowercase();
    let marker_lower = marker.to_ascii_lowercase();

    let pos = lower.rfind(&marker_lower)?;
    if pos == 0 {
        return None;
    }
    // Anything after the marker must be an ordinal suffix like "_12".
    let tail = &stem[pos + marker.len()..];
    if !tail.is_empty() {
        let mut chars = tail.chars();
        if chars.next() != Some('_') {
            return None;
        }
        let digits = chars.as_str();
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
    }
    let base = &stem[..pos];
    Some(path.with_file_name(format!("{}{}", base, ext)))
}

/// Replace the original with a validated temp file.
///
/// Delete-then-rename; true atomic replace is not portable, so both steps
/// are logged individually to make a crash between them diagnosable. The
/// original is only ever deleted in the same operation that installs its
/// replacement.
pub fn promote(temp: &Path, original: &Path) -> ReplaceResult<()> {
    tracing::info!(
        "Removing original before promotion: {}",
        original.display()
    );
    fs::remove_file(original).map_err(|e| ReplaceError::io("remove original", e))?;

    tracing::info!(
        "Promoting {} -> {}",
        temp.display(),
        original.display()
    );
    fs::rename(temp, original).map_err(|e| ReplaceError::io("rename temp to original", e))?;
    Ok(())
}

/// Preserve a failed output under a quarantine name. The original is never
/// touched.
pub fn quarantine(temp: &Path, original: &Path) -> ReplaceResult<PathBuf> {
    let dest = next_free_name(original, QUARANTINE_MARKER)?;
    fs::rename(temp, &dest).map_err(|e| ReplaceError::io("rename temp to quarantine", e))?;
    tracing::info!(
        "Quarantined {} -> {}",
        temp.display(),
        dest.display()
    );
    Ok(dest)
}

/// Rename an original aside before a reverify promotion.
pub fn back_up_original(original: &Path) -> ReplaceResult<PathBuf> {
    let dest = next_free_name(original, BACKUP_MARKER)?;
    fs::rename(original, &dest).map_err(|e| ReplaceError::io("rename original to backup", e))?;
    tracing::info!(
        "Backed up original {} -> {}",
        original.display(),
        dest.display()
    );
    Ok(dest)
}
