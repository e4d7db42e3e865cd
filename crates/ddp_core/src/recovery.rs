//! Recovery flows for quarantined and orphaned artifacts.
//!
//! Reverify gives a previously quarantined output a second chance under a
//! caller-supplied size tolerance; cleanup resolves temp files left behind
//! by an interrupted run. Neither flow re-encodes anything, and no files
//! move unless every check passes.

use std::fs;
use std::path::{Path, PathBuf};

use crate::models::AudioFormat;
use crate::probe::Prober;
use crate::replace::{self, FileState, ReplaceError, ReplaceResult};
use crate::scan;
use crate::validate::size_within_tolerance;

/// Why a quarantined file was not promoted.
#[derive(Debug, Clone, PartialEq)]
pub enum ReverifySkip {
    /// The matching original no longer exists.
    OriginalMissing(PathBuf),
    /// Either file could not be stat'ed or probed.
    Unreadable(String),
    /// Audio track counts differ between original and quarantined file.
    TrackCountMismatch { original: usize, quarantined: usize },
    /// The quarantined file has no English E-AC-3 track.
    NoEnglishEac3Track,
    /// The quarantined file's size falls outside the requested tolerance.
    SizeOutOfTolerance {
        original_bytes: u64,
        quarantined_bytes: u64,
        tolerance: f64,
    },
}

impl std::fmt::Display for ReverifySkip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReverifySkip::OriginalMissing(path) => {
                write!(f, "original missing: {}", path.display())
            }
            ReverifySkip::Unreadable(message) => write!(f, "unreadable: {}", message),
            ReverifySkip::TrackCountMismatch {
                original,
                quarantined,
            } => write!(
                f,
                "track count mismatch: original={} quarantined={}",
                original, quarantined
            ),
            ReverifySkip::NoEnglishEac3Track => {
                write!(f, "no English E-AC-3 track present")
            }
            ReverifySkip::SizeOutOfTolerance {
                original_bytes,
                quarantined_bytes,
                tolerance,
            } => write!(
                f,
                "size variance exceeded: original={} quarantined={} allowed=+/-{:.1}%",
                original_bytes,
                quarantined_bytes,
                tolerance * 100.0
            ),
        }
    }
}

/// Outcome of reverifying one quarantined file.
#[derive(Debug, Clone, PartialEq)]
pub enum ReverifyOutcome {
    /// The quarantined file replaced the original; the original was
    /// renamed aside first.
    Promoted { backup: PathBuf },
    /// A check failed; no files moved.
    Skipped(ReverifySkip),
}

/// Aggregate result of a reverify pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReverifyReport {
    /// Quarantined files examined.
    pub examined: usize,
    /// Files promoted over their originals.
    pub promoted: usize,
    /// Files left in place.
    pub skipped: usize,
}

/// Re-check a single quarantined file under the given tolerance.
///
/// Checks: original exists, both files probe cleanly, track counts match,
/// the quarantined file carries at least one English E-AC-3 track, and its
/// size is within `tolerance` of the original. Only when every check
/// passes is the original renamed to a backup name and the quarantined
/// file promoted into its place.
pub fn reverify_file(
    prober: &dyn Prober,
    quarantined: &Path,
    tolerance: f64,
) -> ReplaceResult<ReverifyOutcome> {
    let original = replace::original_for_quarantined(quarantined)
        .ok_or_else(|| ReplaceError::InvalidPath(quarantined.to_path_buf()))?;

    if !original.exists() {
        return Ok(ReverifyOutcome::Skipped(ReverifySkip::OriginalMissing(
            original,
        )));
    }

    let (original_bytes, quarantined_bytes) =
        match (fs::metadata(&original), fs::metadata(quarantined)) {
            (Ok(o), Ok(q)) => (o.len(), q.len()),
            (Err(e), _) | (_, Err(e)) => {
                return Ok(ReverifyOutcome::Skipped(ReverifySkip::Unreadable(
                    e.to_string(),
                )));
            }
        };

    let quarantined_inventory = match prober.probe(quarantined) {
        Ok(inventory) => inventory,
        Err(e) => {
            return Ok(ReverifyOutcome::Skipped(ReverifySkip::Unreadable(
                e.to_string(),
            )));
        }
    };
    let original_inventory = match prober.probe(&original) {
        Ok(inventory) => inventory,
        Err(e) => {
            return Ok(ReverifyOutcome::Skipped(ReverifySkip::Unreadable(
                e.to_string(),
            )));
        }
    };

    if quarantined_inventory.len() != original_inventory.len() {
        return Ok(ReverifyOutcome::Skipped(ReverifySkip::TrackCountMismatch {
            original: original_inventory.len(),
            quarantined: quarantined_inventory.len(),
        }));
    }

    let has_english_eac3 = quarantined_inventory
        .iter()
        .any(|t| t.format == AudioFormat::Eac3 && t.is_english());
    if !has_english_eac3 {
        return Ok(ReverifyOutcome::Skipped(ReverifySkip::NoEnglishEac3Track));
    }

    if !size_within_tolerance(original_bytes, quarantined_bytes, tolerance) {
        return Ok(ReverifyOutcome::Skipped(ReverifySkip::SizeOutOfTolerance {
            original_bytes,
            quarantined_bytes,
            tolerance,
        }));
    }

    let backup = replace::back_up_original(&original)?;
    fs::rename(quarantined, &original).map_err(|e| ReplaceError::Io {
        operation: "rename quarantined to original".to_string(),
        source: e,
    })?;
    tracing::info!(
        "Reverify promoted {} -> {} (backup: {})",
        quarantined.display(),
        original.display(),
        backup.display()
    );

    Ok(ReverifyOutcome::Promoted { backup })
}

/// Reverify every quarantined file under `root`.
///
/// Idempotent: once a quarantined file has been promoted it no longer
/// matches the quarantine pattern, so a second run finds nothing to do.
pub fn reverify_dir(prober: &dyn Prober, root: &Path, tolerance: f64) -> ReverifyReport {
    let mut report = ReverifyReport::default();
    for path in scan::find_videos(root, "*") {
        if replace::classify(&path) != FileState::Quarantined {
            continue;
        }
        report.examined += 1;
        tracing::info!("Reverifying quarantined file: {}", path.display());
        match reverify_file(prober, &path, tolerance) {
            Ok(ReverifyOutcome::Promoted { .. }) => report.promoted += 1,
            Ok(ReverifyOutcome::Skipped(reason)) => {
                tracing::warn!("Reverify skipped {}: {}", path.display(), reason);
                report.skipped += 1;
            }
            Err(e) => {
                tracing::error!("Reverify failed for {}: {}", path.display(), e);
                report.skipped += 1;
            }
        }
    }
    report
}

/// How an orphaned temp file was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum CleanupAction {
    /// The original was absent; the temp file took its name.
    Promoted(PathBuf),
    /// The original was present; the temp file was quarantined.
    Quarantined(PathBuf),
}

/// Aggregate result of a cleanup pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanupReport {
    /// Temp files found.
    pub found: usize,
    /// Temp files promoted to their original names.
    pub promoted: usize,
    /// Temp files moved to quarantine names.
    pub quarantined: usize,
    /// Temp files that could not be renamed.
    pub failed: usize,
}

/// Resolve a single orphaned temp file.
///
/// If the matching original is absent, the temp file is the only candidate
/// and is promoted directly (no re-validation). If the original is
/// present, the temp file is quarantined; it is never silently deleted.
pub fn cleanup_file(temp: &Path) -> ReplaceResult<CleanupAction> {
    let original = replace::original_for_temp(temp)
        .ok_or_else(|| ReplaceError::InvalidPath(temp.to_path_buf()))?;

    if original.exists() {
        let dest = replace::quarantine(temp, &original)?;
        Ok(CleanupAction::Quarantined(dest))
    } else {
        fs::rename(temp, &original).map_err(|e| ReplaceError::Io {
            operation: "promote orphaned temp".to_string(),
            source: e,
        })?;
        tracing::info!(
            "Promoted orphaned temp {} -> {}",
            temp.display(),
            original.display()
        );
        Ok(CleanupAction::Promoted(original))
    }
}

/// Resolve every orphaned temp file under `root`.
///
/// Idempotent: resolved files no longer match the temp pattern, so a
/// second run with no new temps is a no-op.
pub fn cleanup_dir(root: &Path) -> CleanupReport {
    let mut report = CleanupReport::default();
    for path in scan::find_videos(root, "*") {
        if replace::classify(&path) != FileState::Pending {
            continue;
        }
        report.found += 1;
        match cleanup_file(&path) {
            Ok(CleanupAction::Promoted(dest)) => {
                tracing::info!("Cleanup promoted: {}", dest.display());
                report.promoted += 1;
            }
            Ok(CleanupAction::Quarantined(dest)) => {
                tracing::info!("Cleanup quarantined: {}", dest.display());
                report.quarantined += 1;
            }
            Err(e) => {
                tracing::error!("Cleanup failed for {}: {}", path.display(), e);
                report.failed += 1;
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AudioTrack, TrackInventory};
    use crate::probe::ProbeResult;
    use std::collections::HashMap;
    use tempfile::tempdir;

    /// Prober returning a canned inventory per path.
    struct MapProber {
        inventories: HashMap<PathBuf, TrackInventory>,
    }

    impl MapProber {
        fn new() -> Self {
            Self {
                inventories: HashMap::new(),
            }
        }

        fn with(mut self, path: &Path, inventory: TrackInventory) -> Self {
            self.inventories.insert(path.to_path_buf(), inventory);
            self
        }
    }

    impl Prober for MapProber {
        fn probe(&self, path: &Path) -> ProbeResult<TrackInventory> {
            self.inventories
                .get(path)
                .cloned()
                .ok_or_else(|| crate::probe::ProbeError::FileNotFound(path.to_path_buf()))
        }
    }

    fn two_track_inventory(first: AudioFormat) -> TrackInventory {
        TrackInventory::from_tracks(vec![
            AudioTrack::new(first, "x").with_language("en"),
            AudioTrack::new(AudioFormat::Other, "truehd").with_language("ja"),
        ])
    }

    #[test]
    fn reverify_promotes_valid_quarantined_file() {
        let dir = tempdir().unwrap();
        let original = dir.path().join("movie.mkv");
        let quarantined = dir.path().join("movie.BAD_CONVERT.mkv");
        std::fs::write(&original, vec![0u8; 1000]).unwrap();
        std::fs::write(&quarantined, vec![0u8; 920]).unwrap();

        let prober = MapProber::new()
            .with(&original, two_track_inventory(AudioFormat::Dts))
            .with(&quarantined, two_track_inventory(AudioFormat::Eac3));

        let outcome = reverify_file(&prober, &quarantined, 0.10).unwrap();
        let backup = dir.path().join("movie.ORIG_BACKUP.mkv");
        assert_eq!(
            outcome,
            ReverifyOutcome::Promoted {
                backup: backup.clone()
            }
        );
        // Quarantined content now owns the original name; old original is
        // the backup.
        assert_eq!(std::fs::metadata(&original).unwrap().len(), 920);
        assert_eq!(std::fs::metadata(&backup).unwrap().len(), 1000);
        assert!(!quarantined.exists());
    }

    #[test]
    fn reverify_skips_when_original_missing() {
        let dir = tempdir().unwrap();
        let quarantined = dir.path().join("movie.BAD_CONVERT.mkv");
        std::fs::write(&quarantined, b"bad").unwrap();

        let outcome = reverify_file(&MapProber::new(), &quarantined, 0.10).unwrap();
        assert!(matches!(
            outcome,
            ReverifyOutcome::Skipped(ReverifySkip::OriginalMissing(_))
        ));
        assert!(quarantined.exists());
    }

    #[test]
    fn reverify_skips_without_english_eac3() {
        let dir = tempdir().unwrap();
        let original = dir.path().join("movie.mkv");
        let quarantined = dir.path().join("movie.BAD_CONVERT.mkv");
        std::fs::write(&original, vec![0u8; 1000]).unwrap();
        std::fs::write(&quarantined, vec![0u8; 1000]).unwrap();

        let prober = MapProber::new()
            .with(&original, two_track_inventory(AudioFormat::Dts))
            .with(&quarantined, two_track_inventory(AudioFormat::Dts));

        let outcome = reverify_file(&prober, &quarantined, 0.10).unwrap();
        assert_eq!(
            outcome,
            ReverifyOutcome::Skipped(ReverifySkip::NoEnglishEac3Track)
        );
        // No files moved.
        assert!(original.exists());
        assert!(quarantined.exists());
    }

    #[test]
    fn reverify_respects_caller_tolerance() {
        let dir = tempdir().unwrap();
        let original = dir.path().join("movie.mkv");
        let quarantined = dir.path().join("movie.BAD_CONVERT.mkv");
        std::fs::write(&original, vec![0u8; 1000]).unwrap();
        std::fs::write(&quarantined, vec![0u8; 700]).unwrap();

        let prober = MapProber::new()
            .with(&original, two_track_inventory(AudioFormat::Dts))
            .with(&quarantined, two_track_inventory(AudioFormat::Eac3));

        // 10% rejects a 30% shrink...
        let outcome = reverify_file(&prober, &quarantined, 0.10).unwrap();
        assert!(matches!(
            outcome,
            ReverifyOutcome::Skipped(ReverifySkip::SizeOutOfTolerance { .. })
        ));

        // ...but 40% accepts it.
        let outcome = reverify_file(&prober, &quarantined, 0.40).unwrap();
        assert!(matches!(outcome, ReverifyOutcome::Promoted { .. }));
    }

    #[test]
    fn reverify_dir_is_idempotent_after_promotion() {
        let dir = tempdir().unwrap();
        let original = dir.path().join("movie.mkv");
        let quarantined = dir.path().join("movie.BAD_CONVERT.mkv");
        std::fs::write(&original, vec![0u8; 1000]).unwrap();
        std::fs::write(&quarantined, vec![0u8; 950]).unwrap();

        let prober = MapProber::new()
            .with(&original, two_track_inventory(AudioFormat::Dts))
            .with(&quarantined, two_track_inventory(AudioFormat::Eac3));

        let first = reverify_dir(&prober, dir.path(), 0.10);
        assert_eq!(first.examined, 1);
        assert_eq!(first.promoted, 1);

        // The quarantined file was consumed; the second run reports
        // nothing to do rather than an error.
        let second = reverify_dir(&prober, dir.path(), 0.10);
        assert_eq!(second.examined, 0);
        assert_eq!(second.promoted, 0);
    }

    #[test]
    fn cleanup_promotes_when_original_absent() {
        let dir = tempdir().unwrap();
        let temp = dir.path().join("movie.temp.mkv");
        std::fs::write(&temp, b"only candidate").unwrap();

        let action = cleanup_file(&temp).unwrap();
        assert_eq!(
            action,
            CleanupAction::Promoted(dir.path().join("movie.mkv"))
        );
        assert!(!temp.exists());
        assert!(dir.path().join("movie.mkv").exists());
    }

    #[test]
    fn cleanup_quarantines_when_original_present() {
        let dir = tempdir().unwrap();
        let original = dir.path().join("movie.mkv");
        let temp = dir.path().join("movie.temp.mkv");
        std::fs::write(&original, b"orig").unwrap();
        std::fs::write(&temp, b"stray").unwrap();

        let action = cleanup_file(&temp).unwrap();
        assert_eq!(
            action,
            CleanupAction::Quarantined(dir.path().join("movie.BAD_CONVERT.mkv"))
        );
        // Never silently deleted, original untouched.
        assert_eq!(std::fs::read(&original).unwrap(), b"orig");
        assert!(dir.path().join("movie.BAD_CONVERT.mkv").exists());
    }

    #[test]
    fn cleanup_dir_is_idempotent() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.temp.mkv"), b"x").unwrap();
        std::fs::write(dir.path().join("b.mkv"), b"orig").unwrap();
        std::fs::write(dir.path().join("b.temp.mkv"), b"stray").unwrap();

        let first = cleanup_dir(dir.path());
        assert_eq!(first.found, 2);
        assert_eq!(first.promoted, 1);
        assert_eq!(first.quarantined, 1);

        let second = cleanup_dir(dir.path());
        assert_eq!(second, CleanupReport::default());
    }
}
