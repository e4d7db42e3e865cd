//! Run drivers: the per-file conversion pipeline and the scan/list/
//! reverify/cleanup entry points.
//!
//! Processing is fully sequential: one file is probed, qualified,
//! encoded, and validated to completion before the next is considered.
//! Fatal errors abort before any file is touched; per-file errors are
//! caught at the file boundary so one bad file never aborts the batch.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use thiserror::Error;

use crate::batch::BatchScriptWriter;
use crate::config::Settings;
use crate::models::AudioFormat;
use crate::probe::{FfprobeProber, Prober};
use crate::qualify::{self, SkipReason};
use crate::recovery::{self, CleanupReport, ReverifyReport};
use crate::replace::{self, FileState};
use crate::report::{Candidate, ListMatch, RunSummary};
use crate::scan;
use crate::transcode::{self, EncodeError, FfmpegTranscoder, Transcoder};
use crate::validate::{self, ValidationOutcome};

/// Fatal run errors. Each aborts the whole run before or between files.
#[derive(Error, Debug)]
pub enum RunError {
    /// A required external tool could not be resolved.
    #[error("Required tool not available: {tool}")]
    EnvironmentMissing { tool: String },

    /// The scan root does not exist or is not a directory.
    #[error("Directory does not exist: {0}")]
    DirectoryInvalid(PathBuf),

    /// A malformed argument (e.g. a non-positive reverify tolerance).
    #[error("Invalid argument: {0}")]
    ArgumentInvalid(String),

    /// The batch script file could not be initialized.
    #[error("Cannot initialize batch file {path}: {source}")]
    BatchInitFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Parse a percent string like "20" or "20%" into a fraction (0.20).
pub fn parse_percent(value: &str) -> Result<f64, RunError> {
    let trimmed = value.trim().trim_end_matches('%');
    let percent: f64 = trimmed
        .parse()
        .map_err(|_| RunError::ArgumentInvalid(format!("not a number: '{}'", value)))?;
    if percent <= 0.0 {
        return Err(RunError::ArgumentInvalid(
            "percent must be > 0".to_string(),
        ));
    }
    Ok(percent / 100.0)
}

/// Terminal outcome for one processed file.
#[derive(Debug)]
pub enum FileOutcome {
    /// Live conversion succeeded and the original was replaced.
    Converted { new_size: u64 },
    /// Dry-run: the file qualifies and would be converted.
    WouldConvert,
    /// The file did not qualify.
    Skipped(SkipReason),
    /// The probe failed; the file was left untouched.
    ProbeFailed(String),
    /// The encoder failed with no trustworthy output; the file was left
    /// untouched.
    EncodeFailed(String),
    /// Validation rejected the output; it was preserved under a
    /// quarantine name and the original left untouched.
    Quarantined { reason: String, quarantined: PathBuf },
    /// A rename step failed; reported distinctly, nothing overwritten.
    ReplaceFailed(String),
}

impl std::fmt::Display for FileOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileOutcome::Converted { new_size } => {
                write!(f, "converted (new size {} bytes)", new_size)
            }
            FileOutcome::WouldConvert => write!(f, "would convert"),
            FileOutcome::Skipped(reason) => write!(f, "skipped: {}", reason),
            FileOutcome::ProbeFailed(message) => write!(f, "probe failed: {}", message),
            FileOutcome::EncodeFailed(message) => write!(f, "encode failed: {}", message),
            FileOutcome::Quarantined { reason, quarantined } => write!(
                f,
                "quarantined as {}: {}",
                quarantined.display(),
                reason
            ),
            FileOutcome::ReplaceFailed(message) => write!(f, "replace failed: {}", message),
        }
    }
}

/// Options for a conversion scan.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Root directory to scan.
    pub directory: PathBuf,
    /// Wildcard basename filter.
    pub pattern: String,
    /// Decide and report without touching files.
    pub dry_run: bool,
    /// Write encoder commands to this script (implies dry run).
    pub batch_script: Option<PathBuf>,
}

impl RunOptions {
    /// Whether this run modifies files.
    pub fn is_dry(&self) -> bool {
        self.dry_run || self.batch_script.is_some()
    }
}

/// Aggregate result of a conversion scan.
#[derive(Debug, Default)]
pub struct ConvertReport {
    /// Files examined (artifact names excluded).
    pub examined: usize,
    /// Files converted and promoted.
    pub converted: usize,
    /// Dry-run candidates.
    pub would_convert: usize,
    /// Files skipped by qualification.
    pub skipped: usize,
    /// Outputs quarantined after failed validation.
    pub quarantined: usize,
    /// Probe/encode/rename failures.
    pub failed: usize,
    /// Candidate accumulator for the end-of-run summary.
    pub summary: RunSummary,
    /// Path of the batch script, when one was written.
    pub batch_script: Option<PathBuf>,
}

/// Sequential run driver owning the external tool collaborators.
pub struct Runner {
    settings: Settings,
    prober: Box<dyn Prober>,
    transcoder: Box<dyn Transcoder>,
}

impl Runner {
    /// Create a runner backed by the configured ffprobe/ffmpeg binaries.
    pub fn new(settings: Settings) -> Self {
        let prober = FfprobeProber::new(&settings.tools.ffprobe);
        let transcoder = FfmpegTranscoder::new(&settings.tools.ffmpeg).with_timeout(
            settings
                .conversion
                .encode_timeout_secs
                .map(Duration::from_secs),
        );
        Self {
            settings,
            prober: Box::new(prober),
            transcoder: Box::new(transcoder),
        }
    }

    /// Create a runner with caller-supplied collaborators.
    pub fn with_tools(
        settings: Settings,
        prober: Box<dyn Prober>,
        transcoder: Box<dyn Transcoder>,
    ) -> Self {
        Self {
            settings,
            prober,
            transcoder,
        }
    }

    /// Verify the external tools can be invoked. Called before any file
    /// is touched; a missing tool is fatal.
    pub fn check_environment(&self) -> Result<(), RunError> {
        for tool in [&self.settings.tools.ffprobe, &self.settings.tools.ffmpeg] {
            let ok = Command::new(tool)
                .arg("-version")
                .output()
                .map(|o| o.status.success())
                .unwrap_or(false);
            if !ok {
                return Err(RunError::EnvironmentMissing { tool: tool.clone() });
            }
        }
        Ok(())
    }

    /// Scan a directory and convert (or, in dry mode, report) every
    /// qualifying file.
    pub fn convert(&self, options: &RunOptions) -> Result<ConvertReport, RunError> {
        ensure_directory(&options.directory)?;

        let dry = options.is_dry();
        let mut batch = match &options.batch_script {
            Some(path) => Some(
                BatchScriptWriter::create(path, &self.settings.tools.ffmpeg).map_err(|e| {
                    RunError::BatchInitFailed {
                        path: path.clone(),
                        source: e,
                    }
                })?,
            ),
            None => None,
        };

        let mut report = ConvertReport::default();
        for path in scan::find_videos(&options.directory, &options.pattern) {
            if replace::classify(&path) != FileState::Original {
                tracing::debug!("Skipping replacement artifact: {}", path.display());
                continue;
            }
            report.examined += 1;
            tracing::info!("Evaluating file: {}", path.display());

            let outcome = self.process_file(&path, dry, &mut batch, &mut report.summary);
            tracing::info!("{}: {}", path.display(), outcome);
            match outcome {
                FileOutcome::Converted { .. } => report.converted += 1,
                FileOutcome::WouldConvert => report.would_convert += 1,
                FileOutcome::Skipped(_) => report.skipped += 1,
                FileOutcome::Quarantined { .. } => report.quarantined += 1,
                FileOutcome::ProbeFailed(_)
                | FileOutcome::EncodeFailed(_)
                | FileOutcome::ReplaceFailed(_) => report.failed += 1,
            }
        }

        if let Some(writer) = batch {
            match writer.finish() {
                Ok(path) => report.batch_script = Some(path),
                Err(e) => tracing::error!("Failed to finalize batch script: {}", e),
            }
        }
        Ok(report)
    }

    /// Run one file through probe → qualify → encode → validate →
    /// promote/quarantine.
    fn process_file(
        &self,
        path: &Path,
        dry: bool,
        batch: &mut Option<BatchScriptWriter>,
        summary: &mut RunSummary,
    ) -> FileOutcome {
        let inventory = match self.prober.probe(path) {
            Ok(inventory) => inventory,
            Err(e) => return FileOutcome::ProbeFailed(e.to_string()),
        };
        for line in inventory.describe() {
            tracing::debug!("    {}", line);
        }

        let qualification = qualify::qualify(&inventory);
        let request = match transcode::build_request(path, &qualification) {
            Ok(request) => request,
            Err(transcode::RequestError::NotATarget(reason)) => {
                return FileOutcome::Skipped(reason);
            }
            Err(transcode::RequestError::InvalidSource(e)) => {
                return FileOutcome::ReplaceFailed(e.to_string());
            }
        };

        let source_size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        summary.record(Candidate {
            path: path.to_path_buf(),
            track_index: request.target_audio_index,
            lossless: request.lossless_source,
            size_bytes: source_size,
        });

        if let Some(writer) = batch.as_mut() {
            if let Err(e) = writer.append(&request) {
                tracing::error!("Failed writing batch entry for {}: {}", path.display(), e);
            }
        }
        if dry {
            return FileOutcome::WouldConvert;
        }

        if let Err(e) = self.transcoder.execute(&request) {
            return self.handle_encode_error(&request, e);
        }

        let tolerance = self.settings.conversion.size_tolerance;
        match validate::validate_output(self.prober.as_ref(), &request, &inventory, tolerance) {
            ValidationOutcome::Passed => {
                match replace::promote(&request.temp_output, &request.source) {
                    Ok(()) => {
                        let new_size = fs::metadata(&request.source).map(|m| m.len()).unwrap_or(0);
                        FileOutcome::Converted { new_size }
                    }
                    Err(e) => FileOutcome::ReplaceFailed(e.to_string()),
                }
            }
            ValidationOutcome::Failed(failure) => {
                tracing::warn!(
                    "Validation failed, original kept: {} ({})",
                    path.display(),
                    failure
                );
                match replace::quarantine(&request.temp_output, &request.source) {
                    Ok(quarantined) => FileOutcome::Quarantined {
                        reason: failure.to_string(),
                        quarantined,
                    },
                    Err(e) => FileOutcome::ReplaceFailed(e.to_string()),
                }
            }
        }
    }

    /// Map an encoder failure to a terminal outcome.
    ///
    /// A timed-out encode may have produced partial output, which takes
    /// the quarantine path; any other failure leaves no trustworthy
    /// output, so a leftover temp file is removed and the file skipped.
    fn handle_encode_error(
        &self,
        request: &transcode::TranscodeRequest,
        error: EncodeError,
    ) -> FileOutcome {
        match error {
            EncodeError::TimedOut { .. } if request.temp_output.exists() => {
                match replace::quarantine(&request.temp_output, &request.source) {
                    Ok(quarantined) => FileOutcome::Quarantined {
                        reason: error.to_string(),
                        quarantined,
                    },
                    Err(e) => FileOutcome::ReplaceFailed(e.to_string()),
                }
            }
            _ => {
                if request.temp_output.exists() {
                    if let Err(e) = fs::remove_file(&request.temp_output) {
                        tracing::warn!(
                            "Failed to remove temp output {}: {}",
                            request.temp_output.display(),
                            e
                        );
                    }
                }
                FileOutcome::EncodeFailed(error.to_string())
            }
        }
    }

    /// Discovery listing: files with ≥1 English DTS track and no
    /// AC-3/E-AC-3 tracks. AAC is ignored here (noted per match) so the
    /// operator sees the broader candidate set.
    pub fn list_unconverted(
        &self,
        directory: &Path,
        pattern: &str,
    ) -> Result<(Vec<ListMatch>, usize), RunError> {
        ensure_directory(directory)?;

        let mut matches = Vec::new();
        let mut examined = 0usize;
        for path in scan::find_videos(directory, pattern) {
            if replace::classify(&path) != FileState::Original {
                continue;
            }
            examined += 1;
            let inventory = match self.prober.probe(&path) {
                Ok(inventory) => inventory,
                Err(e) => {
                    tracing::warn!("Probe failed for {}: {}", path.display(), e);
                    continue;
                }
            };
            if inventory.is_empty() {
                continue;
            }
            let has_english_dts = inventory
                .iter()
                .any(|t| t.format == AudioFormat::Dts && t.is_english());
            if !has_english_dts {
                continue;
            }
            if inventory.has_format(AudioFormat::Ac3) || inventory.has_format(AudioFormat::Eac3) {
                continue;
            }
            matches.push(ListMatch {
                path,
                has_aac: inventory.has_format(AudioFormat::Aac),
            });
        }
        Ok((matches, examined))
    }

    /// Reverify previously quarantined outputs under a caller-supplied
    /// tolerance (must be > 0).
    pub fn reverify(&self, directory: &Path, tolerance: f64) -> Result<ReverifyReport, RunError> {
        if tolerance <= 0.0 {
            return Err(RunError::ArgumentInvalid(
                "reverify tolerance must be > 0".to_string(),
            ));
        }
        ensure_directory(directory)?;
        Ok(recovery::reverify_dir(
            self.prober.as_ref(),
            directory,
            tolerance,
        ))
    }

    /// Resolve orphaned temp files left by interrupted runs.
    pub fn clean_orphan_temps(&self, directory: &Path) -> Result<CleanupReport, RunError> {
        ensure_directory(directory)?;
        Ok(recovery::cleanup_dir(directory))
    }
}

fn ensure_directory(path: &Path) -> Result<(), RunError> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(RunError::DirectoryInvalid(path.to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AudioTrack, TrackInventory};
    use crate::probe::{ProbeError, ProbeResult};
    use crate::transcode::TranscodeRequest;
    use std::collections::HashMap;
    use tempfile::tempdir;

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
                .ok_or_else(|| ProbeError::FileNotFound(path.to_path_buf()))
        }
    }

    /// Transcoder writing a fixed-size placeholder to the temp output.
    struct StubTranscoder {
        output_bytes: usize,
    }

    impl Transcoder for StubTranscoder {
        fn execute(&self, request: &TranscodeRequest) -> Result<(), EncodeError> {
            std::fs::write(&request.temp_output, vec![0u8; self.output_bytes])?;
            Ok(())
        }
    }

    struct FailingTranscoder;

    impl Transcoder for FailingTranscoder {
        fn execute(&self, _request: &TranscodeRequest) -> Result<(), EncodeError> {
            Err(EncodeError::CommandFailed {
                tool: "ffmpeg".to_string(),
                exit_code: 1,
                stderr_tail: "boom".to_string(),
            })
        }
    }

    fn english_dts_inventory() -> TrackInventory {
        TrackInventory::from_tracks(vec![AudioTrack::new(AudioFormat::Dts, "dts")
            .with_language("en")])
    }

    fn english_eac3_inventory() -> TrackInventory {
        TrackInventory::from_tracks(vec![AudioTrack::new(AudioFormat::Eac3, "eac3")
            .with_language("en")])
    }

    fn options(dir: &Path) -> RunOptions {
        RunOptions {
            directory: dir.to_path_buf(),
            pattern: "*".to_string(),
            dry_run: false,
            batch_script: None,
        }
    }

    #[test]
    fn parse_percent_accepts_plain_and_suffixed() {
        assert_eq!(parse_percent("20").unwrap(), 0.20);
        assert_eq!(parse_percent("20%").unwrap(), 0.20);
        assert_eq!(parse_percent(" 7.5 ").unwrap(), 0.075);
    }

    #[test]
    fn parse_percent_rejects_garbage_and_non_positive() {
        assert!(matches!(
            parse_percent("abc"),
            Err(RunError::ArgumentInvalid(_))
        ));
        assert!(matches!(
            parse_percent("0"),
            Err(RunError::ArgumentInvalid(_))
        ));
        assert!(matches!(
            parse_percent("-5"),
            Err(RunError::ArgumentInvalid(_))
        ));
    }

    #[test]
    fn invalid_directory_is_fatal() {
        let runner = Runner::with_tools(
            Settings::default(),
            Box::new(MapProber::new()),
            Box::new(StubTranscoder { output_bytes: 0 }),
        );
        let err = runner
            .convert(&options(Path::new("/nonexistent/library")))
            .unwrap_err();
        assert!(matches!(err, RunError::DirectoryInvalid(_)));
    }

    #[test]
    fn dry_run_reports_candidates_without_touching_files() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("movie.mkv");
        std::fs::write(&source, vec![0u8; 1000]).unwrap();

        let prober = MapProber::new().with(&source, english_dts_inventory());
        let runner = Runner::with_tools(
            Settings::default(),
            Box::new(prober),
            Box::new(FailingTranscoder),
        );

        let mut opts = options(dir.path());
        opts.dry_run = true;
        let report = runner.convert(&opts).unwrap();

        assert_eq!(report.examined, 1);
        assert_eq!(report.would_convert, 1);
        assert_eq!(report.converted, 0);
        assert_eq!(report.summary.len(), 1);
        // Untouched: no temp, original intact.
        assert!(!dir.path().join("movie.temp.mkv").exists());
        assert_eq!(std::fs::metadata(&source).unwrap().len(), 1000);
    }

    #[test]
    fn live_conversion_promotes_validated_output() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("movie.mkv");
        let temp = dir.path().join("movie.temp.mkv");
        std::fs::write(&source, vec![0u8; 1000]).unwrap();

        let prober = MapProber::new()
            .with(&source, english_dts_inventory())
            .with(&temp, english_eac3_inventory());
        let runner = Runner::with_tools(
            Settings::default(),
            Box::new(prober),
            Box::new(StubTranscoder { output_bytes: 950 }),
        );

        let report = runner.convert(&options(dir.path())).unwrap();

        assert_eq!(report.converted, 1);
        assert_eq!(report.quarantined, 0);
        assert_eq!(std::fs::metadata(&source).unwrap().len(), 950);
        assert!(!temp.exists());
    }

    #[test]
    fn out_of_tolerance_output_is_quarantined() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("movie.mkv");
        let temp = dir.path().join("movie.temp.mkv");
        std::fs::write(&source, vec![0u8; 1000]).unwrap();

        let prober = MapProber::new()
            .with(&source, english_dts_inventory())
            .with(&temp, english_eac3_inventory());
        let runner = Runner::with_tools(
            Settings::default(),
            Box::new(prober),
            // 50% of original size: outside the ±10% default.
            Box::new(StubTranscoder { output_bytes: 500 }),
        );

        let report = runner.convert(&options(dir.path())).unwrap();

        assert_eq!(report.converted, 0);
        assert_eq!(report.quarantined, 1);
        // Original untouched, bad output preserved.
        assert_eq!(std::fs::metadata(&source).unwrap().len(), 1000);
        let quarantined = dir.path().join("movie.BAD_CONVERT.mkv");
        assert_eq!(std::fs::metadata(&quarantined).unwrap().len(), 500);
        assert!(!temp.exists());
    }

    #[test]
    fn encode_failure_skips_file_and_keeps_original() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("movie.mkv");
        std::fs::write(&source, vec![0u8; 1000]).unwrap();

        let prober = MapProber::new().with(&source, english_dts_inventory());
        let runner = Runner::with_tools(
            Settings::default(),
            Box::new(prober),
            Box::new(FailingTranscoder),
        );

        let report = runner.convert(&options(dir.path())).unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.quarantined, 0);
        assert_eq!(std::fs::metadata(&source).unwrap().len(), 1000);
    }

    #[test]
    fn replacement_artifacts_are_not_processed() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("movie.BAD_CONVERT.mkv"), b"bad").unwrap();
        std::fs::write(dir.path().join("movie.ORIG_BACKUP.mkv"), b"backup").unwrap();

        let runner = Runner::with_tools(
            Settings::default(),
            Box::new(MapProber::new()),
            Box::new(FailingTranscoder),
        );
        let report = runner.convert(&options(dir.path())).unwrap();
        assert_eq!(report.examined, 0);
    }

    #[test]
    fn batch_mode_implies_dry_run_and_writes_script() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("movie.mkv");
        std::fs::write(&source, vec![0u8; 1000]).unwrap();
        let script = dir.path().join("out").join("convert.sh");

        let prober = MapProber::new().with(&source, english_dts_inventory());
        let runner = Runner::with_tools(
            Settings::default(),
            Box::new(prober),
            Box::new(FailingTranscoder),
        );

        let mut opts = options(dir.path());
        opts.batch_script = Some(script.clone());
        let report = runner.convert(&opts).unwrap();

        assert_eq!(report.would_convert, 1);
        assert_eq!(report.batch_script.as_deref(), Some(script.as_path()));
        let content = std::fs::read_to_string(&script).unwrap();
        assert!(content.contains("movie.mkv"));
        assert!(content.contains("eac3"));
        // Source untouched.
        assert_eq!(std::fs::metadata(&source).unwrap().len(), 1000);
    }

    #[test]
    fn listing_finds_english_dts_without_dolby() {
        let dir = tempdir().unwrap();
        let wanted = dir.path().join("a.mkv");
        let has_ac3 = dir.path().join("b.mkv");
        let with_aac = dir.path().join("c.mkv");
        for p in [&wanted, &has_ac3, &with_aac] {
            std::fs::write(p, b"x").unwrap();
        }

        let prober = MapProber::new()
            .with(&wanted, english_dts_inventory())
            .with(
                &has_ac3,
                TrackInventory::from_tracks(vec![
                    AudioTrack::new(AudioFormat::Dts, "dts").with_language("en"),
                    AudioTrack::new(AudioFormat::Ac3, "ac3").with_language("en"),
                ]),
            )
            .with(
                &with_aac,
                TrackInventory::from_tracks(vec![
                    AudioTrack::new(AudioFormat::Dts, "dts").with_language("en"),
                    AudioTrack::new(AudioFormat::Aac, "aac").with_language("en"),
                ]),
            );
        let runner = Runner::with_tools(
            Settings::default(),
            Box::new(prober),
            Box::new(FailingTranscoder),
        );

        let (matches, examined) = runner.list_unconverted(dir.path(), "*").unwrap();
        assert_eq!(examined, 3);
        assert_eq!(matches.len(), 2);
        assert!(matches.iter().any(|m| m.path == wanted && !m.has_aac));
        assert!(matches.iter().any(|m| m.path == with_aac && m.has_aac));
    }

    #[test]
    fn reverify_rejects_non_positive_tolerance() {
        let dir = tempdir().unwrap();
        let runner = Runner::with_tools(
            Settings::default(),
            Box::new(MapProber::new()),
            Box::new(FailingTranscoder),
        );
        let err = runner.reverify(dir.path(), 0.0).unwrap_err();
        assert!(matches!(err, RunError::ArgumentInvalid(_)));
    }
}
