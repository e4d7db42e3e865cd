//! Transcode request construction and ffmpeg execution.
//!
//! The request captures the *intent*: copy every stream bit-exact except
//! the target audio index, which is re-encoded to E-AC-3 at a fixed
//! bitrate. Execution is a synchronous external ffmpeg invocation with an
//! optional wall-clock timeout.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::qualify::{QualificationResult, SkipReason};
use crate::replace::{self, ReplaceError};

/// Target codec passed to the encoder.
pub const TARGET_CODEC: &str = "eac3";
/// Fixed target bitrate. Bitrate customization is out of scope.
pub const TARGET_BITRATE: &str = "640k";

/// Poll interval while waiting on a time-limited encode.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(200);
/// How much of the encoder's stderr to keep for error reporting.
const STDERR_TAIL_CHARS: usize = 800;

/// The transformation plan for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeRequest {
    /// The authoritative source file.
    pub source: PathBuf,
    /// Audio-stream ordinal to re-encode; all other streams are copied.
    pub target_audio_index: usize,
    /// Sibling temp file the encoder must write to.
    pub temp_output: PathBuf,
    /// Whether the target track is a lossless DTS variant (controls the
    /// size safeguard downstream).
    pub lossless_source: bool,
}

/// Error building a transcode request.
#[derive(Error, Debug)]
pub enum RequestError {
    /// The qualification result was a skip; there is nothing to build.
    #[error("file is not a conversion target: {0}")]
    NotATarget(SkipReason),

    /// The source path cannot yield a temp sibling name.
    #[error(transparent)]
    InvalidSource(#[from] ReplaceError),
}

/// Build the transcode request for a qualified file.
///
/// The temp output is derived deterministically from the source (same
/// directory, `.temp` marker before the extension) and is never the source
/// path itself.
pub fn build_request(
    source: &Path,
    qualification: &QualificationResult,
) -> Result<TranscodeRequest, RequestError> {
    let (index, lossless) = match qualification {
        QualificationResult::Target { index, lossless } => (*index, *lossless),
        QualificationResult::Skip(reason) => {
            return Err(RequestError::NotATarget(reason.clone()));
        }
    };

    let temp_output = replace::temp_path(source)?;
    debug_assert_ne!(temp_output, source);

    Ok(TranscodeRequest {
        source: source.to_path_buf(),
        target_audio_index: index,
        temp_output,
        lossless_source: lossless,
    })
}

/// ffmpeg argv for a request (tool path excluded).
///
/// `-map 0 -c copy` carries every stream over bit-exact; only the target
/// audio ordinal is re-encoded. `-n` makes ffmpeg fail rather than
/// overwrite an existing temp output.
pub fn ffmpeg_args(request: &TranscodeRequest) -> Vec<String> {
    let idx = request.target_audio_index;
    vec![
        "-i".to_string(),
        request.source.display().to_string(),
        "-map".to_string(),
        "0".to_string(),
        "-c".to_string(),
        "copy".to_string(),
        format!("-c:a:{}", idx),
        TARGET_CODEC.to_string(),
        format!("-b:a:{}", idx),
        TARGET_BITRATE.to_string(),
        "-n".to_string(),
        request.temp_output.display().to_string(),
    ]
}

/// Error executing an encode.
#[derive(Error, Debug)]
pub enum EncodeError {
    /// The temp output already exists; refusing to overwrite.
    #[error("temp output already exists: {0}")]
    TempOutputExists(PathBuf),

    /// The encoder binary could not be started.
    #[error("Failed to start {tool}: {message}")]
    LaunchFailed { tool: String, message: String },

    /// The encoder ran but reported failure.
    #[error("{tool} failed with exit code {exit_code}: {stderr_tail}")]
    CommandFailed {
        tool: String,
        exit_code: i32,
        stderr_tail: String,
    },

    /// The encode exceeded the configured time limit and was killed.
    /// Partial output, if any, takes the quarantine path.
    #[error("encode exceeded {limit_secs}s and was killed")]
    TimedOut { limit_secs: u64 },

    /// I/O failure while supervising the encoder process.
    #[error("I/O error during encode: {0}")]
    Io(#[from] std::io::Error),
}

/// Transcoder collaborator.
pub trait Transcoder {
    /// Execute the request, writing exactly to `request.temp_output`.
    fn execute(&self, request: &TranscodeRequest) -> Result<(), EncodeError>;
}

/// Transcoder backed by the ffmpeg binary.
pub struct FfmpegTranscoder {
    tool: PathBuf,
    timeout: Option<Duration>,
}

impl FfmpegTranscoder {
    /// Create a transcoder using the given ffmpeg binary (name or full
    /// path).
    pub fn new(tool: impl Into<PathBuf>) -> Self {
        Self {
            tool: tool.into(),
            timeout: None,
        }
    }

    /// Limit each encode to a wall-clock duration.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// The configured tool path.
    pub fn tool(&self) -> &Path {
        &self.tool
    }

    fn run_unbounded(&self, cmd: &mut Command) -> Result<(), EncodeError> {
        let output = cmd.output().map_err(|e| EncodeError::LaunchFailed {
            tool: self.tool.display().to_string(),
            message: e.to_string(),
        })?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(EncodeError::CommandFailed {
                tool: self.tool.display().to_string(),
                exit_code: output.status.code().unwrap_or(-1),
                stderr_tail: tail(&stderr, STDERR_TAIL_CHARS),
            })
        }
    }

    fn run_bounded(&self, cmd: &mut Command, limit: Duration) -> Result<(), EncodeError> {
        let mut child = cmd
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| EncodeError::LaunchFailed {
                tool: self.tool.display().to_string(),
                message: e.to_string(),
            })?;

        // Drain stderr on a separate thread so ffmpeg never blocks on a
        // full pipe while we poll.
        let stderr_pipe = child.stderr.take();
        let drain = std::thread::spawn(move || {
            let mut buf = String::new();
            if let Some(mut pipe) = stderr_pipe {
                let _ = pipe.read_to_string(&mut buf);
            }
            buf
        });

        let deadline = Instant::now() + limit;
        loop {
            if let Some(status) = child.try_wait()? {
                let stderr = drain.join().unwrap_or_default();
                return if status.success() {
                    Ok(())
                } else {
                    Err(EncodeError::CommandFailed {
                        tool: self.tool.display().to_string(),
                        exit_code: status.code().unwrap_or(-1),
                        stderr_tail: tail(&stderr, STDERR_TAIL_CHARS),
                    })
                };
            }
            if Instant::now() >= deadline {
                tracing::warn!("Encode time limit reached; killing encoder");
                let _ = child.kill();
                let _ = child.wait();
                let _ = drain.join();
                return Err(EncodeError::TimedOut {
                    limit_secs: limit.as_secs(),
                });
            }
            std::thread::sleep(WAIT_POLL_INTERVAL);
        }
    }
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl Transcoder for FfmpegTranscoder {
    fn execute(&self, request: &TranscodeRequest) -> Result<(), EncodeError> {
        if request.temp_output.exists() {
            return Err(EncodeError::TempOutputExists(request.temp_output.clone()));
        }

        let args = ffmpeg_args(request);
        tracing::info!(
            "Running {} {}",
            self.tool.display(),
            args.join(" ")
        );

        let mut cmd = Command::new(&self.tool);
        cmd.args(&args).stdin(Stdio::null()).stdout(Stdio::null());

        match self.timeout {
            Some(limit) => self.run_bounded(&mut cmd, limit),
            None => self.run_unbounded(&mut cmd),
        }
    }
}

/// Last `max_chars` characters of a string, on a char boundary.
fn tail(s: &str, max_chars: usize) -> String {
    let count = s.chars().count();
    if count <= max_chars {
        s.to_string()
    } else {
        s.chars().skip(count - max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(index: usize, lossless: bool) -> QualificationResult {
        QualificationResult::Target { index, lossless }
    }

    #[test]
    fn builds_request_with_sibling_temp_path() {
        let request = build_request(Path::new("/video/movie.mkv"), &target(1, false)).unwrap();
        assert_eq!(request.source, PathBuf::from("/video/movie.mkv"));
        assert_eq!(request.temp_output, PathBuf::from("/video/movie.temp.mkv"));
        assert_eq!(request.target_audio_index, 1);
        assert!(!request.lossless_source);
        assert_ne!(request.temp_output, request.source);
    }

    #[test]
    fn skip_qualification_builds_nothing() {
        let skip = QualificationResult::Skip(SkipReason::NoDtsTracks);
        let err = build_request(Path::new("/video/movie.mkv"), &skip).unwrap_err();
        assert!(matches!(err, RequestError::NotATarget(_)));
    }

    #[test]
    fn ffmpeg_args_reencode_only_the_target_index() {
        let request = build_request(Path::new("/v/movie.mkv"), &target(2, true)).unwrap();
        let args = ffmpeg_args(&request);
        assert_eq!(
            args,
            vec![
                "-i",
                "/v/movie.mkv",
                "-map",
                "0",
                "-c",
                "copy",
                "-c:a:2",
                "eac3",
                "-b:a:2",
                "640k",
                "-n",
                "/v/movie.temp.mkv",
            ]
        );
    }

    #[test]
    fn existing_temp_output_refuses_to_run() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("movie.mkv");
        std::fs::write(&source, b"src").unwrap();
        let request = build_request(&source, &target(0, false)).unwrap();
        std::fs::write(&request.temp_output, b"leftover").unwrap();

        let err = FfmpegTranscoder::default().execute(&request).unwrap_err();
        assert!(matches!(err, EncodeError::TempOutputExists(_)));
    }

    #[test]
    fn tail_keeps_last_chars() {
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("ab", 3), "ab");
    }
}
