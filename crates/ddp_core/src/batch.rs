//! Batch script emission.
//!
//! Renders the transcode-request stream as an executable shell script so
//! an operator can review or run the exact encoder commands out of band.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::transcode::{ffmpeg_args, TranscodeRequest};

/// Writes one runnable encoder command per candidate, with comment lines
/// carrying the source path and target index.
pub struct BatchScriptWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    ffmpeg_tool: String,
}

impl BatchScriptWriter {
    /// Create the script file and write its header. Fails rather than
    /// proceed if the file cannot be created.
    pub fn create(path: &Path, ffmpeg_tool: &str) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "#!/bin/sh")?;
        writeln!(
            writer,
            "# Auto-generated ffmpeg commands for DTS -> E-AC-3 conversion"
        )?;
        writeln!(
            writer,
            "# Generated: {}",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        )?;
        writeln!(writer)?;
        Ok(Self {
            writer,
            path: path.to_path_buf(),
            ffmpeg_tool: ffmpeg_tool.to_string(),
        })
    }

    /// Append one request as a commented, runnable command.
    pub fn append(&mut self, request: &TranscodeRequest) -> io::Result<()> {
        writeln!(self.writer, "# file: {}", request.source.display())?;
        writeln!(
            self.writer,
            "# target audio stream index: {}",
            request.target_audio_index
        )?;
        let mut line = shell_quote(&self.ffmpeg_tool);
        for arg in ffmpeg_args(request) {
            line.push(' ');
            line.push_str(&shell_quote(&arg));
        }
        writeln!(self.writer, "{}", line)?;
        writeln!(self.writer)?;
        Ok(())
    }

    /// Flush and close the script, returning its path.
    pub fn finish(mut self) -> io::Result<PathBuf> {
        self.writer.flush()?;
        Ok(self.path)
    }

    /// Path of the script being written.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Quote a shell argument with single quotes when needed.
fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=,".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', "'\\''"))
    }
}
