//! Run reporting: candidate accumulation and summary rendering.
//!
//! The accumulator is an explicit value owned by one run invocation, read
//! once at the end; nothing here is process-lifetime state.

use std::path::PathBuf;

use serde::Serialize;

/// One file identified as a conversion candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    /// Source file path.
    pub path: PathBuf,
    /// Audio-stream ordinal selected for conversion.
    pub track_index: usize,
    /// Whether the selected track is a lossless DTS variant.
    pub lossless: bool,
    /// Source file size in bytes.
    pub size_bytes: u64,
}

/// Accumulates candidates over one run for the end-of-run summary.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    candidates: Vec<Candidate>,
}

impl RunSummary {
    /// Create an empty summary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a candidate.
    pub fn record(&mut self, candidate: Candidate) {
        self.candidates.push(candidate);
    }

    /// Number of candidates recorded.
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Whether no candidates were recorded.
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Candidates sorted by path (case-insensitive) for deterministic
    /// output.
    pub fn candidates_sorted(&self) -> Vec<&Candidate> {
        let mut sorted: Vec<&Candidate> = self.candidates.iter().collect();
        sorted.sort_by_key(|c| c.path.to_string_lossy().to_lowercase());
        sorted
    }

    /// Total size of all candidates in bytes.
    pub fn total_bytes(&self) -> u64 {
        self.candidates.iter().map(|c| c.size_bytes).sum()
    }

    /// Number of lossless candidates.
    pub fn lossless_count(&self) -> usize {
        self.candidates.iter().filter(|c| c.lossless).count()
    }

    /// Render the dry-run summary block.
    pub fn render(&self) -> String {
        if self.is_empty() {
            return "No files require conversion.".to_string();
        }

        let mut out = String::new();
        out.push_str("========== DRY RUN CONVERSION SUMMARY ==========\n");
        for c in self.candidates_sorted() {
            out.push_str(&format!(
                "track={} lossless={} size={} :: {}\n",
                c.track_index,
                if c.lossless { "yes" } else { "no" },
                format_size(c.size_bytes),
                c.path.display()
            ));
        }
        out.push_str("------------------------------------------------\n");
        let total = self.len();
        let lossless = self.lossless_count();
        out.push_str(&format!("Files to convert: {}\n", total));
        out.push_str(&format!(
            "Total size of candidates: {}\n",
            format_size(self.total_bytes())
        ));
        out.push_str(&format!(
            "Lossless DTS candidates: {} ({:.1}%)\n",
            lossless,
            (lossless as f64 / total as f64) * 100.0
        ));
        let avg = self.total_bytes() / total as u64;
        out.push_str(&format!("Average file size: {}\n", format_size(avg)));
        out.push_str("================================================");
        out
    }
}

/// One file matched by the discovery listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListMatch {
    /// Matched file path.
    pub path: PathBuf,
    /// Whether the file also carries an AAC track (ignored by the
    /// listing criteria, noted for the operator).
    pub has_aac: bool,
}

/// Render the discovery listing (English DTS present, no AC-3/E-AC-3).
pub fn render_list(matches: &[ListMatch], examined: usize, pattern: &str) -> String {
    let mut out = String::new();
    out.push_str("========== DTS (EN) WITHOUT DOLBY DIGITAL LIST ==========\n");
    if matches.is_empty() {
        out.push_str("No files found meeting criteria (English DTS present, no AC-3/E-AC-3).\n");
    } else {
        let mut sorted: Vec<&ListMatch> = matches.iter().collect();
        sorted.sort_by_key(|m| m.path.to_string_lossy().to_lowercase());
        for m in sorted {
            let aac_note = if m.has_aac { " +AAC" } else { "" };
            out.push_str(&format!("{}{}\n", m.path.display(), aac_note));
        }
    }
    out.push_str("--------------------------------------------------------\n");
    out.push_str(&format!(
        "Examined video files (pattern '{}'): {}\n",
        pattern, examined
    ));
    out.push_str(&format!("Matches: {}\n", matches.len()));
    out.push_str("========================================================");
    out
}

/// Human-readable byte size.
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    for unit in UNITS {
        if size < 1024.0 || *unit == "TB" {
            return format!("{:.2} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{} B", bytes)
}
