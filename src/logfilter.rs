//! Run-log summarization.
//!
//! Workflow runs are chatty; the summary keeps only the lines that matter
//! (stage banners, decisions, errors, artifact paths) and collapses the rest
//! into skip placeholders so the flow of a long run stays readable.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::{Regex, RegexSet};

/// A skipped-lines placeholder is emitted after this many consecutive drops
const MAX_CONSECUTIVE_SKIPPED: usize = 5;

static KEEP_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"^--- Stage:",
        r"^Decision:",
        r"(?i)error",
        r"(?i)warning",
        r"(?i)panic",
        r"\[vision\]",
        r"\[page\]",
        r"\[desktop\]",
        r"screenshot saved",
        r"Found URLs:",
        r"^Session:",
        r"(?i)teardown",
    ])
    .expect("valid keep patterns")
});

static ANSI_ESCAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").expect("valid ansi regex"));

/// Strip ANSI escape sequences from a line
pub fn strip_ansi(line: &str) -> String {
    ANSI_ESCAPE.replace_all(line, "").to_string()
}

/// Whether a (de-ANSI-fied) line survives filtering
pub fn keep_line(line: &str) -> bool {
    KEEP_PATTERNS.is_match(line)
}

/// Statistics from one filtering pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterStats {
    /// Lines read from the input
    pub total: usize,
    /// Lines written to the summary (placeholders not counted)
    pub kept: usize,
}

/// Filter a log stream into a summary stream.
///
/// Kept lines pass through verbatim (minus ANSI escapes); runs of dropped
/// lines longer than the threshold collapse into a single
/// `(... N lines skipped ...)` placeholder.
pub fn summarize_log<R: BufRead, W: Write>(input: R, mut output: W) -> io::Result<FilterStats> {
    let mut stats = FilterStats { total: 0, kept: 0 };
    let mut skipped = 0usize;

    for line in input.lines() {
        let line = line?;
        stats.total += 1;
        let clean = strip_ansi(&line);

        if keep_line(&clean) {
            flush_skipped(&mut output, &mut skipped)?;
            writeln!(output, "{}", clean)?;
            stats.kept += 1;
        } else {
            skipped += 1;
            if skipped == MAX_CONSECUTIVE_SKIPPED {
                // Emit eagerly so a tail of drops still shows up bounded.
                writeln!(output, "(... {} lines skipped ...)", skipped)?;
                skipped = 0;
            }
        }
    }
    flush_skipped(&mut output, &mut skipped)?;
    Ok(stats)
}

fn flush_skipped<W: Write>(output: &mut W, skipped: &mut usize) -> io::Result<()> {
    if *skipped > 0 {
        writeln!(output, "(... {} lines skipped ...)", skipped)?;
        *skipped = 0;
    }
    Ok(())
}

/// Filter a log file into a summary file, returning the stats
pub fn summarize_file(input: &Path, output: &Path) -> io::Result<FilterStats> {
    let reader = BufReader::new(File::open(input)?);
    let writer = BufWriter::new(File::create(output)?);
    summarize_log(reader, writer)
}

/// Default summary path for a log file (`run.log` -> `run.summary.log`)
pub fn summary_path_for(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "log".to_string());
    let ext = input
        .extension()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "log".to_string());
    input.with_file_name(format!("{}.summary.{}", stem, ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_ansi() {
        assert_eq!(strip_ansi("\x1b[31merror\x1b[0m here"), "error here");
        assert_eq!(strip_ansi("plain"), "plain");
    }

    #[test]
    fn test_keep_line_matches_vocabulary() {
        assert!(keep_line("--- Stage: navigate ---"));
        assert!(keep_line("Decision: extracted 3 result URLs"));
        assert!(keep_line("[vision] reply: not found"));
        assert!(keep_line("warning: teardown failed: x"));
        assert!(keep_line("Found URLs:"));
        assert!(!keep_line("some chatty progress line"));
    }

    #[test]
    fn test_summarize_collapses_noise() {
        let input = "\
--- Stage: navigate ---
noise 1
noise 2
Decision: done
noise 3
";
        let mut out = Vec::new();
        let stats = summarize_log(input.as_bytes(), &mut out).unwrap();
        let summary = String::from_utf8(out).unwrap();

        assert_eq!(stats.total, 5);
        assert_eq!(stats.kept, 2);
        assert!(summary.contains("--- Stage: navigate ---"));
        assert!(summary.contains("(... 2 lines skipped ...)"));
        assert!(summary.contains("(... 1 lines skipped ...)"));
    }

    #[test]
    fn test_summarize_bounds_skip_runs() {
        let noise: String = (0..12).map(|i| format!("noise {}\n", i)).collect();
        let mut out = Vec::new();
        summarize_log(noise.as_bytes(), &mut out).unwrap();
        let summary = String::from_utf8(out).unwrap();

        assert_eq!(
            summary.matches("(... 5 lines skipped ...)").count(),
            2,
            "two full runs of five"
        );
        assert!(summary.contains("(... 2 lines skipped ...)"));
    }

    #[test]
    fn test_summary_path_for() {
        assert_eq!(
            summary_path_for(Path::new("/tmp/run.log")),
            PathBuf::from("/tmp/run.summary.log")
        );
    }
}
