//! Output capture - bounded in-memory log of the supervised process
//!
//! Provides:
//! - Lines tagged by source stream, in arrival order per stream
//! - FIFO eviction once the buffer is full
//! - Error-keyword matching used for live surfacing and crash diagnostics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Lines kept when no capacity is configured
pub const DEFAULT_MAX_ENTRIES: usize = 100;

/// Markers that make a line worth surfacing immediately. Case sensitive.
pub const ERROR_KEYWORDS: &[&str] = &["ERROR:", "error", "Failed", "failed", "exited with code"];

/// Markers used when building crash diagnostics
pub const CRASH_KEYWORDS: &[&str] = &[
    "ERROR:",
    "error",
    "Failed",
    "failed",
    "exited with code",
    "EADDRINUSE",
];

/// Source of a captured line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputStream {
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
    /// Supervisor messages (exit, stop)
    System,
}

impl OutputStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputStream::Stdout => "STDOUT",
            OutputStream::Stderr => "STDERR",
            OutputStream::System => "SYSTEM",
        }
    }
}

/// A single captured line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub stream: OutputStream,
    pub content: String,

    /// 1-based position among every line ever pushed, evicted ones included
    pub line_number: usize,
}

impl LogEntry {
    pub fn new(stream: OutputStream, content: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            stream,
            content: content.into(),
            line_number: 0,
        }
    }

    pub fn stdout(content: impl Into<String>) -> Self {
        Self::new(OutputStream::Stdout, content)
    }

    pub fn stderr(content: impl Into<String>) -> Self {
        Self::new(OutputStream::Stderr, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(OutputStream::System, content)
    }

    /// `[STDOUT] content`
    pub fn tagged(&self) -> String {
        format!("[{}] {}", self.stream.as_str(), self.content)
    }

    /// `12:00:01.250 #42 [STDOUT] content`, for post-mortem dumps
    pub fn timestamped(&self) -> String {
        format!(
            "{} #{} [{}] {}",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.stream.as_str(),
            self.line_number,
            self.content
        )
    }
}

/// Whether a line carries one of `keywords`
pub fn matches_any(line: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| line.contains(k))
}

/// Whether a line should be surfaced to the operator right away
pub fn is_error_line(line: &str) -> bool {
    matches_any(line, ERROR_KEYWORDS)
}

/// Bounded FIFO of captured lines
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    entries: VecDeque<LogEntry>,
    max_entries: usize,
    line_count: usize,
}

impl OutputBuffer {
    pub fn new(max_entries: usize) -> Self {
        let max_entries = max_entries.max(1);
        Self {
            entries: VecDeque::with_capacity(max_entries),
            max_entries,
            line_count: 0,
        }
    }

    /// Add an entry, evicting the oldest when full
    pub fn push(&mut self, mut entry: LogEntry) {
        self.line_count += 1;
        entry.line_number = self.line_count;

        if self.entries.len() >= self.max_entries {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn push_stdout(&mut self, content: impl Into<String>) {
        self.push(LogEntry::stdout(content));
    }

    pub fn push_stderr(&mut self, content: impl Into<String>) {
        self.push(LogEntry::stderr(content));
    }

    pub fn push_system(&mut self, content: impl Into<String>) {
        self.push(LogEntry::system(content));
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    /// Last `n` entries, oldest first
    pub fn tail(&self, n: usize) -> Vec<&LogEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).collect()
    }

    /// Last `n` entries as tagged lines
    pub fn tail_lines(&self, n: usize) -> Vec<String> {
        self.tail(n).into_iter().map(LogEntry::tagged).collect()
    }

    /// Last `n` entries with arrival time and line number
    pub fn tail_timestamped(&self, n: usize) -> Vec<String> {
        self.tail(n).into_iter().map(LogEntry::timestamped).collect()
    }

    /// Tagged lines carrying one of `keywords`, oldest first
    pub fn matching_lines(&self, keywords: &[&str]) -> Vec<String> {
        self.entries
            .iter()
            .map(LogEntry::tagged)
            .filter(|line| matches_any(line, keywords))
            .collect()
    }

    /// Lines pushed over the buffer's whole life
    pub fn line_count(&self) -> usize {
        self.line_count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Recent lines plus keyword hits, for crash messages
    pub fn diagnostics(&self, recent: usize, errors: usize) -> DiagnosticReport {
        let mut error_lines = self.matching_lines(CRASH_KEYWORDS);
        let skip = error_lines.len().saturating_sub(errors);
        error_lines.drain(..skip);

        DiagnosticReport {
            recent: self.tail_lines(recent),
            errors: error_lines,
        }
    }
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

/// Captured output attached to a crash
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagnosticReport {
    pub recent: Vec<String>,
    pub errors: Vec<String>,
}

impl fmt::Display for DiagnosticReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.recent.is_empty() {
            writeln!(f, "\nRecent output (last {} lines):", self.recent.len())?;
            for line in &self.recent {
                writeln!(f, "{}", line)?;
            }
        }
        if !self.errors.is_empty() {
            writeln!(f, "\nError messages found:")?;
            for line in &self.errors {
                writeln!(f, "{}", line)?;
            }
        }
        Ok(())
    }
}
