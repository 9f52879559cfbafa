//! Log capture plumbing shared by the supervisor and the state store.
//!
//! This module provides the bounded per-project ring buffer (`LogBuffer`), the
//! chunk-to-line reassembly state (`LineFramer`), severity detection for
//! captured lines, and text sanitization.

use std::collections::VecDeque;

use strip_ansi_escapes::strip;

use crate::project::{LogEntry, LogLevel};

/// Indicates the source stream of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Standard Output.
    Stdout,
    /// Standard Error.
    Stderr,
}

/// A fixed-capacity ring buffer for storing `LogEntry`s.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    max_entries: usize,
    entries: VecDeque<LogEntry>,
}

impl LogBuffer {
    /// Creates a new `LogBuffer` with the specified maximum capacity.
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            entries: VecDeque::with_capacity(max_entries.min(1024)),
        }
    }

    /// Creates a buffer pre-populated with cached entries.
    ///
    /// Entries beyond the capacity are evicted oldest-first.
    pub fn from_entries(max_entries: usize, entries: Vec<LogEntry>) -> Self {
        let mut buffer = Self::new(max_entries);
        for entry in entries {
            buffer.push(entry);
        }
        buffer
    }

    /// Adds an entry to the buffer.
    ///
    /// Returns `true` if an old entry was dropped to make room.
    pub fn push(&mut self, entry: LogEntry) -> bool {
        let mut dropped = false;
        self.entries.push_back(entry);
        while self.entries.len() > self.max_entries {
            self.entries.pop_front();
            dropped = true;
        }
        dropped
    }

    /// Returns the number of entries currently in the buffer.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when the buffer holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns an iterator over the entries in the buffer.
    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    /// Removes all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Returns up to the last `count` entries, oldest first.
    pub fn tail(&self, count: usize) -> Vec<LogEntry> {
        let skip = self.entries.len().saturating_sub(count);
        self.entries.iter().skip(skip).cloned().collect()
    }
}

/// Reassembles raw output chunks into complete lines.
///
/// One framer per stream: partial trailing data is kept across chunks and
/// only surfaces on the next newline or a final `flush`.
#[derive(Debug, Default)]
pub struct LineFramer {
    partial: String,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk of bytes, returning every line completed by it.
    ///
    /// `\r\n` is normalized to `\n`; invalid UTF-8 is replaced.
    pub fn push_chunk(&mut self, bytes: &[u8]) -> Vec<String> {
        self.partial.push_str(&String::from_utf8_lossy(bytes));
        let mut lines = Vec::new();
        while let Some(pos) = self.partial.find('\n') {
            let mut line: String = self.partial.drain(..=pos).collect();
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
            lines.push(line);
        }
        lines
    }

    /// Returns the trailing unterminated data, if any. Called once the
    /// stream is known to be finished.
    pub fn flush(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            return None;
        }
        let mut line = std::mem::take(&mut self.partial);
        if line.ends_with('\r') {
            line.pop();
        }
        Some(line)
    }
}

/// Derives a severity for a captured line.
///
/// A recognized marker at the start of the line wins; otherwise stderr lines
/// default to error and stdout lines to info.
pub fn detect_level(line: &str, stream: StreamKind) -> LogLevel {
    if let Some(level) = marker_level(line) {
        return level;
    }
    match stream {
        StreamKind::Stderr => LogLevel::Error,
        StreamKind::Stdout => LogLevel::Info,
    }
}

// Leading alphabetic token after optional punctuation/brackets, compared
// case-insensitively against the common logger markers.
fn marker_level(line: &str) -> Option<LogLevel> {
    let rest = line.trim_start();
    let rest = rest.trim_start_matches(|c: char| !c.is_alphanumeric());
    let token_end = rest
        .char_indices()
        .find(|(_, c)| !c.is_alphabetic())
        .map(|(idx, _)| idx)
        .unwrap_or(rest.len());
    let token = rest[..token_end].to_ascii_lowercase();
    match token.as_str() {
        "error" | "err" => Some(LogLevel::Error),
        "warn" | "warning" | "wrn" => Some(LogLevel::Warn),
        "debug" | "dbg" | "trace" => Some(LogLevel::Debug),
        "info" => Some(LogLevel::Info),
        _ => None,
    }
}

/// Strips ANSI escape codes and replaces invalid UTF-8 sequences.
pub fn sanitize_line(text: &str) -> String {
    let stripped = strip(text.as_bytes());
    String::from_utf8_lossy(&stripped).to_string()
}
