//! Document, index, and location records.
//!
//! # Invariants
//! - `Document::file_path` is relative to the corpus root, `/`-separated.
//! - `Location` spans satisfy `start_line <= end_line`.
//! - The `paragraphs` index of a document partitions `[0, line_count)`.

use sha2::{Digest, Sha256};
use std::fmt::Write as _;

/// Name of the index every registered document receives.
pub const PARAGRAPHS_INDEX: &str = "paragraphs";

/// A registered corpus text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Primary key, relative to the corpus root.
    pub file_path: String,
    /// Hex SHA-256 of the file bytes at registration/update time.
    pub file_hash: String,
}

/// One indexing scheme over a document (currently only `paragraphs`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentIndex {
    pub id: i64,
    pub name: String,
    pub document_id: String,
    pub time_series: bool,
}

/// A half-open line span owned by a document index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub id: i64,
    pub start_line: i64,
    pub end_line: i64,
    pub document_index_id: i64,
}

impl Location {
    /// Returns whether `line` falls inside `[start_line, end_line)`.
    pub fn contains(&self, line: i64) -> bool {
        self.start_line <= line && line < self.end_line
    }
}

/// Half-open line span before it is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSpan {
    pub start: i64,
    pub end: i64,
}

/// Hex-encoded SHA-256 of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(64);
    for byte in digest {
        let _ = write!(&mut out, "{byte:02x}");
    }
    out
}

/// Number of lines in `text`; a trailing newline does not open a new line.
pub fn line_count(text: &str) -> i64 {
    text.lines().count() as i64
}

/// Partitions `text` into paragraph spans delimited by blank lines.
///
/// A span starts at every non-blank line that follows a blank line and runs
/// until the next span starts. Leading blank lines belong to the first span
/// and trailing blank lines to the last one, so the spans always tile
/// `[0, line_count)`. Empty text yields no spans.
pub fn paragraph_spans(text: &str) -> Vec<LineSpan> {
    let mut starts = Vec::new();
    let mut previous_blank = true;
    let mut total = 0_i64;
    for (index, line) in text.lines().enumerate() {
        let blank = line.trim().is_empty();
        if previous_blank && !blank {
            starts.push(index as i64);
        }
        previous_blank = blank;
        total += 1;
    }
    if total > 0 {
        match starts.first_mut() {
            Some(first) => *first = 0,
            None => starts.push(0),
        }
    }

    let mut spans = Vec::with_capacity(starts.len());
    for (position, start) in starts.iter().enumerate() {
        let end = starts.get(position + 1).copied().unwrap_or(total);
        spans.push(LineSpan { start: *start, end });
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::{content_hash, line_count, paragraph_spans, LineSpan};

    fn assert_tiles(text: &str) {
        let spans = paragraph_spans(text);
        let mut cursor = 0;
        for span in &spans {
            assert_eq!(span.start, cursor, "gap or overlap in {spans:?}");
            assert!(span.start < span.end);
            cursor = span.end;
        }
        assert_eq!(cursor, line_count(text));
    }

    #[test]
    fn splits_on_blank_lines() {
        let spans = paragraph_spans("a\nb\n\nc\n\n\nd\n");
        assert_eq!(
            spans,
            vec![
                LineSpan { start: 0, end: 3 },
                LineSpan { start: 3, end: 6 },
                LineSpan { start: 6, end: 7 },
            ]
        );
    }

    #[test]
    fn leading_and_trailing_blank_runs_are_covered() {
        let text = "\n\n  \nfirst\nsecond\n\nthird\n\n\n";
        assert_eq!(paragraph_spans(text)[0], LineSpan { start: 0, end: 6 });
        assert_tiles(text);
        assert_tiles("only\n");
        assert_tiles("\n\n\n");
        assert_tiles("no trailing newline\n\nlast");
    }

    #[test]
    fn empty_text_has_no_spans() {
        assert!(paragraph_spans("").is_empty());
        assert_eq!(line_count(""), 0);
    }

    #[test]
    fn content_hash_is_hex_sha256() {
        let hash = content_hash(b"abc");
        assert_eq!(
            hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
