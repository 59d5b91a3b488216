//! Unified-diff parsing and annotation reindexing.
//!
//! # Responsibility
//! - Parse `diff -u` text for one document into net line-shift edits.
//! - Remap annotation line numbers across those edits.
//! - Generate unified diffs between two texts (see [`unified`]).
//!
//! # Invariants
//! - Edit pivots are 1-based old-file line numbers, ascending.
//! - A replacement that keeps the line count produces no edit.
//! - Reindexing is pure; callers persist the result.
//!
//! Pivot rule: a net insertion pivots on its first old line, so annotations
//! at or after the insertion point shift down. A net deletion pivots on the
//! last deleted line that has no surviving counterpart, so annotations inside
//! the replaced span that still map onto replacement lines keep their
//! position while later ones shift up.

pub mod unified;

use crate::model::annotation::Annotation;
use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub use unified::{unified_diff, unified_diff_labeled};

static HUNK_HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").expect("valid hunk header regex")
});

pub type DiffResult<T> = Result<T, DiffError>;

/// Unified diff parse errors. Line numbers are 1-based within the diff text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffError {
    /// No `---` line followed by a `+++` line.
    MissingPreamble,
    MalformedHunkHeader { line_number: usize, text: String },
    UnexpectedLine { line_number: usize, text: String },
    /// Diff ended before a hunk's declared line counts were consumed.
    TruncatedHunk { header_line: usize },
}

impl Display for DiffError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingPreamble => write!(f, "diff is missing the ---/+++ preamble"),
            Self::MalformedHunkHeader { line_number, text } => {
                write!(f, "malformed hunk header at diff line {line_number}: {text}")
            }
            Self::UnexpectedLine { line_number, text } => {
                write!(f, "unexpected diff line {line_number}: {text}")
            }
            Self::TruncatedHunk { header_line } => {
                write!(f, "hunk starting at diff line {header_line} is truncated")
            }
        }
    }
}

impl Error for DiffError {}

/// Net line shift at a pivot line of the old text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edit {
    /// 1-based old-file line at which the shift applies.
    pub line: i64,
    /// Inserted minus deleted lines.
    pub offset: i64,
}

#[derive(Debug, Default)]
struct PendingEdit {
    start: i64,
    deleted: i64,
    inserted: i64,
}

impl PendingEdit {
    fn is_empty(&self) -> bool {
        self.deleted == 0 && self.inserted == 0
    }

    fn begin_at(&mut self, cursor: i64) {
        if self.is_empty() {
            self.start = cursor;
        }
    }

    fn flush(&mut self, edits: &mut Vec<Edit>) {
        let offset = self.inserted - self.deleted;
        if offset > 0 {
            edits.push(Edit {
                line: self.start,
                offset,
            });
        } else if offset < 0 {
            edits.push(Edit {
                line: self.start + self.deleted - self.inserted - 1,
                offset,
            });
        }
        *self = Self::default();
    }
}

/// Parses unified diff text into edits. Empty text means no change.
pub fn parse_edits(diff: &str) -> DiffResult<Vec<Edit>> {
    if diff.trim().is_empty() {
        return Ok(Vec::new());
    }
    let lines: Vec<&str> = diff.lines().collect();
    let body_start = find_body_start(&lines)?;

    let mut edits = Vec::new();
    let mut index = body_start;
    while index < lines.len() {
        let line = lines[index];
        if line.starts_with("@@") {
            index = parse_hunk(&lines, index, &mut edits)?;
        } else if line.trim().is_empty() || line.starts_with('\\') {
            index += 1;
        } else {
            return Err(DiffError::UnexpectedLine {
                line_number: index + 1,
                text: line.to_string(),
            });
        }
    }
    Ok(edits)
}

/// Remaps annotation lines across `edits`; output is sorted by old line.
pub fn reindex_annotations(annotations: &[Annotation], edits: &[Edit]) -> Vec<Annotation> {
    let mut sorted = annotations.to_vec();
    sorted.sort_by_key(|annotation| annotation.line);

    let mut cursor = 0;
    let mut cumulative = 0_i64;
    sorted
        .into_iter()
        .map(|annotation| {
            while cursor < edits.len() && edits[cursor].line - 1 <= annotation.line {
                cumulative += edits[cursor].offset;
                cursor += 1;
            }
            Annotation {
                line: annotation.line + cumulative,
                ..annotation
            }
        })
        .collect()
}

/// Parses `diff` and remaps `annotations` in one step.
pub fn reindex_with_diff(annotations: &[Annotation], diff: &str) -> DiffResult<Vec<Annotation>> {
    let edits = parse_edits(diff)?;
    Ok(reindex_annotations(annotations, &edits))
}

fn find_body_start(lines: &[&str]) -> DiffResult<usize> {
    for (index, line) in lines.iter().enumerate() {
        if line.starts_with("---") {
            return match lines.get(index + 1) {
                Some(next) if next.starts_with("+++") => Ok(index + 2),
                _ => Err(DiffError::MissingPreamble),
            };
        }
        if line.starts_with("@@") {
            break;
        }
    }
    Err(DiffError::MissingPreamble)
}

/// Parses one hunk starting at `header_index`; returns the next line index.
fn parse_hunk(lines: &[&str], header_index: usize, edits: &mut Vec<Edit>) -> DiffResult<usize> {
    let header = lines[header_index];
    let malformed = || DiffError::MalformedHunkHeader {
        line_number: header_index + 1,
        text: header.to_string(),
    };
    let captures = HUNK_HEADER_RE.captures(header).ok_or_else(malformed)?;
    let number = |group: usize| -> DiffResult<Option<i64>> {
        captures
            .get(group)
            .map(|m| m.as_str().parse::<i64>().map_err(|_| malformed()))
            .transpose()
    };
    let old_start = number(1)?.ok_or_else(malformed)?;
    let old_len = number(2)?.unwrap_or(1);
    let mut old_remaining = old_len;
    let mut new_remaining = number(4)?.unwrap_or(1);

    let mut cursor = if old_len == 0 { old_start + 1 } else { old_start };
    let mut pending = PendingEdit::default();
    let mut index = header_index + 1;
    while old_remaining > 0 || new_remaining > 0 {
        let Some(line) = lines.get(index) else {
            return Err(DiffError::TruncatedHunk {
                header_line: header_index + 1,
            });
        };
        match line.chars().next() {
            Some('-') => {
                pending.begin_at(cursor);
                pending.deleted += 1;
                cursor += 1;
                old_remaining -= 1;
            }
            Some('+') => {
                pending.begin_at(cursor);
                pending.inserted += 1;
                new_remaining -= 1;
            }
            Some(' ') | None => {
                pending.flush(edits);
                cursor += 1;
                old_remaining -= 1;
                new_remaining -= 1;
            }
            Some('\\') => {}
            Some(_) => {
                return Err(DiffError::UnexpectedLine {
                    line_number: index + 1,
                    text: (*line).to_string(),
                })
            }
        }
        if old_remaining < 0 || new_remaining < 0 {
            return Err(malformed());
        }
        index += 1;
    }
    pending.flush(edits);
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::{parse_edits, reindex_annotations, reindex_with_diff, unified_diff, DiffError, Edit};
    use crate::model::annotation::Annotation;

    fn lines_of(chars: &str) -> String {
        chars.chars().map(|ch| format!("{ch}\n")).collect()
    }

    fn annotation(line: i64) -> Annotation {
        Annotation {
            code: "c".to_string(),
            coder: "x".to_string(),
            line,
            document: "d.txt".to_string(),
        }
    }

    #[test]
    fn replaced_and_appended_runs_become_two_edits() {
        let diff = unified_diff(&lines_of("abcdefghijklmnop"), &lines_of("1bcdef12lmnopqr"), 1);
        assert_eq!(
            parse_edits(&diff).unwrap(),
            vec![Edit { line: 9, offset: -3 }, Edit { line: 17, offset: 2 }]
        );
    }

    #[test]
    fn replace_three_with_one_then_insert_two_keeps_line_fourteen() {
        let old: Vec<String> = (0..16).map(|n| format!("line {n}")).collect();
        let mut new: Vec<String> = old[..8].to_vec();
        new.push("merged".to_string());
        new.extend(old[11..14].iter().cloned());
        new.push("inserted a".to_string());
        new.push("inserted b".to_string());
        new.extend(old[14..].iter().cloned());
        let old_text = old.join("\n") + "\n";
        let new_text = new.join("\n") + "\n";

        let diff = unified_diff(&old_text, &new_text, 3);
        let edits = parse_edits(&diff).unwrap();
        assert_eq!(
            edits,
            vec![Edit { line: 10, offset: -2 }, Edit { line: 15, offset: 2 }]
        );

        let remapped = reindex_annotations(&[annotation(14), annotation(12), annotation(3)], &edits);
        let lines: Vec<i64> = remapped.iter().map(|a| a.line).collect();
        assert_eq!(lines, vec![3, 10, 14]);
        assert_eq!(new[14], old[14]);
        assert_eq!(new[10], old[12]);
    }

    #[test]
    fn hand_written_diff_with_default_lengths() {
        let diff = "--- a.txt\n+++ b.txt\n@@ -3 +3,2 @@\n-c\n+C\n+D\n";
        assert_eq!(parse_edits(diff).unwrap(), vec![Edit { line: 3, offset: 1 }]);
        let remapped = reindex_with_diff(&[annotation(1), annotation(2), annotation(5)], diff).unwrap();
        let lines: Vec<i64> = remapped.iter().map(|a| a.line).collect();
        assert_eq!(lines, vec![1, 3, 6]);
    }

    #[test]
    fn pure_insertion_at_top_shifts_everything() {
        let diff = "--- a\n+++ b\n@@ -0,0 +1,2 @@\n+x\n+y\n";
        assert_eq!(parse_edits(diff).unwrap(), vec![Edit { line: 1, offset: 2 }]);
        let remapped = reindex_annotations(&[annotation(0)], &parse_edits(diff).unwrap());
        assert_eq!(remapped[0].line, 2);
    }

    #[test]
    fn empty_diff_is_a_no_op() {
        let annotations = vec![annotation(0), annotation(4), annotation(9)];
        assert_eq!(reindex_with_diff(&annotations, "").unwrap(), annotations);
        let identical = unified_diff("a\nb\n", "a\nb\n", 3);
        assert_eq!(reindex_with_diff(&annotations, &identical).unwrap(), annotations);
    }

    #[test]
    fn malformed_input_is_rejected() {
        assert_eq!(
            parse_edits("@@ -1 +1 @@\n-a\n+b\n"),
            Err(DiffError::MissingPreamble)
        );
        assert!(matches!(
            parse_edits("--- a\n+++ b\n@@ -x +1 @@\n"),
            Err(DiffError::MalformedHunkHeader { line_number: 3, .. })
        ));
        assert!(matches!(
            parse_edits("--- a\n+++ b\n@@ -1,3 +1,3 @@\n a\n"),
            Err(DiffError::TruncatedHunk { header_line: 3 })
        ));
        assert!(matches!(
            parse_edits("--- a\n+++ b\n@@ -1 +1 @@\n-a\n+b\nstray\n"),
            Err(DiffError::UnexpectedLine { line_number: 6, .. })
        ));
    }
}
