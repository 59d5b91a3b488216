//! Editor side file: one comma-separated list of codes per document line.

use crate::model::annotation::CodedLineRequest;
use crate::model::document::line_count;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

static CODE_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid code token regex"));

pub type CodesFileResult<T> = Result<T, CodesFileError>;

#[derive(Debug)]
pub enum CodesFileError {
    /// Side file and document disagree on the number of lines.
    LineCountMismatch { expected: i64, actual: i64 },
    /// Token on a zero-based `line` is not a valid code name.
    InvalidCode { line: i64, token: String },
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl Display for CodesFileError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LineCountMismatch { expected, actual } => write!(
                f,
                "codes file has {actual} lines but the document has {expected}"
            ),
            Self::InvalidCode { line, token } => write!(
                f,
                "invalid code `{token}` on line {}; codes may contain only letters, digits, _ and -",
                line + 1
            ),
            Self::Io { path, source } => {
                write!(f, "codes file `{}`: {source}", path.display())
            }
        }
    }
}

impl Error for CodesFileError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Returns whether `token` is a valid code name.
pub fn is_valid_code(token: &str) -> bool {
    CODE_TOKEN_RE.is_match(token)
}

/// Renders `annotations` as a side file with exactly `lines` lines.
pub fn render_codes_file(lines: i64, annotations: &[CodedLineRequest]) -> String {
    let mut by_line: BTreeMap<i64, Vec<&str>> = BTreeMap::new();
    for annotation in annotations {
        by_line
            .entry(annotation.line)
            .or_default()
            .push(annotation.code.as_str());
    }
    let mut out = String::new();
    for line in 0..lines.max(0) {
        if let Some(codes) = by_line.get_mut(&line) {
            codes.sort_unstable();
            codes.dedup();
            out.push_str(&codes.join(", "));
        }
        out.push('\n');
    }
    out
}

/// Parses a side file for a document of `expected_lines` lines.
///
/// The line count is checked before any token, so a truncated file never
/// yields partial annotations.
pub fn parse_codes_file(text: &str, expected_lines: i64) -> CodesFileResult<Vec<CodedLineRequest>> {
    let actual = line_count(text);
    if actual != expected_lines {
        return Err(CodesFileError::LineCountMismatch {
            expected: expected_lines,
            actual,
        });
    }

    let mut requests = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line_number = index as i64;
        for token in line.split(',').map(str::trim).filter(|token| !token.is_empty()) {
            if !is_valid_code(token) {
                return Err(CodesFileError::InvalidCode {
                    line: line_number,
                    token: token.to_string(),
                });
            }
            requests.push(CodedLineRequest::new(line_number, token));
        }
    }
    Ok(requests)
}
