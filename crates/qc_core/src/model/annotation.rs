//! Coded-line records and unit-of-analysis projections.
//!
//! # Invariants
//! - At most one `CodedLine` exists per `(coder, code, line, document)`.
//! - `AnnotationRow::unit_key` identifies one unit instance for the unit it
//!   was queried at; equal keys mean the same line, paragraph, or document.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Persisted coded-line row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodedLine {
    pub id: i64,
    pub line: i64,
    pub coder_id: String,
    pub code_id: String,
}

/// "Coder X applied code Y to line Z of document D."
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Annotation {
    pub code: String,
    pub coder: String,
    pub line: i64,
    pub document: String,
}

/// One requested `(line, code)` pair for a single coder and document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CodedLineRequest {
    pub line: i64,
    pub code: String,
}

impl CodedLineRequest {
    pub fn new(line: i64, code: impl Into<String>) -> Self {
        Self {
            line,
            code: code.into(),
        }
    }
}

/// Granularity at which code occurrences are queried and counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Unit {
    #[default]
    Line,
    Paragraph,
    Document,
}

impl Unit {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Line => "line",
            Self::Paragraph => "paragraph",
            Self::Document => "document",
        }
    }
}

impl Display for Unit {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a unit name is not `line|paragraph|document`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownUnit(pub String);

impl Display for UnknownUnit {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "unknown unit of analysis `{}`; expected line|paragraph|document",
            self.0
        )
    }
}

impl Error for UnknownUnit {}

impl FromStr for Unit {
    type Err = UnknownUnit;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "line" => Ok(Self::Line),
            "paragraph" => Ok(Self::Paragraph),
            "document" => Ok(Self::Document),
            other => Err(UnknownUnit(other.to_string())),
        }
    }
}

/// Which unit instance an annotation row stands for.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UnitSpan {
    Line(i64),
    Paragraph {
        location_id: i64,
        start_line: i64,
        end_line: i64,
    },
    Document,
}

/// One deduplicated query row at a chosen unit.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AnnotationRow {
    pub code: String,
    pub coder: String,
    pub document: String,
    pub span: UnitSpan,
}

impl AnnotationRow {
    /// Stable identity of the unit instance this row belongs to.
    pub fn unit_key(&self) -> String {
        match &self.span {
            UnitSpan::Line(line) => format!("{}:{line}", self.document),
            UnitSpan::Paragraph { location_id, .. } => format!("location:{location_id}"),
            UnitSpan::Document => self.document.clone(),
        }
    }
}
