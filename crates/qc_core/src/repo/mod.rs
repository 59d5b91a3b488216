//! Repository layer: SQLite access for documents and annotations.
//!
//! # Responsibility
//! - Define data access contracts used by the corpus service.
//! - Keep SQL and row mapping inside the repository boundary.
//!
//! # Invariants
//! - Repositories only accept connections migrated to the latest schema.
//! - Multi-statement writes run under a savepoint, so they are all-or-nothing
//!   whether or not the caller holds an outer transaction.
//! - Repository APIs return semantic errors (`DocumentNotFound`,
//!   `AlreadyExists`, `LineOutOfRange`) in addition to transport errors.

pub mod annotation_repo;
pub mod document_repo;

use crate::db::migrations::latest_version;
use crate::db::{schema_version, table_exists, DbError};
use rusqlite::types::Value;
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub use annotation_repo::{
    AnnotationRepository, CodedLineChanges, RenameOutcome, SqliteAnnotationRepository,
};
pub use document_repo::{DocumentRepository, SqliteDocumentRepository};

pub type RepoResult<T> = Result<T, RepoError>;

/// Errors from repository operations.
#[derive(Debug)]
pub enum RepoError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// No document is registered under this path.
    DocumentNotFound(String),
    /// A document is already registered under this path.
    AlreadyExists(String),
    /// Annotation line is outside `[0, line_count)` of its document.
    LineOutOfRange {
        document: String,
        line: i64,
        line_count: i64,
    },
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required table is missing.
    MissingRequiredTable(&'static str),
    /// Persisted rows violate a storage invariant.
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::DocumentNotFound(path) => write!(f, "document not found: {path}"),
            Self::AlreadyExists(path) => write!(f, "document already exists: {path}"),
            Self::LineOutOfRange {
                document,
                line,
                line_count,
            } => write!(
                f,
                "line {line} is outside {document} ({line_count} lines)"
            ),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "annotation store requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "annotation store requires table `{table}`")
            }
            Self::InvalidData(message) => write!(f, "invalid annotation data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Document selection shared by document listing and annotation queries.
///
/// `pattern` is an SQLite GLOB over the stored relative path; `file_list` is
/// an explicit allow-list. Both must match when both are given; `invert`
/// negates the combined condition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentFilter {
    pub pattern: Option<String>,
    pub file_list: Option<Vec<String>>,
    pub invert: bool,
}

impl DocumentFilter {
    pub fn pattern(pattern: impl Into<String>) -> Self {
        Self {
            pattern: Some(pattern.into()),
            ..Self::default()
        }
    }

    pub fn files<I, S>(files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            file_list: Some(files.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Appends the SQL condition on `column`, binding values into `binds`.
    pub(crate) fn push_sql(&self, column: &str, sql: &mut String, binds: &mut Vec<Value>) {
        let mut clauses = Vec::new();
        if let Some(pattern) = &self.pattern {
            clauses.push(format!("{column} GLOB ?"));
            binds.push(Value::Text(pattern.clone()));
        }
        if let Some(files) = &self.file_list {
            clauses.push(in_clause(column, files, binds));
        }
        if clauses.is_empty() {
            if self.invert {
                sql.push_str(" AND 0");
            }
            return;
        }
        let combined = clauses.join(" AND ");
        if self.invert {
            sql.push_str(&format!(" AND NOT ({combined})"));
        } else {
            sql.push_str(&format!(" AND ({combined})"));
        }
    }
}

/// Annotation selection: codes, coders, and documents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnotationFilter {
    pub codes: Option<Vec<String>>,
    pub coders: Option<Vec<String>>,
    pub documents: DocumentFilter,
}

impl AnnotationFilter {
    pub fn codes<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            codes: Some(codes.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub(crate) fn push_sql(
        &self,
        code_column: &str,
        coder_column: &str,
        document_column: &str,
        sql: &mut String,
        binds: &mut Vec<Value>,
    ) {
        if let Some(codes) = &self.codes {
            sql.push_str(" AND ");
            sql.push_str(&in_clause(code_column, codes, binds));
        }
        if let Some(coders) = &self.coders {
            sql.push_str(" AND ");
            sql.push_str(&in_clause(coder_column, coders, binds));
        }
        self.documents.push_sql(document_column, sql, binds);
    }
}

/// `column IN (?, ?, ...)`; an empty list matches nothing.
fn in_clause(column: &str, values: &[String], binds: &mut Vec<Value>) -> String {
    if values.is_empty() {
        return "0".to_string();
    }
    let placeholders = vec!["?"; values.len()].join(", ");
    binds.extend(values.iter().cloned().map(Value::Text));
    format!("{column} IN ({placeholders})")
}

const REQUIRED_TABLES: [&str; 7] = [
    "document",
    "document_index",
    "location",
    "code",
    "coder",
    "coded_line",
    "coded_line_location",
];

fn ensure_connection_ready(conn: &Connection) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version = schema_version(conn)?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }
    for table in REQUIRED_TABLES {
        if !table_exists(conn, table)? {
            return Err(RepoError::MissingRequiredTable(table));
        }
    }
    Ok(())
}

/// Runs `body` inside a named savepoint: released on `Ok`, rolled back on `Err`.
fn with_savepoint<T>(
    conn: &Connection,
    name: &str,
    body: impl FnOnce() -> RepoResult<T>,
) -> RepoResult<T> {
    conn.execute_batch(&format!("SAVEPOINT {name};"))?;
    match body() {
        Ok(value) => {
            conn.execute_batch(&format!("RELEASE {name};"))?;
            Ok(value)
        }
        Err(err) => {
            conn.execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name};"))?;
            Err(err)
        }
    }
}
