//! Service-level error type and its coarse classification.

use crate::codebook::CodebookError;
use crate::coding::{CheckpointError, CodesFileError};
use crate::db::DbError;
use crate::diff::DiffError;
use crate::model::annotation::UnknownUnit;
use crate::repo::RepoError;
use crate::service::corpus_service::ValidationReport;
use crate::settings::editor::EditorError;
use crate::settings::SettingsError;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub type CorpusResult<T> = Result<T, CorpusError>;

/// Coarse failure class for callers that only branch on category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed input: codebook, diff, settings, side file, names.
    Validation,
    /// Referenced document, file, or session is absent.
    NotFound,
    /// Duplicate registration, occupied target, or pending session.
    Conflict,
    /// Corpus files and stored documents disagree.
    Consistency,
    /// Database failure.
    Storage,
    /// File-system or process failure.
    Io,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Consistency => "consistency",
            Self::Storage => "storage",
            Self::Io => "io",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub enum CorpusError {
    Settings(SettingsError),
    Codebook(CodebookError),
    Diff(DiffError),
    CodesFile(CodesFileError),
    Checkpoint(CheckpointError),
    Editor(EditorError),
    Repo(RepoError),
    Db(DbError),
    Unit(UnknownUnit),
    /// Code name outside `[A-Za-z0-9_-]+`.
    InvalidCode(String),
    /// Path is absolute outside the corpus or escapes it with `..`.
    InvalidPath(String),
    FileNotFound(PathBuf),
    TargetExists(PathBuf),
    Consistency(ValidationReport),
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl CorpusError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Settings(_) | Self::Diff(_) | Self::Unit(_) => ErrorKind::Validation,
            Self::InvalidCode(_) | Self::InvalidPath(_) => ErrorKind::Validation,
            Self::Codebook(CodebookError::Io { .. }) => ErrorKind::Io,
            Self::Codebook(_) => ErrorKind::Validation,
            Self::CodesFile(CodesFileError::Io { .. }) => ErrorKind::Io,
            Self::CodesFile(_) => ErrorKind::Validation,
            Self::Checkpoint(err) => match err {
                CheckpointError::Pending { .. } | CheckpointError::StraySideFile(_) => {
                    ErrorKind::Conflict
                }
                CheckpointError::NothingPending => ErrorKind::NotFound,
                CheckpointError::Io { .. } => ErrorKind::Io,
                CheckpointError::Json(_) => ErrorKind::Validation,
            },
            Self::Editor(EditorError::Spawn { .. } | EditorError::Failed { .. }) => ErrorKind::Io,
            Self::Editor(_) => ErrorKind::Validation,
            Self::Repo(err) => match err {
                RepoError::DocumentNotFound(_) => ErrorKind::NotFound,
                RepoError::AlreadyExists(_) => ErrorKind::Conflict,
                RepoError::LineOutOfRange { .. } => ErrorKind::Validation,
                RepoError::InvalidData(_) => ErrorKind::Consistency,
                RepoError::Db(_)
                | RepoError::UninitializedConnection { .. }
                | RepoError::MissingRequiredTable(_) => ErrorKind::Storage,
            },
            Self::Db(_) => ErrorKind::Storage,
            Self::FileNotFound(_) => ErrorKind::NotFound,
            Self::TargetExists(_) => ErrorKind::Conflict,
            Self::Consistency(_) => ErrorKind::Consistency,
            Self::Io { .. } => ErrorKind::Io,
        }
    }
}

impl Display for CorpusError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Settings(err) => write!(f, "{err}"),
            Self::Codebook(err) => write!(f, "{err}"),
            Self::Diff(err) => write!(f, "{err}"),
            Self::CodesFile(err) => write!(f, "{err}"),
            Self::Checkpoint(err) => write!(f, "{err}"),
            Self::Editor(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::Unit(err) => write!(f, "{err}"),
            Self::InvalidCode(code) => write!(
                f,
                "invalid code `{code}`; codes may contain only letters, digits, _ and -"
            ),
            Self::InvalidPath(path) => write!(f, "path is not inside the corpus: {path}"),
            Self::FileNotFound(path) => write!(f, "file not found: {}", path.display()),
            Self::TargetExists(path) => write!(f, "target already exists: {}", path.display()),
            Self::Consistency(report) => write!(f, "{report}"),
            Self::Io { path, source } => write!(f, "{}: {source}", path.display()),
        }
    }
}

impl Error for CorpusError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Settings(err) => Some(err),
            Self::Codebook(err) => Some(err),
            Self::Diff(err) => Some(err),
            Self::CodesFile(err) => Some(err),
            Self::Checkpoint(err) => Some(err),
            Self::Editor(err) => Some(err),
            Self::Repo(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::Unit(err) => Some(err),
            Self::Io { source, .. } => Some(source),
            Self::InvalidCode(_)
            | Self::InvalidPath(_)
            | Self::FileNotFound(_)
            | Self::TargetExists(_)
            | Self::Consistency(_) => None,
        }
    }
}

macro_rules! corpus_error_from {
    ($($source:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$source> for CorpusError {
                fn from(value: $source) -> Self {
                    Self::$variant(value)
                }
            }
        )*
    };
}

corpus_error_from! {
    SettingsError => Settings,
    CodebookError => Codebook,
    DiffError => Diff,
    CodesFileError => CodesFile,
    CheckpointError => Checkpoint,
    EditorError => Editor,
    RepoError => Repo,
    DbError => Db,
    UnknownUnit => Unit,
}

impl From<rusqlite::Error> for CorpusError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

pub(crate) fn io_error(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> CorpusError {
    let path = path.into();
    move |source| CorpusError::Io { path, source }
}

#[cfg(test)]
mod tests {
    use super::{CorpusError, ErrorKind};
    use crate::coding::CheckpointError;
    use crate::repo::RepoError;

    #[test]
    fn kinds_follow_the_failure_taxonomy() {
        assert_eq!(
            CorpusError::from(RepoError::AlreadyExists("a.txt".into())).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            CorpusError::from(RepoError::DocumentNotFound("a.txt".into())).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            CorpusError::from(CheckpointError::Pending {
                document: "a.txt".into(),
                coder: "chris".into(),
            })
            .kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            CorpusError::InvalidCode("bad!".into()).kind(),
            ErrorKind::Validation
        );
    }
}
