//! Recoverable record of an in-flight coding session.
//!
//! # Invariants
//! - A checkpoint is written before the editor starts and removed only after
//!   the resulting annotations commit.
//! - While a checkpoint exists, no new coding session may start.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub type CheckpointResult<T> = Result<T, CheckpointError>;

#[derive(Debug)]
pub enum CheckpointError {
    /// A previous session must be recovered or abandoned first.
    Pending { document: String, coder: String },
    /// A stray side file exists without a checkpoint.
    StraySideFile(PathBuf),
    /// Recover or abandon was requested with nothing pending.
    NothingPending,
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Json(serde_json::Error),
}

impl Display for CheckpointError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending { document, coder } => write!(
                f,
                "an unfinished coding session exists for {document} (coder {coder}); recover or abandon it first"
            ),
            Self::StraySideFile(path) => write!(
                f,
                "a codes file from an unfinished session exists at {}; abandon it first",
                path.display()
            ),
            Self::NothingPending => write!(f, "no unfinished coding session"),
            Self::Io { path, source } => {
                write!(f, "checkpoint `{}`: {source}", path.display())
            }
            Self::Json(err) => write!(f, "invalid checkpoint: {err}"),
        }
    }
}

impl Error for CheckpointError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for CheckpointError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

/// Persisted session record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub session_id: Uuid,
    pub document: String,
    pub coder: String,
    pub codes_file: PathBuf,
    pub started_at_ms: i64,
}

impl Checkpoint {
    pub fn new(document: &str, coder: &str, codes_file: &Path) -> Self {
        let started_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as i64)
            .unwrap_or(0);
        Self {
            session_id: Uuid::new_v4(),
            document: document.to_string(),
            coder: coder.to_string(),
            codes_file: codes_file.to_path_buf(),
            started_at_ms,
        }
    }

    /// Loads the checkpoint at `path`, if any.
    pub fn load(path: &Path) -> CheckpointResult<Option<Self>> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(CheckpointError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn save(&self, path: &Path) -> CheckpointResult<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text).map_err(|source| CheckpointError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Removes `path`; a missing file is not an error.
    pub fn clear(path: &Path) -> CheckpointResult<()> {
        remove_if_exists(path)
    }

    pub fn pending_error(&self) -> CheckpointError {
        CheckpointError::Pending {
            document: self.document.clone(),
            coder: self.coder.clone(),
        }
    }
}

pub(crate) fn remove_if_exists(path: &Path) -> CheckpointResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(CheckpointError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}
