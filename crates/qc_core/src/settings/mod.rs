//! Project settings file (`settings.yaml`).
//!
//! # Responsibility
//! - Load and validate project settings, resolving relative paths against
//!   the directory that holds the settings file.
//! - Initialize a fresh project layout with defaults.
//!
//! # Invariants
//! - A loaded `Settings` always carries a validated editor profile.
//! - Every path in a loaded `Settings` is absolute.

pub mod editor;

use crate::logging::{default_log_level, normalize_level};
use editor::{resolve_profile, EditorError, EditorProfile, EditorProfileConfig};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

pub const SETTINGS_FILE_NAME: &str = "settings.yaml";
pub const CHECKPOINT_FILE_NAME: &str = ".coding_session";
pub const CODES_FILE_NAME: &str = "codes.txt";
pub const DEFAULT_EDITOR: &str = "vim";
pub const DEFAULT_MEMOS_DIR: &str = "memos";
const EMPTY_CODEBOOK: &str = "[]\n";

pub type SettingsResult<T> = Result<T, SettingsError>;

#[derive(Debug)]
pub enum SettingsError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Yaml(serde_yaml::Error),
    MissingKey(&'static str),
    InvalidValue {
        key: &'static str,
        message: String,
    },
    Editor(EditorError),
}

impl Display for SettingsError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "settings file `{}`: {source}", path.display())
            }
            Self::Yaml(err) => write!(f, "invalid settings yaml: {err}"),
            Self::MissingKey(key) => write!(f, "Expected '{key}' in settings"),
            Self::InvalidValue { key, message } => write!(f, "invalid '{key}': {message}"),
            Self::Editor(err) => write!(f, "invalid editor settings: {err}"),
        }
    }
}

impl Error for SettingsError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Yaml(err) => Some(err),
            Self::Editor(err) => Some(err),
            Self::MissingKey(_) | Self::InvalidValue { .. } => None,
        }
    }
}

impl From<serde_yaml::Error> for SettingsError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::Yaml(value)
    }
}

impl From<EditorError> for SettingsError {
    fn from(value: EditorError) -> Self {
        Self::Editor(value)
    }
}

/// Settings exactly as written on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SettingsFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    corpus_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    codebook: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    database: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    logs_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    memos_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    log_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    editor: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    editors: BTreeMap<String, EditorProfileConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    qc_version: Option<String>,
}

impl SettingsFile {
    fn defaults() -> Self {
        Self {
            corpus_dir: Some(PathBuf::from("corpus")),
            codebook: Some(PathBuf::from("codebook.yaml")),
            database: Some(PathBuf::from("qc.db")),
            logs_dir: Some(PathBuf::from("logs")),
            memos_dir: Some(PathBuf::from(DEFAULT_MEMOS_DIR)),
            log_level: None,
            editor: Some(DEFAULT_EDITOR.to_string()),
            editors: BTreeMap::new(),
            qc_version: Some(env!("CARGO_PKG_VERSION").to_string()),
        }
    }
}

/// Validated project settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub project_dir: PathBuf,
    pub corpus_dir: PathBuf,
    pub codebook: PathBuf,
    pub database: PathBuf,
    pub logs_dir: PathBuf,
    /// Optional in the file; defaults to `memos` under the project.
    pub memos_dir: PathBuf,
    pub log_level: &'static str,
    pub editor: EditorProfile,
    pub qc_version: Option<String>,
}

impl Settings {
    /// Reads and validates the settings file at `path`.
    pub fn load(path: &Path) -> SettingsResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let project_dir = absolute_parent(path)?;
        Self::from_yaml(&text, &project_dir)
    }

    /// Validates settings text; relative paths resolve against `project_dir`.
    pub fn from_yaml(text: &str, project_dir: &Path) -> SettingsResult<Self> {
        let raw: SettingsFile = if text.trim().is_empty() {
            SettingsFile::default()
        } else {
            serde_yaml::from_str(text)?
        };

        let resolve = |value: Option<PathBuf>, key: &'static str| -> SettingsResult<PathBuf> {
            let value = value.ok_or(SettingsError::MissingKey(key))?;
            Ok(if value.is_absolute() {
                value
            } else {
                project_dir.join(value)
            })
        };
        let corpus_dir = resolve(raw.corpus_dir, "corpus_dir")?;
        let codebook = resolve(raw.codebook, "codebook")?;
        let database = resolve(raw.database, "database")?;
        let logs_dir = resolve(raw.logs_dir, "logs_dir")?;
        let memos_dir = resolve(
            raw.memos_dir.or_else(|| Some(PathBuf::from(DEFAULT_MEMOS_DIR))),
            "memos_dir",
        )?;

        let log_level = match raw.log_level.as_deref() {
            Some(level) => normalize_level(level).map_err(|err| SettingsError::InvalidValue {
                key: "log_level",
                message: err.to_string(),
            })?,
            None => default_log_level(),
        };
        let editor_name = raw.editor.as_deref().unwrap_or(DEFAULT_EDITOR);
        let editor = resolve_profile(editor_name, &raw.editors)?;

        Ok(Self {
            project_dir: project_dir.to_path_buf(),
            corpus_dir,
            codebook,
            database,
            logs_dir,
            memos_dir,
            log_level,
            editor,
            qc_version: raw.qc_version,
        })
    }

    /// Creates `settings.yaml`, the corpus and logs directories, and an empty
    /// codebook under `project_dir` where absent, then loads the result.
    pub fn initialize(project_dir: &Path) -> SettingsResult<Self> {
        create_dir(project_dir)?;
        let settings_path = project_dir.join(SETTINGS_FILE_NAME);
        if !settings_path.exists() {
            let text = serde_yaml::to_string(&SettingsFile::defaults())?;
            write_file(&settings_path, &text)?;
            info!(
                "event=settings_init module=settings status=ok path={}",
                settings_path.display()
            );
        }

        let settings = Self::load(&settings_path)?;
        create_dir(&settings.corpus_dir)?;
        create_dir(&settings.logs_dir)?;
        if !settings.codebook.exists() {
            write_file(&settings.codebook, EMPTY_CODEBOOK)?;
        }
        Ok(settings)
    }

    pub fn settings_path(&self) -> PathBuf {
        self.project_dir.join(SETTINGS_FILE_NAME)
    }

    /// Location of the in-flight coding checkpoint.
    pub fn checkpoint_path(&self) -> PathBuf {
        self.project_dir.join(CHECKPOINT_FILE_NAME)
    }

    /// Location of the editor side file.
    pub fn codes_file_path(&self) -> PathBuf {
        self.project_dir.join(CODES_FILE_NAME)
    }
}

fn absolute_parent(path: &Path) -> SettingsResult<PathBuf> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    if parent.is_absolute() {
        return Ok(parent);
    }
    let cwd = std::env::current_dir().map_err(|source| SettingsError::Io {
        path: parent.clone(),
        source,
    })?;
    Ok(cwd.join(parent))
}

fn create_dir(path: &Path) -> SettingsResult<()> {
    std::fs::create_dir_all(path).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn write_file(path: &Path, text: &str) -> SettingsResult<()> {
    std::fs::write(path, text).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })
}
