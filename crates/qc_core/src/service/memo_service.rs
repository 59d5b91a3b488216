//! Free-form memos kept as Markdown files beside the corpus.
//!
//! # Invariants
//! - Memo files are named `YYYY-MM-DD-HH-MM_<coder>[_<title>].md` and never
//!   overwritten.
//! - A memo file stays on disk even when the editor fails.

use crate::coding::is_valid_code;
use crate::service::coding_service::{CodingWorkflow, EditorRunner};
use crate::service::error::{io_error, CorpusError, CorpusResult};
use crate::settings::editor::PlaceholderValues;
use crate::settings::Settings;
use chrono::{DateTime, Local, TimeZone};
use log::{info, warn};
use std::path::PathBuf;
use walkdir::WalkDir;

/// A memo file and its text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Memo {
    pub path: PathBuf,
    pub text: String,
}

impl<R: EditorRunner> CodingWorkflow<R> {
    /// Creates a memo for `coder` and opens it with the memo command.
    pub fn write_memo(
        &self,
        settings: &Settings,
        coder: &str,
        message: Option<&str>,
    ) -> CorpusResult<PathBuf> {
        self.write_memo_at(settings, coder, message, Local::now())
    }

    /// Like `write_memo` with an explicit clock reading.
    pub fn write_memo_at<Tz: TimeZone>(
        &self,
        settings: &Settings,
        coder: &str,
        message: Option<&str>,
        now: DateTime<Tz>,
    ) -> CorpusResult<PathBuf>
    where
        Tz::Offset: std::fmt::Display,
    {
        if !is_valid_code(coder) {
            return Err(CorpusError::InvalidCode(coder.to_string()));
        }
        let message = message.map(str::trim).filter(|message| !message.is_empty());
        let dir = &settings.memos_dir;
        std::fs::create_dir_all(dir).map_err(io_error(dir))?;

        let mut file_name = format!("{}_{coder}", now.format("%Y-%m-%d-%H-%M"));
        if let Some(message) = message {
            file_name.push('_');
            file_name.push_str(&title_slug(message));
        }
        file_name.push_str(".md");
        let path = dir.join(file_name);
        if path.exists() {
            return Err(CorpusError::TargetExists(path));
        }

        let stamp = now.format("%Y-%m-%d %H:%M");
        let heading = match message {
            Some(message) => format!("# {message}\n\n{coder} {stamp}\n\n"),
            None => format!("# Memo by {coder} on {stamp}\n\n"),
        };
        std::fs::write(&path, heading).map_err(io_error(&path))?;
        info!(
            "event=memo_write module=service status=ok coder={coder} path={}",
            path.display()
        );

        let values = PlaceholderValues {
            corpus_file_path: None,
            codes_file_path: None,
            memo_file_path: Some(&path),
        };
        if let Err(err) = self.runner().edit(&settings.editor.memo_command, &values) {
            warn!(
                "event=memo_edit module=service status=error path={} error={err}",
                path.display()
            );
            return Err(err.into());
        }
        Ok(path)
    }
}

/// Every memo in the memos directory, sorted by file name.
pub fn list_memos(settings: &Settings) -> CorpusResult<Vec<Memo>> {
    let dir = &settings.memos_dir;
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut memos = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|err| CorpusError::Io {
            path: dir.clone(),
            source: err.into(),
        })?;
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().map_or(true, |ext| ext != "md") {
            continue;
        }
        let text = std::fs::read_to_string(path).map_err(io_error(path))?;
        memos.push(Memo {
            path: path.to_path_buf(),
            text,
        });
    }
    Ok(memos)
}

fn title_slug(message: &str) -> String {
    message
        .to_lowercase()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::title_slug;

    #[test]
    fn titles_become_file_name_safe() {
        assert_eq!(title_slug("Storm Imagery"), "storm_imagery");
        assert_eq!(title_slug("why/how? v2"), "why_how__v2");
    }
}
