//! File-system changes that ride along with one session transaction.
//!
//! # Invariants
//! - Staged writes reach their target only after the database commit.
//! - Removed paths are parked under a hidden staging directory and deleted
//!   only after the database commit; rollback puts them back.
//! - Moves happen immediately and are reverted on rollback, newest first.

use crate::service::error::{io_error, CorpusError, CorpusResult};
use log::warn;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use uuid::Uuid;

/// Hidden directory, inside the corpus, that holds parked removals.
pub const STAGING_DIR_NAME: &str = ".qc_staging";

const STAGED_FILE_PREFIX: &str = ".qc-staged-";

enum Staged {
    Write { file: NamedTempFile, target: PathBuf },
    Move { from: PathBuf, to: PathBuf },
    Remove { original: PathBuf, parked: PathBuf },
}

pub(crate) struct FileJournal {
    staging_dir: PathBuf,
    entries: Vec<Staged>,
}

impl FileJournal {
    pub(crate) fn new(staging_dir: PathBuf) -> Self {
        Self {
            staging_dir,
            entries: Vec::new(),
        }
    }

    /// Writes `contents` next to `target`; it replaces `target` at commit.
    pub(crate) fn stage_write(&mut self, target: &Path, contents: &str) -> CorpusResult<()> {
        let dir = target
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut file = tempfile::Builder::new()
            .prefix(STAGED_FILE_PREFIX)
            .tempfile_in(dir)
            .map_err(io_error(dir))?;
        let staged_path = file.path().to_path_buf();
        file.write_all(contents.as_bytes())
            .and_then(|()| file.flush())
            .map_err(io_error(staged_path))?;
        self.entries.push(Staged::Write {
            file,
            target: target.to_path_buf(),
        });
        Ok(())
    }

    /// Renames `from` to `to`, creating parent directories of `to`.
    pub(crate) fn move_path(&mut self, from: &Path, to: &Path) -> CorpusResult<()> {
        if let Some(parent) = to.parent() {
            std::fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
        std::fs::rename(from, to).map_err(io_error(from))?;
        self.entries.push(Staged::Move {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
        });
        Ok(())
    }

    /// Moves `path` (file or directory) out of the corpus until commit.
    pub(crate) fn park(&mut self, path: &Path) -> CorpusResult<()> {
        std::fs::create_dir_all(&self.staging_dir).map_err(io_error(&self.staging_dir))?;
        let parked = self.staging_dir.join(Uuid::new_v4().to_string());
        std::fs::rename(path, &parked).map_err(io_error(path))?;
        self.entries.push(Staged::Remove {
            original: path.to_path_buf(),
            parked,
        });
        Ok(())
    }

    /// Publishes staged writes and drops parked paths. Call after commit.
    ///
    /// Every entry is attempted; the first failed write is returned.
    pub(crate) fn commit(self) -> CorpusResult<()> {
        let mut first_error = None;
        for entry in self.entries {
            match entry {
                Staged::Write { file, target } => {
                    if let Err(err) = file.persist(&target) {
                        warn!(
                            "event=journal_commit module=service status=error path={} error={}",
                            target.display(),
                            err.error
                        );
                        first_error.get_or_insert(CorpusError::Io {
                            path: target,
                            source: err.error,
                        });
                    }
                }
                Staged::Move { .. } => {}
                Staged::Remove { parked, .. } => {
                    let removed = if parked.is_dir() {
                        std::fs::remove_dir_all(&parked)
                    } else {
                        std::fs::remove_file(&parked)
                    };
                    if let Err(err) = removed {
                        warn!(
                            "event=journal_commit module=service status=error path={} error={err}",
                            parked.display()
                        );
                    }
                }
            }
        }
        remove_staging_dir(&self.staging_dir);
        first_error.map_or(Ok(()), Err)
    }

    /// Reverts moves and removals, newest first, and discards staged writes.
    pub(crate) fn rollback(self) {
        for entry in self.entries.into_iter().rev() {
            let (current, original) = match entry {
                Staged::Write { .. } => continue,
                Staged::Move { from, to } => (to, from),
                Staged::Remove { original, parked } => (parked, original),
            };
            if let Err(err) = std::fs::rename(&current, &original) {
                warn!(
                    "event=journal_rollback module=service status=error path={} error={err}",
                    original.display()
                );
            }
        }
        remove_staging_dir(&self.staging_dir);
    }
}

fn remove_staging_dir(path: &Path) {
    // Fails while non-empty, which leaves unrecovered entries in place.
    let _ = std::fs::remove_dir(path);
}

#[cfg(test)]
mod tests {
    use super::FileJournal;
    use std::fs;

    #[test]
    fn staged_writes_appear_only_on_commit() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("codebook.yaml");
        fs::write(&target, "- old\n").unwrap();

        let mut journal = FileJournal::new(dir.path().join(".qc_staging"));
        journal.stage_write(&target, "- new\n").unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "- old\n");
        journal.commit().unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "- new\n");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn rollback_restores_moves_and_removals() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join(".qc_staging");
        fs::create_dir(dir.path().join("plays")).unwrap();
        fs::write(dir.path().join("plays/a.txt"), "a\n").unwrap();
        fs::write(dir.path().join("b.txt"), "b\n").unwrap();
        fs::write(dir.path().join("c.txt"), "c\n").unwrap();

        let mut journal = FileJournal::new(staging.clone());
        journal.park(&dir.path().join("plays")).unwrap();
        journal
            .move_path(&dir.path().join("b.txt"), &dir.path().join("moved/b.txt"))
            .unwrap();
        journal.stage_write(&dir.path().join("c.txt"), "changed\n").unwrap();
        assert!(!dir.path().join("plays").exists());
        journal.rollback();

        assert_eq!(fs::read_to_string(dir.path().join("plays/a.txt")).unwrap(), "a\n");
        assert_eq!(fs::read_to_string(dir.path().join("b.txt")).unwrap(), "b\n");
        assert_eq!(fs::read_to_string(dir.path().join("c.txt")).unwrap(), "c\n");
        assert!(!staging.exists());
    }

    #[test]
    fn commit_deletes_parked_directories() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join(".qc_staging");
        fs::create_dir(dir.path().join("plays")).unwrap();
        fs::write(dir.path().join("plays/a.txt"), "a\n").unwrap();

        let mut journal = FileJournal::new(staging.clone());
        journal.park(&dir.path().join("plays")).unwrap();
        journal.commit().unwrap();
        assert!(!dir.path().join("plays").exists());
        assert!(!staging.exists());
    }
}
