//! External-editor coding sessions.
//!
//! # Responsibility
//! - Pre-fill the codes side file, launch the editor, apply the result.
//! - Keep a checkpoint on disk so an interrupted session can be recovered
//!   or abandoned.
//!
//! # Invariants
//! - Annotations change only after the edited side file parses completely.
//! - The side file and checkpoint are removed only after that commit.

use crate::coding::checkpoint::remove_if_exists;
use crate::coding::{parse_codes_file, render_codes_file, Checkpoint, CheckpointError, CodesFileError};
use crate::repo::{CodedLineChanges, RepoError};
use crate::service::corpus_service::Corpus;
use crate::service::error::{io_error, CorpusError, CorpusResult};
use crate::settings::editor::{CommandTemplate, EditorError, EditorResult, PlaceholderValues};
use log::{info, warn};
use std::path::Path;

/// Seam between the workflow and the process that edits the side file.
pub trait EditorRunner {
    /// Runs `template` with `values` and waits for it to exit.
    fn edit(&self, template: &CommandTemplate, values: &PlaceholderValues<'_>) -> EditorResult<()>;
}

/// Spawns the configured editor as a child process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEditorRunner;

impl EditorRunner for ProcessEditorRunner {
    fn edit(&self, template: &CommandTemplate, values: &PlaceholderValues<'_>) -> EditorResult<()> {
        let program = template.program().to_string();
        let status = template
            .to_command(values)?
            .status()
            .map_err(|source| EditorError::Spawn {
                program: program.clone(),
                source,
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(EditorError::Failed {
                program,
                status: status.code(),
            })
        }
    }
}

pub struct CodingWorkflow<R> {
    runner: R,
}

impl CodingWorkflow<ProcessEditorRunner> {
    pub fn with_process_editor() -> Self {
        Self::new(ProcessEditorRunner)
    }
}

impl<R: EditorRunner> CodingWorkflow<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// The unfinished session, if any.
    pub fn pending(&self, corpus: &Corpus) -> CorpusResult<Option<Checkpoint>> {
        Ok(Checkpoint::load(&corpus.settings().checkpoint_path())?)
    }

    /// Opens `document` for `coder` in the editor and stores the result.
    ///
    /// If the editor or the side file fails, the checkpoint stays behind for
    /// `recover` or `abandon`.
    pub fn code_document(
        &self,
        corpus: &mut Corpus,
        document: impl AsRef<Path>,
        coder: &str,
    ) -> CorpusResult<CodedLineChanges> {
        let settings = corpus.settings().clone();
        let checkpoint_path = settings.checkpoint_path();
        let codes_path = settings.codes_file_path();
        if let Some(pending) = Checkpoint::load(&checkpoint_path)? {
            return Err(pending.pending_error().into());
        }
        if codes_path.exists() {
            return Err(CheckpointError::StraySideFile(codes_path).into());
        }

        let document = document.as_ref();
        let (relative, side_file) = corpus.session(|session| {
            let relative = session.corpus_path(document)?;
            if session.get_document(&relative)?.is_none() {
                return Err(RepoError::DocumentNotFound(relative).into());
            }
            if !crate::coding::is_valid_code(coder) {
                return Err(CorpusError::InvalidCode(coder.to_string()));
            }
            let lines = session.document_line_count(&relative)?;
            let current = session.coded_lines(&relative, coder)?;
            Ok((relative, render_codes_file(lines, &current)))
        })?;

        std::fs::write(&codes_path, side_file).map_err(io_error(&codes_path))?;
        let checkpoint = Checkpoint::new(&relative, coder, &codes_path);
        checkpoint.save(&checkpoint_path)?;
        info!(
            "event=coding_start module=service status=ok document={relative} session_id={}",
            checkpoint.session_id
        );

        let corpus_file = settings.corpus_dir.join(&relative);
        let values = PlaceholderValues {
            corpus_file_path: Some(&corpus_file),
            codes_file_path: Some(&codes_path),
            memo_file_path: None,
        };
        if let Err(err) = self.runner.edit(&settings.editor.code_command, &values) {
            warn!(
                "event=coding_edit module=service status=error session_id={} error={err}",
                checkpoint.session_id
            );
            return Err(err.into());
        }

        apply_checkpoint(corpus, &checkpoint)
    }

    /// Applies the side file of the unfinished session.
    pub fn recover(&self, corpus: &mut Corpus) -> CorpusResult<CodedLineChanges> {
        let checkpoint = self
            .pending(corpus)?
            .ok_or(CheckpointError::NothingPending)?;
        info!(
            "event=coding_recover module=service status=start session_id={}",
            checkpoint.session_id
        );
        apply_checkpoint(corpus, &checkpoint)
    }

    /// Discards the unfinished session without touching annotations.
    ///
    /// A stray side file with no checkpoint is removed as well.
    pub fn abandon(&self, corpus: &Corpus) -> CorpusResult<Option<Checkpoint>> {
        let settings = corpus.settings();
        let checkpoint_path = settings.checkpoint_path();
        let checkpoint = Checkpoint::load(&checkpoint_path)?;
        let codes_path = checkpoint
            .as_ref()
            .map(|checkpoint| checkpoint.codes_file.clone())
            .unwrap_or_else(|| settings.codes_file_path());
        if checkpoint.is_none() && !codes_path.exists() {
            return Err(CheckpointError::NothingPending.into());
        }
        remove_if_exists(&codes_path)?;
        Checkpoint::clear(&checkpoint_path)?;
        info!(
            "event=coding_abandon module=service status=ok session_id={}",
            checkpoint
                .as_ref()
                .map(|checkpoint| checkpoint.session_id.to_string())
                .unwrap_or_else(|| "none".to_string())
        );
        Ok(checkpoint)
    }
}

fn apply_checkpoint(corpus: &mut Corpus, checkpoint: &Checkpoint) -> CorpusResult<CodedLineChanges> {
    let text = std::fs::read_to_string(&checkpoint.codes_file).map_err(|source| {
        CodesFileError::Io {
            path: checkpoint.codes_file.clone(),
            source,
        }
    })?;
    let changes = corpus.session(|session| {
        let lines = session.document_line_count(&checkpoint.document)?;
        let requested = parse_codes_file(&text, lines)?;
        session.update_coded_lines(&checkpoint.document, &checkpoint.coder, &requested)
    })?;

    remove_if_exists(&checkpoint.codes_file)?;
    Checkpoint::clear(&corpus.settings().checkpoint_path())?;
    info!(
        "event=coding_apply module=service status=ok session_id={} added={} removed={}",
        checkpoint.session_id, changes.added, changes.removed
    );
    Ok(changes)
}
