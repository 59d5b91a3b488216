//! Corpus use-case service: one explicit transaction per command.
//!
//! # Responsibility
//! - Own the database connection and settings for one project.
//! - Run every command inside `Corpus::session`, which commits on `Ok` and
//!   rolls back on `Err`.
//! - Keep corpus files, stored documents, and the codebook file in step.
//!
//! # Invariants
//! - Paths handed to repositories are corpus-relative and `/`-separated.
//! - Moves and removals refuse to run while the corpus is inconsistent.
//! - Out-of-band file edits are reported, never silently re-hashed.
//! - File changes made by a session (codebook, document text, moves,
//!   removals) are kept or undone together with its transaction.

use crate::codebook::{read_codebook, serialize, CodeTree};
use crate::coding::is_valid_code;
use crate::db::{open_db, open_db_in_memory};
use crate::diff::{reindex_with_diff, unified_diff_labeled};
use crate::model::annotation::{Annotation, AnnotationRow, CodedLineRequest, Unit};
use crate::model::document::{content_hash, line_count, Document, Location};
use crate::repo::{
    AnnotationFilter, AnnotationRepository, CodedLineChanges, DocumentFilter, DocumentRepository,
    RenameOutcome, SqliteAnnotationRepository, SqliteDocumentRepository,
};
use crate::service::error::{io_error, CorpusError, CorpusResult};
use crate::service::journal::{FileJournal, STAGING_DIR_NAME};
use crate::settings::Settings;
use log::{info, warn};
use rusqlite::{Connection, TransactionBehavior};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::path::{Component, Path};
use std::time::Instant;
use walkdir::WalkDir;

/// Diff context lines used when the service generates a diff itself.
const GENERATED_DIFF_CONTEXT: usize = 3;

/// Result of reconciling corpus files with stored documents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Files under the corpus directory with no document row.
    pub unregistered: Vec<String>,
    /// Document rows whose file is gone.
    pub missing: Vec<String>,
    /// Files whose content hash differs from the stored one.
    pub hash_mismatch: Vec<String>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.unregistered.is_empty() && self.missing.is_empty() && self.hash_mismatch.is_empty()
    }
}

impl Display for ValidationReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.is_clean() {
            return write!(f, "corpus is consistent");
        }
        write!(f, "corpus is inconsistent")?;
        for path in &self.unregistered {
            write!(f, "\n  unregistered file: {path}")?;
        }
        for path in &self.missing {
            write!(f, "\n  missing file: {path}")?;
        }
        for path in &self.hash_mismatch {
            write!(f, "\n  changed outside qc: {path}")?;
        }
        Ok(())
    }
}

/// Where the new version of a document comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateSource {
    /// Diff is generated from the current file to this text.
    NewText(String),
    /// Caller-supplied unified diff describing the change to `new_text`,
    /// e.g. from version control after an in-place edit.
    ExternalDiff { diff: String, new_text: String },
}

/// Outcome of `Session::update_document`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentUpdate {
    pub document: String,
    pub diff: String,
    /// Remapped annotations inside the new text.
    pub kept: Vec<Annotation>,
    /// Remapped annotations that fell outside the new text.
    pub dropped: Vec<Annotation>,
}

/// Project handle: settings plus an open annotation database.
pub struct Corpus {
    settings: Settings,
    conn: Connection,
}

impl Corpus {
    /// Opens the configured database, applying pending migrations.
    pub fn open(settings: Settings) -> CorpusResult<Self> {
        let conn = open_db(&settings.database)?;
        Ok(Self { settings, conn })
    }

    /// Uses an in-memory database with on-disk corpus and codebook.
    pub fn open_in_memory(settings: Settings) -> CorpusResult<Self> {
        let conn = open_db_in_memory()?;
        Ok(Self { settings, conn })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Runs `body` in one IMMEDIATE transaction.
    ///
    /// File changes staged by `body` are published after the commit and
    /// undone when `body` fails.
    pub fn session<T>(
        &mut self,
        body: impl FnOnce(&mut Session<'_>) -> CorpusResult<T>,
    ) -> CorpusResult<T> {
        let started_at = Instant::now();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut session = Session::begin(&tx, &self.settings)?;
        let result = body(&mut session).and_then(|value| {
            session.stage_codebook()?;
            Ok(value)
        });
        let journal = session.into_journal();
        match result {
            Ok(value) => {
                if let Err(err) = tx.commit() {
                    journal.rollback();
                    return Err(err.into());
                }
                journal.commit()?;
                info!(
                    "event=session_commit module=service status=ok duration_ms={}",
                    started_at.elapsed().as_millis()
                );
                Ok(value)
            }
            Err(err) => {
                journal.rollback();
                if let Err(rollback_err) = tx.rollback() {
                    warn!(
                        "event=session_rollback module=service status=error error={rollback_err}"
                    );
                }
                warn!(
                    "event=session_rollback module=service status=ok kind={} duration_ms={}",
                    err.kind(),
                    started_at.elapsed().as_millis()
                );
                Err(err)
            }
        }
    }
}

/// Everything a command may touch inside one transaction.
pub struct Session<'s> {
    settings: &'s Settings,
    documents: SqliteDocumentRepository<'s>,
    annotations: SqliteAnnotationRepository<'s>,
    codebook: CodeTree,
    codebook_changed: bool,
    journal: FileJournal,
}

impl<'s> Session<'s> {
    fn begin(conn: &'s Connection, settings: &'s Settings) -> CorpusResult<Self> {
        Ok(Self {
            settings,
            documents: SqliteDocumentRepository::try_new(conn)?,
            annotations: SqliteAnnotationRepository::try_new(conn)?,
            codebook: read_codebook(&settings.codebook)?,
            codebook_changed: false,
            journal: FileJournal::new(settings.corpus_dir.join(STAGING_DIR_NAME)),
        })
    }

    fn stage_codebook(&mut self) -> CorpusResult<()> {
        if self.codebook_changed {
            let text = serialize(&self.codebook)?;
            self.journal.stage_write(&self.settings.codebook, &text)?;
            self.codebook_changed = false;
        }
        Ok(())
    }

    fn into_journal(self) -> FileJournal {
        self.journal
    }

    pub fn settings(&self) -> &Settings {
        self.settings
    }

    /// Codebook as loaded at session start plus this session's changes.
    pub fn codebook(&self) -> &CodeTree {
        &self.codebook
    }

    /// Normalizes `path` to the stored corpus-relative key.
    ///
    /// Accepts paths relative to the corpus directory, paths that start with
    /// the corpus directory, and absolute paths inside it.
    pub fn corpus_path(&self, path: impl AsRef<Path>) -> CorpusResult<String> {
        let path = path.as_ref();
        let invalid = || CorpusError::InvalidPath(path.display().to_string());
        let corpus_dir = &self.settings.corpus_dir;
        let relative: &Path = if let Ok(inner) = path.strip_prefix(corpus_dir) {
            inner
        } else if path.is_absolute() {
            return Err(invalid());
        } else {
            corpus_dir
                .strip_prefix(&self.settings.project_dir)
                .ok()
                .filter(|prefix| !prefix.as_os_str().is_empty())
                .and_then(|prefix| path.strip_prefix(prefix).ok())
                .unwrap_or(path)
        };

        let mut parts = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_str().ok_or_else(invalid)?.to_string()),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(invalid())
                }
            }
        }
        if parts.is_empty() {
            return Err(invalid());
        }
        Ok(parts.join("/"))
    }

    /// Registers an existing corpus file.
    pub fn register_document(&mut self, path: impl AsRef<Path>) -> CorpusResult<Document> {
        let relative = self.corpus_path(path)?;
        let text = self.read_corpus_file(&relative)?;
        Ok(self.documents.register_document(&relative, &text)?)
    }

    pub fn get_document(&self, path: impl AsRef<Path>) -> CorpusResult<Option<Document>> {
        let relative = self.corpus_path(path)?;
        Ok(self.documents.get_document(&relative)?)
    }

    pub fn list_documents(&self, filter: &DocumentFilter) -> CorpusResult<Vec<Document>> {
        Ok(self.documents.list_documents(filter)?)
    }

    pub fn document_line_count(&self, path: impl AsRef<Path>) -> CorpusResult<i64> {
        let relative = self.corpus_path(path)?;
        Ok(self.documents.line_count(&relative)?)
    }

    pub fn paragraphs(&self, path: impl AsRef<Path>) -> CorpusResult<Vec<Location>> {
        let relative = self.corpus_path(path)?;
        Ok(self.documents.paragraphs(&relative)?)
    }

    pub fn list_coders(&self) -> CorpusResult<Vec<String>> {
        Ok(self.annotations.list_coders()?)
    }

    pub fn list_codes(&self) -> CorpusResult<Vec<String>> {
        Ok(self.annotations.list_codes()?)
    }

    pub fn get_or_create_coder(&self, name: &str) -> CorpusResult<String> {
        validate_name(name)?;
        Ok(self.annotations.get_or_create_coder(name)?)
    }

    pub fn get_or_create_code(&self, name: &str) -> CorpusResult<String> {
        validate_name(name)?;
        Ok(self.annotations.get_or_create_code(name)?)
    }

    /// One coder's annotations of one document.
    pub fn coded_lines(
        &self,
        path: impl AsRef<Path>,
        coder: &str,
    ) -> CorpusResult<Vec<CodedLineRequest>> {
        let relative = self.corpus_path(path)?;
        Ok(self.annotations.coded_lines(&relative, coder)?)
    }

    /// Replaces one coder's annotations of one document, then registers new
    /// code names in the codebook.
    pub fn update_coded_lines(
        &mut self,
        path: impl AsRef<Path>,
        coder: &str,
        requested: &[CodedLineRequest],
    ) -> CorpusResult<CodedLineChanges> {
        let relative = self.corpus_path(path)?;
        validate_name(coder)?;
        for request in requested {
            validate_name(&request.code)?;
        }
        let changes = self
            .annotations
            .update_coded_lines(&relative, coder, requested)?;
        self.update_codebook()?;
        Ok(changes)
    }

    /// Annotation rows at `unit`.
    pub fn annotations(
        &self,
        unit: Unit,
        filter: &AnnotationFilter,
    ) -> CorpusResult<Vec<AnnotationRow>> {
        Ok(self.annotations.annotations(unit, filter)?)
    }

    /// Line-level annotations, sorted by document then line.
    pub fn line_annotations(&self, filter: &AnnotationFilter) -> CorpusResult<Vec<Annotation>> {
        Ok(self.annotations.line_annotations(filter)?)
    }

    /// Distinct unit instances per code.
    pub fn count_codes(
        &self,
        unit: Unit,
        filter: &AnnotationFilter,
    ) -> CorpusResult<BTreeMap<String, u64>> {
        Ok(self.annotations.count_codes(unit, filter)?)
    }

    /// Adds every stored code missing from the codebook as a top-level code.
    /// The codebook file is rewritten at commit when it changed. Returns the
    /// added names.
    pub fn update_codebook(&mut self) -> CorpusResult<Vec<String>> {
        let known = self.codebook.names();
        let added: Vec<String> = self
            .annotations
            .list_codes()?
            .into_iter()
            .filter(|code| !known.contains(code))
            .collect();
        if added.is_empty() {
            return Ok(added);
        }
        for code in &added {
            self.codebook.add_code(code.clone());
        }
        self.codebook_changed = true;
        info!(
            "event=codebook_update module=service status=ok added={}",
            added.len()
        );
        Ok(added)
    }

    /// Renames `old_names` to `new_name` in annotations and, when the rename
    /// is unscoped, at every codebook position.
    ///
    /// Renamed nodes that end up next to a sibling already called `new_name`
    /// are merged into it.
    pub fn rename_codes(
        &mut self,
        old_names: &[String],
        new_name: &str,
        scope: &AnnotationFilter,
    ) -> CorpusResult<RenameOutcome> {
        validate_name(new_name)?;
        let outcome = self.annotations.rename_codes(old_names, new_name, scope)?;

        let unscoped = scope.coders.is_none() && scope.documents == DocumentFilter::default();
        if unscoped {
            for old in old_names.iter().filter(|old| old.as_str() != new_name) {
                if self.codebook.rename(old, new_name) > 0 {
                    self.codebook.merge_siblings_named(new_name);
                    self.codebook_changed = true;
                }
            }
            self.annotations.delete_unused_codes(old_names)?;
        }
        self.update_codebook()?;
        Ok(outcome)
    }

    /// Reconciles the corpus directory with stored documents.
    pub fn validate_corpus_paths(&self) -> CorpusResult<ValidationReport> {
        let corpus_dir = &self.settings.corpus_dir;
        let mut on_disk = BTreeSet::new();
        if corpus_dir.is_dir() {
            for entry in WalkDir::new(corpus_dir)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.file_name()))
            {
                let entry = entry.map_err(|err| CorpusError::Io {
                    path: corpus_dir.clone(),
                    source: err.into(),
                })?;
                if entry.file_type().is_file() {
                    on_disk.insert(self.corpus_path(entry.path())?);
                }
            }
        }

        let mut report = ValidationReport::default();
        let mut registered = BTreeSet::new();
        for document in self.documents.list_documents(&DocumentFilter::default())? {
            registered.insert(document.file_path.clone());
            if !on_disk.contains(&document.file_path) {
                report.missing.push(document.file_path);
                continue;
            }
            let path = corpus_dir.join(&document.file_path);
            let bytes = std::fs::read(&path).map_err(io_error(&path))?;
            if content_hash(&bytes) != document.file_hash {
                report.hash_mismatch.push(document.file_path);
            }
        }
        report.unregistered = on_disk.difference(&registered).cloned().collect();

        info!(
            "event=corpus_validate module=service status=ok unregistered={} missing={} hash_mismatch={}",
            report.unregistered.len(),
            report.missing.len(),
            report.hash_mismatch.len()
        );
        Ok(report)
    }

    /// Fails with a consistency error unless the corpus validates cleanly.
    pub fn ensure_consistent(&self) -> CorpusResult<()> {
        let report = self.validate_corpus_paths()?;
        if report.is_clean() {
            Ok(())
        } else {
            Err(CorpusError::Consistency(report))
        }
    }

    /// Moves a document (or, with `recursive`, a directory of documents) in
    /// the store and on disk. Returns `(old, new)` path pairs.
    pub fn move_document(
        &mut self,
        from: impl AsRef<Path>,
        to: impl AsRef<Path>,
        recursive: bool,
    ) -> CorpusResult<Vec<(String, String)>> {
        self.ensure_consistent()?;
        let from = self.corpus_path(from)?;
        let to = self.corpus_path(to)?;
        let from_path = self.settings.corpus_dir.join(&from);
        let to_path = self.settings.corpus_dir.join(&to);
        if !from_path.exists() {
            return Err(CorpusError::FileNotFound(from_path));
        }
        if to_path.exists() {
            return Err(CorpusError::TargetExists(to_path));
        }

        let moved = if recursive {
            self.documents.move_documents_under(&from, &to)?
        } else {
            self.documents.move_document(&from, &to)?;
            vec![(from, to)]
        };
        self.journal.move_path(&from_path, &to_path)?;
        info!(
            "event=corpus_move module=service status=ok recursive={recursive} documents={}",
            moved.len()
        );
        Ok(moved)
    }

    /// Removes a document (or a directory of documents) from the store and
    /// from disk, together with all of its annotations.
    pub fn remove_document(
        &mut self,
        path: impl AsRef<Path>,
        recursive: bool,
    ) -> CorpusResult<Vec<String>> {
        self.ensure_consistent()?;
        let relative = self.corpus_path(path)?;
        let absolute = self.settings.corpus_dir.join(&relative);
        if !absolute.exists() {
            return Err(CorpusError::FileNotFound(absolute));
        }

        let removed = if recursive {
            self.documents.remove_documents_under(&relative)?
        } else {
            self.documents.remove_document(&relative)?;
            vec![relative]
        };
        self.journal.park(&absolute)?;
        info!(
            "event=corpus_remove module=service status=ok recursive={recursive} documents={}",
            removed.len()
        );
        Ok(removed)
    }

    /// Replaces a document's text and carries its annotations across the
    /// change. With `dry_run`, nothing is written.
    pub fn update_document(
        &mut self,
        path: impl AsRef<Path>,
        source: UpdateSource,
        dry_run: bool,
    ) -> CorpusResult<DocumentUpdate> {
        let relative = self.corpus_path(path)?;
        if self.documents.get_document(&relative)?.is_none() {
            return Err(crate::repo::RepoError::DocumentNotFound(relative).into());
        }
        let (diff, new_text) = match source {
            UpdateSource::NewText(new_text) => {
                let old_text = self.read_corpus_file(&relative)?;
                let diff = unified_diff_labeled(
                    &old_text,
                    &new_text,
                    &relative,
                    &relative,
                    GENERATED_DIFF_CONTEXT,
                );
                (diff, new_text)
            }
            UpdateSource::ExternalDiff { diff, new_text } => (diff, new_text),
        };

        let existing = self
            .annotations
            .line_annotations(&AnnotationFilter {
                documents: DocumentFilter::files([relative.clone()]),
                ..AnnotationFilter::default()
            })?;
        let new_count = line_count(&new_text);
        let (kept, dropped): (Vec<Annotation>, Vec<Annotation>) =
            reindex_with_diff(&existing, &diff)?
                .into_iter()
                .partition(|annotation| 0 <= annotation.line && annotation.line < new_count);

        if !dry_run {
            let absolute = self.settings.corpus_dir.join(&relative);
            self.journal.stage_write(&absolute, &new_text)?;
            self.documents.reseed_paragraphs(&relative, &new_text)?;

            let mut by_coder: BTreeMap<&str, Vec<CodedLineRequest>> = BTreeMap::new();
            for annotation in &existing {
                by_coder.entry(annotation.coder.as_str()).or_default();
            }
            for annotation in &kept {
                by_coder
                    .entry(annotation.coder.as_str())
                    .or_default()
                    .push(CodedLineRequest::new(annotation.line, annotation.code.clone()));
            }
            for (coder, requests) in by_coder {
                self.annotations
                    .update_coded_lines(&relative, coder, &requests)?;
            }
            self.annotations.delete_unused_codes(
                &dropped
                    .iter()
                    .map(|annotation| annotation.code.clone())
                    .collect::<Vec<_>>(),
            )?;
        }

        info!(
            "event=document_update module=service status=ok dry_run={dry_run} kept={} dropped={}",
            kept.len(),
            dropped.len()
        );
        Ok(DocumentUpdate {
            document: relative,
            diff,
            kept,
            dropped,
        })
    }

    pub(crate) fn read_corpus_file(&self, relative: &str) -> CorpusResult<String> {
        let path = self.settings.corpus_dir.join(relative);
        if !path.is_file() {
            return Err(CorpusError::FileNotFound(path));
        }
        std::fs::read_to_string(&path).map_err(io_error(path))
    }
}

fn validate_name(name: &str) -> CorpusResult<()> {
    if is_valid_code(name) {
        Ok(())
    } else {
        Err(CorpusError::InvalidCode(name.to_string()))
    }
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|name| name.starts_with('.'))
}
