use qc_core::codebook::read_codebook;
use qc_core::repo::CodedLineChanges;
use qc_core::service::EditorRunner;
use qc_core::settings::editor::{CommandTemplate, EditorError, EditorResult, PlaceholderValues};
use qc_core::{CodedLineRequest, CodingWorkflow, Corpus, CorpusError, ErrorKind, Settings};
use std::cell::RefCell;
use std::fs;
use tempfile::TempDir;

/// Stands in for the editor: records the pre-filled side file, then
/// overwrites it with `reply`.
struct ScriptedEditor {
    reply: String,
    fail: bool,
    seen: RefCell<Option<String>>,
}

impl ScriptedEditor {
    fn replying(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            fail: false,
            seen: RefCell::new(None),
        }
    }

    fn crashing(reply: &str) -> Self {
        Self {
            fail: true,
            ..Self::replying(reply)
        }
    }
}

impl EditorRunner for ScriptedEditor {
    fn edit(&self, template: &CommandTemplate, values: &PlaceholderValues<'_>) -> EditorResult<()> {
        let codes_path = values.codes_file_path.expect("codes file placeholder");
        assert!(values.corpus_file_path.expect("corpus file").is_file());
        *self.seen.borrow_mut() = Some(fs::read_to_string(codes_path).unwrap());
        fs::write(codes_path, &self.reply).unwrap();
        if self.fail {
            return Err(EditorError::Failed {
                program: template.program().to_string(),
                status: Some(1),
            });
        }
        Ok(())
    }
}

fn project() -> (TempDir, Corpus) {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::initialize(dir.path()).unwrap();
    let mut corpus = Corpus::open(settings).unwrap();
    fs::write(
        corpus.settings().corpus_dir.join("macbeth.txt"),
        "when shall\nwe three\nmeet again\n",
    )
    .unwrap();
    corpus
        .session(|session| {
            session.register_document("macbeth.txt")?;
            session.update_coded_lines("macbeth.txt", "chris", &[CodedLineRequest::new(0, "witch")])
        })
        .unwrap();
    (dir, corpus)
}

fn chris_lines(corpus: &mut Corpus) -> Vec<CodedLineRequest> {
    corpus
        .session(|session| session.coded_lines("macbeth.txt", "chris"))
        .unwrap()
}

fn assert_no_session_files(corpus: &Corpus) {
    assert!(!corpus.settings().checkpoint_path().exists());
    assert!(!corpus.settings().codes_file_path().exists());
}

#[test]
fn coding_applies_the_edited_side_file() {
    let (_dir, mut corpus) = project();
    let editor = ScriptedEditor::replying("witch\n\nstorm, witch\n");
    let workflow = CodingWorkflow::new(editor);

    let changes = workflow
        .code_document(&mut corpus, "macbeth.txt", "chris")
        .unwrap();

    assert_eq!(changes, CodedLineChanges { added: 2, removed: 0 });
    assert_eq!(
        chris_lines(&mut corpus),
        vec![
            CodedLineRequest::new(0, "witch"),
            CodedLineRequest::new(2, "storm"),
            CodedLineRequest::new(2, "witch"),
        ]
    );
    assert_no_session_files(&corpus);
    assert!(read_codebook(&corpus.settings().codebook)
        .unwrap()
        .contains("storm"));
}

#[test]
fn side_file_is_prefilled_with_current_codes() {
    let (_dir, mut corpus) = project();
    let workflow = CodingWorkflow::new(ScriptedEditor::replying("\n\n\n"));

    let changes = workflow
        .code_document(&mut corpus, "macbeth.txt", "chris")
        .unwrap();

    assert_eq!(
        workflow_seen(&workflow),
        Some("witch\n\n\n".to_string())
    );
    assert_eq!(changes, CodedLineChanges { added: 0, removed: 1 });
    assert!(chris_lines(&mut corpus).is_empty());
}

fn workflow_seen(workflow: &CodingWorkflow<ScriptedEditor>) -> Option<String> {
    workflow.runner().seen.borrow().clone()
}

#[test]
fn editor_failure_leaves_a_recoverable_session() {
    let (_dir, mut corpus) = project();
    let crashing = CodingWorkflow::new(ScriptedEditor::crashing("witch\nwitch\n\n"));

    let err = crashing
        .code_document(&mut corpus, "macbeth.txt", "chris")
        .unwrap_err();
    assert!(matches!(err, CorpusError::Editor(_)));
    assert_eq!(chris_lines(&mut corpus), vec![CodedLineRequest::new(0, "witch")]);

    let pending = crashing.pending(&corpus).unwrap().unwrap();
    assert_eq!(pending.document, "macbeth.txt");
    assert_eq!(pending.coder, "chris");

    let blocked = crashing
        .code_document(&mut corpus, "macbeth.txt", "kate")
        .unwrap_err();
    assert_eq!(blocked.kind(), ErrorKind::Conflict);

    let changes = crashing.recover(&mut corpus).unwrap();
    assert_eq!(changes, CodedLineChanges { added: 1, removed: 0 });
    assert_eq!(
        chris_lines(&mut corpus),
        vec![
            CodedLineRequest::new(0, "witch"),
            CodedLineRequest::new(1, "witch"),
        ]
    );
    assert_no_session_files(&corpus);
}

#[test]
fn malformed_side_file_changes_nothing_until_abandoned() {
    let (_dir, mut corpus) = project();
    let workflow = CodingWorkflow::new(ScriptedEditor::replying("witch\nbad code!\n\n"));

    let err = workflow
        .code_document(&mut corpus, "macbeth.txt", "chris")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(chris_lines(&mut corpus), vec![CodedLineRequest::new(0, "witch")]);
    assert!(corpus.settings().checkpoint_path().exists());

    let abandoned = workflow.abandon(&corpus).unwrap();
    assert_eq!(abandoned.map(|checkpoint| checkpoint.coder), Some("chris".to_string()));
    assert_no_session_files(&corpus);
    assert_eq!(chris_lines(&mut corpus), vec![CodedLineRequest::new(0, "witch")]);
}

#[test]
fn truncated_side_file_is_rejected() {
    let (_dir, mut corpus) = project();
    let workflow = CodingWorkflow::new(ScriptedEditor::replying("witch\n"));

    let err = workflow
        .code_document(&mut corpus, "macbeth.txt", "chris")
        .unwrap_err();
    assert!(err.to_string().contains("codes file has 1 lines but the document has 3"));
}

#[test]
fn stray_side_file_blocks_coding() {
    let (_dir, mut corpus) = project();
    fs::write(corpus.settings().codes_file_path(), "leftover\n").unwrap();
    let workflow = CodingWorkflow::new(ScriptedEditor::replying("\n\n\n"));

    let err = workflow
        .code_document(&mut corpus, "macbeth.txt", "chris")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    assert_eq!(workflow.abandon(&corpus).unwrap(), None);
    assert_no_session_files(&corpus);
}

#[test]
fn recover_and_abandon_need_a_pending_session() {
    let (_dir, mut corpus) = project();
    let workflow = CodingWorkflow::new(ScriptedEditor::replying(""));

    assert_eq!(
        workflow.recover(&mut corpus).unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert_eq!(
        workflow.abandon(&corpus).unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

#[test]
fn unknown_documents_cannot_be_coded() {
    let (_dir, mut corpus) = project();
    let workflow = CodingWorkflow::new(ScriptedEditor::replying(""));

    let err = workflow
        .code_document(&mut corpus, "hamlet.txt", "chris")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_no_session_files(&corpus);
}
