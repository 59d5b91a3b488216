use qc_core::codebook::{parse, read_codebook};
use qc_core::repo::{AnnotationFilter, DocumentFilter};
use qc_core::{
    CodedLineRequest, Corpus, CorpusError, ErrorKind, Settings, UpdateSource, ValidationReport,
};
use std::fs;
use tempfile::TempDir;

fn project() -> (TempDir, Corpus) {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::initialize(dir.path()).unwrap();
    let corpus = Corpus::open(settings).unwrap();
    (dir, corpus)
}

fn write(corpus: &Corpus, relative: &str, text: &str) {
    let path = corpus.settings().corpus_dir.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, text).unwrap();
}

fn register(corpus: &mut Corpus, relative: &str, text: &str) {
    write(corpus, relative, text);
    corpus
        .session(|session| session.register_document(relative))
        .unwrap();
}

fn lines(corpus: &mut Corpus, relative: &str, coder: &str) -> Vec<CodedLineRequest> {
    corpus
        .session(|session| session.coded_lines(relative, coder))
        .unwrap()
}

#[test]
fn paths_are_normalized_to_corpus_relative_keys() {
    let (_dir, mut corpus) = project();
    let corpus_dir = corpus.settings().corpus_dir.clone();

    corpus
        .session(|session| {
            assert_eq!(session.corpus_path("plays/macbeth.txt")?, "plays/macbeth.txt");
            assert_eq!(session.corpus_path("corpus/plays/macbeth.txt")?, "plays/macbeth.txt");
            assert_eq!(session.corpus_path("./macbeth.txt")?, "macbeth.txt");
            assert_eq!(
                session.corpus_path(corpus_dir.join("macbeth.txt"))?,
                "macbeth.txt"
            );
            assert!(matches!(
                session.corpus_path("../secrets.txt"),
                Err(CorpusError::InvalidPath(_))
            ));
            assert!(matches!(
                session.corpus_path("/etc/passwd"),
                Err(CorpusError::InvalidPath(_))
            ));
            Ok(())
        })
        .unwrap();
}

#[test]
fn registering_a_missing_file_fails() {
    let (_dir, mut corpus) = project();

    let err = corpus
        .session(|session| session.register_document("ghost.txt"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn a_failed_session_rolls_back_everything() {
    let (_dir, mut corpus) = project();
    write(&corpus, "macbeth.txt", "when shall\nwe three\n");

    let err = corpus
        .session(|session| {
            session.register_document("macbeth.txt")?;
            session.update_coded_lines(
                "macbeth.txt",
                "chris",
                &[CodedLineRequest::new(0, "not a code")],
            )
        })
        .unwrap_err();
    assert!(matches!(err, CorpusError::InvalidCode(_)));

    let listed = corpus
        .session(|session| session.list_documents(&DocumentFilter::default()))
        .unwrap();
    assert!(listed.is_empty());
}

#[test]
fn a_failed_session_leaves_the_codebook_file_untouched() {
    let (_dir, mut corpus) = project();
    let before = fs::read_to_string(&corpus.settings().codebook).unwrap();
    write(&corpus, "m.txt", "thunder
lightning
");

    let err = corpus
        .session(|session| {
            session.register_document("m.txt")?;
            session.update_coded_lines("m.txt", "chris", &[CodedLineRequest::new(0, "storm")])?;
            Err::<(), _>(CorpusError::InvalidCode("storm!".into()))
        })
        .unwrap_err();
    assert!(matches!(err, CorpusError::InvalidCode(_)));

    let after = fs::read_to_string(&corpus.settings().codebook).unwrap();
    assert_eq!(after, before);
    assert!(!after.contains("storm"));
}

#[test]
fn a_failed_session_restores_a_recursively_removed_directory() {
    let (_dir, mut corpus) = project();
    register(&mut corpus, "plays/macbeth.txt", "when shall
we three
");
    register(&mut corpus, "plays/acts/hamlet.txt", "to be
");
    corpus
        .session(|session| {
            session.update_coded_lines(
                "plays/macbeth.txt",
                "chris",
                &[CodedLineRequest::new(1, "witch")],
            )
        })
        .unwrap();
    let corpus_dir = corpus.settings().corpus_dir.clone();

    corpus
        .session(|session| {
            let removed = session.remove_document("plays", true)?;
            assert_eq!(removed.len(), 2);
            assert!(!corpus_dir.join("plays").exists());
            Err::<(), _>(CorpusError::InvalidPath("abort".into()))
        })
        .unwrap_err();

    assert_eq!(
        fs::read_to_string(corpus_dir.join("plays/macbeth.txt")).unwrap(),
        "when shall\nwe three\n"
    );
    assert_eq!(
        fs::read_to_string(corpus_dir.join("plays/acts/hamlet.txt")).unwrap(),
        "to be\n"
    );
    assert!(!corpus_dir.join(".qc_staging").exists());
    assert_eq!(
        lines(&mut corpus, "plays/macbeth.txt", "chris"),
        vec![CodedLineRequest::new(1, "witch")]
    );
    let report = corpus
        .session(|session| session.validate_corpus_paths())
        .unwrap();
    assert!(report.is_clean(), "{report}");
}

#[test]
fn a_failed_session_undoes_moves_and_text_updates() {
    let (_dir, mut corpus) = project();
    register(&mut corpus, "a.txt", "a\n");
    register(&mut corpus, "letters.txt", "x\ny\n");
    let corpus_dir = corpus.settings().corpus_dir.clone();

    corpus
        .session(|session| {
            session.move_document("a.txt", "nested/b.txt", false)?;
            session.update_document(
                "letters.txt",
                UpdateSource::NewText("x\nz\n".to_string()),
                false,
            )?;
            Err::<(), _>(CorpusError::InvalidPath("abort".into()))
        })
        .unwrap_err();

    assert!(corpus_dir.join("a.txt").is_file());
    assert!(!corpus_dir.join("nested/b.txt").exists());
    assert_eq!(
        fs::read_to_string(corpus_dir.join("letters.txt")).unwrap(),
        "x\ny\n"
    );
    let report = corpus
        .session(|session| session.validate_corpus_paths())
        .unwrap();
    assert!(report.is_clean(), "{report}");
}

#[test]
fn new_codes_are_appended_to_the_codebook() {
    let (_dir, mut corpus) = project();
    fs::write(&corpus.settings().codebook, "- creature:\n    - witch\n").unwrap();
    register(&mut corpus, "macbeth.txt", "when shall\nwe three\nmeet again\n");

    corpus
        .session(|session| {
            session.update_coded_lines(
                "macbeth.txt",
                "chris",
                &[
                    CodedLineRequest::new(0, "witch"),
                    CodedLineRequest::new(2, "storm"),
                ],
            )
        })
        .unwrap();

    let tree = read_codebook(&corpus.settings().codebook).unwrap();
    assert_eq!(
        tree.flatten_names(None, true),
        vec!["creature", "creature:witch", "storm"]
    );
}

#[test]
fn validation_reports_unregistered_missing_and_changed_files() {
    let (_dir, mut corpus) = project();
    register(&mut corpus, "macbeth.txt", "when shall\n");
    register(&mut corpus, "hamlet.txt", "to be\n");
    write(&corpus, "plays/lear.txt", "nothing\n");
    write(&corpus, ".notes/private.txt", "hidden\n");

    let report = corpus
        .session(|session| session.validate_corpus_paths())
        .unwrap();
    assert_eq!(
        report,
        ValidationReport {
            unregistered: vec!["plays/lear.txt".to_string()],
            missing: vec![],
            hash_mismatch: vec![],
        }
    );

    write(&corpus, "macbeth.txt", "when shall we\n");
    fs::remove_file(corpus.settings().corpus_dir.join("hamlet.txt")).unwrap();
    let report = corpus
        .session(|session| session.validate_corpus_paths())
        .unwrap();
    assert_eq!(report.missing, vec!["hamlet.txt"]);
    assert_eq!(report.hash_mismatch, vec!["macbeth.txt"]);
    assert!(!report.is_clean());
    assert!(report.to_string().contains("changed outside qc: macbeth.txt"));
}

#[test]
fn moves_are_refused_while_the_corpus_is_inconsistent() {
    let (_dir, mut corpus) = project();
    register(&mut corpus, "macbeth.txt", "when shall\n");
    write(&corpus, "stray.txt", "unregistered\n");

    let err = corpus
        .session(|session| session.move_document("macbeth.txt", "tragedy.txt", false))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Consistency);
    assert!(corpus.settings().corpus_dir.join("macbeth.txt").exists());
}

#[test]
fn moving_a_directory_moves_files_and_annotations() {
    let (_dir, mut corpus) = project();
    register(&mut corpus, "plays/macbeth.txt", "when shall\nwe three\n");
    register(&mut corpus, "plays/hamlet.txt", "to be\n");
    corpus
        .session(|session| {
            session.update_coded_lines(
                "plays/macbeth.txt",
                "chris",
                &[CodedLineRequest::new(1, "witch")],
            )
        })
        .unwrap();

    let moved = corpus
        .session(|session| session.move_document("plays", "drama/tragedy", true))
        .unwrap();
    assert_eq!(moved.len(), 2);

    let corpus_dir = corpus.settings().corpus_dir.clone();
    assert!(!corpus_dir.join("plays").exists());
    assert!(corpus_dir.join("drama/tragedy/macbeth.txt").is_file());
    assert_eq!(
        lines(&mut corpus, "drama/tragedy/macbeth.txt", "chris"),
        vec![CodedLineRequest::new(1, "witch")]
    );
    let report = corpus
        .session(|session| session.validate_corpus_paths())
        .unwrap();
    assert!(report.is_clean(), "{report}");
}

#[test]
fn moving_onto_an_existing_file_is_a_conflict() {
    let (_dir, mut corpus) = project();
    register(&mut corpus, "a.txt", "a\n");
    register(&mut corpus, "b.txt", "b\n");

    let err = corpus
        .session(|session| session.move_document("a.txt", "b.txt", false))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[test]
fn removing_a_document_deletes_file_and_annotations() {
    let (_dir, mut corpus) = project();
    register(&mut corpus, "macbeth.txt", "when shall\n");
    register(&mut corpus, "hamlet.txt", "to be\n");
    corpus
        .session(|session| {
            session.update_coded_lines("macbeth.txt", "chris", &[CodedLineRequest::new(0, "witch")])
        })
        .unwrap();

    let removed = corpus
        .session(|session| session.remove_document("macbeth.txt", false))
        .unwrap();
    assert_eq!(removed, vec!["macbeth.txt"]);
    assert!(!corpus.settings().corpus_dir.join("macbeth.txt").exists());
    assert!(!corpus.settings().corpus_dir.join(".qc_staging").exists());

    let remaining = corpus
        .session(|session| session.line_annotations(&AnnotationFilter::default()))
        .unwrap();
    assert!(remaining.is_empty());
}

#[test]
fn updating_text_carries_annotations_across_the_change() {
    let (_dir, mut corpus) = project();
    register(&mut corpus, "letters.txt", "a\nb\nc\nd\n");
    corpus
        .session(|session| {
            session.update_coded_lines(
                "letters.txt",
                "chris",
                &[CodedLineRequest::new(1, "bee"), CodedLineRequest::new(2, "sea")],
            )
        })
        .unwrap();

    let update = corpus
        .session(|session| {
            session.update_document(
                "letters.txt",
                UpdateSource::NewText("a\nx\ny\nb\nc\n".to_string()),
                false,
            )
        })
        .unwrap();
    assert!(update.diff.contains("@@ -1,4 +1,5 @@"));
    assert!(update.dropped.is_empty());

    assert_eq!(
        lines(&mut corpus, "letters.txt", "chris"),
        vec![CodedLineRequest::new(3, "bee"), CodedLineRequest::new(4, "sea")]
    );
    assert_eq!(
        fs::read_to_string(corpus.settings().corpus_dir.join("letters.txt")).unwrap(),
        "a\nx\ny\nb\nc\n"
    );
    let report = corpus
        .session(|session| session.validate_corpus_paths())
        .unwrap();
    assert!(report.is_clean(), "{report}");
}

#[test]
fn dry_run_update_writes_nothing() {
    let (_dir, mut corpus) = project();
    register(&mut corpus, "letters.txt", "a\nb\n");
    corpus
        .session(|session| {
            session.update_coded_lines("letters.txt", "chris", &[CodedLineRequest::new(1, "bee")])
        })
        .unwrap();

    let update = corpus
        .session(|session| {
            session.update_document(
                "letters.txt",
                UpdateSource::NewText("z\na\nb\n".to_string()),
                true,
            )
        })
        .unwrap();
    assert_eq!(update.kept.len(), 1);
    assert_eq!(update.kept[0].line, 2);

    assert_eq!(
        lines(&mut corpus, "letters.txt", "chris"),
        vec![CodedLineRequest::new(1, "bee")]
    );
    assert_eq!(
        fs::read_to_string(corpus.settings().corpus_dir.join("letters.txt")).unwrap(),
        "a\nb\n"
    );
}

#[test]
fn external_diffs_drive_the_remap_and_out_of_range_lines_drop() {
    let (_dir, mut corpus) = project();
    register(&mut corpus, "letters.txt", "a\nb\n");
    corpus
        .session(|session| {
            session.update_coded_lines(
                "letters.txt",
                "chris",
                &[CodedLineRequest::new(0, "ay"), CodedLineRequest::new(1, "bee")],
            )
        })
        .unwrap();

    let update = corpus
        .session(|session| {
            session.update_document(
                "letters.txt",
                UpdateSource::ExternalDiff {
                    diff: "--- a/letters.txt\n+++ b/letters.txt\n@@ -1,2 +0,0 @@\n-a\n-b\n"
                        .to_string(),
                    new_text: String::new(),
                },
                false,
            )
        })
        .unwrap();
    assert!(update.kept.is_empty());
    assert_eq!(update.dropped.len(), 2);
    assert!(lines(&mut corpus, "letters.txt", "chris").is_empty());
}

#[test]
fn unscoped_renames_update_the_codebook() {
    let (_dir, mut corpus) = project();
    fs::write(
        &corpus.settings().codebook,
        "- creature:\n    - witch\n    - ghost\n- king\n",
    )
    .unwrap();
    register(&mut corpus, "macbeth.txt", "when shall\nwe three\n");
    corpus
        .session(|session| {
            session.update_coded_lines(
                "macbeth.txt",
                "chris",
                &[
                    CodedLineRequest::new(0, "witch"),
                    CodedLineRequest::new(1, "ghost"),
                    CodedLineRequest::new(1, "king"),
                ],
            )
        })
        .unwrap();

    corpus
        .session(|session| {
            session.rename_codes(&["witch".to_string()], "hag", &AnnotationFilter::default())?;
            session.rename_codes(&["ghost".to_string()], "king", &AnnotationFilter::default())
        })
        .unwrap();

    let tree = read_codebook(&corpus.settings().codebook).unwrap();
    assert_eq!(
        tree.flatten_names(None, true),
        vec!["creature", "creature:hag", "creature:king", "king"]
    );
    let codes = corpus.session(|session| session.list_codes()).unwrap();
    assert_eq!(codes, vec!["hag", "king"]);
    assert_eq!(
        lines(&mut corpus, "macbeth.txt", "chris"),
        vec![CodedLineRequest::new(0, "hag"), CodedLineRequest::new(1, "king")]
    );
}

#[test]
fn renaming_into_a_code_under_another_parent_keeps_both_positions() {
    let (_dir, mut corpus) = project();
    fs::write(
        &corpus.settings().codebook,
        "- fruit:\n    - a\n- veg:\n    - b\n",
    )
    .unwrap();
    register(&mut corpus, "market.txt", "apples\nbeans\n");
    corpus
        .session(|session| {
            session.update_coded_lines(
                "market.txt",
                "chris",
                &[CodedLineRequest::new(0, "a"), CodedLineRequest::new(1, "b")],
            )
        })
        .unwrap();

    corpus
        .session(|session| {
            session.rename_codes(&["a".to_string()], "b", &AnnotationFilter::default())
        })
        .unwrap();

    let tree = read_codebook(&corpus.settings().codebook).unwrap();
    assert_eq!(
        tree.flatten_names(None, true),
        vec!["fruit", "fruit:b", "veg", "veg:b"]
    );
    assert_eq!(
        lines(&mut corpus, "market.txt", "chris"),
        vec![CodedLineRequest::new(0, "b"), CodedLineRequest::new(1, "b")]
    );
}

#[test]
fn scoped_renames_only_add_names_to_the_codebook() {
    let (_dir, mut corpus) = project();
    fs::write(&corpus.settings().codebook, "- witch\n").unwrap();
    register(&mut corpus, "macbeth.txt", "when shall\n");
    corpus
        .session(|session| {
            session.update_coded_lines("macbeth.txt", "chris", &[CodedLineRequest::new(0, "witch")])?;
            session.update_coded_lines("macbeth.txt", "kate", &[CodedLineRequest::new(0, "witch")])
        })
        .unwrap();

    let scope = AnnotationFilter {
        coders: Some(vec!["kate".into()]),
        ..AnnotationFilter::default()
    };
    corpus
        .session(|session| session.rename_codes(&["witch".to_string()], "hag", &scope))
        .unwrap();

    let text = fs::read_to_string(&corpus.settings().codebook).unwrap();
    let tree = parse(&text).unwrap();
    assert_eq!(tree.flatten_names(None, false), vec!["hag", "witch"]);
}
