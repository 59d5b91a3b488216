use qc_core::db::open_db_in_memory;
use qc_core::repo::{
    AnnotationFilter, AnnotationRepository, DocumentRepository, RenameOutcome,
    SqliteAnnotationRepository, SqliteDocumentRepository,
};
use qc_core::CodedLineRequest;
use rusqlite::Connection;

fn seeded(conn: &Connection) -> SqliteAnnotationRepository<'_> {
    SqliteDocumentRepository::try_new(conn)
        .unwrap()
        .register_document("macbeth.txt", "when shall\nwe three\nmeet again\n")
        .unwrap();
    let annotations = SqliteAnnotationRepository::try_new(conn).unwrap();
    annotations
        .update_coded_lines(
            "macbeth.txt",
            "chris",
            &[
                CodedLineRequest::new(0, "witch"),
                CodedLineRequest::new(0, "hag"),
                CodedLineRequest::new(1, "hag"),
            ],
        )
        .unwrap();
    annotations
        .update_coded_lines("macbeth.txt", "kate", &[CodedLineRequest::new(1, "hag")])
        .unwrap();
    annotations
}

#[test]
fn rename_drops_rows_that_would_duplicate() {
    let conn = open_db_in_memory().unwrap();
    let annotations = seeded(&conn);

    let outcome = annotations
        .rename_codes(&["hag".to_string()], "witch", &AnnotationFilter::default())
        .unwrap();
    assert_eq!(
        outcome,
        RenameOutcome {
            renamed: 2,
            dropped: 1
        }
    );
    assert_eq!(
        annotations.coded_lines("macbeth.txt", "chris").unwrap(),
        vec![
            CodedLineRequest::new(0, "witch"),
            CodedLineRequest::new(1, "witch"),
        ]
    );
    assert_eq!(
        annotations.coded_lines("macbeth.txt", "kate").unwrap(),
        vec![CodedLineRequest::new(1, "witch")]
    );

    assert_eq!(annotations.delete_unused_codes(&["hag".to_string()]).unwrap(), 1);
    assert_eq!(annotations.list_codes().unwrap(), vec!["witch"]);
}

#[test]
fn scoped_rename_leaves_other_coders_alone() {
    let conn = open_db_in_memory().unwrap();
    let annotations = seeded(&conn);
    let scope = AnnotationFilter {
        coders: Some(vec!["kate".into()]),
        ..AnnotationFilter::default()
    };

    let outcome = annotations
        .rename_codes(&["hag".to_string()], "crone", &scope)
        .unwrap();
    assert_eq!(outcome.renamed, 1);
    assert_eq!(
        annotations.coded_lines("macbeth.txt", "kate").unwrap(),
        vec![CodedLineRequest::new(1, "crone")]
    );
    assert!(annotations
        .coded_lines("macbeth.txt", "chris")
        .unwrap()
        .contains(&CodedLineRequest::new(1, "hag")));

    assert_eq!(annotations.delete_unused_codes(&["hag".to_string()]).unwrap(), 0);
}

#[test]
fn renaming_a_code_to_itself_is_a_no_op() {
    let conn = open_db_in_memory().unwrap();
    let annotations = seeded(&conn);

    let outcome = annotations
        .rename_codes(&["witch".to_string()], "witch", &AnnotationFilter::default())
        .unwrap();
    assert_eq!(outcome, RenameOutcome::default());
}

#[test]
fn several_old_names_merge_into_one() {
    let conn = open_db_in_memory().unwrap();
    let annotations = seeded(&conn);

    let outcome = annotations
        .rename_codes(
            &["hag".to_string(), "witch".to_string()],
            "weird_sister",
            &AnnotationFilter::default(),
        )
        .unwrap();
    assert_eq!(outcome.renamed + outcome.dropped, 4);
    assert_eq!(
        annotations.coded_lines("macbeth.txt", "chris").unwrap(),
        vec![
            CodedLineRequest::new(0, "weird_sister"),
            CodedLineRequest::new(1, "weird_sister"),
        ]
    );
}
