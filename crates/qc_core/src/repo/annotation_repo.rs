//! Coder, code, and coded-line persistence plus unit-level queries.
//!
//! # Responsibility
//! - Upsert coders and codes.
//! - Replace one coder's annotations of one document by symmetric difference.
//! - Query and count annotations at line, paragraph, or document unit.
//! - Rename codes without creating duplicate annotations.
//!
//! # Invariants
//! - At most one coded line exists per `(coder, code, line, document)`.
//! - Every coded line is linked to the paragraph location containing it.
//! - Counts are distinct unit instances, not annotation rows.

use crate::model::annotation::{
    Annotation, AnnotationRow, CodedLineRequest, Unit, UnitSpan,
};
use crate::model::document::PARAGRAPHS_INDEX;
use crate::repo::{
    ensure_connection_ready, with_savepoint, AnnotationFilter, RepoError, RepoResult,
};
use log::{debug, info};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Rows touched by one `update_coded_lines` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodedLineChanges {
    pub added: usize,
    pub removed: usize,
}

/// Rows touched by one `rename_codes` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenameOutcome {
    /// Rows whose code reference was rewritten.
    pub renamed: usize,
    /// Rows deleted because the renamed row already existed.
    pub dropped: usize,
}

/// Repository interface for annotations.
pub trait AnnotationRepository {
    /// Returns the coder name, inserting it when absent.
    fn get_or_create_coder(&self, name: &str) -> RepoResult<String>;
    /// Returns the code name, inserting it when absent.
    fn get_or_create_code(&self, name: &str) -> RepoResult<String>;
    /// Every stored code name, sorted.
    fn list_codes(&self) -> RepoResult<Vec<String>>;
    /// Every stored coder name, sorted.
    fn list_coders(&self) -> RepoResult<Vec<String>>;
    /// One coder's annotations of one document, sorted by line then code.
    fn coded_lines(&self, document: &str, coder: &str) -> RepoResult<Vec<CodedLineRequest>>;
    /// Makes the stored annotations of `(document, coder)` equal `requested`.
    fn update_coded_lines(
        &self,
        document: &str,
        coder: &str,
        requested: &[CodedLineRequest],
    ) -> RepoResult<CodedLineChanges>;
    /// Line-level annotations matching `filter`, sorted by document then line.
    fn line_annotations(&self, filter: &AnnotationFilter) -> RepoResult<Vec<Annotation>>;
    /// Annotation rows deduplicated at `unit`.
    fn annotations(&self, unit: Unit, filter: &AnnotationFilter) -> RepoResult<Vec<AnnotationRow>>;
    /// Distinct unit instances per code.
    fn count_codes(&self, unit: Unit, filter: &AnnotationFilter)
        -> RepoResult<BTreeMap<String, u64>>;
    /// Rewrites annotations of `old_names` (within `scope`) to `new_name`.
    ///
    /// `scope.codes` is ignored; `old_names` selects the codes.
    fn rename_codes(
        &self,
        old_names: &[String],
        new_name: &str,
        scope: &AnnotationFilter,
    ) -> RepoResult<RenameOutcome>;
    /// Deletes code rows from `names` that no coded line references.
    fn delete_unused_codes(&self, names: &[String]) -> RepoResult<usize>;
}

/// SQLite-backed annotation repository.
pub struct SqliteAnnotationRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteAnnotationRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

const ANNOTATION_JOINS: &str = "FROM coded_line cl
     JOIN coded_line_location cll ON cll.coded_line_id = cl.id
     JOIN location l ON l.id = cll.location_id
     JOIN document_index di ON di.id = l.document_index_id
     WHERE di.name = 'paragraphs'";

impl AnnotationRepository for SqliteAnnotationRepository<'_> {
    fn get_or_create_coder(&self, name: &str) -> RepoResult<String> {
        self.conn
            .execute("INSERT OR IGNORE INTO coder (name) VALUES (?1);", [name])?;
        Ok(name.to_string())
    }

    fn get_or_create_code(&self, name: &str) -> RepoResult<String> {
        self.conn
            .execute("INSERT OR IGNORE INTO code (name) VALUES (?1);", [name])?;
        Ok(name.to_string())
    }

    fn list_codes(&self) -> RepoResult<Vec<String>> {
        list_names(self.conn, "SELECT name FROM code ORDER BY name ASC;")
    }

    fn list_coders(&self) -> RepoResult<Vec<String>> {
        list_names(self.conn, "SELECT name FROM coder ORDER BY name ASC;")
    }

    fn coded_lines(&self, document: &str, coder: &str) -> RepoResult<Vec<CodedLineRequest>> {
        Ok(existing_rows(self.conn, document, coder)?
            .into_keys()
            .collect())
    }

    fn update_coded_lines(
        &self,
        document: &str,
        coder: &str,
        requested: &[CodedLineRequest],
    ) -> RepoResult<CodedLineChanges> {
        let line_count = document_line_count(self.conn, document)?;
        let requested: BTreeSet<CodedLineRequest> = requested.iter().cloned().collect();
        if let Some(bad) = requested
            .iter()
            .find(|request| request.line < 0 || request.line >= line_count)
        {
            return Err(RepoError::LineOutOfRange {
                document: document.to_string(),
                line: bad.line,
                line_count,
            });
        }

        let changes = with_savepoint(self.conn, "update_coded_lines", || {
            let existing = existing_rows(self.conn, document, coder)?;
            let mut changes = CodedLineChanges::default();
            for (request, id) in &existing {
                if !requested.contains(request) {
                    self.conn
                        .execute("DELETE FROM coded_line WHERE id = ?1;", [id])?;
                    changes.removed += 1;
                }
            }

            let additions: Vec<&CodedLineRequest> = requested
                .iter()
                .filter(|request| !existing.contains_key(*request))
                .collect();
            if !additions.is_empty() {
                self.get_or_create_coder(coder)?;
            }
            for request in additions {
                self.get_or_create_code(&request.code)?;
                let location_id = location_for_line(self.conn, document, request.line)?;
                self.conn.execute(
                    "INSERT INTO coded_line (line, coder_id, code_id) VALUES (?1, ?2, ?3);",
                    params![request.line, coder, request.code],
                )?;
                let coded_line_id = self.conn.last_insert_rowid();
                self.conn.execute(
                    "INSERT INTO coded_line_location (coded_line_id, location_id)
                     VALUES (?1, ?2);",
                    params![coded_line_id, location_id],
                )?;
                changes.added += 1;
            }
            Ok(changes)
        })?;

        info!(
            "event=coded_lines_update module=repo status=ok document={document} added={} removed={}",
            changes.added, changes.removed
        );
        Ok(changes)
    }

    fn line_annotations(&self, filter: &AnnotationFilter) -> RepoResult<Vec<Annotation>> {
        let mut sql = format!(
            "SELECT DISTINCT cl.code_id, cl.coder_id, cl.line, di.document_id {ANNOTATION_JOINS}"
        );
        let mut binds: Vec<Value> = Vec::new();
        filter.push_sql("cl.code_id", "cl.coder_id", "di.document_id", &mut sql, &mut binds);
        sql.push_str(" ORDER BY di.document_id ASC, cl.line ASC, cl.coder_id ASC, cl.code_id ASC;");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(binds))?;
        let mut annotations = Vec::new();
        while let Some(row) = rows.next()? {
            annotations.push(Annotation {
                code: row.get(0)?,
                coder: row.get(1)?,
                line: row.get(2)?,
                document: row.get(3)?,
            });
        }
        Ok(annotations)
    }

    fn annotations(&self, unit: Unit, filter: &AnnotationFilter) -> RepoResult<Vec<AnnotationRow>> {
        let projection = match unit {
            Unit::Line => "cl.code_id, cl.coder_id, di.document_id, cl.line",
            Unit::Paragraph => {
                "cl.code_id, cl.coder_id, di.document_id, l.id, l.start_line, l.end_line"
            }
            Unit::Document => "cl.code_id, cl.coder_id, di.document_id",
        };
        let mut sql = format!("SELECT DISTINCT {projection} {ANNOTATION_JOINS}");
        let mut binds: Vec<Value> = Vec::new();
        filter.push_sql("cl.code_id", "cl.coder_id", "di.document_id", &mut sql, &mut binds);
        sql.push_str(" ORDER BY 3 ASC, 1 ASC, 2 ASC");
        if unit != Unit::Document {
            sql.push_str(", 4 ASC");
        }
        sql.push(';');

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(binds))?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            let span = match unit {
                Unit::Line => UnitSpan::Line(row.get(3)?),
                Unit::Paragraph => UnitSpan::Paragraph {
                    location_id: row.get(3)?,
                    start_line: row.get(4)?,
                    end_line: row.get(5)?,
                },
                Unit::Document => UnitSpan::Document,
            };
            items.push(AnnotationRow {
                code: row.get(0)?,
                coder: row.get(1)?,
                document: row.get(2)?,
                span,
            });
        }
        Ok(items)
    }

    fn count_codes(
        &self,
        unit: Unit,
        filter: &AnnotationFilter,
    ) -> RepoResult<BTreeMap<String, u64>> {
        let unit_expr = match unit {
            Unit::Line => "di.document_id || ':' || cl.line",
            Unit::Paragraph => "l.id",
            Unit::Document => "di.document_id",
        };
        let mut sql = format!("SELECT cl.code_id, COUNT(DISTINCT {unit_expr}) {ANNOTATION_JOINS}");
        let mut binds: Vec<Value> = Vec::new();
        filter.push_sql("cl.code_id", "cl.coder_id", "di.document_id", &mut sql, &mut binds);
        sql.push_str(" GROUP BY cl.code_id ORDER BY cl.code_id ASC;");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(binds))?;
        let mut counts = BTreeMap::new();
        while let Some(row) = rows.next()? {
            let code: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            counts.insert(code, count.max(0) as u64);
        }
        Ok(counts)
    }

    fn rename_codes(
        &self,
        old_names: &[String],
        new_name: &str,
        scope: &AnnotationFilter,
    ) -> RepoResult<RenameOutcome> {
        let old_names: Vec<String> = old_names
            .iter()
            .filter(|name| name.as_str() != new_name)
            .cloned()
            .collect();
        if old_names.is_empty() {
            return Ok(RenameOutcome::default());
        }

        let candidates_filter = AnnotationFilter {
            codes: Some(old_names),
            ..scope.clone()
        };
        let candidates = keyed_rows(self.conn, &candidates_filter)?;
        let mut occupied: HashSet<(String, i64, String)> =
            keyed_rows(self.conn, &AnnotationFilter::codes([new_name]))?
                .into_iter()
                .map(|(_, coder, line, document)| (coder, line, document))
                .collect();

        let outcome = with_savepoint(self.conn, "rename_codes", || {
            self.get_or_create_code(new_name)?;
            let mut outcome = RenameOutcome::default();
            for (id, coder, line, document) in candidates {
                if occupied.insert((coder, line, document)) {
                    self.conn.execute(
                        "UPDATE coded_line SET code_id = ?2 WHERE id = ?1;",
                        params![id, new_name],
                    )?;
                    outcome.renamed += 1;
                } else {
                    self.conn
                        .execute("DELETE FROM coded_line WHERE id = ?1;", [id])?;
                    outcome.dropped += 1;
                }
            }
            Ok(outcome)
        })?;

        info!(
            "event=codes_rename module=repo status=ok renamed={} dropped={}",
            outcome.renamed, outcome.dropped
        );
        Ok(outcome)
    }

    fn delete_unused_codes(&self, names: &[String]) -> RepoResult<usize> {
        let mut deleted = 0;
        for name in names {
            deleted += self.conn.execute(
                "DELETE FROM code
                 WHERE name = ?1
                   AND NOT EXISTS (SELECT 1 FROM coded_line WHERE code_id = ?1);",
                [name],
            )?;
        }
        debug!("event=codes_prune module=repo status=ok deleted={deleted}");
        Ok(deleted)
    }
}

fn list_names(conn: &Connection, sql: &str) -> RepoResult<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([])?;
    let mut names = Vec::new();
    while let Some(row) = rows.next()? {
        names.push(row.get(0)?);
    }
    Ok(names)
}

fn document_line_count(conn: &Connection, document: &str) -> RepoResult<i64> {
    let count: Option<i64> = conn
        .query_row(
            "SELECT (
                SELECT COALESCE(MAX(l.end_line), 0)
                FROM location l
                JOIN document_index di ON di.id = l.document_index_id
                WHERE di.document_id = d.file_path
                  AND di.name = ?2
             )
             FROM document d
             WHERE d.file_path = ?1;",
            params![document, PARAGRAPHS_INDEX],
            |row| row.get(0),
        )
        .optional()?;
    count.ok_or_else(|| RepoError::DocumentNotFound(document.to_string()))
}

fn location_for_line(conn: &Connection, document: &str, line: i64) -> RepoResult<i64> {
    conn.query_row(
        "SELECT l.id
         FROM location l
         JOIN document_index di ON di.id = l.document_index_id
         WHERE di.document_id = ?1
           AND di.name = ?2
           AND l.start_line <= ?3
           AND ?3 < l.end_line
         ORDER BY l.start_line ASC
         LIMIT 1;",
        params![document, PARAGRAPHS_INDEX, line],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| {
        RepoError::InvalidData(format!(
            "no paragraph of {document} contains line {line}"
        ))
    })
}

/// Existing `(line, code) -> coded_line.id` for one coder and document.
fn existing_rows(
    conn: &Connection,
    document: &str,
    coder: &str,
) -> RepoResult<BTreeMap<CodedLineRequest, i64>> {
    let sql = format!(
        "SELECT cl.id, cl.line, cl.code_id {ANNOTATION_JOINS}
           AND di.document_id = ?1
           AND cl.coder_id = ?2
         ORDER BY cl.line ASC, cl.code_id ASC;"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params![document, coder])?;
    let mut existing = BTreeMap::new();
    while let Some(row) = rows.next()? {
        let id: i64 = row.get(0)?;
        let request = CodedLineRequest::new(row.get(1)?, row.get::<_, String>(2)?);
        if existing.insert(request.clone(), id).is_some() {
            return Err(RepoError::InvalidData(format!(
                "duplicate annotation for line {} of {document}",
                request.line
            )));
        }
    }
    Ok(existing)
}

/// `(id, coder, line, document)` for rows matching `filter`, ordered by id.
fn keyed_rows(
    conn: &Connection,
    filter: &AnnotationFilter,
) -> RepoResult<Vec<(i64, String, i64, String)>> {
    let mut sql = format!("SELECT cl.id, cl.coder_id, cl.line, di.document_id {ANNOTATION_JOINS}");
    let mut binds: Vec<Value> = Vec::new();
    filter.push_sql("cl.code_id", "cl.coder_id", "di.document_id", &mut sql, &mut binds);
    sql.push_str(" ORDER BY cl.id ASC;");

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(binds))?;
    let mut items = Vec::new();
    while let Some(row) = rows.next()? {
        items.push((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?));
    }
    Ok(items)
}
