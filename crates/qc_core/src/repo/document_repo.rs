//! Document, index, and paragraph-location persistence.
//!
//! # Responsibility
//! - Register documents with their `paragraphs` index and locations.
//! - Move and remove documents, cascading to every dependent row.
//!
//! # Invariants
//! - The `paragraphs` locations of a document tile `[0, line_count)`.
//! - Removing a document deletes the coded lines anchored to its locations
//!   before the document row itself.

use crate::model::document::{
    content_hash, paragraph_spans, Document, Location, PARAGRAPHS_INDEX,
};
use crate::repo::{
    ensure_connection_ready, with_savepoint, DocumentFilter, RepoError, RepoResult,
};
use log::info;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

/// Repository interface for corpus documents.
pub trait DocumentRepository {
    /// Inserts a document, its `paragraphs` index, and one location per
    /// paragraph of `text`.
    fn register_document(&self, file_path: &str, text: &str) -> RepoResult<Document>;
    /// Loads one document by relative path.
    fn get_document(&self, file_path: &str) -> RepoResult<Option<Document>>;
    /// Lists documents matching `filter`, ordered by path.
    fn list_documents(&self, filter: &DocumentFilter) -> RepoResult<Vec<Document>>;
    /// Lists `paragraphs` locations ordered by `start_line`.
    fn paragraphs(&self, file_path: &str) -> RepoResult<Vec<Location>>;
    /// Line count recorded by the paragraph partition.
    fn line_count(&self, file_path: &str) -> RepoResult<i64>;
    /// Replaces the paragraph partition and hash for new `text`.
    ///
    /// Coded lines anchored to the old locations are deleted; callers replay
    /// remapped annotations afterwards.
    fn reseed_paragraphs(&self, file_path: &str, text: &str) -> RepoResult<Document>;
    /// Renames one document.
    fn move_document(&self, from: &str, to: &str) -> RepoResult<()>;
    /// Renames every document under directory `from` to sit under `to`.
    ///
    /// Returns `(old, new)` path pairs.
    fn move_documents_under(&self, from: &str, to: &str) -> RepoResult<Vec<(String, String)>>;
    /// Deletes one document and everything anchored to it.
    fn remove_document(&self, file_path: &str) -> RepoResult<()>;
    /// Deletes every document under directory `prefix`; returns their paths.
    fn remove_documents_under(&self, prefix: &str) -> RepoResult<Vec<String>>;
}

/// SQLite-backed document repository.
pub struct SqliteDocumentRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteDocumentRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl DocumentRepository for SqliteDocumentRepository<'_> {
    fn register_document(&self, file_path: &str, text: &str) -> RepoResult<Document> {
        if self.get_document(file_path)?.is_some() {
            return Err(RepoError::AlreadyExists(file_path.to_string()));
        }
        let document = Document {
            file_path: file_path.to_string(),
            file_hash: content_hash(text.as_bytes()),
        };
        with_savepoint(self.conn, "register_document", || {
            self.conn.execute(
                "INSERT INTO document (file_path, file_hash) VALUES (?1, ?2);",
                params![document.file_path, document.file_hash],
            )?;
            self.conn.execute(
                "INSERT INTO document_index (name, time_series, document_id)
                 VALUES (?1, 0, ?2);",
                params![PARAGRAPHS_INDEX, document.file_path],
            )?;
            let index_id = self.conn.last_insert_rowid();
            insert_paragraphs(self.conn, index_id, text)
        })?;
        info!(
            "event=document_register module=repo status=ok path={} lines={}",
            file_path,
            crate::model::document::line_count(text)
        );
        Ok(document)
    }

    fn get_document(&self, file_path: &str) -> RepoResult<Option<Document>> {
        let document = self
            .conn
            .query_row(
                "SELECT file_path, file_hash FROM document WHERE file_path = ?1;",
                [file_path],
                parse_document_row,
            )
            .optional()?;
        Ok(document)
    }

    fn list_documents(&self, filter: &DocumentFilter) -> RepoResult<Vec<Document>> {
        let mut sql = "SELECT file_path, file_hash FROM document WHERE 1".to_string();
        let mut binds: Vec<Value> = Vec::new();
        filter.push_sql("file_path", &mut sql, &mut binds);
        sql.push_str(" ORDER BY file_path ASC;");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(binds))?;
        let mut documents = Vec::new();
        while let Some(row) = rows.next()? {
            documents.push(parse_document_row(row)?);
        }
        Ok(documents)
    }

    fn paragraphs(&self, file_path: &str) -> RepoResult<Vec<Location>> {
        self.require_document(file_path)?;
        let mut stmt = self.conn.prepare(
            "SELECT l.id, l.start_line, l.end_line, l.document_index_id
             FROM location l
             JOIN document_index di ON di.id = l.document_index_id
             WHERE di.document_id = ?1
               AND di.name = ?2
             ORDER BY l.start_line ASC;",
        )?;
        let mut rows = stmt.query(params![file_path, PARAGRAPHS_INDEX])?;
        let mut locations = Vec::new();
        while let Some(row) = rows.next()? {
            locations.push(Location {
                id: row.get(0)?,
                start_line: row.get(1)?,
                end_line: row.get(2)?,
                document_index_id: row.get(3)?,
            });
        }
        Ok(locations)
    }

    fn line_count(&self, file_path: &str) -> RepoResult<i64> {
        self.require_document(file_path)?;
        let count: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(l.end_line), 0)
             FROM location l
             JOIN document_index di ON di.id = l.document_index_id
             WHERE di.document_id = ?1
               AND di.name = ?2;",
            params![file_path, PARAGRAPHS_INDEX],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn reseed_paragraphs(&self, file_path: &str, text: &str) -> RepoResult<Document> {
        self.require_document(file_path)?;
        let document = Document {
            file_path: file_path.to_string(),
            file_hash: content_hash(text.as_bytes()),
        };
        with_savepoint(self.conn, "reseed_paragraphs", || {
            delete_anchored_coded_lines(self.conn, file_path)?;
            let index_id: i64 = self.conn.query_row(
                "SELECT id FROM document_index WHERE document_id = ?1 AND name = ?2;",
                params![file_path, PARAGRAPHS_INDEX],
                |row| row.get(0),
            )?;
            self.conn
                .execute("DELETE FROM location WHERE document_index_id = ?1;", [index_id])?;
            insert_paragraphs(self.conn, index_id, text)?;
            self.conn.execute(
                "UPDATE document SET file_hash = ?2 WHERE file_path = ?1;",
                params![file_path, document.file_hash],
            )?;
            Ok(())
        })?;
        Ok(document)
    }

    fn move_document(&self, from: &str, to: &str) -> RepoResult<()> {
        self.require_document(from)?;
        if self.get_document(to)?.is_some() {
            return Err(RepoError::AlreadyExists(to.to_string()));
        }
        self.conn.execute(
            "UPDATE document SET file_path = ?2 WHERE file_path = ?1;",
            params![from, to],
        )?;
        info!("event=document_move module=repo status=ok from={from} to={to}");
        Ok(())
    }

    fn move_documents_under(&self, from: &str, to: &str) -> RepoResult<Vec<(String, String)>> {
        let from = from.trim_end_matches('/');
        let to = to.trim_end_matches('/');
        let moves: Vec<(String, String)> = self
            .paths_under(from)?
            .into_iter()
            .map(|old| {
                let rest = &old[from.len()..];
                let new = format!("{to}{rest}");
                (old, new)
            })
            .collect();
        with_savepoint(self.conn, "move_documents_under", || {
            for (old, new) in &moves {
                self.move_document(old, new)?;
            }
            Ok(())
        })?;
        Ok(moves)
    }

    fn remove_document(&self, file_path: &str) -> RepoResult<()> {
        self.require_document(file_path)?;
        with_savepoint(self.conn, "remove_document", || {
            delete_anchored_coded_lines(self.conn, file_path)?;
            self.conn
                .execute("DELETE FROM document WHERE file_path = ?1;", [file_path])?;
            Ok(())
        })?;
        info!("event=document_remove module=repo status=ok path={file_path}");
        Ok(())
    }

    fn remove_documents_under(&self, prefix: &str) -> RepoResult<Vec<String>> {
        let paths = self.paths_under(prefix)?;
        with_savepoint(self.conn, "remove_documents_under", || {
            for path in &paths {
                self.remove_document(path)?;
            }
            Ok(())
        })?;
        Ok(paths)
    }
}

impl SqliteDocumentRepository<'_> {
    fn require_document(&self, file_path: &str) -> RepoResult<()> {
        if self.get_document(file_path)?.is_none() {
            return Err(RepoError::DocumentNotFound(file_path.to_string()));
        }
        Ok(())
    }

    fn paths_under(&self, prefix: &str) -> RepoResult<Vec<String>> {
        let prefix = prefix.trim_end_matches('/');
        let mut stmt = self.conn.prepare(
            "SELECT file_path
             FROM document
             WHERE substr(file_path, 1, length(?1) + 1) = ?1 || '/'
             ORDER BY file_path ASC;",
        )?;
        let mut rows = stmt.query([prefix])?;
        let mut paths = Vec::new();
        while let Some(row) = rows.next()? {
            paths.push(row.get(0)?);
        }
        Ok(paths)
    }
}

fn insert_paragraphs(conn: &Connection, index_id: i64, text: &str) -> RepoResult<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO location (start_line, end_line, document_index_id) VALUES (?1, ?2, ?3);",
    )?;
    for span in paragraph_spans(text) {
        stmt.execute(params![span.start, span.end, index_id])?;
    }
    Ok(())
}

fn delete_anchored_coded_lines(conn: &Connection, file_path: &str) -> RepoResult<usize> {
    let deleted = conn.execute(
        "DELETE FROM coded_line
         WHERE id IN (
             SELECT cll.coded_line_id
             FROM coded_line_location cll
             JOIN location l ON l.id = cll.location_id
             JOIN document_index di ON di.id = l.document_index_id
             WHERE di.document_id = ?1
         );",
        [file_path],
    )?;
    Ok(deleted)
}

fn parse_document_row(row: &Row<'_>) -> rusqlite::Result<Document> {
    Ok(Document {
        file_path: row.get(0)?,
        file_hash: row.get(1)?,
    })
}
