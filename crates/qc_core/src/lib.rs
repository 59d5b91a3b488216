//! Core domain logic for qc, a qualitative-coding annotation store.
//! This crate is the single source of truth for corpus and annotation
//! invariants.

pub mod codebook;
pub mod coding;
pub mod db;
pub mod diff;
pub mod logging;
pub mod matrix;
pub mod model;
pub mod repo;
pub mod service;
pub mod settings;

pub use codebook::{CodeTree, CodebookError, NodeId};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::annotation::{Annotation, AnnotationRow, CodedLineRequest, Unit, UnitSpan};
pub use model::document::{Document, Location};
pub use repo::{AnnotationFilter, DocumentFilter, RepoError, RepoResult};
pub use service::{
    CodingWorkflow, Corpus, CorpusError, CorpusResult, ErrorKind, Session, UpdateSource,
    ValidationReport,
};
pub use settings::Settings;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
