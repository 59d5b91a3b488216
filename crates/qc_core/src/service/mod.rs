//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls, corpus files, and the codebook file into
//!   use-case level APIs.
//! - Keep the CLI decoupled from storage details.

pub mod coding_service;
pub mod corpus_service;
pub mod error;
mod journal;
pub mod memo_service;
pub mod report;

pub use coding_service::{CodingWorkflow, EditorRunner, ProcessEditorRunner};
pub use corpus_service::{Corpus, DocumentUpdate, Session, UpdateSource, ValidationReport};
pub use error::{CorpusError, CorpusResult, ErrorKind};
pub use memo_service::{list_memos, Memo};
pub use report::{
    CodedText, Crosstab, CrosstabQuery, CrosstabValues, Excerpt, ExcerptLine, FindQuery, StatsQuery,
    StatsRow,
};
