//! Domain model for the corpus and its annotations.
//!
//! # Responsibility
//! - Define documents, paragraph spans, and coded-line records.
//! - Own the pure helpers that derive stored shape from document text
//!   (content hash, line count, paragraph partition).
//!
//! # Invariants
//! - Line numbers are zero-based; spans are half-open `[start, end)`.
//! - The paragraph partition of an N-line text covers exactly `[0, N)`.

pub mod annotation;
pub mod document;
