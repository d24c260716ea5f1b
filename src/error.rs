//! Domain error kinds.
//!
//! Public functions return [`anyhow::Result`]; the failures that callers may
//! want to branch on are raised as [`DatasetError`] values, so they can be
//! recovered with `err.downcast_ref::<DatasetError>()`.

use std::path::PathBuf;
use thiserror::Error;

/// Failures specific to building, writing, and reading sharded datasets.
#[derive(Debug, Error)]
pub enum DatasetError {
    // -------------------------------------------------------------------------
    // Datum / sample construction
    // -------------------------------------------------------------------------
    #[error("invalid datum: {0}")]
    InvalidDatum(String),

    #[error("duplicate field name in sample: {0}")]
    DuplicateField(String),

    #[error("datum `{0}` has no encoder and cannot be written")]
    MissingEncoder(String),

    #[error("cannot encode field `{field}`: {reason}")]
    Encode { field: String, reason: String },

    #[error("cannot decompress field `{field}`: {reason}")]
    Decompress { field: String, reason: String },

    // -------------------------------------------------------------------------
    // Schema
    // -------------------------------------------------------------------------
    #[error("field `{field}`: shape token `{token}` is not an integer")]
    SchemaShape { field: String, token: String },

    #[error("sample does not match schema: {0}")]
    SchemaMismatch(String),

    #[error("a schema cannot be derived from a skipped sample")]
    SkippedSchemaSample,

    // -------------------------------------------------------------------------
    // Decoding
    // -------------------------------------------------------------------------
    #[error("record has no feature `{0}`")]
    MissingFeature(String),

    #[error("feature `{field}`: expected {expected} values, found {found}")]
    LengthMismatch {
        field: String,
        expected: usize,
        found: usize,
    },

    #[error("feature `{field}`: expected {expected} list, found {found} list")]
    FeatureKind {
        field: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("corrupt record #{index} in {}: {reason}", path.display())]
    CorruptRecord {
        path: PathBuf,
        index: u64,
        reason: String,
    },

    // -------------------------------------------------------------------------
    // Configuration
    // -------------------------------------------------------------------------
    #[error("invalid options: {0}")]
    InvalidOptions(String),
}
