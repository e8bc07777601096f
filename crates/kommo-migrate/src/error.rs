//! Error types for the migration library.

use crate::catalog::{EntityKind, FieldType};
use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing mapping store, malformed entry).
    /// Fatal: aborts a run before any remote call.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A persisted mapping entry is inconsistent with its field types.
    #[error("Mapping for source field {field_id} is invalid: {message}")]
    Mapping { field_id: i64, message: String },

    /// A source field matched more than one destination candidate.
    /// Surfaced to the operator, never auto-resolved.
    #[error("Field {field_id} matches multiple destination candidates: {candidates:?}")]
    Ambiguity { field_id: i64, candidates: Vec<i64> },

    /// No transform rule exists for a type pair.
    #[error("No transform rule for {from} -> {to}")]
    TransformUnsupported { from: FieldType, to: FieldType },

    /// Timeout or 5xx-equivalent remote failure. Retried a bounded number
    /// of times, then degraded to a warning for the affected entity.
    #[error("Transient remote error during {context}: {message}")]
    RemoteTransient { context: String, message: String },

    /// 4xx-equivalent validation rejection. Never retried; the remote
    /// detail is preserved verbatim for diagnosis.
    #[error("Remote rejected {context}: {detail}")]
    RemoteRejected { context: String, detail: String },

    /// Attempt to index an already-indexed entity with a different
    /// destination id.
    #[error("Index conflict for {kind}/{source_id}: already mapped to {existing}")]
    IndexConflict {
        kind: EntityKind,
        source_id: i64,
        existing: i64,
    },

    /// Migration index file error.
    #[error("Migration index error: {0}")]
    Index(String),

    /// IO error (file operations).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Run was cancelled by the operator.
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a transient remote error.
    pub fn transient(context: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::RemoteTransient {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Create a rejected remote error.
    pub fn rejected(context: impl Into<String>, detail: impl Into<String>) -> Self {
        MigrateError::RemoteRejected {
            context: context.into(),
            detail: detail.into(),
        }
    }

    /// Whether this error is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, MigrateError::RemoteTransient { .. })
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
