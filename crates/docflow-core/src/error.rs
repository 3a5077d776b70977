//! Error types for `docflow`.
//!
//! A single error type covers configuration-time validation failures, run-time
//! invocation failures and failures reported by the document store connector.
//! Error codes follow the pattern `DOCFLOW-XXX` so that messages surfaced to
//! workflow users can be traced back to their origin.

use thiserror::Error;

/// Result type alias for `docflow` operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while compiling filters, planning writes or executing
/// an operation against a document store.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed filter tree or step settings (DOCFLOW-001).
    #[error("[DOCFLOW-001] Configuration error: {0}")]
    Configuration(String),

    /// Two filters bind the same input name with different types (DOCFLOW-002).
    #[error("[DOCFLOW-002] Multiple filters use the name '{0}' and the types do not match")]
    AmbiguousInput(String),

    /// A required input value was absent or empty (DOCFLOW-003).
    #[error("[DOCFLOW-003] {0} is missing")]
    MissingInput(String),

    /// A value could not be converted to the target representation (DOCFLOW-004).
    #[error("[DOCFLOW-004] Cannot convert {value} to {target}")]
    TypeCoercion {
        /// Rendering of the offending value.
        value: String,
        /// Name of the target representation.
        target: String,
    },

    /// An item of a bulk batch failed validation (DOCFLOW-005).
    ///
    /// The whole batch is rejected; no write is issued for any item.
    #[error("[DOCFLOW-005] Batch item {index} is invalid: {reason}")]
    BatchValidation {
        /// Zero-based position of the first invalid item.
        index: usize,
        /// Why the item was rejected.
        reason: String,
    },

    /// A filter references a field the record type does not declare (DOCFLOW-006).
    #[error("[DOCFLOW-006] Field '{field}' not found on type '{type_name}'")]
    FieldNotFound {
        /// Requested field name.
        field: String,
        /// Record type that was searched.
        type_name: String,
    },

    /// A delete was requested with an empty identifier list (DOCFLOW-007).
    #[error("[DOCFLOW-007] Nothing to delete: {0} is empty")]
    NothingToDelete(String),

    /// A replace without upsert matched no document (DOCFLOW-008).
    #[error("[DOCFLOW-008] Document with ID '{0}' doesn't exist in collection")]
    DocumentNotFound(String),

    /// The configured record type could not be resolved (DOCFLOW-009).
    #[error("[DOCFLOW-009] Document type '{0}' not found")]
    SchemaNotFound(String),

    /// Failure reported by the document store connector (DOCFLOW-010).
    ///
    /// Propagated verbatim; never retried by this crate.
    #[error("[DOCFLOW-010] Store error: {0}")]
    Store(String),

    /// Configuration file error (DOCFLOW-011).
    #[error("[DOCFLOW-011] {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl Error {
    /// Returns the error code (e.g., "DOCFLOW-001").
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "DOCFLOW-001",
            Self::AmbiguousInput(_) => "DOCFLOW-002",
            Self::MissingInput(_) => "DOCFLOW-003",
            Self::TypeCoercion { .. } => "DOCFLOW-004",
            Self::BatchValidation { .. } => "DOCFLOW-005",
            Self::FieldNotFound { .. } => "DOCFLOW-006",
            Self::NothingToDelete(_) => "DOCFLOW-007",
            Self::DocumentNotFound(_) => "DOCFLOW-008",
            Self::SchemaNotFound(_) => "DOCFLOW-009",
            Self::Store(_) => "DOCFLOW-010",
            Self::Config(_) => "DOCFLOW-011",
        }
    }

    /// Returns true if the error describes a configuration problem that should
    /// have been reported before the operation ever ran.
    #[must_use]
    pub const fn is_configuration_time(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_)
                | Self::AmbiguousInput(_)
                | Self::SchemaNotFound(_)
                | Self::Config(_)
        )
    }

    /// Returns true if the error originated in the document store connector.
    #[must_use]
    pub const fn is_store_error(&self) -> bool {
        matches!(self, Self::Store(_))
    }

    pub(crate) fn coercion(value: impl std::fmt::Display, target: impl Into<String>) -> Self {
        Self::TypeCoercion {
            value: value.to_string(),
            target: target.into(),
        }
    }
}
