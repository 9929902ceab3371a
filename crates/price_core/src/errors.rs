//! Error types for the preparation core

use thiserror::Error;

/// Errors raised while preparing, encoding or reloading listing data.
///
/// Row filtering and anomaly detection never produce errors; dropping rows
/// and reporting drift are regular outcomes.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A configured or required field is absent from the input
    #[error("Schema mismatch on field `{field}`: {detail}")]
    SchemaMismatch { field: String, detail: String },

    /// Transform requested before the encoders were fitted or loaded
    #[error("Encoder `{0}` is not fitted")]
    NotFitted(String),

    /// Fit requested on an encoder set that already holds fitted state
    #[error("Encoder set is already fitted (run {run_id})")]
    AlreadyFitted { run_id: String },

    /// Categorical value outside the fitted domain under the strict policy
    #[error("Unseen category `{value}` for field `{field}`")]
    UnseenCategory { field: String, value: String },

    /// A split has no rows left after filtering
    #[error("Split `{split}` is empty after filtering")]
    EmptySplit { split: String },

    /// Model and encoder artifacts (or artifact formats) do not belong together
    #[error("Artifact version skew: expected {expected}, found {found}")]
    ArtifactVersionSkew { expected: String, found: String },

    /// Artifact payload is structurally invalid
    #[error("Invalid artifact: {0}")]
    InvalidArtifact(String),

    /// Configuration value rejected
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn schema_mismatch(field: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            field: field.into(),
            detail: detail.into(),
        }
    }
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, PipelineError>;
