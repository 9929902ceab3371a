//! Error types for the artifact registry

use autoprice_core::PipelineError;
use thiserror::Error;

/// Errors raised while publishing or fetching artifacts
#[derive(Error, Debug)]
pub enum RegistryError {
    /// No artifact under the requested version
    #[error("Artifact not found: {0}")]
    NotFound(String),

    /// Unparseable version identifier
    #[error("Invalid artifact version: {0}")]
    InvalidVersion(String),

    /// Stored bytes no longer match their recorded digest
    #[error("Artifact {version} is corrupted: {detail}")]
    Corrupted { version: String, detail: String },

    /// Payload decoding or pairing checks failed
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    /// Record encoding error
    #[error("Record encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RegistryError {
    /// Version skew between artifacts that were meant to be paired
    pub fn skew(expected: impl Into<String>, found: impl Into<String>) -> Self {
        RegistryError::Pipeline(PipelineError::ArtifactVersionSkew {
            expected: expected.into(),
            found: found.into(),
        })
    }
}

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;
