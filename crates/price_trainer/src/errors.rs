use autoprice_core::PipelineError;
use autoprice_registry::RegistryError;
use thiserror::Error;

/// Errors returned by preparation and training.
#[derive(Debug, Error)]
pub enum TrainerError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("training error: {0}")]
    Training(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TrainerError {
    /// The pipeline error underneath, looking through registry wrapping
    pub fn pipeline(&self) -> Option<&PipelineError> {
        match self {
            TrainerError::Pipeline(e) | TrainerError::Registry(RegistryError::Pipeline(e)) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, TrainerError>;
