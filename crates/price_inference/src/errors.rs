use autoprice_core::PipelineError;
use autoprice_registry::RegistryError;
use thiserror::Error;

/// Errors returned while loading artifacts or serving predictions.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl InferenceError {
    /// The pipeline error underneath, looking through registry wrapping
    pub fn pipeline(&self) -> Option<&PipelineError> {
        match self {
            InferenceError::Pipeline(e) | InferenceError::Registry(RegistryError::Pipeline(e)) => Some(e),
            InferenceError::Registry(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, InferenceError>;
