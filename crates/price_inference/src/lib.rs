//! Serving side of the price pipeline
//!
//! Loads a model by explicit version together with the encoder set it was
//! trained with, and replays the training-time row transform on prediction
//! requests.

pub mod errors;
pub mod replayer;

pub use errors::{InferenceError, Result};
pub use replayer::{InferenceReplayer, ModelPin};
