//! Leakage-safe preparation core for car-listing price models
//!
//! Everything fitted here (imputation statistics, schemas, categorical
//! encoders) is learned from the training split only and replayed unchanged
//! on validation, test and serving data.
//!
//! Modules:
//! - `record`: listing records and the fixed feature layout
//! - `config`: the immutable pipeline configuration
//! - `deterministic`: the seeded LCG behind splits and fixtures
//! - `filter`: numeric/categorical range filters and the target z-score filter
//! - `imputation`: train-fitted missing-value fills
//! - `schema`: schema inference and anomaly detection
//! - `encoding`: target-mean and ordinal encoders plus their artifact form
//! - `model`: the `Regressor` seam and the bundled boosted-tree model
//! - `serde_canon`: canonical JSON and BLAKE3 digests

pub mod config;
pub mod deterministic;
pub mod encoding;
pub mod errors;
pub mod filter;
pub mod imputation;
pub mod model;
pub mod record;
pub mod schema;
pub mod serde_canon;

#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;

pub use config::{Bounds, PipelineConfig, UnseenPolicy};
pub use deterministic::LcgRng;
pub use encoding::{
    EncodeTarget, EncoderArtifact, EncoderSet, OrdinalEncoder, TargetMeanEncoder, ENCODER_FORMAT_VERSION,
    UNKNOWN_CODE,
};
pub use errors::{PipelineError, Result};
pub use filter::RangeFilter;
pub use imputation::Imputer;
pub use model::{GbdtModel, Regressor, MODEL_FORMAT_VERSION};
pub use record::{EncodedSplit, Field, FieldKind, Record, FEATURES, MODEL_FEATURES, TARGET};
pub use schema::{Anomaly, AnomalyKind, AnomalyReport, Schema, SchemaCheck, SchemaEngine, SchemaState};
