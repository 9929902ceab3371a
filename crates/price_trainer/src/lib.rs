//! Autoprice trainer - split preparation and boosted-tree training
//!
//! Turns raw listing files into leakage-safe encoded splits, trains a
//! deterministic GBDT price model on them and publishes the schema, encoder
//! set and model to the artifact registry.

pub mod cart;
pub mod dataset;
pub mod deterministic;
pub mod errors;
pub mod pipeline;
pub mod preparer;
pub mod split;
pub mod trainer;
pub mod validation;

pub use dataset::{write_encoded, Dataset};
pub use deterministic::SplitTieBreaker;
pub use errors::{Result, TrainerError};
pub use pipeline::{train_and_publish, TrainingRun};
pub use preparer::{PreparationReport, PreparedSplits, RawSplits, SplitAccounting, SplitPreparer};
pub use split::{clean_raw, split_raw, stratified_split};
pub use trainer::{evaluate, Estimator, EvaluationReport, GbdtTrainer};
pub use validation::{SchemaTracker, SchemaTracking};
