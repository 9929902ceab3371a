//! One training run from raw splits to a published model

use crate::errors::Result;
use crate::preparer::{PreparationReport, RawSplits, SplitPreparer};
use crate::trainer::{evaluate, Estimator, EvaluationReport, GbdtTrainer};
use crate::validation::{SchemaTracker, SchemaTracking};
use autoprice_core::model::GbdtModel;
use autoprice_core::{PipelineConfig, SchemaEngine};
use autoprice_registry::{ArtifactRegistry, ArtifactStore, ArtifactVersion};
use serde::Serialize;
use tracing::{info, instrument};

/// Everything a training run produced and published
#[derive(Debug, Clone, Serialize)]
pub struct TrainingRun {
    pub run_id: String,
    pub schema: SchemaTracking,
    pub preparation: PreparationReport,
    pub encoder_version: ArtifactVersion,
    pub model_version: ArtifactVersion,
    pub metrics: Vec<EvaluationReport>,
    #[serde(skip)]
    pub model: GbdtModel,
}

/// Track the schema, prepare the splits, fit, evaluate and publish
///
/// Drift is reported in [`TrainingRun::schema`] and never stops the run.
#[instrument(skip(raw, config, registry))]
pub fn train_and_publish<S: ArtifactStore>(
    raw: &RawSplits,
    config: &PipelineConfig,
    registry: &ArtifactRegistry<S>,
    run_id: &str,
) -> Result<TrainingRun> {
    let tracker = SchemaTracker::new(SchemaEngine::new(config.schema.clone()), registry);
    let schema = tracker.track(
        &raw.train,
        &[("validation", raw.validation.as_slice()), ("test", raw.test.as_slice())],
    )?;

    let prepared = SplitPreparer::new(config, registry)?.prepare(raw, run_id)?;
    let model = GbdtTrainer::new(config.training.clone()).train(&prepared.train)?;

    let metrics = vec![
        evaluate(&model, "validation", &prepared.validation)?,
        evaluate(&model, "test", &prepared.test)?,
    ];
    let model_version = registry.publish_model(&model, prepared.encoder_version)?;
    info!("Run {} published {} with {}", run_id, model_version, prepared.encoder_version);

    Ok(TrainingRun {
        run_id: run_id.to_string(),
        schema,
        preparation: prepared.report,
        encoder_version: prepared.encoder_version,
        model_version,
        metrics,
        model,
    })
}
