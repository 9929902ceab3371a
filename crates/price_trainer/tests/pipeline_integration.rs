//! End-to-end runs: raw listings → splits → preparation → training →
//! publication → pinned replay.

use anyhow::Result;
use autoprice_core::fixtures::{listing, synthetic_listings};
use autoprice_core::model::{GbdtModel, Regressor};
use autoprice_core::record::{Field, Record};
use autoprice_core::{EncodeTarget, PipelineConfig, PipelineError, UnseenPolicy};
use autoprice_inference::{InferenceReplayer, ModelPin};
use autoprice_registry::{ArtifactKind, ArtifactRegistry, ArtifactStore, MemoryArtifactStore, SledArtifactStore};
use autoprice_trainer::{split_raw, train_and_publish, RawSplits, SplitPreparer};

const SENTINEL_WHEEL_DRIVE: &str = "4WD hoặc AWD";

fn config(policy: UnseenPolicy) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.training.num_trees = 60;
    config.training.max_depth = 4;
    config.encoding.unseen_policy = policy;
    config
}

/// A scrape with a few rows the pipeline must get rid of
fn raw_listings() -> Vec<Record> {
    let mut records = synthetic_listings(600, 7);

    let mut old = listing("Toyota", "Vios", 350.0);
    old.year = Some(2005.0);
    records.push(old);

    let mut sentinel = listing("Ford", "Ranger", 820.0);
    sentinel.wheel_drive = Some(SENTINEL_WHEEL_DRIVE.into());
    records.push(sentinel);

    let mut placeholder = listing("Kia", "Morning", 260.0);
    placeholder.gearbox = Some("-".into());
    records.push(placeholder);

    records
}

fn request(wheel_drive: &str) -> Record {
    let mut record = listing("Honda", "City", 0.0);
    record.price = None;
    record.wheel_drive = Some(wheel_drive.into());
    record
}

#[test]
fn test_full_run_with_memory_store() -> Result<()> {
    let config = config(UnseenPolicy::Fallback);
    let raw = split_raw(&raw_listings(), &config)?;
    let registry = ArtifactRegistry::new(MemoryArtifactStore::new());

    let run = train_and_publish(&raw, &config, &registry, "run-memory")?;
    assert!(run.schema.bootstrapped);
    assert_eq!(run.encoder_version.kind, ArtifactKind::EncoderSet);
    assert_eq!(run.model_version.kind, ArtifactKind::Model);
    assert_eq!(run.metrics.len(), 2);
    for report in &run.metrics {
        assert!(report.r2 > 0.5, "{} r2 too low: {}", report.split, report.r2);
    }

    let replayer = InferenceReplayer::<GbdtModel>::load(&registry, ModelPin::model(run.model_version))?;
    assert_eq!(replayer.encoder_version(), Some(run.encoder_version));

    let requests: Vec<Record> = raw.test.iter().take(20).cloned().collect();
    let predictions = replayer.predict(&requests)?;
    assert_eq!(predictions.len(), requests.len());
    for (record, prediction) in requests.iter().zip(&predictions) {
        assert_eq!(replayer.predict_one(record)?, *prediction);
        assert!(prediction.is_finite());
    }
    Ok(())
}

#[test]
fn test_dirty_rows_never_reach_the_encoders() -> Result<()> {
    let config = config(UnseenPolicy::Strict);
    let mut raw = split_raw(&raw_listings(), &config)?;
    for split in [&raw.train, &raw.validation, &raw.test] {
        assert!(split.iter().all(|r| r.wheel_drive.as_deref() != Some(SENTINEL_WHEEL_DRIVE)));
        assert!(split.iter().all(|r| r.gearbox.as_deref() != Some("-")));
    }

    let mut old = listing("Toyota", "Vios", 350.0);
    old.year = Some(2005.0);
    raw.train.push(old);

    let registry = ArtifactRegistry::new(MemoryArtifactStore::new());
    let prepared = SplitPreparer::new(&config, &registry)?.prepare(&raw, "run-dirty")?;

    let years = prepared.train.column(Field::Year).unwrap_or_default();
    assert!(!years.is_empty());
    assert!(years.iter().all(|year| *year > 2007.0));
    assert!(prepared.report.splits[0].after_ranges < raw.train.len());
    Ok(())
}

#[test]
fn test_unseen_wheel_drive_at_inference() -> Result<()> {
    for policy in [UnseenPolicy::Strict, UnseenPolicy::Fallback] {
        let config = config(policy);
        let raw = split_raw(&raw_listings(), &config)?;
        let registry = ArtifactRegistry::new(MemoryArtifactStore::new());
        let run = train_and_publish(&raw, &config, &registry, "run-policy")?;
        let replayer = InferenceReplayer::<GbdtModel>::load(&registry, ModelPin::model(run.model_version))?;
        assert_eq!(replayer.policy(), policy);

        let known = replayer.predict(&[request("FWD")])?;
        assert_eq!(known.len(), 1);

        let result = replayer.predict(&[request("FWD"), request(SENTINEL_WHEEL_DRIVE)]);
        match policy {
            UnseenPolicy::Strict => {
                let err = result.map(|_| ()).unwrap_err();
                assert!(matches!(
                    err.pipeline(),
                    Some(PipelineError::UnseenCategory { field, value })
                        if field == "wheel_drive" && value == SENTINEL_WHEEL_DRIVE
                ));
            }
            UnseenPolicy::Fallback => {
                let predictions = result?;
                assert_eq!(predictions[0], known[0]);
                assert!(predictions[1].is_finite());
            }
        }
    }
    Ok(())
}

#[test]
fn test_sled_store_survives_reopen() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = config(UnseenPolicy::Fallback);
    let raw = split_raw(&raw_listings(), &config)?;

    let (model_version, expected) = {
        let registry = ArtifactRegistry::new(SledArtifactStore::open(dir.path())?);
        let run = train_and_publish(&raw, &config, &registry, "run-sled")?;
        registry.store().flush()?;

        let (_, artifact) = registry.fetch_encoders(autoprice_registry::VersionSelector::Pinned(run.encoder_version.number))?;
        let encoders = autoprice_core::EncoderSet::load(artifact)?;
        let rows = encoders.encode_rows(&raw.test, EncodeTarget::FeaturesOnly)?;
        (run.model_version, run.model.predict(&rows)?)
    };

    let registry = ArtifactRegistry::new(SledArtifactStore::open(dir.path())?);
    assert_eq!(registry.store().versions(ArtifactKind::Model)?.len(), 1);
    let replayer = InferenceReplayer::<GbdtModel>::load(&registry, ModelPin::model(model_version))?;
    assert_eq!(replayer.predict(&raw.test)?, expected);
    Ok(())
}

#[test]
fn test_second_run_keeps_versions_paired() -> Result<()> {
    let config = config(UnseenPolicy::Fallback);
    let registry = ArtifactRegistry::new(MemoryArtifactStore::new());

    let first_raw = split_raw(&raw_listings(), &config)?;
    let first = train_and_publish(&first_raw, &config, &registry, "run-1")?;

    let second_raw = RawSplits {
        train: synthetic_listings(400, 11),
        validation: synthetic_listings(80, 12),
        test: synthetic_listings(80, 13),
    };
    let second = train_and_publish(&second_raw, &config, &registry, "run-2")?;

    assert!(!second.schema.bootstrapped);
    assert_eq!(second.schema.schema_version, first.schema.schema_version);
    assert_eq!(first.encoder_version.number, 1);
    assert_eq!(second.encoder_version.number, 2);

    let replayer = InferenceReplayer::<GbdtModel>::load(&registry, ModelPin::model(first.model_version))?;
    assert_eq!(replayer.encoder_version(), Some(first.encoder_version));

    let skewed = InferenceReplayer::<GbdtModel>::load(
        &registry,
        ModelPin::model(first.model_version).with_encoder(second.encoder_version),
    );
    let err = skewed.map(|_| ()).unwrap_err();
    assert!(matches!(err.pipeline(), Some(PipelineError::ArtifactVersionSkew { .. })));
    Ok(())
}
