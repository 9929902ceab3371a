//! Leakage-safe preparation of train/validation/test splits
//!
//! Fixed order: impute (statistics from train) → target outlier filter →
//! range filters → fit encoders on train → transform all three → publish
//! the encoder set.

use crate::errors::Result;
use autoprice_core::encoding::EncoderSet;
use autoprice_core::filter::RangeFilter;
use autoprice_core::imputation::Imputer;
use autoprice_core::record::{EncodedSplit, Record};
use autoprice_core::{PipelineConfig, PipelineError};
use autoprice_registry::{ArtifactRegistry, ArtifactStore, ArtifactVersion};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

/// Raw splits as supplied by the caller
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawSplits {
    pub train: Vec<Record>,
    pub validation: Vec<Record>,
    pub test: Vec<Record>,
}

impl RawSplits {
    pub fn named(&self) -> [(&'static str, &[Record]); 3] {
        [
            ("train", &self.train),
            ("validation", &self.validation),
            ("test", &self.test),
        ]
    }
}

/// Row counts of one split through the preparation steps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitAccounting {
    pub split: String,
    pub input_rows: usize,
    pub after_outliers: usize,
    pub after_ranges: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparationReport {
    pub run_id: String,
    pub imputer: Imputer,
    pub splits: Vec<SplitAccounting>,
}

/// Fully numeric splits in FEATURES order plus the published encoder set
#[derive(Debug, Clone)]
pub struct PreparedSplits {
    pub train: EncodedSplit,
    pub validation: EncodedSplit,
    pub test: EncodedSplit,
    pub encoders: EncoderSet,
    pub encoder_version: ArtifactVersion,
    pub report: PreparationReport,
}

pub struct SplitPreparer<'a, S> {
    config: &'a PipelineConfig,
    filter: RangeFilter,
    registry: &'a ArtifactRegistry<S>,
}

impl<'a, S: ArtifactStore> SplitPreparer<'a, S> {
    pub fn new(config: &'a PipelineConfig, registry: &'a ArtifactRegistry<S>) -> Result<Self> {
        Ok(Self {
            config,
            filter: RangeFilter::new(config)?,
            registry,
        })
    }

    /// Impute, filter one split and account for the dropped rows
    fn clean(&self, name: &str, split: &[Record], imputer: &Imputer) -> Result<(Vec<Record>, SplitAccounting)> {
        let imputed = imputer.apply(split);
        let without_outliers = self.filter.filter_target_outliers(&imputed);
        let cleaned = self.filter.filter_ranges(&without_outliers);

        if cleaned.is_empty() {
            return Err(PipelineError::EmptySplit { split: name.to_string() }.into());
        }
        let accounting = SplitAccounting {
            split: name.to_string(),
            input_rows: split.len(),
            after_outliers: without_outliers.len(),
            after_ranges: cleaned.len(),
        };
        info!(
            "Split {}: {} rows in, {} after outlier filter, {} after range filters",
            name, accounting.input_rows, accounting.after_outliers, accounting.after_ranges
        );
        Ok((cleaned, accounting))
    }

    #[instrument(skip(self, raw), fields(train = raw.train.len(), validation = raw.validation.len(), test = raw.test.len()))]
    pub fn prepare(&self, raw: &RawSplits, run_id: &str) -> Result<PreparedSplits> {
        for (name, split) in raw.named() {
            if split.is_empty() {
                return Err(PipelineError::EmptySplit { split: name.to_string() }.into());
            }
        }

        let imputer = Imputer::fit(&raw.train)?;

        // splits are cleaned independently; results are taken in split order
        let cleaned: Vec<Result<(Vec<Record>, SplitAccounting)>> = raw
            .named()
            .par_iter()
            .map(|(name, split)| self.clean(name, split, &imputer))
            .collect();
        let mut cleaned = cleaned.into_iter().collect::<Result<Vec<_>>>()?;
        let (test, test_acc) = cleaned.remove(2);
        let (validation, validation_acc) = cleaned.remove(1);
        let (train, train_acc) = cleaned.remove(0);

        let mut encoders = EncoderSet::new(self.config.encoding.unseen_policy);
        encoders.fit(&train, run_id)?;

        let train_encoded = encoders.transform(&train)?;
        let validation_encoded = encoders.transform(&validation)?;
        let test_encoded = encoders.transform(&test)?;

        let encoder_version = self.registry.publish_encoders(&encoders.save()?)?;

        Ok(PreparedSplits {
            train: train_encoded,
            validation: validation_encoded,
            test: test_encoded,
            encoders,
            encoder_version,
            report: PreparationReport {
                run_id: run_id.to_string(),
                imputer,
                splits: vec![train_acc, validation_acc, test_acc],
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoprice_core::fixtures::{listing, synthetic_listings};
    use autoprice_core::record::{Field, FEATURES};
    use autoprice_core::EncoderArtifact;
    use autoprice_registry::{MemoryArtifactStore, VersionSelector};

    fn raw() -> RawSplits {
        RawSplits {
            train: synthetic_listings(200, 1),
            validation: synthetic_listings(40, 2),
            test: synthetic_listings(40, 3),
        }
    }

    fn prepare(raw: &RawSplits) -> (Result<PreparedSplits>, ArtifactRegistry<MemoryArtifactStore>) {
        let config = PipelineConfig::default();
        let registry = ArtifactRegistry::new(MemoryArtifactStore::new());
        let result = SplitPreparer::new(&config, &registry).unwrap().prepare(raw, "run-1");
        (result, registry)
    }

    #[test]
    fn outputs_are_feature_ordered_and_published() {
        let (prepared, registry) = prepare(&raw());
        let prepared = prepared.unwrap();

        for split in [&prepared.train, &prepared.validation, &prepared.test] {
            assert_eq!(split.columns.len(), FEATURES.len());
            assert!(!split.is_empty());
        }
        let (version, artifact) = registry.fetch_encoders(VersionSelector::Latest).unwrap();
        assert_eq!(version, prepared.encoder_version);
        assert_eq!(artifact, prepared.encoders.save().unwrap());
        assert_eq!(artifact.fitted_rows, prepared.train.len());
    }

    #[test]
    fn encoders_never_see_other_splits() {
        let base = raw();
        let mut shifted = base.clone();
        for r in shifted.validation.iter_mut().chain(shifted.test.iter_mut()) {
            r.branch = Some("Lada".into());
            r.price = r.price.map(|p| p * 3.0);
        }

        let a = prepare(&base).0.unwrap().encoders.save().unwrap();
        let b = prepare(&shifted).0.unwrap().encoders.save().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn imputation_uses_train_statistics() {
        let mut splits = raw();
        let mut gap = listing("Ford", "Ranger", 800.0);
        gap.wheel_drive = None;
        gap.engine_capacity = None;
        splits.test.push(gap);

        let prepared = prepare(&splits).0.unwrap();
        let imputer = &prepared.report.imputer;
        assert_eq!(imputer, &Imputer::fit(&splits.train).unwrap());

        let engine = prepared.test.column(Field::EngineCapacity).unwrap();
        assert!(engine.contains(&imputer.engine_capacity_mean));
    }

    #[test]
    fn old_and_sentinel_rows_are_dropped() {
        let mut splits = raw();
        let mut old = listing("Ford", "Ranger", 800.0);
        old.year = Some(2005.0);
        let mut awd = listing("Ford", "Ranger", 800.0);
        awd.wheel_drive = Some("4WD hoặc AWD".into());
        splits.validation.extend([old, awd]);

        let prepared = prepare(&splits).0.unwrap();
        let acc = &prepared.report.splits[1];
        assert_eq!(acc.input_rows, 42);
        assert_eq!(acc.after_ranges, prepared.validation.len());
        assert!(prepared.validation.column(Field::Year).unwrap().iter().all(|y| *y > 2007.0));

        let artifact: EncoderArtifact = prepared.encoders.save().unwrap();
        let json = String::from_utf8(artifact.to_bytes().unwrap()).unwrap();
        assert!(!json.contains("4WD hoặc AWD"));
    }

    #[test]
    fn empty_split_after_filtering_fails() {
        let mut splits = raw();
        for r in &mut splits.test {
            r.origin = Some("martian".into());
        }
        let (result, registry) = prepare(&splits);
        match result {
            Err(err) => assert!(matches!(
                err.pipeline(),
                Some(PipelineError::EmptySplit { split }) if split == "test"
            )),
            Ok(_) => panic!("an emptied test split must fail"),
        }
        assert!(registry.fetch_encoders(VersionSelector::Latest).is_err());
    }

    #[test]
    fn empty_input_split_fails() {
        let mut splits = raw();
        splits.validation.clear();
        assert!(prepare(&splits).0.is_err());
    }
}
