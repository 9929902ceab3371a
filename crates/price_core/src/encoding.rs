//! Categorical encoders fitted on the training split
//!
//! Two families, chosen by cardinality:
//! - `branch` and `model` each get a [`TargetMeanEncoder`] that shrinks every
//!   category mean toward the global price mean (James–Stein style);
//! - the six low-cardinality fields share one [`OrdinalEncoder`].
//!
//! An [`EncoderSet`] is fitted exactly once, then only transforms. Its
//! persisted form is an [`EncoderArtifact`]: a tagged, versioned structure
//! serialized as canonical JSON, so reloading never re-fits and a reloaded
//! set reproduces the original outputs bit for bit.

use crate::config::UnseenPolicy;
use crate::errors::{PipelineError, Result};
use crate::record::{EncodedSplit, Field, Record, FEATURES, MODEL_FEATURES, ORDINAL_FIELDS};
use crate::serde_canon::{blake3_hex, from_json_slice, to_canonical_bytes};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, instrument, warn};

/// Encoder artifact format version
pub const ENCODER_FORMAT_VERSION: u32 = 1;

/// Code emitted for unseen ordinal values under [`UnseenPolicy::Fallback`]
pub const UNKNOWN_CODE: i64 = -1;

const BRANCH_KEY: &str = "branch";
const MODEL_KEY: &str = "model";
const OTHERS_KEY: &str = "others";

/// Per-category fit state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryStats {
    pub count: usize,
    pub mean: f64,
    pub shrinkage: f64,
    pub encoded: f64,
}

/// Global quantities the per-category blend is computed from
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShrinkageParams {
    pub global_mean: f64,
    /// Within-category variance of the target
    pub pooled_variance: f64,
    /// Variance of the category means
    pub between_variance: f64,
}

impl ShrinkageParams {
    /// Weight of the global mean for a category with `count` rows
    pub fn weight(&self, count: usize) -> f64 {
        if self.between_variance <= 0.0 || count == 0 {
            return 1.0;
        }
        let noise = self.pooled_variance / count as f64;
        noise / (noise + self.between_variance)
    }
}

/// Shrunk target-mean encoder for one high-cardinality field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetMeanEncoder {
    pub field: String,
    pub shrinkage: ShrinkageParams,
    pub table: BTreeMap<String, CategoryStats>,
}

impl TargetMeanEncoder {
    /// Fit on aligned category labels and targets
    pub fn fit(field: Field, values: &[&str], target: &[f64]) -> Result<Self> {
        if values.len() != target.len() {
            return Err(PipelineError::schema_mismatch(
                field.name(),
                format!("{} labels for {} targets", values.len(), target.len()),
            ));
        }
        if values.is_empty() {
            return Err(PipelineError::EmptySplit { split: "train".into() });
        }

        let n = target.len() as f64;
        let global_mean = target.iter().sum::<f64>() / n;

        let mut groups: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
        for (label, y) in values.iter().zip(target) {
            groups.entry(*label).or_default().push(*y);
        }

        let means: BTreeMap<&str, (usize, f64)> = groups
            .iter()
            .map(|(label, ys)| (*label, (ys.len(), ys.iter().sum::<f64>() / ys.len() as f64)))
            .collect();

        let within: f64 = groups
            .iter()
            .map(|(label, ys)| {
                let m = means[label].1;
                ys.iter().map(|y| (y - m).powi(2)).sum::<f64>()
            })
            .sum();
        let k = groups.len();
        let global_variance = target.iter().map(|y| (y - global_mean).powi(2)).sum::<f64>() / n;
        // constant prices inside every category fall back to the global spread
        let pooled_variance = if target.len() > k && within > 0.0 {
            within / (target.len() - k) as f64
        } else {
            global_variance
        };

        let between_variance = if k < 2 {
            0.0
        } else {
            let mean_of_means = means.values().map(|(_, m)| m).sum::<f64>() / k as f64;
            means.values().map(|(_, m)| (m - mean_of_means).powi(2)).sum::<f64>() / k as f64
        };

        let shrinkage = ShrinkageParams {
            global_mean,
            pooled_variance,
            between_variance,
        };

        let table = means
            .into_iter()
            .map(|(label, (count, mean))| {
                let b = shrinkage.weight(count);
                let encoded = (1.0 - b) * mean + b * global_mean;
                (
                    label.to_string(),
                    CategoryStats {
                        count,
                        mean,
                        shrinkage: b,
                        encoded,
                    },
                )
            })
            .collect();

        Ok(Self {
            field: field.name().to_string(),
            shrinkage,
            table,
        })
    }

    /// Blended value; unseen categories get the global mean
    pub fn encode(&self, value: &str) -> f64 {
        self.table
            .get(value)
            .map_or(self.shrinkage.global_mean, |stats| stats.encoded)
    }

    fn check(&self) -> Result<()> {
        let finite = self.shrinkage.global_mean.is_finite()
            && self.table.values().all(|s| s.encoded.is_finite());
        if !finite {
            return Err(PipelineError::InvalidArtifact(format!(
                "target-mean table for `{}` holds non-finite values",
                self.field
            )));
        }
        Ok(())
    }
}

/// Integer codes for one low-cardinality column
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrdinalColumn {
    /// Codes `1..=n` in order of first appearance during fit
    pub codes: BTreeMap<String, i64>,
}

/// Shared ordinal encoder over [`ORDINAL_FIELDS`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrdinalEncoder {
    pub columns: BTreeMap<String, OrdinalColumn>,
}

impl OrdinalEncoder {
    pub fn fit(train: &[Record]) -> Result<Self> {
        let mut columns = BTreeMap::new();
        for field in ORDINAL_FIELDS {
            let mut column = OrdinalColumn::default();
            for (row, record) in train.iter().enumerate() {
                let label = required_label(record, field, row)?;
                if !column.codes.contains_key(label) {
                    let next = column.codes.len() as i64 + 1;
                    column.codes.insert(label.to_string(), next);
                }
            }
            columns.insert(field.name().to_string(), column);
        }
        Ok(Self { columns })
    }

    pub fn encode(&self, field: Field, value: &str, policy: UnseenPolicy) -> Result<i64> {
        let column = self
            .columns
            .get(field.name())
            .ok_or_else(|| PipelineError::NotFitted(field.name().to_string()))?;
        match (column.codes.get(value), policy) {
            (Some(code), _) => Ok(*code),
            (None, UnseenPolicy::Strict) => Err(PipelineError::UnseenCategory {
                field: field.name().to_string(),
                value: value.to_string(),
            }),
            (None, UnseenPolicy::Fallback) => {
                warn!("Unseen `{}` value `{}` mapped to {}", field, value, UNKNOWN_CODE);
                Ok(UNKNOWN_CODE)
            }
        }
    }

    fn check(&self) -> Result<()> {
        for field in ORDINAL_FIELDS {
            if !self.columns.contains_key(field.name()) {
                return Err(PipelineError::InvalidArtifact(format!(
                    "ordinal encoder has no column `{field}`"
                )));
            }
        }
        Ok(())
    }
}

/// Tagged encoder state as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EncoderState {
    TargetMean(TargetMeanEncoder),
    Ordinal(OrdinalEncoder),
}

impl EncoderState {
    fn kind(&self) -> &'static str {
        match self {
            EncoderState::TargetMean(_) => "target_mean",
            EncoderState::Ordinal(_) => "ordinal",
        }
    }
}

/// Persisted form of a fitted [`EncoderSet`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderArtifact {
    pub format_version: u32,
    /// Training run that produced the fit
    pub run_id: String,
    pub policy: UnseenPolicy,
    /// Rows of the training split the encoders were fitted on
    pub fitted_rows: usize,
    pub encoders: BTreeMap<String, EncoderState>,
}

impl EncoderArtifact {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        to_canonical_bytes(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        from_json_slice(bytes)
    }

    /// BLAKE3 digest of the canonical bytes
    pub fn digest(&self) -> Result<String> {
        Ok(blake3_hex(&self.to_bytes()?))
    }
}

/// Which columns [`EncoderSet::encode_record`] emits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeTarget {
    /// [`FEATURES`], price included (training splits)
    WithPrice,
    /// [`MODEL_FEATURES`] (serving)
    FeaturesOnly,
}

#[derive(Debug, Clone, PartialEq)]
struct FittedEncoders {
    run_id: String,
    fitted_rows: usize,
    branch: TargetMeanEncoder,
    model: TargetMeanEncoder,
    others: OrdinalEncoder,
}

/// The three encoders of one training run
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderSet {
    policy: UnseenPolicy,
    fitted: Option<FittedEncoders>,
}

impl EncoderSet {
    /// Unfitted set using `policy` for unseen ordinal values
    pub fn new(policy: UnseenPolicy) -> Self {
        Self { policy, fitted: None }
    }

    pub fn policy(&self) -> UnseenPolicy {
        self.policy
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    pub fn run_id(&self) -> Option<&str> {
        self.fitted.as_ref().map(|f| f.run_id.as_str())
    }

    pub fn branch_encoder(&self) -> Result<&TargetMeanEncoder> {
        Ok(&self.fitted()?.branch)
    }

    pub fn model_encoder(&self) -> Result<&TargetMeanEncoder> {
        Ok(&self.fitted()?.model)
    }

    pub fn ordinal_encoder(&self) -> Result<&OrdinalEncoder> {
        Ok(&self.fitted()?.others)
    }

    fn fitted(&self) -> Result<&FittedEncoders> {
        self.fitted
            .as_ref()
            .ok_or_else(|| PipelineError::NotFitted("encoder set".into()))
    }

    /// Fit all three encoders on the cleaned training split. Callable once.
    #[instrument(skip(self, train, run_id), fields(rows = train.len()))]
    pub fn fit(&mut self, train: &[Record], run_id: impl Into<String>) -> Result<()> {
        if let Some(fitted) = &self.fitted {
            return Err(PipelineError::AlreadyFitted {
                run_id: fitted.run_id.clone(),
            });
        }
        if train.is_empty() {
            return Err(PipelineError::EmptySplit { split: "train".into() });
        }

        let target = train
            .iter()
            .enumerate()
            .map(|(row, r)| {
                r.number(Field::Price)
                    .ok_or_else(|| PipelineError::schema_mismatch("price", format!("missing in training row {row}")))
            })
            .collect::<Result<Vec<f64>>>()?;

        let branch = TargetMeanEncoder::fit(Field::Branch, &column_labels(train, Field::Branch)?, &target)?;
        let model = TargetMeanEncoder::fit(Field::Model, &column_labels(train, Field::Model)?, &target)?;
        let others = OrdinalEncoder::fit(train)?;

        let run_id = run_id.into();
        info!(
            "Fitted encoders for run {}: {} branches, {} models",
            run_id,
            branch.table.len(),
            model.table.len()
        );
        self.fitted = Some(FittedEncoders {
            run_id,
            fitted_rows: train.len(),
            branch,
            model,
            others,
        });
        Ok(())
    }

    /// Encode one record; the single row transform shared by training and serving
    pub fn encode_record(&self, record: &Record, target: EncodeTarget) -> Result<Vec<f64>> {
        let fitted = self.fitted()?;
        let columns: &[Field] = match target {
            EncodeTarget::WithPrice => &FEATURES,
            EncodeTarget::FeaturesOnly => &MODEL_FEATURES,
        };

        let label = |field: Field| {
            record
                .label(field)
                .ok_or_else(|| PipelineError::schema_mismatch(field.name(), "missing categorical value"))
        };

        columns
            .iter()
            .map(|&field| match field {
                Field::Branch => Ok(fitted.branch.encode(label(field)?)),
                Field::Model => Ok(fitted.model.encode(label(field)?)),
                f if ORDINAL_FIELDS.contains(&f) => fitted
                    .others
                    .encode(f, label(f)?, self.policy)
                    .map(|code| code as f64),
                f => record
                    .number(f)
                    .ok_or_else(|| PipelineError::schema_mismatch(f.name(), "missing numeric value")),
            })
            .collect()
    }

    /// Encode every record, keeping input order.
    ///
    /// Rows are encoded in parallel; on failure the error of the first
    /// failing row (in input order) is returned.
    pub fn encode_rows(&self, split: &[Record], target: EncodeTarget) -> Result<Vec<Vec<f64>>> {
        self.fitted()?;
        let rows: Vec<Result<Vec<f64>>> = split
            .par_iter()
            .map(|record| self.encode_record(record, target))
            .collect();
        rows.into_iter().collect()
    }

    /// Encode a split into [`FEATURES`] order
    pub fn transform(&self, split: &[Record]) -> Result<EncodedSplit> {
        Ok(EncodedSplit::new(self.encode_rows(split, EncodeTarget::WithPrice)?))
    }

    /// Snapshot the fitted state
    pub fn save(&self) -> Result<EncoderArtifact> {
        let fitted = self.fitted()?;
        let mut encoders = BTreeMap::new();
        encoders.insert(BRANCH_KEY.to_string(), EncoderState::TargetMean(fitted.branch.clone()));
        encoders.insert(MODEL_KEY.to_string(), EncoderState::TargetMean(fitted.model.clone()));
        encoders.insert(OTHERS_KEY.to_string(), EncoderState::Ordinal(fitted.others.clone()));
        Ok(EncoderArtifact {
            format_version: ENCODER_FORMAT_VERSION,
            run_id: fitted.run_id.clone(),
            policy: self.policy,
            fitted_rows: fitted.fitted_rows,
            encoders,
        })
    }

    /// Rebuild a fitted set from an artifact without re-fitting
    pub fn load(artifact: EncoderArtifact) -> Result<Self> {
        if artifact.format_version != ENCODER_FORMAT_VERSION {
            return Err(PipelineError::ArtifactVersionSkew {
                expected: format!("encoder format v{ENCODER_FORMAT_VERSION}"),
                found: format!("encoder format v{}", artifact.format_version),
            });
        }

        let EncoderArtifact {
            run_id,
            policy,
            fitted_rows,
            mut encoders,
            ..
        } = artifact;

        let mut target_mean = |key: &str| -> Result<TargetMeanEncoder> {
            match encoders.remove(key) {
                Some(EncoderState::TargetMean(enc)) => {
                    enc.check()?;
                    Ok(enc)
                }
                Some(other) => Err(PipelineError::InvalidArtifact(format!(
                    "`{key}` encoder has kind `{}`, expected `target_mean`",
                    other.kind()
                ))),
                None => Err(PipelineError::InvalidArtifact(format!("missing `{key}` encoder"))),
            }
        };
        let branch = target_mean(BRANCH_KEY)?;
        let model = target_mean(MODEL_KEY)?;

        let others = match encoders.remove(OTHERS_KEY) {
            Some(EncoderState::Ordinal(enc)) => {
                enc.check()?;
                enc
            }
            Some(other) => {
                return Err(PipelineError::InvalidArtifact(format!(
                    "`{OTHERS_KEY}` encoder has kind `{}`, expected `ordinal`",
                    other.kind()
                )))
            }
            None => return Err(PipelineError::InvalidArtifact(format!("missing `{OTHERS_KEY}` encoder"))),
        };

        if let Some(extra) = encoders.keys().next() {
            return Err(PipelineError::InvalidArtifact(format!("unexpected encoder `{extra}`")));
        }

        Ok(Self {
            policy,
            fitted: Some(FittedEncoders {
                run_id,
                fitted_rows,
                branch,
                model,
                others,
            }),
        })
    }
}

fn column_labels(split: &[Record], field: Field) -> Result<Vec<&str>> {
    split
        .iter()
        .enumerate()
        .map(|(row, r)| required_label(r, field, row))
        .collect()
}

fn required_label(record: &Record, field: Field, row: usize) -> Result<&str> {
    record
        .label(field)
        .ok_or_else(|| PipelineError::schema_mismatch(field.name(), format!("missing value in row {row}")))
}
