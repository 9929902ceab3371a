//! Gradient Boosted Decision Tree (GBDT) trainer
//!
//! Squared-loss boosting over exact-greedy CART trees. The first
//! prediction is the training target mean; every tree fits the current
//! residuals and contributes `learning_rate * leaf`.

use crate::cart::{CartBuilder, TreeConfig};
use crate::errors::{Result, TrainerError};
use autoprice_core::config::TrainingConfig;
use autoprice_core::model::{GbdtModel, Regressor};
use autoprice_core::record::{EncodedSplit, MODEL_FEATURES};
use autoprice_core::PipelineError;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

/// Anything that can be fitted on encoded rows and yields a [`Regressor`]
pub trait Estimator {
    type Model: Regressor;

    fn fit(&self, features: &[Vec<f64>], targets: &[f64]) -> Result<Self::Model>;

    /// Fit on an encoded split in FEATURES order
    fn train(&self, split: &EncodedSplit) -> Result<Self::Model> {
        self.fit(&split.features(), &split.targets())
    }
}

/// GBDT trainer
pub struct GbdtTrainer {
    config: TrainingConfig,
}

impl GbdtTrainer {
    pub fn new(config: TrainingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    fn check_inputs(features: &[Vec<f64>], targets: &[f64]) -> Result<()> {
        if features.is_empty() {
            return Err(TrainerError::Training("cannot train on an empty split".into()));
        }
        if features.len() != targets.len() {
            return Err(TrainerError::Training(format!(
                "{} feature rows but {} targets",
                features.len(),
                targets.len()
            )));
        }
        if let Some(row) = features.iter().find(|row| row.len() != MODEL_FEATURES.len()) {
            return Err(PipelineError::schema_mismatch(
                "features",
                format!("expected {} columns, got {}", MODEL_FEATURES.len(), row.len()),
            )
            .into());
        }
        if targets.iter().any(|t| !t.is_finite()) {
            return Err(TrainerError::Training("targets must be finite".into()));
        }
        Ok(())
    }
}

impl Estimator for GbdtTrainer {
    type Model = GbdtModel;

    #[instrument(skip_all, fields(rows = features.len(), trees = self.config.num_trees))]
    fn fit(&self, features: &[Vec<f64>], targets: &[f64]) -> Result<GbdtModel> {
        Self::check_inputs(features, targets)?;

        let base_score = targets.iter().sum::<f64>() / targets.len() as f64;
        let learning_rate = self.config.learning_rate;
        let tree_config = TreeConfig::from(&self.config);

        let mut predictions = vec![base_score; targets.len()];
        let mut trees = Vec::with_capacity(self.config.num_trees);

        for tree_idx in 0..self.config.num_trees {
            debug!("Training tree {}/{}", tree_idx + 1, self.config.num_trees);

            // gradient of 0.5 * (pred - target)^2
            let gradients: Vec<f64> = predictions.iter().zip(targets).map(|(p, t)| p - t).collect();
            let tree = CartBuilder::new(features, &gradients, tree_config.clone())?.build();

            for (prediction, row) in predictions.iter_mut().zip(features) {
                *prediction += learning_rate * tree.evaluate(row)?;
            }
            trees.push(tree);
        }

        let model = GbdtModel::new(base_score, learning_rate, trees);
        model.validate()?;
        info!(
            "Trained {} trees, train rmse {:.3}",
            model.num_trees(),
            rmse(&predictions, targets)
        );
        Ok(model)
    }
}

fn rmse(predictions: &[f64], targets: &[f64]) -> f64 {
    let sse: f64 = predictions.iter().zip(targets).map(|(p, t)| (p - t).powi(2)).sum();
    (sse / targets.len().max(1) as f64).sqrt()
}

/// RMSE and R² of a model on one split
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub split: String,
    pub rows: usize,
    pub rmse: f64,
    pub r2: f64,
}

pub fn evaluate<M: Regressor + ?Sized>(model: &M, name: &str, split: &EncodedSplit) -> Result<EvaluationReport> {
    if split.is_empty() {
        return Err(PipelineError::EmptySplit { split: name.to_string() }.into());
    }
    let targets = split.targets();
    let predictions = model.predict(&split.features())?;

    let mean = targets.iter().sum::<f64>() / targets.len() as f64;
    let ss_res: f64 = predictions.iter().zip(&targets).map(|(p, t)| (t - p).powi(2)).sum();
    let ss_tot: f64 = targets.iter().map(|t| (t - mean).powi(2)).sum();
    let r2 = if ss_tot > 0.0 {
        1.0 - ss_res / ss_tot
    } else if ss_res == 0.0 {
        1.0
    } else {
        0.0
    };

    let report = EvaluationReport {
        split: name.to_string(),
        rows: targets.len(),
        rmse: rmse(&predictions, &targets),
        r2,
    };
    info!("Split {}: rmse {:.3}, r2 {:.4}", name, report.rmse, report.r2);
    Ok(report)
}
