//! Static outlier filters
//!
//! Every filter here is a pure, order-preserving row selection. Dropping
//! rows is the intended outcome, so none of them can fail once the filter
//! is constructed.

use crate::config::{Bounds, PipelineConfig};
use crate::errors::Result;
use crate::record::{Field, Record, TARGET};
use std::collections::BTreeSet;
use tracing::debug;

/// Bound and allow-list filters built from a validated configuration
#[derive(Debug, Clone)]
pub struct RangeFilter {
    bounds: Vec<(Field, Bounds)>,
    allowed: Vec<(Field, BTreeSet<String>)>,
    z_threshold: f64,
}

impl RangeFilter {
    /// Resolve configured field names; unknown names are a `SchemaMismatch`
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let bounds = config.numeric_bounds()?;
        let allowed = config
            .allowed_values()?
            .into_iter()
            .map(|(field, values)| (field, values.into_iter().collect()))
            .collect();
        Ok(Self {
            bounds,
            allowed,
            z_threshold: config.z_threshold,
        })
    }

    /// Keep rows whose configured numeric fields all lie inside their bounds.
    /// A missing value is outside every bound.
    pub fn filter_numeric(&self, split: &[Record]) -> Vec<Record> {
        let kept: Vec<Record> = split
            .iter()
            .filter(|record| {
                self.bounds.iter().all(|(field, bounds)| {
                    record.number(*field).is_some_and(|v| bounds.contains(v))
                })
            })
            .cloned()
            .collect();
        debug!("filter_numeric kept {}/{} rows", kept.len(), split.len());
        kept
    }

    /// Keep rows whose allow-listed fields hold an allowed value
    pub fn filter_categorical(&self, split: &[Record]) -> Vec<Record> {
        let kept: Vec<Record> = split
            .iter()
            .filter(|record| {
                self.allowed.iter().all(|(field, values)| {
                    record.label(*field).is_some_and(|v| values.contains(v))
                })
            })
            .cloned()
            .collect();
        debug!("filter_categorical kept {}/{} rows", kept.len(), split.len());
        kept
    }

    /// Drop rows whose price z-score reaches the threshold.
    ///
    /// Mean and population standard deviation are computed over the priced
    /// rows of this split only. Rows without a price are dropped. With zero
    /// variance no priced row is an outlier.
    pub fn filter_target_outliers(&self, split: &[Record]) -> Vec<Record> {
        let prices: Vec<f64> = split.iter().filter_map(|r| r.number(TARGET)).collect();
        let Some((mean, std)) = mean_std(&prices) else {
            return Vec::new();
        };

        let kept: Vec<Record> = split
            .iter()
            .filter(|record| match record.number(TARGET) {
                None => false,
                Some(_) if std == 0.0 => true,
                Some(price) => ((price - mean) / std).abs() < self.z_threshold,
            })
            .cloned()
            .collect();
        debug!(
            "filter_target_outliers kept {}/{} rows (mean={:.3}, std={:.3})",
            kept.len(),
            split.len(),
            mean,
            std
        );
        kept
    }

    /// `filter_categorical(filter_numeric(split))`
    pub fn filter_ranges(&self, split: &[Record]) -> Vec<Record> {
        self.filter_categorical(&self.filter_numeric(split))
    }
}

/// Mean and population standard deviation; `None` for an empty slice
pub(crate) fn mean_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some((mean, var.sqrt()))
}
