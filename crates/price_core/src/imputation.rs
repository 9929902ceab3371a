//! Missing-value imputation fitted on the training split
//!
//! Statistics always come from train and are replayed unchanged on every
//! other split.

use crate::errors::{PipelineError, Result};
use crate::record::{Field, Record};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

/// Fill values learned from the training split
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Imputer {
    /// Most frequent `wheel_drive`; ties go to the lexicographically smallest value
    pub wheel_drive_mode: String,
    /// Mean `engine_capacity`, truncated toward zero
    pub engine_capacity_mean: f64,
}

impl Imputer {
    pub fn fit(train: &[Record]) -> Result<Self> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for label in train.iter().filter_map(|r| r.label(Field::WheelDrive)) {
            *counts.entry(label).or_insert(0) += 1;
        }
        // BTreeMap iterates in sorted order, so the first maximum is the smallest label
        let mode = counts
            .iter()
            .fold(None::<(&str, usize)>, |best, (label, count)| match best {
                Some((_, c)) if c >= *count => best,
                _ => Some((*label, *count)),
            })
            .map(|(label, _)| label.to_string())
            .ok_or_else(|| {
                PipelineError::schema_mismatch("wheel_drive", "no observed value in the training split")
            })?;

        let capacities: Vec<f64> = train.iter().filter_map(|r| r.number(Field::EngineCapacity)).collect();
        if capacities.is_empty() {
            return Err(PipelineError::schema_mismatch(
                "engine_capacity",
                "no observed value in the training split",
            ));
        }
        let mean = (capacities.iter().sum::<f64>() / capacities.len() as f64).trunc();

        info!("Imputer fitted: wheel_drive mode={}, engine_capacity mean={}", mode, mean);
        Ok(Self {
            wheel_drive_mode: mode,
            engine_capacity_mean: mean,
        })
    }

    /// Fill missing values; present values are left untouched
    pub fn apply(&self, split: &[Record]) -> Vec<Record> {
        split
            .iter()
            .map(|record| {
                let mut filled = record.clone();
                if filled.label(Field::WheelDrive).is_none() {
                    filled.set_label(Field::WheelDrive, Some(self.wheel_drive_mode.clone()));
                }
                if filled.number(Field::EngineCapacity).is_none() {
                    filled.set_number(Field::EngineCapacity, Some(self.engine_capacity_mean));
                }
                filled
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::listing;

    fn with(wheel: Option<&str>, engine: Option<f64>) -> Record {
        let mut r = listing("Mazda", "3", 600.0);
        r.wheel_drive = wheel.map(String::from);
        r.engine_capacity = engine;
        r
    }

    #[test]
    fn fits_mode_and_truncated_mean() {
        let train = vec![
            with(Some("RWD"), Some(2.5)),
            with(Some("FWD"), Some(2.0)),
            with(Some("FWD"), Some(2.9)),
            with(None, None),
        ];
        let imputer = Imputer::fit(&train).unwrap();
        assert_eq!(imputer.wheel_drive_mode, "FWD");
        assert_eq!(imputer.engine_capacity_mean, 2.0);
    }

    #[test]
    fn mode_tie_takes_smallest_label() {
        let train = vec![with(Some("RWD"), Some(1.0)), with(Some("AWD"), Some(1.0))];
        assert_eq!(Imputer::fit(&train).unwrap().wheel_drive_mode, "AWD");
    }

    #[test]
    fn apply_only_fills_missing() {
        let imputer = Imputer {
            wheel_drive_mode: "FWD".into(),
            engine_capacity_mean: 2.0,
        };
        let out = imputer.apply(&[with(None, Some(3.5)), with(Some("4WD"), None)]);
        assert_eq!(out[0].wheel_drive.as_deref(), Some("FWD"));
        assert_eq!(out[0].engine_capacity, Some(3.5));
        assert_eq!(out[1].wheel_drive.as_deref(), Some("4WD"));
        assert_eq!(out[1].engine_capacity, Some(2.0));
    }

    #[test]
    fn train_without_values_is_schema_mismatch() {
        assert!(matches!(
            Imputer::fit(&[with(None, Some(1.0))]),
            Err(PipelineError::SchemaMismatch { .. })
        ));
    }
}
