//! Raw listing cleanup and stratified train/validation/test splitting

use crate::errors::Result;
use crate::preparer::RawSplits;
use autoprice_core::config::{CleaningConfig, PipelineConfig, SplitConfig};
use autoprice_core::deterministic::LcgRng;
use autoprice_core::record::{Field, Record};
use autoprice_core::PipelineError;
use std::collections::BTreeMap;
use tracing::{info, instrument};

fn resolve(name: &str) -> Result<Field> {
    Field::from_name(name)
        .ok_or_else(|| PipelineError::schema_mismatch(name, "not a listing field").into())
}

/// Drop scraped records carrying placeholder or rejected values
///
/// A placeholder on any of the configured fields drops the record, as does
/// any configured rejected value. Missing values are kept for imputation.
pub fn clean_raw(records: &[Record], cleaning: &CleaningConfig) -> Result<Vec<Record>> {
    let placeholder_fields = cleaning
        .placeholder_fields
        .iter()
        .map(|name| resolve(name))
        .collect::<Result<Vec<_>>>()?;
    let rejected = cleaning
        .rejected_values
        .iter()
        .map(|(name, values)| Ok((resolve(name)?, values.as_slice())))
        .collect::<Result<Vec<_>>>()?;

    let kept: Vec<Record> = records
        .iter()
        .filter(|r| {
            placeholder_fields
                .iter()
                .all(|f| r.label(*f) != Some(cleaning.placeholder.as_str()))
        })
        .filter(|r| {
            rejected
                .iter()
                .all(|(f, values)| r.label(*f).map_or(true, |v| !values.iter().any(|x| x == v)))
        })
        .map(Record::without_metadata)
        .collect();

    info!("Cleaning kept {}/{} raw records", kept.len(), records.len());
    Ok(kept)
}

/// Split `records` so that each `stratify_on` group keeps `train_fraction` of
/// its rows on the first side. Both outputs keep input order.
pub fn stratified_split(
    records: &[Record],
    stratify_on: Field,
    train_fraction: f64,
    rng: &mut LcgRng,
) -> (Vec<Record>, Vec<Record>) {
    let mut groups: BTreeMap<Option<&str>, Vec<usize>> = BTreeMap::new();
    for (i, record) in records.iter().enumerate() {
        groups.entry(record.label(stratify_on)).or_default().push(i);
    }

    let mut in_train = vec![false; records.len()];
    for indices in groups.values_mut() {
        rng.shuffle(indices);
        let take = ((indices.len() as f64) * train_fraction).round() as usize;
        for &i in indices.iter().take(take.min(indices.len())) {
            in_train[i] = true;
        }
    }

    let mut train = Vec::with_capacity(records.len());
    let mut rest = Vec::new();
    for (record, keep) in records.iter().zip(in_train) {
        if keep {
            train.push(record.clone());
        } else {
            rest.push(record.clone());
        }
    }
    (train, rest)
}

/// Clean raw records and cut them into train, validation and test
#[instrument(skip(records, config), fields(rows = records.len()))]
pub fn split_raw(records: &[Record], config: &PipelineConfig) -> Result<RawSplits> {
    let SplitConfig {
        holdout_train_fraction,
        validation_train_fraction,
        ref stratify_on,
        seed,
    } = config.split;

    let cleaned = clean_raw(records, &config.cleaning)?;
    let field = resolve(stratify_on)?;
    let mut rng = LcgRng::new(seed);

    let (train_val, test) = stratified_split(&cleaned, field, holdout_train_fraction, &mut rng);
    let (train, validation) = stratified_split(&train_val, field, validation_train_fraction, &mut rng);

    info!(
        "Split {} records into train={}, validation={}, test={}",
        cleaned.len(),
        train.len(),
        validation.len(),
        test.len()
    );
    Ok(RawSplits {
        train,
        validation,
        test,
    })
}
