//! CSV and JSON listing files
//!
//! Raw splits are CSV files with a header row. Every column in
//! [`FEATURES`] must be present; `fuels` and the metadata columns are
//! optional and unknown columns are ignored. Empty cells read as missing.

use crate::errors::{Result, TrainerError};
use autoprice_core::record::{EncodedSplit, Record, FEATURES};
use autoprice_core::PipelineError;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::debug;

/// Listings loaded from one file
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Dataset {
    pub records: Vec<Record>,
}

impl Dataset {
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }

    /// Load a CSV split, checking the header first
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)?;

        let headers = reader.headers()?.clone();
        for field in FEATURES {
            if !headers.iter().any(|h| h == field.name()) {
                return Err(PipelineError::schema_mismatch(
                    field.name(),
                    format!("column missing from {}", path.display()),
                )
                .into());
            }
        }

        let records = reader
            .deserialize::<Record>()
            .enumerate()
            .map(|(line, row)| {
                row.map_err(|e| TrainerError::Dataset(format!("{}: row {}: {e}", path.display(), line + 1)))
            })
            .collect::<Result<Vec<Record>>>()?;

        debug!("Read {} records from {}", records.len(), path.display());
        Ok(Self { records })
    }

    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = csv::Writer::from_path(path.as_ref())?;
        for record in &self.records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Load a JSON array of records (prediction requests)
    pub fn from_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let records: Vec<Record> = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| TrainerError::Dataset(format!("{}: {e}", path.as_ref().display())))?;
        Ok(Self { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}

/// Write an encoded split with its column header
pub fn write_encoded<P: AsRef<Path>>(path: P, split: &EncodedSplit) -> Result<()> {
    let mut writer = csv::Writer::from_writer(BufWriter::new(File::create(path.as_ref())?));
    writer.write_record(&split.columns)?;
    for row in &split.rows {
        writer.write_record(row.iter().map(|v| v.to_string()))?;
    }
    writer.flush()?;
    Ok(())
}
