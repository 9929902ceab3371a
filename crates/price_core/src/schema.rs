//! Schema inference and anomaly detection
//!
//! A [`Schema`] is an immutable statistical snapshot of a reference split.
//! Validating another split against it yields an [`AnomalyReport`], which is
//! a value for alerting consumers and never an error.

use crate::config::SchemaConfig;
use crate::filter::mean_std;
use crate::record::{Field, FieldKind, Record};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, instrument, warn};

/// Schema serialization format version
pub const SCHEMA_FORMAT_VERSION: u32 = 1;

/// Observed numeric range of a field
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NumericRange {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
}

/// Shape of one field's values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldProfile {
    /// `range` is absent when no value was observed
    Numeric { range: Option<NumericRange> },
    Categorical { domain: BTreeSet<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Fraction of rows carrying a value
    pub presence: f64,
    pub profile: FieldProfile,
}

/// Statistical description of what reference data looks like
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub format_version: u32,
    pub row_count: usize,
    pub fields: BTreeMap<String, FieldSchema>,
}

impl Schema {
    pub fn field(&self, field: Field) -> Option<&FieldSchema> {
        self.fields.get(field.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// Categorical value outside the schema domain
    UnexpectedCategory,
    /// Numeric value outside the schema range
    OutOfRange,
    /// Presence ratio fell below the schema ratio
    PresenceDrop,
    /// Validated split holds no rows
    EmptySplit,
}

/// One field-level deviation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub field: String,
    pub kind: AnomalyKind,
    pub description: String,
}

/// Every deviation between a split and a schema
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnomalyReport {
    pub anomalies: Vec<Anomaly>,
}

impl AnomalyReport {
    pub fn is_empty(&self) -> bool {
        self.anomalies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.anomalies.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Anomaly> {
        self.anomalies.iter()
    }

    pub fn for_field<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a Anomaly> + 'a {
        self.anomalies.iter().filter(move |a| a.field == field)
    }

    fn push(&mut self, field: &str, kind: AnomalyKind, description: String) {
        self.anomalies.push(Anomaly {
            field: field.to_string(),
            kind,
            description,
        });
    }
}

/// Whether a reference schema exists yet
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaState {
    Missing,
    Present(Schema),
}

impl From<Option<Schema>> for SchemaState {
    fn from(schema: Option<Schema>) -> Self {
        schema.map_or(SchemaState::Missing, SchemaState::Present)
    }
}

/// Outcome of [`SchemaEngine::check`]
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaCheck {
    /// No schema existed; one was inferred from the split itself
    Bootstrapped { schema: Schema },
    /// The split was compared against an existing schema
    Validated { report: AnomalyReport },
}

impl SchemaCheck {
    /// The anomaly report; always empty after a bootstrap
    pub fn report(&self) -> AnomalyReport {
        match self {
            SchemaCheck::Bootstrapped { .. } => AnomalyReport::default(),
            SchemaCheck::Validated { report } => report.clone(),
        }
    }

    pub fn is_bootstrap(&self) -> bool {
        matches!(self, SchemaCheck::Bootstrapped { .. })
    }
}

/// Infers schemas and diffs splits against them
#[derive(Debug, Clone, Default)]
pub struct SchemaEngine {
    config: SchemaConfig,
}

impl SchemaEngine {
    pub fn new(config: SchemaConfig) -> Self {
        Self { config }
    }

    /// Profile every non-metadata field of the reference split
    #[instrument(skip(self, reference), fields(rows = reference.len()))]
    pub fn infer_schema(&self, reference: &[Record]) -> Schema {
        let fields = Field::ALL
            .iter()
            .map(|&field| (field.name().to_string(), profile_field(reference, field)))
            .collect();
        info!("Inferred schema over {} rows", reference.len());
        Schema {
            format_version: SCHEMA_FORMAT_VERSION,
            row_count: reference.len(),
            fields,
        }
    }

    /// Compare a split against a schema without touching either
    pub fn validate(&self, split: &[Record], schema: &Schema) -> AnomalyReport {
        let mut report = AnomalyReport::default();
        if split.is_empty() {
            report.push("*", AnomalyKind::EmptySplit, "split contains no rows".into());
            return report;
        }

        for (name, expected) in &schema.fields {
            let Some(field) = Field::from_name(name) else {
                continue;
            };
            let observed = presence(split, field);
            if observed + self.config.presence_tolerance < expected.presence {
                report.push(
                    name,
                    AnomalyKind::PresenceDrop,
                    format!(
                        "present in {:.2}% of rows, schema expects {:.2}%",
                        observed * 100.0,
                        expected.presence * 100.0
                    ),
                );
            }

            match &expected.profile {
                FieldProfile::Categorical { domain } => self.check_domain(split, field, domain, &mut report),
                FieldProfile::Numeric { range } => check_range(split, field, range.as_ref(), &mut report),
            }
        }

        if !report.is_empty() {
            warn!("Detected {} anomalies against schema", report.len());
        }
        report
    }

    /// Bootstrap a schema when none exists, otherwise validate
    pub fn check(&self, split: &[Record], state: SchemaState) -> SchemaCheck {
        match state {
            SchemaState::Missing => {
                info!("No reference schema yet; bootstrapping from current split");
                SchemaCheck::Bootstrapped {
                    schema: self.infer_schema(split),
                }
            }
            SchemaState::Present(schema) => SchemaCheck::Validated {
                report: self.validate(split, &schema),
            },
        }
    }

    /// [`Self::check`] for callers holding an optional schema; only the report is kept
    pub fn validate_or_bootstrap(&self, split: &[Record], schema: Option<&Schema>) -> AnomalyReport {
        self.check(split, schema.cloned().into()).report()
    }

    fn check_domain(
        &self,
        split: &[Record],
        field: Field,
        domain: &BTreeSet<String>,
        report: &mut AnomalyReport,
    ) {
        let mut unexpected: BTreeMap<&str, usize> = BTreeMap::new();
        for label in split.iter().filter_map(|r| r.label(field)) {
            if !domain.contains(label) {
                *unexpected.entry(label).or_insert(0) += 1;
            }
        }
        if unexpected.is_empty() {
            return;
        }

        let rows: usize = unexpected.values().sum();
        let mut quoted: Vec<&str> = unexpected.keys().copied().take(self.config.max_reported_values).collect();
        if unexpected.len() > quoted.len() {
            quoted.push("...");
        }
        report.push(
            field.name(),
            AnomalyKind::UnexpectedCategory,
            format!(
                "{} unexpected value(s) in {:.2}% of rows: {}",
                unexpected.len(),
                rows as f64 * 100.0 / split.len() as f64,
                quoted.join(", ")
            ),
        );
    }
}

fn presence(split: &[Record], field: Field) -> f64 {
    if split.is_empty() {
        return 0.0;
    }
    let present = split
        .iter()
        .filter(|r| match field.kind() {
            FieldKind::Numeric => r.number(field).is_some(),
            FieldKind::Categorical => r.label(field).is_some(),
        })
        .count();
    present as f64 / split.len() as f64
}

fn profile_field(split: &[Record], field: Field) -> FieldSchema {
    let profile = match field.kind() {
        FieldKind::Numeric => {
            let values: Vec<f64> = split.iter().filter_map(|r| r.number(field)).collect();
            let range = mean_std(&values).map(|(mean, std)| NumericRange {
                min: values.iter().copied().fold(f64::INFINITY, f64::min),
                max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                mean,
                std,
            });
            FieldProfile::Numeric { range }
        }
        FieldKind::Categorical => FieldProfile::Categorical {
            domain: split
                .iter()
                .filter_map(|r| r.label(field))
                .map(str::to_string)
                .collect(),
        },
    };
    FieldSchema {
        presence: presence(split, field),
        profile,
    }
}

fn check_range(split: &[Record], field: Field, range: Option<&NumericRange>, report: &mut AnomalyReport) {
    let values: Vec<f64> = split.iter().filter_map(|r| r.number(field)).collect();
    if values.is_empty() {
        return;
    }
    let Some(range) = range else {
        report.push(
            field.name(),
            AnomalyKind::OutOfRange,
            format!("{} value(s) where the schema observed none", values.len()),
        );
        return;
    };

    let outside = values.iter().filter(|v| **v < range.min || **v > range.max).count();
    if outside > 0 {
        let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        report.push(
            field.name(),
            AnomalyKind::OutOfRange,
            format!(
                "{} value(s) outside [{}, {}]; observed [{}, {}]",
                outside, range.min, range.max, lo, hi
            ),
        );
    }
}
