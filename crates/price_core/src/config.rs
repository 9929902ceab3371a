//! Pipeline configuration
//!
//! A single immutable [`PipelineConfig`] value is built once (defaults, TOML
//! file or string) and handed to every component constructor. Nothing in the
//! pipeline reads configuration from globals.

use crate::errors::{PipelineError, Result};
use crate::record::{Field, FieldKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// Open interval `(lower_limit, upper_limit)`; an absent limit is unbounded
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower_limit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper_limit: Option<f64>,
}

impl Bounds {
    pub fn new(lower_limit: Option<f64>, upper_limit: Option<f64>) -> Self {
        Self {
            lower_limit,
            upper_limit,
        }
    }

    /// Exclusive on both ends
    pub fn contains(&self, value: f64) -> bool {
        self.lower_limit.map_or(true, |lo| value > lo) && self.upper_limit.map_or(true, |hi| value < hi)
    }
}

/// How the ordinal encoder treats values it never saw during fit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnseenPolicy {
    /// Fail with `UnseenCategory`
    Strict,
    /// Map to the reserved unknown code and log a warning
    #[default]
    Fallback,
}

/// Raw-record cleaning rules applied before splitting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleaningConfig {
    /// Placeholder the scraper writes for "no value"
    pub placeholder: String,
    /// Fields on which a placeholder value drops the record
    pub placeholder_fields: Vec<String>,
    /// Per-field values that drop the record
    pub rejected_values: BTreeMap<String, Vec<String>>,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        let mut rejected_values = BTreeMap::new();
        rejected_values.insert(
            "wheel_drive".to_string(),
            vec![String::new(), "4WD hoặc AWD".to_string()],
        );
        Self {
            placeholder: "-".to_string(),
            placeholder_fields: ["external_color", "internal_color", "fuels", "gearbox"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            rejected_values,
        }
    }
}

/// Stratified split parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    /// Fraction of cleaned records kept out of the test split
    pub holdout_train_fraction: f64,
    /// Fraction of the remainder kept out of the validation split
    pub validation_train_fraction: f64,
    /// Stratification column
    pub stratify_on: String,
    pub seed: i64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            holdout_train_fraction: 0.9,
            validation_train_fraction: 0.85,
            stratify_on: "branch".to_string(),
            seed: 43,
        }
    }
}

/// Anomaly detection tolerances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    /// Allowed drop of a field's presence ratio before it is reported
    pub presence_tolerance: f64,
    /// How many offending categorical values are quoted per anomaly
    pub max_reported_values: usize,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            presence_tolerance: 0.0,
            max_reported_values: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingConfig {
    pub unseen_policy: UnseenPolicy,
}

/// Gradient boosting parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub num_trees: usize,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub learning_rate: f64,
    /// Upper bound on candidate thresholds evaluated per feature and node
    pub max_thresholds: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            num_trees: 100,
            max_depth: 6,
            min_samples_leaf: 5,
            learning_rate: 0.1,
            max_thresholds: 64,
        }
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Target z-score cut-off
    pub z_threshold: f64,
    /// Numeric bounds keyed by field name
    pub numeric: BTreeMap<String, Bounds>,
    /// Categorical allow-lists keyed by field name
    pub categorical: BTreeMap<String, Vec<String>>,
    pub cleaning: CleaningConfig,
    pub split: SplitConfig,
    pub schema: SchemaConfig,
    pub encoding: EncodingConfig,
    pub training: TrainingConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let mut numeric = BTreeMap::new();
        numeric.insert("year".to_string(), Bounds::new(Some(2007.0), None));
        numeric.insert("km_driven".to_string(), Bounds::new(Some(0.0), Some(1e9)));
        numeric.insert("num_seats".to_string(), Bounds::new(Some(0.0), Some(30.0)));
        numeric.insert("engine_capacity".to_string(), Bounds::new(Some(0.0), Some(10.0)));

        let list = |values: &[&str]| values.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        let mut categorical = BTreeMap::new();
        categorical.insert("origin".to_string(), list(&["domestic", "imported"]));
        categorical.insert("wheel_drive".to_string(), list(&["FWD", "RWD", "4WD", "AWD"]));
        categorical.insert(
            "car_type".to_string(),
            list(&[
                "sedan",
                "crossover",
                "hatchback",
                "pickup",
                "suv",
                "van",
                "coupe",
                "truck",
                "convertible",
                "wagon",
            ]),
        );
        categorical.insert("gearbox".to_string(), list(&["automatic", "manual"]));

        Self {
            z_threshold: 2.8,
            numeric,
            categorical,
            cleaning: CleaningConfig::default(),
            split: SplitConfig::default(),
            schema: SchemaConfig::default(),
            encoding: EncodingConfig::default(),
            training: TrainingConfig::default(),
        }
    }
}

fn resolve_field(name: &str, expected: FieldKind, section: &str) -> Result<Field> {
    let field = Field::from_name(name).ok_or_else(|| {
        PipelineError::schema_mismatch(name, format!("`{section}` names a field listings do not have"))
    })?;
    if field.kind() != expected {
        return Err(PipelineError::schema_mismatch(
            name,
            format!("`{section}` expects a {expected:?} field"),
        ));
    }
    Ok(field)
}

impl PipelineConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(content)
            .map_err(|e| PipelineError::InvalidConfig(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        info!("Configuration loaded from: {}", path.display());
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| PipelineError::InvalidConfig(format!("Failed to serialize config: {e}")))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path.as_ref(), self.to_toml_string()?)?;
        info!("Configuration saved to: {}", path.as_ref().display());
        Ok(())
    }

    /// Numeric bounds resolved to typed fields
    pub fn numeric_bounds(&self) -> Result<Vec<(Field, Bounds)>> {
        self.numeric
            .iter()
            .map(|(name, bounds)| Ok((resolve_field(name, FieldKind::Numeric, "numeric")?, *bounds)))
            .collect()
    }

    /// Allow-lists resolved to typed fields
    pub fn allowed_values(&self) -> Result<Vec<(Field, Vec<String>)>> {
        self.categorical
            .iter()
            .map(|(name, values)| {
                Ok((resolve_field(name, FieldKind::Categorical, "categorical")?, values.clone()))
            })
            .collect()
    }

    /// Reject unusable settings; returns soft warnings for odd but legal ones
    pub fn validate(&self) -> Result<Vec<String>> {
        let mut warnings = Vec::new();

        if !(self.z_threshold > 0.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "z_threshold must be positive, got {}",
                self.z_threshold
            )));
        }

        for (field, bounds) in self.numeric_bounds()? {
            if let (Some(lo), Some(hi)) = (bounds.lower_limit, bounds.upper_limit) {
                if lo >= hi {
                    return Err(PipelineError::InvalidConfig(format!(
                        "bounds for `{field}` are empty: ({lo}, {hi})"
                    )));
                }
            }
        }

        for (field, values) in self.allowed_values()? {
            if values.is_empty() {
                warnings.push(format!("Allow-list for `{field}` is empty, every row will be dropped"));
            }
        }

        for name in self
            .cleaning
            .placeholder_fields
            .iter()
            .chain(self.cleaning.rejected_values.keys())
        {
            resolve_field(name, FieldKind::Categorical, "cleaning")?;
        }
        resolve_field(&self.split.stratify_on, FieldKind::Categorical, "split.stratify_on")?;

        for (name, fraction) in [
            ("split.holdout_train_fraction", self.split.holdout_train_fraction),
            ("split.validation_train_fraction", self.split.validation_train_fraction),
        ] {
            if !(fraction > 0.0 && fraction < 1.0) {
                return Err(PipelineError::InvalidConfig(format!(
                    "{name} must lie in (0, 1), got {fraction}"
                )));
            }
        }

        if self.schema.presence_tolerance < 0.0 {
            return Err(PipelineError::InvalidConfig(
                "schema.presence_tolerance cannot be negative".into(),
            ));
        }

        let training = &self.training;
        if training.num_trees == 0 || training.max_thresholds == 0 || training.min_samples_leaf == 0 {
            return Err(PipelineError::InvalidConfig(
                "training.num_trees, max_thresholds and min_samples_leaf must be non-zero".into(),
            ));
        }
        if !(training.learning_rate > 0.0 && training.learning_rate <= 1.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "training.learning_rate must lie in (0, 1], got {}",
                training.learning_rate
            )));
        }

        if self.encoding.unseen_policy == UnseenPolicy::Fallback {
            warnings.push("Unseen ordinal categories map to the reserved unknown code".to_string());
        }

        for w in &warnings {
            warn!("Configuration warning: {}", w);
        }
        Ok(warnings)
    }
}
