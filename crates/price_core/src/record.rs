//! Listing records and the fixed feature layout
//!
//! A [`Record`] is one scraped listing. Metadata columns (title, url,
//! post date, location) ride along but never reach the encoders; the model
//! only ever sees [`FEATURES`] in that exact order.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a field carries numbers or category labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Numeric,
    Categorical,
}

/// Every non-metadata field of a listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Year,
    Price,
    KmDriven,
    NumSeats,
    EngineCapacity,
    Branch,
    Model,
    Origin,
    ExternalColor,
    InternalColor,
    Gearbox,
    WheelDrive,
    CarType,
    Fuels,
}

impl Field {
    /// All fields profiled by the schema engine
    pub const ALL: [Field; 14] = [
        Field::Year,
        Field::Price,
        Field::KmDriven,
        Field::NumSeats,
        Field::EngineCapacity,
        Field::Branch,
        Field::Model,
        Field::Origin,
        Field::ExternalColor,
        Field::InternalColor,
        Field::Gearbox,
        Field::WheelDrive,
        Field::CarType,
        Field::Fuels,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Field::Year => "year",
            Field::Price => "price",
            Field::KmDriven => "km_driven",
            Field::NumSeats => "num_seats",
            Field::EngineCapacity => "engine_capacity",
            Field::Branch => "branch",
            Field::Model => "model",
            Field::Origin => "origin",
            Field::ExternalColor => "external_color",
            Field::InternalColor => "internal_color",
            Field::Gearbox => "gearbox",
            Field::WheelDrive => "wheel_drive",
            Field::CarType => "car_type",
            Field::Fuels => "fuels",
        }
    }

    pub fn kind(self) -> FieldKind {
        match self {
            Field::Year | Field::Price | Field::KmDriven | Field::NumSeats | Field::EngineCapacity => {
                FieldKind::Numeric
            }
            _ => FieldKind::Categorical,
        }
    }

    /// Resolve a canonical column name
    pub fn from_name(name: &str) -> Option<Field> {
        Field::ALL.iter().copied().find(|f| f.name() == name)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordered training columns: numeric first, then categorical.
pub const FEATURES: [Field; 13] = [
    Field::Year,
    Field::Price,
    Field::KmDriven,
    Field::NumSeats,
    Field::EngineCapacity,
    Field::Branch,
    Field::Model,
    Field::Origin,
    Field::ExternalColor,
    Field::InternalColor,
    Field::Gearbox,
    Field::WheelDrive,
    Field::CarType,
];

/// Prediction input columns (FEATURES without the target)
pub const MODEL_FEATURES: [Field; 12] = [
    Field::Year,
    Field::KmDriven,
    Field::NumSeats,
    Field::EngineCapacity,
    Field::Branch,
    Field::Model,
    Field::Origin,
    Field::ExternalColor,
    Field::InternalColor,
    Field::Gearbox,
    Field::WheelDrive,
    Field::CarType,
];

/// Low-cardinality fields sharing the ordinal encoder, in column order
pub const ORDINAL_FIELDS: [Field; 6] = [
    Field::ExternalColor,
    Field::InternalColor,
    Field::Origin,
    Field::Gearbox,
    Field::WheelDrive,
    Field::CarType,
];

/// Regression target
pub const TARGET: Field = Field::Price;

pub fn feature_names() -> Vec<String> {
    FEATURES.iter().map(|f| f.name().to_string()).collect()
}

pub fn model_feature_names() -> Vec<String> {
    MODEL_FEATURES.iter().map(|f| f.name().to_string()).collect()
}

/// One scraped listing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Record {
    pub title: Option<String>,
    pub url: Option<String>,
    pub post_date: Option<String>,
    pub location: Option<String>,

    pub year: Option<f64>,
    pub km_driven: Option<f64>,
    pub num_seats: Option<f64>,
    pub engine_capacity: Option<f64>,
    pub price: Option<f64>,

    pub branch: Option<String>,
    pub model: Option<String>,
    pub origin: Option<String>,
    pub external_color: Option<String>,
    pub internal_color: Option<String>,
    pub gearbox: Option<String>,
    pub wheel_drive: Option<String>,
    pub car_type: Option<String>,
    pub fuels: Option<String>,
}

impl Record {
    /// Numeric value of `field`; `None` for categorical fields or missing values
    pub fn number(&self, field: Field) -> Option<f64> {
        match field {
            Field::Year => self.year,
            Field::Price => self.price,
            Field::KmDriven => self.km_driven,
            Field::NumSeats => self.num_seats,
            Field::EngineCapacity => self.engine_capacity,
            _ => None,
        }
        .filter(|v| !v.is_nan())
    }

    /// Category label of `field`; `None` for numeric fields or missing values
    pub fn label(&self, field: Field) -> Option<&str> {
        let value = match field {
            Field::Branch => &self.branch,
            Field::Model => &self.model,
            Field::Origin => &self.origin,
            Field::ExternalColor => &self.external_color,
            Field::InternalColor => &self.internal_color,
            Field::Gearbox => &self.gearbox,
            Field::WheelDrive => &self.wheel_drive,
            Field::CarType => &self.car_type,
            Field::Fuels => &self.fuels,
            _ => return None,
        };
        value.as_deref()
    }

    pub fn set_number(&mut self, field: Field, value: Option<f64>) {
        match field {
            Field::Year => self.year = value,
            Field::Price => self.price = value,
            Field::KmDriven => self.km_driven = value,
            Field::NumSeats => self.num_seats = value,
            Field::EngineCapacity => self.engine_capacity = value,
            _ => {}
        }
    }

    pub fn set_label(&mut self, field: Field, value: Option<String>) {
        match field {
            Field::Branch => self.branch = value,
            Field::Model => self.model = value,
            Field::Origin => self.origin = value,
            Field::ExternalColor => self.external_color = value,
            Field::InternalColor => self.internal_color = value,
            Field::Gearbox => self.gearbox = value,
            Field::WheelDrive => self.wheel_drive = value,
            Field::CarType => self.car_type = value,
            Field::Fuels => self.fuels = value,
            _ => {}
        }
    }

    /// Copy without the non-feature metadata columns
    pub fn without_metadata(&self) -> Record {
        Record {
            title: None,
            url: None,
            post_date: None,
            location: None,
            ..self.clone()
        }
    }
}

/// A fully numeric split with columns in [`FEATURES`] order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedSplit {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl EncodedSplit {
    pub fn new(rows: Vec<Vec<f64>>) -> Self {
        Self {
            columns: feature_names(),
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn target_index() -> usize {
        FEATURES.iter().position(|f| *f == TARGET).unwrap_or(0)
    }

    /// Model inputs in [`MODEL_FEATURES`] order
    pub fn features(&self) -> Vec<Vec<f64>> {
        let target = Self::target_index();
        self.rows
            .iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .filter(|(i, _)| *i != target)
                    .map(|(_, v)| *v)
                    .collect()
            })
            .collect()
    }

    pub fn targets(&self) -> Vec<f64> {
        let target = Self::target_index();
        self.rows.iter().map(|row| row[target]).collect()
    }

    /// Values of one column
    pub fn column(&self, field: Field) -> Option<Vec<f64>> {
        let idx = FEATURES.iter().position(|f| *f == field)?;
        Some(self.rows.iter().map(|row| row[idx]).collect())
    }
}
