//! Store-backed schema tracking
//!
//! The first run has no schema artifact: the training split's schema is
//! inferred and published. Later runs validate every split against the
//! latest published schema.

use crate::errors::Result;
use autoprice_core::record::Record;
use autoprice_core::schema::{AnomalyReport, SchemaCheck, SchemaEngine, SchemaState};
use autoprice_registry::{ArtifactRegistry, ArtifactStore, ArtifactVersion, RegistryError};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Result of one tracking pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaTracking {
    /// Schema the splits were checked against
    pub schema_version: ArtifactVersion,
    /// True when this pass published the first schema
    pub bootstrapped: bool,
    /// One report per split, keyed by split name
    pub reports: BTreeMap<String, AnomalyReport>,
}

impl SchemaTracking {
    pub fn total_anomalies(&self) -> usize {
        self.reports.values().map(AnomalyReport::len).sum()
    }
}

pub struct SchemaTracker<'a, S> {
    engine: SchemaEngine,
    registry: &'a ArtifactRegistry<S>,
}

impl<'a, S: ArtifactStore> SchemaTracker<'a, S> {
    pub fn new(engine: SchemaEngine, registry: &'a ArtifactRegistry<S>) -> Self {
        Self { engine, registry }
    }

    /// Check `reference` and each of `others` against the current schema,
    /// bootstrapping it from `reference` when none was published yet
    pub fn track(&self, reference: &[Record], others: &[(&str, &[Record])]) -> Result<SchemaTracking> {
        let (latest, state) = self.registry.schema_state()?;
        let existing = match &state {
            SchemaState::Present(schema) => latest.map(|version| (version, schema.clone())),
            SchemaState::Missing => None,
        };

        let mut reports = BTreeMap::new();
        let (schema_version, schema, bootstrapped) = match (self.engine.check(reference, state), existing) {
            (SchemaCheck::Bootstrapped { schema }, _) => {
                let version = self.registry.publish_schema(&schema)?;
                info!("Bootstrapped schema {} from {} reference rows", version, reference.len());
                reports.insert("reference".to_string(), AnomalyReport::default());
                (version, schema, true)
            }
            (SchemaCheck::Validated { report }, Some((version, schema))) => {
                reports.insert("reference".to_string(), report);
                (version, schema, false)
            }
            (SchemaCheck::Validated { .. }, None) => {
                return Err(RegistryError::NotFound("version of the latest schema".into()).into());
            }
        };

        for (name, split) in others {
            let report = self.engine.validate(split, &schema);
            if !report.is_empty() {
                warn!("Split {} has {} anomalies against {}", name, report.len(), schema_version);
            }
            reports.insert(name.to_string(), report);
        }

        Ok(SchemaTracking {
            schema_version,
            bootstrapped,
            reports,
        })
    }
}
