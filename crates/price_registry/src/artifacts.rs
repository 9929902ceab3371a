//! Typed facade over an [`ArtifactStore`]
//!
//! A model artifact records the encoder-set version it was trained with and
//! that encoder payload's BLAKE3 digest. [`ArtifactRegistry::fetch_paired`]
//! refuses any combination where either no longer matches.

use crate::errors::{RegistryError, Result};
use crate::storage::ArtifactStore;
use crate::types::{ArtifactKind, ArtifactVersion, VersionSelector};
use autoprice_core::encoding::{EncoderArtifact, ENCODER_FORMAT_VERSION};
use autoprice_core::model::{Regressor, MODEL_FORMAT_VERSION};
use autoprice_core::record::model_feature_names;
use autoprice_core::schema::{Schema, SchemaState, SCHEMA_FORMAT_VERSION};
use autoprice_core::serde_canon::{from_json_slice, to_canonical_bytes};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

/// Persisted model plus the encoder set it must be served with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact<M> {
    pub format_version: u32,
    pub model: M,
    pub encoder: ArtifactVersion,
    pub encoder_blake3: String,
    /// Input column order the model expects
    pub features: Vec<String>,
}

/// A model and its encoder set, checked to belong together
#[derive(Debug, Clone)]
pub struct PairedArtifacts<M> {
    pub model_version: ArtifactVersion,
    pub encoder_version: ArtifactVersion,
    pub model: M,
    pub encoders: EncoderArtifact,
}

/// Schema, encoder and model artifacts on top of one store
pub struct ArtifactRegistry<S> {
    store: S,
}

fn expect_kind(version: ArtifactVersion, kind: ArtifactKind) -> Result<()> {
    if version.kind != kind {
        return Err(RegistryError::skew(format!("a {kind} version"), version.to_string()));
    }
    Ok(())
}

impl<S: ArtifactStore> ArtifactRegistry<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn resolve(&self, kind: ArtifactKind, selector: VersionSelector) -> Result<ArtifactVersion> {
        match selector {
            VersionSelector::Pinned(number) => Ok(ArtifactVersion::new(kind, number)),
            VersionSelector::Latest => self
                .store
                .latest(kind)?
                .ok_or_else(|| RegistryError::NotFound(format!("no {kind} artifact published"))),
        }
    }

    fn fetch_json<T: DeserializeOwned>(&self, version: ArtifactVersion) -> Result<(T, String)> {
        let record = self.store.fetch(version)?;
        Ok((from_json_slice(&record.payload)?, record.blake3))
    }

    pub fn publish_schema(&self, schema: &Schema) -> Result<ArtifactVersion> {
        let version = self.store.publish(ArtifactKind::Schema, to_canonical_bytes(schema)?)?;
        info!("Published schema {} ({} rows)", version, schema.row_count);
        Ok(version)
    }

    pub fn fetch_schema(&self, selector: VersionSelector) -> Result<(ArtifactVersion, Schema)> {
        let version = self.resolve(ArtifactKind::Schema, selector)?;
        let (schema, _): (Schema, _) = self.fetch_json(version)?;
        if schema.format_version != SCHEMA_FORMAT_VERSION {
            return Err(RegistryError::skew(
                format!("schema format v{SCHEMA_FORMAT_VERSION}"),
                format!("schema format v{}", schema.format_version),
            ));
        }
        Ok((version, schema))
    }

    /// Latest schema, or [`SchemaState::Missing`] on a first run
    pub fn schema_state(&self) -> Result<(Option<ArtifactVersion>, SchemaState)> {
        if self.store.latest(ArtifactKind::Schema)?.is_none() {
            return Ok((None, SchemaState::Missing));
        }
        let (version, schema) = self.fetch_schema(VersionSelector::Latest)?;
        Ok((Some(version), SchemaState::Present(schema)))
    }

    pub fn publish_encoders(&self, encoders: &EncoderArtifact) -> Result<ArtifactVersion> {
        let version = self.store.publish(ArtifactKind::EncoderSet, encoders.to_bytes()?)?;
        info!("Published encoder set {} for run {}", version, encoders.run_id);
        Ok(version)
    }

    pub fn fetch_encoders(&self, selector: VersionSelector) -> Result<(ArtifactVersion, EncoderArtifact)> {
        let version = self.resolve(ArtifactKind::EncoderSet, selector)?;
        let (encoders, _): (EncoderArtifact, _) = self.fetch_json(version)?;
        Ok((version, encoders))
    }

    /// Publish a model bound to an already published encoder set
    #[instrument(skip(self, model))]
    pub fn publish_model<M>(&self, model: &M, encoder: ArtifactVersion) -> Result<ArtifactVersion>
    where
        M: Regressor + Serialize,
    {
        expect_kind(encoder, ArtifactKind::EncoderSet)?;
        let encoder_record = self.store.fetch(encoder)?;
        let artifact = ModelArtifact {
            format_version: model.format_version(),
            model,
            encoder,
            encoder_blake3: encoder_record.blake3,
            features: model.feature_names().to_vec(),
        };
        let version = self.store.publish(ArtifactKind::Model, to_canonical_bytes(&artifact)?)?;
        info!("Published model {} paired with {}", version, encoder);
        Ok(version)
    }

    /// Fetch a pinned model together with the encoder set it was trained with
    ///
    /// `encoder_pin`, when given, must equal the version recorded in the
    /// model artifact.
    #[instrument(skip(self))]
    pub fn fetch_paired<M>(
        &self,
        model_version: ArtifactVersion,
        encoder_pin: Option<ArtifactVersion>,
    ) -> Result<PairedArtifacts<M>>
    where
        M: Regressor + DeserializeOwned,
    {
        expect_kind(model_version, ArtifactKind::Model)?;
        let (artifact, _): (ModelArtifact<M>, _) = self.fetch_json(model_version)?;

        if artifact.format_version != MODEL_FORMAT_VERSION
            || artifact.model.format_version() != MODEL_FORMAT_VERSION
        {
            return Err(RegistryError::skew(
                format!("model format v{MODEL_FORMAT_VERSION}"),
                format!("model format v{}", artifact.format_version),
            ));
        }
        if let Some(pin) = encoder_pin {
            if pin != artifact.encoder {
                return Err(RegistryError::skew(
                    format!("{} (recorded in {})", artifact.encoder, model_version),
                    pin.to_string(),
                ));
            }
        }

        let expected_features = model_feature_names();
        if artifact.features != expected_features || artifact.model.feature_names() != expected_features {
            return Err(RegistryError::skew(
                format!("features {:?}", expected_features),
                format!("features {:?}", artifact.features),
            ));
        }

        let (encoders, digest): (EncoderArtifact, _) = self.fetch_json(artifact.encoder)?;
        if digest != artifact.encoder_blake3 {
            return Err(RegistryError::skew(
                format!("{} with digest {}", artifact.encoder, artifact.encoder_blake3),
                format!("digest {digest}"),
            ));
        }
        if encoders.format_version != ENCODER_FORMAT_VERSION {
            return Err(RegistryError::skew(
                format!("encoder format v{ENCODER_FORMAT_VERSION}"),
                format!("encoder format v{}", encoders.format_version),
            ));
        }

        Ok(PairedArtifacts {
            model_version,
            encoder_version: artifact.encoder,
            model: artifact.model,
            encoders,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryArtifactStore;
    use autoprice_core::config::UnseenPolicy;
    use autoprice_core::encoding::EncoderSet;
    use autoprice_core::fixtures::synthetic_listings;
    use autoprice_core::model::{GbdtModel, Node, Tree};
    use autoprice_core::schema::SchemaEngine;
    use autoprice_core::PipelineError;

    fn encoders(seed: u64) -> EncoderArtifact {
        let mut set = EncoderSet::new(UnseenPolicy::Fallback);
        set.fit(&synthetic_listings(30, seed), format!("run-{seed}")).unwrap();
        set.save().unwrap()
    }

    fn model() -> GbdtModel {
        GbdtModel::new(
            600.0,
            0.1,
            vec![Tree::new(vec![Node::internal(0, 2016.0, 1, 2), Node::leaf(-30.0), Node::leaf(30.0)])],
        )
    }

    fn is_skew(result: Result<PairedArtifacts<GbdtModel>>) -> bool {
        matches!(result, Err(RegistryError::Pipeline(PipelineError::ArtifactVersionSkew { .. })))
    }

    #[test]
    fn schema_state_bootstraps_then_reads_latest() {
        let registry = ArtifactRegistry::new(MemoryArtifactStore::new());
        assert!(matches!(registry.schema_state().unwrap(), (None, SchemaState::Missing)));

        let schema = SchemaEngine::default().infer_schema(&synthetic_listings(10, 1));
        let version = registry.publish_schema(&schema).unwrap();

        let (latest, state) = registry.schema_state().unwrap();
        assert_eq!(latest, Some(version));
        assert_eq!(state, SchemaState::Present(schema.clone()));
        assert_eq!(registry.fetch_schema(VersionSelector::Pinned(1)).unwrap().1, schema);
    }

    #[test]
    fn encoders_round_trip_through_store() {
        let registry = ArtifactRegistry::new(MemoryArtifactStore::new());
        let artifact = encoders(1);
        let version = registry.publish_encoders(&artifact).unwrap();
        let (fetched_version, fetched) = registry.fetch_encoders(VersionSelector::Latest).unwrap();
        assert_eq!(fetched_version, version);
        assert_eq!(fetched, artifact);
    }

    #[test]
    fn paired_fetch_returns_recorded_encoder() {
        let registry = ArtifactRegistry::new(MemoryArtifactStore::new());
        let first = registry.publish_encoders(&encoders(1)).unwrap();
        let model_v = registry.publish_model(&model(), first).unwrap();
        // a newer encoder set must not leak into the pairing
        registry.publish_encoders(&encoders(2)).unwrap();

        let paired: PairedArtifacts<GbdtModel> = registry.fetch_paired(model_v, None).unwrap();
        assert_eq!(paired.encoder_version, first);
        assert_eq!(paired.encoders.run_id, "run-1");
        assert_eq!(paired.model, model());
    }

    #[test]
    fn mismatched_encoder_pin_is_skew() {
        let registry = ArtifactRegistry::new(MemoryArtifactStore::new());
        let first = registry.publish_encoders(&encoders(1)).unwrap();
        let second = registry.publish_encoders(&encoders(2)).unwrap();
        let model_v = registry.publish_model(&model(), first).unwrap();

        assert!(registry.fetch_paired::<GbdtModel>(model_v, Some(first)).is_ok());
        assert!(is_skew(registry.fetch_paired(model_v, Some(second))));
    }

    #[test]
    fn wrong_kind_is_skew() {
        let registry = ArtifactRegistry::new(MemoryArtifactStore::new());
        let enc = registry.publish_encoders(&encoders(1)).unwrap();
        assert!(is_skew(registry.fetch_paired(enc, None)));
        assert!(registry.publish_model(&model(), ArtifactVersion::new(ArtifactKind::Schema, 1)).is_err());
    }

    #[test]
    fn encoder_digest_mismatch_is_skew() {
        let registry = ArtifactRegistry::new(MemoryArtifactStore::new());
        let enc = registry.publish_encoders(&encoders(1)).unwrap();
        let artifact = ModelArtifact {
            format_version: MODEL_FORMAT_VERSION,
            model: model(),
            encoder: enc,
            encoder_blake3: "0".repeat(64),
            features: model_feature_names(),
        };
        let model_v = registry
            .store()
            .publish(ArtifactKind::Model, to_canonical_bytes(&artifact).unwrap())
            .unwrap();
        assert!(is_skew(registry.fetch_paired(model_v, None)));
    }

    #[test]
    fn reordered_features_are_skew() {
        let registry = ArtifactRegistry::new(MemoryArtifactStore::new());
        let enc = registry.publish_encoders(&encoders(1)).unwrap();
        let mut reordered = model();
        reordered.feature_names.swap(0, 1);
        let model_v = registry.publish_model(&reordered, enc).unwrap();
        assert!(is_skew(registry.fetch_paired(model_v, None)));
    }

    #[test]
    fn tampered_encoder_payload_is_corruption() {
        let store = MemoryArtifactStore::new();
        let registry = ArtifactRegistry::new(store.clone());
        let enc = registry.publish_encoders(&encoders(1)).unwrap();
        let model_v = registry.publish_model(&model(), enc).unwrap();

        store.tamper(enc, encoders(2).to_bytes().unwrap());
        assert!(matches!(
            registry.fetch_paired::<GbdtModel>(model_v, None),
            Err(RegistryError::Corrupted { .. })
        ));
    }
}
