//! Serving-time replay of the training transform
//!
//! A replayer owns one encoder set and one model that are known to belong
//! together. Each request row goes through the exact row transform used to
//! build the training matrix and is then scored on its own, so predictions
//! never depend on how requests are batched.

use crate::errors::Result;
use autoprice_core::encoding::{EncodeTarget, EncoderSet};
use autoprice_core::model::Regressor;
use autoprice_core::record::{model_feature_names, Record};
use autoprice_core::{PipelineError, UnseenPolicy};
use autoprice_registry::{ArtifactRegistry, ArtifactStore, ArtifactVersion};
use rayon::prelude::*;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

/// Explicit artifact selection for serving
///
/// The model is always pinned. The encoder set defaults to the one recorded
/// in the model artifact; a caller-supplied encoder pin must match it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelPin {
    pub model: ArtifactVersion,
    pub encoder: Option<ArtifactVersion>,
}

impl ModelPin {
    pub fn model(model: ArtifactVersion) -> Self {
        Self { model, encoder: None }
    }

    pub fn with_encoder(mut self, encoder: ArtifactVersion) -> Self {
        self.encoder = Some(encoder);
        self
    }
}

pub struct InferenceReplayer<M> {
    encoders: EncoderSet,
    model: M,
    model_version: Option<ArtifactVersion>,
    encoder_version: Option<ArtifactVersion>,
}

impl<M: Regressor> InferenceReplayer<M> {
    /// Load a pinned model and its paired encoder set from the registry
    #[instrument(skip(registry))]
    pub fn load<S>(registry: &ArtifactRegistry<S>, pin: ModelPin) -> Result<Self>
    where
        S: ArtifactStore,
        M: DeserializeOwned,
    {
        let paired = registry.fetch_paired::<M>(pin.model, pin.encoder)?;
        let encoders = EncoderSet::load(paired.encoders)?;

        let mut replayer = Self::from_parts(encoders, paired.model)?;
        replayer.model_version = Some(paired.model_version);
        replayer.encoder_version = Some(paired.encoder_version);

        info!(
            "Serving {} with {} (policy {:?})",
            paired.model_version,
            paired.encoder_version,
            replayer.policy()
        );
        Ok(replayer)
    }

    /// Pair an in-memory encoder set and model, e.g. straight after training
    pub fn from_parts(encoders: EncoderSet, model: M) -> Result<Self> {
        if !encoders.is_fitted() {
            return Err(PipelineError::NotFitted("encoder set".into()).into());
        }
        let expected = model_feature_names();
        if model.feature_names() != expected.as_slice() {
            return Err(PipelineError::ArtifactVersionSkew {
                expected: format!("features {:?}", expected),
                found: format!("features {:?}", model.feature_names()),
            }
            .into());
        }
        model.validate()?;
        Ok(Self {
            encoders,
            model,
            model_version: None,
            encoder_version: None,
        })
    }

    pub fn model_version(&self) -> Option<ArtifactVersion> {
        self.model_version
    }

    pub fn encoder_version(&self) -> Option<ArtifactVersion> {
        self.encoder_version
    }

    pub fn policy(&self) -> UnseenPolicy {
        self.encoders.policy()
    }

    /// Score one request
    pub fn predict_one(&self, record: &Record) -> Result<f64> {
        let row = self.encoders.encode_record(record, EncodeTarget::FeaturesOnly)?;
        Ok(self.model.predict_row(&row)?)
    }

    /// Score a batch; output order equals input order
    ///
    /// The first failing row (in input order) fails the whole batch.
    pub fn predict(&self, records: &[Record]) -> Result<Vec<f64>> {
        debug!("Scoring {} requests", records.len());
        let scored: Vec<Result<f64>> = records.par_iter().map(|record| self.predict_one(record)).collect();
        scored.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoprice_core::fixtures::{listing, synthetic_listings};
    use autoprice_core::model::{GbdtModel, Node, Tree};
    use autoprice_core::UNKNOWN_CODE;
    use autoprice_registry::{ArtifactKind, MemoryArtifactStore};

    fn encoders(policy: UnseenPolicy) -> EncoderSet {
        let mut set = EncoderSet::new(policy);
        set.fit(&synthetic_listings(80, 4), "run-serve").unwrap();
        set
    }

    /// Splits on year (column 0) and wheel_drive code (column 10)
    fn model() -> GbdtModel {
        GbdtModel::new(
            600.0,
            0.5,
            vec![
                Tree::new(vec![Node::internal(0, 2016.0, 1, 2), Node::leaf(-40.0), Node::leaf(40.0)]),
                Tree::new(vec![
                    Node::internal(10, 0.0, 1, 2),
                    Node::leaf(-100.0),
                    Node::leaf(10.0),
                ]),
            ],
        )
    }

    fn replayer(policy: UnseenPolicy) -> InferenceReplayer<GbdtModel> {
        InferenceReplayer::from_parts(encoders(policy), model()).unwrap()
    }

    #[test]
    fn predictions_do_not_depend_on_batching() {
        let replayer = replayer(UnseenPolicy::Fallback);
        let r = listing("Ford", "Ranger", 0.0);
        let mut r2 = listing("Kia", "Morning", 0.0);
        r2.year = Some(2012.0);

        let single = replayer.predict(&[r.clone()]).unwrap();
        let batch = replayer.predict(&[r.clone(), r2.clone()]).unwrap();
        assert_eq!(single[0], batch[0]);
        assert_eq!(batch[1], replayer.predict_one(&r2).unwrap());
        assert_ne!(batch[0], batch[1]);
    }

    #[test]
    fn price_is_not_required_for_prediction() {
        let replayer = replayer(UnseenPolicy::Strict);
        let mut request = listing("Toyota", "Vios", 0.0);
        request.price = None;
        assert_eq!(replayer.predict_one(&request).unwrap(), 600.0 + 0.5 * 40.0 + 0.5 * 10.0);
    }

    #[test]
    fn unseen_wheel_drive_follows_the_fitted_policy() {
        let mut request = listing("Ford", "Ranger", 0.0);
        request.wheel_drive = Some("4WD hoặc AWD".into());

        let err = replayer(UnseenPolicy::Strict).predict(&[request.clone()]).unwrap_err();
        assert!(matches!(
            err.pipeline(),
            Some(PipelineError::UnseenCategory { field, value }) if field == "wheel_drive" && value == "4WD hoặc AWD"
        ));

        // the unknown code sits below every fitted code, so the low branch is taken
        assert!(UNKNOWN_CODE < 1);
        let fallback = replayer(UnseenPolicy::Fallback).predict_one(&request).unwrap();
        assert_eq!(fallback, 600.0 + 0.5 * 40.0 - 0.5 * 100.0);
    }

    #[test]
    fn missing_field_is_schema_mismatch() {
        let replayer = replayer(UnseenPolicy::Fallback);
        let mut request = listing("Ford", "Ranger", 0.0);
        request.km_driven = None;
        let err = replayer.predict(&[listing("Kia", "Morning", 0.0), request]).unwrap_err();
        assert!(matches!(
            err.pipeline(),
            Some(PipelineError::SchemaMismatch { field, .. }) if field == "km_driven"
        ));
    }

    #[test]
    fn unfitted_encoders_are_rejected() {
        let result = InferenceReplayer::from_parts(EncoderSet::new(UnseenPolicy::Strict), model());
        assert!(matches!(
            result.map(|_| ()).unwrap_err().pipeline(),
            Some(PipelineError::NotFitted(_))
        ));
    }

    #[test]
    fn malformed_model_is_rejected() {
        let broken = GbdtModel::new(
            600.0,
            0.5,
            vec![Tree::new(vec![Node::internal(99, 2016.0, 1, 2), Node::leaf(-40.0), Node::leaf(40.0)])],
        );
        let result = InferenceReplayer::from_parts(encoders(UnseenPolicy::Fallback), broken);
        assert!(matches!(
            result.map(|_| ()).unwrap_err().pipeline(),
            Some(PipelineError::InvalidArtifact(_))
        ));
    }

    #[test]
    fn load_resolves_the_paired_encoder_set() {
        let registry = ArtifactRegistry::new(MemoryArtifactStore::new());
        let first = registry.publish_encoders(&encoders(UnseenPolicy::Strict).save().unwrap()).unwrap();
        let second = registry.publish_encoders(&encoders(UnseenPolicy::Fallback).save().unwrap()).unwrap();
        let model_version = registry.publish_model(&model(), first).unwrap();

        let replayer = InferenceReplayer::<GbdtModel>::load(&registry, ModelPin::model(model_version)).unwrap();
        assert_eq!(replayer.encoder_version(), Some(first));
        assert_eq!(replayer.model_version(), Some(model_version));
        assert_eq!(replayer.policy(), UnseenPolicy::Strict);

        let skewed = InferenceReplayer::<GbdtModel>::load(&registry, ModelPin::model(model_version).with_encoder(second));
        assert!(matches!(
            skewed.map(|_| ()).unwrap_err().pipeline(),
            Some(PipelineError::ArtifactVersionSkew { .. })
        ));
    }

    #[test]
    fn loading_an_encoder_version_as_model_is_skew() {
        let registry = ArtifactRegistry::new(MemoryArtifactStore::new());
        let encoder = registry.publish_encoders(&encoders(UnseenPolicy::Strict).save().unwrap()).unwrap();
        assert_eq!(encoder.kind, ArtifactKind::EncoderSet);

        let result = InferenceReplayer::<GbdtModel>::load(&registry, ModelPin::model(encoder));
        assert!(matches!(
            result.map(|_| ()).unwrap_err().pipeline(),
            Some(PipelineError::ArtifactVersionSkew { .. })
        ));
    }
}
