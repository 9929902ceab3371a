//! Price regressors
//!
//! The pipeline treats the model as opaque behind [`Regressor`]. The bundled
//! implementation is a gradient-boosted ensemble of regression trees
//! ([`GbdtModel`]) evaluated on rows in [`crate::record::MODEL_FEATURES`] order.

use crate::errors::{PipelineError, Result};
use crate::record::model_feature_names;
use serde::{Deserialize, Serialize};

/// Model artifact format version
pub const MODEL_FORMAT_VERSION: u32 = 1;

/// A fitted model consuming encoded feature rows
pub trait Regressor: Send + Sync {
    /// Column names the model was trained on, in input order
    fn feature_names(&self) -> &[String];

    fn format_version(&self) -> u32;

    /// Structural check run before a loaded model is served
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Predict one encoded row
    fn predict_row(&self, features: &[f64]) -> Result<f64>;

    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>> {
        rows.iter().map(|row| self.predict_row(row)).collect()
    }
}

/// A tree node; leaves carry `leaf`, internal nodes carry a split
///
/// Indices use `-1` for "none", so node 0 is always the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub left: i32,
    pub right: i32,
    pub feature_idx: i32,
    /// Rows with `feature <= threshold` go left
    pub threshold: f64,
    pub leaf: Option<f64>,
}

impl Node {
    pub fn internal(feature_idx: usize, threshold: f64, left: usize, right: usize) -> Self {
        Self {
            left: left as i32,
            right: right as i32,
            feature_idx: feature_idx as i32,
            threshold,
            leaf: None,
        }
    }

    pub fn leaf(value: f64) -> Self {
        Self {
            left: -1,
            right: -1,
            feature_idx: -1,
            threshold: 0.0,
            leaf: Some(value),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.leaf.is_some()
    }
}

/// One regression tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

impl Tree {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    /// Leaf value reached by `features`
    pub fn evaluate(&self, features: &[f64]) -> Result<f64> {
        let mut idx = 0usize;
        // a well-formed tree reaches a leaf in at most `nodes.len()` steps
        for _ in 0..=self.nodes.len() {
            let node = self
                .nodes
                .get(idx)
                .ok_or_else(|| PipelineError::InvalidArtifact(format!("tree node {idx} does not exist")))?;
            if let Some(value) = node.leaf {
                return Ok(value);
            }
            let value = features.get(node.feature_idx as usize).ok_or_else(|| {
                PipelineError::schema_mismatch(
                    "features",
                    format!("row has {} columns, split needs column {}", features.len(), node.feature_idx),
                )
            })?;
            let next = if *value <= node.threshold { node.left } else { node.right };
            idx = next as usize;
        }
        Err(PipelineError::InvalidArtifact("tree contains a cycle".into()))
    }

    pub fn validate(&self, num_features: usize) -> std::result::Result<(), String> {
        if self.nodes.is_empty() {
            return Err("Tree has no nodes".to_string());
        }
        for (i, node) in self.nodes.iter().enumerate() {
            if node.is_leaf() {
                if !node.leaf.is_some_and(f64::is_finite) {
                    return Err(format!("Leaf node {i} has a non-finite value"));
                }
                continue;
            }
            for child in [node.left, node.right] {
                // children always come after their parent
                if child <= i as i32 || child as usize >= self.nodes.len() {
                    return Err(format!("Node {i} has invalid child: {child}"));
                }
            }
            if node.feature_idx < 0 || node.feature_idx as usize >= num_features {
                return Err(format!("Node {i} has invalid feature index: {}", node.feature_idx));
            }
            if !node.threshold.is_finite() {
                return Err(format!("Node {i} has a non-finite threshold"));
            }
        }
        Ok(())
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match nodes.get(idx) {
                Some(node) if !node.is_leaf() => {
                    1 + walk(nodes, node.left as usize).max(walk(nodes, node.right as usize))
                }
                _ => 0,
            }
        }
        walk(&self.nodes, 0)
    }
}

/// Gradient-boosted regression trees under squared loss
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GbdtModel {
    pub format_version: u32,
    pub feature_names: Vec<String>,
    /// Initial prediction (target mean of the training split)
    pub base_score: f64,
    pub learning_rate: f64,
    pub trees: Vec<Tree>,
}

impl GbdtModel {
    pub fn new(base_score: f64, learning_rate: f64, trees: Vec<Tree>) -> Self {
        Self {
            format_version: MODEL_FORMAT_VERSION,
            feature_names: model_feature_names(),
            base_score,
            learning_rate,
            trees,
        }
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn validate(&self) -> Result<()> {
        if self.format_version != MODEL_FORMAT_VERSION {
            return Err(PipelineError::ArtifactVersionSkew {
                expected: format!("model format v{MODEL_FORMAT_VERSION}"),
                found: format!("model format v{}", self.format_version),
            });
        }
        if !self.base_score.is_finite() || !self.learning_rate.is_finite() {
            return Err(PipelineError::InvalidArtifact("model has non-finite parameters".into()));
        }
        for (i, tree) in self.trees.iter().enumerate() {
            tree.validate(self.feature_names.len())
                .map_err(|e| PipelineError::InvalidArtifact(format!("Tree {i} validation failed: {e}")))?;
        }
        Ok(())
    }
}

impl Regressor for GbdtModel {
    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn format_version(&self) -> u32 {
        self.format_version
    }

    fn validate(&self) -> Result<()> {
        GbdtModel::validate(self)
    }

    fn predict_row(&self, features: &[f64]) -> Result<f64> {
        if features.len() != self.feature_names.len() {
            return Err(PipelineError::schema_mismatch(
                "features",
                format!("expected {} columns, got {}", self.feature_names.len(), features.len()),
            ));
        }
        let mut score = self.base_score;
        for tree in &self.trees {
            score += self.learning_rate * tree.evaluate(features)?;
        }
        Ok(score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::MODEL_FEATURES;
    use crate::serde_canon::{from_json_slice, hash_canonical_hex, to_canonical_bytes};

    fn stump(feature: usize, threshold: f64, left: f64, right: f64) -> Tree {
        Tree::new(vec![
            Node::internal(feature, threshold, 1, 2),
            Node::leaf(left),
            Node::leaf(right),
        ])
    }

    fn row(year: f64, km: f64) -> Vec<f64> {
        let mut row = vec![0.0; MODEL_FEATURES.len()];
        row[0] = year;
        row[1] = km;
        row
    }

    fn test_model() -> GbdtModel {
        GbdtModel::new(500.0, 0.5, vec![stump(0, 2015.0, -100.0, 100.0), stump(1, 50_000.0, 40.0, -40.0)])
    }

    #[test]
    fn stump_evaluation_goes_left_on_equal() {
        let tree = stump(0, 50.0, 1.0, 2.0);
        assert_eq!(tree.evaluate(&[30.0]).unwrap(), 1.0);
        assert_eq!(tree.evaluate(&[50.0]).unwrap(), 1.0);
        assert_eq!(tree.evaluate(&[60.0]).unwrap(), 2.0);
        assert_eq!(tree.depth(), 1);
    }

    #[test]
    fn ensemble_sums_scaled_leaves() {
        let model = test_model();
        assert!(model.validate().is_ok());
        assert_eq!(model.predict_row(&row(2020.0, 10_000.0)).unwrap(), 500.0 + 50.0 + 20.0);
        assert_eq!(model.predict_row(&row(2012.0, 90_000.0)).unwrap(), 500.0 - 50.0 - 20.0);
    }

    #[test]
    fn wrong_width_is_schema_mismatch() {
        let model = test_model();
        assert!(matches!(
            model.predict_row(&[2020.0]),
            Err(PipelineError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn invalid_children_are_rejected() {
        let mut model = test_model();
        model.trees[0].nodes[0].left = 7;
        assert!(matches!(model.validate(), Err(PipelineError::InvalidArtifact(_))));

        let mut model = test_model();
        model.trees[1].nodes[0].feature_idx = 99;
        assert!(model.validate().is_err());
    }

    #[test]
    fn unknown_format_is_skew() {
        let mut model = test_model();
        model.format_version = 2;
        assert!(matches!(model.validate(), Err(PipelineError::ArtifactVersionSkew { .. })));
    }

    #[test]
    fn canonical_round_trip_keeps_hash() {
        let model = test_model();
        let bytes = to_canonical_bytes(&model).unwrap();
        let loaded: GbdtModel = from_json_slice(&bytes).unwrap();
        assert_eq!(model, loaded);
        assert_eq!(hash_canonical_hex(&model).unwrap(), hash_canonical_hex(&loaded).unwrap());
    }
}
