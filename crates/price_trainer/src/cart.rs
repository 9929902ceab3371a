//! CART (Classification and Regression Tree) builder
//!
//! Deterministic exact-greedy regression trees under squared loss. Each
//! feature is searched over a bounded set of candidate thresholds; among
//! equal gains the lowest `(feature, candidate)` wins.

use crate::deterministic::SplitTieBreaker;
use crate::errors::{Result, TrainerError};
use autoprice_core::config::TrainingConfig;
use autoprice_core::model::{Node, Tree};
use rayon::prelude::*;

/// Training parameters for a single tree
#[derive(Clone, Debug)]
pub struct TreeConfig {
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub max_thresholds: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self::from(&TrainingConfig::default())
    }
}

impl From<&TrainingConfig> for TreeConfig {
    fn from(config: &TrainingConfig) -> Self {
        Self {
            max_depth: config.max_depth,
            min_samples_leaf: config.min_samples_leaf,
            max_thresholds: config.max_thresholds,
        }
    }
}

/// Split candidate with gain and tie-breaker
#[derive(Debug, Clone)]
struct SplitCandidate {
    feature_idx: usize,
    threshold: f64,
    gain: f64,
    tie_breaker: SplitTieBreaker,
}

impl SplitCandidate {
    fn new(feature_idx: usize, threshold: f64, gain: f64, candidate: usize) -> Self {
        Self {
            feature_idx,
            threshold,
            gain,
            tie_breaker: SplitTieBreaker::new(feature_idx, candidate),
        }
    }

    fn beats(&self, other: &SplitCandidate) -> bool {
        self.gain > other.gain || (self.gain == other.gain && self.tie_breaker < other.tie_breaker)
    }
}

/// Sorted distinct values, thinned evenly to at most `max` thresholds
fn candidate_thresholds(sorted_values: impl Iterator<Item = f64>, max: usize) -> Vec<f64> {
    let mut unique: Vec<f64> = Vec::new();
    for value in sorted_values {
        if unique.last() != Some(&value) {
            unique.push(value);
        }
    }
    let max = max.max(1);
    if unique.len() <= max {
        return unique;
    }
    (0..max).map(|k| unique[k * unique.len() / max]).collect()
}

/// Build a regression tree on residual gradients (hessian fixed at 1)
pub struct CartBuilder<'a> {
    config: TreeConfig,
    features: &'a [Vec<f64>],
    gradients: &'a [f64],
    feature_count: usize,
}

impl<'a> CartBuilder<'a> {
    pub fn new(features: &'a [Vec<f64>], gradients: &'a [f64], config: TreeConfig) -> Result<Self> {
        if features.len() != gradients.len() {
            return Err(TrainerError::Training(format!(
                "{} feature rows but {} gradients",
                features.len(),
                gradients.len()
            )));
        }
        let feature_count = features.first().map_or(0, Vec::len);
        if let Some(i) = features.iter().position(|row| row.len() != feature_count) {
            return Err(TrainerError::Training(format!(
                "row {i} has {} features, expected {feature_count}",
                features[i].len()
            )));
        }

        Ok(Self {
            config,
            features,
            gradients,
            feature_count,
        })
    }

    /// Build tree and return nodes
    pub fn build(&self) -> Tree {
        let mut nodes = Vec::new();
        let indices: Vec<usize> = (0..self.features.len()).collect();
        self.build_node(&indices, 0, &mut nodes);
        Tree::new(nodes)
    }

    fn min_leaf(&self) -> usize {
        self.config.min_samples_leaf.max(1)
    }

    /// Recursively build tree nodes, parent before children
    fn build_node(&self, indices: &[usize], depth: usize, nodes: &mut Vec<Node>) -> usize {
        let current_idx = nodes.len();
        let leaf = Node::leaf(self.leaf_value(indices));

        if depth >= self.config.max_depth || indices.len() < 2 * self.min_leaf() {
            nodes.push(leaf);
            return current_idx;
        }

        let Some(split) = self.find_best_split(indices) else {
            nodes.push(leaf);
            return current_idx;
        };

        let (left_indices, right_indices) = self.split_samples(indices, split.feature_idx, split.threshold);

        nodes.push(Node::internal(split.feature_idx, split.threshold, 0, 0));
        let left_idx = self.build_node(&left_indices, depth + 1, nodes);
        let right_idx = self.build_node(&right_indices, depth + 1, nodes);

        nodes[current_idx].left = left_idx as i32;
        nodes[current_idx].right = right_idx as i32;
        current_idx
    }

    /// Best split over all features; features are searched in parallel and
    /// reduced in feature order
    fn find_best_split(&self, indices: &[usize]) -> Option<SplitCandidate> {
        let per_feature: Vec<Option<SplitCandidate>> = (0..self.feature_count)
            .into_par_iter()
            .map(|feature_idx| self.best_split_for(indices, feature_idx))
            .collect();

        per_feature.into_iter().flatten().fold(None, |best, candidate| match best {
            Some(current) if !candidate.beats(&current) => Some(current),
            _ => Some(candidate),
        })
    }

    /// Sweep the sorted feature once, accumulating the left-hand gradient sum
    fn best_split_for(&self, indices: &[usize], feature_idx: usize) -> Option<SplitCandidate> {
        let mut sorted: Vec<(f64, f64)> = indices
            .iter()
            .map(|&i| (self.features[i][feature_idx], self.gradients[i]))
            .collect();
        sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

        let thresholds = candidate_thresholds(sorted.iter().map(|(v, _)| *v), self.config.max_thresholds);
        let n = sorted.len();
        let total: f64 = sorted.iter().map(|(_, g)| g).sum();
        let parent_score = total * total / n as f64;
        let min_leaf = self.min_leaf();

        let mut best: Option<SplitCandidate> = None;
        let mut left_sum = 0.0;
        let mut left_count = 0usize;
        for (candidate, threshold) in thresholds.into_iter().enumerate() {
            while left_count < n && sorted[left_count].0 <= threshold {
                left_sum += sorted[left_count].1;
                left_count += 1;
            }
            let right_count = n - left_count;
            if left_count < min_leaf || right_count < min_leaf {
                continue;
            }

            // Gain = G_left²/H_left + G_right²/H_right - G²/H
            let right_sum = total - left_sum;
            let gain = left_sum * left_sum / left_count as f64 + right_sum * right_sum / right_count as f64
                - parent_score;
            if gain <= 0.0 {
                continue;
            }

            let split = SplitCandidate::new(feature_idx, threshold, gain, candidate);
            if best.as_ref().map_or(true, |current| split.beats(current)) {
                best = Some(split);
            }
        }
        best
    }

    fn split_samples(&self, indices: &[usize], feature_idx: usize, threshold: f64) -> (Vec<usize>, Vec<usize>) {
        indices
            .iter()
            .partition(|&&idx| self.features[idx][feature_idx] <= threshold)
    }

    /// Optimal leaf value: -G/H
    fn leaf_value(&self, indices: &[usize]) -> f64 {
        if indices.is_empty() {
            return 0.0;
        }
        let sum: f64 = indices.iter().map(|&i| self.gradients[i]).sum();
        -sum / indices.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_depth: usize, min_samples_leaf: usize) -> TreeConfig {
        TreeConfig {
            max_depth,
            min_samples_leaf,
            max_thresholds: 64,
        }
    }

    #[test]
    fn test_step_function_split() {
        let features: Vec<Vec<f64>> = (0..20).map(|x| vec![x as f64]).collect();
        let gradients: Vec<f64> = (0..20).map(|x| if x < 10 { -1.0 } else { 1.0 }).collect();

        let tree = CartBuilder::new(&features, &gradients, config(1, 1)).unwrap().build();

        assert_eq!(tree.nodes.len(), 3);
        assert_eq!(tree.nodes[0].threshold, 9.0);
        assert_eq!(tree.evaluate(&[3.0]).unwrap(), 1.0);
        assert_eq!(tree.evaluate(&[15.0]).unwrap(), -1.0);
        assert!(tree.validate(1).is_ok());
    }

    #[test]
    fn test_leaf_only_tree() {
        let features = vec![vec![1.0]];
        let gradients = vec![-2.0];
        let tree = CartBuilder::new(&features, &gradients, TreeConfig::default()).unwrap().build();

        assert_eq!(tree.nodes.len(), 1);
        assert_eq!(tree.nodes[0].leaf, Some(2.0));
    }

    #[test]
    fn test_min_samples_leaf_stops_growth() {
        let features: Vec<Vec<f64>> = (0..10).map(|x| vec![x as f64]).collect();
        let gradients: Vec<f64> = (0..10).map(|x| x as f64).collect();
        let tree = CartBuilder::new(&features, &gradients, config(4, 6)).unwrap().build();
        assert_eq!(tree.nodes.len(), 1);

        let tree = CartBuilder::new(&features, &gradients, config(4, 4)).unwrap().build();
        assert_eq!(tree.nodes.len(), 3);
        let left = tree.nodes[0].threshold;
        assert!((3.0..=5.0).contains(&left));
    }

    #[test]
    fn test_equal_gains_pick_lowest_feature() {
        let features: Vec<Vec<f64>> = (0..12).map(|x| vec![x as f64, x as f64]).collect();
        let gradients: Vec<f64> = (0..12).map(|x| if x < 6 { -1.0 } else { 1.0 }).collect();
        let tree = CartBuilder::new(&features, &gradients, config(1, 1)).unwrap().build();
        assert_eq!(tree.nodes[0].feature_idx, 0);
    }

    #[test]
    fn test_constant_gradients_give_a_leaf() {
        let features: Vec<Vec<f64>> = (0..30).map(|x| vec![x as f64]).collect();
        let gradients = vec![0.5; 30];
        let tree = CartBuilder::new(&features, &gradients, config(3, 1)).unwrap().build();
        assert_eq!(tree.nodes.len(), 1);
        assert_eq!(tree.nodes[0].leaf, Some(-0.5));
    }

    #[test]
    fn test_thresholds_are_bounded() {
        let values = (0..1000).map(|x| x as f64);
        let thresholds = candidate_thresholds(values, 10);
        assert_eq!(thresholds.len(), 10);
        assert!(thresholds.windows(2).all(|w| w[0] < w[1]));

        let repeated = [1.0, 1.0, 2.0, 2.0, 3.0].into_iter();
        assert_eq!(candidate_thresholds(repeated, 10), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_builds_are_deterministic() {
        let features: Vec<Vec<f64>> = (0..200)
            .map(|i| vec![(i * 7 % 31) as f64, (i * 13 % 17) as f64, (i % 5) as f64])
            .collect();
        let gradients: Vec<f64> = features.iter().map(|r| r[0] - 2.0 * r[1] + r[2] * r[2]).collect();

        let a = CartBuilder::new(&features, &gradients, config(5, 3)).unwrap().build();
        let b = CartBuilder::new(&features, &gradients, config(5, 3)).unwrap().build();
        assert_eq!(a, b);
        assert!(a.validate(3).is_ok());
        assert!(a.depth() <= 5);
    }

    #[test]
    fn test_mismatched_inputs_are_rejected() {
        let features = vec![vec![1.0], vec![2.0]];
        assert!(CartBuilder::new(&features, &[0.0], TreeConfig::default()).is_err());

        let ragged = vec![vec![1.0], vec![2.0, 3.0]];
        assert!(CartBuilder::new(&ragged, &[0.0, 0.0], TreeConfig::default()).is_err());
    }
}
