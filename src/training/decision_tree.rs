//! Regression tree

use crate::error::{AttributionError, Result};
use ndarray::{Array1, Array2, ArrayView1};
use rand::seq::index;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Decision tree node.
///
/// `n_samples` is the number of training rows that reached the node; the
/// attribution code uses it as the node cover.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TreeNode {
    /// Leaf node with prediction value
    Leaf { value: f64, n_samples: usize },
    /// Internal node; rows with `x[feature_idx] <= threshold` go left
    Split {
        feature_idx: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
        n_samples: usize,
        impurity: f64,
    },
}

impl TreeNode {
    pub fn n_samples(&self) -> usize {
        match self {
            TreeNode::Leaf { n_samples, .. } | TreeNode::Split { n_samples, .. } => *n_samples,
        }
    }
}

/// CART regression tree with squared-error splits.
///
/// With `max_features` set, each split considers a fresh random subset of
/// that many features.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    root: Option<TreeNode>,
    /// Maximum number of split levels
    pub max_depth: Option<usize>,
    /// Minimum samples to split
    pub min_samples_split: usize,
    /// Minimum samples in leaf
    pub min_samples_leaf: usize,
    /// Features considered per split
    pub max_features: Option<usize>,
    /// Seed for the per-split feature draw
    pub random_state: u64,
    n_features: usize,
    feature_importances: Option<Array1<f64>>,
}

impl Default for DecisionTree {
    fn default() -> Self {
        Self::new()
    }
}

struct SplitCandidate {
    feature_idx: usize,
    threshold: f64,
    gain: f64,
}

impl DecisionTree {
    pub fn new() -> Self {
        Self {
            root: None,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
            random_state: 0,
            n_features: 0,
            feature_importances: None,
        }
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn with_min_samples_leaf(mut self, min_samples: usize) -> Self {
        self.min_samples_leaf = min_samples.max(1);
        self
    }

    pub fn with_max_features(mut self, max_features: usize) -> Self {
        self.max_features = Some(max_features.max(1));
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    /// Fit the tree to training data
    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<&mut Self> {
        let n_samples = x.nrows();
        let n_features = x.ncols();

        if n_samples != y.len() {
            return Err(AttributionError::ShapeError {
                expected: format!("y length = {}", n_samples),
                actual: format!("y length = {}", y.len()),
            });
        }
        if n_samples == 0 {
            return Err(AttributionError::ModelFit("cannot fit a tree on zero rows".to_string()));
        }
        if y.iter().any(|v| !v.is_finite()) {
            return Err(AttributionError::ModelFit("non-finite target value".to_string()));
        }

        self.n_features = n_features;
        let mut importances = vec![0.0; n_features];
        let mut rng = ChaCha8Rng::seed_from_u64(self.random_state);

        let indices: Vec<usize> = (0..n_samples).collect();
        self.root = Some(self.build_tree(x, y, &indices, 0, &mut importances, &mut rng));

        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            for imp in &mut importances {
                *imp /= total;
            }
        }
        self.feature_importances = Some(Array1::from_vec(importances));

        Ok(self)
    }

    fn build_tree(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        indices: &[usize],
        depth: usize,
        importances: &mut [f64],
        rng: &mut ChaCha8Rng,
    ) -> TreeNode {
        let n_samples = indices.len();
        let (sum, sq_sum) = indices
            .iter()
            .fold((0.0, 0.0), |(s, sq), &i| (s + y[i], sq + y[i] * y[i]));
        let value = sum / n_samples as f64;
        let impurity = (sq_sum / n_samples as f64 - value * value).max(0.0);

        let should_stop = n_samples < self.min_samples_split
            || n_samples < 2 * self.min_samples_leaf
            || self.max_depth.map_or(false, |d| depth >= d)
            || impurity < 1e-14
            || self.n_features == 0;
        if should_stop {
            return TreeNode::Leaf { value, n_samples };
        }

        let features = self.draw_features(rng);
        let best = match self.find_best_split(x, y, indices, &features, impurity) {
            Some(best) => best,
            None => return TreeNode::Leaf { value, n_samples },
        };

        let (left_indices, right_indices): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .partition(|&&i| x[[i, best.feature_idx]] <= best.threshold);
        if left_indices.is_empty() || right_indices.is_empty() {
            return TreeNode::Leaf { value, n_samples };
        }

        importances[best.feature_idx] += n_samples as f64 * best.gain;

        let left = Box::new(self.build_tree(x, y, &left_indices, depth + 1, importances, rng));
        let right = Box::new(self.build_tree(x, y, &right_indices, depth + 1, importances, rng));

        TreeNode::Split {
            feature_idx: best.feature_idx,
            threshold: best.threshold,
            left,
            right,
            n_samples,
            impurity,
        }
    }

    fn draw_features(&self, rng: &mut ChaCha8Rng) -> Vec<usize> {
        match self.max_features {
            Some(k) if k < self.n_features => {
                let mut features = index::sample(rng, self.n_features, k).into_vec();
                features.sort_unstable();
                features
            }
            _ => (0..self.n_features).collect(),
        }
    }

    /// Best squared-error split over `features`, scanning each feature's
    /// sorted values with running sums.
    fn find_best_split(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        indices: &[usize],
        features: &[usize],
        parent_impurity: f64,
    ) -> Option<SplitCandidate> {
        let n = indices.len();
        let total_sum: f64 = indices.iter().map(|&i| y[i]).sum();
        let total_sq: f64 = indices.iter().map(|&i| y[i] * y[i]).sum();

        let per_feature: Vec<Option<SplitCandidate>> = features
            .par_iter()
            .map(|&feature_idx| {
                let mut pairs: Vec<(f64, f64)> = indices.iter().map(|&i| (x[[i, feature_idx]], y[i])).collect();
                pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

                let mut best: Option<SplitCandidate> = None;
                let mut left_sum = 0.0;
                let mut left_sq = 0.0;
                for pos in 0..n - 1 {
                    let (xv, yv) = pairs[pos];
                    left_sum += yv;
                    left_sq += yv * yv;
                    let left_count = pos + 1;
                    let right_count = n - left_count;
                    if pairs[pos + 1].0 <= xv
                        || left_count < self.min_samples_leaf
                        || right_count < self.min_samples_leaf
                    {
                        continue;
                    }

                    let right_sum = total_sum - left_sum;
                    let right_sq = total_sq - left_sq;
                    let left_sse = left_sq - left_sum * left_sum / left_count as f64;
                    let right_sse = right_sq - right_sum * right_sum / right_count as f64;
                    let gain = parent_impurity - (left_sse + right_sse) / n as f64;

                    if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                        let mut threshold = (xv + pairs[pos + 1].0) / 2.0;
                        if threshold >= pairs[pos + 1].0 {
                            threshold = xv;
                        }
                        best = Some(SplitCandidate { feature_idx, threshold, gain });
                    }
                }
                best
            })
            .collect();

        // first feature wins ties so the result does not depend on scheduling
        per_feature.into_iter().flatten().fold(None, |acc, c| match acc {
            Some(a) if a.gain >= c.gain => Some(a),
            _ => Some(c),
        })
    }

    /// Make predictions
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let root = self.root.as_ref().ok_or(AttributionError::ModelNotFitted)?;
        self.check_width(x.ncols())?;
        Ok(x.rows().into_iter().map(|row| Self::predict_from(root, row)).collect())
    }

    fn predict_from(mut node: &TreeNode, row: ArrayView1<f64>) -> f64 {
        loop {
            match node {
                TreeNode::Leaf { value, .. } => return *value,
                TreeNode::Split { feature_idx, threshold, left, right, .. } => {
                    node = if row[*feature_idx] <= *threshold { left } else { right };
                }
            }
        }
    }

    fn check_width(&self, n_cols: usize) -> Result<()> {
        if n_cols != self.n_features {
            return Err(AttributionError::ShapeError {
                expected: format!("{} features", self.n_features),
                actual: format!("{} features", n_cols),
            });
        }
        Ok(())
    }

    pub fn root(&self) -> Option<&TreeNode> {
        self.root.as_ref()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn feature_importances(&self) -> Option<&Array1<f64>> {
        self.feature_importances.as_ref()
    }

    /// Number of split levels on the longest path
    pub fn depth(&self) -> usize {
        fn depth(node: &TreeNode) -> usize {
            match node {
                TreeNode::Leaf { .. } => 0,
                TreeNode::Split { left, right, .. } => 1 + depth(left).max(depth(right)),
            }
        }
        self.root.as_ref().map_or(0, depth)
    }

    pub fn n_leaves(&self) -> usize {
        fn leaves(node: &TreeNode) -> usize {
            match node {
                TreeNode::Leaf { .. } => 1,
                TreeNode::Split { left, right, .. } => leaves(left) + leaves(right),
            }
        }
        self.root.as_ref().map_or(0, leaves)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_regressor_simple() {
        let x = array![[1.0], [2.0], [3.0], [4.0], [5.0]];
        let y = array![1.0, 2.0, 3.0, 4.0, 5.0];

        let mut tree = DecisionTree::new();
        tree.fit(&x, &y).unwrap();

        let predictions = tree.predict(&x).unwrap();
        let mse: f64 = predictions
            .iter()
            .zip(y.iter())
            .map(|(p, a)| (p - a).powi(2))
            .sum::<f64>()
            / y.len() as f64;
        assert!(mse < 1e-12, "MSE too high: {}", mse);
    }

    #[test]
    fn test_max_depth() {
        let x = array![[1.0, 1.0], [2.0, 2.0], [3.0, 3.0], [4.0, 4.0], [5.0, 1.0]];
        let y = array![0.0, 1.0, 3.0, 7.0, 2.0];

        let mut tree = DecisionTree::new().with_max_depth(2);
        tree.fit(&x, &y).unwrap();

        assert!(tree.depth() <= 2);
        assert!(tree.n_leaves() <= 4);
    }

    #[test]
    fn test_cover_is_consistent() {
        let x = array![[1.0], [2.0], [3.0], [4.0], [5.0], [6.0]];
        let y = array![1.0, 1.0, 5.0, 5.0, 9.0, 9.0];
        let mut tree = DecisionTree::new();
        tree.fit(&x, &y).unwrap();

        fn check(node: &TreeNode) {
            if let TreeNode::Split { left, right, n_samples, .. } = node {
                assert_eq!(left.n_samples() + right.n_samples(), *n_samples);
                check(left);
                check(right);
            }
        }
        let root = tree.root().unwrap();
        assert_eq!(root.n_samples(), 6);
        check(root);
    }

    #[test]
    fn test_feature_importances() {
        let x = array![[1.0, 0.0], [2.0, 0.0], [3.0, 0.0], [4.0, 0.0]];
        let y = array![0.0, 0.0, 1.0, 1.0];

        let mut tree = DecisionTree::new();
        tree.fit(&x, &y).unwrap();

        let importances = tree.feature_importances().unwrap();
        assert_eq!(importances[0], 1.0);
        assert_eq!(importances[1], 0.0);
    }

    #[test]
    fn test_max_features_is_reproducible() {
        let x = array![
            [1.0, 5.0, 2.0],
            [2.0, 3.0, 1.0],
            [3.0, 4.0, 0.0],
            [4.0, 1.0, 3.0],
            [5.0, 2.0, 2.0],
            [6.0, 0.0, 1.0]
        ];
        let y = array![1.0, 2.5, 2.0, 4.0, 5.5, 6.0];

        let mut a = DecisionTree::new().with_max_features(1).with_random_state(7);
        let mut b = DecisionTree::new().with_max_features(1).with_random_state(7);
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();
        assert_eq!(a.predict(&x).unwrap(), b.predict(&x).unwrap());
    }

    #[test]
    fn test_zero_features_is_a_constant() {
        let x = Array2::<f64>::zeros((3, 0));
        let y = array![1.0, 2.0, 6.0];
        let mut tree = DecisionTree::new();
        tree.fit(&x, &y).unwrap();
        assert_eq!(tree.predict(&x).unwrap(), array![3.0, 3.0, 3.0]);
    }

    #[test]
    fn test_not_fitted() {
        let tree = DecisionTree::new();
        assert!(matches!(tree.predict(&array![[1.0]]), Err(AttributionError::ModelNotFitted)));
    }
}
