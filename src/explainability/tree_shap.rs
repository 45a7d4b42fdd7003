//! Exact path-dependent TreeSHAP for the tree ensembles
//!
//! Node covers are the training row counts stored on each [`TreeNode`], so
//! the base value of a tree is its cover-weighted mean leaf value and the
//! attributions of a row always sum to `prediction - base`.

use crate::error::{AttributionError, Result};
use crate::training::{DecisionTree, GradientBoostingRegressor, RandomForest, TreeNode};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

#[derive(Debug, Clone, Copy)]
struct PathElement {
    feature: Option<usize>,
    zero_fraction: f64,
    one_fraction: f64,
    pweight: f64,
}

/// Grow the permutation weights by one split on `feature`
fn extend_path(path: &mut Vec<PathElement>, zero_fraction: f64, one_fraction: f64, feature: Option<usize>) {
    let depth = path.len();
    path.push(PathElement {
        feature,
        zero_fraction,
        one_fraction,
        pweight: if depth == 0 { 1.0 } else { 0.0 },
    });
    let denom = (depth + 1) as f64;
    for i in (0..depth).rev() {
        path[i + 1].pweight += one_fraction * path[i].pweight * (i + 1) as f64 / denom;
        path[i].pweight = zero_fraction * path[i].pweight * (depth - i) as f64 / denom;
    }
}

/// Undo [`extend_path`] for the element at `index`
fn unwind_path(path: &mut Vec<PathElement>, index: usize) {
    let depth = path.len() - 1;
    let one = path[index].one_fraction;
    let zero = path[index].zero_fraction;
    let denom = (depth + 1) as f64;
    let mut next_one_portion = path[depth].pweight;

    for i in (0..depth).rev() {
        if one != 0.0 {
            let tmp = path[i].pweight;
            path[i].pweight = next_one_portion * denom / ((i + 1) as f64 * one);
            next_one_portion = tmp - path[i].pweight * zero * (depth - i) as f64 / denom;
        } else {
            path[i].pweight = path[i].pweight * denom / (zero * (depth - i) as f64);
        }
    }

    for i in index..depth {
        path[i].feature = path[i + 1].feature;
        path[i].zero_fraction = path[i + 1].zero_fraction;
        path[i].one_fraction = path[i + 1].one_fraction;
    }
    path.pop();
}

/// Total permutation weight with the element at `index` removed
fn unwound_path_sum(path: &[PathElement], index: usize) -> f64 {
    let depth = path.len() - 1;
    let one = path[index].one_fraction;
    let zero = path[index].zero_fraction;
    let mut next_one_portion = path[depth].pweight;
    let mut total = 0.0;

    if one != 0.0 {
        for i in (0..depth).rev() {
            let tmp = next_one_portion / ((i + 1) as f64 * one);
            total += tmp;
            next_one_portion = path[i].pweight - tmp * zero * (depth - i) as f64;
        }
    } else {
        for i in (0..depth).rev() {
            total += path[i].pweight / (zero * (depth - i) as f64);
        }
    }
    total * (depth + 1) as f64
}

/// One tree of an ensemble with its output weight and column mapping
#[derive(Debug, Clone, Copy)]
struct WeightedTree<'a> {
    root: &'a TreeNode,
    weight: f64,
    /// Local feature index -> model input column
    columns: Option<&'a [usize]>,
}

impl<'a> WeightedTree<'a> {
    fn column(&self, local: usize) -> usize {
        self.columns.map_or(local, |c| c[local])
    }

    fn expected_value(&self) -> f64 {
        let root_cover = self.root.n_samples() as f64;
        if root_cover == 0.0 {
            return 0.0;
        }
        self.weight * leaf_mass(self.root) / root_cover
    }

    fn accumulate(&self, row: ArrayView1<f64>, phi: &mut [f64]) {
        self.recurse(self.root, row, phi, &[], 1.0, 1.0, None);
    }

    fn recurse(
        &self,
        node: &TreeNode,
        row: ArrayView1<f64>,
        phi: &mut [f64],
        parent: &[PathElement],
        zero_fraction: f64,
        one_fraction: f64,
        feature: Option<usize>,
    ) {
        let mut path = parent.to_vec();
        extend_path(&mut path, zero_fraction, one_fraction, feature);

        match node {
            TreeNode::Leaf { value, .. } => {
                for i in 1..path.len() {
                    let weight = unwound_path_sum(&path, i);
                    let element = path[i];
                    if let Some(f) = element.feature {
                        phi[f] += weight * (element.one_fraction - element.zero_fraction) * value * self.weight;
                    }
                }
            }
            TreeNode::Split {
                feature_idx,
                threshold,
                left,
                right,
                n_samples,
                ..
            } => {
                let column = self.column(*feature_idx);
                let (hot, cold) = if row[column] <= *threshold {
                    (left.as_ref(), right.as_ref())
                } else {
                    (right.as_ref(), left.as_ref())
                };

                let mut incoming_zero = 1.0;
                let mut incoming_one = 1.0;
                if let Some(k) = (1..path.len()).find(|&k| path[k].feature == Some(column)) {
                    incoming_zero = path[k].zero_fraction;
                    incoming_one = path[k].one_fraction;
                    unwind_path(&mut path, k);
                }

                let cover = *n_samples as f64;
                let hot_fraction = hot.n_samples() as f64 / cover;
                let cold_fraction = cold.n_samples() as f64 / cover;
                self.recurse(hot, row, phi, &path, hot_fraction * incoming_zero, incoming_one, Some(column));
                self.recurse(cold, row, phi, &path, cold_fraction * incoming_zero, 0.0, Some(column));
            }
        }
    }
}

fn leaf_mass(node: &TreeNode) -> f64 {
    match node {
        TreeNode::Leaf { value, n_samples } => value * *n_samples as f64,
        TreeNode::Split { left, right, .. } => leaf_mass(left) + leaf_mass(right),
    }
}

fn fitted_root(tree: &DecisionTree) -> Result<&TreeNode> {
    tree.root().ok_or(AttributionError::ModelNotFitted)
}

/// Exact attributions for a fitted tree ensemble
#[derive(Debug, Clone)]
pub struct TreeExplainer<'a> {
    trees: Vec<WeightedTree<'a>>,
    base_value: f64,
    n_features: usize,
}

impl<'a> TreeExplainer<'a> {
    /// A single tree
    pub fn for_tree(tree: &'a DecisionTree) -> Result<Self> {
        let weighted = WeightedTree {
            root: fitted_root(tree)?,
            weight: 1.0,
            columns: None,
        };
        Ok(Self::assemble(vec![weighted], 0.0, tree.n_features()))
    }

    /// Average of the forest's trees
    pub fn for_forest(forest: &'a RandomForest) -> Result<Self> {
        let trees = forest.trees();
        if trees.is_empty() {
            return Err(AttributionError::ModelNotFitted);
        }
        let weight = 1.0 / trees.len() as f64;
        let weighted = trees
            .iter()
            .map(|t| {
                Ok(WeightedTree {
                    root: fitted_root(t)?,
                    weight,
                    columns: None,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::assemble(weighted, 0.0, forest.n_features()))
    }

    /// Initial prediction plus learning-rate weighted trees, each mapped
    /// back from its column subsample
    pub fn for_boosting(model: &'a GradientBoostingRegressor) -> Result<Self> {
        let trees = model.trees();
        let columns = model.col_indices_per_tree();
        if trees.len() != columns.len() {
            return Err(AttributionError::Computation(format!(
                "{} trees but {} column sets",
                trees.len(),
                columns.len()
            )));
        }
        let lr = model.learning_rate();
        let weighted = trees
            .iter()
            .zip(columns)
            .map(|(t, cols)| {
                Ok(WeightedTree {
                    root: fitted_root(t)?,
                    weight: lr,
                    columns: Some(cols.as_slice()),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::assemble(weighted, model.initial_prediction(), model.n_features()))
    }

    fn assemble(trees: Vec<WeightedTree<'a>>, offset: f64, n_features: usize) -> Self {
        let base_value = offset + trees.iter().map(WeightedTree::expected_value).sum::<f64>();
        Self {
            trees,
            base_value,
            n_features,
        }
    }

    pub fn base_value(&self) -> f64 {
        self.base_value
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Attributions of one row
    pub fn explain_row(&self, row: ArrayView1<f64>) -> Result<Array1<f64>> {
        if row.len() != self.n_features {
            return Err(AttributionError::ShapeError {
                expected: format!("{} features", self.n_features),
                actual: format!("{} features", row.len()),
            });
        }
        let mut phi = vec![0.0; self.n_features];
        for tree in &self.trees {
            tree.accumulate(row, &mut phi);
        }
        Ok(Array1::from_vec(phi))
    }

    /// Attributions of every row of `x`
    pub fn explain(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        let mut out = Array2::zeros((x.nrows(), self.n_features));
        for (row, mut target) in x.rows().into_iter().zip(out.rows_mut()) {
            target.assign(&self.explain_row(row)?);
        }
        Ok(out)
    }
}
