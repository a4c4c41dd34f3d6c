//! Regression tree weak learner
//!
//! Depth-first greedy tree on squared error (Friedman improvement). Nodes are
//! stored in pre-order so node ids match the order the ONNX exporter emits.
//! Callers pass rows already rounded to single precision, which keeps the
//! thresholds exact when the tree is evaluated as `f32`.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// Values closer than this are treated as equal when searching split points
const FEATURE_THRESHOLD: f64 = 1e-7;

/// Growth limits for a single tree
#[derive(Debug, Clone, Copy)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
}

/// Node of a regression tree; `feature == None` marks a leaf
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    pub feature: Option<usize>,
    /// Samples with `value <= threshold` go left
    pub threshold: f64,
    pub left: usize,
    pub right: usize,
    /// Leaf output (unscaled by the learning rate)
    pub value: f64,
}

impl TreeNode {
    fn leaf(value: f64) -> Self {
        Self {
            feature: None,
            threshold: 0.0,
            left: 0,
            right: 0,
            value,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.feature.is_none()
    }
}

/// Binary regression tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    pub nodes: Vec<TreeNode>,
}

impl RegressionTree {
    /// Fit on the rows of `x` listed in `samples`, regressing `targets`
    pub fn fit(
        x: &[Vec<f64>],
        targets: &[f64],
        samples: &[usize],
        params: TreeParams,
        rng: &mut StdRng,
    ) -> Self {
        let n_features = x.first().map_or(0, Vec::len);
        let mut builder = TreeBuilder {
            x,
            targets,
            params,
            n_features,
            rng,
            nodes: Vec::new(),
        };
        builder.grow(samples.to_vec(), 0);
        Self {
            nodes: builder.nodes,
        }
    }

    /// Index of the leaf a row falls into
    pub fn apply(&self, row: &[f64]) -> usize {
        let mut idx = 0;
        loop {
            let node = &self.nodes[idx];
            match node.feature {
                None => return idx,
                Some(feature) => {
                    let value = row.get(feature).copied().unwrap_or(0.0);
                    idx = if value <= node.threshold {
                        node.left
                    } else {
                        node.right
                    };
                }
            }
        }
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        self.nodes[self.apply(row)].value
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[TreeNode], idx: usize) -> usize {
            let node = &nodes[idx];
            if node.is_leaf() {
                0
            } else {
                1 + walk(nodes, node.left).max(walk(nodes, node.right))
            }
        }
        if self.nodes.is_empty() {
            0
        } else {
            walk(&self.nodes, 0)
        }
    }

    /// Check child links point forward inside the node table and every split
    /// reads a column of an `n_features`-wide row
    pub fn validate(&self, n_features: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        for (idx, node) in self.nodes.iter().enumerate() {
            if node.is_leaf() {
                continue;
            }
            if node.left <= idx || node.right <= idx {
                return Err(format!("node {} links backwards", idx));
            }
            if node.left >= self.nodes.len() || node.right >= self.nodes.len() {
                return Err(format!("node {} links past the node table", idx));
            }
            if let Some(feature) = node.feature.filter(|&f| f >= n_features) {
                return Err(format!(
                    "node {} splits on feature {} of {}",
                    idx, feature, n_features
                ));
            }
        }
        Ok(())
    }
}

struct BestSplit {
    proxy: f64,
    feature: usize,
    threshold: f64,
    /// Number of samples going left in sorted order
    position: usize,
}

struct TreeBuilder<'a> {
    x: &'a [Vec<f64>],
    targets: &'a [f64],
    params: TreeParams,
    n_features: usize,
    rng: &'a mut StdRng,
    nodes: Vec<TreeNode>,
}

impl TreeBuilder<'_> {
    /// Grow the subtree for `samples`, returning its node id
    fn grow(&mut self, samples: Vec<usize>, depth: usize) -> usize {
        let id = self.nodes.len();
        let (mean, impurity) = self.mean_and_variance(&samples);
        self.nodes.push(TreeNode::leaf(mean));

        let n = samples.len();
        let is_leaf = depth >= self.params.max_depth
            || n < self.params.min_samples_split
            || n < 2 * self.params.min_samples_leaf
            || impurity <= f64::EPSILON;
        if is_leaf {
            return id;
        }

        let Some(split) = self.find_split(&samples) else {
            return id;
        };

        let mut sorted = samples;
        sorted.sort_by(|&a, &b| self.x[a][split.feature].total_cmp(&self.x[b][split.feature]));
        let right_samples = sorted.split_off(split.position);
        let left_samples = sorted;

        let left = self.grow(left_samples, depth + 1);
        let right = self.grow(right_samples, depth + 1);

        let node = &mut self.nodes[id];
        node.feature = Some(split.feature);
        node.threshold = split.threshold;
        node.left = left;
        node.right = right;
        id
    }

    fn mean_and_variance(&self, samples: &[usize]) -> (f64, f64) {
        if samples.is_empty() {
            return (0.0, 0.0);
        }
        let n = samples.len() as f64;
        let sum: f64 = samples.iter().map(|&i| self.targets[i]).sum();
        let mean = sum / n;
        let variance = samples
            .iter()
            .map(|&i| (self.targets[i] - mean).powi(2))
            .sum::<f64>()
            / n;
        (mean, variance)
    }

    /// Best split over a random permutation of the features; ties keep the first seen
    fn find_split(&mut self, samples: &[usize]) -> Option<BestSplit> {
        let mut features: Vec<usize> = (0..self.n_features).collect();
        features.shuffle(&mut *self.rng);

        let n = samples.len();
        if n < 2 {
            return None;
        }
        let min_leaf = self.params.min_samples_leaf;
        let total: f64 = samples.iter().map(|&i| self.targets[i]).sum();
        let mut best: Option<BestSplit> = None;
        let mut pairs: Vec<(f64, f64)> = Vec::with_capacity(n);

        for feature in features {
            pairs.clear();
            pairs.extend(samples.iter().map(|&i| (self.x[i][feature], self.targets[i])));
            pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

            if pairs[n - 1].0 <= pairs[0].0 + FEATURE_THRESHOLD {
                continue;
            }

            let mut sum_left = 0.0;
            for pos in 1..n {
                sum_left += pairs[pos - 1].1;
                if pos < min_leaf || n - pos < min_leaf {
                    continue;
                }
                let (lo, hi) = (pairs[pos - 1].0, pairs[pos].0);
                if hi <= lo + FEATURE_THRESHOLD {
                    continue;
                }

                let w_left = pos as f64;
                let w_right = (n - pos) as f64;
                let sum_right = total - sum_left;
                let diff = w_right * sum_left - w_left * sum_right;
                let proxy = diff * diff / (w_left * w_right);

                if best.as_ref().map_or(true, |b| proxy > b.proxy) {
                    best = Some(BestSplit {
                        proxy,
                        feature,
                        threshold: split_threshold(lo, hi),
                        position: pos,
                    });
                }
            }
        }

        best
    }
}

/// Midpoint rounded to single precision, never equal to the upper value.
///
/// Exported graphs compare in `f32`, so the threshold must separate the two
/// neighbours after rounding too.
fn split_threshold(lo: f64, hi: f64) -> f64 {
    let (lo32, hi32) = (lo as f32, hi as f32);
    let mid = lo32 / 2.0 + hi32 / 2.0;
    if mid >= hi32 || !mid.is_finite() {
        lo32 as f64
    } else {
        mid as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    const PARAMS: TreeParams = TreeParams {
        max_depth: 3,
        min_samples_split: 2,
        min_samples_leaf: 1,
    };

    fn fit(x: &[Vec<f64>], y: &[f64], params: TreeParams) -> RegressionTree {
        let mut rng = StdRng::seed_from_u64(42);
        let samples: Vec<usize> = (0..x.len()).collect();
        RegressionTree::fit(x, y, &samples, params, &mut rng)
    }

    #[test]
    fn test_single_split_on_step_function() {
        let x = vec![vec![1.0], vec![2.0], vec![3.0], vec![4.0]];
        let y = vec![0.0, 0.0, 1.0, 1.0];
        let tree = fit(&x, &y, PARAMS);

        assert_eq!(tree.nodes.len(), 3);
        assert_eq!(tree.nodes[0].feature, Some(0));
        assert!((tree.nodes[0].threshold - 2.5).abs() < 1e-6);
        assert_eq!(tree.predict(&[1.5]), 0.0);
        assert_eq!(tree.predict(&[3.5]), 1.0);
    }

    #[test]
    fn test_picks_informative_feature() {
        let x = vec![
            vec![5.0, 1.0],
            vec![5.0, 2.0],
            vec![5.0, 10.0],
            vec![5.0, 11.0],
        ];
        let y = vec![-1.0, -1.0, 1.0, 1.0];
        let tree = fit(&x, &y, PARAMS);
        assert_eq!(tree.nodes[0].feature, Some(1));
        assert_eq!(tree.depth(), 1);
    }

    #[test]
    fn test_pure_node_is_leaf() {
        let x = vec![vec![1.0], vec![2.0], vec![3.0]];
        let y = vec![0.5, 0.5, 0.5];
        let tree = fit(&x, &y, PARAMS);
        assert_eq!(tree.nodes.len(), 1);
        assert_eq!(tree.predict(&[10.0]), 0.5);
    }

    #[test]
    fn test_depth_limit_and_preorder_ids() {
        let x: Vec<Vec<f64>> = (0..32).map(|i| vec![i as f64]).collect();
        let y: Vec<f64> = (0..32).map(|i| ((i * 7) % 5) as f64).collect();
        let tree = fit(&x, &y, PARAMS);

        assert!(tree.depth() <= 3);
        assert!(tree.n_leaves() <= 8);
        assert!(tree.validate(1).is_ok());
        assert!(tree.validate(0).is_err());
        // pre-order: the left child immediately follows its parent
        for (idx, node) in tree.nodes.iter().enumerate() {
            if !node.is_leaf() {
                assert_eq!(node.left, idx + 1);
            }
        }
    }

    #[test]
    fn test_min_samples_leaf() {
        let x: Vec<Vec<f64>> = (0..6).map(|i| vec![i as f64]).collect();
        let y = vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let params = TreeParams {
            max_depth: 1,
            min_samples_split: 2,
            min_samples_leaf: 2,
        };
        let tree = fit(&x, &y, params);
        let left = &tree.nodes[tree.nodes[0].left];
        // the best split with one sample per side is not allowed
        assert!(tree.nodes[0].threshold >= 1.0);
        assert!(left.value < 1.0);
    }

    #[test]
    fn test_threshold_separates_in_single_precision() {
        let lo = 1.0f64;
        let hi = f64::from(f32::from_bits(1.0f32.to_bits() + 1));
        let t = split_threshold(lo, hi);
        assert!((lo as f32) <= t as f32);
        assert!((hi as f32) > t as f32);
    }
}
