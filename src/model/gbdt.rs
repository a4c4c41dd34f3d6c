//! Gradient-boosted tree classifier for the binary intervention target
//!
//! Each stage fits a regression tree to the log-loss residuals `y - p` and
//! replaces its leaf means with a single Newton step
//! `sum(residual) / sum(p * (1 - p))`. The decision value is the log-odds
//! prior plus the learning-rate-scaled sum of all tree outputs.

use crate::config::BoosterParams;
use crate::error::TrainError;
use crate::model::tree::{RegressionTree, TreeParams};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Denominators below this magnitude produce a zero leaf update
const MIN_HESSIAN: f64 = 1e-150;

/// Binary gradient boosting classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostingClassifier {
    /// Log-odds of the positive class in the training labels
    pub init_score: f64,
    pub learning_rate: f64,
    pub n_features: usize,
    pub trees: Vec<RegressionTree>,
}

impl GradientBoostingClassifier {
    /// Fit on transformed rows and 0/1 labels
    pub fn fit(x: &[Vec<f64>], y: &[u8], params: &BoosterParams) -> Result<Self, TrainError> {
        if x.len() != y.len() {
            return Err(TrainError::ShapeMismatch(format!(
                "{} rows but {} labels",
                x.len(),
                y.len()
            )));
        }
        let n = x.len();
        let positives = y.iter().filter(|&&v| v == 1).count();
        if positives == 0 || positives == n {
            return Err(TrainError::InsufficientData(format!(
                "booster needs both classes, got {} positives in {} rows",
                positives, n
            )));
        }

        let x = to_single_precision(x);
        let n_features = x[0].len();
        let prior = positives as f64 / n as f64;
        let init_score = (prior / (1.0 - prior)).ln();

        let tree_params = TreeParams {
            max_depth: params.max_depth,
            min_samples_split: params.min_samples_split,
            min_samples_leaf: params.min_samples_leaf,
        };
        let mut rng = StdRng::seed_from_u64(params.seed);
        let samples: Vec<usize> = (0..n).collect();
        let mut raw = vec![init_score; n];
        let mut trees = Vec::with_capacity(params.n_estimators);

        for stage in 0..params.n_estimators {
            let probs: Vec<f64> = raw.iter().map(|&r| sigmoid(r)).collect();
            let residuals: Vec<f64> = y
                .iter()
                .zip(&probs)
                .map(|(&label, p)| label as f64 - p)
                .collect();

            let mut tree = RegressionTree::fit(&x, &residuals, &samples, tree_params, &mut rng);
            let leaf_of: Vec<usize> = x.iter().map(|row| tree.apply(row)).collect();
            newton_leaf_values(&mut tree, &leaf_of, &residuals, &probs);

            for (score, &leaf) in raw.iter_mut().zip(&leaf_of) {
                *score += params.learning_rate * tree.nodes[leaf].value;
            }
            trees.push(tree);

            if stage % 25 == 0 {
                debug!(stage, loss = log_loss(y, &raw), "boosting");
            }
        }

        Ok(Self {
            init_score,
            learning_rate: params.learning_rate,
            n_features,
            trees,
        })
    }

    /// Raw log-odds for one transformed row
    pub fn decision_value(&self, row: &[f64]) -> f64 {
        let row: Vec<f64> = row.iter().map(|&v| v as f32 as f64).collect();
        self.init_score
            + self.learning_rate * self.trees.iter().map(|t| t.predict(&row)).sum::<f64>()
    }

    /// Raw log-odds for many rows
    pub fn decision_function(&self, x: &[Vec<f64>]) -> Vec<f64> {
        x.iter().map(|row| self.decision_value(row)).collect()
    }

    /// Uncalibrated positive-class probability
    pub fn predict_proba_positive(&self, row: &[f64]) -> f64 {
        sigmoid(self.decision_value(row))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.trees.is_empty() {
            return Err("booster has no trees".to_string());
        }
        for (idx, tree) in self.trees.iter().enumerate() {
            tree.validate(self.n_features)
                .map_err(|e| format!("tree {}: {}", idx, e))?;
        }
        Ok(())
    }
}

/// Replace leaf values with the Newton step for binomial deviance
fn newton_leaf_values(
    tree: &mut RegressionTree,
    leaf_of: &[usize],
    residuals: &[f64],
    probs: &[f64],
) {
    let mut numerator = vec![0.0; tree.nodes.len()];
    let mut denominator = vec![0.0; tree.nodes.len()];
    for ((&leaf, r), p) in leaf_of.iter().zip(residuals).zip(probs) {
        numerator[leaf] += r;
        denominator[leaf] += p * (1.0 - p);
    }
    for (idx, node) in tree.nodes.iter_mut().enumerate() {
        if !node.is_leaf() {
            continue;
        }
        node.value = if denominator[idx].abs() < MIN_HESSIAN {
            0.0
        } else {
            numerator[idx] / denominator[idx]
        };
    }
}

fn to_single_precision(x: &[Vec<f64>]) -> Vec<Vec<f64>> {
    x.iter()
        .map(|row| row.iter().map(|&v| v as f32 as f64).collect())
        .collect()
}

/// Logistic function, stable for large magnitudes
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Mean binomial deviance of raw scores
fn log_loss(y: &[u8], raw: &[f64]) -> f64 {
    let total: f64 = y
        .iter()
        .zip(raw)
        .map(|(&label, &r)| {
            // log(1 + exp(r)) - y * r
            let softplus = if r > 0.0 {
                r + (-r).exp().ln_1p()
            } else {
                r.exp().ln_1p()
            };
            softplus - label as f64 * r
        })
        .sum();
    total / y.len().max(1) as f64
}
