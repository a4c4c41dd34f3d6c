//! Sigmoid (Platt) calibration over stratified cross-validation folds
//!
//! For each fold a booster is trained on the remaining folds and a sigmoid
//! `p = 1 / (1 + exp(a * f + b))` is fitted to the held-out decision values.
//! The calibrated positive-class probability is the mean over folds.

use crate::config::{BoosterParams, CalibrationParams};
use crate::error::TrainError;
use crate::model::gbdt::GradientBoostingClassifier;
use crate::split::{fold_indices, stratified_folds};
use serde::{Deserialize, Serialize};
use tracing::debug;

const MAX_NEWTON_ITER: usize = 100;
const MIN_STEP: f64 = 1e-10;
/// Ridge added to the Hessian diagonal
const HESSIAN_RIDGE: f64 = 1e-12;
const GRADIENT_TOLERANCE: f64 = 1e-5;

/// Fitted sigmoid mapping decision values to probabilities
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SigmoidCalibrator {
    pub a: f64,
    pub b: f64,
}

impl SigmoidCalibrator {
    /// Fit Platt's sigmoid with smoothed targets by damped Newton iterations
    pub fn fit(decisions: &[f64], y: &[u8]) -> Result<Self, TrainError> {
        if decisions.len() != y.len() || decisions.is_empty() {
            return Err(TrainError::ShapeMismatch(format!(
                "calibration needs matching non-empty inputs, got {} decisions and {} labels",
                decisions.len(),
                y.len()
            )));
        }

        let prior1 = y.iter().filter(|&&v| v == 1).count() as f64;
        let prior0 = y.len() as f64 - prior1;
        let hi_target = (prior1 + 1.0) / (prior1 + 2.0);
        let lo_target = 1.0 / (prior0 + 2.0);
        let targets: Vec<f64> = y
            .iter()
            .map(|&v| if v == 1 { hi_target } else { lo_target })
            .collect();

        let mut a = 0.0;
        let mut b = ((prior0 + 1.0) / (prior1 + 1.0)).ln();
        let mut fval = objective(decisions, &targets, a, b);

        for iter in 0..MAX_NEWTON_ITER {
            let mut h11 = HESSIAN_RIDGE;
            let mut h22 = HESSIAN_RIDGE;
            let mut h21 = 0.0;
            let mut g1 = 0.0;
            let mut g2 = 0.0;

            for (&f, &t) in decisions.iter().zip(&targets) {
                let (p, q) = probabilities(f * a + b);
                let d2 = p * q;
                h11 += f * f * d2;
                h22 += d2;
                h21 += f * d2;
                let d1 = t - p;
                g1 += f * d1;
                g2 += d1;
            }

            if g1.abs() < GRADIENT_TOLERANCE && g2.abs() < GRADIENT_TOLERANCE {
                debug!(iter, a, b, "sigmoid calibration converged");
                break;
            }

            let det = h11 * h22 - h21 * h21;
            let da = -(h22 * g1 - h21 * g2) / det;
            let db = -(-h21 * g1 + h11 * g2) / det;
            let gd = g1 * da + g2 * db;

            let mut step = 1.0;
            while step >= MIN_STEP {
                let new_a = a + step * da;
                let new_b = b + step * db;
                let new_f = objective(decisions, &targets, new_a, new_b);
                if new_f < fval + 1e-4 * step * gd {
                    a = new_a;
                    b = new_b;
                    fval = new_f;
                    break;
                }
                step /= 2.0;
            }

            if step < MIN_STEP {
                debug!(iter, "sigmoid calibration line search stalled");
                break;
            }
        }

        Ok(Self { a, b })
    }

    /// Calibrated probability for a decision value
    pub fn predict(&self, decision: f64) -> f64 {
        probabilities(self.a * decision + self.b).0
    }
}

/// `(p, 1 - p)` for `p = 1 / (1 + exp(z))`, computed without overflow
fn probabilities(z: f64) -> (f64, f64) {
    if z >= 0.0 {
        let e = (-z).exp();
        (e / (1.0 + e), 1.0 / (1.0 + e))
    } else {
        let e = z.exp();
        (1.0 / (1.0 + e), e / (1.0 + e))
    }
}

/// Cross-entropy of the smoothed targets under the sigmoid `(a, b)`
fn objective(decisions: &[f64], targets: &[f64], a: f64, b: f64) -> f64 {
    decisions
        .iter()
        .zip(targets)
        .map(|(&f, &t)| {
            let z = f * a + b;
            if z >= 0.0 {
                t * z + (-z).exp().ln_1p()
            } else {
                (t - 1.0) * z + z.exp().ln_1p()
            }
        })
        .sum()
}

/// One cross-validation member: a booster and the sigmoid fitted on its held-out fold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibratedFold {
    pub booster: GradientBoostingClassifier,
    pub calibrator: SigmoidCalibrator,
}

/// Ensemble of calibrated boosters, one per fold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibratedClassifier {
    pub folds: Vec<CalibratedFold>,
}

impl CalibratedClassifier {
    pub fn fit(
        x: &[Vec<f64>],
        y: &[u8],
        booster: &BoosterParams,
        calibration: &CalibrationParams,
    ) -> Result<Self, TrainError> {
        if x.len() != y.len() {
            return Err(TrainError::ShapeMismatch(format!(
                "{} rows but {} labels",
                x.len(),
                y.len()
            )));
        }
        let assignment = stratified_folds(y, calibration.folds)?;

        let mut folds = Vec::with_capacity(calibration.folds);
        for fold in 0..calibration.folds {
            let split = fold_indices(&assignment, fold);
            let x_train: Vec<Vec<f64>> = split.train.iter().map(|&i| x[i].clone()).collect();
            let y_train: Vec<u8> = split.train.iter().map(|&i| y[i]).collect();
            let x_held: Vec<Vec<f64>> = split.test.iter().map(|&i| x[i].clone()).collect();
            let y_held: Vec<u8> = split.test.iter().map(|&i| y[i]).collect();

            let model = GradientBoostingClassifier::fit(&x_train, &y_train, booster)?;
            let decisions = model.decision_function(&x_held);
            let calibrator = SigmoidCalibrator::fit(&decisions, &y_held)?;
            debug!(
                fold,
                train_rows = x_train.len(),
                held_rows = x_held.len(),
                a = calibrator.a,
                b = calibrator.b,
                "calibrated fold"
            );

            folds.push(CalibratedFold {
                booster: model,
                calibrator,
            });
        }

        Ok(Self { folds })
    }

    /// Mean calibrated positive-class probability over folds
    pub fn predict_proba_positive(&self, row: &[f64]) -> f64 {
        let total: f64 = self
            .folds
            .iter()
            .map(|f| f.calibrator.predict(f.booster.decision_value(row)))
            .sum();
        total / self.folds.len().max(1) as f64
    }

    /// `[p(0), p(1)]` per row
    pub fn predict_proba(&self, x: &[Vec<f64>]) -> Vec<[f64; 2]> {
        x.iter()
            .map(|row| {
                let p1 = self.predict_proba_positive(row);
                [1.0 - p1, p1]
            })
            .collect()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.folds.is_empty() {
            return Err("calibrated classifier has no folds".to_string());
        }
        let n_features = self.folds[0].booster.n_features;
        for (idx, fold) in self.folds.iter().enumerate() {
            fold.booster
                .validate()
                .map_err(|e| format!("fold {}: {}", idx, e))?;
            if fold.booster.n_features != n_features {
                return Err(format!(
                    "fold {} expects {} features, fold 0 expects {}",
                    idx, fold.booster.n_features, n_features
                ));
            }
            if !fold.calibrator.a.is_finite() || !fold.calibrator.b.is_finite() {
                return Err(format!("fold {} has a non-finite calibrator", idx));
            }
        }
        Ok(())
    }
}
