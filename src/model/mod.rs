//! Classifier: gradient-boosted trees wrapped in sigmoid calibration
//!
//! Pipeline: transformed rows → K boosters (one per CV fold) → per-fold
//! sigmoid → averaged positive-class probability

pub mod calibration;
pub mod gbdt;
pub mod tree;

pub use calibration::{CalibratedClassifier, CalibratedFold, SigmoidCalibrator};
pub use gbdt::{sigmoid, GradientBoostingClassifier};
pub use tree::{RegressionTree, TreeNode, TreeParams};
