//! Stratified splitting
//!
//! Held-out train/test split with per-class proportional allocation, and the
//! stratified K-fold assignment used by the calibration layer.

use crate::error::TrainError;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Number of label classes (binary target)
const N_CLASSES: usize = 2;

/// Row indices of the two sides of a split
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Stratified shuffle split.
///
/// The test side receives `ceil(test_size * n)` rows; each class contributes
/// in proportion to its size, with leftover rows going to the classes with the
/// largest fractional share.
pub fn train_test_split(
    labels: &[u8],
    test_size: f64,
    seed: u64,
) -> Result<SplitIndices, TrainError> {
    let n = labels.len();
    let n_test = (test_size * n as f64).ceil() as usize;
    let n_train = n.saturating_sub(n_test);

    let counts = class_counts(labels)?;
    if counts.iter().any(|&c| c < 2) {
        return Err(TrainError::InsufficientData(format!(
            "stratified split needs at least 2 rows per class, got {:?}",
            counts
        )));
    }
    if n_test < N_CLASSES || n_train < N_CLASSES {
        return Err(TrainError::InsufficientData(format!(
            "split of {} rows into {} train / {} test leaves a side smaller than the class count",
            n, n_train, n_test
        )));
    }

    let test_counts = allocate(&counts, n_test);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(n_train);
    let mut test = Vec::with_capacity(n_test);

    for class in 0..N_CLASSES {
        let mut members: Vec<usize> = (0..n).filter(|&i| labels[i] as usize == class).collect();
        members.shuffle(&mut rng);
        let (class_test, class_train) = members.split_at(test_counts[class]);
        test.extend_from_slice(class_test);
        train.extend_from_slice(class_train);
    }

    train.shuffle(&mut rng);
    test.shuffle(&mut rng);

    Ok(SplitIndices { train, test })
}

/// Assign each row to one of `k` stratified folds, keeping row order within a class.
///
/// Class members are dealt to folds the way a round-robin over the sorted
/// labels would: fold sizes per class differ by at most one.
pub fn stratified_folds(labels: &[u8], k: usize) -> Result<Vec<usize>, TrainError> {
    if k < 2 {
        return Err(TrainError::ConfigError(format!(
            "need at least 2 folds, got {}",
            k
        )));
    }
    let counts = class_counts(labels)?;
    if let Some(class) = counts.iter().position(|&c| c < k) {
        return Err(TrainError::InsufficientData(format!(
            "class {} has {} rows, fewer than the {} calibration folds",
            class, counts[class], k
        )));
    }

    let mut sorted: Vec<u8> = labels.to_vec();
    sorted.sort_unstable();

    // allocation[fold][class]
    let mut allocation = vec![[0usize; N_CLASSES]; k];
    for (pos, &label) in sorted.iter().enumerate() {
        allocation[pos % k][label as usize] += 1;
    }

    let mut folds = vec![0usize; labels.len()];
    for class in 0..N_CLASSES {
        let fold_ids = (0..k).flat_map(|fold| std::iter::repeat(fold).take(allocation[fold][class]));
        let members = labels
            .iter()
            .enumerate()
            .filter(|&(_, &y)| y as usize == class)
            .map(|(i, _)| i);
        for (row, fold) in members.zip(fold_ids) {
            folds[row] = fold;
        }
    }

    Ok(folds)
}

/// Train/test indices for one fold of a fold assignment
pub fn fold_indices(folds: &[usize], fold: usize) -> SplitIndices {
    let (test, train): (Vec<usize>, Vec<usize>) = (0..folds.len()).partition(|&i| folds[i] == fold);
    SplitIndices { train, test }
}

fn class_counts(labels: &[u8]) -> Result<[usize; N_CLASSES], TrainError> {
    let mut counts = [0usize; N_CLASSES];
    for (row, &label) in labels.iter().enumerate() {
        let slot = counts.get_mut(label as usize).ok_or_else(|| {
            TrainError::InvalidTarget(format!("row {}: label {} is not 0 or 1", row, label))
        })?;
        *slot += 1;
    }
    if counts.iter().any(|&c| c == 0) {
        return Err(TrainError::InsufficientData(format!(
            "target needs both classes, got counts {:?}",
            counts
        )));
    }
    Ok(counts)
}

/// Largest-remainder allocation of `draws` across classes proportional to `counts`
fn allocate(counts: &[usize; N_CLASSES], draws: usize) -> [usize; N_CLASSES] {
    let total: usize = counts.iter().sum();
    let mut alloc = [0usize; N_CLASSES];
    let mut remainders = [0.0f64; N_CLASSES];

    for class in 0..N_CLASSES {
        let exact = counts[class] as f64 * draws as f64 / total as f64;
        alloc[class] = exact.floor() as usize;
        remainders[class] = exact - exact.floor();
    }

    let mut order: Vec<usize> = (0..N_CLASSES).collect();
    order.sort_by(|&a, &b| remainders[b].total_cmp(&remainders[a]).then(a.cmp(&b)));

    let mut left = draws - alloc.iter().sum::<usize>();
    for class in order {
        if left == 0 {
            break;
        }
        if alloc[class] < counts[class] {
            alloc[class] += 1;
            left -= 1;
        }
    }
    alloc
}
