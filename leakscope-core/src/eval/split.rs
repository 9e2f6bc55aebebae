//! Stratified, seeded train/test split.

use crate::error::LeakError;
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;

/// Row indices of each side of the split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StratifiedSplit {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
    /// Classes left out because they had fewer than two samples.
    pub excluded_classes: Vec<usize>,
}

/// Split each class separately, holding out `test_fraction` of it.
///
/// Every kept class contributes at least one training and one test row.
/// Classes with fewer than two rows cannot be stratified and are reported in
/// `excluded_classes` instead. The same labels and seed always give the same
/// split.
pub fn stratified_split(
    labels: &[usize],
    n_classes: usize,
    test_fraction: f64,
    seed: u64,
) -> Result<StratifiedSplit, LeakError> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(LeakError::invalid_input(format!(
            "test fraction must lie in (0, 1), got {test_fraction}"
        )));
    }

    let mut by_class: Vec<Vec<usize>> = vec![Vec::new(); n_classes];
    for (row, &class) in labels.iter().enumerate() {
        if class >= n_classes {
            return Err(LeakError::invalid_input(format!(
                "class {class} out of range for {n_classes} classes"
            )));
        }
        by_class[class].push(row);
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut split = StratifiedSplit {
        train: Vec::new(),
        test: Vec::new(),
        excluded_classes: Vec::new(),
    };
    for (class, mut rows) in by_class.into_iter().enumerate() {
        if rows.len() < 2 {
            split.excluded_classes.push(class);
            continue;
        }
        rows.shuffle(&mut rng);
        let n_test = ((rows.len() as f64) * test_fraction).round() as usize;
        let n_test = n_test.clamp(1, rows.len() - 1);
        split.test.extend_from_slice(&rows[..n_test]);
        split.train.extend_from_slice(&rows[n_test..]);
    }
    split.train.sort_unstable();
    split.test.sort_unstable();
    Ok(split)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_is_stratified() {
        let labels: Vec<usize> = (0..40).map(|i| i % 4).collect();
        let split = stratified_split(&labels, 4, 0.25, 42).unwrap();
        assert_eq!(split.test.len(), 12);
        assert_eq!(split.train.len(), 28);
        for class in 0..4 {
            let in_test = split.test.iter().filter(|&&r| labels[r] == class).count();
            assert_eq!(in_test, 3);
        }
    }

    #[test]
    fn test_split_is_deterministic() {
        let labels: Vec<usize> = (0..30).map(|i| i % 3).collect();
        let a = stratified_split(&labels, 3, 0.25, 7).unwrap();
        let b = stratified_split(&labels, 3, 0.25, 7).unwrap();
        assert_eq!(a, b);
        let c = stratified_split(&labels, 3, 0.25, 8).unwrap();
        assert_ne!(a.test, c.test);
    }

    #[test]
    fn test_singleton_class_is_excluded() {
        let labels = vec![0, 0, 0, 1, 1, 1, 2];
        let split = stratified_split(&labels, 3, 0.25, 1).unwrap();
        assert_eq!(split.excluded_classes, vec![2]);
        assert!(!split.train.contains(&6) && !split.test.contains(&6));
    }

    #[test]
    fn test_two_sample_class_contributes_both_sides() {
        let labels = vec![0, 0, 1, 1];
        let split = stratified_split(&labels, 2, 0.1, 3).unwrap();
        assert_eq!(split.test.len(), 2);
        assert_eq!(split.train.len(), 2);
    }

    #[test]
    fn test_rejects_bad_fraction() {
        assert!(stratified_split(&[0, 1], 2, 1.0, 0).is_err());
    }
}
