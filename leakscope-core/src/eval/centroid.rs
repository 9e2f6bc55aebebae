//! Nearest-centroid classifier in standardized feature space.

use crate::error::LeakError;
use crate::eval::Classifier;

#[derive(Debug, Clone, Default)]
pub struct NearestCentroid {
    /// `None` for classes without training rows; those are never predicted.
    centroids: Vec<Option<Vec<f64>>>,
}

impl NearestCentroid {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Classifier for NearestCentroid {
    fn name(&self) -> &'static str {
        "nearest_centroid"
    }

    fn fit(&mut self, x: &[Vec<f64>], y: &[usize], n_classes: usize) -> Result<(), LeakError> {
        if x.is_empty() || x.len() != y.len() {
            return Err(LeakError::invalid_input(format!(
                "{} rows but {} labels",
                x.len(),
                y.len()
            )));
        }
        let dims = x[0].len();
        let mut sums = vec![vec![0.0; dims]; n_classes];
        let mut counts = vec![0usize; n_classes];
        for (row, &label) in x.iter().zip(y) {
            counts[label] += 1;
            for (s, v) in sums[label].iter_mut().zip(row) {
                *s += v;
            }
        }
        self.centroids = sums
            .into_iter()
            .zip(counts)
            .map(|(sum, count)| {
                (count > 0).then(|| sum.into_iter().map(|s| s / count as f64).collect())
            })
            .collect();
        Ok(())
    }

    fn predict(&self, x: &[f64]) -> usize {
        let mut best = (0, f64::INFINITY);
        for (k, centroid) in self.centroids.iter().enumerate() {
            if let Some(c) = centroid {
                let d: f64 = c.iter().zip(x).map(|(a, b)| (a - b).powi(2)).sum();
                if d < best.1 {
                    best = (k, d);
                }
            }
        }
        best.0
    }
}
