//! Multinomial logistic regression.
//!
//! Softmax over linear scores, fit by full-batch gradient descent on the mean
//! cross-entropy plus an L2 penalty equivalent to `C = 1`. Weights start at
//! zero and the update order is fixed, so fits are deterministic.

use crate::error::LeakError;
use crate::eval::Classifier;

pub const DEFAULT_MAX_ITER: usize = 2000;
const LEARNING_RATE: f64 = 0.5;
const TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone)]
pub struct LogisticRegression {
    /// Inverse regularization strength.
    c: f64,
    max_iter: usize,
    weights: Vec<Vec<f64>>,
    bias: Vec<f64>,
    iterations: usize,
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self::new(1.0, DEFAULT_MAX_ITER)
    }
}

impl LogisticRegression {
    pub fn new(c: f64, max_iter: usize) -> Self {
        Self {
            c,
            max_iter,
            weights: Vec::new(),
            bias: Vec::new(),
            iterations: 0,
        }
    }

    /// Gradient steps taken by the last fit.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    fn scores(&self, x: &[f64]) -> Vec<f64> {
        self.weights
            .iter()
            .zip(&self.bias)
            .map(|(w, b)| b + w.iter().zip(x).map(|(wi, xi)| wi * xi).sum::<f64>())
            .collect()
    }

    /// Class probabilities for one standardized row.
    pub fn predict_proba(&self, x: &[f64]) -> Vec<f64> {
        softmax(&self.scores(x))
    }
}

fn softmax(scores: &[f64]) -> Vec<f64> {
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exp: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
    let total: f64 = exp.iter().sum();
    exp.into_iter().map(|e| e / total).collect()
}

impl Classifier for LogisticRegression {
    fn name(&self) -> &'static str {
        "logistic_regression"
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
        let n = x.len() as f64;
        let penalty = 1.0 / (self.c * n);

        self.weights = vec![vec![0.0; dims]; n_classes];
        self.bias = vec![0.0; n_classes];
        self.iterations = 0;

        for _ in 0..self.max_iter {
            let mut grad_w = vec![vec![0.0; dims]; n_classes];
            let mut grad_b = vec![0.0; n_classes];
            for (row, &label) in x.iter().zip(y) {
                let p = self.predict_proba(row);
                for k in 0..n_classes {
                    let err = p[k] - if k == label { 1.0 } else { 0.0 };
                    grad_b[k] += err / n;
                    for (g, xi) in grad_w[k].iter_mut().zip(row) {
                        *g += err * xi / n;
                    }
                }
            }

            let mut largest = 0.0f64;
            for k in 0..n_classes {
                for (g, w) in grad_w[k].iter_mut().zip(&self.weights[k]) {
                    *g += penalty * w;
                    largest = largest.max(g.abs());
                }
                largest = largest.max(grad_b[k].abs());
            }
            for k in 0..n_classes {
                for (w, g) in self.weights[k].iter_mut().zip(&grad_w[k]) {
                    *w -= LEARNING_RATE * g;
                }
                self.bias[k] -= LEARNING_RATE * grad_b[k];
            }
            self.iterations += 1;
            if largest < TOLERANCE {
                break;
            }
        }
        Ok(())
    }

    fn predict(&self, x: &[f64]) -> usize {
        let scores = self.scores(x);
        // first maximum wins on ties
        scores
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |best, (k, &s)| {
                if s > best.1 { (k, s) } else { best }
            })
            .0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blobs() -> (Vec<Vec<f64>>, Vec<usize>) {
        let mut x = Vec::new();
        let mut y = Vec::new();
        let centers = [(-2.0, -2.0), (2.0, -2.0), (0.0, 2.5)];
        for (k, (cx, cy)) in centers.iter().enumerate() {
            for i in 0..10 {
                let d = (i as f64 - 4.5) * 0.05;
                x.push(vec![cx + d, cy - d]);
                y.push(k);
            }
        }
        (x, y)
    }

    #[test]
    fn test_separable_blobs_are_learned() {
        let (x, y) = blobs();
        let mut model = LogisticRegression::default();
        model.fit(&x, &y, 3).unwrap();
        let correct = x.iter().zip(&y).filter(|(r, l)| model.predict(r) == **l).count();
        assert_eq!(correct, 30);
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let (x, y) = blobs();
        let mut model = LogisticRegression::default();
        model.fit(&x, &y, 3).unwrap();
        let p = model.predict_proba(&[0.1, 0.2]);
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_fit_is_deterministic() {
        let (x, y) = blobs();
        let mut a = LogisticRegression::default();
        let mut b = LogisticRegression::default();
        a.fit(&x, &y, 3).unwrap();
        b.fit(&x, &y, 3).unwrap();
        assert_eq!(a.weights, b.weights);
        assert!(a.iterations() <= DEFAULT_MAX_ITER);
    }

    #[test]
    fn test_mismatched_lengths_rejected() {
        let mut model = LogisticRegression::default();
        assert!(model.fit(&[vec![1.0]], &[0, 1], 2).is_err());
    }
}
