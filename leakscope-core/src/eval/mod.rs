//! Leakage evaluation: how well telemetry predicts a hidden label.
//!
//! Features are standardized on the training split only, a multi-class
//! classifier is fit, and held-out accuracy is compared with the chance
//! baseline of uniform guessing.

pub mod centroid;
pub mod evaluator;
pub mod logistic;
pub mod scaler;
pub mod split;

use crate::error::LeakError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use centroid::NearestCentroid;
pub use evaluator::{ClassifierResult, EvaluationOutcome, LeakageEvaluator};
pub use logistic::LogisticRegression;
pub use scaler::StandardScaler;
pub use split::{StratifiedSplit, stratified_split};

/// A multi-class model over standardized feature rows.
///
/// Labels are dense class indices `0..n_classes`.
pub trait Classifier: Send {
    fn name(&self) -> &'static str;

    fn fit(&mut self, x: &[Vec<f64>], y: &[usize], n_classes: usize) -> Result<(), LeakError>;

    fn predict(&self, x: &[f64]) -> usize;
}

/// Which classifier the evaluator fits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierKind {
    /// Multinomial logistic regression.
    #[default]
    LogisticRegression,
    NearestCentroid,
}

impl ClassifierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LogisticRegression => "logistic_regression",
            Self::NearestCentroid => "nearest_centroid",
        }
    }

    /// A fresh, unfitted model.
    pub fn build(&self) -> Box<dyn Classifier> {
        match self {
            Self::LogisticRegression => Box::new(LogisticRegression::default()),
            Self::NearestCentroid => Box::new(NearestCentroid::new()),
        }
    }
}

impl fmt::Display for ClassifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClassifierKind {
    type Err = LeakError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "logistic_regression" | "logreg" => Ok(Self::LogisticRegression),
            "nearest_centroid" => Ok(Self::NearestCentroid),
            other => Err(LeakError::invalid_input(format!(
                "unknown classifier '{other}'"
            ))),
        }
    }
}
