//! The leakage classifier evaluator.

use crate::config::CampaignConfig;
use crate::data::record::LabelValue;
use crate::data::store::DatasetView;
use crate::error::LeakError;
use crate::eval::scaler::StandardScaler;
use crate::eval::split::stratified_split;
use crate::eval::ClassifierKind;
use crate::types::{LabelKind, MitigationLevel};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Held-out performance of one (label, mitigation level) fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierResult {
    pub label_kind: LabelKind,
    /// `None` when the fit pooled every mitigation level.
    pub mitigation_level: Option<MitigationLevel>,
    pub classifier: ClassifierKind,
    /// Sorted label values; indexes the confusion matrix.
    pub classes: Vec<LabelValue>,
    pub accuracy: f64,
    /// `1 / classes.len()`.
    pub chance: f64,
    /// `confusion_matrix[true][predicted]`.
    pub confusion_matrix: Vec<Vec<usize>>,
    pub train_size: usize,
    pub test_size: usize,
    /// Classes dropped for having fewer than two samples.
    pub excluded_classes: Vec<LabelValue>,
    /// Configured classes with no successful trial in this combination.
    #[serde(default)]
    pub missing_classes: Vec<LabelValue>,
    pub resource_limits: String,
}

impl ClassifierResult {
    /// Accuracy above the chance baseline.
    pub fn advantage(&self) -> f64 {
        self.accuracy - self.chance
    }

    pub fn rows_used(&self) -> usize {
        self.train_size + self.test_size
    }
}

/// Either a result or the reason a combination could not be evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EvaluationOutcome {
    Evaluated(ClassifierResult),
    Unavailable { reason: String },
}

impl EvaluationOutcome {
    pub fn result(&self) -> Option<&ClassifierResult> {
        match self {
            Self::Evaluated(r) => Some(r),
            Self::Unavailable { .. } => None,
        }
    }

    pub fn is_evaluated(&self) -> bool {
        matches!(self, Self::Evaluated(_))
    }
}

/// Fits and scores classifiers over dataset views.
///
/// Pure: holds only its settings, so one evaluator may serve many threads.
#[derive(Debug, Clone)]
pub struct LeakageEvaluator {
    classifier: ClassifierKind,
    test_fraction: f64,
    seed: u64,
    /// Label values the campaign was configured to produce.
    expected_classes: Vec<LabelValue>,
}

impl LeakageEvaluator {
    pub fn new(classifier: ClassifierKind, test_fraction: f64, seed: u64) -> Self {
        Self {
            classifier,
            test_fraction,
            seed,
            expected_classes: Vec::new(),
        }
    }

    pub fn from_config(config: &CampaignConfig) -> Self {
        Self::new(config.classifier, config.test_fraction, config.random_seed)
            .with_expected_classes(config.expected_labels())
    }

    /// Report any of `classes` that a combination has no successful trial for.
    pub fn with_expected_classes(mut self, classes: Vec<LabelValue>) -> Self {
        self.expected_classes = classes;
        self
    }

    pub fn classifier(&self) -> ClassifierKind {
        self.classifier
    }

    /// Evaluate `label` over the successful records of `view`, optionally
    /// restricted to one mitigation level.
    ///
    /// Fails with `MixedResourceLimits` when the records were collected under
    /// different constraint configurations and with `InsufficientData` when
    /// fewer than two classes have at least two samples.
    pub fn evaluate(
        &self,
        view: &DatasetView<'_>,
        label: LabelKind,
        mitigation: Option<MitigationLevel>,
    ) -> Result<ClassifierResult, LeakError> {
        let what = match mitigation {
            Some(level) => format!("{label} at mitigation {level}"),
            None => format!("{label} pooled over all mitigations"),
        };

        let mut subset = view.clone().successful_only();
        if let Some(level) = mitigation {
            subset = subset.with_mitigation(level);
        }

        let limits = subset.resource_limit_keys();
        if limits.len() > 1 {
            return Err(LeakError::MixedResourceLimits(limits.len()));
        }
        let resource_limits = limits.into_iter().next().unwrap_or_default();

        let mut rows: Vec<Vec<f64>> = Vec::new();
        let mut values: Vec<LabelValue> = Vec::new();
        for record in subset.iter() {
            if let (Some(features), Some(value)) = (&record.features, record.label(label)) {
                rows.push(features.values().to_vec());
                values.push(value);
            }
        }
        if rows.is_empty() {
            return Err(LeakError::insufficient(what, "no successful trials"));
        }

        let mut counts: BTreeMap<LabelValue, usize> = BTreeMap::new();
        for v in &values {
            *counts.entry(*v).or_default() += 1;
        }
        let missing_classes: Vec<LabelValue> = self
            .expected_classes
            .iter()
            .filter(|c| !counts.contains_key(c))
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        for class in &missing_classes {
            warn!(label = %label, class = %class, evaluation = %what, "Class has no successful trials");
        }
        let excluded_classes: Vec<LabelValue> = counts
            .iter()
            .filter(|(_, n)| **n < 2)
            .map(|(v, _)| *v)
            .collect();
        for class in &excluded_classes {
            warn!(label = %label, class = %class, evaluation = %what, "Excluding class with fewer than 2 samples");
        }
        let classes: Vec<LabelValue> = counts
            .keys()
            .filter(|v| !excluded_classes.contains(v))
            .copied()
            .collect();
        if classes.len() < 2 {
            return Err(LeakError::insufficient(
                what,
                format!("{} class(es) with at least 2 samples", classes.len()),
            ));
        }

        let kept: BTreeSet<LabelValue> = classes.iter().copied().collect();
        let (rows, y): (Vec<Vec<f64>>, Vec<usize>) = rows
            .into_iter()
            .zip(values)
            .filter(|(_, v)| kept.contains(v))
            .map(|(row, v)| {
                let idx = classes.iter().position(|c| *c == v).unwrap_or(0);
                (row, idx)
            })
            .unzip();

        let split = stratified_split(&y, classes.len(), self.test_fraction, self.seed)?;
        let train_x: Vec<Vec<f64>> = split.train.iter().map(|&i| rows[i].clone()).collect();
        let train_y: Vec<usize> = split.train.iter().map(|&i| y[i]).collect();

        let scaler = StandardScaler::fit(&train_x);
        let mut model = self.classifier.build();
        model.fit(&scaler.transform_all(&train_x), &train_y, classes.len())?;

        let k = classes.len();
        let mut confusion_matrix = vec![vec![0usize; k]; k];
        let mut correct = 0usize;
        for &i in &split.test {
            let predicted = model.predict(&scaler.transform(&rows[i]));
            confusion_matrix[y[i]][predicted] += 1;
            if predicted == y[i] {
                correct += 1;
            }
        }
        let accuracy = correct as f64 / split.test.len() as f64;

        debug!(
            evaluation = %what,
            classifier = %self.classifier,
            train = split.train.len(),
            test = split.test.len(),
            accuracy,
            "Classifier evaluated"
        );

        Ok(ClassifierResult {
            label_kind: label,
            mitigation_level: mitigation,
            classifier: self.classifier,
            chance: 1.0 / k as f64,
            classes,
            accuracy,
            confusion_matrix,
            train_size: split.train.len(),
            test_size: split.test.len(),
            excluded_classes,
            missing_classes,
            resource_limits,
        })
    }

    /// Like [`evaluate`](Self::evaluate), but insufficient data becomes an
    /// `Unavailable` outcome instead of an error.
    pub fn evaluate_outcome(
        &self,
        view: &DatasetView<'_>,
        label: LabelKind,
        mitigation: Option<MitigationLevel>,
    ) -> Result<EvaluationOutcome, LeakError> {
        match self.evaluate(view, label, mitigation) {
            Ok(result) => Ok(EvaluationOutcome::Evaluated(result)),
            Err(e) if e.is_insufficient_data() => {
                warn!(label = %label, mitigation = ?mitigation, reason = %e, "Combination unavailable");
                Ok(EvaluationOutcome::Unavailable {
                    reason: e.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Evaluate each mitigation level on its own, in parallel.
    ///
    /// Every level gets an independent fit over only its own records.
    pub fn evaluate_levels(
        &self,
        view: &DatasetView<'_>,
        label: LabelKind,
        levels: &[MitigationLevel],
    ) -> Vec<(MitigationLevel, Result<EvaluationOutcome, LeakError>)> {
        std::thread::scope(|scope| {
            let handles: Vec<_> = levels
                .iter()
                .map(|&level| {
                    (
                        level,
                        scope.spawn(move || self.evaluate_outcome(view, label, Some(level))),
                    )
                })
                .collect();
            handles
                .into_iter()
                .map(|(level, handle)| {
                    let outcome = handle.join().unwrap_or_else(|_| {
                        Err(LeakError::invalid_input(format!(
                            "evaluation of {level} panicked"
                        )))
                    });
                    (level, outcome)
                })
                .collect()
        })
    }
}
