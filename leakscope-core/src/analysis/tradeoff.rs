//! Accuracy and overhead across mitigation strengths.

use crate::data::store::DatasetView;
use crate::error::LeakError;
use crate::eval::{EvaluationOutcome, LeakageEvaluator};
use crate::types::{LabelKind, MitigationLevel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Median of `values`, averaging the two middle elements for even lengths.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

/// Relative slowdown of `level` against the reference level.
///
/// The reference level itself is `0.0` by definition. Other levels need both
/// medians and a nonzero reference.
pub fn overhead(level: MitigationLevel, median_ms: Option<f64>, reference_ms: Option<f64>) -> Option<f64> {
    if level.is_reference() {
        return Some(0.0);
    }
    match (median_ms, reference_ms) {
        (Some(m), Some(r)) if r > 0.0 => Some((m - r) / r),
        _ => None,
    }
}

/// One row of the tradeoff table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub level: MitigationLevel,
    pub accuracy: Option<f64>,
    pub chance: Option<f64>,
    pub median_runtime_ms: Option<f64>,
    pub overhead: Option<f64>,
    /// Successful trials at this level.
    pub rows_used: usize,
    /// Set when the level could not be evaluated.
    pub unavailable: Option<String>,
}

/// Accuracy and overhead per mitigation level, weakest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MitigationCurve {
    pub label_kind: LabelKind,
    pub points: Vec<CurvePoint>,
}

impl MitigationCurve {
    /// Combine per-level evaluations with per-level successful runtimes.
    pub fn compute(
        label_kind: LabelKind,
        outcomes: &BTreeMap<MitigationLevel, EvaluationOutcome>,
        runtimes: &BTreeMap<MitigationLevel, Vec<f64>>,
    ) -> Self {
        let reference = runtimes
            .get(&MitigationLevel::REFERENCE)
            .and_then(|r| median(r));

        let mut levels: Vec<MitigationLevel> =
            outcomes.keys().chain(runtimes.keys()).copied().collect();
        levels.sort();
        levels.dedup();

        let points = levels
            .into_iter()
            .map(|level| {
                let level_runtimes = runtimes.get(&level).map(Vec::as_slice).unwrap_or(&[]);
                let median_runtime_ms = median(level_runtimes);
                let outcome = outcomes.get(&level);
                let result = outcome.and_then(EvaluationOutcome::result);
                CurvePoint {
                    level,
                    accuracy: result.map(|r| r.accuracy),
                    chance: result.map(|r| r.chance),
                    median_runtime_ms,
                    overhead: overhead(level, median_runtime_ms, reference),
                    rows_used: level_runtimes.len(),
                    unavailable: match outcome {
                        Some(EvaluationOutcome::Unavailable { reason }) => Some(reason.clone()),
                        Some(EvaluationOutcome::Evaluated(_)) => None,
                        None => Some("not evaluated".to_string()),
                    },
                }
            })
            .collect();

        Self { label_kind, points }
    }

    pub fn point(&self, level: MitigationLevel) -> Option<&CurvePoint> {
        self.points.iter().find(|p| p.level == level)
    }

    /// Tabular form for external plotting.
    pub fn to_csv(&self) -> Result<String, LeakError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record([
            "mitigation_level",
            "accuracy",
            "chance",
            "median_runtime_ms",
            "overhead",
            "rows_used",
        ])?;
        let cell = |v: Option<f64>| v.map(|x| x.to_string()).unwrap_or_default();
        for p in &self.points {
            writer.write_record([
                p.level.to_string(),
                cell(p.accuracy),
                cell(p.chance),
                cell(p.median_runtime_ms),
                cell(p.overhead),
                p.rows_used.to_string(),
            ])?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| LeakError::invalid_input(format!("csv buffer: {e}")))?;
        String::from_utf8(bytes).map_err(|e| LeakError::invalid_input(e.to_string()))
    }
}

/// Full tradeoff analysis of one label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeoffAnalysis {
    pub curve: MitigationCurve,
    pub per_level: BTreeMap<MitigationLevel, EvaluationOutcome>,
    /// A single fit over every level together. Reported for contrast only;
    /// never part of the curve.
    pub pooled: EvaluationOutcome,
}

impl TradeoffAnalysis {
    pub fn pooled_accuracy(&self) -> Option<f64> {
        self.pooled.result().map(|r| r.accuracy)
    }
}

/// A failed evaluation stays local to its own combination.
fn contain(what: &str, outcome: Result<EvaluationOutcome, LeakError>) -> EvaluationOutcome {
    outcome.unwrap_or_else(|e| {
        warn!(evaluation = %what, error = %e, "Evaluation failed");
        EvaluationOutcome::Unavailable {
            reason: e.to_string(),
        }
    })
}

/// Evaluate `levels` independently and build the curve.
///
/// A level that cannot be evaluated, for whatever reason, is recorded as
/// unavailable and the remaining levels are still analyzed.
pub fn analyze_tradeoff(
    view: &DatasetView<'_>,
    evaluator: &LeakageEvaluator,
    label: LabelKind,
    levels: &[MitigationLevel],
) -> Result<TradeoffAnalysis, LeakError> {
    let mut per_level = BTreeMap::new();
    for (level, outcome) in evaluator.evaluate_levels(view, label, levels) {
        per_level.insert(level, contain(&format!("{label} at {level}"), outcome));
    }

    let runtimes: BTreeMap<MitigationLevel, Vec<f64>> = levels
        .iter()
        .map(|&level| (level, view.clone().with_mitigation(level).runtimes()))
        .collect();

    let curve = MitigationCurve::compute(label, &per_level, &runtimes);
    let pooled = contain(
        &format!("{label} pooled"),
        evaluator.evaluate_outcome(view, label, None),
    );

    for p in &curve.points {
        info!(
            label = %label,
            mitigation = %p.level,
            accuracy = ?p.accuracy,
            median_runtime_ms = ?p.median_runtime_ms,
            overhead = ?p.overhead,
            "Tradeoff point"
        );
    }
    Ok(TradeoffAnalysis {
        curve,
        per_level,
        pooled,
    })
}
