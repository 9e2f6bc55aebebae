//! Result summaries: the human-readable report and its machine-readable twin.

use crate::analysis::tradeoff::{MitigationCurve, TradeoffAnalysis, analyze_tradeoff};
use crate::config::CampaignConfig;
use crate::data::record::LabelValue;
use crate::data::schema::FeatureColumn;
use crate::data::store::Dataset;
use crate::error::LeakError;
use crate::eval::{ClassifierKind, EvaluationOutcome, LeakageEvaluator};
use crate::persistence;
use crate::types::{CampaignKind, LabelKind, MitigationLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::info;

pub const SUMMARY_MARKDOWN: &str = "summary.md";
pub const SUMMARY_JSON: &str = "summary.json";
pub const CURVE_CSV: &str = "curve.csv";
pub const EVALUATIONS_JSON: &str = "evaluations.json";

/// One (label, mitigation level) combination and whether it was evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Combination {
    pub label_kind: LabelKind,
    pub mitigation_level: MitigationLevel,
    /// Set when only this class was left out of an otherwise evaluated level.
    #[serde(default)]
    pub label_value: Option<LabelValue>,
    /// Why it was skipped; `None` when evaluated.
    pub skipped_reason: Option<String>,
}

impl std::fmt::Display for Combination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.label_value {
            Some(value) => write!(f, "{}={} @ {}", self.label_kind, value, self.mitigation_level),
            None => write!(f, "{} @ {}", self.label_kind, self.mitigation_level),
        }
    }
}

/// Everything a reader needs to judge one campaign's leakage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSummary {
    pub campaign: String,
    pub kind: CampaignKind,
    pub label_kind: LabelKind,
    pub generated_at: DateTime<Utc>,
    pub rows_total: usize,
    /// Rows with `exit_code == 0`.
    pub rows_used: usize,
    pub features: Vec<FeatureColumn>,
    pub classifier: ClassifierKind,
    pub test_fraction: f64,
    pub random_seed: u64,
    pub resource_limits: String,
    /// Distinct label values among the rows used.
    pub labels: Vec<LabelValue>,
    /// `1 / k` over the distinct labels among the rows used.
    pub chance_baseline: Option<f64>,
    pub curve: MitigationCurve,
    pub evaluated: Vec<Combination>,
    pub skipped: Vec<Combination>,
    /// Fit over every mitigation level together, for contrast only.
    pub pooled_accuracy: Option<f64>,
    pub artifacts: Vec<String>,
}

impl ResultSummary {
    pub fn from_analysis(config: &CampaignConfig, dataset: &Dataset, analysis: &TradeoffAnalysis) -> Self {
        let label_kind = config.kind.label_kind();
        let used = dataset.successful_only();
        let labels: Vec<LabelValue> = used.label_values(label_kind).into_iter().collect();

        let (evaluated, mut skipped): (Vec<Combination>, Vec<Combination>) = analysis
            .per_level
            .iter()
            .map(|(level, outcome)| Combination {
                label_kind,
                mitigation_level: *level,
                label_value: None,
                skipped_reason: match outcome {
                    EvaluationOutcome::Evaluated(_) => None,
                    EvaluationOutcome::Unavailable { reason } => Some(reason.clone()),
                },
            })
            .partition(|c| c.skipped_reason.is_none());

        for (level, result) in analysis
            .per_level
            .iter()
            .filter_map(|(level, outcome)| outcome.result().map(|r| (*level, r)))
        {
            let dropped = result
                .missing_classes
                .iter()
                .map(|v| (v, "no successful trials"))
                .chain(
                    result
                        .excluded_classes
                        .iter()
                        .map(|v| (v, "fewer than 2 successful trials")),
                );
            for (value, reason) in dropped {
                skipped.push(Combination {
                    label_kind,
                    mitigation_level: level,
                    label_value: Some(*value),
                    skipped_reason: Some(reason.to_string()),
                });
            }
        }

        Self {
            campaign: config.name.clone(),
            kind: config.kind,
            label_kind,
            generated_at: Utc::now(),
            rows_total: dataset.len(),
            rows_used: used.len(),
            features: dataset.schema().columns.clone(),
            classifier: config.classifier,
            test_fraction: config.test_fraction,
            random_seed: config.random_seed,
            resource_limits: config.resource_limits.key(),
            chance_baseline: (!labels.is_empty()).then(|| 1.0 / labels.len() as f64),
            labels,
            curve: analysis.curve.clone(),
            evaluated,
            skipped,
            pooled_accuracy: analysis.pooled_accuracy(),
            artifacts: vec![
                SUMMARY_MARKDOWN.to_string(),
                SUMMARY_JSON.to_string(),
                CURVE_CSV.to_string(),
                EVALUATIONS_JSON.to_string(),
            ],
        }
    }

    pub fn to_markdown(&self) -> String {
        let fmt_opt = |v: Option<f64>, digits: usize| match v {
            Some(x) => format!("{x:.digits$}"),
            None => "n/a".to_string(),
        };
        let features: Vec<String> = self
            .features
            .iter()
            .map(|f| format!("{} ({})", f.name, f.unit))
            .collect();
        let labels: Vec<String> = self.labels.iter().map(ToString::to_string).collect();

        let mut md = String::new();
        let _ = writeln!(md, "# Leakage Summary: {}\n", self.campaign);
        let _ = writeln!(md, "- Campaign kind: {}", self.kind);
        let _ = writeln!(md, "- Label: {}", self.label_kind);
        let _ = writeln!(
            md,
            "- Rows used (exit_code=0): {} of {}",
            self.rows_used, self.rows_total
        );
        let _ = writeln!(md, "- Features: {}", features.join(", "));
        let _ = writeln!(
            md,
            "- Classifier: {} (standardized), fit separately per mitigation level",
            self.classifier
        );
        let _ = writeln!(
            md,
            "- Split: stratified, {:.0}% held out, seed {}",
            self.test_fraction * 100.0,
            self.random_seed
        );
        let _ = writeln!(md, "- Resource limits: {}", self.resource_limits);
        let _ = writeln!(md, "- Labels: {}", labels.join(", "));
        let _ = writeln!(
            md,
            "- Random chance baseline (1/{}): {}\n",
            self.labels.len(),
            fmt_opt(self.chance_baseline, 4)
        );

        let _ = writeln!(md, "## Accuracy and overhead vs mitigation\n");
        let _ = writeln!(
            md,
            "| Mitigation | Accuracy | Chance | Median runtime (ms) | Overhead | Rows |"
        );
        let _ = writeln!(md, "|---|---|---|---|---|---|");
        for p in &self.curve.points {
            let _ = writeln!(
                md,
                "| {} | {} | {} | {} | {} | {} |",
                p.level,
                fmt_opt(p.accuracy, 4),
                fmt_opt(p.chance, 4),
                fmt_opt(p.median_runtime_ms, 1),
                fmt_opt(p.overhead, 4),
                p.rows_used
            );
        }

        let _ = writeln!(md, "\n## Evaluated combinations\n");
        if self.evaluated.is_empty() {
            let _ = writeln!(md, "- none");
        }
        for c in &self.evaluated {
            let _ = writeln!(md, "- {c}");
        }
        let _ = writeln!(md, "\n## Skipped combinations (insufficient data)\n");
        if self.skipped.is_empty() {
            let _ = writeln!(md, "- none");
        }
        for c in &self.skipped {
            let _ = writeln!(
                md,
                "- {c}: {}",
                c.skipped_reason.as_deref().unwrap_or("unavailable")
            );
        }

        let _ = writeln!(
            md,
            "\nPooled fit over all mitigation levels (contrast only): {}",
            fmt_opt(self.pooled_accuracy, 4)
        );
        let _ = writeln!(md, "\nArtifacts:");
        for a in &self.artifacts {
            let _ = writeln!(md, "- results/{a}");
        }
        md
    }

    /// Write every artifact into `dir` atomically and return their paths.
    pub fn write(&self, dir: &Path, analysis: &TradeoffAnalysis) -> Result<Vec<PathBuf>, LeakError> {
        std::fs::create_dir_all(dir)?;
        let md = dir.join(SUMMARY_MARKDOWN);
        let json = dir.join(SUMMARY_JSON);
        let csv = dir.join(CURVE_CSV);
        let evaluations = dir.join(EVALUATIONS_JSON);

        persistence::atomic_write(&md, self.to_markdown().as_bytes())?;
        persistence::atomic_write_json(&json, self)?;
        persistence::atomic_write(&csv, self.curve.to_csv()?.as_bytes())?;
        persistence::atomic_write_json(&evaluations, analysis)?;
        Ok(vec![md, json, csv, evaluations])
    }

    pub fn load(dir: &Path) -> Result<Self, LeakError> {
        let path = dir.join(SUMMARY_JSON);
        persistence::load_json(&path)?
            .ok_or_else(|| LeakError::not_found(path.display().to_string()))
    }
}

/// Analyze a campaign's dataset with its configuration.
pub fn analyze_campaign(
    config: &CampaignConfig,
    dataset: &Dataset,
) -> Result<(ResultSummary, TradeoffAnalysis), LeakError> {
    let evaluator = LeakageEvaluator::from_config(config);
    let label = config.kind.label_kind();
    let analysis = analyze_tradeoff(&dataset.view(), &evaluator, label, &config.mitigation_levels)?;
    let summary = ResultSummary::from_analysis(config, dataset, &analysis);
    info!(
        campaign = %summary.campaign,
        rows_used = summary.rows_used,
        evaluated = summary.evaluated.len(),
        skipped = summary.skipped.len(),
        "Analysis complete"
    );
    Ok((summary, analysis))
}

/// Analyze and write the artifacts into the configured results directory.
pub fn analyze_and_write(config: &CampaignConfig, dataset: &Dataset) -> Result<ResultSummary, LeakError> {
    let (summary, analysis) = analyze_campaign(config, dataset)?;
    summary.write(&config.results_dir(), &analysis)?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::record::fixtures::{failed, record};
    use crate::data::schema::FeatureSchema;
    use crate::types::WorkloadType;
    use tempfile::TempDir;

    fn dataset() -> Dataset {
        let mut ds = Dataset::new(FeatureSchema::standard());
        for i in 0..8 {
            let d = i as f64;
            ds.append(record(WorkloadType::Cpu, MitigationLevel::None, [100.0 + d, 99.0, 8.0, 0.0, 0.0]))
                .unwrap();
            ds.append(record(WorkloadType::Mem, MitigationLevel::None, [90.0 + d, 80.0, 190.0, 0.0, 0.0]))
                .unwrap();
            ds.append(record(WorkloadType::Cpu, MitigationLevel::Low, [120.0 + d, 95.0, 9.0, 0.0, 0.0]))
                .unwrap();
            ds.append(record(WorkloadType::Mem, MitigationLevel::Low, [110.0 + d, 85.0, 150.0, 0.0, 0.0]))
                .unwrap();
            // every high-mitigation trial timed out
            ds.append(failed(WorkloadType::Cpu, MitigationLevel::High))
                .unwrap();
        }
        ds
    }

    fn config() -> CampaignConfig {
        CampaignConfig {
            workloads: vec![WorkloadType::Cpu, WorkloadType::Mem],
            ..CampaignConfig::default()
        }
    }

    #[test]
    fn test_summary_lists_evaluated_and_skipped() {
        let ds = dataset();
        let (summary, _) = analyze_campaign(&config(), &ds).unwrap();
        assert_eq!(summary.rows_total, 40);
        assert_eq!(summary.rows_used, 32);
        assert_eq!(summary.chance_baseline, Some(0.5));
        assert_eq!(summary.evaluated.len(), 2);
        assert_eq!(summary.skipped.len(), 1);
        assert_eq!(summary.skipped[0].mitigation_level, MitigationLevel::High);

        let md = summary.to_markdown();
        assert!(md.contains("Rows used (exit_code=0): 32 of 40"));
        assert!(md.contains("## Skipped combinations"));
        assert!(md.contains("| none | "));
        assert!(md.contains("| high | n/a"));
    }

    #[test]
    fn test_class_lost_at_one_level_is_reported_skipped() {
        let mut ds = Dataset::new(FeatureSchema::standard());
        let profiles = [
            (WorkloadType::Cpu, [100.0, 99.0, 8.0, 0.0, 0.0]),
            (WorkloadType::Mem, [90.0, 80.0, 190.0, 0.0, 0.0]),
            (WorkloadType::Disk, [80.0, 30.0, 10.0, 0.5, 190.0]),
        ];
        for level in [MitigationLevel::None, MitigationLevel::High] {
            for (workload, base) in profiles {
                for i in 0..8 {
                    if workload == WorkloadType::Mem && level == MitigationLevel::High {
                        ds.append(failed(workload, level)).unwrap();
                    } else {
                        let values = base.map(|v| v + i as f64 * 0.5);
                        ds.append(record(workload, level, values)).unwrap();
                    }
                }
            }
        }
        let config = CampaignConfig {
            workloads: vec![WorkloadType::Cpu, WorkloadType::Mem, WorkloadType::Disk],
            mitigation_levels: vec![MitigationLevel::None, MitigationLevel::High],
            ..CampaignConfig::default()
        };

        let (summary, analysis) = analyze_campaign(&config, &ds).unwrap();
        let high = analysis.per_level[&MitigationLevel::High].result().unwrap();
        assert_eq!(high.missing_classes, vec![LabelValue::Workload(WorkloadType::Mem)]);
        assert_eq!(high.chance, 0.5);

        assert_eq!(summary.evaluated.len(), 2);
        assert_eq!(summary.skipped.len(), 1);
        let lost = &summary.skipped[0];
        assert_eq!(lost.mitigation_level, MitigationLevel::High);
        assert_eq!(lost.label_value, Some(LabelValue::Workload(WorkloadType::Mem)));

        let md = summary.to_markdown();
        assert!(md.contains("- workload_type=mem @ high: no successful trials"), "{md}");
    }

    #[test]
    fn test_summary_artifacts_written() {
        let dir = TempDir::new().unwrap();
        let ds = dataset();
        let (summary, analysis) = analyze_campaign(&config(), &ds).unwrap();
        let paths = summary.write(dir.path(), &analysis).unwrap();
        assert_eq!(paths.len(), 4);
        assert!(paths.iter().all(|p| p.exists()));

        let loaded = ResultSummary::load(dir.path()).unwrap();
        assert_eq!(loaded.curve.points.len(), summary.curve.points.len());
        assert_eq!(loaded.skipped, summary.skipped);
        assert_eq!(loaded.rows_used, 32);
    }

    #[test]
    fn test_load_missing_summary() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            ResultSummary::load(dir.path()),
            Err(LeakError::NotFound(_))
        ));
    }
}
