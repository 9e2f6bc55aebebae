//! Trial records: one executed trial with its provenance and telemetry.

use crate::config::ResourceLimits;
use crate::error::LeakError;
use crate::types::{
    CampaignKind, IntensityLevel, LabelKind, MitigationLevel, SecretLevel, WorkloadType,
};
use serde::{Deserialize, Serialize};

/// Exit code a trial is given when it exceeds its time budget.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Exit code used when the sandbox never reported one.
pub const UNKNOWN_EXIT_CODE: i32 = 1;

/// Named, positional feature values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawFeatureVector")]
pub struct FeatureVector {
    names: Vec<String>,
    values: Vec<f64>,
}

/// Unchecked wire form; every deserialized vector goes through `new`.
#[derive(Deserialize)]
struct RawFeatureVector {
    names: Vec<String>,
    values: Vec<f64>,
}

impl TryFrom<RawFeatureVector> for FeatureVector {
    type Error = LeakError;

    fn try_from(raw: RawFeatureVector) -> Result<Self, Self::Error> {
        Self::new(raw.names, raw.values)
    }
}

impl FeatureVector {
    pub fn new(names: Vec<String>, values: Vec<f64>) -> Result<Self, LeakError> {
        if names.len() != values.len() {
            return Err(LeakError::invalid_record(format!(
                "{} feature names but {} values",
                names.len(),
                values.len()
            )));
        }
        if let Some(i) = values.iter().position(|v| !v.is_finite()) {
            return Err(LeakError::invalid_record(format!(
                "feature '{}' is not finite",
                names[i]
            )));
        }
        Ok(Self { names, values })
    }

    /// Build from `(name, value)` pairs, keeping their order.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self, LeakError>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let (names, values) = pairs
            .into_iter()
            .map(|(n, v)| (n.into(), v))
            .unzip();
        Self::new(names, values)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|n| n == name)
            .and_then(|i| self.values.get(i).copied())
    }
}

/// The configuration cell a trial belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellKey {
    pub workload_type: WorkloadType,
    pub intensity_level: IntensityLevel,
    pub mitigation_level: MitigationLevel,
    pub secret_level: Option<SecretLevel>,
}

impl std::fmt::Display for CellKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.workload_type, self.intensity_level, self.mitigation_level
        )?;
        if let Some(secret) = self.secret_level {
            write!(f, "/secret={secret}")?;
        }
        Ok(())
    }
}

/// A label value recovered by a classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LabelValue {
    Workload(WorkloadType),
    Secret(SecretLevel),
}

impl std::fmt::Display for LabelValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Workload(w) => write!(f, "{w}"),
            Self::Secret(s) => write!(f, "{s}"),
        }
    }
}

/// One executed trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub run_id: String,
    pub campaign_kind: CampaignKind,
    pub workload_type: WorkloadType,
    pub intensity_level: IntensityLevel,
    pub mitigation_level: MitigationLevel,
    pub secret_level: Option<SecretLevel>,
    pub repetition: usize,
    pub resource_limits: ResourceLimits,
    /// Absent for failed trials.
    pub features: Option<FeatureVector>,
    /// Only `0` denotes a valid, usable trial.
    pub exit_code: i32,
}

impl TrialRecord {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0 && self.features.is_some()
    }

    pub fn cell(&self) -> CellKey {
        CellKey {
            workload_type: self.workload_type,
            intensity_level: self.intensity_level,
            mitigation_level: self.mitigation_level,
            secret_level: self.secret_level,
        }
    }

    pub fn label(&self, kind: LabelKind) -> Option<LabelValue> {
        match kind {
            LabelKind::WorkloadType => Some(LabelValue::Workload(self.workload_type)),
            LabelKind::SecretLevel => self.secret_level.map(LabelValue::Secret),
        }
    }

    pub fn feature(&self, name: &str) -> Option<f64> {
        self.features.as_ref().and_then(|f| f.get(name))
    }

    /// Check internal consistency: successful trials carry features, failed ones
    /// carry none.
    pub fn validate(&self) -> Result<(), LeakError> {
        match (self.exit_code, &self.features) {
            (0, None) => Err(LeakError::invalid_record(format!(
                "trial {} exited 0 without telemetry",
                self.run_id
            ))),
            (code, Some(_)) if code != 0 => Err(LeakError::invalid_record(format!(
                "failed trial {} (exit {code}) carries telemetry",
                self.run_id
            ))),
            _ => Ok(()),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_feature_vector_length_mismatch() {
        let err = FeatureVector::new(vec!["a".into()], vec![1.0, 2.0]).unwrap_err();
        assert!(matches!(err, LeakError::InvalidRecord(_)));
    }

    #[test]
    fn test_feature_vector_deserialization_is_checked() {
        let err = serde_json::from_str::<FeatureVector>(
            r#"{"names": ["runtime_ms", "cpu_pct"], "values": [12.5]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("2 feature names but 1 values"));

        let ok: FeatureVector =
            serde_json::from_str(r#"{"names": ["runtime_ms"], "values": [12.5]}"#).unwrap();
        assert_eq!(ok.get("runtime_ms"), Some(12.5));
        let json = serde_json::to_string(&ok).unwrap();
        assert_eq!(serde_json::from_str::<FeatureVector>(&json).unwrap(), ok);
    }

    #[test]
    fn test_feature_vector_rejects_nan() {
        assert!(FeatureVector::from_pairs([("runtime_ms", f64::NAN)]).is_err());
    }

    #[test]
    fn test_validate_failed_with_features() {
        let mut rec = record(WorkloadType::Cpu, MitigationLevel::None, [1.0; 5]);
        rec.exit_code = 137;
        assert!(rec.validate().is_err());
        assert!(!rec.succeeded());
    }

    #[test]
    fn test_label_for_secret_requires_level() {
        let rec = record(WorkloadType::Secret, MitigationLevel::Low, [1.0; 5]);
        assert!(rec.label(LabelKind::SecretLevel).is_none());
        assert_eq!(
            rec.label(LabelKind::WorkloadType),
            Some(LabelValue::Workload(WorkloadType::Secret))
        );
    }

    #[test]
    fn test_failed_fixture_is_valid_failure() {
        let rec = failed(WorkloadType::Disk, MitigationLevel::High);
        rec.validate().unwrap();
        assert!(!rec.succeeded());
        assert_eq!(rec.feature("runtime_ms"), None);
    }
}
