//! Closed categorical types shared across campaigns, datasets and analysis.
//!
//! Every category parses from and displays as its lowercase wire name, the same
//! string that appears in dataset files and configuration.

use crate::error::LeakError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! wire_enum {
    ($name:ident, $what:literal, { $($variant:ident => $wire:literal),+ $(,)? }) => {
        impl $name {
            /// All variants in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = LeakError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim() {
                    $($wire => Ok($name::$variant),)+
                    other => Err(LeakError::invalid_input(format!(
                        "unknown {} '{other}'",
                        $what
                    ))),
                }
            }
        }
    };
}

/// Kind of workload executed inside the sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadType {
    Cpu,
    Mem,
    Disk,
    Mix,
    /// Secret-bearing workload used by secret-leakage campaigns.
    Secret,
}

wire_enum!(WorkloadType, "workload type", {
    Cpu => "cpu",
    Mem => "mem",
    Disk => "disk",
    Mix => "mix",
    Secret => "secret",
});

/// Workload intensity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntensityLevel {
    Low,
    Med,
    High,
}

wire_enum!(IntensityLevel, "intensity level", {
    Low => "low",
    Med => "med",
    High => "high",
});

/// Strength of the leakage countermeasure. Ordered by strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MitigationLevel {
    None,
    Low,
    High,
}

wire_enum!(MitigationLevel, "mitigation level", {
    None => "none",
    Low => "low",
    High => "high",
});

impl MitigationLevel {
    /// The level every overhead is measured against.
    pub const REFERENCE: MitigationLevel = MitigationLevel::None;

    pub fn is_reference(&self) -> bool {
        *self == Self::REFERENCE
    }
}

/// Hidden value encoded by a secret-bearing workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct SecretLevel(u8);

impl SecretLevel {
    pub const MAX: u8 = 15;

    pub fn new(value: u8) -> Result<Self, LeakError> {
        if value > Self::MAX {
            return Err(LeakError::invalid_input(format!(
                "secret level {value} outside 0..={}",
                Self::MAX
            )));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for SecretLevel {
    type Error = LeakError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SecretLevel> for u8 {
    fn from(level: SecretLevel) -> Self {
        level.0
    }
}

impl fmt::Display for SecretLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SecretLevel {
    type Err = LeakError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: u8 = s
            .trim()
            .parse()
            .map_err(|_| LeakError::invalid_input(format!("invalid secret level '{s}'")))?;
        Self::new(value)
    }
}

/// Which record field a classifier is asked to recover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelKind {
    WorkloadType,
    SecretLevel,
}

wire_enum!(LabelKind, "label kind", {
    WorkloadType => "workload_type",
    SecretLevel => "secret_level",
});

/// Campaigns come in two kinds sharing the same pipeline components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignKind {
    /// Identify the workload type from telemetry.
    #[default]
    Workload,
    /// Recover an embedded secret value from telemetry.
    Secret,
}

wire_enum!(CampaignKind, "campaign kind", {
    Workload => "workload",
    Secret => "secret",
});

impl CampaignKind {
    /// The label a campaign of this kind is evaluated against.
    pub fn label_kind(&self) -> LabelKind {
        match self {
            Self::Workload => LabelKind::WorkloadType,
            Self::Secret => LabelKind::SecretLevel,
        }
    }
}

/// Network policy applied to the sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkPolicy {
    #[default]
    None,
    Bridge,
    Host,
}

wire_enum!(NetworkPolicy, "network policy", {
    None => "none",
    Bridge => "bridge",
    Host => "host",
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names_parse_back() {
        for w in WorkloadType::ALL {
            assert_eq!(w.as_str().parse::<WorkloadType>().unwrap(), *w);
        }
        for m in MitigationLevel::ALL {
            assert_eq!(m.to_string().parse::<MitigationLevel>().unwrap(), *m);
        }
    }

    #[test]
    fn test_unknown_category_rejected() {
        assert!("gpu".parse::<WorkloadType>().is_err());
        assert!("medium".parse::<IntensityLevel>().is_err());
        assert!("max".parse::<MitigationLevel>().is_err());
    }

    #[test]
    fn test_mitigation_ordered_by_strength() {
        assert!(MitigationLevel::None < MitigationLevel::Low);
        assert!(MitigationLevel::Low < MitigationLevel::High);
        assert!(MitigationLevel::None.is_reference());
    }

    #[test]
    fn test_secret_level_bounds() {
        assert!(SecretLevel::new(3).is_ok());
        assert!(SecretLevel::new(16).is_err());
        assert!("x".parse::<SecretLevel>().is_err());
        let parsed: SecretLevel = serde_json::from_str("2").unwrap();
        assert_eq!(parsed.value(), 2);
        assert!(serde_json::from_str::<SecretLevel>("200").is_err());
    }

    #[test]
    fn test_campaign_kind_label() {
        assert_eq!(CampaignKind::Workload.label_kind(), LabelKind::WorkloadType);
        assert_eq!(CampaignKind::Secret.label_kind(), LabelKind::SecretLevel);
    }
}
