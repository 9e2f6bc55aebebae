//! Dataset schema: the fixed, ordered feature list plus the companion descriptor
//! written next to every dataset file.

use crate::error::LeakError;
use serde::{Deserialize, Serialize};

/// Column data type in the tabular dataset file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    Float,
    String,
    Categorical,
}

/// One named numeric feature and its unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeatureColumn {
    pub name: String,
    pub unit: String,
}

impl FeatureColumn {
    pub fn new(name: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unit: unit.into(),
        }
    }
}

/// Fixed, ordered feature schema of a dataset.
///
/// New features are appended as new named columns; existing ones are never
/// reordered, since record vectors are positional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub columns: Vec<FeatureColumn>,
}

impl FeatureSchema {
    pub const RUNTIME_MS: &'static str = "runtime_ms";
    pub const AVG_CPU_PERCENT: &'static str = "avg_cpu_percent";
    pub const MAX_MEM_MIB: &'static str = "max_mem_mib";
    pub const BLK_READ_MIB: &'static str = "blk_read_mib";
    pub const BLK_WRITE_MIB: &'static str = "blk_write_mib";

    pub fn new(columns: Vec<FeatureColumn>) -> Result<Self, LeakError> {
        if columns.is_empty() {
            return Err(LeakError::invalid_input("schema needs at least one feature"));
        }
        for (i, col) in columns.iter().enumerate() {
            if columns[..i].iter().any(|c| c.name == col.name) {
                return Err(LeakError::invalid_input(format!(
                    "duplicate feature '{}'",
                    col.name
                )));
            }
        }
        Ok(Self { columns })
    }

    /// Runtime, CPU, peak memory and block I/O: the five telemetry features
    /// observable from outside the sandbox.
    pub fn standard() -> Self {
        Self {
            columns: vec![
                FeatureColumn::new(Self::RUNTIME_MS, "ms"),
                FeatureColumn::new(Self::AVG_CPU_PERCENT, "percent"),
                FeatureColumn::new(Self::MAX_MEM_MIB, "MiB"),
                FeatureColumn::new(Self::BLK_READ_MIB, "MiB"),
                FeatureColumn::new(Self::BLK_WRITE_MIB, "MiB"),
            ],
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Fail with `SchemaMismatch` unless `names` equals the schema in order.
    pub fn check_names<S: AsRef<str>>(&self, names: &[S]) -> Result<(), LeakError> {
        let matches = names.len() == self.columns.len()
            && names
                .iter()
                .zip(&self.columns)
                .all(|(n, c)| n.as_ref() == c.name);
        if matches {
            Ok(())
        } else {
            Err(LeakError::SchemaMismatch {
                expected: self.names(),
                found: names.iter().map(|n| n.as_ref().to_string()).collect(),
            })
        }
    }

    /// The full descriptor of the tabular file, metadata columns first.
    pub fn descriptor(&self) -> SchemaDescriptor {
        let mut columns: Vec<ColumnSchema> = METADATA_COLUMNS
            .iter()
            .map(|(name, dtype, unit, nullable)| ColumnSchema {
                name: (*name).to_string(),
                dtype: *dtype,
                unit: unit.map(str::to_string),
                nullable: *nullable,
            })
            .collect();
        columns.extend(self.columns.iter().map(|c| ColumnSchema {
            name: c.name.clone(),
            dtype: ColumnType::Float,
            unit: Some(c.unit.clone()),
            // empty for failed trials
            nullable: true,
        }));
        SchemaDescriptor {
            format: "csv".to_string(),
            columns,
            feature_names: self.names(),
        }
    }
}

/// Metadata columns preceding the features: name, type, unit, nullable.
pub const METADATA_COLUMNS: &[(&str, ColumnType, Option<&str>, bool)] = &[
    ("run_id", ColumnType::String, None, false),
    ("campaign_kind", ColumnType::Categorical, None, false),
    ("workload_type", ColumnType::Categorical, None, false),
    ("intensity_level", ColumnType::Categorical, None, false),
    ("mitigation_level", ColumnType::Categorical, None, false),
    ("secret_level", ColumnType::Integer, None, true),
    ("repetition", ColumnType::Integer, None, false),
    ("cpu_share", ColumnType::Float, Some("cores"), false),
    ("memory_limit_mib", ColumnType::Integer, Some("MiB"), false),
    ("network_policy", ColumnType::Categorical, None, false),
    ("exit_code", ColumnType::Integer, None, false),
];

/// Schema for a single column of the dataset file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub dtype: ColumnType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub nullable: bool,
}

/// Companion descriptor (`schema.json`) enumerating columns, types and units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    pub format: String,
    pub columns: Vec<ColumnSchema>,
    pub feature_names: Vec<String>,
}

impl SchemaDescriptor {
    /// Rebuild the feature schema the descriptor was written from.
    pub fn feature_schema(&self) -> Result<FeatureSchema, LeakError> {
        let columns = self
            .feature_names
            .iter()
            .map(|name| {
                let unit = self
                    .columns
                    .iter()
                    .find(|c| &c.name == name)
                    .and_then(|c| c.unit.clone())
                    .unwrap_or_default();
                FeatureColumn::new(name.clone(), unit)
            })
            .collect();
        FeatureSchema::new(columns)
    }
}
