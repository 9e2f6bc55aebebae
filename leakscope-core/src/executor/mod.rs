//! Trial executors: the boundary to the sandbox runtime.
//!
//! An executor runs exactly one workload instance in its own isolated sandbox
//! and reports either clean telemetry or a failure. It must never hang: every
//! implementation honors the trial's time budget.

pub mod cgroup;
pub mod docker;
pub mod simulated;
pub mod units;

use crate::config::{CampaignConfig, ExecutorBackend, ResourceLimits};
use crate::data::record::{CellKey, FeatureVector};
use crate::data::schema::FeatureSchema;
use crate::error::LeakError;
use crate::types::CampaignKind;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub use docker::DockerExecutor;
pub use simulated::SimulatedExecutor;

/// Everything an executor needs to run one trial.
#[derive(Debug, Clone)]
pub struct TrialSpec {
    pub run_id: String,
    /// Position in the campaign schedule.
    pub index: usize,
    pub campaign_kind: CampaignKind,
    pub cell: CellKey,
    pub repetition: usize,
    pub resource_limits: ResourceLimits,
    pub timeout: Duration,
}

impl TrialSpec {
    /// Short, unique sandbox name.
    pub fn sandbox_name(&self) -> String {
        let short: String = self.run_id.chars().take(8).collect();
        let mut name = format!(
            "leakscope_{}_{}_{}_{}",
            self.cell.workload_type,
            self.cell.intensity_level,
            self.cell.mitigation_level,
            self.repetition
        );
        if let Some(secret) = self.cell.secret_level {
            name.push_str(&format!("_s{secret}"));
        }
        name.push('_');
        name.push_str(&short);
        name
    }
}

/// Raw per-trial telemetry as observed from outside the sandbox.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Telemetry {
    pub runtime_ms: f64,
    pub avg_cpu_percent: f64,
    pub max_mem_mib: f64,
    pub blk_read_mib: f64,
    pub blk_write_mib: f64,
}

impl Telemetry {
    /// Project onto the campaign's feature schema, in schema order.
    pub fn to_features(&self, schema: &FeatureSchema) -> Result<FeatureVector, LeakError> {
        let values = schema
            .columns
            .iter()
            .map(|col| match col.name.as_str() {
                FeatureSchema::RUNTIME_MS => Ok(self.runtime_ms),
                FeatureSchema::AVG_CPU_PERCENT => Ok(self.avg_cpu_percent),
                FeatureSchema::MAX_MEM_MIB => Ok(self.max_mem_mib),
                FeatureSchema::BLK_READ_MIB => Ok(self.blk_read_mib),
                FeatureSchema::BLK_WRITE_MIB => Ok(self.blk_write_mib),
                other => Err(LeakError::SchemaMismatch {
                    expected: FeatureSchema::standard().names(),
                    found: vec![other.to_string()],
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;
        FeatureVector::new(schema.names(), values)
    }
}

/// Result of one trial.
#[derive(Debug, Clone, PartialEq)]
pub enum TrialOutcome {
    /// The sandbox terminated cleanly with exit code 0 and was torn down.
    Completed(Telemetry),
    /// Anything else: nonzero exit, timeout, launch or teardown failure.
    Failed { exit_code: i32, reason: String },
}

impl TrialOutcome {
    pub fn failed(exit_code: i32, reason: impl Into<String>) -> Self {
        Self::Failed {
            exit_code,
            reason: reason.into(),
        }
    }
}

/// A sandbox runtime able to execute one isolated trial at a time per call.
///
/// Implementations must not share mutable sandbox state between calls, so
/// concurrent calls on distinct slots are measured independently.
#[async_trait]
pub trait TrialExecutor: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, spec: &TrialSpec) -> TrialOutcome;
}

/// Build the executor selected by the configuration.
pub fn build_executor(config: &CampaignConfig) -> Arc<dyn TrialExecutor> {
    match config.executor.backend {
        ExecutorBackend::Docker => Arc::new(DockerExecutor::new(config.executor.clone())),
        ExecutorBackend::Simulated => Arc::new(SimulatedExecutor::new(
            config.random_seed,
            config.executor.simulated_failure_rate,
        )),
    }
}
