//! In-process executor producing synthetic telemetry.
//!
//! Each workload type (and secret level) has a distinct resource profile.
//! Stronger mitigations blend every profile toward one shared envelope and add
//! runtime overhead, so leakage shrinks while cost grows. Draws are seeded per
//! trial, so a schedule replays identically whatever the slot interleaving.

use crate::data::record::TIMEOUT_EXIT_CODE;
use crate::executor::{Telemetry, TrialExecutor, TrialOutcome, TrialSpec};
use crate::types::{IntensityLevel, MitigationLevel, WorkloadType};
use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::time::Duration;

/// Exit code of an injected sandbox failure (SIGKILL).
pub const SIMULATED_FAILURE_EXIT_CODE: i32 = 137;

/// Shape every mitigated profile is pulled toward.
const ENVELOPE: [f64; 5] = [1500.0, 60.0, 128.0, 0.5, 96.0];

/// Relative noise amplitude.
const NOISE: f64 = 0.04;

pub struct SimulatedExecutor {
    seed: u64,
    failure_rate: f64,
    latency: Option<Duration>,
}

impl SimulatedExecutor {
    pub fn new(seed: u64, failure_rate: f64) -> Self {
        Self {
            seed,
            failure_rate: failure_rate.clamp(0.0, 1.0),
            latency: None,
        }
    }

    /// Make every trial take `latency` of wall time.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn rng_for(&self, spec: &TrialSpec) -> ChaCha8Rng {
        let stream = self
            .seed
            .wrapping_mul(0x9E37_79B9_7F4A_7C15)
            .wrapping_add(spec.index as u64);
        ChaCha8Rng::seed_from_u64(stream)
    }

    /// Sample one telemetry reading for the trial.
    pub fn sample(&self, spec: &TrialSpec) -> Telemetry {
        let mut rng = self.rng_for(spec);
        // skip the failure draw so features do not depend on the failure rate
        let _: f64 = rng.r#gen();
        draw(&mut rng, spec)
    }
}

/// Unmitigated profile: runtime ms, cpu %, peak MiB, read MiB, written MiB.
fn profile(workload: WorkloadType, intensity: IntensityLevel, secret: u8) -> [f64; 5] {
    let scale = match intensity {
        IntensityLevel::Low => 1.0,
        IntensityLevel::Med => 3.0,
        IntensityLevel::High => 5.0,
    };
    let secret = f64::from(secret);
    match workload {
        WorkloadType::Cpu => [400.0 * scale, 98.0, 8.0, 0.0, 0.0],
        WorkloadType::Mem => [120.0 * scale, 85.0, 64.0 * scale, 0.0, 0.0],
        WorkloadType::Disk => [260.0 * scale, 35.0, 10.0, 0.5, 64.0 * scale],
        WorkloadType::Mix => [450.0 * scale, 70.0, 32.0 * scale, 0.2, 32.0 * scale],
        WorkloadType::Secret => [
            300.0 + 180.0 * secret,
            55.0 + 8.0 * secret,
            128.0 + 16.0 * secret,
            0.0,
            8.0 * secret,
        ],
    }
}

/// Blend weight toward the envelope and runtime multiplier.
fn mitigation_effect(level: MitigationLevel) -> (f64, f64) {
    match level {
        MitigationLevel::None => (0.0, 1.0),
        MitigationLevel::Low => (0.6, 1.15),
        MitigationLevel::High => (0.97, 1.4),
    }
}

/// Roughly normal noise in [-1.5, 1.5] from three uniforms.
fn jitter(rng: &mut ChaCha8Rng) -> f64 {
    (0..3).map(|_| rng.r#gen::<f64>()).sum::<f64>() - 1.5
}

fn draw(rng: &mut ChaCha8Rng, spec: &TrialSpec) -> Telemetry {
    let cell = &spec.cell;
    let base = profile(
        cell.workload_type,
        cell.intensity_level,
        cell.secret_level.map(|s| s.value()).unwrap_or(0),
    );
    let (alpha, overhead) = mitigation_effect(cell.mitigation_level);

    let mut values = [0.0; 5];
    for (i, value) in values.iter_mut().enumerate() {
        let blended = (1.0 - alpha) * base[i] + alpha * ENVELOPE[i];
        let noisy = blended * (1.0 + NOISE * jitter(rng)) + 0.05 * jitter(rng);
        *value = noisy.max(0.0);
    }
    values[0] *= overhead;
    values[1] = values[1].min(100.0 * spec.resource_limits.cpu_share);

    Telemetry {
        runtime_ms: values[0],
        avg_cpu_percent: values[1],
        max_mem_mib: values[2],
        blk_read_mib: values[3],
        blk_write_mib: values[4],
    }
}

#[async_trait]
impl TrialExecutor for SimulatedExecutor {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn execute(&self, spec: &TrialSpec) -> TrialOutcome {
        if let Some(latency) = self.latency {
            if latency > spec.timeout {
                tokio::time::sleep(spec.timeout).await;
                return TrialOutcome::failed(
                    TIMEOUT_EXIT_CODE,
                    format!("exceeded {}s budget", spec.timeout.as_secs()),
                );
            }
            tokio::time::sleep(latency).await;
        }

        let mut rng = self.rng_for(spec);
        let roll: f64 = rng.r#gen();
        if roll < self.failure_rate {
            return TrialOutcome::failed(SIMULATED_FAILURE_EXIT_CODE, "simulated sandbox failure");
        }
        TrialOutcome::Completed(draw(&mut rng, spec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceLimits;
    use crate::data::record::CellKey;
    use crate::types::{CampaignKind, SecretLevel};

    fn spec(workload: WorkloadType, mitigation: MitigationLevel, index: usize) -> TrialSpec {
        TrialSpec {
            run_id: format!("run-{index}"),
            index,
            campaign_kind: CampaignKind::Workload,
            cell: CellKey {
                workload_type: workload,
                intensity_level: IntensityLevel::Med,
                mitigation_level: mitigation,
                secret_level: None,
            },
            repetition: 0,
            resource_limits: ResourceLimits::default(),
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_same_seed_same_telemetry() {
        let a = SimulatedExecutor::new(7, 0.0);
        let b = SimulatedExecutor::new(7, 0.0);
        let s = spec(WorkloadType::Disk, MitigationLevel::None, 11);
        assert_eq!(a.execute(&s).await, b.execute(&s).await);
    }

    #[test]
    fn test_unmitigated_profiles_are_separated() {
        let exec = SimulatedExecutor::new(1, 0.0);
        let cpu = exec.sample(&spec(WorkloadType::Cpu, MitigationLevel::None, 0));
        let disk = exec.sample(&spec(WorkloadType::Disk, MitigationLevel::None, 1));
        assert!(cpu.avg_cpu_percent > 80.0);
        assert!(disk.avg_cpu_percent < 50.0);
        assert!(disk.blk_write_mib > 100.0);
    }

    #[test]
    fn test_high_mitigation_costs_runtime() {
        let exec = SimulatedExecutor::new(3, 0.0);
        let mean = |m: MitigationLevel| {
            (0..50)
                .map(|i| exec.sample(&spec(WorkloadType::Mix, m, i)).runtime_ms)
                .sum::<f64>()
                / 50.0
        };
        assert!(mean(MitigationLevel::High) > mean(MitigationLevel::None));
    }

    #[test]
    fn test_secret_profile_grows_with_level() {
        let low = profile(WorkloadType::Secret, IntensityLevel::Med, 0);
        let high = profile(WorkloadType::Secret, IntensityLevel::Med, SecretLevel::MAX);
        assert!(high[0] > low[0]);
        assert!(high[2] > low[2]);
    }

    #[tokio::test]
    async fn test_failure_rate_one_always_fails() {
        let exec = SimulatedExecutor::new(5, 1.0);
        let outcome = exec
            .execute(&spec(WorkloadType::Cpu, MitigationLevel::Low, 2))
            .await;
        assert!(matches!(
            outcome,
            TrialOutcome::Failed { exit_code: SIMULATED_FAILURE_EXIT_CODE, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_beyond_budget_times_out() {
        let exec = SimulatedExecutor::new(5, 0.0).with_latency(Duration::from_secs(60));
        let outcome = exec
            .execute(&spec(WorkloadType::Cpu, MitigationLevel::None, 0))
            .await;
        assert!(matches!(
            outcome,
            TrialOutcome::Failed { exit_code: TIMEOUT_EXIT_CODE, .. }
        ));
    }
}
