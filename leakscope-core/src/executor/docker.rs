//! Docker-backed executor.
//!
//! Starts one detached container per trial under the campaign's resource
//! limits, samples its telemetry until it exits, and always force-removes it.

use crate::config::{ExecutorConfig, TelemetrySource};
use crate::data::record::{TIMEOUT_EXIT_CODE, UNKNOWN_EXIT_CODE};
use crate::error::LeakError;
use crate::executor::units::{bytes_to_mib, parse_block_io, parse_mem_usage, parse_percent};
use crate::executor::{Telemetry, TrialExecutor, TrialOutcome, TrialSpec, cgroup};
use crate::types::WorkloadType;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, warn};

/// How long to wait for a fresh container's cgroup to appear.
const CGROUP_WAIT: Duration = Duration::from_millis(1500);

/// What the sampling loop saw.
#[derive(Debug)]
enum Observation {
    Exited(Telemetry),
    TimedOut,
    Lost(String),
}

/// One `docker stats` reading.
#[derive(Debug, Clone, Copy)]
struct StatsSample {
    cpu_percent: f64,
    mem_bytes: f64,
    read_bytes: f64,
    write_bytes: f64,
}

/// Removes the container if the trial future is dropped mid-flight.
struct ContainerGuard {
    docker_bin: String,
    name: String,
    armed: bool,
}

impl ContainerGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::process::Command::new(&self.docker_bin)
                .args(["rm", "-f", &self.name])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn();
        }
    }
}

/// Executes trials as Docker containers.
pub struct DockerExecutor {
    config: ExecutorConfig,
    cgroup_root: PathBuf,
}

impl DockerExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config,
            cgroup_root: PathBuf::from(cgroup::CGROUP_ROOT),
        }
    }

    /// Override the cgroup v2 mount point.
    pub fn with_cgroup_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.cgroup_root = root.into();
        self
    }

    /// Arguments of the `docker run` invocation for one trial.
    pub fn run_args(&self, spec: &TrialSpec, name: &str) -> Vec<String> {
        let limits = &spec.resource_limits;
        let n = self.config.intensity.param(
            spec.cell.workload_type,
            spec.cell.intensity_level,
            spec.cell.secret_level,
        );
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            name.to_string(),
            format!("--cpus={}", limits.cpu_share),
            format!("--memory={}m", limits.memory_limit_mib),
            "--network".to_string(),
            limits.network_policy.to_string(),
            self.config.image.clone(),
            "--workload".to_string(),
            spec.cell.workload_type.to_string(),
            "--N".to_string(),
            n.to_string(),
            "--mitigation".to_string(),
            spec.cell.mitigation_level.to_string(),
            "--hold_ms".to_string(),
            self.config.hold_ms.to_string(),
        ];
        if spec.cell.workload_type == WorkloadType::Secret {
            args.push("--size_mib".to_string());
            args.push(self.config.size_mib.to_string());
        }
        args
    }

    async fn docker(&self, args: &[&str]) -> Result<Output, LeakError> {
        Command::new(&self.config.docker_bin)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(LeakError::from)
    }

    async fn inspect(&self, name: &str, format: &str) -> Option<String> {
        let output = self.docker(&["inspect", "-f", format, name]).await.ok()?;
        if !output.status.success() {
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn is_running(&self, name: &str) -> bool {
        self.inspect(name, "{{.State.Running}}")
            .await
            .is_some_and(|s| s.eq_ignore_ascii_case("true"))
    }

    async fn exit_code(&self, name: &str) -> i32 {
        self.inspect(name, "{{.State.ExitCode}}")
            .await
            .and_then(|s| s.parse().ok())
            .unwrap_or(UNKNOWN_EXIT_CODE)
    }

    async fn kill(&self, name: &str) {
        if let Err(e) = self.docker(&["kill", name]).await {
            debug!(container = name, error = %e, "docker kill failed");
        }
    }

    async fn remove(&self, name: &str) -> Result<(), LeakError> {
        let output = self.docker(&["rm", "-f", name]).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(LeakError::sandbox(
                name,
                format!(
                    "teardown failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ))
        }
    }

    async fn stats_once(&self, name: &str) -> Option<StatsSample> {
        let output = self
            .docker(&[
                "stats",
                "--no-stream",
                "--format",
                "{{.CPUPerc}},{{.MemUsage}},{{.BlockIO}}",
                name,
            ])
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let line = String::from_utf8_lossy(&output.stdout).trim().to_string();
        match parse_stats_line(&line) {
            Ok(sample) => Some(sample),
            Err(e) => {
                debug!(container = name, error = %e, "unparseable docker stats line");
                None
            }
        }
    }

    async fn wait_for_cgroup(&self, pid: u32) -> Option<PathBuf> {
        let deadline = Instant::now() + CGROUP_WAIT;
        while Instant::now() < deadline {
            if let Some(dir) = cgroup::cgroup_dir_for_pid(pid, &self.cgroup_root) {
                if cgroup::is_ready(&dir) {
                    return Some(dir);
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        None
    }

    async fn observe_cgroup(&self, spec: &TrialSpec, name: &str, started: Instant) -> Observation {
        let pid = self
            .inspect(name, "{{.State.Pid}}")
            .await
            .and_then(|s| s.parse::<u32>().ok())
            .filter(|pid| *pid > 0);
        let Some(pid) = pid else {
            return Observation::Lost("container exited before it could be sampled".into());
        };
        let Some(dir) = self.wait_for_cgroup(pid).await else {
            return Observation::Lost(format!("no cgroup v2 directory for pid {pid}"));
        };
        let first = match cgroup::sample(&dir) {
            Ok(s) => s,
            Err(e) => return Observation::Lost(format!("initial cgroup sample failed: {e}")),
        };

        let poll = Duration::from_millis(self.config.poll_interval_ms);
        let mut last = first;
        let mut peak = first.memory_current;
        loop {
            match cgroup::sample(&dir) {
                Ok(s) => {
                    last = s;
                    peak = peak.max(s.memory_current);
                }
                // cgroup removed: the container is gone
                Err(_) => break,
            }
            if !self.is_running(name).await {
                break;
            }
            if started.elapsed() > spec.timeout {
                return Observation::TimedOut;
            }
            tokio::time::sleep(poll).await;
        }

        let runtime = started.elapsed().as_secs_f64();
        let cpu_secs = last.usage_usec.saturating_sub(first.usage_usec) as f64 / 1e6;
        Observation::Exited(Telemetry {
            runtime_ms: runtime * 1000.0,
            avg_cpu_percent: if runtime > 0.0 {
                cpu_secs / runtime * 100.0
            } else {
                0.0
            },
            max_mem_mib: bytes_to_mib(peak as f64),
            blk_read_mib: bytes_to_mib(last.rbytes.saturating_sub(first.rbytes) as f64),
            blk_write_mib: bytes_to_mib(last.wbytes.saturating_sub(first.wbytes) as f64),
        })
    }

    async fn observe_stats(&self, spec: &TrialSpec, name: &str, started: Instant) -> Observation {
        let poll = Duration::from_millis(self.config.poll_interval_ms);
        let mut samples = Vec::new();
        loop {
            if let Some(s) = self.stats_once(name).await {
                samples.push(s);
            }
            if !self.is_running(name).await {
                break;
            }
            if started.elapsed() > spec.timeout {
                return Observation::TimedOut;
            }
            tokio::time::sleep(poll).await;
        }
        let runtime_ms = started.elapsed().as_secs_f64() * 1000.0;

        // the last poll sometimes misses the final block I/O
        if let Some(s) = self.stats_once(name).await {
            samples.push(s);
        }
        match aggregate_stats(&samples, runtime_ms) {
            Some(t) => Observation::Exited(t),
            None => Observation::Lost("no docker stats samples".into()),
        }
    }
}

fn parse_stats_line(line: &str) -> Result<StatsSample, LeakError> {
    let mut parts = line.splitn(3, ',');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(cpu), Some(mem), Some(blk)) => {
            let (read_bytes, write_bytes) = parse_block_io(blk)?;
            Ok(StatsSample {
                cpu_percent: parse_percent(cpu)?,
                mem_bytes: parse_mem_usage(mem)?,
                read_bytes,
                write_bytes,
            })
        }
        _ => Err(LeakError::invalid_input(format!("malformed stats line '{line}'"))),
    }
}

/// Mean CPU, peak memory, and the last cumulative block I/O reading.
fn aggregate_stats(samples: &[StatsSample], runtime_ms: f64) -> Option<Telemetry> {
    let last = samples.last()?;
    let avg_cpu = samples.iter().map(|s| s.cpu_percent).sum::<f64>() / samples.len() as f64;
    let peak = samples.iter().map(|s| s.mem_bytes).fold(0.0, f64::max);
    Some(Telemetry {
        runtime_ms,
        avg_cpu_percent: avg_cpu,
        max_mem_mib: bytes_to_mib(peak),
        blk_read_mib: bytes_to_mib(last.read_bytes),
        blk_write_mib: bytes_to_mib(last.write_bytes),
    })
}

#[async_trait]
impl TrialExecutor for DockerExecutor {
    fn name(&self) -> &str {
        "docker"
    }

    async fn execute(&self, spec: &TrialSpec) -> TrialOutcome {
        let name = spec.sandbox_name();
        let run_args = self.run_args(spec, &name);
        let run_args: Vec<&str> = run_args.iter().map(String::as_str).collect();

        let started = Instant::now();
        let launched = self.docker(&run_args).await;
        let mut guard = ContainerGuard {
            docker_bin: self.config.docker_bin.clone(),
            name: name.clone(),
            armed: true,
        };
        match launched {
            Ok(output) if output.status.success() => {}
            Ok(output) => {
                let code = output.status.code().filter(|c| *c != 0).unwrap_or(UNKNOWN_EXIT_CODE);
                return TrialOutcome::failed(
                    code,
                    format!(
                        "docker run failed: {}",
                        String::from_utf8_lossy(&output.stderr).trim()
                    ),
                );
            }
            Err(e) => {
                guard.disarm();
                return TrialOutcome::failed(UNKNOWN_EXIT_CODE, format!("docker unavailable: {e}"));
            }
        }

        let observation = match self.config.telemetry_source {
            TelemetrySource::Cgroup => self.observe_cgroup(spec, &name, started).await,
            TelemetrySource::DockerStats => self.observe_stats(spec, &name, started).await,
        };

        let exit_code = match observation {
            Observation::TimedOut => {
                warn!(container = %name, timeout_secs = spec.timeout.as_secs(), "trial timed out, killing");
                self.kill(&name).await;
                TIMEOUT_EXIT_CODE
            }
            _ => self.exit_code(&name).await,
        };

        let teardown = self.remove(&name).await;
        guard.disarm();
        if let Err(e) = teardown {
            let code = if exit_code == 0 { UNKNOWN_EXIT_CODE } else { exit_code };
            return TrialOutcome::failed(code, e.to_string());
        }

        match observation {
            Observation::Exited(telemetry) if exit_code == 0 => TrialOutcome::Completed(telemetry),
            Observation::Exited(_) => {
                TrialOutcome::failed(exit_code, format!("workload exited with {exit_code}"))
            }
            Observation::TimedOut => TrialOutcome::failed(
                TIMEOUT_EXIT_CODE,
                format!("exceeded {}s budget", spec.timeout.as_secs()),
            ),
            Observation::Lost(reason) => {
                let code = if exit_code == 0 { UNKNOWN_EXIT_CODE } else { exit_code };
                TrialOutcome::failed(code, reason)
            }
        }
    }
}

/// Detect whether the host exposes cgroup v2 at the default mount point.
pub fn host_uses_cgroup_v2() -> bool {
    cgroup::is_cgroup_v2(Path::new(cgroup::CGROUP_ROOT))
}
