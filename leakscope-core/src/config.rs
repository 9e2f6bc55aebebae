//! Campaign configuration.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace `leakscope.toml` -> explicit file -> environment (`LEAKSCOPE_`).
//! The resolved configuration is copied verbatim into every baseline snapshot.

use crate::data::record::LabelValue;
use crate::data::schema::FeatureColumn;
use crate::error::LeakError;
use crate::eval::ClassifierKind;
use crate::types::{
    CampaignKind, IntensityLevel, MitigationLevel, NetworkPolicy, SecretLevel, WorkloadType,
};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Display;
use std::hash::Hash;
use std::path::{Path, PathBuf};

/// Name of the workspace-level configuration file.
pub const WORKSPACE_CONFIG_FILE: &str = "leakscope.toml";

/// Everything needed to reproduce one campaign and its analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignConfig {
    /// Campaign name, used for output file names and log fields.
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub kind: CampaignKind,
    /// Workload types to exercise.
    #[serde(default = "default_workloads")]
    pub workloads: Vec<WorkloadType>,
    #[serde(default = "default_intensity_levels")]
    pub intensity_levels: Vec<IntensityLevel>,
    #[serde(default = "default_mitigation_levels")]
    pub mitigation_levels: Vec<MitigationLevel>,
    /// Only used by secret campaigns.
    #[serde(default)]
    pub secret_levels: Vec<SecretLevel>,
    #[serde(default = "default_repetitions")]
    pub repetitions_per_config: usize,
    #[serde(default)]
    pub resource_limits: ResourceLimits,
    /// Ordered feature list defining the fixed dataset schema.
    #[serde(default = "default_features")]
    pub features: Vec<FeatureColumn>,
    #[serde(default)]
    pub classifier: ClassifierKind,
    #[serde(default = "default_seed")]
    pub random_seed: u64,
    /// Held-out fraction of each label class.
    #[serde(default = "default_test_fraction")]
    pub test_fraction: f64,
    /// Number of isolated sandbox slots trials may run on concurrently.
    #[serde(default = "default_slots")]
    pub sandbox_slots: usize,
    /// Trials running longer than this are killed and recorded as failed.
    #[serde(default = "default_trial_timeout")]
    pub trial_timeout_secs: u64,
    /// Directory receiving the dataset, schema and result artifacts.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Directory holding frozen baseline snapshots.
    #[serde(default = "default_baseline_dir")]
    pub baseline_dir: PathBuf,
    #[serde(default)]
    pub executor: ExecutorConfig,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            kind: CampaignKind::default(),
            workloads: default_workloads(),
            intensity_levels: default_intensity_levels(),
            mitigation_levels: default_mitigation_levels(),
            secret_levels: Vec::new(),
            repetitions_per_config: default_repetitions(),
            resource_limits: ResourceLimits::default(),
            features: default_features(),
            classifier: ClassifierKind::default(),
            random_seed: default_seed(),
            test_fraction: default_test_fraction(),
            sandbox_slots: default_slots(),
            trial_timeout_secs: default_trial_timeout(),
            output_dir: default_output_dir(),
            baseline_dir: default_baseline_dir(),
            executor: ExecutorConfig::default(),
        }
    }
}

impl CampaignConfig {
    /// A secret-leakage campaign over secret levels 0 to 3.
    pub fn secret_campaign() -> Self {
        Self {
            name: "secret".to_string(),
            kind: CampaignKind::Secret,
            workloads: vec![WorkloadType::Secret],
            intensity_levels: vec![IntensityLevel::Med],
            secret_levels: (0..4).filter_map(|v| SecretLevel::new(v).ok()).collect(),
            ..Self::default()
        }
    }

    /// Reject configurations that cannot produce a comparable campaign.
    pub fn validate(&self) -> Result<(), LeakError> {
        if self.repetitions_per_config == 0 {
            return Err(LeakError::config("repetitions_per_config must be >= 1"));
        }
        if self.workloads.is_empty() {
            return Err(LeakError::config("workloads must not be empty"));
        }
        if self.intensity_levels.is_empty() {
            return Err(LeakError::config("intensity_levels must not be empty"));
        }
        if self.mitigation_levels.is_empty() {
            return Err(LeakError::config("mitigation_levels must not be empty"));
        }
        reject_duplicates("workloads", &self.workloads)?;
        reject_duplicates("intensity_levels", &self.intensity_levels)?;
        reject_duplicates("mitigation_levels", &self.mitigation_levels)?;
        reject_duplicates("secret_levels", &self.secret_levels)?;
        match self.kind {
            CampaignKind::Secret if self.secret_levels.is_empty() => {
                return Err(LeakError::config(
                    "secret campaigns require at least one secret level",
                ));
            }
            CampaignKind::Workload if self.workloads.contains(&WorkloadType::Secret) => {
                return Err(LeakError::config(
                    "the secret workload belongs to secret campaigns",
                ));
            }
            _ => {}
        }
        if !(self.test_fraction > 0.0 && self.test_fraction < 1.0) {
            return Err(LeakError::config(format!(
                "test_fraction must lie in (0, 1), got {}",
                self.test_fraction
            )));
        }
        if self.sandbox_slots == 0 {
            return Err(LeakError::config("sandbox_slots must be >= 1"));
        }
        if self.trial_timeout_secs == 0 {
            return Err(LeakError::config("trial_timeout_secs must be >= 1"));
        }
        if self.features.is_empty() {
            return Err(LeakError::config("features must not be empty"));
        }
        let mut seen = HashSet::new();
        for feature in &self.features {
            if !seen.insert(feature.name.as_str()) {
                return Err(LeakError::config(format!(
                    "duplicate feature '{}'",
                    feature.name
                )));
            }
        }
        if !(self.resource_limits.cpu_share > 0.0) || self.resource_limits.memory_limit_mib == 0 {
            return Err(LeakError::config(
                "resource limits need a positive cpu_share and memory_limit_mib",
            ));
        }
        Ok(())
    }

    /// Label values a complete campaign produces.
    pub fn expected_labels(&self) -> Vec<LabelValue> {
        match self.kind {
            CampaignKind::Workload => self.workloads.iter().map(|w| LabelValue::Workload(*w)).collect(),
            CampaignKind::Secret => self.secret_levels.iter().map(|s| LabelValue::Secret(*s)).collect(),
        }
    }

    /// Number of distinct configuration cells in the cross-product.
    pub fn cell_count(&self) -> usize {
        let secrets = match self.kind {
            CampaignKind::Secret => self.secret_levels.len(),
            CampaignKind::Workload => 1,
        };
        self.workloads.len() * self.intensity_levels.len() * self.mitigation_levels.len() * secrets
    }

    pub fn dataset_path(&self) -> PathBuf {
        self.output_dir.join("data").join(format!("{}.csv", self.name))
    }

    pub fn schema_path(&self) -> PathBuf {
        self.output_dir.join("data").join("schema.json")
    }

    pub fn results_dir(&self) -> PathBuf {
        self.output_dir.join("results")
    }
}

/// Constraint configuration applied to every trial of a campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// CPU share in cores (`docker --cpus`).
    #[serde(default = "default_cpu_share")]
    pub cpu_share: f64,
    #[serde(default = "default_memory_limit")]
    pub memory_limit_mib: u64,
    #[serde(default)]
    pub network_policy: NetworkPolicy,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_share: default_cpu_share(),
            memory_limit_mib: default_memory_limit(),
            network_policy: NetworkPolicy::default(),
        }
    }
}

impl ResourceLimits {
    /// Stable textual key; records are only pooled when their keys agree.
    pub fn key(&self) -> String {
        format!(
            "cpus={}/mem={}m/net={}",
            self.cpu_share, self.memory_limit_mib, self.network_policy
        )
    }
}

/// Which sandbox backend executes trials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorBackend {
    #[default]
    Docker,
    Simulated,
}

/// Where the docker backend reads per-trial telemetry from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetrySource {
    /// cgroup v2 counters of the container (`cpu.stat`, `memory.current`, `io.stat`).
    #[default]
    Cgroup,
    /// `docker stats --no-stream` samples.
    DockerStats,
}

/// Sandbox executor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default)]
    pub backend: ExecutorBackend,
    /// Container runtime binary.
    #[serde(default = "default_docker_bin")]
    pub docker_bin: String,
    /// Workload image.
    #[serde(default = "default_image")]
    pub image: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Idle time the workload holds after finishing so the last sample lands.
    #[serde(default = "default_hold_ms")]
    pub hold_ms: u64,
    /// Buffer size of the secret workload.
    #[serde(default = "default_size_mib")]
    pub size_mib: u64,
    #[serde(default)]
    pub telemetry_source: TelemetrySource,
    #[serde(default)]
    pub intensity: IntensityTable,
    /// Fraction of trials the simulated backend fails on purpose.
    #[serde(default)]
    pub simulated_failure_rate: f64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            backend: ExecutorBackend::default(),
            docker_bin: default_docker_bin(),
            image: default_image(),
            poll_interval_ms: default_poll_interval(),
            hold_ms: default_hold_ms(),
            size_mib: default_size_mib(),
            telemetry_source: TelemetrySource::default(),
            intensity: IntensityTable::default(),
            simulated_failure_rate: 0.0,
        }
    }
}

/// Workload parameter `N` per intensity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntensityParams {
    pub low: u64,
    pub med: u64,
    pub high: u64,
}

impl IntensityParams {
    pub fn get(&self, level: IntensityLevel) -> u64 {
        match level {
            IntensityLevel::Low => self.low,
            IntensityLevel::Med => self.med,
            IntensityLevel::High => self.high,
        }
    }
}

/// Intensity mapping for every workload type: hash iterations for `cpu`,
/// MiB for the others.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntensityTable {
    #[serde(default = "default_cpu_params")]
    pub cpu: IntensityParams,
    #[serde(default = "default_mib_params")]
    pub mem: IntensityParams,
    #[serde(default = "default_mib_params")]
    pub disk: IntensityParams,
    #[serde(default = "default_mib_params")]
    pub mix: IntensityParams,
}

impl Default for IntensityTable {
    fn default() -> Self {
        Self {
            cpu: default_cpu_params(),
            mem: default_mib_params(),
            disk: default_mib_params(),
            mix: default_mib_params(),
        }
    }
}

impl IntensityTable {
    /// Workload parameter `N`. Secret workloads take the secret value instead.
    pub fn param(
        &self,
        workload: WorkloadType,
        intensity: IntensityLevel,
        secret: Option<SecretLevel>,
    ) -> u64 {
        match workload {
            WorkloadType::Cpu => self.cpu.get(intensity),
            WorkloadType::Mem => self.mem.get(intensity),
            WorkloadType::Disk => self.disk.get(intensity),
            WorkloadType::Mix => self.mix.get(intensity),
            WorkloadType::Secret => secret.map(|s| u64::from(s.value())).unwrap_or(0),
        }
    }
}

fn default_name() -> String {
    "workload".to_string()
}

fn default_workloads() -> Vec<WorkloadType> {
    vec![
        WorkloadType::Cpu,
        WorkloadType::Mem,
        WorkloadType::Disk,
        WorkloadType::Mix,
    ]
}

fn default_intensity_levels() -> Vec<IntensityLevel> {
    IntensityLevel::ALL.to_vec()
}

fn default_mitigation_levels() -> Vec<MitigationLevel> {
    MitigationLevel::ALL.to_vec()
}

fn default_repetitions() -> usize {
    30
}

fn default_features() -> Vec<FeatureColumn> {
    crate::data::schema::FeatureSchema::standard().columns
}

fn default_seed() -> u64 {
    42
}

fn default_test_fraction() -> f64 {
    0.25
}

fn default_slots() -> usize {
    1
}

fn default_trial_timeout() -> u64 {
    120
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("leakscope-out")
}

fn default_baseline_dir() -> PathBuf {
    PathBuf::from("baselines")
}

fn default_cpu_share() -> f64 {
    1.0
}

fn default_memory_limit() -> u64 {
    512
}

fn default_docker_bin() -> String {
    "docker".to_string()
}

fn default_image() -> String {
    "leakscope-workloads:latest".to_string()
}

fn default_poll_interval() -> u64 {
    200
}

fn default_hold_ms() -> u64 {
    750
}

fn default_size_mib() -> u64 {
    128
}

fn default_cpu_params() -> IntensityParams {
    IntensityParams {
        low: 2_000_000,
        med: 6_000_000,
        high: 12_000_000,
    }
}

fn default_mib_params() -> IntensityParams {
    IntensityParams {
        low: 64,
        med: 192,
        high: 320,
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with `LEAKSCOPE_`, `__` for nesting)
/// 2. Explicit config file
/// 3. Workspace-local config (`leakscope.toml`)
/// 4. User config (`~/.config/leakscope/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    explicit: Option<&Path>,
) -> Result<CampaignConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(CampaignConfig::default()));

    if let Some(dirs) = directories::ProjectDirs::from("dev", "leakscope", "leakscope") {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(WORKSPACE_CONFIG_FILE);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    if let Some(path) = explicit {
        figment = figment.merge(Toml::file(path));
    }

    // LEAKSCOPE_REPETITIONS_PER_CONFIG, LEAKSCOPE_EXECUTOR__BACKEND, ...
    figment = figment.merge(Env::prefixed("LEAKSCOPE_").split("__"));

    figment.extract().map_err(Box::new)
}

fn reject_duplicates<T: Eq + Hash + Display>(field: &str, values: &[T]) -> Result<(), LeakError> {
    let mut seen = HashSet::new();
    for value in values {
        if !seen.insert(value) {
            return Err(LeakError::config(format!("duplicate {field} entry '{value}'")));
        }
    }
    Ok(())
}
