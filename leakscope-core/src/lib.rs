//! # leakscope-core: telemetry side-channel leakage evaluation
//!
//! Runs controlled workload trials inside resource-limited sandboxes, records
//! the coarse telemetry each trial leaves behind, and measures how well that
//! telemetry predicts a hidden label (the workload type, or a secret value).
//! Mitigation levels are compared by the leakage they leave and the runtime
//! they cost, and results can be frozen as immutable baselines.
//!
//! ## Pipeline
//!
//! 1. [`campaign`] schedules the configuration cross-product and runs trials
//!    on bounded sandbox slots through a [`executor::TrialExecutor`].
//! 2. [`data`] holds the fixed-schema dataset and its CSV form.
//! 3. [`eval`] fits a classifier per mitigation level and reports held-out
//!    accuracy against the chance baseline.
//! 4. [`analysis`] builds the accuracy/overhead tradeoff and writes summaries.
//! 5. [`baseline`] freezes everything with an environment fingerprint.

// Foundation
pub mod config;
pub mod error;
pub mod persistence;
pub mod types;

// Trials
pub mod campaign;
pub mod executor;

// Data & evaluation
pub mod data;
pub mod eval;

// Results
pub mod analysis;
pub mod baseline;

// Re-exports
pub use analysis::{ResultSummary, TradeoffAnalysis, analyze_and_write, analyze_campaign};
pub use baseline::{EnvironmentFingerprint, SnapshotArtifacts, SnapshotManager};
pub use campaign::{CampaignPlan, CampaignReport, CampaignRunner};
pub use config::{CampaignConfig, ResourceLimits, load_config};
pub use data::{Dataset, DatasetView, FeatureSchema, SharedDataset, TrialRecord};
pub use error::LeakError;
pub use eval::{ClassifierKind, EvaluationOutcome, LeakageEvaluator};
pub use executor::{TrialExecutor, TrialOutcome, TrialSpec, build_executor};
pub use types::{
    CampaignKind, IntensityLevel, LabelKind, MitigationLevel, NetworkPolicy, SecretLevel,
    WorkloadType,
};
