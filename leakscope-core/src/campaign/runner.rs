//! Campaign runner: drives every scheduled trial through the executor.
//!
//! Trials run on a bounded pool of sandbox slots. Every finished trial,
//! failed or not, is sent over a channel to a single writer task that owns
//! all appends to the dataset and its CSV file.

use crate::campaign::plan::{CampaignPlan, PlannedTrial};
use crate::config::CampaignConfig;
use crate::data::io::{self, CsvSink};
use crate::data::record::{CellKey, TIMEOUT_EXIT_CODE, TrialRecord, UNKNOWN_EXIT_CODE};
use crate::data::schema::FeatureSchema;
use crate::data::store::{Dataset, SharedDataset};
use crate::error::LeakError;
use crate::executor::{TrialExecutor, TrialOutcome, TrialSpec};
use crate::persistence;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Slack granted on top of the trial budget before the runner gives up on
/// an executor that failed to enforce its own timeout.
const EXECUTOR_GRACE: Duration = Duration::from_secs(10);

/// Attempt counts for one configuration cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellTally {
    pub cell: CellKey,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Outcome of a campaign run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignReport {
    pub campaign_id: String,
    pub name: String,
    pub planned: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// In-flight trials dropped because the campaign was cancelled.
    pub discarded: usize,
    pub cancelled: bool,
    /// First failure to mirror a record to the dataset file. The campaign
    /// stops at that point.
    #[serde(default)]
    pub persist_error: Option<String>,
    pub cells: Vec<CellTally>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl CampaignReport {
    /// Cells that were attempted but produced no successful trial.
    pub fn empty_cells(&self) -> Vec<CellKey> {
        self.cells
            .iter()
            .filter(|t| t.attempted > 0 && t.succeeded == 0)
            .map(|t| t.cell)
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.persist_error.is_none() && self.attempted == self.planned
    }
}

/// What happened to one scheduled trial.
#[derive(Debug, Clone, Copy)]
enum TrialStatus {
    Recorded { cell: CellKey, succeeded: bool },
    Discarded,
}

pub struct CampaignRunner {
    config: CampaignConfig,
    schema: FeatureSchema,
    executor: Arc<dyn TrialExecutor>,
    cancellation: CancellationToken,
}

impl CampaignRunner {
    pub fn new(config: CampaignConfig, executor: Arc<dyn TrialExecutor>) -> Result<Self, LeakError> {
        config.validate()?;
        let schema = FeatureSchema::new(config.features.clone())?;
        Ok(Self {
            config,
            schema,
            executor,
            cancellation: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &CampaignConfig {
        &self.config
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Token that stops the campaign between trials when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Run the full schedule, appending every trial to `store` (and `sink`).
    pub async fn run(
        &self,
        store: &SharedDataset,
        sink: Option<CsvSink>,
    ) -> Result<CampaignReport, LeakError> {
        let plan = CampaignPlan::from_config(&self.config)?;
        self.run_plan(plan, store, sink).await
    }

    /// Run the campaign against its output directory.
    ///
    /// Writes `schema.json`, streams the dataset CSV and finally stores the
    /// report next to the results. With `resume`, an existing dataset is
    /// loaded and trials that already succeeded are not repeated.
    pub async fn run_to_disk(&self, resume: bool) -> Result<(Dataset, CampaignReport), LeakError> {
        let dataset_path = self.config.dataset_path();
        let schema_path = self.config.schema_path();

        let (dataset, sink) = if resume && dataset_path.exists() {
            let existing = io::read_dataset(&dataset_path, self.schema.clone())?;
            let sink = CsvSink::append_to(&dataset_path, self.schema.clone())?;
            info!(
                path = %dataset_path.display(),
                records = existing.len(),
                "Resuming campaign"
            );
            (existing, sink)
        } else {
            (
                Dataset::new(self.schema.clone()),
                CsvSink::create(&dataset_path, self.schema.clone())?,
            )
        };
        io::write_schema(&self.schema, &schema_path)?;

        let done: HashSet<(CellKey, usize)> = dataset
            .successful_only()
            .iter()
            .map(|r| (r.cell(), r.repetition))
            .collect();
        let plan = CampaignPlan::from_config(&self.config)?.skip_completed(&done);

        let store = SharedDataset::new(dataset);
        let report = self.run_plan(plan, &store, Some(sink)).await?;

        std::fs::create_dir_all(self.config.results_dir())?;
        persistence::atomic_write_json(
            &self.config.results_dir().join("campaign_report.json"),
            &report,
        )?;
        if let Some(reason) = &report.persist_error {
            return Err(LeakError::Io(std::io::Error::other(format!(
                "dataset {} is incomplete: {reason}",
                dataset_path.display()
            ))));
        }
        Ok((store.snapshot(), report))
    }

    async fn run_plan(
        &self,
        plan: CampaignPlan,
        store: &SharedDataset,
        sink: Option<CsvSink>,
    ) -> Result<CampaignReport, LeakError> {
        store.read().schema().check_names(&self.schema.names())?;

        let campaign_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let clock = Instant::now();
        let planned = plan.len();
        info!(
            campaign = %self.config.name,
            kind = %self.config.kind,
            trials = planned,
            cells = plan.cells().len(),
            slots = self.config.sandbox_slots,
            executor = self.executor.name(),
            "Starting campaign"
        );

        let (tx, rx) = mpsc::channel::<TrialRecord>(64);
        let writer = tokio::spawn(write_records(
            rx,
            store.clone(),
            sink,
            planned,
            self.cancellation.clone(),
        ));

        let semaphore = Arc::new(Semaphore::new(self.config.sandbox_slots));
        let mut handles = Vec::with_capacity(planned);
        for trial in plan.trials() {
            let permit = tokio::select! {
                biased;
                _ = self.cancellation.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => {
                    permit.map_err(|_| LeakError::Cancelled)?
                }
            };

            let spec = self.trial_spec(trial);
            let executor = self.executor.clone();
            let schema = self.schema.clone();
            let cancel = self.cancellation.clone();
            let tx = tx.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                run_trial(spec, executor, schema, cancel, tx).await
            }));
        }
        drop(tx);

        let mut tallies: BTreeMap<CellKey, CellTally> = plan
            .cells()
            .iter()
            .map(|cell| {
                (
                    *cell,
                    CellTally {
                        cell: *cell,
                        attempted: 0,
                        succeeded: 0,
                        failed: 0,
                    },
                )
            })
            .collect();
        let mut discarded = 0;
        for handle in handles {
            match handle.await {
                Ok(TrialStatus::Recorded { cell, succeeded }) => {
                    if let Some(tally) = tallies.get_mut(&cell) {
                        tally.attempted += 1;
                        if succeeded {
                            tally.succeeded += 1;
                        } else {
                            tally.failed += 1;
                        }
                    }
                }
                Ok(TrialStatus::Discarded) => discarded += 1,
                Err(e) => {
                    warn!(error = %e, "Trial task panicked");
                    discarded += 1;
                }
            }
        }

        let persist_error = match writer.await {
            Ok(failure) => failure,
            Err(e) => {
                warn!(error = %e, "Dataset writer task failed");
                Some(e.to_string())
            }
        };

        let cells: Vec<CellTally> = tallies.into_values().collect();
        let report = CampaignReport {
            campaign_id,
            name: self.config.name.clone(),
            planned,
            attempted: cells.iter().map(|t| t.attempted).sum(),
            succeeded: cells.iter().map(|t| t.succeeded).sum(),
            failed: cells.iter().map(|t| t.failed).sum(),
            discarded,
            cancelled: self.cancellation.is_cancelled(),
            persist_error,
            cells,
            started_at,
            finished_at: Utc::now(),
        };

        for cell in report.empty_cells() {
            warn!(cell = %cell, "No successful trial in cell");
        }
        info!(
            campaign = %report.name,
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            discarded = report.discarded,
            cancelled = report.cancelled,
            elapsed_ms = clock.elapsed().as_millis() as u64,
            "Campaign finished"
        );
        Ok(report)
    }

    fn trial_spec(&self, trial: &PlannedTrial) -> TrialSpec {
        TrialSpec {
            run_id: uuid::Uuid::new_v4().simple().to_string(),
            index: trial.index,
            campaign_kind: self.config.kind,
            cell: trial.cell,
            repetition: trial.repetition,
            resource_limits: self.config.resource_limits.clone(),
            timeout: Duration::from_secs(self.config.trial_timeout_secs),
        }
    }
}

async fn run_trial(
    spec: TrialSpec,
    executor: Arc<dyn TrialExecutor>,
    schema: FeatureSchema,
    cancel: CancellationToken,
    tx: mpsc::Sender<TrialRecord>,
) -> TrialStatus {
    if cancel.is_cancelled() {
        return TrialStatus::Discarded;
    }
    let budget = spec.timeout + EXECUTOR_GRACE;
    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!(cell = %spec.cell, rep = spec.repetition, "Discarding in-flight trial");
            return TrialStatus::Discarded;
        }
        result = tokio::time::timeout(budget, executor.execute(&spec)) => match result {
            Ok(outcome) => outcome,
            Err(_) => TrialOutcome::failed(
                TIMEOUT_EXIT_CODE,
                format!("executor did not return within {}s", budget.as_secs()),
            ),
        },
    };

    let (features, exit_code) = match outcome {
        TrialOutcome::Completed(telemetry) => match telemetry.to_features(&schema) {
            Ok(features) => (Some(features), 0),
            Err(e) => {
                warn!(cell = %spec.cell, rep = spec.repetition, error = %e, "Unusable telemetry");
                (None, UNKNOWN_EXIT_CODE)
            }
        },
        TrialOutcome::Failed { exit_code, reason } => {
            warn!(
                workload = %spec.cell.workload_type,
                intensity = %spec.cell.intensity_level,
                mitigation = %spec.cell.mitigation_level,
                rep = spec.repetition,
                exit_code,
                reason = %reason,
                "Trial failed"
            );
            // a failure never counts as usable, whatever the runtime reported
            let exit_code = if exit_code == 0 { UNKNOWN_EXIT_CODE } else { exit_code };
            (None, exit_code)
        }
    };

    let record = TrialRecord {
        run_id: spec.run_id.clone(),
        campaign_kind: spec.campaign_kind,
        workload_type: spec.cell.workload_type,
        intensity_level: spec.cell.intensity_level,
        mitigation_level: spec.cell.mitigation_level,
        secret_level: spec.cell.secret_level,
        repetition: spec.repetition,
        resource_limits: spec.resource_limits.clone(),
        features,
        exit_code,
    };
    let succeeded = record.succeeded();
    if tx.send(record).await.is_err() {
        warn!(cell = %spec.cell, "Dataset writer is gone; trial not recorded");
        return TrialStatus::Discarded;
    }
    TrialStatus::Recorded {
        cell: spec.cell,
        succeeded,
    }
}

/// The single writer: appends to the store first, then mirrors to disk.
///
/// A row that cannot be persisted cancels the campaign; its error is
/// returned. Records still in flight are kept in memory only.
async fn write_records(
    mut rx: mpsc::Receiver<TrialRecord>,
    store: SharedDataset,
    mut sink: Option<CsvSink>,
    planned: usize,
    cancellation: CancellationToken,
) -> Option<String> {
    let step = (planned / 10).max(1);
    let mut written = 0usize;
    let mut failure = None;
    while let Some(record) = rx.recv().await {
        if let Err(e) = store.append(record.clone()) {
            warn!(run_id = %record.run_id, error = %e, "Rejected trial record");
            continue;
        }
        if let Some(active) = sink.as_mut() {
            if let Err(e) = active.write(&record) {
                error!(path = %active.path().display(), error = %e, "Failed to persist trial row; stopping campaign");
                failure = Some(e.to_string());
                sink = None;
                cancellation.cancel();
            }
        }
        written += 1;
        if written % step == 0 {
            info!(written, planned, "Campaign progress");
        }
    }
    failure
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::SimulatedExecutor;
    use crate::types::{IntensityLevel, MitigationLevel, WorkloadType};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn small_config() -> CampaignConfig {
        CampaignConfig {
            workloads: vec![WorkloadType::Cpu, WorkloadType::Mem],
            intensity_levels: vec![IntensityLevel::Low],
            mitigation_levels: vec![MitigationLevel::None, MitigationLevel::High],
            repetitions_per_config: 3,
            sandbox_slots: 2,
            ..CampaignConfig::default()
        }
    }

    fn new_store(config: &CampaignConfig) -> SharedDataset {
        SharedDataset::new(Dataset::new(
            FeatureSchema::new(config.features.clone()).unwrap(),
        ))
    }

    /// Fails every trial of one workload type.
    struct FailingFor(WorkloadType);

    #[async_trait]
    impl TrialExecutor for FailingFor {
        fn name(&self) -> &str {
            "failing"
        }

        async fn execute(&self, spec: &TrialSpec) -> TrialOutcome {
            if spec.cell.workload_type == self.0 {
                TrialOutcome::failed(137, "killed")
            } else {
                SimulatedExecutor::new(0, 0.0).execute(spec).await
            }
        }
    }

    /// Counts concurrent executions.
    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl TrialExecutor for Gauge {
        fn name(&self) -> &str {
            "gauge"
        }

        async fn execute(&self, spec: &TrialSpec) -> TrialOutcome {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            SimulatedExecutor::new(0, 0.0).execute(spec).await
        }
    }

    #[tokio::test]
    async fn test_every_trial_is_recorded() {
        let config = small_config();
        let store = new_store(&config);
        let runner =
            CampaignRunner::new(config, Arc::new(SimulatedExecutor::new(1, 0.0))).unwrap();
        let report = runner.run(&store, None).await.unwrap();

        assert_eq!(report.planned, 12);
        assert_eq!(report.attempted, 12);
        assert_eq!(report.succeeded, 12);
        assert!(report.is_complete());
        assert_eq!(store.len(), 12);
        assert!(report.empty_cells().is_empty());
    }

    #[tokio::test]
    async fn test_failures_do_not_abort_campaign() {
        let config = small_config();
        let store = new_store(&config);
        let runner = CampaignRunner::new(config, Arc::new(FailingFor(WorkloadType::Mem))).unwrap();
        let report = runner.run(&store, None).await.unwrap();

        assert_eq!(report.attempted, 12);
        assert_eq!(report.failed, 6);
        assert_eq!(store.len(), 12);
        assert_eq!(store.read().successful_only().len(), 6);
        let empty = report.empty_cells();
        assert_eq!(empty.len(), 2);
        assert!(empty.iter().all(|c| c.workload_type == WorkloadType::Mem));
    }

    #[tokio::test]
    async fn test_slots_bound_concurrency() {
        let config = small_config();
        let store = new_store(&config);
        let gauge = Arc::new(Gauge {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let runner = CampaignRunner::new(config, gauge.clone()).unwrap();
        runner.run(&store, None).await.unwrap();
        assert!(gauge.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_cancelled_campaign_keeps_valid_records() {
        let config = small_config();
        let store = new_store(&config);
        let runner =
            CampaignRunner::new(config, Arc::new(SimulatedExecutor::new(1, 0.0))).unwrap();
        runner.cancellation_token().cancel();
        let report = runner.run(&store, None).await.unwrap();

        assert!(report.cancelled);
        assert!(!report.is_complete());
        assert_eq!(report.attempted, store.len());
        assert!(store.read().records().iter().all(|r| r.validate().is_ok()));
    }

    #[tokio::test]
    async fn test_in_flight_trial_is_discarded_on_cancel() {
        let config = CampaignConfig {
            repetitions_per_config: 1,
            sandbox_slots: 4,
            ..small_config()
        };
        let store = new_store(&config);
        let slow = SimulatedExecutor::new(1, 0.0).with_latency(Duration::from_secs(30));
        let runner = CampaignRunner::new(config, Arc::new(slow)).unwrap();
        let token = runner.cancellation_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });
        let report = runner.run(&store, None).await.unwrap();

        assert!(report.cancelled);
        assert_eq!(report.attempted, 0);
        assert!(report.discarded > 0);
        assert!(store.is_empty());
    }

    /// A file that refuses every write.
    struct FullDisk;

    impl std::io::Write for FullDisk {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("no space left on device"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_unwritable_dataset_file_stops_campaign() {
        let config = CampaignConfig {
            sandbox_slots: 1,
            ..small_config()
        };
        let store = new_store(&config);
        let sink = CsvSink::from_writer(
            Path::new("full.csv"),
            Box::new(FullDisk),
            store.read().schema().clone(),
        );
        let slow = SimulatedExecutor::new(1, 0.0).with_latency(Duration::from_millis(20));
        let runner = CampaignRunner::new(config, Arc::new(slow)).unwrap();
        let report = runner.run(&store, Some(sink)).await.unwrap();

        assert!(report.persist_error.as_deref().unwrap().contains("no space left"));
        assert!(report.cancelled);
        assert!(!report.is_complete());
        assert!(report.attempted < report.planned);
    }

    #[tokio::test]
    async fn test_run_to_disk_streams_csv_and_resumes() {
        let dir = TempDir::new().unwrap();
        let config = CampaignConfig {
            output_dir: dir.path().to_path_buf(),
            ..small_config()
        };
        let runner =
            CampaignRunner::new(config.clone(), Arc::new(SimulatedExecutor::new(1, 0.0))).unwrap();
        let (dataset, report) = runner.run_to_disk(false).await.unwrap();
        assert_eq!(dataset.len(), 12);
        assert!(config.schema_path().exists());
        assert!(config.results_dir().join("campaign_report.json").exists());

        let loaded = io::read_dataset(&config.dataset_path(), runner.schema().clone()).unwrap();
        assert_eq!(loaded.len(), 12);
        assert_eq!(report.succeeded, 12);

        // nothing is left to do on resume
        let (resumed, second) = runner.run_to_disk(true).await.unwrap();
        assert_eq!(second.planned, 0);
        assert_eq!(resumed.len(), 12);
    }
}
