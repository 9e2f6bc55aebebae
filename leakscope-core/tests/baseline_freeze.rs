//! Integration tests for baseline snapshots built from a real campaign run.

use leakscope_core::{CampaignRunner, LeakError};
use leakscope_core::analysis::analyze_and_write;
use leakscope_core::baseline::{EnvironmentFingerprint, SnapshotArtifacts, SnapshotManager};
use leakscope_core::config::{CampaignConfig, ExecutorBackend};
use leakscope_core::executor::build_executor;
use leakscope_core::persistence;
use leakscope_core::types::MitigationLevel;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

async fn completed_campaign(dir: &Path) -> CampaignConfig {
    let mut config = CampaignConfig::default();
    config.name = "baseline".to_string();
    config.executor.backend = ExecutorBackend::Simulated;
    config.repetitions_per_config = 6;
    config.sandbox_slots = 3;
    config.output_dir = dir.join("out");
    config.baseline_dir = dir.join("baselines");

    let runner = CampaignRunner::new(config.clone(), build_executor(&config)).unwrap();
    let (dataset, _) = runner.run_to_disk(false).await.unwrap();
    analyze_and_write(&config, &dataset).unwrap();
    config
}

fn artifacts(config: &CampaignConfig) -> SnapshotArtifacts {
    let fingerprint = EnvironmentFingerprint::capture("/nonexistent/docker");
    SnapshotArtifacts::from_config(config, fingerprint).unwrap()
}

/// Content hash of every file below `dir`, keyed by path.
fn tree_hashes(dir: &Path) -> BTreeMap<PathBuf, String> {
    let mut out = BTreeMap::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                pending.push(path);
            } else {
                let hash = persistence::hash_file(&path).unwrap();
                out.insert(path, hash);
            }
        }
    }
    out
}

#[tokio::test]
async fn second_freeze_with_same_name_fails_and_keeps_first() {
    let dir = TempDir::new().unwrap();
    let config = completed_campaign(dir.path()).await;
    let manager = SnapshotManager::new(&config.baseline_dir);

    let first = manager.freeze("v1", &artifacts(&config)).unwrap();
    let before = tree_hashes(&first);
    assert!(!before.is_empty());

    // new results that would differ if they leaked into the old snapshot
    std::fs::write(config.results_dir().join("summary.md"), "# changed\n").unwrap();

    let err = manager.freeze("v1", &artifacts(&config)).unwrap_err();
    assert!(matches!(err, LeakError::AlreadyExists(ref name) if name == "v1"));
    assert_eq!(tree_hashes(&first), before);
    assert!(manager.verify("v1").unwrap().is_intact());
}

#[tokio::test]
async fn missing_artifact_leaves_no_partial_snapshot() {
    let dir = TempDir::new().unwrap();
    let config = completed_campaign(dir.path()).await;
    std::fs::remove_file(config.schema_path()).unwrap();

    let manager = SnapshotManager::new(&config.baseline_dir);
    let err = manager.freeze("v1", &artifacts(&config)).unwrap_err();
    assert!(matches!(err, LeakError::NotFound(_)));
    assert!(!config.baseline_dir.join("v1").exists());
    assert!(manager.list().unwrap().is_empty());
}

#[tokio::test]
async fn freeze_without_result_summary_is_refused() {
    let dir = TempDir::new().unwrap();
    let mut config = CampaignConfig::default();
    config.name = "unanalyzed".to_string();
    config.executor.backend = ExecutorBackend::Simulated;
    config.repetitions_per_config = 2;
    config.output_dir = dir.path().join("out");
    config.baseline_dir = dir.path().join("baselines");
    let runner = CampaignRunner::new(config.clone(), build_executor(&config)).unwrap();
    let (dataset, _) = runner.run_to_disk(false).await.unwrap();
    assert!(config.dataset_path().is_file());

    let manager = SnapshotManager::new(&config.baseline_dir);
    let err = manager.freeze("v1", &artifacts(&config)).unwrap_err();
    assert!(matches!(err, LeakError::NotFound(ref what) if what.contains("summary.json")));
    assert!(!config.baseline_dir.join("v1").exists());

    // a summary written later makes the same campaign freezable
    analyze_and_write(&config, &dataset).unwrap();
    manager.freeze("v1", &artifacts(&config)).unwrap();
    assert!(manager.summary("v1").is_ok());
}

#[tokio::test]
async fn snapshot_holds_every_campaign_artifact() {
    let dir = TempDir::new().unwrap();
    let config = completed_campaign(dir.path()).await;
    let manager = SnapshotManager::new(&config.baseline_dir);
    let snapshot = manager.freeze("v1", &artifacts(&config)).unwrap();

    for rel in [
        "data/baseline.csv",
        "data/schema.json",
        "results/summary.md",
        "results/summary.json",
        "results/curve.csv",
        "results/campaign_report.json",
        "env/fingerprint.json",
        "env/fingerprint.txt",
        "config.toml",
        "manifest.json",
    ] {
        assert!(snapshot.join(rel).is_file(), "missing {rel}");
    }

    let manifest = manager.manifest("v1").unwrap();
    assert_eq!(manifest.name, "v1");
    for entry in &manifest.files {
        let hash = persistence::hash_file(&snapshot.join(&entry.path)).unwrap();
        assert_eq!(hash, entry.sha256, "hash of {}", entry.path);
    }
}

#[tokio::test]
async fn compare_against_own_baseline_has_no_regressions() {
    let dir = TempDir::new().unwrap();
    let config = completed_campaign(dir.path()).await;
    let manager = SnapshotManager::new(&config.baseline_dir);
    manager.freeze("v1", &artifacts(&config)).unwrap();

    let current = manager.summary("v1").unwrap();
    let comparison = manager.compare("v1", &current).unwrap();
    assert_eq!(comparison.levels.len(), 3);
    assert!(comparison.regressions(0.0).is_empty());
    let none = comparison
        .levels
        .iter()
        .find(|d| d.level == MitigationLevel::None)
        .unwrap();
    assert_eq!(none.accuracy_delta(), Some(0.0));
    assert_eq!(none.overhead_delta(), Some(0.0));
}
