//! Immutable, named baseline snapshots.
//!
//! Layout of a snapshot directory:
//!
//! ```text
//! <name>/
//!   data/        dataset CSV + schema.json
//!   results/     summary.md, summary.json, curve.csv, ...
//!   env/         fingerprint.json, fingerprint.txt
//!   config.toml  the exact campaign configuration
//!   manifest.json
//! ```
//!
//! A snapshot is assembled in a hidden staging directory and renamed into
//! place in one step, so a failed freeze never leaves a partial snapshot.

use crate::analysis::report::{ResultSummary, SUMMARY_JSON, SUMMARY_MARKDOWN};
use crate::baseline::fingerprint::EnvironmentFingerprint;
use crate::config::CampaignConfig;
use crate::error::LeakError;
use crate::persistence;
use crate::types::MitigationLevel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::{Component, Path, PathBuf};
use tracing::{info, warn};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const CONFIG_FILE: &str = "config.toml";

/// Everything a freeze copies into the snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotArtifacts {
    pub dataset: PathBuf,
    pub schema: PathBuf,
    /// Result files. Must include `summary.json` and `summary.md`.
    pub results: Vec<PathBuf>,
    pub fingerprint: EnvironmentFingerprint,
    pub config: CampaignConfig,
}

impl SnapshotArtifacts {
    /// Collect a campaign's artifacts from its configured output directory.
    pub fn from_config(config: &CampaignConfig, fingerprint: EnvironmentFingerprint) -> Result<Self, LeakError> {
        let results_dir = config.results_dir();
        let mut results = Vec::new();
        if results_dir.is_dir() {
            for entry in std::fs::read_dir(&results_dir)? {
                let path = entry?.path();
                if path.is_file() {
                    results.push(path);
                }
            }
        }
        results.sort();
        Ok(Self {
            dataset: config.dataset_path(),
            schema: config.schema_path(),
            results,
            fingerprint,
            config: config.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Path relative to the snapshot root, `/`-separated.
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub tool_version: String,
    pub files: Vec<ManifestEntry>,
}

/// Result of re-hashing a snapshot against its manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyReport {
    pub modified: Vec<String>,
    pub missing: Vec<String>,
    pub unexpected: Vec<String>,
}

impl VerifyReport {
    pub fn is_intact(&self) -> bool {
        self.modified.is_empty() && self.missing.is_empty() && self.unexpected.is_empty()
    }
}

/// Change of one mitigation level between a snapshot and a current run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelDelta {
    pub level: MitigationLevel,
    pub baseline_accuracy: Option<f64>,
    pub current_accuracy: Option<f64>,
    pub baseline_overhead: Option<f64>,
    pub current_overhead: Option<f64>,
}

impl LevelDelta {
    pub fn accuracy_delta(&self) -> Option<f64> {
        Some(self.current_accuracy? - self.baseline_accuracy?)
    }

    pub fn overhead_delta(&self) -> Option<f64> {
        Some(self.current_overhead? - self.baseline_overhead?)
    }
}

/// Regression report of a current summary against a frozen one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotComparison {
    pub snapshot: String,
    pub baseline_rows_used: usize,
    pub current_rows_used: usize,
    pub levels: Vec<LevelDelta>,
}

impl SnapshotComparison {
    /// Levels whose leakage or overhead grew by more than `tolerance`, or
    /// that lost an evaluation the baseline had.
    pub fn regressions(&self, tolerance: f64) -> Vec<&LevelDelta> {
        self.levels
            .iter()
            .filter(|d| {
                let lost = d.baseline_accuracy.is_some() && d.current_accuracy.is_none();
                let leak = d.accuracy_delta().is_some_and(|x| x > tolerance);
                let cost = d.overhead_delta().is_some_and(|x| x > tolerance);
                lost || leak || cost
            })
            .collect()
    }

    pub fn to_markdown(&self) -> String {
        let f = |v: Option<f64>| v.map(|x| format!("{x:+.4}")).unwrap_or_else(|| "n/a".into());
        let g = |v: Option<f64>| v.map(|x| format!("{x:.4}")).unwrap_or_else(|| "n/a".into());
        let mut md = String::new();
        let _ = writeln!(md, "# Comparison against baseline `{}`\n", self.snapshot);
        let _ = writeln!(
            md,
            "- Rows used: baseline {}, current {}\n",
            self.baseline_rows_used, self.current_rows_used
        );
        let _ = writeln!(
            md,
            "| Mitigation | Accuracy (base) | Accuracy (now) | Δ | Overhead (base) | Overhead (now) | Δ |"
        );
        let _ = writeln!(md, "|---|---|---|---|---|---|---|");
        for d in &self.levels {
            let _ = writeln!(
                md,
                "| {} | {} | {} | {} | {} | {} | {} |",
                d.level,
                g(d.baseline_accuracy),
                g(d.current_accuracy),
                f(d.accuracy_delta()),
                g(d.baseline_overhead),
                g(d.current_overhead),
                f(d.overhead_delta())
            );
        }
        md
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub files: usize,
}

/// Creates and reads baseline snapshots under one root directory.
#[derive(Debug, Clone)]
pub struct SnapshotManager {
    root: PathBuf,
}

impl SnapshotManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of snapshot `name`. Names must be one plain path component.
    pub fn snapshot_dir(&self, name: &str) -> Result<PathBuf, LeakError> {
        let mut components = Path::new(name).components();
        let valid = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        ) && !name.starts_with('.')
            && !name.contains(['/', '\\']);
        if !valid {
            return Err(LeakError::invalid_input(format!(
                "invalid snapshot name '{name}'"
            )));
        }
        Ok(self.root.join(name))
    }

    /// Freeze `artifacts` as snapshot `name`.
    ///
    /// Fails with `AlreadyExists` before touching the disk when the name is
    /// taken, and with `NotFound` when a required artifact (the dataset, its
    /// schema or either result summary) is missing. Any
    /// failure while copying removes the staging directory.
    pub fn freeze(&self, name: &str, artifacts: &SnapshotArtifacts) -> Result<PathBuf, LeakError> {
        let target = self.snapshot_dir(name)?;
        if target.exists() {
            return Err(LeakError::AlreadyExists(name.to_string()));
        }
        for required in [&artifacts.dataset, &artifacts.schema]
            .into_iter()
            .chain(artifacts.results.iter())
        {
            if !required.is_file() {
                return Err(LeakError::not_found(required.display().to_string()));
            }
        }
        for summary in [SUMMARY_JSON, SUMMARY_MARKDOWN] {
            let present = artifacts
                .results
                .iter()
                .any(|p| p.file_name().is_some_and(|n| n == summary));
            if !present {
                return Err(LeakError::not_found(format!("results/{summary}")));
            }
        }

        std::fs::create_dir_all(&self.root)?;
        let staging = self
            .root
            .join(format!(".{name}.staging-{}", uuid::Uuid::new_v4().simple()));
        std::fs::create_dir(&staging)?;

        let staged = populate(&staging, name, artifacts).and_then(|()| {
            std::fs::rename(&staging, &target).map_err(|e| {
                if target.exists() {
                    LeakError::AlreadyExists(name.to_string())
                } else {
                    LeakError::Io(e)
                }
            })
        });
        if let Err(e) = staged {
            if let Err(cleanup) = std::fs::remove_dir_all(&staging) {
                warn!(path = %staging.display(), error = %cleanup, "Failed to remove staging directory");
            }
            return Err(e);
        }

        info!(snapshot = name, path = %target.display(), "Baseline frozen");
        Ok(target)
    }

    pub fn manifest(&self, name: &str) -> Result<SnapshotManifest, LeakError> {
        let path = self.snapshot_dir(name)?.join(MANIFEST_FILE);
        persistence::load_json(&path)?.ok_or_else(|| LeakError::not_found(path.display().to_string()))
    }

    /// Re-hash every file and compare with the manifest.
    pub fn verify(&self, name: &str) -> Result<VerifyReport, LeakError> {
        let dir = self.snapshot_dir(name)?;
        let manifest = self.manifest(name)?;
        let mut report = VerifyReport::default();

        let listed: BTreeSet<&str> = manifest.files.iter().map(|e| e.path.as_str()).collect();
        for entry in &manifest.files {
            let path = dir.join(&entry.path);
            if !path.is_file() {
                report.missing.push(entry.path.clone());
            } else if persistence::hash_file(&path)? != entry.sha256 {
                report.modified.push(entry.path.clone());
            }
        }
        for rel in relative_files(&dir)? {
            if rel != MANIFEST_FILE && !listed.contains(rel.as_str()) {
                report.unexpected.push(rel);
            }
        }
        Ok(report)
    }

    /// The result summary frozen in snapshot `name`.
    pub fn summary(&self, name: &str) -> Result<ResultSummary, LeakError> {
        ResultSummary::load(&self.snapshot_dir(name)?.join("results"))
    }

    /// Diff a current summary against the frozen one.
    pub fn compare(&self, name: &str, current: &ResultSummary) -> Result<SnapshotComparison, LeakError> {
        let baseline = self.summary(name)?;
        let levels: BTreeSet<MitigationLevel> = baseline
            .curve
            .points
            .iter()
            .chain(&current.curve.points)
            .map(|p| p.level)
            .collect();

        let levels = levels
            .into_iter()
            .map(|level| {
                let base = baseline.curve.point(level);
                let now = current.curve.point(level);
                LevelDelta {
                    level,
                    baseline_accuracy: base.and_then(|p| p.accuracy),
                    current_accuracy: now.and_then(|p| p.accuracy),
                    baseline_overhead: base.and_then(|p| p.overhead),
                    current_overhead: now.and_then(|p| p.overhead),
                }
            })
            .collect();

        Ok(SnapshotComparison {
            snapshot: name.to_string(),
            baseline_rows_used: baseline.rows_used,
            current_rows_used: current.rows_used,
            levels,
        })
    }

    /// Existing snapshots, sorted by name.
    pub fn list(&self) -> Result<Vec<SnapshotInfo>, LeakError> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || !entry.path().is_dir() {
                continue;
            }
            match self.manifest(&name) {
                Ok(m) => out.push(SnapshotInfo {
                    name,
                    created_at: m.created_at,
                    files: m.files.len(),
                }),
                Err(e) => warn!(snapshot = %name, error = %e, "Skipping directory without manifest"),
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }
}

fn copy_into(src: &Path, dir: &Path, file_name: Option<&str>) -> Result<(), LeakError> {
    std::fs::create_dir_all(dir)?;
    let name = match file_name {
        Some(n) => n.to_string(),
        None => src
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| LeakError::invalid_input(format!("no file name in {}", src.display())))?,
    };
    std::fs::copy(src, dir.join(name))?;
    Ok(())
}

fn populate(staging: &Path, name: &str, artifacts: &SnapshotArtifacts) -> Result<(), LeakError> {
    let data = staging.join("data");
    copy_into(&artifacts.dataset, &data, None)?;
    copy_into(&artifacts.schema, &data, Some("schema.json"))?;

    let results = staging.join("results");
    std::fs::create_dir_all(&results)?;
    for file in &artifacts.results {
        copy_into(file, &results, None)?;
    }

    let env = staging.join("env");
    std::fs::create_dir_all(&env)?;
    artifacts.fingerprint.write(&env)?;

    let config = toml::to_string_pretty(&artifacts.config)
        .map_err(|e| LeakError::config(format!("cannot serialize configuration: {e}")))?;
    persistence::atomic_write(&staging.join(CONFIG_FILE), config.as_bytes())?;

    let mut files = Vec::new();
    for rel in relative_files(staging)? {
        let path = staging.join(&rel);
        files.push(ManifestEntry {
            sha256: persistence::hash_file(&path)?,
            bytes: std::fs::metadata(&path)?.len(),
            path: rel,
        });
    }
    let manifest = SnapshotManifest {
        name: name.to_string(),
        created_at: Utc::now(),
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
        files,
    };
    persistence::atomic_write_json(&staging.join(MANIFEST_FILE), &manifest)?;

    for rel in relative_files(staging)? {
        let path = staging.join(rel);
        let mut perms = std::fs::metadata(&path)?.permissions();
        perms.set_readonly(true);
        std::fs::set_permissions(&path, perms)?;
    }
    Ok(())
}

/// Every file below `dir`, relative and `/`-separated, sorted.
fn relative_files(dir: &Path) -> Result<Vec<String>, LeakError> {
    fn walk(base: &Path, dir: &Path, out: &mut Vec<String>) -> std::io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                walk(base, &path, out)?;
            } else if let Ok(rel) = path.strip_prefix(base) {
                let parts: Vec<String> = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().to_string())
                    .collect();
                out.push(parts.join("/"));
            }
        }
        Ok(())
    }
    let mut out = Vec::new();
    walk(dir, dir, &mut out)?;
    out.sort();
    Ok(out)
}
