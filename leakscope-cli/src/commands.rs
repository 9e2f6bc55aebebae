//! CLI subcommand handlers.

use crate::BaselineAction;
use crate::Commands;
use crate::ConfigAction;
use leakscope_core::analysis::{self, ResultSummary};
use leakscope_core::baseline::{EnvironmentFingerprint, SnapshotArtifacts, SnapshotManager};
use leakscope_core::campaign::CampaignRunner;
use leakscope_core::config::{self, CampaignConfig, ExecutorBackend, WORKSPACE_CONFIG_FILE};
use leakscope_core::data::io;
use leakscope_core::executor;
use std::path::Path;
use tracing::{info, warn};

/// Handle a CLI subcommand.
pub async fn handle_command(
    command: Commands,
    workspace: &Path,
    config_path: Option<&Path>,
) -> anyhow::Result<()> {
    match command {
        Commands::Config { action } => handle_config(action, workspace, config_path),
        Commands::Run {
            resume,
            simulated,
            slots,
            no_analyze,
        } => {
            let config = load(workspace, config_path)?;
            handle_run(config, resume, simulated, slots, no_analyze).await
        }
        Commands::Analyze { dataset } => {
            handle_analyze(&load(workspace, config_path)?, dataset.as_deref())
        }
        Commands::Baseline { action } => handle_baseline(action, &load(workspace, config_path)?),
    }
}

/// Resolve the layered configuration; relative output paths are anchored at
/// the workspace.
fn load(workspace: &Path, explicit: Option<&Path>) -> anyhow::Result<CampaignConfig> {
    let mut config = config::load_config(Some(workspace), explicit)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    if config.output_dir.is_relative() {
        config.output_dir = workspace.join(&config.output_dir);
    }
    if config.baseline_dir.is_relative() {
        config.baseline_dir = workspace.join(&config.baseline_dir);
    }
    Ok(config)
}

fn handle_config(action: ConfigAction, workspace: &Path, explicit: Option<&Path>) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_path = workspace.join(WORKSPACE_CONFIG_FILE);
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }
            let toml_str = toml::to_string_pretty(&CampaignConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = load(workspace, explicit)?;
            config.validate()?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn handle_run(
    mut config: CampaignConfig,
    resume: bool,
    simulated: bool,
    slots: Option<usize>,
    no_analyze: bool,
) -> anyhow::Result<()> {
    if simulated {
        config.executor.backend = ExecutorBackend::Simulated;
    }
    if let Some(slots) = slots {
        config.sandbox_slots = slots;
    }

    let executor = executor::build_executor(&config);
    let runner = CampaignRunner::new(config.clone(), executor)?;

    let token = runner.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing without starting new trials");
            token.cancel();
        }
    });

    let (dataset, report) = runner.run_to_disk(resume).await?;
    println!(
        "Campaign '{}': {} planned, {} succeeded, {} failed, {} discarded",
        report.name, report.planned, report.succeeded, report.failed, report.discarded
    );
    for cell in report.empty_cells() {
        println!(
            "  no successful trial for {}/{}/{}",
            cell.workload_type, cell.intensity_level, cell.mitigation_level
        );
    }
    if report.cancelled {
        println!("Campaign interrupted; rerun with --resume to complete it.");
        return Ok(());
    }
    if no_analyze {
        return Ok(());
    }

    let summary = analysis::analyze_and_write(&config, &dataset)?;
    print_summary(&summary, &config);
    Ok(())
}

fn handle_analyze(config: &CampaignConfig, dataset: Option<&Path>) -> anyhow::Result<()> {
    let dataset_path = dataset.map(Path::to_path_buf).unwrap_or_else(|| config.dataset_path());
    let schema_path = dataset_path
        .parent()
        .map(|p| p.join("schema.json"))
        .unwrap_or_else(|| config.schema_path());
    let schema = io::read_schema(&schema_path)?;
    let data = io::read_dataset(&dataset_path, schema)?;
    info!(path = %dataset_path.display(), records = data.len(), "Loaded dataset");

    let summary = analysis::analyze_and_write(config, &data)?;
    print_summary(&summary, config);
    Ok(())
}

fn print_summary(summary: &ResultSummary, config: &CampaignConfig) {
    println!("{}", summary.to_markdown());
    println!("Artifacts written to {}", config.results_dir().display());
}

fn handle_baseline(action: BaselineAction, config: &CampaignConfig) -> anyhow::Result<()> {
    let manager = SnapshotManager::new(&config.baseline_dir);
    match action {
        BaselineAction::Freeze { name } => {
            let fingerprint = EnvironmentFingerprint::capture(&config.executor.docker_bin);
            let artifacts = SnapshotArtifacts::from_config(config, fingerprint)?;
            let dir = manager.freeze(&name, &artifacts)?;
            println!("Baseline '{}' frozen at {}", name, dir.display());
            Ok(())
        }
        BaselineAction::Compare { name, tolerance } => {
            let current = ResultSummary::load(&config.results_dir())?;
            let comparison = manager.compare(&name, &current)?;
            println!("{}", comparison.to_markdown());
            let regressions = comparison.regressions(tolerance);
            if regressions.is_empty() {
                println!("No regressions beyond {tolerance}.");
                Ok(())
            } else {
                let levels: Vec<String> = regressions.iter().map(|d| d.level.to_string()).collect();
                anyhow::bail!(
                    "{} regression(s) against '{}': {}",
                    regressions.len(),
                    name,
                    levels.join(", ")
                )
            }
        }
        BaselineAction::Verify { name } => {
            let report = manager.verify(&name)?;
            if report.is_intact() {
                println!("Baseline '{name}' is intact.");
                return Ok(());
            }
            for path in &report.modified {
                println!("  modified:   {path}");
            }
            for path in &report.missing {
                println!("  missing:    {path}");
            }
            for path in &report.unexpected {
                println!("  unexpected: {path}");
            }
            anyhow::bail!("baseline '{}' does not match its manifest", name)
        }
        BaselineAction::List => {
            let snapshots = manager.list()?;
            if snapshots.is_empty() {
                println!("No baselines under {}", manager.root().display());
            }
            for s in snapshots {
                println!("{:<24} {}  ({} files)", s.name, s.created_at.to_rfc3339(), s.files);
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn write_small_config(workspace: &Path) {
        std::fs::write(
            workspace.join(WORKSPACE_CONFIG_FILE),
            r#"
name = "cli"
workloads = ["cpu", "disk"]
intensity_levels = ["med"]
repetitions_per_config = 6
sandbox_slots = 2

[executor]
backend = "simulated"
"#,
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_config_init_creates_file() {
        let dir = TempDir::new().unwrap();
        let command = Commands::Config {
            action: ConfigAction::Init,
        };
        handle_command(command, dir.path(), None).await.unwrap();

        let content = std::fs::read_to_string(dir.path().join(WORKSPACE_CONFIG_FILE)).unwrap();
        let parsed: CampaignConfig = toml::from_str(&content).unwrap();
        assert_eq!(parsed.repetitions_per_config, 30);
        assert_eq!(parsed.random_seed, 42);
    }

    #[tokio::test]
    async fn test_config_init_idempotent() {
        let dir = TempDir::new().unwrap();
        write_small_config(dir.path());
        let command = Commands::Config {
            action: ConfigAction::Init,
        };
        handle_command(command, dir.path(), None).await.unwrap();

        let content = std::fs::read_to_string(dir.path().join(WORKSPACE_CONFIG_FILE)).unwrap();
        assert!(content.contains("name = \"cli\""));
    }

    #[test]
    fn test_load_anchors_relative_paths() {
        let dir = TempDir::new().unwrap();
        write_small_config(dir.path());
        let config = load(dir.path(), None).unwrap();
        assert_eq!(config.output_dir, dir.path().join("leakscope-out"));
        assert_eq!(config.baseline_dir, dir.path().join("baselines"));
        assert_eq!(config.executor.backend, ExecutorBackend::Simulated);
    }

    #[tokio::test]
    async fn test_run_freeze_compare() {
        let dir = TempDir::new().unwrap();
        write_small_config(dir.path());

        let run = Commands::Run {
            resume: false,
            simulated: true,
            slots: None,
            no_analyze: false,
        };
        handle_command(run, dir.path(), None).await.unwrap();
        let results = dir.path().join("leakscope-out/results");
        assert!(results.join("summary.md").is_file());
        assert!(results.join("campaign_report.json").is_file());

        let freeze = Commands::Baseline {
            action: BaselineAction::Freeze { name: "v1".into() },
        };
        handle_command(freeze, dir.path(), None).await.unwrap();
        assert!(dir.path().join("baselines/v1/manifest.json").is_file());

        let again = Commands::Baseline {
            action: BaselineAction::Freeze { name: "v1".into() },
        };
        assert!(handle_command(again, dir.path(), None).await.is_err());

        let compare = Commands::Baseline {
            action: BaselineAction::Compare {
                name: "v1".into(),
                tolerance: 0.0,
            },
        };
        handle_command(compare, dir.path(), None).await.unwrap();

        let verify = Commands::Baseline {
            action: BaselineAction::Verify { name: "v1".into() },
        };
        handle_command(verify, dir.path(), None).await.unwrap();
    }
}
