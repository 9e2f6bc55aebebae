//! Environment fingerprint recorded with every baseline snapshot.

use crate::executor::docker;
use crate::persistence;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Command;
use sysinfo::System;

pub const FINGERPRINT_JSON: &str = "fingerprint.json";
pub const FINGERPRINT_TEXT: &str = "fingerprint.txt";

/// Host, runtime and tooling identity at freeze time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentFingerprint {
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub kernel_version: Option<String>,
    pub hostname: Option<String>,
    pub arch: String,
    pub cpu_brand: Option<String>,
    pub cpu_count: usize,
    pub total_memory_mib: u64,
    /// `docker version` server version, when the daemon answers.
    pub sandbox_runtime: Option<String>,
    pub isolation: String,
    pub tool_version: String,
    pub rustc_version: Option<String>,
    pub git_revision: Option<String>,
    pub captured_at: DateTime<Utc>,
}

impl EnvironmentFingerprint {
    /// Probe the current host. Probes that fail are recorded as absent.
    pub fn capture(docker_bin: &str) -> Self {
        let sys = System::new_all();
        let cpu_brand = sys
            .cpus()
            .first()
            .map(|c| c.brand().trim().to_string())
            .filter(|b| !b.is_empty());

        let isolation = if docker::host_uses_cgroup_v2() {
            "cgroup v2"
        } else {
            "cgroup v1 or unavailable"
        };

        Self {
            os_name: System::name(),
            os_version: System::os_version(),
            kernel_version: System::kernel_version(),
            hostname: System::host_name(),
            arch: std::env::consts::ARCH.to_string(),
            cpu_brand,
            cpu_count: sys.cpus().len(),
            total_memory_mib: sys.total_memory() / (1024 * 1024),
            sandbox_runtime: command_output(
                docker_bin,
                &["version", "--format", "{{.Server.Version}}"],
            ),
            isolation: isolation.to_string(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            rustc_version: command_output("rustc", &["--version"]),
            git_revision: command_output("git", &["rev-parse", "HEAD"]),
            captured_at: Utc::now(),
        }
    }

    /// Plain-text rendering for quick inspection.
    pub fn to_text(&self) -> String {
        let opt = |v: &Option<String>| v.clone().unwrap_or_else(|| "unknown".to_string());
        let mut out = String::new();
        let _ = writeln!(out, "os: {} {}", opt(&self.os_name), opt(&self.os_version));
        let _ = writeln!(out, "kernel: {}", opt(&self.kernel_version));
        let _ = writeln!(out, "hostname: {}", opt(&self.hostname));
        let _ = writeln!(out, "arch: {}", self.arch);
        let _ = writeln!(out, "cpu: {} x{}", opt(&self.cpu_brand), self.cpu_count);
        let _ = writeln!(out, "memory_mib: {}", self.total_memory_mib);
        let _ = writeln!(out, "sandbox_runtime: {}", opt(&self.sandbox_runtime));
        let _ = writeln!(out, "isolation: {}", self.isolation);
        let _ = writeln!(out, "leakscope: {}", self.tool_version);
        let _ = writeln!(out, "rustc: {}", opt(&self.rustc_version));
        let _ = writeln!(out, "git: {}", opt(&self.git_revision));
        let _ = writeln!(out, "captured_at: {}", self.captured_at.to_rfc3339());
        out
    }

    /// Write the JSON and text forms into `dir`.
    pub fn write(&self, dir: &Path) -> std::io::Result<Vec<PathBuf>> {
        let json = dir.join(FINGERPRINT_JSON);
        let text = dir.join(FINGERPRINT_TEXT);
        persistence::atomic_write_json(&json, self)?;
        persistence::atomic_write(&text, self.to_text().as_bytes())?;
        Ok(vec![json, text])
    }
}

/// Trimmed stdout of a successful command.
fn command_output(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_capture_tolerates_missing_runtime() {
        let fp = EnvironmentFingerprint::capture("/nonexistent/docker");
        assert!(fp.sandbox_runtime.is_none());
        assert_eq!(fp.tool_version, env!("CARGO_PKG_VERSION"));
        assert!(!fp.arch.is_empty());
    }

    #[test]
    fn test_write_both_forms() {
        let dir = TempDir::new().unwrap();
        let fp = EnvironmentFingerprint::capture("/nonexistent/docker");
        let paths = fp.write(dir.path()).unwrap();
        assert_eq!(paths.len(), 2);
        let text = std::fs::read_to_string(dir.path().join(FINGERPRINT_TEXT)).unwrap();
        assert!(text.contains("sandbox_runtime: unknown"));
        let back: EnvironmentFingerprint = persistence::load_json(&dir.path().join(FINGERPRINT_JSON))
            .unwrap()
            .unwrap();
        assert_eq!(back.hostname, fp.hostname);
    }

    #[test]
    fn test_command_output_missing_program() {
        assert!(command_output("/nonexistent/leakscope-tool", &[]).is_none());
    }
}
