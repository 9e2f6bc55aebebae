//! cgroup v2 counters of a running container.

use crate::error::LeakError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Default cgroup v2 mount point.
pub const CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// One reading of the container's cumulative counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CgroupSample {
    pub usage_usec: u64,
    pub memory_current: u64,
    pub rbytes: u64,
    pub wbytes: u64,
}

/// Whether the host exposes the unified (v2) hierarchy.
pub fn is_cgroup_v2(root: &Path) -> bool {
    root.join("cgroup.controllers").exists()
}

/// Find the unified-hierarchy entry (`0::/path`) in `/proc/<pid>/cgroup` contents.
pub fn parse_proc_cgroup(contents: &str, root: &Path) -> Option<PathBuf> {
    contents.lines().find_map(|line| {
        let mut parts = line.trim().splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some("0"), Some(_), Some(rel)) => Some(root.join(rel.trim_start_matches('/'))),
            _ => None,
        }
    })
}

/// Resolve the cgroup directory of a process.
pub fn cgroup_dir_for_pid(pid: u32, root: &Path) -> Option<PathBuf> {
    let contents = std::fs::read_to_string(format!("/proc/{pid}/cgroup")).ok()?;
    parse_proc_cgroup(&contents, root)
}

/// Whether the directory already exposes the counters we sample.
pub fn is_ready(dir: &Path) -> bool {
    dir.join("cpu.stat").exists() && dir.join("memory.current").exists()
}

/// Parse flat `key value` files such as `cpu.stat`.
pub fn parse_kv(contents: &str) -> HashMap<String, u64> {
    contents
        .lines()
        .filter_map(|line| {
            let mut it = line.split_whitespace();
            let key = it.next()?;
            let value = it.next()?.parse().ok()?;
            Some((key.to_string(), value))
        })
        .collect()
}

/// Sum `rbytes=` and `wbytes=` over every device line of `io.stat`.
pub fn parse_io_stat(contents: &str) -> (u64, u64) {
    let mut rbytes = 0u64;
    let mut wbytes = 0u64;
    for line in contents.lines() {
        for token in line.split_whitespace().skip(1) {
            if let Some(v) = token.strip_prefix("rbytes=") {
                rbytes += v.parse::<u64>().unwrap_or(0);
            } else if let Some(v) = token.strip_prefix("wbytes=") {
                wbytes += v.parse::<u64>().unwrap_or(0);
            }
        }
    }
    (rbytes, wbytes)
}

/// Read one sample. Fails with `NotFound` once the cgroup has been torn down.
pub fn sample(dir: &Path) -> Result<CgroupSample, LeakError> {
    let read = |name: &str| {
        std::fs::read_to_string(dir.join(name))
            .map_err(|_| LeakError::not_found(dir.join(name).display().to_string()))
    };
    let cpu = parse_kv(&read("cpu.stat")?);
    let memory_current = read("memory.current")?
        .trim()
        .parse()
        .map_err(|_| LeakError::invalid_input("unparseable memory.current"))?;
    // io.stat is absent when the io controller is not delegated
    let (rbytes, wbytes) = std::fs::read_to_string(dir.join("io.stat"))
        .map(|c| parse_io_stat(&c))
        .unwrap_or((0, 0));
    Ok(CgroupSample {
        usage_usec: cpu.get("usage_usec").copied().unwrap_or(0),
        memory_current,
        rbytes,
        wbytes,
    })
}
