/// Cgroup v2 backend: unified hierarchy
use std::fs;
use std::path::{Path, PathBuf};

use crate::types::{Result, SandboxError};

use super::{CgroupBackend, GroupLimits};

const CGROUP_BASE: &str = "/sys/fs/cgroup";
const GROUP_PARENT: &str = "croj";

/// v2 keeps one group directory for all controllers.
pub struct CgroupV2 {
    run_id: String,
}

impl CgroupV2 {
    pub fn new(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
        }
    }

    fn parent_path(&self) -> PathBuf {
        Path::new(CGROUP_BASE).join(GROUP_PARENT)
    }

    fn group_path(&self) -> PathBuf {
        self.parent_path().join(&self.run_id)
    }

    fn write_control(path: &Path, value: &str, what: &str) -> Result<()> {
        fs::write(path, value)
            .map_err(|e| SandboxError::Cgroup(format!("failed to set {what}: {e}")))
    }
}

impl CgroupBackend for CgroupV2 {
    fn backend_name(&self) -> &'static str {
        "cgroup_v2"
    }

    fn create(&self, limits: &GroupLimits) -> Result<()> {
        let group = self.group_path();
        fs::create_dir_all(&group)
            .map_err(|e| SandboxError::Cgroup(format!("failed to create cgroup: {e}")))?;

        // Delegate the controllers we use to the run groups. Not all hosts
        // allow this from an unprivileged parent; the limit writes below
        // surface the real failure if delegation was refused.
        let subtree = self.parent_path().join("cgroup.subtree_control");
        if let Err(e) = fs::write(&subtree, "+memory +cpu +pids") {
            log::warn!("failed to enable cgroup controllers: {e}");
        }

        if let Some(bytes) = limits.memory_bytes {
            Self::write_control(&group.join("memory.max"), &bytes.to_string(), "memory limit")?;
            let swap = group.join("memory.swap.max");
            if swap.exists() {
                if let Err(e) = fs::write(&swap, "0") {
                    log::warn!("failed to disable swap: {e}");
                }
            }
        }

        if let Some(percent) = limits.cpu_percent {
            if percent > 0 && percent <= 100 {
                let quota = u64::from(percent) * 1000;
                Self::write_control(
                    &group.join("cpu.max"),
                    &format!("{quota} 100000"),
                    "cpu limit",
                )?;
            }
        }

        if let Some(pids) = limits.pids {
            Self::write_control(&group.join("pids.max"), &pids.to_string(), "pids limit")?;
        }

        Ok(())
    }

    fn attach(&self, pid: u32) -> Result<()> {
        Self::write_control(
            &self.group_path().join("cgroup.procs"),
            &pid.to_string(),
            "process attachment",
        )
    }

    fn remove(&self) -> Result<()> {
        let group = self.group_path();
        if group.exists() {
            if let Err(e) = fs::remove_dir(&group) {
                log::warn!("failed to remove cgroup {}: {e}", group.display());
            }
        }
        Ok(())
    }
}
