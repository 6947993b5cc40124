/// Cgroup v1 backend: per-controller hierarchies
use std::fs;
use std::path::{Path, PathBuf};

use crate::types::{Result, SandboxError};

use super::{CgroupBackend, GroupLimits};

const CGROUP_BASE: &str = "/sys/fs/cgroup";
const GROUP_PARENT: &str = "croj";
const CONTROLLERS: [&str; 3] = ["memory", "cpu", "pids"];

/// v1 keeps one group directory per controller.
pub struct CgroupV1 {
    run_id: String,
}

impl CgroupV1 {
    pub fn new(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
        }
    }

    fn controller_path(&self, controller: &str) -> PathBuf {
        Path::new(CGROUP_BASE)
            .join(controller)
            .join(GROUP_PARENT)
            .join(&self.run_id)
    }

    fn write_control(path: &Path, value: &str, what: &str) -> Result<()> {
        fs::write(path, value)
            .map_err(|e| SandboxError::Cgroup(format!("failed to set {what}: {e}")))
    }
}

impl CgroupBackend for CgroupV1 {
    fn backend_name(&self) -> &'static str {
        "cgroup_v1"
    }

    fn create(&self, limits: &GroupLimits) -> Result<()> {
        for controller in CONTROLLERS {
            let path = self.controller_path(controller);
            fs::create_dir_all(&path).map_err(|e| {
                SandboxError::Cgroup(format!("failed to create {controller} group: {e}"))
            })?;
        }

        if let Some(bytes) = limits.memory_bytes {
            let mem = self.controller_path("memory");
            Self::write_control(
                &mem.join("memory.limit_in_bytes"),
                &bytes.to_string(),
                "memory limit",
            )?;
            // Swap would let the tree dodge the limit.
            let swappiness = mem.join("memory.swappiness");
            if swappiness.exists() {
                if let Err(e) = fs::write(&swappiness, "0") {
                    log::warn!("failed to disable swappiness: {e}");
                }
            }
        }

        if let Some(percent) = limits.cpu_percent {
            if percent > 0 && percent <= 100 {
                let cpu = self.controller_path("cpu");
                let quota = u64::from(percent) * 1000;
                Self::write_control(
                    &cpu.join("cpu.cfs_quota_us"),
                    &quota.to_string(),
                    "cpu quota",
                )?;
                Self::write_control(&cpu.join("cpu.cfs_period_us"), "100000", "cpu period")?;
            }
        }

        if let Some(pids) = limits.pids {
            Self::write_control(
                &self.controller_path("pids").join("pids.max"),
                &pids.to_string(),
                "pids limit",
            )?;
        }

        Ok(())
    }

    fn attach(&self, pid: u32) -> Result<()> {
        let pid_str = pid.to_string();
        for controller in CONTROLLERS {
            let tasks = self.controller_path(controller).join("tasks");
            Self::write_control(&tasks, &pid_str, "task attachment")?;
        }
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        for controller in CONTROLLERS {
            let path = self.controller_path(controller);
            if path.exists() {
                if let Err(e) = fs::remove_dir(&path) {
                    log::warn!("failed to remove {controller} group {}: {e}", path.display());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_paths_are_namespaced() {
        let cg = CgroupV1::new("run-123");
        assert_eq!(
            cg.controller_path("memory"),
            PathBuf::from("/sys/fs/cgroup/memory/croj/run-123")
        );
        assert_eq!(
            cg.controller_path("pids"),
            PathBuf::from("/sys/fs/cgroup/pids/croj/run-123")
        );
    }

    #[test]
    fn test_remove_without_create_is_harmless() {
        let cg = CgroupV1::new("never-created-run");
        assert!(cg.remove().is_ok());
    }
}
