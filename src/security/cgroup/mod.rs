//! Resource control groups for a single run: v1/v2 dual support behind one
//! backend contract. Groups live under `croj/<run-id>` inside the host
//! hierarchy and are removed when the runner's cleanup fires.

pub mod v1;
pub mod v2;

use std::path::Path;

use crate::types::Result;

/// Limits written into a run's control group.
#[derive(Clone, Copy, Debug, Default)]
pub struct GroupLimits {
    /// Memory ceiling in bytes; `None` leaves the controller untouched.
    pub memory_bytes: Option<u64>,
    /// CPU bandwidth as a percentage of one core (quota = percent * 1000 µs
    /// per 100 000 µs period).
    pub cpu_percent: Option<u32>,
    /// Maximum process/thread count.
    pub pids: Option<u32>,
}

/// One run's control group. Created before the child spawns, attached by
/// pid right after, removed on cleanup.
pub trait CgroupBackend: Send {
    fn backend_name(&self) -> &'static str;
    fn create(&self, limits: &GroupLimits) -> Result<()>;
    fn attach(&self, pid: u32) -> Result<()>;
    fn remove(&self) -> Result<()>;
}

/// Detected cgroup flavor of the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CgroupVersion {
    V1,
    V2,
}

/// Probe the host hierarchy. The unified-hierarchy marker file decides v2;
/// per-controller directories decide v1.
pub fn detect_version() -> Option<CgroupVersion> {
    if Path::new("/sys/fs/cgroup/cgroup.controllers").exists() {
        return Some(CgroupVersion::V2);
    }
    if Path::new("/sys/fs/cgroup/memory").exists() {
        return Some(CgroupVersion::V1);
    }
    None
}

/// Build the backend matching the detected hierarchy, or `None` when the
/// host has no usable cgroup mount.
pub fn create_backend(run_id: &str) -> Option<Box<dyn CgroupBackend>> {
    match detect_version() {
        Some(CgroupVersion::V2) => {
            log::debug!("using cgroup v2 backend for run {run_id}");
            Some(Box::new(v2::CgroupV2::new(run_id)))
        }
        Some(CgroupVersion::V1) => {
            log::debug!("using cgroup v1 backend for run {run_id}");
            Some(Box::new(v1::CgroupV1::new(run_id)))
        }
        None => {
            log::warn!("no cgroup hierarchy detected, resource groups disabled");
            None
        }
    }
}
