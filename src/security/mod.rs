//! Kernel-level isolation for the sandboxed child: resource control groups
//! plus an in-kernel syscall filter, applied once per run.
//!
//! The cgroup half runs in the parent (group created and limited before
//! spawn, child pid attached right after). The seccomp half runs in the
//! child between fork and exec. Cgroups degrade with a warning when the
//! host has no usable hierarchy; the syscall filter is explicit opt-in and
//! enforcement failures become hard errors only in enforcing mode.

pub mod cgroup;
pub mod seccomp;

use serde::{Deserialize, Serialize};

use crate::config::SecuritySettings;
use crate::types::{Result, SandboxError};

use self::cgroup::{CgroupBackend, GroupLimits};

/// Syscall policy mode for a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeccompMode {
    /// Violations kill the offending thread.
    Strict,
    /// Violations fail with EPERM.
    Filtered,
    /// No filter installed.
    Disabled,
}

/// Security posture of a single run, constructed from the language tag and
/// applied exactly once, after fork and before the user program execs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SecurityProfile {
    pub seccomp_mode: SeccompMode,
    pub allowed_syscalls: Vec<String>,
    pub disable_network: bool,
    pub disable_exec: bool,
    pub enable_cgroups: bool,
    /// Memory ceiling for the control group, in bytes.
    pub memory_limit_bytes: Option<u64>,
    /// CPU bandwidth cap as a percentage of one core.
    pub cpu_percent: Option<u32>,
    /// Maximum process/thread count for the run.
    pub pids_limit: u32,
    pub readonly_paths: Vec<String>,
    pub writable_paths: Vec<String>,
    pub hidden_paths: Vec<String>,
    pub no_new_privileges: bool,
}

impl Default for SecurityProfile {
    fn default() -> Self {
        Self {
            seccomp_mode: SeccompMode::Filtered,
            allowed_syscalls: default_allowed_syscalls(),
            disable_network: true,
            disable_exec: false,
            enable_cgroups: true,
            memory_limit_bytes: None,
            cpu_percent: None,
            pids_limit: 64,
            readonly_paths: vec![
                "/usr".to_string(),
                "/lib".to_string(),
                "/lib64".to_string(),
                "/bin".to_string(),
                "/sbin".to_string(),
                "/etc/ssl".to_string(),
                "/etc/passwd".to_string(),
                "/etc/group".to_string(),
                "/etc/resolv.conf".to_string(),
            ],
            writable_paths: vec!["/tmp".to_string()],
            hidden_paths: vec![
                "/etc/shadow".to_string(),
                "/root".to_string(),
                "/home".to_string(),
                "/proc/kcore".to_string(),
                "/proc/keys".to_string(),
            ],
            no_new_privileges: true,
        }
    }
}

impl SecurityProfile {
    /// Profile tuned for a language's runtime shape. Interpreters and VMs
    /// fork workers and map more libraries; static binaries tolerate the
    /// strict policy.
    pub fn for_language(language: &str) -> Self {
        let mut profile = Self::default();
        match language {
            "python" => {
                profile.pids_limit = 128;
                profile
                    .readonly_paths
                    .push("/usr/lib/python3".to_string());
                profile
                    .readonly_paths
                    .push("/usr/local/lib/python3".to_string());
            }
            "java" => {
                profile.pids_limit = 256;
                profile.readonly_paths.push("/usr/lib/jvm".to_string());
                profile.readonly_paths.push("/etc/java".to_string());
            }
            "go" => {
                profile.seccomp_mode = SeccompMode::Strict;
            }
            _ => {}
        }
        profile
    }

    pub fn filter_requested(&self) -> bool {
        self.seccomp_mode != SeccompMode::Disabled
    }
}

/// The syscall allow-list applied when a profile does not bring its own.
pub fn default_allowed_syscalls() -> Vec<String> {
    [
        // Regular I/O.
        "read", "write", "close", "fstat", "lseek", "mmap", "mprotect", "munmap", "brk",
        "readv", "writev", "pread64", "pwrite64", "lstat", "readlink",
        // File operations.
        "access", "open", "openat", "stat", "getcwd", "fcntl", "fstatfs", "getdents",
        "getdents64", "readdir", "rename", "unlink", "rmdir", "mkdir", "link", "chmod",
        "truncate", "fallocate", "utime", "chdir", "dup", "dup2", "pipe",
        // Process management.
        "clone", "fork", "vfork", "wait4", "kill", "exit", "exit_group", "rt_sigreturn",
        "rt_sigaction", "rt_sigprocmask", "rt_sigqueueinfo", "setitimer", "getitimer",
        "nanosleep", "clock_gettime", "sched_yield",
        // Memory management.
        "mremap", "msync", "mincore", "madvise", "shmget", "shmat", "shmdt", "shmctl",
        // Resource queries.
        "getrusage", "getrlimit", "getpriority", "getuid", "geteuid", "getgid", "getegid",
        "gettid", "getpid", "getppid", "gettimeofday", "uname", "getrandom",
        // Sockets, gated by the AF_UNIX conditional when networking is off.
        "socket", "socketpair", "bind", "listen", "accept", "accept4", "connect",
        // Event loops and timers.
        "futex", "epoll_create", "epoll_create1", "epoll_ctl", "epoll_wait", "epoll_pwait",
        "select", "poll", "timerfd_create", "timerfd_settime", "timerfd_gettime",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Per-run security state: owns the control group from creation to removal.
pub struct SecurityManager {
    profile: SecurityProfile,
    settings: SecuritySettings,
    backend: Option<Box<dyn CgroupBackend>>,
    run_id: String,
}

impl SecurityManager {
    pub fn new(profile: SecurityProfile, settings: SecuritySettings, run_id: &str) -> Self {
        Self {
            profile,
            settings,
            backend: None,
            run_id: run_id.to_string(),
        }
    }

    pub fn profile(&self) -> &SecurityProfile {
        &self.profile
    }

    /// Whether the child should install the syscall filter before exec.
    pub fn filter_enabled(&self) -> bool {
        self.settings.enable_syscall_filter && self.profile.filter_requested()
    }

    /// Create the run's control group and write its limits. Called before
    /// the child spawns so the limits are in force at attach time.
    pub fn prepare(&mut self) -> Result<()> {
        if !self.settings.enable_cgroups || !self.profile.enable_cgroups {
            return Ok(());
        }

        let backend = match cgroup::create_backend(&self.run_id) {
            Some(backend) => backend,
            None => {
                return self.degrade("no cgroup hierarchy available");
            }
        };

        let limits = GroupLimits {
            memory_bytes: self.profile.memory_limit_bytes,
            cpu_percent: self.profile.cpu_percent,
            pids: Some(self.profile.pids_limit),
        };

        match backend.create(&limits) {
            Ok(()) => {
                log::debug!(
                    "created {} group for run {}",
                    backend.backend_name(),
                    self.run_id
                );
                self.backend = Some(backend);
                Ok(())
            }
            Err(e) => {
                // Leave nothing half-built behind.
                let _ = backend.remove();
                self.degrade_err(e)
            }
        }
    }

    /// Attach the spawned child to the control group.
    pub fn attach(&mut self, pid: u32) -> Result<()> {
        let backend = match &self.backend {
            Some(backend) => backend,
            None => return Ok(()),
        };
        match backend.attach(pid) {
            Ok(()) => Ok(()),
            Err(e) => self.degrade_err(e),
        }
    }

    /// Remove the control group. Registered with the runner's cleanup so it
    /// fires on every exit path; failures are logged only.
    pub fn cleanup(&mut self) {
        if let Some(backend) = self.backend.take() {
            if let Err(e) = backend.remove() {
                log::warn!("cgroup cleanup failed for run {}: {e}", self.run_id);
            }
        }
    }

    fn degrade(&mut self, reason: &str) -> Result<()> {
        if self.settings.enforcing {
            return Err(SandboxError::Cgroup(reason.to_string()));
        }
        log::warn!("resource group disabled for run {}: {reason}", self.run_id);
        self.backend = None;
        Ok(())
    }

    fn degrade_err(&mut self, err: SandboxError) -> Result<()> {
        if self.settings.enforcing {
            return Err(err);
        }
        log::warn!("resource group disabled for run {}: {err}", self.run_id);
        self.backend = None;
        Ok(())
    }
}

impl Drop for SecurityManager {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Forbid privilege escalation for everything the child execs. Required
/// before an unprivileged process may load a seccomp filter.
#[cfg(target_os = "linux")]
pub fn set_no_new_privs() -> std::io::Result<()> {
    let rc = unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Only Linux exposes the prctl; elsewhere this is a no-op so the child
/// setup path stays uniform.
#[cfg(all(unix, not(target_os = "linux")))]
pub fn set_no_new_privs() -> std::io::Result<()> {
    Ok(())
}
