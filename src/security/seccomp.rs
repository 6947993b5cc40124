/// Syscall filtering for the sandboxed child.
///
/// The filter is a name-based allow-list compiled to BPF. Default action is
/// errno-return in filtered mode and thread-kill in strict mode. With
/// networking disabled, `socket` is allowed only for the local AF_UNIX
/// family through an argument-0 conditional rule. With exec disabled, a
/// second errno-return layer covers `execve`/`execveat` in both modes,
/// exempting only the one launch `execve` whose filename argument is the
/// buffer the child itself built; the allow-list filter always admits the
/// exec family so the override resolves to EPERM rather than the strict
/// kill default (the strictest action wins across stacked filters).
///
/// Loading requires no-new-privs; the caller sets it first.
#[cfg(target_os = "linux")]
use std::collections::BTreeMap;

#[cfg(target_os = "linux")]
use seccompiler::{
    BpfProgram, SeccompAction, SeccompCmpArgLen, SeccompCmpOp, SeccompCondition, SeccompFilter,
    SeccompRule, TargetArch,
};

use crate::types::{Result, SandboxError};

#[cfg(target_os = "linux")]
use super::SeccompMode;
use super::SecurityProfile;

/// Resolve a syscall name to this target's number. Names the architecture
/// does not provide resolve to `None` and are skipped by the builder.
#[cfg(target_os = "linux")]
pub fn syscall_number(name: &str) -> Option<libc::c_long> {
    match name {
        // Regular I/O.
        "read" => Some(libc::SYS_read),
        "write" => Some(libc::SYS_write),
        "close" => Some(libc::SYS_close),
        "fstat" => Some(libc::SYS_fstat),
        "lseek" => Some(libc::SYS_lseek),
        "mmap" => Some(libc::SYS_mmap),
        "mprotect" => Some(libc::SYS_mprotect),
        "munmap" => Some(libc::SYS_munmap),
        "brk" => Some(libc::SYS_brk),
        "readv" => Some(libc::SYS_readv),
        "writev" => Some(libc::SYS_writev),
        "pread64" => Some(libc::SYS_pread64),
        "pwrite64" => Some(libc::SYS_pwrite64),
        #[cfg(target_arch = "x86_64")]
        "lstat" => Some(libc::SYS_lstat),
        #[cfg(target_arch = "x86_64")]
        "readlink" => Some(libc::SYS_readlink),

        // File operations.
        #[cfg(target_arch = "x86_64")]
        "access" => Some(libc::SYS_access),
        #[cfg(target_arch = "x86_64")]
        "open" => Some(libc::SYS_open),
        "openat" => Some(libc::SYS_openat),
        #[cfg(target_arch = "x86_64")]
        "stat" => Some(libc::SYS_stat),
        "getcwd" => Some(libc::SYS_getcwd),
        "fcntl" => Some(libc::SYS_fcntl),
        "fstatfs" => Some(libc::SYS_fstatfs),
        #[cfg(target_arch = "x86_64")]
        "getdents" => Some(libc::SYS_getdents),
        "getdents64" => Some(libc::SYS_getdents64),
        #[cfg(target_arch = "x86_64")]
        "rename" => Some(libc::SYS_rename),
        #[cfg(target_arch = "x86_64")]
        "unlink" => Some(libc::SYS_unlink),
        #[cfg(target_arch = "x86_64")]
        "rmdir" => Some(libc::SYS_rmdir),
        #[cfg(target_arch = "x86_64")]
        "mkdir" => Some(libc::SYS_mkdir),
        #[cfg(target_arch = "x86_64")]
        "link" => Some(libc::SYS_link),
        #[cfg(target_arch = "x86_64")]
        "chmod" => Some(libc::SYS_chmod),
        "truncate" => Some(libc::SYS_truncate),
        "fallocate" => Some(libc::SYS_fallocate),
        #[cfg(target_arch = "x86_64")]
        "utime" => Some(libc::SYS_utime),
        "chdir" => Some(libc::SYS_chdir),
        "dup" => Some(libc::SYS_dup),
        #[cfg(target_arch = "x86_64")]
        "dup2" => Some(libc::SYS_dup2),
        #[cfg(target_arch = "x86_64")]
        "pipe" => Some(libc::SYS_pipe),

        // Process management.
        "clone" => Some(libc::SYS_clone),
        #[cfg(target_arch = "x86_64")]
        "fork" => Some(libc::SYS_fork),
        #[cfg(target_arch = "x86_64")]
        "vfork" => Some(libc::SYS_vfork),
        "wait4" => Some(libc::SYS_wait4),
        "kill" => Some(libc::SYS_kill),
        "exit" => Some(libc::SYS_exit),
        "exit_group" => Some(libc::SYS_exit_group),
        "rt_sigreturn" => Some(libc::SYS_rt_sigreturn),
        "rt_sigaction" => Some(libc::SYS_rt_sigaction),
        "rt_sigprocmask" => Some(libc::SYS_rt_sigprocmask),
        "rt_sigqueueinfo" => Some(libc::SYS_rt_sigqueueinfo),
        "setitimer" => Some(libc::SYS_setitimer),
        "getitimer" => Some(libc::SYS_getitimer),
        "nanosleep" => Some(libc::SYS_nanosleep),
        "clock_gettime" => Some(libc::SYS_clock_gettime),
        "sched_yield" => Some(libc::SYS_sched_yield),

        // Memory management.
        "mremap" => Some(libc::SYS_mremap),
        "msync" => Some(libc::SYS_msync),
        "mincore" => Some(libc::SYS_mincore),
        "madvise" => Some(libc::SYS_madvise),
        "shmget" => Some(libc::SYS_shmget),
        "shmat" => Some(libc::SYS_shmat),
        "shmdt" => Some(libc::SYS_shmdt),
        "shmctl" => Some(libc::SYS_shmctl),

        // Resource queries.
        "getrusage" => Some(libc::SYS_getrusage),
        "getrlimit" => Some(libc::SYS_getrlimit),
        "getpriority" => Some(libc::SYS_getpriority),
        "getuid" => Some(libc::SYS_getuid),
        "geteuid" => Some(libc::SYS_geteuid),
        "getgid" => Some(libc::SYS_getgid),
        "getegid" => Some(libc::SYS_getegid),
        "gettid" => Some(libc::SYS_gettid),
        "getpid" => Some(libc::SYS_getpid),
        "getppid" => Some(libc::SYS_getppid),
        "gettimeofday" => Some(libc::SYS_gettimeofday),
        "uname" => Some(libc::SYS_uname),
        "getrandom" => Some(libc::SYS_getrandom),

        // Sockets (the socket call itself may get a conditional rule).
        "socket" => Some(libc::SYS_socket),
        "socketpair" => Some(libc::SYS_socketpair),
        "bind" => Some(libc::SYS_bind),
        "listen" => Some(libc::SYS_listen),
        "accept" => Some(libc::SYS_accept),
        "accept4" => Some(libc::SYS_accept4),
        "connect" => Some(libc::SYS_connect),

        // Event loops and timers.
        "futex" => Some(libc::SYS_futex),
        #[cfg(target_arch = "x86_64")]
        "epoll_create" => Some(libc::SYS_epoll_create),
        "epoll_create1" => Some(libc::SYS_epoll_create1),
        "epoll_ctl" => Some(libc::SYS_epoll_ctl),
        #[cfg(target_arch = "x86_64")]
        "epoll_wait" => Some(libc::SYS_epoll_wait),
        "epoll_pwait" => Some(libc::SYS_epoll_pwait),
        #[cfg(target_arch = "x86_64")]
        "select" => Some(libc::SYS_select),
        #[cfg(target_arch = "x86_64")]
        "poll" => Some(libc::SYS_poll),
        "timerfd_create" => Some(libc::SYS_timerfd_create),
        "timerfd_settime" => Some(libc::SYS_timerfd_settime),
        "timerfd_gettime" => Some(libc::SYS_timerfd_gettime),

        "execve" => Some(libc::SYS_execve),
        "execveat" => Some(libc::SYS_execveat),

        _ => None,
    }
}

/// Compile the profile's allow-list into a loadable BPF program.
///
/// The exec family is always admitted here; exec denial is a separate
/// layer from [`build_exec_deny_program`] so its errno action survives the
/// strict mode's kill default.
#[cfg(target_os = "linux")]
pub fn build_program(profile: &SecurityProfile) -> Result<BpfProgram> {
    let default_action = match profile.seccomp_mode {
        SeccompMode::Strict => SeccompAction::KillThread,
        SeccompMode::Filtered => SeccompAction::Errno(libc::EPERM as u32),
        SeccompMode::Disabled => {
            return Err(SandboxError::Seccomp(
                "cannot build a filter for the disabled mode".to_string(),
            ));
        }
    };

    let mut rules: BTreeMap<i64, Vec<SeccompRule>> = BTreeMap::new();
    for name in &profile.allowed_syscalls {
        match syscall_number(name) {
            Some(number) => {
                rules.insert(number as i64, Vec::new());
            }
            None => log::warn!("unknown syscall in allow-list, skipping: {name}"),
        }
    }

    if profile.disable_network {
        let af_unix_only = SeccompRule::new(vec![SeccompCondition::new(
            0,
            SeccompCmpArgLen::Dword,
            SeccompCmpOp::Eq,
            libc::AF_UNIX as u64,
        )
        .map_err(|e| SandboxError::Seccomp(format!("socket condition: {e:?}")))?])
        .map_err(|e| SandboxError::Seccomp(format!("socket rule: {e:?}")))?;
        rules.insert(libc::SYS_socket as i64, vec![af_unix_only]);
    }

    rules.insert(libc::SYS_execve as i64, Vec::new());
    rules.insert(libc::SYS_execveat as i64, Vec::new());

    let arch: TargetArch = std::env::consts::ARCH
        .try_into()
        .map_err(|e| SandboxError::Seccomp(format!("unsupported architecture: {e:?}")))?;

    let filter = SeccompFilter::new(rules, default_action, SeccompAction::Allow, arch)
        .map_err(|e| SandboxError::Seccomp(format!("failed to build filter: {e:?}")))?;

    filter
        .try_into()
        .map_err(|e| SandboxError::Seccomp(format!("failed to compile filter: {e:?}")))
}

/// Errno-return override for the exec family, loaded as its own filter so
/// exec denial is EPERM in filtered and strict modes alike.
///
/// `launch_filename_ptr` exempts the single `execve` whose filename
/// argument is the launch buffer the child built; everything else in the
/// exec family fails with EPERM. All other syscalls pass through to the
/// allow-list filter.
#[cfg(target_os = "linux")]
pub fn build_exec_deny_program(launch_filename_ptr: Option<u64>) -> Result<BpfProgram> {
    let mut rules: BTreeMap<i64, Vec<SeccompRule>> = BTreeMap::new();

    let execve_rules = match launch_filename_ptr {
        Some(ptr) => {
            // Deny every execve whose filename argument is NOT the launch
            // buffer; the launch call itself misses this rule and falls to
            // the allow default.
            vec![SeccompRule::new(vec![SeccompCondition::new(
                0,
                SeccompCmpArgLen::Qword,
                SeccompCmpOp::Ne,
                ptr,
            )
            .map_err(|e| SandboxError::Seccomp(format!("execve condition: {e:?}")))?])
            .map_err(|e| SandboxError::Seccomp(format!("execve rule: {e:?}")))?]
        }
        None => Vec::new(),
    };
    rules.insert(libc::SYS_execve as i64, execve_rules);
    rules.insert(libc::SYS_execveat as i64, Vec::new());

    let arch: TargetArch = std::env::consts::ARCH
        .try_into()
        .map_err(|e| SandboxError::Seccomp(format!("unsupported architecture: {e:?}")))?;

    let filter = SeccompFilter::new(
        rules,
        SeccompAction::Allow,
        SeccompAction::Errno(libc::EPERM as u32),
        arch,
    )
    .map_err(|e| SandboxError::Seccomp(format!("failed to build exec deny filter: {e:?}")))?;

    filter
        .try_into()
        .map_err(|e| SandboxError::Seccomp(format!("failed to compile exec deny filter: {e:?}")))
}

/// Load a compiled program into the current thread. Screens every
/// subsequent syscall in-kernel.
#[cfg(target_os = "linux")]
pub fn install(program: &BpfProgram) -> Result<()> {
    seccompiler::apply_filter(program)
        .map_err(|e| SandboxError::Seccomp(format!("failed to load filter: {e:?}")))
}

#[cfg(not(target_os = "linux"))]
pub fn build_unsupported(_profile: &SecurityProfile) -> Result<()> {
    Err(SandboxError::Seccomp(
        "syscall filtering is only supported on Linux".to_string(),
    ))
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use crate::security::SecurityProfile;

    #[test]
    fn test_known_syscalls_resolve() {
        for name in ["read", "write", "exit_group", "futex", "socket"] {
            assert!(syscall_number(name).is_some(), "{name} should resolve");
        }
    }

    #[test]
    fn test_unknown_syscalls_are_skipped() {
        assert!(syscall_number("readdir").is_none());
        assert!(syscall_number("not_a_syscall").is_none());
    }

    #[test]
    fn test_filtered_profile_compiles() {
        let profile = SecurityProfile::for_language("python");
        let program = build_program(&profile).unwrap();
        assert!(!program.is_empty());
    }

    #[test]
    fn test_strict_profile_compiles() {
        let profile = SecurityProfile::for_language("go");
        assert_eq!(profile.seccomp_mode, SeccompMode::Strict);
        let program = build_program(&profile).unwrap();
        assert!(!program.is_empty());
    }

    #[test]
    fn test_exec_deny_program_compiles() {
        let pinned = build_exec_deny_program(Some(0xdead_beef)).unwrap();
        assert!(!pinned.is_empty());
        let blanket = build_exec_deny_program(None).unwrap();
        assert!(!blanket.is_empty());
    }

    #[test]
    fn test_disabled_mode_is_rejected() {
        let mut profile = SecurityProfile::for_language("cpp");
        profile.seccomp_mode = SeccompMode::Disabled;
        assert!(build_program(&profile).is_err());
    }
}
