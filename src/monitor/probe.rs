/// Per-OS process probes: resident memory, child enumeration, liveness and
/// hard termination. The monitor consumes these as a small capability set so
/// the sampling loop stays platform-neutral.
use crate::types::{Result, SandboxError};

/// Resident set size of a single process, in KB.
pub fn rss_kb(pid: u32) -> Result<i64> {
    imp::rss_kb(pid)
}

/// Direct children of a process. One level deep only; that is enough for
/// the interpreter-plus-worker shapes this sandbox runs (a launcher that
/// forks a single JIT or worker child).
pub fn children(pid: u32) -> Vec<u32> {
    imp::children(pid)
}

/// Resident set of the process plus its direct children, in KB.
pub fn tree_rss_kb(pid: u32) -> Result<i64> {
    let mut total = rss_kb(pid)?;
    for child in children(pid) {
        if let Ok(kb) = rss_kb(child) {
            if kb > 0 {
                total += kb;
            }
        }
    }
    Ok(total)
}

/// Null-signal liveness probe.
pub fn is_alive(pid: u32) -> bool {
    imp::is_alive(pid)
}

/// Kill the process tree with the hard-kill signal: children first, then
/// the parent, so user code cannot intercept or outrun the teardown.
pub fn kill_tree(pid: u32) {
    let kids = children(pid);
    if !kids.is_empty() {
        log::debug!("killing {} child process(es) of {pid}", kids.len());
    }
    for child in kids {
        imp::kill(child);
    }
    imp::kill(pid);
}

#[cfg(target_os = "linux")]
mod imp {
    use super::*;
    use std::fs;

    pub fn rss_kb(pid: u32) -> Result<i64> {
        let status = fs::read_to_string(format!("/proc/{pid}/status"))
            .map_err(|e| SandboxError::Process(format!("read /proc/{pid}/status: {e}")))?;
        for line in status.lines() {
            if let Some(rest) = line.strip_prefix("VmRSS:") {
                let field = rest.split_whitespace().next().unwrap_or_default();
                return field
                    .parse::<i64>()
                    .map_err(|e| SandboxError::Process(format!("parse VmRSS for {pid}: {e}")));
            }
        }
        Err(SandboxError::Process(format!(
            "no VmRSS field for process {pid}"
        )))
    }

    pub fn children(pid: u32) -> Vec<u32> {
        let mut kids = Vec::new();
        let entries = match fs::read_dir("/proc") {
            Ok(entries) => entries,
            Err(_) => return kids,
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let candidate = match name.to_str().and_then(|s| s.parse::<u32>().ok()) {
                Some(p) => p,
                None => continue,
            };
            if let Ok(stat) = fs::read_to_string(format!("/proc/{candidate}/stat")) {
                // Field 4 of /proc/<pid>/stat is the parent pid. The comm
                // field can contain spaces, so scan from after the ')'.
                if let Some((_, rest)) = stat.rsplit_once(')') {
                    let mut fields = rest.split_whitespace();
                    let ppid = fields.nth(1).and_then(|f| f.parse::<u32>().ok());
                    if ppid == Some(pid) {
                        kids.push(candidate);
                    }
                }
            }
        }
        kids
    }

    pub fn is_alive(pid: u32) -> bool {
        use nix::sys::signal::kill as send_signal;
        use nix::unistd::Pid;
        send_signal(Pid::from_raw(pid as i32), None).is_ok()
    }

    pub fn kill(pid: u32) {
        use nix::sys::signal::{kill as send_signal, Signal};
        use nix::unistd::Pid;
        let _ = send_signal(Pid::from_raw(pid as i32), Signal::SIGKILL);
    }
}

#[cfg(target_os = "macos")]
mod imp {
    use super::*;
    use std::process::Command;

    pub fn rss_kb(pid: u32) -> Result<i64> {
        let output = Command::new("ps")
            .args(["-o", "rss=", "-p", &pid.to_string()])
            .output()
            .map_err(|e| SandboxError::Process(format!("ps failed for {pid}: {e}")))?;
        let text = String::from_utf8_lossy(&output.stdout);
        text.trim()
            .parse::<i64>()
            .map_err(|e| SandboxError::Process(format!("parse ps rss for {pid}: {e}")))
    }

    pub fn children(pid: u32) -> Vec<u32> {
        let output = match Command::new("pgrep").args(["-P", &pid.to_string()]).output() {
            Ok(output) => output,
            Err(_) => return Vec::new(),
        };
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|line| line.trim().parse::<u32>().ok())
            .collect()
    }

    pub fn is_alive(pid: u32) -> bool {
        use nix::sys::signal::kill as send_signal;
        use nix::unistd::Pid;
        send_signal(Pid::from_raw(pid as i32), None).is_ok()
    }

    pub fn kill(pid: u32) {
        use nix::sys::signal::{kill as send_signal, Signal};
        use nix::unistd::Pid;
        let _ = send_signal(Pid::from_raw(pid as i32), Signal::SIGKILL);
    }
}

#[cfg(target_os = "windows")]
mod imp {
    use super::*;
    use std::process::Command;

    pub fn rss_kb(pid: u32) -> Result<i64> {
        let output = Command::new("wmic")
            .args([
                "process",
                "where",
                &format!("ProcessId={pid}"),
                "get",
                "WorkingSetSize",
            ])
            .output()
            .map_err(|e| SandboxError::Process(format!("wmic failed for {pid}: {e}")))?;
        let text = String::from_utf8_lossy(&output.stdout);
        let value = text
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty() && line.chars().all(|c| c.is_ascii_digit()))
            .ok_or_else(|| SandboxError::Process(format!("no WorkingSetSize for {pid}")))?;
        let bytes = value
            .parse::<i64>()
            .map_err(|e| SandboxError::Process(format!("parse WorkingSetSize for {pid}: {e}")))?;
        Ok(bytes / 1024)
    }

    pub fn children(pid: u32) -> Vec<u32> {
        let output = match Command::new("wmic")
            .args([
                "process",
                "where",
                &format!("ParentProcessId={pid}"),
                "get",
                "ProcessId",
            ])
            .output()
        {
            Ok(output) => output,
            Err(_) => return Vec::new(),
        };
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|line| line.trim().parse::<u32>().ok())
            .collect()
    }

    pub fn is_alive(pid: u32) -> bool {
        Command::new("tasklist")
            .args(["/FI", &format!("PID eq {pid}"), "/NH"])
            .output()
            .map(|out| String::from_utf8_lossy(&out.stdout).contains(&pid.to_string()))
            .unwrap_or(false)
    }

    pub fn kill(pid: u32) {
        let _ = Command::new("taskkill")
            .args(["/F", "/PID", &pid.to_string()])
            .output();
    }
}
