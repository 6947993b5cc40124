/// Child process execution with resource supervision and bounded capture
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::monitor::{self, ProcessStats};
use crate::security::SecurityManager;
use crate::sink::{self, SharedSink};
use crate::types::{RunResult, Verdict};

use super::{Deadline, ExecLimits};

/// How often the monitor samples the process tree.
const SAMPLE_INTERVAL: Duration = Duration::from_millis(10);

/// Runs one tokenized command under supervision and classifies the outcome.
pub struct Executor {
    max_stdout_size: usize,
    max_stderr_size: usize,
}

impl Executor {
    pub fn new(max_stdout_size: usize, max_stderr_size: usize) -> Self {
        Self {
            max_stdout_size,
            max_stderr_size,
        }
    }

    /// Spawn `argv` in `workdir`, feed it `stdin_data`, capture both output
    /// streams bounded, enforce the limits, and compute the verdict.
    ///
    /// The security manager must already be prepared; the child pid is
    /// attached to its resource group right after spawn, and the syscall
    /// filter (when enabled) is installed by the child itself between fork
    /// and exec.
    pub fn execute(
        &self,
        argv: &[String],
        env: &HashMap<String, String>,
        stdin_data: Option<&str>,
        workdir: &Path,
        limits: ExecLimits,
        deadline: Deadline,
        security: &mut SecurityManager,
    ) -> RunResult {
        if argv.is_empty() {
            return RunResult::new(Verdict::SandboxError, "empty command provided to executor");
        }

        log::debug!("executing {argv:?} (wall limit {:.2}s)", limits.wall_limit.as_secs_f64());

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .current_dir(workdir)
            .stdin(if stdin_data.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .envs(env);

        #[cfg(unix)]
        install_child_security(&mut cmd, security, argv);

        let start = Instant::now();
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return RunResult::new(
                    Verdict::SandboxError,
                    format!("failed to start command: {e}"),
                );
            }
        };
        let pid = child.id();

        if let Err(e) = security.attach(pid) {
            monitor::probe::kill_tree(pid);
            let _ = child.wait();
            return RunResult::new(Verdict::SandboxError, e.to_string());
        }

        let stdin_handle = stdin_data.map(|data| spawn_stdin_forwarder(&mut child, data));
        let stdout_sink = sink::shared(self.max_stdout_size);
        let stderr_sink = sink::shared(self.max_stderr_size);
        let stdout_handle = spawn_drain(child.stdout.take(), stdout_sink.clone());
        let stderr_handle = spawn_drain(child.stderr.take(), stderr_sink.clone());

        let handle = monitor::spawn(pid, limits.memory_limit_kb, limits.wall_limit, SAMPLE_INTERVAL);

        let wait_result = child.wait();
        let elapsed = start.elapsed();

        if let Some(h) = stdin_handle {
            let _ = h.join();
        }
        // Drains are joined before the sinks are read so the overflow flags
        // reflect the finished run.
        if let Some(h) = stdout_handle {
            let _ = h.join();
        }
        if let Some(h) = stderr_handle {
            let _ = h.join();
        }

        let stats = handle.stop();
        let (stdout, stdout_overflow) = sink::snapshot(&stdout_sink);
        let (stderr, stderr_overflow) = sink::snapshot(&stderr_sink);

        let mut result = RunResult {
            verdict: Verdict::Accepted,
            exit_code: 0,
            stdout,
            stderr,
            error: String::new(),
            time_used_ms: elapsed.as_millis() as i64,
            memory_used_kb: stats.peak_memory_kb,
            compile_output: String::new(),
        };

        self.classify(
            &mut result,
            wait_result,
            &stats,
            limits,
            deadline,
            stdout_overflow,
            stderr_overflow,
        );
        result
    }

    /// Verdict priority: monitor timeout, then memory, then the outer
    /// deadline, then runtime failure, then output overflow. Comparison
    /// against expected output happens later in the runner.
    #[allow(clippy::too_many_arguments)]
    fn classify(
        &self,
        result: &mut RunResult,
        wait_result: std::io::Result<std::process::ExitStatus>,
        stats: &ProcessStats,
        limits: ExecLimits,
        deadline: Deadline,
        stdout_overflow: bool,
        stderr_overflow: bool,
    ) {
        if stats.timed_out {
            result.verdict = Verdict::TimeLimitExceeded;
            result.exit_code = -1;
            result.error = format!(
                "time limit exceeded: {:.2}s (limit: {:.2}s)",
                stats.duration.as_secs_f64(),
                limits.wall_limit.as_secs_f64()
            );
            return;
        }

        if stats.exceeded_memory {
            result.verdict = Verdict::MemoryLimitExceeded;
            result.exit_code = -1;
            result.error = format!(
                "memory limit exceeded: {} KB (limit: {} KB)",
                stats.peak_memory_kb, limits.memory_limit_kb
            );
            return;
        }

        if deadline.expired() {
            result.verdict = Verdict::TimeLimitExceeded;
            result.exit_code = -1;
            result.error = "overall run deadline exceeded".to_string();
            return;
        }

        let overflow_note = match (stdout_overflow, stderr_overflow) {
            (true, true) => Some(format!(
                "output limit exceeded (stdout, limit: {} bytes); output limit exceeded (stderr, limit: {} bytes)",
                self.max_stdout_size, self.max_stderr_size
            )),
            (true, false) => Some(format!(
                "output limit exceeded (stdout, limit: {} bytes)",
                self.max_stdout_size
            )),
            (false, true) => Some(format!(
                "output limit exceeded (stderr, limit: {} bytes)",
                self.max_stderr_size
            )),
            (false, false) => None,
        };

        match wait_result {
            Ok(status) if status.success() => {
                if let Some(note) = overflow_note {
                    result.verdict = Verdict::OutputLimitExceeded;
                    result.error = note;
                }
                // Otherwise stays Accepted with exit code 0.
            }
            Ok(status) => {
                // A crashing program that also truncated is a runtime error
                // first; the truncation rides along in the message.
                result.exit_code = status.code().unwrap_or(-1);
                result.verdict = Verdict::RuntimeError;
                result.error = describe_abnormal_exit(&status);
                if let Some(note) = overflow_note {
                    result.error = format!("{}; {note}", result.error);
                }
            }
            Err(e) => {
                result.exit_code = -1;
                result.verdict = Verdict::RuntimeError;
                result.error = format!("failed to wait for process: {e}");
                if let Some(note) = overflow_note {
                    result.error = format!("{}; {note}", result.error);
                }
            }
        }
    }
}

fn describe_abnormal_exit(status: &std::process::ExitStatus) -> String {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("runtime error: terminated by signal {signal}");
        }
    }
    match status.code() {
        Some(code) => format!("runtime error: process exited with code {code}"),
        None => "runtime error: process exited abnormally".to_string(),
    }
}

/// Write the request stdin fully, then close the pipe so the child sees EOF.
fn spawn_stdin_forwarder(child: &mut Child, data: &str) -> JoinHandle<()> {
    let mut stdin = child.stdin.take();
    let data = data.to_string();
    thread::spawn(move || {
        if let Some(mut pipe) = stdin.take() {
            if let Err(e) = pipe.write_all(data.as_bytes()) {
                log::debug!("stdin forwarder stopped early: {e}");
            }
        }
    })
}

/// Drain one output stream into its bounded sink until EOF. The sink keeps
/// consuming past its cap so the pipe never backs up.
fn spawn_drain<R: Read + Send + 'static>(
    stream: Option<R>,
    sink: SharedSink,
) -> Option<JoinHandle<()>> {
    stream.map(|mut stream| {
        thread::spawn(move || {
            let mut chunk = [0u8; 8192];
            loop {
                match stream.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => {
                        let mut guard = sink.lock().unwrap_or_else(|e| e.into_inner());
                        let _ = guard.write_all(&chunk[..n]);
                    }
                    Err(e) => {
                        log::debug!("output drain stopped: {e}");
                        break;
                    }
                }
            }
        })
    })
}

/// Arrange for the child to apply its security posture between fork and
/// exec: no-new-privs, then the syscall filter. With exec disabled the
/// child execs the payload itself so the filter's launch conditional can
/// reference the exact argv it passes.
#[cfg(unix)]
fn install_child_security(cmd: &mut Command, security: &SecurityManager, argv: &[String]) {
    use std::os::unix::process::CommandExt;

    let filter_enabled = security.filter_enabled();
    let profile = security.profile().clone();
    if !filter_enabled && !profile.no_new_privileges {
        return;
    }
    let argv: Vec<String> = argv.to_vec();

    unsafe {
        cmd.pre_exec(move || child_security_entry(&profile, &argv, filter_enabled));
    }
}

/// Runs in the forked child. Must not touch locks owned by the parent.
#[cfg(unix)]
fn child_security_entry(
    profile: &crate::security::SecurityProfile,
    argv: &[String],
    filter_enabled: bool,
) -> std::io::Result<()> {
    if profile.no_new_privileges || filter_enabled {
        crate::security::set_no_new_privs()?;
    }

    if !filter_enabled {
        return Ok(());
    }

    install_filter_in_child(profile, argv)
}

#[cfg(target_os = "linux")]
fn install_filter_in_child(
    profile: &crate::security::SecurityProfile,
    argv: &[String],
) -> std::io::Result<()> {
    use crate::security::seccomp;
    use std::ffi::CString;
    use std::io::{Error, ErrorKind};

    if !profile.disable_exec {
        let program = seccomp::build_program(profile)
            .map_err(|e| Error::new(ErrorKind::Other, e.to_string()))?;
        return seccomp::install(&program).map_err(|e| Error::new(ErrorKind::Other, e.to_string()));
    }

    // Exec-disabled: take over the exec so the errno layer can pin the one
    // legitimate execve to the filename buffer built right here.
    let mut cargv = Vec::with_capacity(argv.len());
    for arg in argv {
        cargv.push(
            CString::new(arg.as_str())
                .map_err(|_| Error::new(ErrorKind::InvalidInput, "argv contains NUL byte"))?,
        );
    }
    let filename_ptr = cargv[0].as_ptr() as u64;

    // The deny layer must load first: once the allow-list filter is live it
    // would reject the second seccomp call.
    let deny = seccomp::build_exec_deny_program(Some(filename_ptr))
        .map_err(|e| Error::new(ErrorKind::Other, e.to_string()))?;
    seccomp::install(&deny).map_err(|e| Error::new(ErrorKind::Other, e.to_string()))?;
    let program = seccomp::build_program(profile)
        .map_err(|e| Error::new(ErrorKind::Other, e.to_string()))?;
    seccomp::install(&program).map_err(|e| Error::new(ErrorKind::Other, e.to_string()))?;

    let err = nix::unistd::execvp(&cargv[0], &cargv)
        .err()
        .unwrap_or(nix::errno::Errno::EINVAL);
    Err(Error::from_raw_os_error(err as i32))
}

#[cfg(all(unix, not(target_os = "linux")))]
fn install_filter_in_child(
    _profile: &crate::security::SecurityProfile,
    _argv: &[String],
) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "syscall filtering is only supported on Linux",
    ))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::SecuritySettings;
    use crate::security::SecurityProfile;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    fn run(
        executor: &Executor,
        parts: &[&str],
        stdin: Option<&str>,
        limits: ExecLimits,
    ) -> RunResult {
        let mut security = SecurityManager::new(
            SecurityProfile::default(),
            SecuritySettings {
                enable_cgroups: false,
                enable_syscall_filter: false,
                enforcing: false,
            },
            "executor-test",
        );
        let workdir = std::env::temp_dir();
        executor.execute(
            &argv(parts),
            &HashMap::new(),
            stdin,
            &workdir,
            limits,
            Deadline::after(Duration::from_secs(30)),
            &mut security,
        )
    }

    fn generous() -> ExecLimits {
        ExecLimits {
            wall_limit: Duration::from_secs(5),
            memory_limit_kb: 0,
        }
    }

    #[test]
    fn test_successful_command_is_accepted() {
        let executor = Executor::new(64 * 1024, 64 * 1024);
        let result = run(&executor, &["echo", "hello"], None, generous());
        assert_eq!(result.verdict, Verdict::Accepted);
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout.trim(), "hello");
        assert!(result.time_used_ms >= 0);
    }

    #[test]
    fn test_stdin_is_forwarded_and_closed() {
        let executor = Executor::new(64 * 1024, 64 * 1024);
        let result = run(&executor, &["cat"], Some("line one\nline two\n"), generous());
        assert_eq!(result.verdict, Verdict::Accepted);
        assert_eq!(result.stdout, "line one\nline two\n");
    }

    #[test]
    fn test_nonzero_exit_is_runtime_error() {
        let executor = Executor::new(64 * 1024, 64 * 1024);
        let result = run(&executor, &["false"], None, generous());
        assert_eq!(result.verdict, Verdict::RuntimeError);
        assert_eq!(result.exit_code, 1);
        assert!(result.error.contains("exited with code 1"));
    }

    #[test]
    fn test_missing_binary_is_sandbox_error() {
        let executor = Executor::new(64 * 1024, 64 * 1024);
        let result = run(
            &executor,
            &["/nonexistent/definitely-not-a-binary"],
            None,
            generous(),
        );
        assert_eq!(result.verdict, Verdict::SandboxError);
    }

    #[test]
    fn test_wall_limit_yields_tle() {
        let executor = Executor::new(64 * 1024, 64 * 1024);
        let limits = ExecLimits {
            wall_limit: Duration::from_millis(300),
            memory_limit_kb: 0,
        };
        let result = run(&executor, &["sleep", "5"], None, limits);
        assert_eq!(result.verdict, Verdict::TimeLimitExceeded);
        assert_eq!(result.exit_code, -1);
        assert!(result.time_used_ms >= 300);
    }

    #[test]
    fn test_output_past_cap_is_ole() {
        let executor = Executor::new(1024, 1024);
        let result = run(
            &executor,
            &["head", "-c", "4096", "/dev/zero"],
            None,
            generous(),
        );
        assert_eq!(result.verdict, Verdict::OutputLimitExceeded);
        assert_eq!(result.stdout.len(), 1024);
        assert!(result.error.contains("stdout"));
    }

    #[test]
    fn test_output_at_exactly_cap_is_accepted() {
        let executor = Executor::new(1024, 1024);
        let result = run(
            &executor,
            &["head", "-c", "1024", "/dev/zero"],
            None,
            generous(),
        );
        assert_eq!(result.verdict, Verdict::Accepted);
        assert_eq!(result.stdout.len(), 1024);
    }

    #[test]
    fn test_crash_with_overflow_is_runtime_error_with_note() {
        let executor = Executor::new(16, 16);
        // Writes past the cap, then fails.
        let result = run(
            &executor,
            &["sh", "-c", "echo 0123456789abcdefghij; exit 9"],
            None,
            generous(),
        );
        assert_eq!(result.verdict, Verdict::RuntimeError);
        assert_eq!(result.exit_code, 9);
        assert!(result.error.contains("output limit exceeded"));
    }

    #[test]
    fn test_empty_argv_is_sandbox_error() {
        let executor = Executor::new(1024, 1024);
        let mut security = SecurityManager::new(
            SecurityProfile::default(),
            SecuritySettings::default(),
            "executor-test",
        );
        let result = executor.execute(
            &[],
            &HashMap::new(),
            None,
            &std::env::temp_dir(),
            generous(),
            Deadline::after(Duration::from_secs(1)),
            &mut security,
        );
        assert_eq!(result.verdict, Verdict::SandboxError);
    }
}
