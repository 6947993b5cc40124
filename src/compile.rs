/// Shell-wrapped compile phase
///
/// Compile templates legitimately use shell metacharacters (quoted ldflags,
/// redirects), so this stage runs them through `sh -c` with the workspace as
/// the working directory. Run commands never get a shell; see the executor.
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::LanguageSpec;
use crate::monitor::probe;
use crate::sink::{self, SharedSink};
use crate::template;
use crate::types::{CompileFailure, Result, SandboxError};

/// Polling granularity for the compile deadline.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// What the compile phase produced: captured diagnostics always, and either
/// the artifact path or a classified failure.
#[derive(Debug)]
pub struct CompileOutcome {
    /// Combined stdout+stderr of the compiler, bounded.
    pub output: String,
    pub result: std::result::Result<PathBuf, CompileFailure>,
}

/// Drives a language's compile command inside the workspace.
pub struct Compiler {
    /// Byte cap for the combined compile diagnostics.
    output_cap: usize,
}

impl Compiler {
    pub fn new(output_cap: usize) -> Self {
        Self { output_cap }
    }

    /// Run the compile command for `spec` against an already-written source
    /// file. Returns `SandboxError` only for template failures or an
    /// unreachable shell; compiler failures land in the outcome.
    pub fn compile(
        &self,
        language: &str,
        spec: &LanguageSpec,
        source_path: &Path,
        workspace: &Path,
        timeout: Duration,
    ) -> Result<CompileOutcome> {
        let exe_path = workspace.join(&spec.exe_name);
        let exe_dir = exe_path
            .parent()
            .unwrap_or(workspace)
            .to_string_lossy()
            .into_owned();

        let mut subs: HashMap<&str, String> = HashMap::new();
        subs.insert(
            template::PLACEHOLDER_SRC_PATH,
            source_path.to_string_lossy().into_owned(),
        );
        subs.insert(
            template::PLACEHOLDER_EXE_PATH,
            exe_path.to_string_lossy().into_owned(),
        );
        subs.insert(
            template::PLACEHOLDER_WORK_DIR,
            workspace.to_string_lossy().into_owned(),
        );
        subs.insert(template::PLACEHOLDER_EXE_DIR, exe_dir);

        let command = template::expand(&spec.compile_command, &subs);
        if command.trim().is_empty() {
            return Err(SandboxError::Template(format!(
                "processed compile command for '{language}' is empty"
            )));
        }

        log::info!("[{language}] compiling: sh -c \"{command}\"");
        let started = Instant::now();

        let mut child = match Command::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return Ok(CompileOutcome {
                    output: String::new(),
                    result: Err(CompileFailure::Failed {
                        detail: format!("failed to invoke shell: {e}"),
                    }),
                });
            }
        };

        let diagnostics = sink::shared(self.output_cap);
        let stdout_handle = drain(child.stdout.take(), diagnostics.clone());
        let stderr_handle = drain(child.stderr.take(), diagnostics.clone());

        let deadline = started + timeout;
        let mut timed_out = false;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) => {
                    if Instant::now() >= deadline {
                        timed_out = true;
                        probe::kill_tree(child.id());
                        let _ = child.wait();
                        break None;
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    return Err(SandboxError::Process(format!(
                        "failed to wait for compiler: {e}"
                    )));
                }
            }
        };

        if let Some(h) = stdout_handle {
            let _ = h.join();
        }
        if let Some(h) = stderr_handle {
            let _ = h.join();
        }
        let (output, _) = sink::snapshot(&diagnostics);
        let elapsed = started.elapsed();

        if timed_out {
            log::warn!(
                "[{language}] compile timed out after {:.2}s",
                elapsed.as_secs_f64()
            );
            return Ok(CompileOutcome {
                output,
                result: Err(CompileFailure::Timeout {
                    limit_secs: timeout.as_secs(),
                }),
            });
        }

        match status {
            Some(status) if status.success() => {
                if spec.requires_artifact && !exe_path.exists() {
                    log::warn!(
                        "[{language}] compile reported success but artifact is missing"
                    );
                    return Ok(CompileOutcome {
                        output,
                        result: Err(CompileFailure::ArtifactMissing {
                            path: exe_path.to_string_lossy().into_owned(),
                        }),
                    });
                }
                log::info!(
                    "[{language}] compile successful in {:.2}s",
                    elapsed.as_secs_f64()
                );
                Ok(CompileOutcome {
                    output,
                    result: Ok(exe_path),
                })
            }
            Some(status) => {
                log::info!(
                    "[{language}] compile failed after {:.2}s (status {status})",
                    elapsed.as_secs_f64()
                );
                Ok(CompileOutcome {
                    output,
                    result: Err(CompileFailure::Failed {
                        detail: format!("compiler exited with {status}"),
                    }),
                })
            }
            None => Ok(CompileOutcome {
                output,
                result: Err(CompileFailure::Timeout {
                    limit_secs: timeout.as_secs(),
                }),
            }),
        }
    }
}

fn drain<R: Read + Send + 'static>(
    stream: Option<R>,
    sink: SharedSink,
) -> Option<thread::JoinHandle<()>> {
    stream.map(|mut stream| {
        thread::spawn(move || {
            use std::io::Write;
            let mut chunk = [0u8; 8192];
            while let Ok(n) = stream.read(&mut chunk) {
                if n == 0 {
                    break;
                }
                let mut guard = sink.lock().unwrap_or_else(|e| e.into_inner());
                let _ = guard.write_all(&chunk[..n]);
            }
        })
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::workspace::Workspace;

    fn shell_spec(compile_command: &str, requires_artifact: bool) -> LanguageSpec {
        LanguageSpec {
            src_name: "main.sh".to_string(),
            exe_name: "prog".to_string(),
            compile_command: compile_command.to_string(),
            run_command: "{{EXE_PATH}}".to_string(),
            requires_artifact,
            ..LanguageSpec::default()
        }
    }

    fn workspace() -> Workspace {
        Workspace::create(&std::env::temp_dir().join("croj-sandbox-compile-tests")).unwrap()
    }

    #[test]
    fn test_successful_compile_produces_artifact() {
        let ws = workspace();
        let src = ws.write_file("main.sh", "#!/bin/sh\necho ok\n").unwrap();
        let spec = shell_spec("cp {{SRC_PATH}} {{EXE_PATH}} && chmod +x {{EXE_PATH}}", true);
        let compiler = Compiler::new(64 * 1024);
        let outcome = compiler
            .compile("shell", &spec, &src, ws.path(), Duration::from_secs(5))
            .unwrap();
        let artifact = outcome.result.unwrap();
        assert!(artifact.exists());
        assert_eq!(artifact.file_name().unwrap(), "prog");
    }

    #[test]
    fn test_failed_compile_captures_diagnostics() {
        let ws = workspace();
        let src = ws.write_file("main.sh", "").unwrap();
        let spec = shell_spec("echo 'main.sh:1: boom' >&2; exit 2", false);
        let compiler = Compiler::new(64 * 1024);
        let outcome = compiler
            .compile("shell", &spec, &src, ws.path(), Duration::from_secs(5))
            .unwrap();
        let failure = outcome.result.unwrap_err();
        assert!(matches!(failure, CompileFailure::Failed { .. }));
        assert!(outcome.output.contains("boom"));
    }

    #[test]
    fn test_compile_deadline_is_enforced() {
        let ws = workspace();
        let src = ws.write_file("main.sh", "").unwrap();
        let spec = shell_spec("sleep 5", false);
        let compiler = Compiler::new(64 * 1024);
        let started = Instant::now();
        let outcome = compiler
            .compile("shell", &spec, &src, ws.path(), Duration::from_millis(300))
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(outcome.result.unwrap_err().is_timeout());
    }

    #[test]
    fn test_missing_artifact_is_flagged() {
        let ws = workspace();
        let src = ws.write_file("main.sh", "").unwrap();
        let spec = shell_spec("true", true);
        let compiler = Compiler::new(64 * 1024);
        let outcome = compiler
            .compile("shell", &spec, &src, ws.path(), Duration::from_secs(5))
            .unwrap();
        assert!(matches!(
            outcome.result.unwrap_err(),
            CompileFailure::ArtifactMissing { .. }
        ));
    }

    #[test]
    fn test_empty_expanded_command_is_sandbox_error() {
        let ws = workspace();
        let src = ws.write_file("main.sh", "").unwrap();
        let spec = shell_spec("   ", false);
        let compiler = Compiler::new(64 * 1024);
        assert!(compiler
            .compile("shell", &spec, &src, ws.path(), Duration::from_secs(5))
            .is_err());
    }
}
