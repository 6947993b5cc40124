/// Per-run orchestration: workspace, compile, execute, compare, teardown
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use crate::compare;
use crate::compile::Compiler;
use crate::config::{EffectiveLimits, SandboxConfig};
use crate::exec::{Deadline, ExecLimits, Executor};
use crate::security::{SecurityManager, SecurityProfile};
use crate::template;
use crate::types::{Result, RunRequest, RunResult, SandboxError, Verdict};
use crate::workspace::Workspace;

/// Slack added to the outer defense-in-depth deadline.
const DEADLINE_SLACK: Duration = Duration::from_secs(5);

/// Teardown actions with the run's lifetime. Registrations execute in
/// reverse order when the registry drops, on every exit path. Nothing here
/// survives the run; there are no process-wide cleanup lists.
pub struct CleanupRegistry {
    handlers: Vec<Box<dyn FnOnce()>>,
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub fn defer(&mut self, handler: impl FnOnce() + 'static) {
        self.handlers.push(Box::new(handler));
    }
}

impl Default for CleanupRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CleanupRegistry {
    fn drop(&mut self) {
        while let Some(handler) = self.handlers.pop() {
            handler();
        }
    }
}

/// Single-shot judge: one `run` call owns one workspace, one child process
/// tree and one verdict.
pub struct Runner {
    config: SandboxConfig,
}

impl Runner {
    /// Create a runner, ensuring the workspace base directory exists.
    pub fn new(config: SandboxConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.base_dir).map_err(|e| {
            SandboxError::Workspace(format!(
                "failed to create base directory {}: {e}",
                config.base_dir.display()
            ))
        })?;
        log::info!(
            "sandbox runner initialized: workspace base '{}'",
            config.base_dir.display()
        );
        Ok(Self { config })
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Compile and execute one request, returning exactly one verdict.
    /// Workspace release and security cleanup run on every exit path.
    pub fn run(&self, request: &RunRequest) -> RunResult {
        self.run_with_config(request, &self.config)
    }

    /// `run` with a per-run configuration override. The boundary layer uses
    /// this to apply caller-supplied limits (and the user-specified-timeout
    /// flag) without touching the shared configuration.
    pub fn run_with_config(&self, request: &RunRequest, config: &SandboxConfig) -> RunResult {
        let language = request.language.as_str();
        let spec = match config.languages.get(language) {
            Some(spec) => spec.clone(),
            None => {
                return RunResult::new(
                    Verdict::SandboxError,
                    format!("language configuration for '{language}' not found"),
                );
            }
        };
        if spec.src_name.is_empty() {
            return RunResult::new(
                Verdict::SandboxError,
                format!("language '{language}' spec is missing a source file name"),
            );
        }

        let limits = EffectiveLimits::resolve(config, &spec, request);
        let deadline =
            Deadline::after(limits.compile_timeout + limits.run_timeout + DEADLINE_SLACK);

        let mut cleanup = CleanupRegistry::new();

        // Workspace: created up front, released by the registry.
        let workspace = match Workspace::create(&config.base_dir) {
            Ok(ws) => ws,
            Err(e) => return RunResult::new(Verdict::SandboxError, e.to_string()),
        };
        let run_id = workspace.run_id().to_string();
        let workdir = workspace.path().to_path_buf();

        let source_path = match workspace.write_file(&spec.src_name, &request.source_code) {
            Ok(path) => path,
            Err(e) => return RunResult::new(Verdict::SandboxError, e.to_string()),
        };
        log::info!("[{language}] source saved to {}", source_path.display());

        {
            let mut workspace = workspace;
            cleanup.defer(move || workspace.release());
        }

        // Compile phase. Interpreted languages run their source directly.
        let mut compile_output = String::new();
        let artifact: PathBuf = if spec.is_interpreted() {
            log::info!("[{language}] skipping compilation phase");
            source_path.clone()
        } else {
            let compiler =
                Compiler::new(config.max_stdout_size + config.max_stderr_size);
            let outcome = match compiler.compile(
                language,
                &spec,
                &source_path,
                &workdir,
                limits.compile_timeout,
            ) {
                Ok(outcome) => outcome,
                Err(e) => return RunResult::new(Verdict::SandboxError, e.to_string()),
            };
            compile_output = outcome.output;
            match outcome.result {
                Ok(path) => path,
                Err(failure) => {
                    let mut result = RunResult::new(Verdict::CompileError, failure.to_string());
                    // Diagnostics double as the main error for everything
                    // except timeouts.
                    if !failure.is_timeout() {
                        result.error = compile_output.clone();
                    }
                    result.compile_output = compile_output;
                    return result;
                }
            }
        };

        // Run command expansion. The executor gets a plain argv, no shell.
        let mut subs: HashMap<&str, String> = HashMap::new();
        subs.insert(
            template::PLACEHOLDER_SRC_PATH,
            source_path.to_string_lossy().into_owned(),
        );
        subs.insert(
            template::PLACEHOLDER_EXE_PATH,
            artifact.to_string_lossy().into_owned(),
        );
        subs.insert(
            template::PLACEHOLDER_WORK_DIR,
            workdir.to_string_lossy().into_owned(),
        );
        subs.insert(
            template::PLACEHOLDER_EXE_DIR,
            artifact
                .parent()
                .unwrap_or(&workdir)
                .to_string_lossy()
                .into_owned(),
        );
        subs.insert(
            template::PLACEHOLDER_MAX_MEM,
            limits.memory_limit_kb().to_string(),
        );

        let argv = match template::tokenize(&spec.run_command, &subs) {
            Ok(argv) => argv,
            Err(e) => {
                let mut result = RunResult::new(
                    Verdict::SandboxError,
                    format!("failed to process run command for '{language}': {e}"),
                );
                result.compile_output = compile_output;
                return result;
            }
        };

        // Security: group prepared before spawn, removed by the registry.
        let mut profile = SecurityProfile::for_language(language);
        profile.memory_limit_bytes = Some(limits.memory_limit_bytes);
        let security = Rc::new(RefCell::new(SecurityManager::new(
            profile,
            config.security,
            &run_id,
        )));
        {
            let security = Rc::clone(&security);
            cleanup.defer(move || security.borrow_mut().cleanup());
        }
        if let Err(e) = security.borrow_mut().prepare() {
            let mut result = RunResult::new(Verdict::SandboxError, e.to_string());
            result.compile_output = compile_output;
            return result;
        }

        log::info!(
            "[{language}] executing with time limit {:.2}s, memory limit {} KB",
            limits.run_timeout.as_secs_f64(),
            limits.memory_limit_kb()
        );

        let executor = Executor::new(config.max_stdout_size, config.max_stderr_size);
        let mut result = {
            let mut security = security.borrow_mut();
            executor.execute(
                &argv,
                &spec.env,
                request.stdin.as_deref(),
                &workdir,
                ExecLimits {
                    wall_limit: limits.run_timeout,
                    memory_limit_kb: limits.memory_limit_kb(),
                },
                deadline,
                &mut security,
            )
        };
        result.compile_output = compile_output;

        // Output comparison runs only for otherwise-accepted runs.
        if result.verdict == Verdict::Accepted {
            if let Some(expected) = request.expected_output.as_deref() {
                if compare::outputs_match(&result.stdout, expected) {
                    log::info!("[{language}] output matches expected");
                } else {
                    log::info!(
                        "[{language}] output mismatch: expected {:?}, actual {:?}",
                        compare::normalize(expected),
                        compare::normalize(&result.stdout)
                    );
                    result.verdict = Verdict::WrongAnswer;
                    result.error = "output does not match expected output".to_string();
                }
            }
        }

        log::info!("[{language}] final verdict: {}", result.verdict);
        result
    }
}

#[cfg(test)]
mod cleanup_tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_registry_runs_in_reverse_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        {
            let mut registry = CleanupRegistry::new();
            for tag in ["first", "second", "third"] {
                let order = Arc::clone(&order);
                registry.defer(move || order.lock().unwrap().push(tag));
            }
        }
        assert_eq!(*order.lock().unwrap(), vec!["third", "second", "first"]);
    }

    #[test]
    fn test_registry_fires_exactly_once_per_handler() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let mut registry = CleanupRegistry::new();
            let count = Arc::clone(&count);
            registry.defer(move || {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::{LanguageSpec, SecuritySettings};

    /// Shell-backed languages keep these tests independent of real
    /// toolchains.
    fn test_config() -> SandboxConfig {
        let mut config = SandboxConfig::default();
        config.base_dir = std::env::temp_dir().join("croj-sandbox-runner-tests");
        config.security = SecuritySettings {
            enable_cgroups: false,
            enable_syscall_filter: false,
            enforcing: false,
        };
        config.languages.insert(
            "sh".to_string(),
            LanguageSpec {
                src_name: "main.sh".to_string(),
                exe_name: "main.sh".to_string(),
                run_command: "sh {{SRC_PATH}}".to_string(),
                ..LanguageSpec::default()
            },
        );
        config.languages.insert(
            "shc".to_string(),
            LanguageSpec {
                src_name: "main.sh".to_string(),
                exe_name: "prog".to_string(),
                compile_command: "cp {{SRC_PATH}} {{EXE_PATH}} && chmod +x {{EXE_PATH}}"
                    .to_string(),
                run_command: "{{EXE_PATH}}".to_string(),
                requires_artifact: true,
                ..LanguageSpec::default()
            },
        );
        config
    }

    fn request(language: &str, source: &str) -> RunRequest {
        RunRequest {
            source_code: source.to_string(),
            language: language.to_string(),
            ..RunRequest::default()
        }
    }

    #[test]
    fn test_accepted_with_expected_output() {
        let runner = Runner::new(test_config()).unwrap();
        let mut req = request("sh", "echo 6");
        req.expected_output = Some("6".to_string());
        let result = runner.run(&req);
        assert_eq!(result.verdict, Verdict::Accepted);
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "6\n");
    }

    #[test]
    fn test_wrong_answer_keeps_raw_stdout() {
        let runner = Runner::new(test_config()).unwrap();
        let mut req = request("sh", "echo 6");
        req.expected_output = Some("7".to_string());
        let result = runner.run(&req);
        assert_eq!(result.verdict, Verdict::WrongAnswer);
        assert_eq!(result.stdout, "6\n");
        assert!(!result.error.is_empty());
    }

    #[test]
    fn test_stdin_reaches_the_program() {
        let runner = Runner::new(test_config()).unwrap();
        let mut req = request("sh", "cat");
        req.stdin = Some("3\n1\n2\n3\n".to_string());
        req.expected_output = Some("3\n1\n2\n3".to_string());
        let result = runner.run(&req);
        assert_eq!(result.verdict, Verdict::Accepted);
    }

    #[test]
    fn test_runtime_error_preserves_exit_code() {
        let runner = Runner::new(test_config()).unwrap();
        let result = runner.run(&request("sh", "exit 7"));
        assert_eq!(result.verdict, Verdict::RuntimeError);
        assert_eq!(result.exit_code, 7);
    }

    #[test]
    fn test_unknown_language_is_sandbox_error() {
        let runner = Runner::new(test_config()).unwrap();
        let result = runner.run(&request("cobol", "DISPLAY '6'."));
        assert_eq!(result.verdict, Verdict::SandboxError);
        assert!(result.error.contains("cobol"));
    }

    #[test]
    fn test_time_limit_override() {
        let runner = Runner::new(test_config()).unwrap();
        let mut req = request("sh", "sleep 5");
        req.time_limit_secs = Some(1);
        let result = runner.run(&req);
        assert_eq!(result.verdict, Verdict::TimeLimitExceeded);
        assert!(result.time_used_ms >= 1000);
    }

    #[test]
    fn test_compiled_language_happy_path() {
        let runner = Runner::new(test_config()).unwrap();
        let mut req = request("shc", "#!/bin/sh\necho compiled");
        req.expected_output = Some("compiled".to_string());
        let result = runner.run(&req);
        assert_eq!(result.verdict, Verdict::Accepted);
    }

    #[test]
    fn test_compile_error_carries_diagnostics() {
        let mut config = test_config();
        config.languages.insert(
            "brokenc".to_string(),
            LanguageSpec {
                src_name: "main.sh".to_string(),
                exe_name: "prog".to_string(),
                compile_command: "echo 'main.sh:1: parse error' >&2; exit 1".to_string(),
                run_command: "{{EXE_PATH}}".to_string(),
                ..LanguageSpec::default()
            },
        );
        let runner = Runner::new(config).unwrap();
        let result = runner.run(&request("brokenc", "int main(){ return }"));
        assert_eq!(result.verdict, Verdict::CompileError);
        assert!(result.compile_output.contains("parse error"));
        // Non-timeout compile failures duplicate diagnostics into `error`.
        assert_eq!(result.error, result.compile_output);
        assert!(result.stdout.is_empty());
    }

    #[test]
    fn test_compile_timeout_keeps_error_distinct() {
        let mut config = test_config();
        config.languages.insert(
            "slowc".to_string(),
            LanguageSpec {
                src_name: "main.sh".to_string(),
                exe_name: "prog".to_string(),
                compile_command: "sleep 5".to_string(),
                run_command: "{{EXE_PATH}}".to_string(),
                compile_timeout_secs: 1,
                ..LanguageSpec::default()
            },
        );
        let runner = Runner::new(config).unwrap();
        let result = runner.run(&request("slowc", ""));
        assert_eq!(result.verdict, Verdict::CompileError);
        assert!(result.error.contains("timed out"));
    }

    #[test]
    fn test_workspace_is_removed_after_run() {
        let mut config = test_config();
        // Private base so parallel tests cannot race the emptiness check.
        config.base_dir = std::env::temp_dir().join("croj-sandbox-runner-teardown-test");
        let base = config.base_dir.clone();
        let runner = Runner::new(config).unwrap();
        let result = runner.run(&request("sh", "echo leftover"));
        assert_eq!(result.verdict, Verdict::Accepted);
        let leftovers: Vec<_> = std::fs::read_dir(&base)
            .map(|entries| entries.flatten().collect())
            .unwrap_or_default();
        assert!(
            leftovers.is_empty(),
            "workspace leaked: {:?}",
            leftovers.iter().map(|e| e.path()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_identical_runs_agree() {
        let runner = Runner::new(test_config()).unwrap();
        let mut req = request("sh", "echo stable");
        req.expected_output = Some("stable".to_string());
        let first = runner.run(&req);
        let second = runner.run(&req);
        assert_eq!(first.verdict, second.verdict);
        assert_eq!(first.stdout, second.stdout);
        assert_eq!(first.exit_code, second.exit_code);
    }
}
