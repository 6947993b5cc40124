/// Sandbox configuration and per-language command specifications
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::types::RunRequest;

/// Default compile timeout in seconds.
pub const DEFAULT_COMPILE_TIME_LIMIT_SECS: u64 = 10;
/// Default execution timeout in seconds.
pub const DEFAULT_EXECUTE_TIME_LIMIT_SECS: u64 = 3;
/// Default memory limit in MB.
pub const DEFAULT_MEMORY_LIMIT_MB: u64 = 512;
/// Default cap on captured stdout, in KB.
pub const DEFAULT_MAX_STDOUT_KB: usize = 64;
/// Default cap on captured stderr, in KB.
pub const DEFAULT_MAX_STDERR_KB: usize = 64;
/// Default base directory for per-run workspaces.
pub const DEFAULT_WORKSPACE_BASE: &str = "/tmp/croj-sandbox-local-runs";

/// How a language's source is compiled and run.
///
/// An empty `compile_command` marks an interpreted language: the compile
/// phase is skipped and the source file itself becomes the run target.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LanguageSpec {
    /// Source file name written into the workspace (e.g. "main.go").
    pub src_name: String,
    /// Artifact file name produced by the compile command.
    pub exe_name: String,
    /// Compile command template; empty for interpreted languages.
    #[serde(default)]
    pub compile_command: String,
    /// Run command template. Required, non-empty.
    pub run_command: String,
    /// Extra environment variables for the run phase.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Compile timeout in seconds (0 = global default).
    #[serde(default)]
    pub compile_timeout_secs: u64,
    /// Run timeout in seconds (0 = global default).
    #[serde(default)]
    pub run_timeout_secs: u64,
    /// Memory limit in MB (0 = global default).
    #[serde(default)]
    pub memory_mb: u64,
    /// Whether a successful compile must leave `exe_name` on disk.
    #[serde(default)]
    pub requires_artifact: bool,
}

impl LanguageSpec {
    pub fn is_interpreted(&self) -> bool {
        self.compile_command.is_empty()
    }

    /// Compile timeout, falling back to the global default when unset.
    pub fn compile_timeout(&self, default: Duration) -> Duration {
        if self.compile_timeout_secs == 0 {
            default
        } else {
            Duration::from_secs(self.compile_timeout_secs)
        }
    }

    /// Run timeout. A user-supplied global timeout always wins over the
    /// language default; otherwise the language value applies when set.
    pub fn run_timeout(&self, default: Duration, user_specified: bool) -> Duration {
        if user_specified || self.run_timeout_secs == 0 {
            default
        } else {
            Duration::from_secs(self.run_timeout_secs)
        }
    }

    /// Memory limit in bytes, falling back to the global default when unset.
    pub fn memory_limit(&self, default_bytes: u64) -> u64 {
        if self.memory_mb == 0 {
            default_bytes
        } else {
            self.memory_mb * 1024 * 1024
        }
    }
}

/// Gates for the security layer. Cgroups degrade with a warning when the
/// host offers none; the syscall filter is explicit opt-in. With
/// `enforcing` set, any security setup failure aborts the run before user
/// code executes.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SecuritySettings {
    pub enable_cgroups: bool,
    pub enable_syscall_filter: bool,
    pub enforcing: bool,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            enable_cgroups: true,
            enable_syscall_filter: false,
            enforcing: false,
        }
    }
}

/// Configuration for the sandbox system.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Base directory under which per-run workspaces are created.
    pub base_dir: PathBuf,
    /// Global default compile timeout.
    pub compile_timeout: Duration,
    /// Global default run timeout.
    pub run_timeout: Duration,
    /// True when `run_timeout` was supplied by the caller rather than
    /// defaulted; a caller-supplied value overrides language defaults.
    pub user_specified_timeout: bool,
    /// Global default memory limit in bytes.
    pub memory_limit_bytes: u64,
    /// Byte cap for captured stdout.
    pub max_stdout_size: usize,
    /// Byte cap for captured stderr.
    pub max_stderr_size: usize,
    /// Configured languages, keyed by tag.
    pub languages: HashMap<String, LanguageSpec>,
    /// Security layer gates.
    pub security: SecuritySettings,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from(DEFAULT_WORKSPACE_BASE),
            compile_timeout: Duration::from_secs(DEFAULT_COMPILE_TIME_LIMIT_SECS),
            run_timeout: Duration::from_secs(DEFAULT_EXECUTE_TIME_LIMIT_SECS),
            user_specified_timeout: false,
            memory_limit_bytes: DEFAULT_MEMORY_LIMIT_MB * 1024 * 1024,
            max_stdout_size: DEFAULT_MAX_STDOUT_KB * 1024,
            max_stderr_size: DEFAULT_MAX_STDERR_KB * 1024,
            languages: super::languages::default_languages(),
            security: SecuritySettings::default(),
        }
    }
}

impl SandboxConfig {
    /// Language tags this configuration can run, sorted for stable output.
    pub fn supported_languages(&self) -> Vec<String> {
        let mut langs: Vec<String> = self.languages.keys().cloned().collect();
        langs.sort();
        langs
    }
}

/// Per-run limits after resolving request overrides, language defaults and
/// global defaults. The user-override rule lives here and nowhere else.
#[derive(Clone, Copy, Debug)]
pub struct EffectiveLimits {
    pub compile_timeout: Duration,
    pub run_timeout: Duration,
    pub memory_limit_bytes: u64,
}

impl EffectiveLimits {
    pub fn resolve(config: &SandboxConfig, spec: &LanguageSpec, request: &RunRequest) -> Self {
        let run_timeout = match request.time_limit_secs {
            Some(secs) if secs > 0 => Duration::from_secs(secs),
            _ => spec.run_timeout(config.run_timeout, config.user_specified_timeout),
        };
        let memory_limit_bytes = match request.memory_limit_mb {
            Some(mb) if mb > 0 => mb * 1024 * 1024,
            _ => spec.memory_limit(config.memory_limit_bytes),
        };
        Self {
            compile_timeout: spec.compile_timeout(config.compile_timeout),
            run_timeout,
            memory_limit_bytes,
        }
    }

    pub fn memory_limit_kb(&self) -> i64 {
        (self.memory_limit_bytes / 1024) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec_with(run_secs: u64, mem_mb: u64) -> LanguageSpec {
        LanguageSpec {
            src_name: "main.x".to_string(),
            exe_name: "main".to_string(),
            run_command: "main".to_string(),
            run_timeout_secs: run_secs,
            memory_mb: mem_mb,
            ..LanguageSpec::default()
        }
    }

    #[test]
    fn test_language_defaults_fall_back_to_global() {
        let cfg = SandboxConfig::default();
        let spec = spec_with(0, 0);
        let limits = EffectiveLimits::resolve(&cfg, &spec, &RunRequest::default());
        assert_eq!(limits.run_timeout, cfg.run_timeout);
        assert_eq!(limits.memory_limit_bytes, cfg.memory_limit_bytes);
        assert_eq!(limits.compile_timeout, cfg.compile_timeout);
    }

    #[test]
    fn test_language_values_win_over_global() {
        let cfg = SandboxConfig::default();
        let spec = spec_with(7, 128);
        let limits = EffectiveLimits::resolve(&cfg, &spec, &RunRequest::default());
        assert_eq!(limits.run_timeout, Duration::from_secs(7));
        assert_eq!(limits.memory_limit_bytes, 128 * 1024 * 1024);
    }

    #[test]
    fn test_user_specified_timeout_wins_over_language() {
        let mut cfg = SandboxConfig::default();
        cfg.run_timeout = Duration::from_secs(1);
        cfg.user_specified_timeout = true;
        let spec = spec_with(7, 0);
        let limits = EffectiveLimits::resolve(&cfg, &spec, &RunRequest::default());
        assert_eq!(limits.run_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_request_override_wins_over_everything() {
        let mut cfg = SandboxConfig::default();
        cfg.user_specified_timeout = true;
        let spec = spec_with(7, 256);
        let request = RunRequest {
            time_limit_secs: Some(2),
            memory_limit_mb: Some(64),
            ..RunRequest::default()
        };
        let limits = EffectiveLimits::resolve(&cfg, &spec, &request);
        assert_eq!(limits.run_timeout, Duration::from_secs(2));
        assert_eq!(limits.memory_limit_bytes, 64 * 1024 * 1024);
        assert_eq!(limits.memory_limit_kb(), 64 * 1024);
    }

    #[test]
    fn test_zero_request_override_is_ignored() {
        let cfg = SandboxConfig::default();
        let spec = spec_with(0, 0);
        let request = RunRequest {
            time_limit_secs: Some(0),
            memory_limit_mb: Some(0),
            ..RunRequest::default()
        };
        let limits = EffectiveLimits::resolve(&cfg, &spec, &request);
        assert_eq!(limits.run_timeout, cfg.run_timeout);
        assert_eq!(limits.memory_limit_bytes, cfg.memory_limit_bytes);
    }

    #[test]
    fn test_supported_languages_sorted() {
        let cfg = SandboxConfig::default();
        let langs = cfg.supported_languages();
        assert_eq!(langs, vec!["cpp", "go", "java", "javascript", "python"]);
    }
}
