/// Core result model and error types for the sandbox
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Final status of a single sandbox run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    #[serde(rename = "Accepted")]
    Accepted,
    #[serde(rename = "Wrong Answer")]
    WrongAnswer,
    #[serde(rename = "Compile Error")]
    CompileError,
    #[serde(rename = "Runtime Error")]
    RuntimeError,
    #[serde(rename = "Time Limit Exceeded")]
    TimeLimitExceeded,
    #[serde(rename = "Memory Limit Exceeded")]
    MemoryLimitExceeded,
    #[serde(rename = "Output Limit Exceeded")]
    OutputLimitExceeded,
    #[serde(rename = "Sandbox Error")]
    SandboxError,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Verdict::Accepted => "Accepted",
            Verdict::WrongAnswer => "Wrong Answer",
            Verdict::CompileError => "Compile Error",
            Verdict::RuntimeError => "Runtime Error",
            Verdict::TimeLimitExceeded => "Time Limit Exceeded",
            Verdict::MemoryLimitExceeded => "Memory Limit Exceeded",
            Verdict::OutputLimitExceeded => "Output Limit Exceeded",
            Verdict::SandboxError => "Sandbox Error",
        };
        write!(f, "{s}")
    }
}

/// A single code-execution request handed to the runner.
///
/// `time_limit_secs` and `memory_limit_mb`, when present, override the
/// language and global defaults for this run only.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RunRequest {
    pub source_code: String,
    pub language: String,
    pub stdin: Option<String>,
    pub expected_output: Option<String>,
    pub time_limit_secs: Option<u64>,
    pub memory_limit_mb: Option<u64>,
}

/// Outcome of a code execution in the sandbox.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunResult {
    /// Final verdict for the run.
    pub verdict: Verdict,
    /// Exit code of the user program (-1 if it never ran or has no code).
    pub exit_code: i32,
    /// Captured standard output, possibly truncated to the configured cap.
    pub stdout: String,
    /// Captured standard error, possibly truncated to the configured cap.
    pub stderr: String,
    /// Human-readable diagnostic, or the compile diagnostics for
    /// non-timeout compile failures.
    pub error: String,
    /// Wall-clock time of the execute phase in milliseconds (-1 if not run).
    pub time_used_ms: i64,
    /// Peak resident memory of the process tree in KB (-1 if unmeasured).
    pub memory_used_kb: i64,
    /// Full captured compile diagnostics.
    pub compile_output: String,
}

impl RunResult {
    /// Build a result with the not-run sentinels filled in.
    pub fn new(verdict: Verdict, error: impl Into<String>) -> Self {
        Self {
            verdict,
            exit_code: -1,
            stdout: String::new(),
            stderr: String::new(),
            error: error.into(),
            time_used_ms: -1,
            memory_used_kb: -1,
            compile_output: String::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.verdict == Verdict::Accepted
    }
}

/// Internal sandbox failures that surface as `Verdict::SandboxError`.
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Command template error: {0}")]
    Template(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Cgroup error: {0}")]
    Cgroup(String),

    #[error("Seccomp error: {0}")]
    Seccomp(String),
}

/// Result type alias for sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Compile-phase failure kinds. These never surface as `SandboxError`;
/// the runner folds them into a `Verdict::CompileError` result.
#[derive(Error, Debug)]
pub enum CompileFailure {
    #[error("compilation timed out (limit: {limit_secs}s)")]
    Timeout { limit_secs: u64 },

    #[error("compilation failed: {detail}")]
    Failed { detail: String },

    #[error("compiled binary not found at '{path}'")]
    ArtifactMissing { path: String },
}

impl CompileFailure {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CompileFailure::Timeout { .. })
    }
}

#[cfg(unix)]
impl From<nix::errno::Errno> for SandboxError {
    fn from(err: nix::errno::Errno) -> Self {
        SandboxError::Process(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_display_strings() {
        assert_eq!(Verdict::Accepted.to_string(), "Accepted");
        assert_eq!(Verdict::WrongAnswer.to_string(), "Wrong Answer");
        assert_eq!(Verdict::CompileError.to_string(), "Compile Error");
        assert_eq!(Verdict::TimeLimitExceeded.to_string(), "Time Limit Exceeded");
        assert_eq!(
            Verdict::MemoryLimitExceeded.to_string(),
            "Memory Limit Exceeded"
        );
        assert_eq!(
            Verdict::OutputLimitExceeded.to_string(),
            "Output Limit Exceeded"
        );
        assert_eq!(Verdict::SandboxError.to_string(), "Sandbox Error");
    }

    #[test]
    fn test_verdict_serde_matches_display() {
        let json = serde_json::to_string(&Verdict::WrongAnswer).unwrap();
        assert_eq!(json, "\"Wrong Answer\"");
        let back: Verdict = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Verdict::WrongAnswer);
    }

    #[test]
    fn test_new_result_sentinels() {
        let res = RunResult::new(Verdict::SandboxError, "boom");
        assert_eq!(res.exit_code, -1);
        assert_eq!(res.time_used_ms, -1);
        assert_eq!(res.memory_used_kb, -1);
        assert_eq!(res.error, "boom");
        assert!(!res.is_ok());
    }

    #[test]
    fn test_compile_failure_timeout_flag() {
        assert!(CompileFailure::Timeout { limit_secs: 10 }.is_timeout());
        assert!(!CompileFailure::Failed {
            detail: "x".to_string()
        }
        .is_timeout());
    }
}
