/// JSON-shaped request/response boundary for the sandbox
///
/// This is the interface the HTTP front-end and the CLI consume. Requests
/// are clamped here; the runner below never sees out-of-range limits.
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::SandboxConfig;
use crate::runner::Runner;
use crate::types::{Result, RunRequest, RunResult, SandboxError};

/// Hard ceiling on a caller-supplied timeout, in seconds.
pub const MAX_REQUEST_TIMEOUT_SECS: u64 = 30;
/// Hard ceiling on a caller-supplied memory limit, in MB.
pub const MAX_REQUEST_MEMORY_MB: u64 = 4096;

fn default_language() -> String {
    "go".to_string()
}

/// A code execution request.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub source_code: String,
    /// Programming language tag; defaults to "go".
    #[serde(default = "default_language")]
    pub language: String,
    /// Optional standard input.
    #[serde(default)]
    pub stdin: Option<String>,
    /// Optional custom timeout in seconds, clamped to 30.
    #[serde(default)]
    pub timeout: Option<u64>,
    /// Optional memory limit in MB, clamped to 4096.
    #[serde(default)]
    pub memory_limit: Option<u64>,
    /// Optional expected output for comparison.
    #[serde(default)]
    pub expected_output: Option<String>,
}

/// The execution result returned to callers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    /// Verdict string, e.g. "Accepted" or "Runtime Error".
    pub status: String,
    /// Process exit code (-1 when not applicable).
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Human-readable diagnostic, if any.
    pub error: String,
    /// Execution time in milliseconds.
    pub time_used: i64,
    /// Peak memory in KB (-1 if unmeasured).
    pub memory_used: i64,
    /// Full compile diagnostics, if a compile phase ran.
    pub compile_error: String,
}

impl From<RunResult> for Response {
    fn from(result: RunResult) -> Self {
        Self {
            status: result.verdict.to_string(),
            exit_code: result.exit_code,
            stdout: result.stdout,
            stderr: result.stderr,
            error: result.error,
            time_used: result.time_used_ms,
            memory_used: result.memory_used_kb,
            compile_error: result.compile_output,
        }
    }
}

/// Facade over the runner for request/response callers.
pub struct SandboxApi {
    runner: Runner,
}

impl SandboxApi {
    pub fn new() -> Result<Self> {
        Self::with_config(SandboxConfig::default())
    }

    pub fn with_config(config: SandboxConfig) -> Result<Self> {
        Ok(Self {
            runner: Runner::new(config)?,
        })
    }

    pub fn config(&self) -> &SandboxConfig {
        self.runner.config()
    }

    /// Language tags this instance accepts, for the `/languages` surface.
    pub fn languages(&self) -> Vec<String> {
        self.runner.config().supported_languages()
    }

    /// Execute one request and synthesize the response.
    ///
    /// A caller-supplied `timeout` becomes this run's global run timeout
    /// with `user_specified_timeout` set, so it wins over the language
    /// default downstream.
    pub fn execute(&self, request: Request) -> Response {
        let mut config = self.runner.config().clone();
        if let Some(secs) = request.timeout.filter(|&t| t > 0) {
            config.run_timeout = Duration::from_secs(secs.min(MAX_REQUEST_TIMEOUT_SECS));
            config.user_specified_timeout = true;
        }

        let run_request = RunRequest {
            source_code: request.source_code,
            language: request.language,
            stdin: request.stdin,
            expected_output: request.expected_output,
            time_limit_secs: None,
            memory_limit_mb: request
                .memory_limit
                .filter(|&m| m > 0)
                .map(|m| m.min(MAX_REQUEST_MEMORY_MB)),
        };
        self.runner.run_with_config(&run_request, &config).into()
    }

    /// JSON-in, JSON-out convenience wrapper.
    pub fn execute_json(&self, json_request: &str) -> Result<String> {
        let request: Request = serde_json::from_str(json_request)
            .map_err(|e| SandboxError::Config(format!("failed to parse request JSON: {e}")))?;
        let response = self.execute(request);
        serde_json::to_string(&response)
            .map_err(|e| SandboxError::Config(format!("failed to serialize response: {e}")))
    }
}
