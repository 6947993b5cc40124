//! croj-sandbox: a local code-execution sandbox and judge engine.
//!
//! Given source code, a language tag, optional stdin and resource limits,
//! the runner stages a workspace, compiles when the language needs it,
//! executes the program under wall-clock/memory/output supervision with
//! cgroup and seccomp isolation, and classifies the outcome into a fixed
//! verdict taxonomy.

pub mod api;
pub mod cli;
pub mod compare;
pub mod compile;
pub mod config;
pub mod exec;
pub mod monitor;
pub mod runner;
pub mod security;
pub mod sink;
pub mod template;
pub mod types;
pub mod workspace;

pub use api::{Request, Response, SandboxApi};
pub use config::{LanguageSpec, SandboxConfig};
pub use runner::Runner;
pub use types::{Result, RunRequest, RunResult, SandboxError, Verdict};
