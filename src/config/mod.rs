//! Sandbox configuration: global defaults, per-language command specs and
//! the effective-limit resolution rules.

pub mod languages;
pub mod types;

pub use types::{
    EffectiveLimits, LanguageSpec, SandboxConfig, SecuritySettings,
    DEFAULT_WORKSPACE_BASE,
};
