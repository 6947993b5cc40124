/// Command template expansion and tokenization
use std::collections::HashMap;

use crate::types::{Result, SandboxError};

/// Source code file path.
pub const PLACEHOLDER_SRC_PATH: &str = "{{SRC_PATH}}";
/// Executable/output file path.
pub const PLACEHOLDER_EXE_PATH: &str = "{{EXE_PATH}}";
/// Working directory path.
pub const PLACEHOLDER_WORK_DIR: &str = "{{WORK_DIR}}";
/// Directory containing the executable.
pub const PLACEHOLDER_EXE_DIR: &str = "{{EXE_DIR}}";
/// Maximum memory in KB.
pub const PLACEHOLDER_MAX_MEM: &str = "{{MAX_MEM}}";

/// Replace `{{KEY}}` placeholders in a command template. Placeholders
/// missing from the substitution map are left literal.
pub fn expand(template: &str, substitutions: &HashMap<&str, String>) -> String {
    let mut result = template.to_string();
    for (placeholder, value) in substitutions {
        result = result.replace(placeholder, value);
    }
    result
}

/// Expand a run template and split it into argv on whitespace. No shell
/// quoting is applied; run commands must not rely on shell metacharacters.
pub fn tokenize(template: &str, substitutions: &HashMap<&str, String>) -> Result<Vec<String>> {
    let expanded = expand(template, substitutions);
    if expanded.trim().is_empty() {
        return Err(SandboxError::Template(
            "command is empty after expansion".to_string(),
        ));
    }
    let parts: Vec<String> = expanded.split_whitespace().map(str::to_string).collect();
    if parts.is_empty() {
        return Err(SandboxError::Template(
            "no command parts after splitting".to_string(),
        ));
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subs(pairs: &[(&'static str, &str)]) -> HashMap<&'static str, String> {
        pairs.iter().map(|(k, v)| (*k, v.to_string())).collect()
    }

    #[test]
    fn test_expand_replaces_all_occurrences() {
        let s = subs(&[(PLACEHOLDER_EXE_PATH, "/tmp/run/main")]);
        assert_eq!(
            expand("{{EXE_PATH}} {{EXE_PATH}}", &s),
            "/tmp/run/main /tmp/run/main"
        );
    }

    #[test]
    fn test_expand_leaves_unknown_placeholders_literal() {
        let s = subs(&[(PLACEHOLDER_SRC_PATH, "/tmp/run/main.go")]);
        assert_eq!(
            expand("cc {{SRC_PATH}} {{MYSTERY}}", &s),
            "cc /tmp/run/main.go {{MYSTERY}}"
        );
    }

    #[test]
    fn test_tokenize_splits_on_whitespace() {
        let s = subs(&[
            (PLACEHOLDER_SRC_PATH, "/w/main.py"),
            (PLACEHOLDER_MAX_MEM, "524288"),
        ]);
        let argv = tokenize("python3  {{SRC_PATH}}\t--mem {{MAX_MEM}}", &s).unwrap();
        assert_eq!(argv, vec!["python3", "/w/main.py", "--mem", "524288"]);
    }

    #[test]
    fn test_tokenize_rejects_empty_expansion() {
        let s = subs(&[]);
        assert!(tokenize("", &s).is_err());
        assert!(tokenize("   \t ", &s).is_err());
    }
}
