/// Default language command table
use std::collections::HashMap;

use super::types::LanguageSpec;

/// Build the default language configurations.
///
/// Command templates use the placeholders from [`crate::template`];
/// compile commands go through a shell, run commands are tokenized argv.
pub fn default_languages() -> HashMap<String, LanguageSpec> {
    let mut languages = HashMap::new();

    languages.insert(
        "go".to_string(),
        LanguageSpec {
            src_name: "main.go".to_string(),
            exe_name: "main".to_string(),
            compile_command: "go build -ldflags \"-s -w\" -o {{EXE_PATH}} {{SRC_PATH}}"
                .to_string(),
            run_command: "{{EXE_PATH}}".to_string(),
            requires_artifact: true,
            ..LanguageSpec::default()
        },
    );

    languages.insert(
        "cpp".to_string(),
        LanguageSpec {
            src_name: "main.cpp".to_string(),
            exe_name: "main".to_string(),
            compile_command: "g++ -Wall -O2 -std=c++17 {{SRC_PATH}} -o {{EXE_PATH}}".to_string(),
            run_command: "{{EXE_PATH}}".to_string(),
            requires_artifact: true,
            ..LanguageSpec::default()
        },
    );

    // Interpreted, no compile phase.
    languages.insert(
        "python".to_string(),
        LanguageSpec {
            src_name: "main.py".to_string(),
            exe_name: "main.py".to_string(),
            run_command: "python3 {{SRC_PATH}}".to_string(),
            ..LanguageSpec::default()
        },
    );

    // javac leaves Main.class next to the source; the run command loads it
    // by classpath, so no artifact path assert is needed.
    languages.insert(
        "java".to_string(),
        LanguageSpec {
            src_name: "Main.java".to_string(),
            exe_name: "Main.class".to_string(),
            compile_command: "javac {{SRC_PATH}}".to_string(),
            run_command: "java -cp {{EXE_DIR}} Main".to_string(),
            ..LanguageSpec::default()
        },
    );

    languages.insert(
        "javascript".to_string(),
        LanguageSpec {
            src_name: "main.js".to_string(),
            exe_name: "main.js".to_string(),
            run_command: "node {{SRC_PATH}}".to_string(),
            ..LanguageSpec::default()
        },
    );

    languages
}
