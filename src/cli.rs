/// Command-line front-end: run one source file through the sandbox and
/// print the JSON response.
use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;

use crate::api::{Request, SandboxApi};

#[derive(Parser, Debug)]
#[command(
    name = "croj-sandbox",
    version,
    about = "Compile and run source code in the local judge sandbox"
)]
pub struct Cli {
    /// Source file to compile and run
    pub source: PathBuf,

    /// Programming language (go, cpp, python, java, javascript)
    #[arg(long, default_value = "go")]
    pub lang: String,

    /// Execution time limit in seconds
    #[arg(long)]
    pub time: Option<u64>,

    /// Memory limit in MB
    #[arg(long)]
    pub mem: Option<u64>,

    /// File fed to the program as standard input
    #[arg(long)]
    pub stdin_file: Option<PathBuf>,

    /// File holding the expected stdout; enables comparison
    #[arg(long)]
    pub expect_file: Option<PathBuf>,
}

pub fn run() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let source_code = fs::read_to_string(&cli.source)
        .with_context(|| format!("failed to read source file {}", cli.source.display()))?;
    let stdin = cli
        .stdin_file
        .as_ref()
        .map(fs::read_to_string)
        .transpose()
        .context("failed to read stdin file")?;
    let expected_output = cli
        .expect_file
        .as_ref()
        .map(fs::read_to_string)
        .transpose()
        .context("failed to read expected-output file")?;

    let api = SandboxApi::new().context("failed to initialize sandbox")?;
    if !api.languages().contains(&cli.lang) {
        bail!(
            "unsupported language '{}' (supported: {})",
            cli.lang,
            api.languages().join(", ")
        );
    }

    let response = api.execute(Request {
        source_code,
        language: cli.lang,
        stdin,
        timeout: cli.time,
        memory_limit: cli.mem,
        expected_output,
    });

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["croj-sandbox", "main.go"]);
        assert_eq!(cli.lang, "go");
        assert!(cli.time.is_none());
        assert!(cli.mem.is_none());
    }

    #[test]
    fn test_flags_parse() {
        let cli = Cli::parse_from([
            "croj-sandbox",
            "main.py",
            "--lang",
            "python",
            "--time",
            "5",
            "--mem",
            "256",
        ]);
        assert_eq!(cli.lang, "python");
        assert_eq!(cli.time, Some(5));
        assert_eq!(cli.mem, Some(256));
    }
}
