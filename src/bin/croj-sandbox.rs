use anyhow::Result;

fn main() -> Result<()> {
    croj_sandbox::cli::run()
}
