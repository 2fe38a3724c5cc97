//! `pcf-anchor` entry point.

use clap::Parser;
use pcf_cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so `--json` output stays clean on stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let code = pcf_cli::dispatch(cli).await?;
    std::process::exit(code);
}
