use clap::Parser;
use color_eyre::Result;
use keyward_cli::{Cli, handle_command};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = Cli::parse();
    if let Err(err) = handle_command(cli).await {
        eprintln!("❌ Error: {err}");
        std::process::exit(1);
    }
    Ok(())
}

/// Logs go to stderr so `--json` output stays parseable. Level via `KEYWARD_LOG`.
fn init_tracing() {
    let filter = EnvFilter::try_from_env("KEYWARD_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
