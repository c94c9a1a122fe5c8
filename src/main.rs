use clap::Parser;
use tracing_subscriber::EnvFilter;

use drawdown::api::{self, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = api::run(cli).await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
