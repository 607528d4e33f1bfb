mod cli;
mod config;
mod engine;
mod events;
mod model;
mod orchestrator;
mod paths;
mod text_summary;

use anyhow::Result;
use clap::Parser;

fn init_tracing(silent: bool) {
    let default_level = if silent { "warn" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let is_silent = args.silent;
    init_tracing(is_silent);

    match cli::run(args).await {
        Ok(()) => {
            // A pending stdin read would otherwise hold the runtime open.
            std::process::exit(0);
        }
        Err(e) => {
            if is_silent {
                println!("{}", e);
                std::process::exit(1);
            } else {
                Err(e)
            }
        }
    }
}
