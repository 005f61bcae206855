//! Gateway binary entry point.

mod cli;

use clap::Parser;

#[tokio::main]
async fn main() {
    // Optional .env for CAROLUS_OFFLINE_* overrides.
    dotenvy::dotenv().ok();

    let args = cli::Cli::parse();
    if let Err(e) = cli::run(args).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
