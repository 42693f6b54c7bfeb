//! Infinity PoW miner
//!
//! Usage:
//!   infinity run --ws-url wss://... --rpc-url https://... --contract 0x...
//!   infinity bench --threads 4 --duration 30

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod bench;
mod run;

/// Infinity PoW miner
#[derive(Debug, Parser)]
#[command(name = "infinity")]
#[command(about = "Solves and claims Infinity proof-of-work problems")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Mine against the contract
    Run(run::RunArgs),
    /// Measure the local search rate without a chain
    Bench(bench::BenchArgs),
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).with_target(true).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match Cli::parse().command {
        Command::Run(args) => args.run().await,
        Command::Bench(args) => args.run().await,
    }
}
