//! `infinity run`

use alloy_primitives::{Address, Bytes, utils::format_ether};
use alloy_signer_local::PrivateKeySigner;
use clap::Parser;
use eyre::WrapErr;
use infinity_chain::{
    ChainSubmitter, DEFAULT_GAS_LIMIT, ProblemSource, SubmitterConfig,
};
use infinity_miner::{MinerConfig, spawn_miner};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Mining command arguments
#[derive(Debug, Parser)]
pub(crate) struct RunArgs {
    /// Websocket endpoint for the problem feed
    #[arg(long, env = "INFINITY_WS")]
    ws_url: String,

    /// HTTP endpoint for submissions
    #[arg(long, env = "INFINITY_RPC")]
    rpc_url: String,

    /// Key of the submitting account (hex)
    #[arg(long, env = "INFINITY_PRIVATE_KEY", hide_env_values = true)]
    private_key: PrivateKeySigner,

    /// PoW contract address
    #[arg(long, env = "INFINITY_POW_ADDRESS")]
    contract: Address,

    /// Payload attached to every claim (hex)
    #[arg(long, env = "INFINITY_DATA", default_value = "0x")]
    data: Bytes,

    /// Number of worker threads (0 = one per CPU)
    #[arg(long, short = 't', default_value = "0")]
    threads: usize,

    /// File every found solution is appended to
    #[arg(long, default_value = "solution.log")]
    solution_log: PathBuf,

    /// Seconds between stats reports
    #[arg(long, default_value = "10")]
    stats_interval: u64,

    /// Gas limit per claim
    #[arg(long, default_value_t = DEFAULT_GAS_LIMIT)]
    gas_limit: u64,

    /// Seconds to wait for a claim receipt
    #[arg(long, default_value = "60")]
    receipt_timeout: u64,

    /// Resubmissions allowed per problem after an unverified attempt
    #[arg(long, default_value = "1")]
    transient_retries: u32,
}

impl RunArgs {
    /// Run the miner until interrupted
    pub(crate) async fn run(self) -> eyre::Result<()> {
        let submitter_config = SubmitterConfig {
            rpc_url: self.rpc_url,
            contract: self.contract,
            data: self.data,
            gas_limit: self.gas_limit,
            receipt_timeout: Duration::from_secs(self.receipt_timeout),
        };
        let submitter = Arc::new(
            ChainSubmitter::connect(submitter_config, self.private_key)
                .await
                .wrap_err("failed to connect submitter")?,
        );
        let account_nonce = submitter.pending_nonce().await.wrap_err("failed to read account nonce")?;
        log_balance(&submitter).await;

        let source =
            ProblemSource::connect(&self.ws_url, self.contract).await.wrap_err("failed to connect problem feed")?;

        let config = MinerConfig::default()
            .with_threads(self.threads)
            .with_solution_log(Some(self.solution_log));
        let config = MinerConfig { transient_retries: self.transient_retries, ..config };
        let miner = spawn_miner(config, Arc::clone(&submitter), account_nonce)?;

        info!(
            target: "infinity::run",
            account = %submitter.account(),
            contract = %self.contract,
            workers = miner.workers(),
            account_nonce,
            "Starting Infinity miner"
        );

        // the feed reads the open problem itself once subscribed
        let mut feed = tokio::spawn(source.run(miner.distributor().clone()));
        let mut report = tokio::time::interval(Duration::from_secs(self.stats_interval.max(1)));
        report.tick().await;

        let result = loop {
            tokio::select! {
                _ = report.tick() => {
                    miner.stats().log_summary();
                    log_balance(&submitter).await;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!(target: "infinity::run", "Interrupted");
                    break Ok(());
                }
                joined = &mut feed => {
                    let err = match joined {
                        Ok(()) => eyre::eyre!("problem feed stopped"),
                        Err(e) => eyre::Report::new(e),
                    };
                    error!(target: "infinity::run", error = %err, "Problem feed lost");
                    break Err(err);
                }
            }
        };

        feed.abort();
        let stats = miner.shutdown().await?;
        stats.log_summary();
        result
    }
}

async fn log_balance(submitter: &ChainSubmitter) {
    match submitter.balance().await {
        Ok(balance) => info!(target: "infinity::run", balance = %format_ether(balance), "Account balance"),
        Err(e) => warn!(target: "infinity::run", error = %e, "Failed to read balance"),
    }
}
