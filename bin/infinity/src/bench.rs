//! `infinity bench`

use alloy_primitives::U256;
use clap::Parser;
use infinity_miner::{
    PrivateKey, Problem, ProblemDistributor, SolutionRecorder, WorkerConfig, WorkerPool, format_hashrate,
};
use rand::rngs::OsRng;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::info;

/// Benchmark arguments
#[derive(Debug, Parser)]
pub(crate) struct BenchArgs {
    /// Number of worker threads (0 = one per CPU)
    #[arg(long, short = 't', default_value = "0")]
    threads: usize,

    /// Difficulty threshold (decimal or 0x hex)
    #[arg(long, short = 'd', default_value = "0x100000000000000000000000000000000000")]
    difficulty: U256,

    /// Seconds to run
    #[arg(long, default_value = "10")]
    duration: u64,
}

impl BenchArgs {
    /// Search a random local problem for `duration` seconds
    pub(crate) async fn run(self) -> eyre::Result<()> {
        let workers = if self.threads == 0 { WorkerConfig::default() } else { WorkerConfig::with_threads(self.threads) };
        let base_key = PrivateKey::random(&mut OsRng)?;

        let distributor = ProblemDistributor::new();
        let (tx, mut rx) = mpsc::channel(1024);
        let mut pool = WorkerPool::spawn(&workers, distributor.cell(), tx, SolutionRecorder::disabled())?;

        info!(
            target: "infinity::bench",
            threads = pool.len(),
            difficulty = %self.difficulty,
            duration_secs = self.duration,
            "Starting benchmark"
        );

        let started = Instant::now();
        distributor.publish(Problem::new(U256::ZERO, base_key, self.difficulty));

        let counter = tokio::spawn(async move {
            let mut found = 0u64;
            while rx.recv().await.is_some() {
                found += 1;
            }
            found
        });

        tokio::time::sleep(Duration::from_secs(self.duration)).await;
        let pool = tokio::task::spawn_blocking(move || {
            pool.shutdown();
            pool
        })
        .await?;
        let elapsed = started.elapsed();
        let received = counter.await?;

        info!(
            target: "infinity::bench",
            attempts = pool.attempts(),
            solutions = pool.solutions(),
            received,
            elapsed_secs = elapsed.as_secs_f64(),
            hashrate = %format_hashrate(pool.attempts(), elapsed),
            "Benchmark complete"
        );
        Ok(())
    }
}
