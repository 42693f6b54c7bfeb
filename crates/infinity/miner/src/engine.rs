//! Miner assembly
//!
//! Wires the distributor, worker pool, coordinator and gate together and hands
//! back a [`MinerHandle`] for publishing problems and reading counters.

use crate::{
    MinerError,
    coordinator::{Coordinator, CoordinatorService, CoordinatorStats},
    distributor::ProblemDistributor,
    gate::{SubmissionGate, SubmissionSink},
    problem::Problem,
    solution_log::{SolutionLog, SolutionRecorder, SolutionWriter},
    stats::MinerStats,
    worker::{WorkerConfig, WorkerPool},
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

/// Configuration for the whole engine
#[derive(Debug, Clone)]
pub struct MinerConfig {
    /// Worker threads
    pub workers: WorkerConfig,
    /// Capacity of the worker to coordinator queue
    pub queue_capacity: usize,
    /// Resubmissions allowed per problem after a transient failure
    pub transient_retries: u32,
    /// Where to record solutions, if anywhere
    pub solution_log: Option<PathBuf>,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            workers: WorkerConfig::default(),
            queue_capacity: 64,
            transient_retries: 1,
            solution_log: Some(PathBuf::from("solution.log")),
        }
    }
}

impl MinerConfig {
    /// Use `threads` workers, `0` meaning one per CPU
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.workers = if threads == 0 { WorkerConfig::default() } else { WorkerConfig::with_threads(threads) };
        self
    }

    /// Record solutions to `path`, or nowhere
    pub fn with_solution_log(mut self, path: Option<PathBuf>) -> Self {
        self.solution_log = path;
        self
    }
}

/// Running miner
#[derive(Debug)]
pub struct MinerHandle<S> {
    distributor: ProblemDistributor,
    pool: WorkerPool,
    gate: Arc<SubmissionGate<S>>,
    coordinator_stats: Arc<CoordinatorStats>,
    coordinator: JoinHandle<Coordinator>,
    writer: Option<SolutionWriter>,
    started: Instant,
}

impl<S: SubmissionSink> MinerHandle<S> {
    /// Make `problem` the current one
    pub fn publish(&self, problem: Problem) {
        self.distributor.publish(problem);
    }

    /// The distributor, for feeding from a problem source
    pub fn distributor(&self) -> &ProblemDistributor {
        &self.distributor
    }

    /// The submission gate
    pub fn gate(&self) -> &SubmissionGate<S> {
        &self.gate
    }

    /// Number of workers
    pub fn workers(&self) -> usize {
        self.pool.len()
    }

    /// Current counters
    pub fn stats(&self) -> MinerStats {
        snapshot(&self.pool, &self.gate, &self.coordinator_stats, self.writer.as_ref(), self.started)
    }

    /// Stop the workers, let the coordinator settle in-flight submissions and
    /// return the final counters
    pub async fn shutdown(self) -> Result<MinerStats, MinerError> {
        let Self { distributor: _distributor, mut pool, gate, coordinator_stats, coordinator, writer, started } =
            self;

        info!(target: "infinity::miner", "Shutting down miner");
        // joined workers drop their recorders, which lets the log writer finish
        let (pool, writer) = tokio::task::spawn_blocking(move || {
            pool.shutdown();
            let writer = writer.map(|mut writer| {
                writer.join();
                writer
            });
            (pool, writer)
        })
        .await
        .map_err(|_| MinerError::Stopped)?;

        // every worker has dropped its sender, so the coordinator drains and exits
        coordinator.await.map_err(|_| MinerError::Stopped)?;

        Ok(snapshot(&pool, &gate, &coordinator_stats, writer.as_ref(), started))
    }
}

fn snapshot<S: SubmissionSink>(
    pool: &WorkerPool,
    gate: &SubmissionGate<S>,
    coordinator: &CoordinatorStats,
    writer: Option<&SolutionWriter>,
    started: Instant,
) -> MinerStats {
    let gate_stats = gate.stats();
    MinerStats {
        attempts: pool.attempts(),
        solutions: pool.solutions(),
        overflows: pool.overflows(),
        logged: writer.map_or(0, SolutionWriter::written),
        stale: coordinator.stale() + gate_stats.abandoned(),
        submissions: gate_stats.submitted(),
        confirmed: gate_stats.confirmed(),
        race_losses: gate_stats.reverted() + gate_stats.superseded(),
        transient_failures: gate_stats.transient(),
        elapsed: started.elapsed(),
    }
}

/// Start the miner. Must be called from within a tokio runtime.
///
/// `account_nonce` is the first transaction nonce the gate will use.
pub fn spawn_miner<S: SubmissionSink>(
    config: MinerConfig,
    sink: S,
    account_nonce: u64,
) -> Result<MinerHandle<S>, MinerError> {
    let (recorder, writer) = match &config.solution_log {
        Some(path) => {
            let log = SolutionLog::open(path).map_err(MinerError::SolutionLog)?;
            let (recorder, writer) = log.spawn_writer().map_err(MinerError::SolutionLog)?;
            (recorder, Some(writer))
        }
        None => (SolutionRecorder::disabled(), None),
    };

    let distributor = ProblemDistributor::new();
    let (solutions_tx, solutions_rx) = mpsc::channel(config.queue_capacity.max(1));
    let gate = Arc::new(SubmissionGate::new(sink, account_nonce, distributor.cell()));

    let core = Coordinator::new(config.transient_retries);
    let coordinator_stats = core.stats();
    let service = CoordinatorService::new(core, distributor.subscribe(), solutions_rx, Arc::clone(&gate));
    let coordinator = tokio::spawn(service.run());

    let pool = WorkerPool::spawn(&config.workers, distributor.cell(), solutions_tx, recorder)?;

    info!(
        target: "infinity::miner",
        workers = pool.len(),
        account_nonce,
        transient_retries = config.transient_retries,
        "Miner started"
    );

    Ok(MinerHandle { distributor, pool, gate, coordinator_stats, coordinator, writer, started: Instant::now() })
}
