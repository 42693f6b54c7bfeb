//! Search workers
//!
//! Each worker is an OS thread that draws random candidates against whatever
//! problem the [`ProblemCell`] holds at the start of the attempt. Every solution
//! is handed to the [`SolutionRecorder`] first, then offered to the coordinator
//! through a bounded queue with `try_send`, so the hot loop never waits on
//! anything.

use crate::{
    MinerError,
    candidate::try_candidate,
    distributor::ProblemCell,
    problem::Solution,
    solution_log::SolutionRecorder,
};
use rand::rngs::OsRng;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, trace};

/// Worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of worker threads
    pub threads: usize,
    /// Sleep between checks while no problem is published
    pub idle_wait: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            threads: num_cpus::get().max(1),
            idle_wait: Duration::from_millis(100),
        }
    }
}

impl WorkerConfig {
    /// Create config for a single worker
    pub fn single_thread() -> Self {
        Self {
            threads: 1,
            ..Default::default()
        }
    }

    /// Create config with specific thread count
    pub fn with_threads(threads: usize) -> Self {
        Self {
            threads: threads.max(1),
            ..Default::default()
        }
    }
}

/// Counters of one worker
#[derive(Debug, Default)]
pub struct WorkerStats {
    attempts: AtomicU64,
    solutions: AtomicU64,
    overflows: AtomicU64,
}

impl WorkerStats {
    /// Candidates tried
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Candidates that met the threshold
    pub fn solutions(&self) -> u64 {
        self.solutions.load(Ordering::Relaxed)
    }

    /// Solutions dropped because the queue was full
    pub fn overflows(&self) -> u64 {
        self.overflows.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    Idle,
    Active,
}

/// A single search loop
#[derive(Debug)]
pub struct Worker {
    id: usize,
    cell: Arc<ProblemCell>,
    solutions: mpsc::Sender<Solution>,
    recorder: SolutionRecorder,
    stats: Arc<WorkerStats>,
    stop: Arc<AtomicBool>,
    idle_wait: Duration,
}

impl Worker {
    /// Run until stopped or the solution queue is closed
    pub fn run(self) {
        let mut rng = OsRng;
        let mut state = WorkerState::Idle;

        while !self.stop.load(Ordering::Relaxed) {
            let Some(problem) = self.cell.load() else {
                if state == WorkerState::Active {
                    debug!(target: "infinity::worker", worker = self.id, "Worker idle");
                    state = WorkerState::Idle;
                }
                thread::sleep(self.idle_wait);
                continue;
            };
            state = WorkerState::Active;

            let result = try_candidate(&mut rng, &problem.base_key, problem.difficulty);
            self.stats.attempts.fetch_add(1, Ordering::Relaxed);

            match result {
                Ok(Some(candidate_key)) => {
                    self.stats.solutions.fetch_add(1, Ordering::Relaxed);
                    let solution = Solution {
                        problem_id: problem.nonce,
                        base_key: problem.base_key,
                        candidate_key,
                    };
                    // recorded even if the queue drops it below
                    self.recorder.record(&solution);
                    match self.solutions.try_send(solution) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            self.stats.overflows.fetch_add(1, Ordering::Relaxed);
                            debug!(target: "infinity::worker", worker = self.id, "Solution queue full");
                        }
                        Err(TrySendError::Closed(_)) => {
                            debug!(target: "infinity::worker", worker = self.id, "Solution queue closed");
                            break;
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    trace!(target: "infinity::worker", worker = self.id, error = %e, "Candidate draw failed");
                }
            }
        }

        debug!(target: "infinity::worker", worker = self.id, attempts = self.stats.attempts(), "Worker stopped");
    }
}

/// The set of running workers
#[derive(Debug)]
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    stats: Vec<Arc<WorkerStats>>,
    stop: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Spawn `config.threads` workers reading from `cell`
    pub fn spawn(
        config: &WorkerConfig,
        cell: Arc<ProblemCell>,
        solutions: mpsc::Sender<Solution>,
        recorder: SolutionRecorder,
    ) -> Result<Self, MinerError> {
        let threads = config.threads.max(1);
        let stop = Arc::new(AtomicBool::new(false));
        let mut pool = Self {
            handles: Vec::with_capacity(threads),
            stats: Vec::with_capacity(threads),
            stop: Arc::clone(&stop),
        };

        for id in 0..threads {
            let stats = Arc::new(WorkerStats::default());
            let worker = Worker {
                id,
                cell: Arc::clone(&cell),
                solutions: solutions.clone(),
                recorder: recorder.clone(),
                stats: Arc::clone(&stats),
                stop: Arc::clone(&stop),
                idle_wait: config.idle_wait,
            };
            let handle = thread::Builder::new()
                .name(format!("infinity-worker-{id}"))
                .spawn(move || worker.run())
                .map_err(MinerError::Spawn)?;
            pool.handles.push(handle);
            pool.stats.push(stats);
        }

        info!(target: "infinity::worker", threads, "Workers started");
        Ok(pool)
    }

    /// Number of workers
    pub fn len(&self) -> usize {
        self.stats.len()
    }

    /// Whether the pool has no workers
    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    /// Total candidates tried
    pub fn attempts(&self) -> u64 {
        self.stats.iter().map(|s| s.attempts()).sum()
    }

    /// Total candidates that met the threshold
    pub fn solutions(&self) -> u64 {
        self.stats.iter().map(|s| s.solutions()).sum()
    }

    /// Total solutions dropped on a full queue
    pub fn overflows(&self) -> u64 {
        self.stats.iter().map(|s| s.overflows()).sum()
    }

    /// Ask every worker to stop after its current attempt
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Stop and join all workers
    pub fn shutdown(&mut self) {
        self.stop();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{distributor::ProblemDistributor, key::PrivateKey, problem::Problem, solution_log::SolutionLog};
    use alloy_primitives::U256;
    use std::time::Instant;

    fn problem(nonce: u64, difficulty: U256) -> Problem {
        Problem::new(
            U256::from(nonce),
            PrivateKey::from_u256(U256::from(nonce + 1_000)).unwrap(),
            difficulty,
        )
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_worker_config() {
        let config = WorkerConfig::default();
        assert!(config.threads >= 1);
        assert_eq!(config.idle_wait, Duration::from_millis(100));
        assert_eq!(WorkerConfig::with_threads(0).threads, 1);
    }

    #[test]
    fn test_idle_without_problem() {
        let distributor = ProblemDistributor::new();
        let (tx, _rx) = mpsc::channel(8);
        let mut pool = WorkerPool::spawn(&WorkerConfig::with_threads(2), distributor.cell(), tx, SolutionRecorder::disabled()).unwrap();

        thread::sleep(Duration::from_millis(250));
        assert_eq!(pool.attempts(), 0);
        pool.shutdown();
    }

    #[test]
    fn test_solutions_carry_problem_identity() {
        let distributor = ProblemDistributor::new();
        let (tx, mut rx) = mpsc::channel(64);
        let mut pool = WorkerPool::spawn(&WorkerConfig::with_threads(2), distributor.cell(), tx, SolutionRecorder::disabled()).unwrap();

        let published = problem(42, U256::MAX);
        distributor.publish(published.clone());

        let solution = rx.blocking_recv().unwrap();
        assert_eq!(solution.problem_id, published.nonce);
        assert_eq!(solution.base_key, published.base_key);
        pool.shutdown();
    }

    #[test]
    fn test_keeps_searching_after_success() {
        let distributor = ProblemDistributor::new();
        let (tx, mut rx) = mpsc::channel(64);
        let mut pool = WorkerPool::spawn(&WorkerConfig::single_thread(), distributor.cell(), tx, SolutionRecorder::disabled()).unwrap();
        distributor.publish(problem(1, U256::MAX));

        let first = rx.blocking_recv().unwrap();
        let second = rx.blocking_recv().unwrap();
        assert_ne!(first.candidate_key, second.candidate_key);
        assert!(pool.solutions() >= 2);
        pool.shutdown();
    }

    #[test]
    fn test_zero_difficulty_finds_nothing() {
        let distributor = ProblemDistributor::new();
        let (tx, mut rx) = mpsc::channel(8);
        let mut pool = WorkerPool::spawn(&WorkerConfig::with_threads(2), distributor.cell(), tx, SolutionRecorder::disabled()).unwrap();
        distributor.publish(problem(1, U256::ZERO));

        assert!(wait_for(|| pool.attempts() > 100));
        pool.shutdown();
        assert_eq!(pool.solutions(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_full_queue_counts_overflow() {
        let distributor = ProblemDistributor::new();
        let (tx, _rx) = mpsc::channel(1);
        let mut pool = WorkerPool::spawn(&WorkerConfig::single_thread(), distributor.cell(), tx, SolutionRecorder::disabled()).unwrap();
        distributor.publish(problem(1, U256::MAX));

        assert!(wait_for(|| pool.overflows() > 0));
        pool.shutdown();
    }

    #[test]
    fn test_overflowed_solutions_still_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("solution.log");
        let (recorder, mut writer) = SolutionLog::open(&path).unwrap().spawn_writer().unwrap();

        let distributor = ProblemDistributor::new();
        let (tx, _rx) = mpsc::channel(1);
        let mut pool = WorkerPool::spawn(&WorkerConfig::with_threads(2), distributor.cell(), tx, recorder).unwrap();
        distributor.publish(problem(1, U256::MAX));

        assert!(wait_for(|| pool.overflows() > 10));
        // joined workers have dropped their recorders
        pool.shutdown();
        writer.join();

        let logged = std::fs::read_to_string(&path).unwrap().lines().count() as u64;
        assert_eq!(logged, pool.solutions());
        assert!(logged > pool.overflows());
    }

    #[test]
    fn test_switches_to_new_problem() {
        let distributor = ProblemDistributor::new();
        let (tx, mut rx) = mpsc::channel(1024);
        let mut pool = WorkerPool::spawn(&WorkerConfig::single_thread(), distributor.cell(), tx, SolutionRecorder::disabled()).unwrap();

        distributor.publish(problem(1, U256::MAX));
        rx.blocking_recv().unwrap();
        distributor.publish(problem(2, U256::MAX));

        let mut switched = false;
        for _ in 0..4096 {
            if rx.blocking_recv().unwrap().problem_id == U256::from(2u64) {
                switched = true;
                break;
            }
        }
        assert!(switched);
        pool.shutdown();
    }
}
