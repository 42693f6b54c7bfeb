//! Problem distribution.
//!
//! Workers read the current problem from a [`ProblemCell`]: a single slot that
//! is overwritten on every publish and read without blocking. The coordinator
//! follows the same publications through a `watch` channel so it can wake up
//! on change instead of polling.

use crate::problem::Problem;
use arc_swap::ArcSwapOption;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Receiver side used by the coordinator
pub type ProblemReceiver = watch::Receiver<Option<Arc<Problem>>>;

/// Last-write-wins slot holding the current problem
pub struct ProblemCell {
    slot: ArcSwapOption<Problem>,
    version: AtomicU64,
}

impl ProblemCell {
    /// Create an empty cell
    pub fn new() -> Self {
        Self { slot: ArcSwapOption::empty(), version: AtomicU64::new(0) }
    }

    /// Current problem, if any has been published
    pub fn load(&self) -> Option<Arc<Problem>> {
        self.slot.load_full()
    }

    /// Number of publications so far
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    fn store(&self, problem: Arc<Problem>) {
        self.slot.store(Some(problem));
        self.version.fetch_add(1, Ordering::Release);
    }
}

impl Default for ProblemCell {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProblemCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProblemCell")
            .field("nonce", &self.load().map(|p| p.nonce))
            .field("version", &self.version())
            .finish()
    }
}

/// Owner of the "current problem" for workers and coordinator
#[derive(Debug, Clone)]
pub struct ProblemDistributor {
    cell: Arc<ProblemCell>,
    tx: Arc<watch::Sender<Option<Arc<Problem>>>>,
}

impl ProblemDistributor {
    /// Create a distributor with no problem yet
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { cell: Arc::new(ProblemCell::new()), tx: Arc::new(tx) }
    }

    /// Cell shared with workers
    pub fn cell(&self) -> Arc<ProblemCell> {
        Arc::clone(&self.cell)
    }

    /// Subscribe to publications
    pub fn subscribe(&self) -> ProblemReceiver {
        self.tx.subscribe()
    }

    /// Currently published problem
    pub fn current(&self) -> Option<Arc<Problem>> {
        self.cell.load()
    }

    /// Make `problem` the current one.
    ///
    /// The worker cell is updated before the coordinator is notified, so by
    /// the time the coordinator sees a new identity no worker starts another
    /// attempt on the old one.
    pub fn publish(&self, problem: Problem) {
        let problem = Arc::new(problem);

        match self.cell.load() {
            Some(current) if current.nonce == problem.nonce => {
                debug!(target: "infinity::distributor", nonce = %problem.nonce, "Problem republished");
            }
            Some(current) if problem.nonce < current.nonce => {
                warn!(
                    target: "infinity::distributor",
                    current = %current.nonce,
                    published = %problem.nonce,
                    "Published problem is older than the active one"
                );
            }
            _ => {
                info!(
                    target: "infinity::distributor",
                    nonce = %problem.nonce,
                    difficulty = %problem.difficulty,
                    "New problem"
                );
            }
        }

        self.cell.store(Arc::clone(&problem));
        self.tx.send_replace(Some(problem));
    }
}

impl Default for ProblemDistributor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::PrivateKey;
    use alloy_primitives::U256;

    fn problem(nonce: u64) -> Problem {
        Problem::new(
            U256::from(nonce),
            PrivateKey::from_u256(U256::from(nonce + 100)).unwrap(),
            U256::from(1_000u64),
        )
    }

    #[test]
    fn test_empty_until_published() {
        let distributor = ProblemDistributor::new();
        assert!(distributor.current().is_none());
        assert_eq!(distributor.cell().version(), 0);
    }

    #[test]
    fn test_latest_wins_even_if_older() {
        let distributor = ProblemDistributor::new();
        let cell = distributor.cell();
        distributor.publish(problem(5));
        distributor.publish(problem(3));
        assert_eq!(cell.load().unwrap().nonce, U256::from(3u64));
        assert_eq!(cell.version(), 2);
    }

    #[tokio::test]
    async fn test_subscriber_sees_publication() {
        let distributor = ProblemDistributor::new();
        let mut rx = distributor.subscribe();
        distributor.publish(problem(1));
        rx.changed().await.unwrap();
        let seen = rx.borrow_and_update().clone().unwrap();
        assert_eq!(seen.nonce, U256::from(1u64));
    }
}
