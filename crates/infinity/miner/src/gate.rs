//! Submission gate
//!
//! Sits between the coordinator and whatever actually puts a solution on
//! chain. The gate owns the account nonce, recomputes the combined key from
//! the raw solution, checks one last time that the solution's problem is still
//! current, and folds every sink result into an [`Outcome`].

use crate::{
    distributor::ProblemCell,
    key::PrivateKey,
    problem::{ProblemId, Solution},
};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Classified result of a submission attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// Mined and accepted by the contract
    Confirmed,
    /// Mined but rejected by the contract
    Reverted,
    /// A newer problem showed up in the same receipt before ours was accepted
    Superseded,
    /// No verifiable result (RPC error, receipt timeout)
    TransientFailure,
}

impl Outcome {
    /// Lost the race against another submitter or the next problem
    pub fn is_race_loss(&self) -> bool {
        matches!(self, Self::Reverted | Self::Superseded)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Confirmed => "confirmed",
            Self::Reverted => "reverted",
            Self::Superseded => "superseded",
            Self::TransientFailure => "transient failure",
        };
        f.write_str(s)
    }
}

/// Everything a sink needs to claim a problem
#[derive(Debug, Clone)]
pub struct SubmissionRequest {
    /// Problem being claimed
    pub problem_id: ProblemId,
    /// Candidate key `B`, whose public point goes on chain
    pub candidate_key: PrivateKey,
    /// `A + B`, the key that signs the claim
    pub combined_key: PrivateKey,
    /// Account nonce reserved for this attempt
    pub account_nonce: u64,
}

/// Failed submission, split by whether the transaction left the process
#[derive(Debug, thiserror::Error)]
pub enum SinkError<E> {
    /// Nothing was broadcast; the account nonce is still unused
    #[error("not sent: {0}")]
    NotSent(#[source] E),
    /// Broadcast, but its fate could not be verified
    #[error("unverified: {0}")]
    Unverified(#[source] E),
}

impl<E> SinkError<E> {
    /// Whether the transaction may have reached the network
    pub fn was_sent(&self) -> bool {
        matches!(self, Self::Unverified(_))
    }
}

/// Destination for solutions, typically a contract call
#[async_trait]
pub trait SubmissionSink: Send + Sync + 'static {
    /// Error type for failures without a verifiable on-chain result
    type Error: std::error::Error + Send + Sync + 'static;

    /// Send the claim and wait until its fate is known
    async fn submit(&self, request: SubmissionRequest) -> Result<Outcome, SinkError<Self::Error>>;
}

#[async_trait]
impl<T: SubmissionSink> SubmissionSink for Arc<T> {
    type Error = T::Error;

    async fn submit(&self, request: SubmissionRequest) -> Result<Outcome, SinkError<T::Error>> {
        (**self).submit(request).await
    }
}

/// Counters kept by the gate
#[derive(Debug, Default)]
pub struct GateStats {
    submitted: AtomicU64,
    confirmed: AtomicU64,
    reverted: AtomicU64,
    superseded: AtomicU64,
    transient: AtomicU64,
    unsent: AtomicU64,
    abandoned: AtomicU64,
}

impl GateStats {
    /// Attempts whose transaction may have reached the network
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Accepted claims
    pub fn confirmed(&self) -> u64 {
        self.confirmed.load(Ordering::Relaxed)
    }

    /// Rejected claims
    pub fn reverted(&self) -> u64 {
        self.reverted.load(Ordering::Relaxed)
    }

    /// Claims beaten by a new problem
    pub fn superseded(&self) -> u64 {
        self.superseded.load(Ordering::Relaxed)
    }

    /// Attempts without a verifiable result
    pub fn transient(&self) -> u64 {
        self.transient.load(Ordering::Relaxed)
    }

    /// Attempts that failed before anything was broadcast
    pub fn unsent(&self) -> u64 {
        self.unsent.load(Ordering::Relaxed)
    }

    /// Solutions dropped at the gate because their problem was replaced
    pub fn abandoned(&self) -> u64 {
        self.abandoned.load(Ordering::Relaxed)
    }

    fn record(&self, outcome: Outcome) {
        let counter = match outcome {
            Outcome::Confirmed => &self.confirmed,
            Outcome::Reverted => &self.reverted,
            Outcome::Superseded => &self.superseded,
            Outcome::TransientFailure => &self.transient,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Serializing front of a [`SubmissionSink`]
pub struct SubmissionGate<S> {
    sink: S,
    account_nonce: Mutex<u64>,
    cell: Arc<ProblemCell>,
    stats: GateStats,
}

impl<S: SubmissionSink> SubmissionGate<S> {
    /// Create a gate starting at `account_nonce`
    pub fn new(sink: S, account_nonce: u64, cell: Arc<ProblemCell>) -> Self {
        Self { sink, account_nonce: Mutex::new(account_nonce), cell, stats: GateStats::default() }
    }

    /// Gate counters
    pub fn stats(&self) -> &GateStats {
        &self.stats
    }

    /// The wrapped sink
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Next account nonce that will be used
    pub async fn next_account_nonce(&self) -> u64 {
        *self.account_nonce.lock().await
    }

    /// Submit a solution.
    ///
    /// Returns `None` when the solution's problem is no longer the published
    /// one, or the keys do not combine. A failure before broadcast is a
    /// `TransientFailure` that leaves the account nonce unused; once the
    /// transaction is out the nonce is consumed whatever the outcome.
    pub async fn submit(&self, solution: &Solution) -> Option<Outcome> {
        let combined_key = match solution.combined_key() {
            Ok(key) => key,
            Err(e) => {
                warn!(target: "infinity::gate", problem = %solution.problem_id, error = %e, "Unusable solution");
                return None;
            }
        };

        // held until the outcome is known: one transaction in flight at a time
        let mut account_nonce = self.account_nonce.lock().await;

        if self.cell.load().map(|p| p.nonce) != Some(solution.problem_id) {
            self.stats.abandoned.fetch_add(1, Ordering::Relaxed);
            debug!(target: "infinity::gate", problem = %solution.problem_id, "Problem replaced before submission");
            return None;
        }

        let request = SubmissionRequest {
            problem_id: solution.problem_id,
            candidate_key: solution.candidate_key,
            combined_key,
            account_nonce: *account_nonce,
        };

        info!(
            target: "infinity::gate",
            problem = %request.problem_id,
            address = %combined_key.address(),
            account_nonce = request.account_nonce,
            "Submitting solution"
        );

        let result = self.sink.submit(request).await;
        let sent = match &result {
            Ok(_) => true,
            Err(e) => e.was_sent(),
        };
        if sent {
            *account_nonce += 1;
            self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.unsent.fetch_add(1, Ordering::Relaxed);
        }

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(target: "infinity::gate", problem = %solution.problem_id, error = %e, "Submission failed");
                Outcome::TransientFailure
            }
        };
        self.stats.record(outcome);

        match outcome {
            Outcome::Confirmed => {
                info!(target: "infinity::gate", problem = %solution.problem_id, "Solution accepted");
            }
            Outcome::Reverted | Outcome::Superseded => {
                info!(target: "infinity::gate", problem = %solution.problem_id, %outcome, "Lost the race");
            }
            Outcome::TransientFailure => {}
        }

        Some(outcome)
    }
}

impl<S> fmt::Debug for SubmissionGate<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmissionGate").field("stats", &self.stats).finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;
    use std::collections::VecDeque;

    /// Sink error for scripted failures
    #[derive(Debug, thiserror::Error)]
    #[error("scripted failure")]
    pub(crate) struct ScriptedError;

    /// Broadcast, then lost track of
    pub(crate) fn unverified() -> Result<Outcome, SinkError<ScriptedError>> {
        Err(SinkError::Unverified(ScriptedError))
    }

    /// Failed before broadcast
    pub(crate) fn not_sent() -> Result<Outcome, SinkError<ScriptedError>> {
        Err(SinkError::NotSent(ScriptedError))
    }

    /// Sink that replays a fixed list of results and records every request
    #[derive(Debug, Default)]
    pub(crate) struct ScriptedSink {
        script: std::sync::Mutex<VecDeque<Result<Outcome, SinkError<ScriptedError>>>>,
        requests: std::sync::Mutex<Vec<SubmissionRequest>>,
        delay: std::time::Duration,
        panics: std::sync::atomic::AtomicUsize,
    }

    impl ScriptedSink {
        pub(crate) fn new(script: Vec<Result<Outcome, SinkError<ScriptedError>>>) -> Self {
            Self { script: std::sync::Mutex::new(script.into()), ..Default::default() }
        }

        pub(crate) fn with_delay(mut self, delay: std::time::Duration) -> Self {
            self.delay = delay;
            self
        }

        /// Panic on the first `count` calls, after recording the request
        pub(crate) fn with_panics(self, count: usize) -> Self {
            self.panics.store(count, std::sync::atomic::Ordering::SeqCst);
            self
        }

        pub(crate) fn requests(&self) -> Vec<SubmissionRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SubmissionSink for ScriptedSink {
        type Error = ScriptedError;

        async fn submit(&self, request: SubmissionRequest) -> Result<Outcome, SinkError<ScriptedError>> {
            self.requests.lock().unwrap().push(request);
            let panicking = self
                .panics
                .fetch_update(std::sync::atomic::Ordering::SeqCst, std::sync::atomic::Ordering::SeqCst, |n| {
                    n.checked_sub(1)
                })
                .is_ok();
            if panicking {
                panic!("scripted panic");
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.script.lock().unwrap().pop_front().unwrap_or(Ok(Outcome::Confirmed))
        }
    }
}
