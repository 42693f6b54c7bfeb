//! Solution coordinator
//!
//! [`Coordinator`] is the bookkeeping: which problem is active and whether its
//! identity may still be submitted. [`CoordinatorService`] drives it from the
//! problem feed, the worker queue and finished submissions.
//!
//! Per identity the rules are:
//! - the first matching solution is submitted; later ones wait or are dropped
//! - `Reverted` / `Superseded` close the identity for good
//! - `Confirmed` closes it as solved
//! - `TransientFailure` re-opens it while the retry budget lasts
//!
//! An outcome for an identity that is no longer active only updates counters.
//! A submission task that dies without reporting counts as `TransientFailure`.

use crate::{
    distributor::ProblemReceiver,
    gate::{Outcome, SubmissionGate, SubmissionSink},
    problem::{Problem, ProblemId, Solution},
};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::task::{self, JoinError, JoinSet};
use tracing::{debug, info, trace, warn};

/// Observable coordinator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// No problem published yet
    Idle,
    /// A problem is active and no submission is in flight for it
    ProblemActive,
    /// A submission for the active problem is in flight
    Submitting,
}

/// What happened to a solution handed to the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Go ahead and submit
    Submit(Solution),
    /// Found against a problem that is not the active one
    Stale,
    /// A submission for the same identity is already in flight
    InFlight,
    /// The identity is solved or obsolete
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdentityStatus {
    Open { retries_left: u32 },
    Submitting { retries_left: u32 },
    Solved,
    Obsolete,
}

#[derive(Debug)]
struct ActiveProblem {
    problem: Arc<Problem>,
    status: IdentityStatus,
}

/// Counters shared with telemetry
#[derive(Debug, Default)]
pub struct CoordinatorStats {
    received: AtomicU64,
    stale: AtomicU64,
    in_flight: AtomicU64,
    closed: AtomicU64,
    dispatched: AtomicU64,
}

impl CoordinatorStats {
    /// Solutions dequeued
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Solutions dropped for a non-active identity
    pub fn stale(&self) -> u64 {
        self.stale.load(Ordering::Relaxed)
    }

    /// Solutions dropped while a submission was in flight
    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Solutions dropped for a solved or obsolete identity
    pub fn closed(&self) -> u64 {
        self.closed.load(Ordering::Relaxed)
    }

    /// Submissions actually started
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }
}

/// Active-problem bookkeeping
#[derive(Debug)]
pub struct Coordinator {
    active: Option<ActiveProblem>,
    transient_retries: u32,
    stats: Arc<CoordinatorStats>,
}

impl Coordinator {
    /// Create a coordinator allowing `transient_retries` resubmissions per
    /// identity after ambiguous outcomes
    pub fn new(transient_retries: u32) -> Self {
        Self { active: None, transient_retries, stats: Arc::default() }
    }

    /// Shared counters
    pub fn stats(&self) -> Arc<CoordinatorStats> {
        Arc::clone(&self.stats)
    }

    /// Current state
    pub fn state(&self) -> CoordinatorState {
        match &self.active {
            None => CoordinatorState::Idle,
            Some(ActiveProblem { status: IdentityStatus::Submitting { .. }, .. }) => {
                CoordinatorState::Submitting
            }
            Some(_) => CoordinatorState::ProblemActive,
        }
    }

    /// Identity of the active problem
    pub fn active_id(&self) -> Option<ProblemId> {
        self.active.as_ref().map(|a| a.problem.nonce)
    }

    /// Whether solutions for `id` can still be submitted
    pub fn is_open(&self, id: ProblemId) -> bool {
        matches!(
            &self.active,
            Some(ActiveProblem { problem, status: IdentityStatus::Open { .. } }) if problem.nonce == id
        )
    }

    /// Whether `id` is the active identity
    pub fn is_active(&self, id: ProblemId) -> bool {
        self.active_id() == Some(id)
    }

    /// A problem was published. Returns `true` if the active identity changed.
    pub fn on_problem(&mut self, problem: Arc<Problem>) -> bool {
        if self.is_active(problem.nonce) {
            return false;
        }
        self.active = Some(ActiveProblem {
            problem,
            status: IdentityStatus::Open { retries_left: self.transient_retries },
        });
        true
    }

    /// A worker reported a solution
    pub fn on_solution(&mut self, solution: Solution) -> Verdict {
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        let Some(active) = self.active.as_mut().filter(|a| {
            a.problem.nonce == solution.problem_id && a.problem.base_key == solution.base_key
        }) else {
            self.stats.stale.fetch_add(1, Ordering::Relaxed);
            return Verdict::Stale;
        };

        match active.status {
            IdentityStatus::Open { retries_left } => {
                active.status = IdentityStatus::Submitting { retries_left };
                Verdict::Submit(solution)
            }
            IdentityStatus::Submitting { .. } => {
                self.stats.in_flight.fetch_add(1, Ordering::Relaxed);
                Verdict::InFlight
            }
            IdentityStatus::Solved | IdentityStatus::Obsolete => {
                self.stats.closed.fetch_add(1, Ordering::Relaxed);
                Verdict::Closed
            }
        }
    }

    /// A submission was started for a [`Verdict::Submit`]
    pub fn on_dispatch(&self) {
        self.stats.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// A submission for `id` finished; `None` means nothing was sent
    pub fn on_outcome(&mut self, id: ProblemId, outcome: Option<Outcome>) {
        let Some(active) = self.active.as_mut().filter(|a| a.problem.nonce == id) else {
            return;
        };
        let IdentityStatus::Submitting { retries_left } = active.status else {
            return;
        };

        active.status = match outcome {
            None => IdentityStatus::Open { retries_left },
            Some(Outcome::Confirmed) => IdentityStatus::Solved,
            Some(Outcome::Reverted | Outcome::Superseded) => IdentityStatus::Obsolete,
            Some(Outcome::TransientFailure) if retries_left > 0 => {
                IdentityStatus::Open { retries_left: retries_left - 1 }
            }
            Some(Outcome::TransientFailure) => IdentityStatus::Obsolete,
        };
    }
}

/// Task that feeds a [`Coordinator`] and dispatches submissions
#[derive(Debug)]
pub struct CoordinatorService<S> {
    core: Coordinator,
    problems: ProblemReceiver,
    solutions: mpsc::Receiver<Solution>,
    gate: Arc<SubmissionGate<S>>,
    inflight: JoinSet<Option<Outcome>>,
    tasks: HashMap<task::Id, ProblemId>,
}

impl<S: SubmissionSink> CoordinatorService<S> {
    /// Create the service
    pub fn new(
        core: Coordinator,
        problems: ProblemReceiver,
        solutions: mpsc::Receiver<Solution>,
        gate: Arc<SubmissionGate<S>>,
    ) -> Self {
        Self { core, problems, solutions, gate, inflight: JoinSet::new(), tasks: HashMap::new() }
    }

    /// Run until the solution queue closes, then wait for in-flight
    /// submissions and return the final bookkeeping
    pub async fn run(mut self) -> Coordinator {
        info!(target: "infinity::coordinator", "Coordinator started");

        // a problem may have been published before we subscribed
        self.sync_problem();

        loop {
            tokio::select! {
                biased;

                changed = self.problems.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.sync_problem();
                }
                Some(joined) = self.inflight.join_next_with_id(), if !self.inflight.is_empty() => {
                    self.reconcile(joined);
                }
                solution = self.solutions.recv() => {
                    let Some(solution) = solution else { break };
                    self.handle_solution(solution);
                }
            }
        }

        while let Some(joined) = self.inflight.join_next_with_id().await {
            self.reconcile(joined);
        }

        info!(target: "infinity::coordinator", "Coordinator stopped");
        self.core
    }

    fn sync_problem(&mut self) {
        let latest = self.problems.borrow_and_update().clone();
        if let Some(problem) = latest {
            let nonce = problem.nonce;
            if self.core.on_problem(problem) {
                debug!(target: "infinity::coordinator", problem = %nonce, "Active problem changed");
            }
        }
    }

    fn handle_solution(&mut self, solution: Solution) {
        match self.core.on_solution(solution) {
            Verdict::Submit(solution) => {
                // a newer problem may be waiting in the feed
                if self.problems.has_changed().unwrap_or(false) {
                    self.sync_problem();
                }
                if !self.core.is_active(solution.problem_id) {
                    debug!(
                        target: "infinity::coordinator",
                        problem = %solution.problem_id,
                        "Problem replaced before dispatch"
                    );
                    return;
                }

                let id = solution.problem_id;
                let gate = Arc::clone(&self.gate);
                let handle = self.inflight.spawn(async move { gate.submit(&solution).await });
                self.tasks.insert(handle.id(), id);
                self.core.on_dispatch();
            }
            Verdict::Stale => {
                trace!(target: "infinity::coordinator", "Dropped stale solution");
            }
            Verdict::InFlight | Verdict::Closed => {}
        }
    }

    fn reconcile(&mut self, joined: Result<(task::Id, Option<Outcome>), JoinError>) {
        let (task_id, outcome) = match joined {
            Ok((task_id, outcome)) => (task_id, outcome),
            Err(e) => {
                warn!(target: "infinity::coordinator", error = %e, "Submission task failed");
                (e.id(), Some(Outcome::TransientFailure))
            }
        };
        let Some(id) = self.tasks.remove(&task_id) else {
            return;
        };

        debug!(
            target: "infinity::coordinator",
            problem = %id,
            outcome = ?outcome,
            "Submission finished"
        );
        self.core.on_outcome(id, outcome);
    }
}
