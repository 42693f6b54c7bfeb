//! Infinity PoW miner
//!
//! Searches for a key `B` such that the address of `A + B`, XORed with a
//! fixed magic address, falls below the published difficulty, and races to
//! claim each problem through a single serialized submission path.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        INFINITY MINER                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │   ┌─────────────────────────────────────────────────────────┐   │
//! │   │  Problem Distributor                                     │   │
//! │   │  • Last-write-wins cell read by workers                  │   │
//! │   │  • Watch channel waking the coordinator                  │   │
//! │   └─────────────────────────────────────────────────────────┘   │
//! │                              │                                  │
//! │   ┌─────────────────────────────────────────────────────────┐   │
//! │   │  Workers (OS threads)                                    │   │
//! │   │  • Random candidate, combine, address, compare           │   │
//! │   │  • Matches logged, then pushed to a bounded queue        │   │
//! │   └─────────────────────────────────────────────────────────┘   │
//! │                              │                                  │
//! │   ┌─────────────────────────────────────────────────────────┐   │
//! │   │  Coordinator                                             │   │
//! │   │  • Drops stale solutions, one submission per problem     │   │
//! │   │  • Reconciles outcomes against the active problem        │   │
//! │   └─────────────────────────────────────────────────────────┘   │
//! │                              │                                  │
//! │   ┌─────────────────────────────────────────────────────────┐   │
//! │   │  Submission Gate                                         │   │
//! │   │  • Owns the account nonce                                │   │
//! │   │  • Hands the claim to a SubmissionSink                   │   │
//! │   └─────────────────────────────────────────────────────────┘   │
//! │                                                                 │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

pub mod candidate;
pub mod coordinator;
pub mod distributor;
pub mod engine;
pub mod gate;
pub mod key;
pub mod problem;
pub mod solution_log;
pub mod stats;
pub mod worker;

pub use candidate::{Evaluation, MAGIC, distance, evaluate, try_candidate};
pub use coordinator::{Coordinator, CoordinatorService, CoordinatorState, Verdict};
pub use distributor::{ProblemCell, ProblemDistributor};
pub use engine::{MinerConfig, MinerHandle, spawn_miner};
pub use gate::{Outcome, SinkError, SubmissionGate, SubmissionRequest, SubmissionSink};
pub use key::{KeyError, PrivateKey};
pub use problem::{Problem, ProblemId, Solution};
pub use solution_log::{SolutionLog, SolutionRecorder, SolutionWriter};
pub use stats::{MinerStats, format_hashrate};
pub use worker::{WorkerConfig, WorkerPool};

use thiserror::Error;

/// Engine errors
#[derive(Debug, Error)]
pub enum MinerError {
    /// A worker thread could not be started
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// The solution log could not be opened or its writer started
    #[error("failed to open solution log: {0}")]
    SolutionLog(#[source] std::io::Error),

    /// A background task died before shutdown completed
    #[error("miner stopped unexpectedly")]
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_miner_error() {
        let err = MinerError::Spawn(std::io::Error::other("no threads"));
        assert!(err.to_string().contains("no threads"));
        assert_eq!(MinerError::Stopped.to_string(), "miner stopped unexpectedly");
    }
}
