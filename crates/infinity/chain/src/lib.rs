//! Infinity chain adapter
//!
//! Connects the miner to the PoW contract: [`ProblemSource`] feeds new
//! problems into a [`ProblemDistributor`](infinity_miner::ProblemDistributor)
//! and [`ChainSubmitter`] is the [`SubmissionSink`](infinity_miner::SubmissionSink)
//! that turns solutions into signed `submit` transactions.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

pub mod contract;
mod error;
pub mod source;
pub mod submitter;

pub use error::ChainError;
pub use source::{ProblemFeed, ProblemSource, ProblemStream, RESUBSCRIBE_DELAY, decode_problem, follow};
pub use submitter::{
    ChainSubmitter, DEFAULT_GAS_LIMIT, DEFAULT_RECEIPT_TIMEOUT, SubmitterConfig, broadcast_failure,
    classify_receipt, sign_claim,
};
