//! Problems published by the contract and solutions found against them.

use crate::key::{KeyError, PrivateKey};
use alloy_primitives::{Address, U256};

/// On-chain problem nonce; the identity every solution is checked against
pub type ProblemId = U256;

/// A puzzle instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Problem {
    /// Identity assigned by the contract
    pub nonce: ProblemId,
    /// Base private key `A`
    pub base_key: PrivateKey,
    /// Accept threshold for the XOR distance
    pub difficulty: U256,
}

impl Problem {
    /// Create a new problem
    pub fn new(nonce: ProblemId, base_key: PrivateKey, difficulty: U256) -> Self {
        Self { nonce, base_key, difficulty }
    }

    /// Build from the raw event/call values
    pub fn from_raw(nonce: U256, base_key: U256, difficulty: U256) -> Result<Self, KeyError> {
        Ok(Self::new(nonce, PrivateKey::from_u256(base_key)?, difficulty))
    }
}

/// A candidate that satisfied a problem's predicate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Solution {
    /// Identity of the problem the candidate was tested against
    pub problem_id: ProblemId,
    /// Base key `A` of that problem
    pub base_key: PrivateKey,
    /// Candidate key `B`
    pub candidate_key: PrivateKey,
}

impl Solution {
    /// `(A + B) mod n`
    pub fn combined_key(&self) -> Result<PrivateKey, KeyError> {
        self.base_key.combine(&self.candidate_key)
    }

    /// Address claimed by this solution
    pub fn address(&self) -> Result<Address, KeyError> {
        self.combined_key().map(|key| key.address())
    }
}
