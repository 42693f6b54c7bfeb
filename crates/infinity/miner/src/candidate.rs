//! Candidate generation and the difficulty predicate.
//!
//! A candidate `B` solves a problem when the address of `(A + B) mod n`,
//! XORed with [`MAGIC`] and read as an unsigned integer, is strictly below the
//! problem difficulty. The contract evaluates the same predicate, so it is kept
//! exactly as published.

use crate::key::{KeyError, PrivateKey};
use alloy_primitives::{Address, U256, address};
use rand::{CryptoRng, RngCore};

/// Protocol constant every distance is measured from
pub const MAGIC: Address = address!("8888888888888888888888888888888888888888");

/// XOR distance of an address from [`MAGIC`]
pub fn distance(address: Address) -> U256 {
    U256::from_be_slice(MAGIC.as_slice()) ^ U256::from_be_slice(address.as_slice())
}

/// Deterministic result of testing one candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    /// `(A + B) mod n`
    pub combined: PrivateKey,
    /// Address of the combined key
    pub address: Address,
    /// XOR distance of that address
    pub distance: U256,
}

impl Evaluation {
    /// Strict threshold check; difficulty zero accepts nothing
    pub fn satisfies(&self, difficulty: U256) -> bool {
        self.distance < difficulty
    }
}

/// Evaluate a fixed candidate against a base key
pub fn evaluate(base_key: &PrivateKey, candidate: &PrivateKey) -> Result<Evaluation, KeyError> {
    let combined = base_key.combine(candidate)?;
    let address = combined.address();
    Ok(Evaluation { combined, address, distance: distance(address) })
}

/// Draw one random candidate and test it.
///
/// Returns `Ok(None)` when the candidate misses the threshold. Errors only
/// concern this draw; the caller should simply try again.
pub fn try_candidate<R: RngCore + CryptoRng>(
    rng: &mut R,
    base_key: &PrivateKey,
    difficulty: U256,
) -> Result<Option<PrivateKey>, KeyError> {
    let candidate = PrivateKey::random(rng)?;
    let evaluation = evaluate(base_key, &candidate)?;
    Ok(evaluation.satisfies(difficulty).then_some(candidate))
}
