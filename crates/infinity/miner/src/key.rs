//! secp256k1 private keys as the puzzle contract sees them.
//!
//! The contract publishes the base key `A` as a plain `uint256`, and the
//! claimed address is the one controlled by `(A + B) mod n`. Everything here
//! works on non-zero scalars so the sum is always a usable signing key.

use alloy_primitives::{Address, B256, U256, keccak256};
use k256::{NonZeroScalar, PublicKey, SecretKey, elliptic_curve::sec1::ToEncodedPoint};
use rand::{CryptoRng, RngCore};
use std::fmt;
use thiserror::Error;

/// Errors produced while building or combining keys
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// The random source refused to produce bytes
    #[error("random source failed: {0}")]
    Rng(String),

    /// Value is zero or not below the curve order
    #[error("scalar out of range for secp256k1")]
    OutOfRange,

    /// `A + B` wrapped to zero
    #[error("combined key is zero")]
    ZeroSum,
}

/// A non-zero secp256k1 private scalar
#[derive(Clone, Copy)]
pub struct PrivateKey {
    scalar: NonZeroScalar,
}

impl PrivateKey {
    /// Parse a big-endian 32 byte scalar
    pub fn from_be_bytes(bytes: &[u8; 32]) -> Result<Self, KeyError> {
        let secret = SecretKey::from_slice(bytes).map_err(|_| KeyError::OutOfRange)?;
        Ok(Self { scalar: secret.to_nonzero_scalar() })
    }

    /// Parse the `uint256` representation used by the contract
    pub fn from_u256(value: U256) -> Result<Self, KeyError> {
        Self::from_be_bytes(&value.to_be_bytes::<32>())
    }

    /// Draw a fresh key from a cryptographic random source.
    ///
    /// Fails if the source errors or the 256-bit draw lands outside `[1, n)`.
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Result<Self, KeyError> {
        let mut bytes = [0u8; 32];
        rng.try_fill_bytes(&mut bytes).map_err(|e| KeyError::Rng(e.to_string()))?;
        Self::from_be_bytes(&bytes)
    }

    /// `(self + other) mod n`
    pub fn combine(&self, other: &Self) -> Result<Self, KeyError> {
        let sum = *self.scalar + *other.scalar;
        Option::<NonZeroScalar>::from(NonZeroScalar::new(sum))
            .map(|scalar| Self { scalar })
            .ok_or(KeyError::ZeroSum)
    }

    /// Big-endian scalar bytes
    pub fn to_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(self.scalar.to_bytes().as_slice());
        out
    }

    /// Scalar as `uint256`
    pub fn to_u256(&self) -> U256 {
        U256::from_be_bytes(self.to_bytes())
    }

    /// Scalar as a 32 byte word, the form signers take
    pub fn to_b256(&self) -> B256 {
        B256::from(self.to_bytes())
    }

    /// Lowercase hex without prefix or leading zeros
    pub fn to_hex(&self) -> String {
        format!("{:x}", self.to_u256())
    }

    /// Uncompressed public key without the `0x04` tag
    fn raw_public_key(&self) -> [u8; 64] {
        let point = PublicKey::from_secret_scalar(&self.scalar).to_encoded_point(false);
        let mut out = [0u8; 64];
        out.copy_from_slice(&point.as_bytes()[1..]);
        out
    }

    /// Affine `(x, y)` of the public point
    pub fn public_point(&self) -> (U256, U256) {
        let raw = self.raw_public_key();
        (U256::from_be_slice(&raw[..32]), U256::from_be_slice(&raw[32..]))
    }

    /// Ethereum address controlled by this key
    pub fn address(&self) -> Address {
        let hash = keccak256(self.raw_public_key());
        Address::from_slice(&hash[12..])
    }
}

impl PartialEq for PrivateKey {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for PrivateKey {}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PrivateKey").field(&self.address()).finish()
    }
}
