use alloy_provider::PendingTransactionError;
use alloy_transport::TransportError;
use infinity_miner::KeyError;
use thiserror::Error;

/// Chain adapter errors
#[derive(Debug, Error)]
pub enum ChainError {
    /// RPC or websocket failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Transaction sent but its receipt could not be obtained
    #[error(transparent)]
    Pending(#[from] PendingTransactionError),

    /// Contract data did not decode
    #[error("abi: {0}")]
    Abi(#[from] alloy_sol_types::Error),

    /// Claim signature could not be produced
    #[error("signing: {0}")]
    Signing(#[from] alloy_signer::Error),

    /// Key bytes rejected by the signer
    #[error("invalid signing key: {0}")]
    InvalidKey(String),

    /// Contract published a problem the miner cannot use
    #[error("invalid problem: {0}")]
    Problem(#[from] KeyError),
}
