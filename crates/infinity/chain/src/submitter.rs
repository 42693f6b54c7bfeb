//! On-chain submission
//!
//! A claim is `submit(recipient, B·G, sig, data)` where `sig` is an EIP-191
//! personal signature by the combined key over `keccak256(recipient ++ data)`.
//! The receipt is then classified into an [`Outcome`].
//!
//! Failures are reported as [`SinkError::NotSent`] only when the transaction
//! certainly never reached the node; anything after that is
//! [`SinkError::Unverified`] and consumes the account nonce.

use crate::{
    ChainError,
    contract::{ECCPoint, PoW},
};
use alloy_network::{EthereumWallet, TransactionBuilder};
use alloy_primitives::{Address, B256, Bytes, Log, U256, keccak256};
use alloy_provider::{DynProvider, Provider, ProviderBuilder};
use alloy_rpc_types_eth::TransactionRequest;
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{SolCall, SolEvent};
use alloy_transport::TransportError;
use async_trait::async_trait;
use infinity_miner::{Outcome, PrivateKey, ProblemId, SinkError, SubmissionRequest, SubmissionSink};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

/// Default gas limit for a claim
pub const DEFAULT_GAS_LIMIT: u64 = 1_000_000;

/// Default wait for a receipt
pub const DEFAULT_RECEIPT_TIMEOUT: Duration = Duration::from_secs(60);

/// Digest signed by the combined key
pub fn claim_digest(recipient: Address, data: &[u8]) -> B256 {
    let mut packed = Vec::with_capacity(Address::len_bytes() + data.len());
    packed.extend_from_slice(recipient.as_slice());
    packed.extend_from_slice(data);
    keccak256(packed)
}

/// 65-byte `r ++ s ++ v` signature with `v` in `{27, 28}`
pub fn sign_claim(combined: &PrivateKey, recipient: Address, data: &[u8]) -> Result<Bytes, ChainError> {
    let signer =
        PrivateKeySigner::from_bytes(&combined.to_b256()).map_err(|e| ChainError::InvalidKey(e.to_string()))?;
    let signature = signer.sign_message_sync(claim_digest(recipient, data).as_slice())?;
    Ok(Bytes::copy_from_slice(&signature.as_bytes()))
}

/// Build the `submit` call for a claim
pub fn submit_call(recipient: Address, candidate: &PrivateKey, signature: Bytes, data: Bytes) -> PoW::submitCall {
    let (x, y) = candidate.public_point();
    PoW::submitCall { recipient, publicKeyB: ECCPoint { x, y }, signature, data }
}

/// Classify a mined claim from its status and logs.
///
/// Acceptance of `problem_id` wins over everything else. A new problem
/// without our acceptance means someone else got there first.
pub fn classify_receipt<'a>(
    success: bool,
    logs: impl IntoIterator<Item = &'a Log>,
    contract: Address,
    problem_id: ProblemId,
) -> Outcome {
    if !success {
        return Outcome::Reverted;
    }

    let mut new_problem = false;
    for log in logs.into_iter().filter(|log| log.address == contract) {
        if let Ok(solved) = PoW::ProblemSolved::decode_log(log) {
            if solved.data.nonce == problem_id {
                return Outcome::Confirmed;
            }
        } else if PoW::NewProblem::decode_log(log).is_ok() {
            new_problem = true;
        }
    }

    if new_problem { Outcome::Superseded } else { Outcome::Reverted }
}

/// Classify a failed `eth_sendRawTransaction`.
///
/// An error response means the node rejected the transaction. A transport
/// failure leaves open whether it was accepted.
pub fn broadcast_failure(error: TransportError) -> SinkError<ChainError> {
    if error.is_error_resp() {
        SinkError::NotSent(error.into())
    } else {
        SinkError::Unverified(error.into())
    }
}

/// Submitter settings
#[derive(Debug, Clone)]
pub struct SubmitterConfig {
    /// HTTP RPC endpoint
    pub rpc_url: String,
    /// PoW contract address
    pub contract: Address,
    /// Auxiliary payload attached to every claim
    pub data: Bytes,
    /// Gas limit per claim
    pub gas_limit: u64,
    /// How long to wait for a receipt
    pub receipt_timeout: Duration,
}

impl SubmitterConfig {
    /// Config with default gas limit and receipt timeout
    pub fn new(rpc_url: impl Into<String>, contract: Address) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            contract,
            data: Bytes::new(),
            gas_limit: DEFAULT_GAS_LIMIT,
            receipt_timeout: DEFAULT_RECEIPT_TIMEOUT,
        }
    }
}

/// [`SubmissionSink`] sending claims to the PoW contract
pub struct ChainSubmitter {
    provider: DynProvider,
    account: Address,
    chain_id: u64,
    config: SubmitterConfig,
}

impl ChainSubmitter {
    /// Connect with `signer` paying for and receiving the claims
    pub async fn connect(config: SubmitterConfig, signer: PrivateKeySigner) -> Result<Self, ChainError> {
        let account = signer.address();
        let provider =
            ProviderBuilder::new().wallet(EthereumWallet::from(signer)).connect(&config.rpc_url).await?.erased();
        let chain_id = provider.get_chain_id().await?;

        info!(target: "infinity::submitter", %account, chain_id, contract = %config.contract, "Submitter ready");
        Ok(Self { provider, account, chain_id, config })
    }

    /// Submitting account
    pub fn account(&self) -> Address {
        self.account
    }

    /// Chain id read at connect time
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Next account nonce including pending transactions
    pub async fn pending_nonce(&self) -> Result<u64, ChainError> {
        Ok(self.provider.get_transaction_count(self.account).pending().await?)
    }

    /// Account balance in wei
    pub async fn balance(&self) -> Result<U256, ChainError> {
        Ok(self.provider.get_balance(self.account).await?)
    }

    fn claim(&self, request: &SubmissionRequest, gas_price: u128) -> Result<TransactionRequest, ChainError> {
        let signature = sign_claim(&request.combined_key, self.account, &self.config.data)?;
        let call = submit_call(self.account, &request.candidate_key, signature, self.config.data.clone());

        Ok(TransactionRequest::default()
            .with_from(self.account)
            .with_to(self.config.contract)
            .with_input(call.abi_encode())
            .with_nonce(request.account_nonce)
            .with_gas_limit(self.config.gas_limit)
            .with_gas_price(gas_price)
            .with_chain_id(self.chain_id))
    }
}

#[async_trait]
impl SubmissionSink for ChainSubmitter {
    type Error = ChainError;

    async fn submit(&self, request: SubmissionRequest) -> Result<Outcome, SinkError<ChainError>> {
        let gas_price =
            self.provider.get_gas_price().await.map_err(|e| SinkError::NotSent(ChainError::from(e)))?;
        let tx = self.claim(&request, gas_price).map_err(SinkError::NotSent)?;

        let pending = self.provider.send_transaction(tx).await.map_err(broadcast_failure)?;
        let tx_hash = *pending.tx_hash();
        debug!(target: "infinity::submitter", %tx_hash, account_nonce = request.account_nonce, "Claim sent");

        let receipt = pending
            .with_timeout(Some(self.config.receipt_timeout))
            .get_receipt()
            .await
            .map_err(|e| SinkError::Unverified(ChainError::from(e)))?;
        let outcome = classify_receipt(
            receipt.status(),
            receipt.inner.logs().iter().map(|log| &log.inner),
            self.config.contract,
            request.problem_id,
        );

        debug!(
            target: "infinity::submitter",
            %tx_hash,
            block = ?receipt.block_number,
            gas_used = receipt.gas_used,
            %outcome,
            "Claim mined"
        );
        Ok(outcome)
    }
}

impl fmt::Debug for ChainSubmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainSubmitter")
            .field("account", &self.account)
            .field("chain_id", &self.chain_id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Signature, address, bytes};
    use alloy_transport::TransportErrorKind;

    const CONTRACT: Address = address!("00000000000000000000000000000000000000aa");
    const RECIPIENT: Address = address!("00000000000000000000000000000000000000bb");

    fn key(value: u64) -> PrivateKey {
        PrivateKey::from_u256(U256::from(value)).unwrap()
    }

    fn log<E: SolEvent>(address: Address, event: &E) -> Log {
        Log { address, data: event.encode_log_data() }
    }

    fn solved(nonce: u64) -> Log {
        log(CONTRACT, &PoW::ProblemSolved { solver: RECIPIENT, nonce: U256::from(nonce) })
    }

    fn new_problem(nonce: u64) -> Log {
        log(CONTRACT, &PoW::NewProblem { nonce: U256::from(nonce), privateKeyA: U256::from(7u64), difficulty: U256::MAX })
    }

    #[test]
    fn test_failed_receipt_is_reverted() {
        let logs = [solved(1)];
        assert_eq!(classify_receipt(false, &logs, CONTRACT, U256::from(1u64)), Outcome::Reverted);
    }

    #[test]
    fn test_acceptance_is_confirmed() {
        let logs = [solved(1), new_problem(2)];
        assert_eq!(classify_receipt(true, &logs, CONTRACT, U256::from(1u64)), Outcome::Confirmed);
    }

    #[test]
    fn test_new_problem_without_acceptance_is_superseded() {
        let logs = [new_problem(2)];
        assert_eq!(classify_receipt(true, &logs, CONTRACT, U256::from(1u64)), Outcome::Superseded);

        let logs = [solved(5), new_problem(6)];
        assert_eq!(classify_receipt(true, &logs, CONTRACT, U256::from(1u64)), Outcome::Superseded);
    }

    #[test]
    fn test_foreign_logs_ignored() {
        let other = address!("00000000000000000000000000000000000000cc");
        let logs = [
            log(other, &PoW::ProblemSolved { solver: RECIPIENT, nonce: U256::from(1u64) }),
            log(other, &PoW::NewProblem { nonce: U256::from(2u64), privateKeyA: U256::from(7u64), difficulty: U256::MAX }),
        ];
        assert_eq!(classify_receipt(true, &logs, CONTRACT, U256::from(1u64)), Outcome::Reverted);
        assert_eq!(classify_receipt(true, &[], CONTRACT, U256::from(1u64)), Outcome::Reverted);
    }

    #[test]
    fn test_lost_connection_on_send_consumes_nonce() {
        let error = broadcast_failure(TransportErrorKind::custom_str("connection reset"));
        assert!(error.was_sent());
        assert!(matches!(error, SinkError::Unverified(ChainError::Transport(_))));

        let error = broadcast_failure(TransportErrorKind::backend_gone());
        assert!(error.was_sent());
    }

    #[test]
    fn test_signature_recovers_combined_address() {
        let combined = key(0xabcdef);
        let data = bytes!("cafe");
        let raw = sign_claim(&combined, RECIPIENT, &data).unwrap();

        assert_eq!(raw.len(), 65);
        assert!(raw[64] == 27 || raw[64] == 28);

        let signature = Signature::try_from(raw.as_ref()).unwrap();
        let digest = claim_digest(RECIPIENT, &data);
        let recovered = signature.recover_address_from_msg(digest.as_slice()).unwrap();
        assert_eq!(recovered, combined.address());
    }

    #[test]
    fn test_claim_digest_packs_recipient_then_data() {
        let mut packed = RECIPIENT.to_vec();
        packed.extend_from_slice(&[1, 2, 3]);
        assert_eq!(claim_digest(RECIPIENT, &[1, 2, 3]), keccak256(&packed));
        assert_eq!(claim_digest(RECIPIENT, &[]), keccak256(RECIPIENT));
    }

    #[test]
    fn test_submit_call_carries_candidate_point() {
        let candidate = key(2);
        let call = submit_call(RECIPIENT, &candidate, Bytes::new(), bytes!("01"));
        let (x, y) = candidate.public_point();
        assert_eq!(call.publicKeyB, ECCPoint { x, y });
        assert_eq!(call.recipient, RECIPIENT);

        let decoded = PoW::submitCall::abi_decode(&call.abi_encode()).unwrap();
        assert_eq!(decoded, call);
    }
}
