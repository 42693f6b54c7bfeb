//! Problem source
//!
//! Follows `NewProblem` events over a websocket subscription and publishes
//! each one to the miner. Every (re)subscription is followed by a read of the
//! open problem, so a problem announced while no subscription was live is
//! still picked up. A subscription that ends or fails to open is retried after
//! [`RESUBSCRIBE_DELAY`] on a fresh connection.

use crate::{ChainError, contract::PoW};
use alloy_network::TransactionBuilder;
use alloy_primitives::{Address, Log};
use alloy_provider::{DynProvider, Provider, ProviderBuilder};
use alloy_rpc_types_eth::{Filter, TransactionRequest};
use alloy_sol_types::{SolCall, SolEvent};
use alloy_transport_ws::WsConnect;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use futures::{StreamExt, stream::BoxStream};
use infinity_miner::{Problem, ProblemDistributor};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Wait between subscription attempts
pub const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// Problems decoded from one subscription
pub type ProblemStream = BoxStream<'static, Result<Problem, ChainError>>;

/// Decode a `NewProblem` log into a [`Problem`]
pub fn decode_problem(log: &Log) -> Result<Problem, ChainError> {
    let event = PoW::NewProblem::decode_log(log)?;
    Ok(Problem::from_raw(event.data.nonce, event.data.privateKeyA, event.data.difficulty)?)
}

/// Where problems come from
#[async_trait]
pub trait ProblemFeed: Send + Sync {
    /// Open a subscription to newly announced problems
    async fn subscribe(&self) -> Result<ProblemStream, ChainError>;

    /// Read the problem that is open right now
    async fn current(&self) -> Result<Problem, ChainError>;
}

/// Keep `distributor` fed from `feed`. Never returns; abort the task to stop.
///
/// Each round subscribes first and only then reads the open problem, so
/// nothing announced in between is missed. The open problem is only
/// published if it is newer than the one already active.
pub async fn follow<F: ProblemFeed + ?Sized>(feed: &F, distributor: &ProblemDistributor, retry_delay: Duration) {
    loop {
        match feed.subscribe().await {
            Ok(mut problems) => {
                debug!(target: "infinity::source", "Subscribed to NewProblem");

                match feed.current().await {
                    Ok(problem) => publish_if_newer(distributor, problem),
                    Err(e) => warn!(target: "infinity::source", error = %e, "Could not read current problem"),
                }

                while let Some(problem) = problems.next().await {
                    match problem {
                        Ok(problem) => distributor.publish(problem),
                        Err(e) => warn!(target: "infinity::source", error = %e, "Skipping problem event"),
                    }
                }
                warn!(target: "infinity::source", "Problem subscription ended");
            }
            Err(e) => {
                warn!(target: "infinity::source", error = %e, "Problem subscription failed");
            }
        }

        tokio::time::sleep(retry_delay).await;
    }
}

fn publish_if_newer(distributor: &ProblemDistributor, problem: Problem) {
    match distributor.current() {
        Some(active) if problem.nonce <= active.nonce => {
            debug!(target: "infinity::source", nonce = %problem.nonce, "Open problem already known");
        }
        _ => distributor.publish(problem),
    }
}

/// Websocket-backed feed of contract problems
pub struct ProblemSource {
    ws_url: String,
    contract: Address,
    provider: ArcSwap<DynProvider>,
    subscriptions: AtomicU64,
    retry_delay: Duration,
}

impl ProblemSource {
    /// Connect to `ws_url`
    pub async fn connect(ws_url: &str, contract: Address) -> Result<Self, ChainError> {
        let provider = connect_ws(ws_url).await?;
        info!(target: "infinity::source", %contract, "Connected to problem feed");
        Ok(Self {
            ws_url: ws_url.to_string(),
            contract,
            provider: ArcSwap::from_pointee(provider),
            subscriptions: AtomicU64::new(0),
            retry_delay: RESUBSCRIBE_DELAY,
        })
    }

    /// Wait `delay` between subscription attempts
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Log filter selecting `NewProblem` events of the contract
    pub fn filter(&self) -> Filter {
        Filter::new().address(self.contract).event_signature(PoW::NewProblem::SIGNATURE_HASH)
    }

    /// Read the problem that is open right now
    pub async fn bootstrap(&self) -> Result<Problem, ChainError> {
        let tx = TransactionRequest::default()
            .with_to(self.contract)
            .with_input(PoW::currentProblemCall {}.abi_encode());
        let provider = self.provider.load_full();
        let output = provider.call(tx).await?;
        let current = PoW::currentProblemCall::abi_decode_returns(&output)?;
        Ok(Problem::from_raw(current.nonce, current.privateKeyA, current.difficulty)?)
    }

    /// Publish every new problem, resubscribing whenever the feed drops.
    /// Never returns; abort the task to stop.
    pub async fn run(self, distributor: ProblemDistributor) {
        let retry_delay = self.retry_delay;
        follow(&self, &distributor, retry_delay).await;
    }
}

#[async_trait]
impl ProblemFeed for ProblemSource {
    async fn subscribe(&self) -> Result<ProblemStream, ChainError> {
        if self.subscriptions.fetch_add(1, Ordering::Relaxed) > 0 {
            // the old connection may be the reason the last subscription ended
            self.provider.store(Arc::new(connect_ws(&self.ws_url).await?));
            info!(target: "infinity::source", contract = %self.contract, "Reconnected to problem feed");
        }

        let provider = self.provider.load_full();
        let subscription = provider.subscribe_logs(&self.filter()).await?;
        Ok(subscription.into_stream().map(|log| decode_problem(&log.inner)).boxed())
    }

    async fn current(&self) -> Result<Problem, ChainError> {
        self.bootstrap().await
    }
}

async fn connect_ws(ws_url: &str) -> Result<DynProvider, ChainError> {
    Ok(ProviderBuilder::new().connect_ws(WsConnect::new(ws_url)).await?.erased())
}

impl fmt::Debug for ProblemSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProblemSource")
            .field("contract", &self.contract)
            .field("subscriptions", &self.subscriptions.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{U256, address};
    use alloy_transport::TransportErrorKind;
    use futures::stream;
    use infinity_miner::PrivateKey;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    const CONTRACT: Address = address!("00000000000000000000000000000000000000aa");

    fn event_log(private_key_a: U256) -> Log {
        let event = PoW::NewProblem { nonce: U256::from(4u64), privateKeyA: private_key_a, difficulty: U256::from(99u64) };
        Log { address: CONTRACT, data: event.encode_log_data() }
    }

    #[test]
    fn test_decode_problem() {
        let problem = decode_problem(&event_log(U256::from(12345u64))).unwrap();
        assert_eq!(problem.nonce, U256::from(4u64));
        assert_eq!(problem.base_key, PrivateKey::from_u256(U256::from(12345u64)).unwrap());
        assert_eq!(problem.difficulty, U256::from(99u64));
    }

    #[test]
    fn test_zero_base_key_rejected() {
        assert!(matches!(decode_problem(&event_log(U256::ZERO)), Err(ChainError::Problem(_))));
    }

    #[test]
    fn test_other_event_rejected() {
        let solved = PoW::ProblemSolved { solver: CONTRACT, nonce: U256::from(1u64) };
        let log = Log { address: CONTRACT, data: solved.encode_log_data() };
        assert!(matches!(decode_problem(&log), Err(ChainError::Abi(_))));
    }

    fn problem(nonce: u64) -> Problem {
        Problem::new(U256::from(nonce), PrivateKey::from_u256(U256::from(nonce + 100)).unwrap(), U256::MAX)
    }

    /// Scripted feed: each subscription replays one batch of events and ends
    struct ScriptedFeed {
        rounds: Mutex<VecDeque<Result<Vec<Problem>, ()>>>,
        open: Mutex<Problem>,
        subscribes: AtomicU64,
        reads: AtomicU64,
    }

    impl ScriptedFeed {
        fn new(open: Problem, rounds: Vec<Result<Vec<Problem>, ()>>) -> Self {
            Self {
                rounds: Mutex::new(rounds.into()),
                open: Mutex::new(open),
                subscribes: AtomicU64::new(0),
                reads: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl ProblemFeed for ScriptedFeed {
        async fn subscribe(&self) -> Result<ProblemStream, ChainError> {
            self.subscribes.fetch_add(1, Ordering::SeqCst);
            match self.rounds.lock().unwrap().pop_front() {
                Some(Ok(events)) => {
                    // later rounds read the newest announced problem as open
                    if let Some(last) = events.last() {
                        *self.open.lock().unwrap() = last.clone();
                    }
                    Ok(stream::iter(events.into_iter().map(Ok::<_, ChainError>)).boxed())
                }
                Some(Err(())) => Err(TransportErrorKind::backend_gone().into()),
                // no more scripted rounds: stay subscribed forever
                None => Ok(stream::pending().boxed()),
            }
        }

        async fn current(&self) -> Result<Problem, ChainError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(self.open.lock().unwrap().clone())
        }
    }

    async fn run_feed(feed: Arc<ScriptedFeed>, distributor: ProblemDistributor) -> tokio::task::JoinHandle<()> {
        let task = tokio::spawn(async move { follow(feed.as_ref(), &distributor, Duration::from_millis(10)).await });
        tokio::time::sleep(Duration::from_millis(200)).await;
        task
    }

    #[tokio::test]
    async fn test_resubscribes_after_stream_ends() {
        let feed = Arc::new(ScriptedFeed::new(problem(1), vec![Ok(vec![problem(2)]), Ok(vec![problem(3)])]));
        let distributor = ProblemDistributor::new();

        let task = run_feed(Arc::clone(&feed), distributor.clone()).await;
        assert!(!task.is_finished());
        task.abort();

        // two scripted rounds, then the one that stays open
        assert_eq!(feed.subscribes.load(Ordering::SeqCst), 3);
        assert_eq!(distributor.current().unwrap().nonce, U256::from(3u64));
    }

    #[tokio::test]
    async fn test_retries_failed_subscription() {
        let feed = Arc::new(ScriptedFeed::new(problem(5), vec![Err(()), Err(())]));
        let distributor = ProblemDistributor::new();

        let task = run_feed(Arc::clone(&feed), distributor.clone()).await;
        task.abort();

        assert_eq!(feed.subscribes.load(Ordering::SeqCst), 3);
        assert_eq!(feed.reads.load(Ordering::SeqCst), 1);
        assert_eq!(distributor.current().unwrap().nonce, U256::from(5u64));
    }

    #[tokio::test]
    async fn test_open_problem_read_after_subscribing() {
        // the open problem is read once the subscription is live, even with no events
        let feed = Arc::new(ScriptedFeed::new(problem(9), vec![]));
        let distributor = ProblemDistributor::new();

        let task = run_feed(Arc::clone(&feed), distributor.clone()).await;
        task.abort();

        assert_eq!(feed.subscribes.load(Ordering::SeqCst), 1);
        assert_eq!(feed.reads.load(Ordering::SeqCst), 1);
        assert_eq!(distributor.current().unwrap().nonce, U256::from(9u64));
    }

    #[tokio::test]
    async fn test_older_open_problem_not_republished() {
        let distributor = ProblemDistributor::new();
        distributor.publish(problem(4));
        let version = distributor.cell().version();

        publish_if_newer(&distributor, problem(3));
        publish_if_newer(&distributor, problem(4));
        assert_eq!(distributor.cell().version(), version);

        publish_if_newer(&distributor, problem(5));
        assert_eq!(distributor.current().unwrap().nonce, U256::from(5u64));
    }
}
