//! Resumable pull scanner, one per configured chain.
//!
//! The scanner polls the head, fetches the bridge contract's logs in bounded
//! block ranges behind a confirmation margin, hands every tracked leg to the
//! reconciliation engine and then persists the last fully processed block.
//! A transient failure inside a range leaves the cursor where it was, so the
//! range is fetched again; reconciliation is idempotent for redelivered legs.

use std::sync::Arc;

use bridge_monitor_domain::config::{ChainSpec, ScanSettings};
use bridge_monitor_domain::storage::{CheckpointStore, StorageError};
use ethers::types::Address;
use metrics::{counter, gauge};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::events::{extract_leg, LegExtraction};
use crate::reconcile::{LegHandler, ReconcileError};
use crate::rpc::{ChainConnector, LogSource, RpcError};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("invalid bridge contract address `{0}`")]
    InvalidContract(String),
    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The head is still within the confirmation margin of the next block.
    Idle { head: u64 },
    /// `[from, to]` was fully processed and `to` is the new cursor.
    Advanced { from: u64, to: u64, legs: usize },
}

pub struct ChainScanner<C, K, H> {
    chain: ChainSpec,
    settings: ScanSettings,
    connector: C,
    checkpoints: Arc<K>,
    handler: Arc<H>,
}

impl<C, K, H> ChainScanner<C, K, H>
where
    C: ChainConnector,
    K: CheckpointStore,
    H: LegHandler,
{
    pub fn new(
        chain: ChainSpec,
        settings: ScanSettings,
        connector: C,
        checkpoints: Arc<K>,
        handler: Arc<H>,
    ) -> Self {
        Self {
            chain,
            settings,
            connector,
            checkpoints,
            handler,
        }
    }

    pub fn chain(&self) -> &ChainSpec {
        &self.chain
    }

    /// Runs scan sessions forever, pausing between reconnects.
    pub async fn run(self) {
        info!(
            chain = %self.chain.name,
            contract = %self.chain.bridge_contract,
            token = ?self.chain.token_contract,
            token_index = self.chain.token_index,
            "chain scanner started"
        );
        loop {
            if let Err(err) = self.scan_session().await {
                error!(
                    chain = %self.chain.name,
                    %err,
                    retry_in = ?self.settings.reconnect_interval,
                    "scan session ended, reconnecting"
                );
            }
            sleep(self.settings.reconnect_interval).await;
        }
    }

    /// The last fully processed block, or `None` when the chain has never
    /// been scanned and the configured start block comes next.
    pub async fn resume_cursor(&self) -> Result<Option<u64>, StorageError> {
        self.checkpoints.load_checkpoint(&self.chain.name).await
    }

    /// Connects, resumes from the checkpoint and scans until too many
    /// consecutive steps fail. Only returns with the error that ended it.
    pub async fn scan_session(&self) -> Result<(), ScanError> {
        let source = self.connector.connect().await.map_err(|err| {
            record_rpc(&self.chain.name, "connect", false);
            err
        })?;
        record_rpc(&self.chain.name, "connect", true);

        let mut cursor = self.resume_cursor().await?;
        info!(
            chain = %self.chain.name,
            ?cursor,
            start_block = self.chain.start_block,
            "scan session resumed"
        );

        let mut failures: u32 = 0;
        loop {
            match self.scan_range(&source, cursor).await {
                Ok(StepOutcome::Idle { head }) => {
                    failures = 0;
                    debug!(chain = %self.chain.name, head, ?cursor, "waiting for confirmations");
                    sleep(self.settings.idle_interval).await;
                }
                Ok(StepOutcome::Advanced { to, .. }) => {
                    failures = 0;
                    cursor = Some(to);
                    sleep(self.settings.poll_interval).await;
                }
                Err(err) => {
                    failures += 1;
                    warn!(chain = %self.chain.name, ?cursor, failures, %err, "scan step failed");
                    if failures >= self.settings.max_consecutive_failures {
                        return Err(err);
                    }
                    sleep(self.settings.retry_interval).await;
                }
            }
        }
    }

    /// One scan step starting right after `cursor`, or at the configured
    /// start block when nothing has been processed yet.
    pub async fn scan_range(
        &self,
        source: &C::Source,
        cursor: Option<u64>,
    ) -> Result<StepOutcome, ScanError> {
        let chain = self.chain.name.as_str();
        let contract: Address = self
            .chain
            .bridge_contract
            .parse()
            .map_err(|_| ScanError::InvalidContract(self.chain.bridge_contract.clone()))?;

        let head = source.block_number().await;
        record_rpc(chain, "eth_blockNumber", head.is_ok());
        let head = head?;

        let from = cursor.map_or(self.chain.start_block, |block| block.saturating_add(1));
        if head < from.saturating_add(self.settings.confirmations) {
            return Ok(StepOutcome::Idle { head });
        }
        let to = from
            .saturating_add(self.settings.block_step.saturating_sub(1))
            .min(head);

        let logs = source.get_logs(contract, from, to).await;
        record_rpc(chain, "eth_getLogs", logs.is_ok());
        let logs = logs?;
        debug!(chain, from, to, logs = logs.len(), "fetched logs");

        let mut legs = 0;
        for log in &logs {
            let leg = match extract_leg(log, &self.chain) {
                Ok(LegExtraction::Leg(leg)) => leg,
                Ok(LegExtraction::ForeignToken) => {
                    counter!("monitor_legs_total", "chain" => chain.to_string(), "result" => "foreign_token")
                        .increment(1);
                    continue;
                }
                Ok(LegExtraction::Unrecognized) => {
                    counter!("monitor_legs_total", "chain" => chain.to_string(), "result" => "unrecognized")
                        .increment(1);
                    continue;
                }
                Err(err) => {
                    counter!("monitor_legs_total", "chain" => chain.to_string(), "result" => "decode_error")
                        .increment(1);
                    warn!(chain, tx_hash = ?log.transaction_hash, %err, "dropping undecodable event");
                    continue;
                }
            };
            counter!("monitor_legs_total", "chain" => chain.to_string(), "result" => "decoded")
                .increment(1);
            legs += 1;

            match self.handler.handle_leg(leg).await {
                Ok(outcome) => debug!(chain, ?outcome, "leg handled"),
                Err(err) if err.is_retryable() => return Err(err.into()),
                // Already alerted. The event is skipped so one bad record
                // cannot hold back the rest of the chain.
                Err(err) => warn!(chain, %err, "leg rejected"),
            }
        }

        if let Err(err) = self.checkpoints.save_checkpoint(chain, to).await {
            error!(chain, block = to, %err, "failed to persist checkpoint");
        }
        gauge!("monitor_scan_checkpoint", "chain" => chain.to_string()).set(to as f64);
        info!(chain, from, to, head, legs, "scanned block range");

        Ok(StepOutcome::Advanced { from, to, legs })
    }
}

fn record_rpc(chain: &str, method: &'static str, ok: bool) {
    let result = if ok { "ok" } else { "error" };
    counter!(
        "monitor_rpc_calls_total",
        "chain" => chain.to_string(),
        "method" => method,
        "result" => result
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_monitor_domain::codec::encode_identifier;
    use bridge_monitor_domain::model::{LegAction, TransferId, TransferLeg};
    use bridge_monitor_domain::storage::{StorageResult, TransferStore};
    use bridge_monitor_storage::SeaOrmStorage;
    use ethers::types::Log;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::alert::AlertKind;
    use crate::events::tests::{bridge_log, chain, tx_hex, CREATED};
    use crate::reconcile::tests::RecordingSink;
    use crate::reconcile::{LegOutcome, Reconciler};

    #[derive(Default)]
    struct FakeChain {
        heads: Mutex<VecDeque<Result<u64, RpcError>>>,
        logs: Mutex<Vec<(u64, Log)>>,
        fail_logs: AtomicUsize,
        ranges: Mutex<Vec<(u64, u64)>>,
    }

    impl FakeChain {
        fn with_heads(heads: impl IntoIterator<Item = u64>) -> Arc<Self> {
            let chain = Self::default();
            *chain.heads.lock().unwrap() = heads.into_iter().map(Ok).collect();
            Arc::new(chain)
        }

        fn ranges(&self) -> Vec<(u64, u64)> {
            self.ranges.lock().unwrap().clone()
        }
    }

    struct FakeSource(Arc<FakeChain>);

    #[async_trait]
    impl LogSource for FakeSource {
        async fn block_number(&self) -> Result<u64, RpcError> {
            self.0
                .heads
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(RpcError::Transport("no more heads".into())))
        }

        async fn get_logs(&self, _contract: Address, from: u64, to: u64) -> Result<Vec<Log>, RpcError> {
            if self
                .0
                .fail_logs
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(RpcError::Transport("connection reset".into()));
            }
            self.0.ranges.lock().unwrap().push((from, to));
            Ok(self
                .0
                .logs
                .lock()
                .unwrap()
                .iter()
                .filter(|(block, _)| (from..=to).contains(block))
                .map(|(_, log)| log.clone())
                .collect())
        }
    }

    struct FakeConnector {
        chain: Arc<FakeChain>,
        connects: AtomicUsize,
    }

    impl FakeConnector {
        fn new(chain: Arc<FakeChain>) -> Self {
            Self {
                chain,
                connects: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ChainConnector for FakeConnector {
        type Source = FakeSource;

        async fn connect(&self) -> Result<Self::Source, RpcError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(FakeSource(self.chain.clone()))
        }
    }

    #[derive(Default)]
    struct MemoryCheckpoints {
        blocks: Mutex<HashMap<String, u64>>,
        fail_saves: AtomicUsize,
    }

    #[async_trait]
    impl CheckpointStore for MemoryCheckpoints {
        async fn load_checkpoint(&self, chain: &str) -> StorageResult<Option<u64>> {
            Ok(self.blocks.lock().unwrap().get(chain).copied())
        }

        async fn save_checkpoint(&self, chain: &str, block: u64) -> StorageResult<()> {
            if self.fail_saves.load(Ordering::SeqCst) > 0 {
                self.fail_saves.fetch_sub(1, Ordering::SeqCst);
                return Err(StorageError::Database("disk full".into()));
            }
            self.blocks.lock().unwrap().insert(chain.to_string(), block);
            Ok(())
        }
    }

    #[derive(Default)]
    struct CollectingHandler {
        legs: Mutex<Vec<TransferLeg>>,
        fail_storage: AtomicUsize,
        corrupt_storage: AtomicUsize,
    }

    #[async_trait]
    impl LegHandler for CollectingHandler {
        async fn handle_leg(&self, leg: TransferLeg) -> Result<LegOutcome, ReconcileError> {
            if self
                .fail_storage
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StorageError::Database("locked".into()).into());
            }
            if self
                .corrupt_storage
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StorageError::Corrupt {
                    key: leg.transfer_id.to_string(),
                    reason: "unknown action `swap`".into(),
                }
                .into());
            }
            self.legs.lock().unwrap().push(leg);
            Ok(LegOutcome::Recorded)
        }
    }

    type TestScanner = ChainScanner<FakeConnector, MemoryCheckpoints, CollectingHandler>;

    fn settings() -> ScanSettings {
        ScanSettings {
            block_step: 50,
            confirmations: 10,
            idle_interval: Duration::from_secs(600),
            retry_interval: Duration::from_secs(5),
            poll_interval: Duration::from_secs(5),
            reconnect_interval: Duration::from_secs(30),
            max_consecutive_failures: 3,
        }
    }

    fn scanner(
        fake: Arc<FakeChain>,
        start_block: u64,
    ) -> (TestScanner, Arc<MemoryCheckpoints>, Arc<CollectingHandler>) {
        let mut ethereum = chain("Ethereum", 2, 18);
        ethereum.start_block = start_block;
        let checkpoints = Arc::new(MemoryCheckpoints::default());
        let handler = Arc::new(CollectingHandler::default());
        (
            ChainScanner::new(
                ethereum,
                settings(),
                FakeConnector::new(fake),
                checkpoints.clone(),
                handler.clone(),
            ),
            checkpoints,
            handler,
        )
    }

    #[tokio::test]
    async fn fresh_chain_has_no_cursor() {
        let (fresh, _, _) = scanner(FakeChain::with_heads([]), 1_000);
        assert_eq!(fresh.resume_cursor().await.unwrap(), None);
    }

    #[tokio::test]
    async fn first_range_starts_at_configured_block() {
        let fake = FakeChain::with_heads([5_000]);
        let (fresh, _, _) = scanner(fake.clone(), 1_000);

        let source = fresh.connector.connect().await.unwrap();
        let outcome = fresh.scan_range(&source, None).await.unwrap();

        assert_eq!(
            outcome,
            StepOutcome::Advanced {
                from: 1_000,
                to: 1_049,
                legs: 0
            }
        );
    }

    #[tokio::test]
    async fn genesis_block_is_scanned_when_configured() {
        let fake = FakeChain::with_heads([500]);
        let identifier = encode_identifier(2, 1_000, CREATED);
        *fake.logs.lock().unwrap() = vec![(0, bridge_log(LegAction::Burn, identifier, 1, 0))];
        let (genesis, checkpoints, handler) = scanner(fake.clone(), 0);

        let source = genesis.connector.connect().await.unwrap();
        let outcome = genesis.scan_range(&source, None).await.unwrap();

        assert_eq!(
            outcome,
            StepOutcome::Advanced {
                from: 0,
                to: 49,
                legs: 1
            }
        );
        assert_eq!(fake.ranges(), vec![(0, 49)]);
        assert_eq!(handler.legs.lock().unwrap().len(), 1);
        assert_eq!(checkpoints.load_checkpoint("Ethereum").await.unwrap(), Some(49));
    }

    #[tokio::test]
    async fn resumes_right_after_persisted_checkpoint() {
        let fake = FakeChain::with_heads([500]);
        let (resumed, checkpoints, _) = scanner(fake.clone(), 0);
        checkpoints.save_checkpoint("Ethereum", 200).await.unwrap();

        let source = resumed.connector.connect().await.unwrap();
        let cursor = resumed.resume_cursor().await.unwrap();
        let outcome = resumed.scan_range(&source, cursor).await.unwrap();

        assert_eq!(
            outcome,
            StepOutcome::Advanced {
                from: 201,
                to: 250,
                legs: 0
            }
        );
        assert_eq!(fake.ranges(), vec![(201, 250)]);
        assert_eq!(checkpoints.load_checkpoint("Ethereum").await.unwrap(), Some(250));
    }

    #[tokio::test]
    async fn range_is_capped_at_head() {
        let fake = FakeChain::with_heads([130]);
        let (capped, checkpoints, _) = scanner(fake.clone(), 0);

        let source = capped.connector.connect().await.unwrap();
        let outcome = capped.scan_range(&source, Some(100)).await.unwrap();

        assert_eq!(
            outcome,
            StepOutcome::Advanced {
                from: 101,
                to: 130,
                legs: 0
            }
        );
        assert_eq!(checkpoints.load_checkpoint("Ethereum").await.unwrap(), Some(130));
    }

    #[tokio::test]
    async fn head_within_margin_is_idle() {
        let fake = FakeChain::with_heads([110]);
        let (idle, checkpoints, _) = scanner(fake.clone(), 0);

        let source = idle.connector.connect().await.unwrap();
        let outcome = idle.scan_range(&source, Some(100)).await.unwrap();

        assert_eq!(outcome, StepOutcome::Idle { head: 110 });
        assert!(fake.ranges().is_empty());
        assert_eq!(checkpoints.load_checkpoint("Ethereum").await.unwrap(), None);
    }

    #[tokio::test]
    async fn failed_fetch_keeps_checkpoint() {
        let fake = FakeChain::with_heads([500]);
        fake.fail_logs.store(1, Ordering::SeqCst);
        let (failing, checkpoints, _) = scanner(fake.clone(), 0);

        let source = failing.connector.connect().await.unwrap();
        let err = failing.scan_range(&source, Some(100)).await.unwrap_err();

        assert!(matches!(err, ScanError::Rpc(_)));
        assert_eq!(checkpoints.load_checkpoint("Ethereum").await.unwrap(), None);
    }

    #[tokio::test]
    async fn tracked_legs_are_forwarded_and_others_dropped() {
        let fake = FakeChain::with_heads([500]);
        let tracked = encode_identifier(2, 1_000_000_000_000_000_000, CREATED);
        let foreign = encode_identifier(9, 1_000_000_000_000_000_000, CREATED);
        let zero = encode_identifier(2, 0, CREATED);
        *fake.logs.lock().unwrap() = vec![
            (120, bridge_log(LegAction::Burn, tracked, 1, 120)),
            (121, bridge_log(LegAction::Burn, foreign, 2, 121)),
            (122, bridge_log(LegAction::Mint, zero, 3, 122)),
        ];
        let (filtering, _, handler) = scanner(fake.clone(), 0);

        let source = filtering.connector.connect().await.unwrap();
        let outcome = filtering.scan_range(&source, Some(100)).await.unwrap();

        assert_eq!(
            outcome,
            StepOutcome::Advanced {
                from: 101,
                to: 150,
                legs: 1
            }
        );
        let legs = handler.legs.lock().unwrap();
        assert_eq!(legs.len(), 1);
        assert_eq!(legs[0].tx_hash, tx_hex(1));
        assert_eq!(legs[0].amount, 1_000_000);
    }

    #[tokio::test]
    async fn storage_failure_during_range_retries_the_range() {
        let fake = FakeChain::with_heads([500, 500]);
        let identifier = encode_identifier(2, 1_000, CREATED);
        *fake.logs.lock().unwrap() = vec![(120, bridge_log(LegAction::Burn, identifier, 1, 120))];
        let (retrying, checkpoints, handler) = scanner(fake.clone(), 0);
        handler.fail_storage.store(1, Ordering::SeqCst);

        let source = retrying.connector.connect().await.unwrap();
        assert!(matches!(
            retrying.scan_range(&source, Some(100)).await,
            Err(ScanError::Reconcile(_))
        ));
        assert_eq!(checkpoints.load_checkpoint("Ethereum").await.unwrap(), None);

        retrying.scan_range(&source, Some(100)).await.unwrap();
        assert_eq!(fake.ranges(), vec![(101, 150), (101, 150)]);
        assert_eq!(handler.legs.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn corrupt_record_is_skipped_without_holding_back_the_range() {
        let fake = FakeChain::with_heads([500]);
        *fake.logs.lock().unwrap() = vec![
            (120, bridge_log(LegAction::Burn, encode_identifier(2, 7, CREATED), 1, 120)),
            (121, bridge_log(LegAction::Burn, encode_identifier(2, 8, CREATED), 2, 121)),
        ];
        let (skipping, checkpoints, handler) = scanner(fake.clone(), 0);
        handler.corrupt_storage.store(1, Ordering::SeqCst);

        let source = skipping.connector.connect().await.unwrap();
        let outcome = skipping.scan_range(&source, Some(100)).await.unwrap();

        assert!(matches!(outcome, StepOutcome::Advanced { to: 150, legs: 2, .. }));
        assert_eq!(handler.legs.lock().unwrap().len(), 1);
        assert_eq!(checkpoints.load_checkpoint("Ethereum").await.unwrap(), Some(150));
    }

    #[tokio::test]
    async fn full_width_amount_does_not_stall_the_chain() {
        let storage = Arc::new(SeaOrmStorage::connect("sqlite::memory:").await.unwrap());
        let sink = Arc::new(RecordingSink::default());
        let reconciler = Arc::new(Reconciler::new(storage.clone(), sink.clone()));

        let huge = encode_identifier(2, u64::MAX, CREATED);
        let later = encode_identifier(2, 1_000, CREATED);
        let fake = FakeChain::with_heads([500]);
        *fake.logs.lock().unwrap() = vec![
            (120, bridge_log(LegAction::Burn, huge, 1, 120)),
            (130, bridge_log(LegAction::Burn, later, 2, 130)),
        ];
        let persisted = ChainScanner::new(
            chain("Ethereum", 2, 6),
            settings(),
            FakeConnector::new(fake.clone()),
            storage.clone(),
            reconciler,
        );

        let source = persisted.connector.connect().await.unwrap();
        let outcome = persisted.scan_range(&source, Some(100)).await.unwrap();

        assert!(matches!(outcome, StepOutcome::Advanced { to: 150, legs: 2, .. }));
        let stored = storage
            .find_transfer(&TransferId::from_bytes(&huge))
            .await
            .unwrap()
            .expect("full-width transfer stored");
        assert_eq!(stored.leg_a.amount, u64::MAX);
        assert!(storage
            .find_transfer(&TransferId::from_bytes(&later))
            .await
            .unwrap()
            .is_some());
        assert_eq!(storage.load_checkpoint("Ethereum").await.unwrap(), Some(150));
        assert!(!sink.kinds().contains(&AlertKind::UnreadableRecord));
    }

    #[tokio::test]
    async fn checkpoint_write_failure_still_advances() {
        let fake = FakeChain::with_heads([500]);
        let (unsaved, checkpoints, _) = scanner(fake.clone(), 0);
        checkpoints.fail_saves.store(1, Ordering::SeqCst);

        let source = unsaved.connector.connect().await.unwrap();
        let outcome = unsaved.scan_range(&source, Some(100)).await.unwrap();

        assert!(matches!(outcome, StepOutcome::Advanced { to: 150, .. }));
        assert_eq!(checkpoints.load_checkpoint("Ethereum").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn session_scans_consecutive_ranges_then_gives_up() {
        // Two ranges, one idle poll, then the head query keeps failing.
        let fake = FakeChain::with_heads([500, 500, 150]);
        let (session, checkpoints, _) = scanner(fake.clone(), 101);

        let err = session.scan_session().await.unwrap_err();

        assert!(matches!(err, ScanError::Rpc(_)));
        assert_eq!(fake.ranges(), vec![(101, 150), (151, 200)]);
        assert_eq!(checkpoints.load_checkpoint("Ethereum").await.unwrap(), Some(200));
        assert_eq!(session.connector.connects.load(Ordering::SeqCst), 1);
    }
}
