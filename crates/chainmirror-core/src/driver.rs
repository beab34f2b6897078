//! The chain sync driver. Decides, block by block, what to apply or undo.
//!
//! Each step first consults the status ledger: a non-terminal status means a
//! previous apply/undo was interrupted, and the recorded block is invalidated
//! before anything else happens. Then:
//!
//! - no indexed tip → index the genesis block;
//! - the source's block at `tip + 1` extends the tip → apply it;
//! - it does not → undo exactly the tip block;
//! - there is no block at `tip + 1` → check that the source still has the
//!   tip at its height, and undo it if not.
//!
//! A reorg of depth k is therefore resolved by k single-block undos, each
//! re-evaluating the fork condition, followed by forward indexing.
//!
//! A cycle repeats steps until one does no work. Cycles never overlap: a tick
//! that finds one in flight returns immediately. Cancellation is cooperative
//! and only observed between blocks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

use crate::block::{Block, BlockIndexer, BlockMapper};
use crate::config::SyncConfig;
use crate::error::IndexerError;
use crate::handler::IndexerRegistry;
use crate::source::ChainSource;
use crate::status::{Status, StatusLedger, SyncStatus};
use crate::store::KeyedStore;
use crate::types::SourceBlock;

/// The unit of work a single [`SyncDriver::step`] performed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStep {
    /// The genesis block was indexed.
    Genesis { hash: String },
    /// A block extending the tip was applied.
    Indexed { height: u32, hash: String },
    /// The tip block was undone.
    Invalidated { height: u32, hash: String },
    /// Nothing new on the source.
    UpToDate,
}

impl SyncStep {
    pub fn did_work(&self) -> bool {
        !matches!(self, Self::UpToDate)
    }
}

/// Result of [`SyncDriver::cycle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Not running, or another cycle is in flight.
    Skipped,
    /// The cycle ran `steps` units of work before catching up or being stopped.
    Completed { steps: usize },
}

/// Orchestrates the sub-indexer registry against a chain source.
pub struct SyncDriver {
    source: Arc<dyn ChainSource>,
    registry: IndexerRegistry,
    blocks: BlockMapper,
    ledger: StatusLedger,
    config: SyncConfig,
    running: AtomicBool,
    indexing: watch::Sender<bool>,
}

/// Clears the `indexing` flag when a cycle ends, however it ends.
struct IndexingGuard<'a>(&'a watch::Sender<bool>);

impl Drop for IndexingGuard<'_> {
    fn drop(&mut self) {
        self.0.send_replace(false);
    }
}

impl SyncDriver {
    /// Build a driver over `store`.
    ///
    /// A [`BlockIndexer`] is appended to `registry`, so the block record is
    /// always the last write of an apply.
    pub fn new(
        source: Arc<dyn ChainSource>,
        store: Arc<dyn KeyedStore>,
        mut registry: IndexerRegistry,
        config: SyncConfig,
    ) -> Self {
        let blocks = BlockMapper::new(Arc::clone(&store));
        registry.register(Arc::new(BlockIndexer::new(blocks.clone())));
        let (indexing, _) = watch::channel(false);
        Self {
            source,
            registry,
            blocks,
            ledger: StatusLedger::new(store),
            config,
            running: AtomicBool::new(false),
            indexing,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn blocks(&self) -> &BlockMapper {
        &self.blocks
    }

    pub fn source(&self) -> &Arc<dyn ChainSource> {
        &self.source
    }

    /// Allow cycles to run.
    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// `true` while a cycle is in flight.
    pub fn is_indexing(&self) -> bool {
        *self.indexing.borrow()
    }

    /// The indexed tip.
    pub async fn tip(&self) -> Result<Option<Block>, IndexerError> {
        self.blocks.get_highest().await
    }

    pub async fn status(&self) -> Result<Option<SyncStatus>, IndexerError> {
        self.ledger.get().await
    }

    /// Stop accepting cycles and wait for the in-flight one to finish.
    ///
    /// The current block's apply/undo always completes; the wait is bounded
    /// by `stop_timeout_ms`.
    pub async fn stop(&self) -> Result<(), IndexerError> {
        self.running.store(false, Ordering::SeqCst);
        let mut idle = self.indexing.subscribe();
        let limit = self.config.stop_timeout();
        let drained = tokio::time::timeout(limit, idle.wait_for(|busy| !*busy))
            .await
            .is_ok();
        if !drained {
            return Err(IndexerError::StopTimeout {
                ms: self.config.stop_timeout_ms,
            });
        }
        tracing::info!("sync driver stopped");
        Ok(())
    }

    /// Run one synchronization cycle: step until caught up, stopped, or failed.
    pub async fn cycle(&self) -> Result<CycleOutcome, IndexerError> {
        if !self.is_running() {
            return Ok(CycleOutcome::Skipped);
        }
        let acquired = self.indexing.send_if_modified(|busy| {
            if *busy {
                false
            } else {
                *busy = true;
                true
            }
        });
        if !acquired {
            tracing::debug!("sync cycle already in flight");
            return Ok(CycleOutcome::Skipped);
        }
        let _guard = IndexingGuard(&self.indexing);

        let mut steps = 0;
        while self.is_running() {
            if !self.step().await?.did_work() {
                break;
            }
            steps += 1;
        }
        Ok(CycleOutcome::Completed { steps })
    }

    /// Perform a single unit of work.
    ///
    /// Does not check the running/indexing flags; [`cycle`](Self::cycle) is
    /// the guarded entry point.
    pub async fn step(&self) -> Result<SyncStep, IndexerError> {
        self.cleanup().await?;

        let Some(tip) = self.blocks.get_highest().await? else {
            return self.index_genesis().await;
        };

        match self.source.get_block_at(tip.height + 1).await {
            Ok(next) if next.extends(&tip.hash, tip.height) => {
                self.index(&next).await?;
                Ok(SyncStep::Indexed {
                    height: next.height,
                    hash: next.hash,
                })
            }
            Ok(next) => {
                tracing::warn!(
                    height = tip.height,
                    tip = %tip.hash,
                    next_parent = %next.previous_hash,
                    "reorg detected, invalidating tip"
                );
                self.invalidate_tip(&tip).await
            }
            Err(e) if e.is_out_of_range() => self.verify_tip(&tip).await,
            Err(e) => Err(e.into()),
        }
    }

    /// Undo block `hash` at `height`. Safe to repeat on a block that was
    /// partially applied, fully applied, or never applied.
    pub async fn invalidate(&self, hash: &str, height: u32) -> Result<(), IndexerError> {
        let block = self.source.get_block(hash).await?;
        if block.height != height {
            return Err(IndexerError::Consistency(format!(
                "block {hash} is at height {}, expected {height}",
                block.height
            )));
        }
        self.invalidate_block(&block).await
    }

    async fn cleanup(&self) -> Result<(), IndexerError> {
        let Some(status) = self.ledger.get().await? else {
            return Ok(());
        };
        if status.status.is_terminal() {
            return Ok(());
        }
        tracing::warn!(
            height = status.height,
            hash = %status.hash,
            status = %status.status,
            "previous attempt was interrupted, invalidating before resuming"
        );
        self.invalidate(&status.hash, status.height).await
    }

    async fn index_genesis(&self) -> Result<SyncStep, IndexerError> {
        let genesis = self
            .source
            .get_block_at(0)
            .await
            .map_err(|e| IndexerError::Genesis(e.to_string()))?;
        if genesis.height != 0 {
            return Err(IndexerError::Genesis(format!(
                "source returned height {} for block 0",
                genesis.height
            )));
        }
        tracing::info!(hash = %genesis.hash, "indexing genesis block");
        self.index(&genesis).await?;
        Ok(SyncStep::Genesis { hash: genesis.hash })
    }

    async fn verify_tip(&self, tip: &Block) -> Result<SyncStep, IndexerError> {
        match self.source.get_block_hash(tip.height).await {
            Ok(hash) if hash == tip.hash => {
                tracing::debug!(height = tip.height, "up to date");
                Ok(SyncStep::UpToDate)
            }
            Ok(hash) => {
                tracing::warn!(
                    height = tip.height,
                    tip = %tip.hash,
                    source = %hash,
                    "tip replaced at same height, invalidating"
                );
                self.invalidate_tip(tip).await
            }
            Err(e) if e.is_out_of_range() => {
                tracing::warn!(height = tip.height, "source chain is shorter than indexed tip");
                self.invalidate_tip(tip).await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn invalidate_tip(&self, tip: &Block) -> Result<SyncStep, IndexerError> {
        self.invalidate(&tip.hash, tip.height).await?;
        Ok(SyncStep::Invalidated {
            height: tip.height,
            hash: tip.hash.clone(),
        })
    }

    async fn index(&self, block: &SourceBlock) -> Result<(), IndexerError> {
        self.ledger
            .put(&block.hash, block.height, Status::Indexing)
            .await?;
        if let Err(err) = self.registry.index_block(block).await {
            self.record_error(block).await;
            return Err(err);
        }
        self.ledger
            .put(&block.hash, block.height, Status::Indexed)
            .await?;
        tracing::info!(
            height = block.height,
            hash = %block.hash,
            txs = block.transactions.len(),
            "indexed block"
        );
        Ok(())
    }

    async fn invalidate_block(&self, block: &SourceBlock) -> Result<(), IndexerError> {
        self.ledger
            .put(&block.hash, block.height, Status::Invalidating)
            .await?;
        if let Err(err) = self.registry.invalidate_block(block).await {
            self.record_error(block).await;
            return Err(err);
        }
        self.ledger
            .put(&block.hash, block.height, Status::Invalidated)
            .await?;
        tracing::info!(height = block.height, hash = %block.hash, "invalidated block");
        Ok(())
    }

    async fn record_error(&self, block: &SourceBlock) {
        if let Err(e) = self
            .ledger
            .put(&block.hash, block.height, Status::Error)
            .await
        {
            tracing::error!(height = block.height, error = %e, "failed to record error status");
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::SubIndexer;
    use crate::mapper::{Entity, ModelMapper};
    use crate::memory::MemoryStore;
    use crate::source::MemorySource;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[derive(Debug, Serialize, Deserialize)]
    struct Mark {
        hash: String,
        height: u32,
    }

    impl Entity for Mark {
        const MODEL: &'static str = "mark";
        fn primary_key(&self) -> String {
            self.hash.clone()
        }
    }

    /// Writes one record per block; optionally fails once at a given height
    /// after its write, leaving a partial apply behind.
    struct Marker {
        marks: ModelMapper<Mark>,
        fail_once_at: Mutex<Option<u32>>,
    }

    #[async_trait]
    impl SubIndexer for Marker {
        fn name(&self) -> &str {
            "marker"
        }

        async fn index_block_start(&self, block: &SourceBlock) -> Result<(), IndexerError> {
            self.marks
                .put(&Mark {
                    hash: block.hash.clone(),
                    height: block.height,
                })
                .await
        }

        async fn index_block_end(&self, block: &SourceBlock) -> Result<(), IndexerError> {
            let mut fail = self.fail_once_at.lock().unwrap();
            if *fail == Some(block.height) {
                *fail = None;
                return Err(IndexerError::Handler {
                    handler: "marker".into(),
                    reason: "injected".into(),
                });
            }
            Ok(())
        }

        async fn invalidate_block_start(&self, block: &SourceBlock) -> Result<(), IndexerError> {
            self.marks.delete(&block.hash).await
        }
    }

    /// Blocks `index_block_start` at one height until released.
    struct Gate {
        height: u32,
        open: Notify,
    }

    #[async_trait]
    impl SubIndexer for Gate {
        fn name(&self) -> &str {
            "gate"
        }

        async fn index_block_start(&self, block: &SourceBlock) -> Result<(), IndexerError> {
            if block.height == self.height {
                self.open.notified().await;
            }
            Ok(())
        }
    }

    fn block(height: u32, fork: &str, prev: &str) -> SourceBlock {
        SourceBlock {
            hash: format!("{fork}{height}"),
            previous_hash: prev.to_string(),
            height,
            time: 1_600_000_000 + height as i64 * 30,
            median_time: 1_600_000_000 + height as i64 * 30,
            difficulty: 1.0,
            minter: None,
            size: 100,
            weight: 400,
            version: 1,
            merkleroot: String::new(),
            transactions: vec![],
        }
    }

    /// Keep `base[..keep]` and extend it with `fork`-named blocks up to `to` inclusive.
    fn fork(base: &[SourceBlock], keep: usize, fork: &str, to: u32) -> Vec<SourceBlock> {
        let mut chain: Vec<_> = base[..keep].to_vec();
        while chain.len() as u32 <= to {
            let prev = chain.last().map(|b| b.hash.clone()).unwrap_or_default();
            chain.push(block(chain.len() as u32, fork, &prev));
        }
        chain
    }

    fn chain(to: u32) -> Vec<SourceBlock> {
        fork(&[], 0, "a", to)
    }

    struct Harness {
        store: Arc<MemoryStore>,
        source: Arc<MemorySource>,
        marker: Arc<Marker>,
        driver: Arc<SyncDriver>,
    }

    fn harness(
        chain: Vec<SourceBlock>,
        extra: Option<Arc<dyn SubIndexer>>,
        config: SyncConfig,
    ) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let source = Arc::new(MemorySource::new(chain));
        let marker = Arc::new(Marker {
            marks: ModelMapper::new(store.clone()),
            fail_once_at: Mutex::new(None),
        });
        let mut registry = IndexerRegistry::new().with(marker.clone());
        if let Some(extra) = extra {
            registry.register(extra);
        }
        let driver = Arc::new(SyncDriver::new(source.clone(), store.clone(), registry, config));
        driver.start();
        Harness {
            store,
            source,
            marker,
            driver,
        }
    }

    async fn wait_until_indexing(driver: &SyncDriver) {
        while !driver.is_indexing() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    #[tokio::test]
    async fn cycle_skipped_until_started() {
        let store = Arc::new(MemoryStore::new());
        let driver = SyncDriver::new(
            Arc::new(MemorySource::new(chain(2))),
            store,
            IndexerRegistry::new(),
            SyncConfig::default(),
        );
        assert_eq!(driver.cycle().await.unwrap(), CycleOutcome::Skipped);
        assert!(driver.tip().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn indexes_genesis_and_catches_up() {
        let h = harness(chain(5), None, SyncConfig::default());

        assert_eq!(h.driver.cycle().await.unwrap(), CycleOutcome::Completed { steps: 6 });
        let tip = h.driver.tip().await.unwrap().unwrap();
        assert_eq!(tip.height, 5);
        assert_eq!(tip.hash, "a5");
        let status = h.driver.status().await.unwrap().unwrap();
        assert_eq!((status.hash.as_str(), status.status), ("a5", Status::Indexed));
        assert_eq!(h.store.count(Mark::MODEL).unwrap(), 6);

        // nothing new
        assert_eq!(h.driver.cycle().await.unwrap(), CycleOutcome::Completed { steps: 0 });
        assert!(!h.driver.is_indexing());
    }

    #[tokio::test]
    async fn first_step_is_genesis() {
        let h = harness(chain(1), None, SyncConfig::default());
        assert_eq!(
            h.driver.step().await.unwrap(),
            SyncStep::Genesis { hash: "a0".into() }
        );
        assert_eq!(
            h.driver.step().await.unwrap(),
            SyncStep::Indexed {
                height: 1,
                hash: "a1".into()
            }
        );
        assert_eq!(h.driver.step().await.unwrap(), SyncStep::UpToDate);
    }

    #[tokio::test]
    async fn missing_genesis_is_fatal() {
        let h = harness(vec![], None, SyncConfig::default());
        let err = h.driver.cycle().await.unwrap_err();
        assert!(matches!(err, IndexerError::Genesis(_)));
        assert!(!h.driver.is_indexing());
    }

    #[tokio::test]
    async fn reorg_converges_after_k_invalidations() {
        for k in [1u32, 2, 4] {
            let a = chain(6);
            let h = harness(a.clone(), None, SyncConfig::default());
            h.driver.cycle().await.unwrap();

            let b = fork(&a, (7 - k) as usize, "b", 8);
            h.source.set_chain(b.clone());

            let mut invalidations = 0;
            loop {
                match h.driver.step().await.unwrap() {
                    SyncStep::Invalidated { .. } => invalidations += 1,
                    SyncStep::Indexed { .. } => break,
                    other => panic!("unexpected step {other:?}"),
                }
            }
            assert_eq!(invalidations, k, "depth {k}");
            h.driver.cycle().await.unwrap();
            assert_eq!(h.driver.tip().await.unwrap().unwrap().hash, "b8");

            // same state as indexing the winning chain from scratch
            let fresh = harness(b, None, SyncConfig::default());
            fresh.driver.cycle().await.unwrap();
            assert_eq!(h.store.dump(Mark::MODEL).unwrap(), fresh.store.dump(Mark::MODEL).unwrap());
            assert_eq!(h.store.dump(Block::MODEL).unwrap(), fresh.store.dump(Block::MODEL).unwrap());
        }
    }

    #[tokio::test]
    async fn same_height_reorg_is_detected() {
        let a = chain(5);
        let h = harness(a.clone(), None, SyncConfig::default());
        h.driver.cycle().await.unwrap();

        h.source.set_chain(fork(&a, 4, "b", 5));
        let steps = [
            h.driver.step().await.unwrap(),
            h.driver.step().await.unwrap(),
            h.driver.step().await.unwrap(),
            h.driver.step().await.unwrap(),
            h.driver.step().await.unwrap(),
        ];
        assert_eq!(
            steps,
            [
                SyncStep::Invalidated { height: 5, hash: "a5".into() },
                SyncStep::Invalidated { height: 4, hash: "a4".into() },
                SyncStep::Indexed { height: 4, hash: "b4".into() },
                SyncStep::Indexed { height: 5, hash: "b5".into() },
                SyncStep::UpToDate,
            ]
        );
    }

    #[tokio::test]
    async fn hook_failure_leaves_error_and_next_cycle_recovers() {
        let h = harness(chain(5), None, SyncConfig::default());
        *h.marker.fail_once_at.lock().unwrap() = Some(3);

        let err = h.driver.cycle().await.unwrap_err();
        assert!(matches!(err, IndexerError::Handler { .. }));
        assert!(!h.driver.is_indexing());

        let status = h.driver.status().await.unwrap().unwrap();
        assert_eq!((status.height, status.status), (3, Status::Error));
        // partial write from the failed apply, but no block record
        assert_eq!(h.store.count(Mark::MODEL).unwrap(), 4);
        assert_eq!(h.driver.tip().await.unwrap().unwrap().height, 2);

        assert_eq!(h.driver.cycle().await.unwrap(), CycleOutcome::Completed { steps: 3 });
        assert_eq!(h.driver.tip().await.unwrap().unwrap().height, 5);
        assert_eq!(h.store.count(Mark::MODEL).unwrap(), 6);
        assert_eq!(h.driver.status().await.unwrap().unwrap().status, Status::Indexed);
    }

    #[tokio::test]
    async fn interrupted_apply_is_undone_before_resuming() {
        let a = chain(3);
        let h = harness(a, None, SyncConfig::default());
        for _ in 0..3 {
            h.driver.step().await.unwrap();
        }
        let before = h.store.dump(Mark::MODEL).unwrap();
        let blocks_before = h.store.dump(Block::MODEL).unwrap();

        // crash right after writing `Indexing` for block 3, before any hook ran
        let ledger = StatusLedger::new(h.store.clone());
        ledger.put("a3", 3, Status::Indexing).await.unwrap();
        h.driver.invalidate("a3", 3).await.unwrap();
        assert_eq!(h.store.dump(Mark::MODEL).unwrap(), before);
        assert_eq!(h.store.dump(Block::MODEL).unwrap(), blocks_before);

        // crash after a partial apply of block 3
        ledger.put("a3", 3, Status::Indexing).await.unwrap();
        h.marker
            .marks
            .put(&Mark { hash: "a3".into(), height: 3 })
            .await
            .unwrap();
        assert_eq!(
            h.driver.step().await.unwrap(),
            SyncStep::Indexed { height: 3, hash: "a3".into() }
        );
        assert_eq!(h.store.count(Mark::MODEL).unwrap(), 4);
    }

    #[tokio::test]
    async fn overlapping_cycle_is_a_noop() {
        let gate = Arc::new(Gate {
            height: 1,
            open: Notify::new(),
        });
        let h = harness(
            chain(2),
            Some(gate.clone() as Arc<dyn SubIndexer>),
            SyncConfig::default(),
        );

        let driver = h.driver.clone();
        let running = tokio::spawn(async move { driver.cycle().await });
        wait_until_indexing(&h.driver).await;

        assert_eq!(h.driver.cycle().await.unwrap(), CycleOutcome::Skipped);

        gate.open.notify_one();
        let outcome = running.await.unwrap().unwrap();
        assert_eq!(outcome, CycleOutcome::Completed { steps: 3 });
    }

    #[tokio::test]
    async fn stop_lets_the_current_block_finish() {
        let gate = Arc::new(Gate {
            height: 1,
            open: Notify::new(),
        });
        let h = harness(
            chain(5),
            Some(gate.clone() as Arc<dyn SubIndexer>),
            SyncConfig::default(),
        );

        let driver = h.driver.clone();
        let running = tokio::spawn(async move { driver.cycle().await });
        wait_until_indexing(&h.driver).await;

        let driver = h.driver.clone();
        let stopping = tokio::spawn(async move { driver.stop().await });
        while h.driver.is_running() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        gate.open.notify_one();

        stopping.await.unwrap().unwrap();
        assert_eq!(running.await.unwrap().unwrap(), CycleOutcome::Completed { steps: 2 });
        // block 1 completed, nothing after it
        assert_eq!(h.driver.tip().await.unwrap().unwrap().height, 1);
        assert_eq!(h.driver.status().await.unwrap().unwrap().status, Status::Indexed);
        assert_eq!(h.driver.cycle().await.unwrap(), CycleOutcome::Skipped);
    }

    #[tokio::test]
    async fn stop_is_bounded_by_timeout() {
        let gate = Arc::new(Gate {
            height: 0,
            open: Notify::new(),
        });
        let config = SyncConfig::builder().stop_timeout_ms(20).build();
        let h = harness(
            chain(1),
            Some(gate.clone() as Arc<dyn SubIndexer>),
            config,
        );

        let driver = h.driver.clone();
        let _running = tokio::spawn(async move { driver.cycle().await });
        wait_until_indexing(&h.driver).await;

        let err = h.driver.stop().await.unwrap_err();
        assert!(matches!(err, IndexerError::StopTimeout { ms: 20 }));
        gate.open.notify_one();
    }

    #[tokio::test]
    async fn stop_when_idle_returns_immediately() {
        let h = harness(chain(1), None, SyncConfig::default());
        h.driver.stop().await.unwrap();
        assert!(!h.driver.is_running());
    }

    #[tokio::test]
    async fn next_block_at_the_wrong_height_is_not_applied() {
        let h = harness(chain(2), None, SyncConfig::default());
        h.driver.cycle().await.unwrap();

        let mut next = chain(3);
        next[3].height = 7;
        h.source.set_chain(next);

        assert_eq!(
            h.driver.step().await.unwrap(),
            SyncStep::Invalidated {
                height: 2,
                hash: "a2".into()
            }
        );
    }
}
