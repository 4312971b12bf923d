//! Single-threaded Ethash block assembly: wait for the next block's target timestamp (or
//! wake immediately on a new chain head), pull transactions from the pool, seal with a
//! cancellable nonce search, and hand the result back to `ChainState::put_blocks`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use ethlink_chain::chain::ChainState;
use ethlink_chain::executor::{Executor, HeaderFields};
use ethlink_chain::state::StateView;
use ethlink_chain::pow;
use ethlink_common::block::{Block, BlockHeader};
use ethlink_common::{Address, BlockHash, U256};
use ethlink_p2p::{Event, EventBus};
use ethlink_txpool::TxPool;
use tokio::sync::Notify;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::error::MinerError;

/// A transaction can never fit in a block with less remaining gas than this; assembly
/// stops pulling more once the builder drops below it.
const MIN_TX_GAS: u64 = 21_000;
/// How many nonces the seal search tries between checks of whether a new chain head has
/// made the block it's mining for stale.
const NONCES_PER_CANCEL_CHECK: u64 = 2_000;

#[derive(Clone)]
pub struct MinerConfig {
    /// Target spacing between blocks; assembly is scheduled for `parent.timestamp + period`.
    pub period: Duration,
    pub coinbase: Address,
    pub extra_data: Bytes,
    pub gas_limit: u64,
    /// Whether receipts from a locally sealed block should be kept around for RPC lookups.
    /// The reference `Chain`/`Store` this workspace ships already retains them regardless;
    /// this only controls whether the miner bothers cloning them out of the builder.
    pub save_receipts: bool,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(13),
            coinbase: Address::zero(),
            extra_data: Bytes::new(),
            gas_limit: 30_000_000,
            save_receipts: false,
        }
    }
}

/// Drives block assembly and Ethash sealing against a `ChainState`/`Executor` pair and a
/// shared `TxPool`. One `Miner` mines at most one block at a time.
pub struct Miner<C: ChainState, E: Executor> {
    chain: Arc<C>,
    executor: Arc<E>,
    pool: Arc<TxPool>,
    state: Arc<dyn StateView>,
    events: EventBus,
    config: MinerConfig,
    generation: AtomicU64,
    notify: Notify,
}

impl<C: ChainState + 'static, E: Executor + 'static> Miner<C, E> {
    pub fn new(
        chain: Arc<C>,
        executor: Arc<E>,
        pool: Arc<TxPool>,
        state: Arc<dyn StateView>,
        events: EventBus,
        config: MinerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            chain,
            executor,
            pool,
            state,
            events,
            config,
            generation: AtomicU64::new(0),
            notify: Notify::new(),
        })
    }

    /// Spawns the chain-update watcher and the assembly loop. Both run for the process
    /// lifetime; there is no handle to stop them short of dropping the runtime.
    pub fn spawn(self: Arc<Self>) {
        let watcher = self.clone();
        tokio::spawn(async move { watcher.watch_chain_updates().await });
        tokio::spawn(async move { self.run_loop().await });
    }

    /// Bumps `generation` and wakes the assembly loop on every new canonical head, whether
    /// from sync or from this miner's own previous block. Runs independently of
    /// `run_loop` so an in-progress seal search sees the bump without the loop polling for it.
    async fn watch_chain_updates(&self) {
        let mut subscription = self.events.subscribe();
        loop {
            match subscription.recv().await {
                Ok(Event::ChainUpdated { .. }) | Ok(Event::ChainReorg { .. }) => {
                    self.generation.fetch_add(1, Ordering::SeqCst);
                    self.notify.notify_one();
                }
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    }

    async fn run_loop(&self) {
        loop {
            let parent = self.chain.latest_header();
            let target = parent.timestamp + self.config.period.as_secs();
            let delay = Duration::from_secs(target.saturating_sub(unix_now()));

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.notify.notified() => continue,
            }

            let generation = self.generation.load(Ordering::SeqCst);
            if let Err(err) = self.assemble_and_mine(generation).await {
                warn!(%err, "miner: assembly failed");
            }
        }
    }

    async fn assemble_and_mine(&self, generation: u64) -> Result<(), MinerError> {
        let parent = self.chain.latest_header();
        let fields = HeaderFields {
            coinbase: self.config.coinbase,
            timestamp: unix_now().max(parent.timestamp + 1),
            gas_limit: self.config.gas_limit,
            extra_data: self.config.extra_data.clone(),
        };
        let mut builder = self.executor.build_block(&parent, fields, self.state.as_ref())?;

        let base_fee = parent.base_fee_per_gas.unwrap_or(0);
        let ordered = self.pool.txs_by_price_and_nonce(self.state.as_ref(), base_fee);
        let mut included = Vec::new();
        for tx in ordered {
            if self.generation.load(Ordering::SeqCst) != generation {
                debug!("miner: assembly interrupted by a new chain head");
                return Ok(());
            }
            if builder.remaining_gas() < MIN_TX_GAS {
                break;
            }
            let Ok(sender) = tx.recover_sender() else {
                continue;
            };
            if builder.add_transaction(&tx, sender).is_ok() {
                included.push(tx);
            }
        }

        let (mut header, body, receipts) = builder.finalize();
        header.difficulty = pow::next_difficulty(&parent, header.timestamp);

        let Some((nonce, mix_hash)) = self.search_seal(&header, generation).await else {
            debug!("miner: seal search cancelled by a new chain head");
            return Ok(());
        };
        header.nonce = nonce;
        header.mix_hash = mix_hash;

        let number = header.number;
        let block = Block { header, body };
        let block_hash = block.hash();
        self.chain.put_blocks(vec![block])?;
        for tx in &included {
            self.pool.remove(&tx.compute_hash());
        }
        if self.config.save_receipts {
            debug!(count = receipts.len(), "miner: sealed block's receipts retained by the store");
        }
        info!(number, ?block_hash, transactions = included.len(), "miner: sealed and imported a new block");
        Ok(())
    }

    /// Searches nonces against `header`'s seal hash until one satisfies its difficulty
    /// target, or `generation` goes stale. Yields between batches so the chain-update
    /// watcher and the rest of the runtime keep making progress.
    async fn search_seal(&self, header: &BlockHeader, generation: u64) -> Option<(u64, BlockHash)> {
        let cache = pow::generate_cache(header.number);
        let seal_hash = pow::header_seal_hash(header);
        let target = pow::target_from_difficulty(header.difficulty);
        let mut nonce: u64 = rand::random();

        loop {
            for _ in 0..NONCES_PER_CANCEL_CHECK {
                let (mix_digest, result) = pow::hashimoto_light(seal_hash, nonce, &cache);
                if U256::from_big_endian(result.as_bytes()) <= target {
                    return Some((nonce, mix_digest));
                }
                nonce = nonce.wrapping_add(1);
            }
            if self.generation.load(Ordering::SeqCst) != generation {
                return None;
            }
            tokio::task::yield_now().await;
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
