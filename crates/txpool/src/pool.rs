use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use ethlink_chain::state::StateView;
use ethlink_common::block::BlockHeader;
use ethlink_common::transaction::Transaction;
use ethlink_common::{Address, H256, U256};
use ethlink_rlp::encode::RLPEncode;
use rand::seq::SliceRandom;

use crate::entry::TxPoolEntry;
use crate::error::PoolError;
use crate::known::{HandledSet, KnownByPeer};

/// Maximum encoded size (EIP-2681-adjacent local policy, not a protocol rule) of a single
/// pooled transaction.
pub const MAX_TX_SIZE_BYTES: usize = 128 * 1024;
/// Total non-local pooled transactions across all senders.
pub const MAX_POOL_SIZE: usize = 5_000;
/// Non-local transactions held for a single sender.
pub const MAX_PER_SENDER: usize = 100;
/// 0.1 Gwei, the minimum effective tip a non-local transaction must offer.
pub const MIN_EFFECTIVE_TIP_WEI: u64 = 100_000_000;
/// A replacement transaction's tip and max fee must each be at least this much higher.
pub const REPLACEMENT_BUMP_PERCENT: u64 = 10;
/// Entries older than this are dropped from the pending/queued pools on maintenance.
pub const POOLED_STORAGE_TIME_LIMIT: Duration = Duration::from_secs(20 * 60);
/// `HandledSet` entries older than this are dropped on maintenance.
pub const HANDLED_CLEANUP_TIME_LIMIT: Duration = Duration::from_secs(60 * 60);

type SenderPool = HashMap<Address, BTreeMap<u64, TxPoolEntry>>;

/// Validates, stores, prioritizes, and propagates pending transactions; keeps the view of
/// pending vs queued coherent with on-chain account state and chain reorganisations.
///
/// A single [`std::sync::Mutex`] guards all of the pool's maps: the spec only requires that
/// adds for the same sender serialize, but cross-sender invariants (total pool size,
/// `txs_by_price_and_nonce`'s cross-sender ordering) need a consistent view anyway, so one
/// lock covers the whole structure rather than one per sender.
pub struct TxPool {
    inner: std::sync::Mutex<Inner>,
}

struct Inner {
    pending: SenderPool,
    queued: SenderPool,
    by_hash: HashMap<H256, Address>,
    handled: HandledSet,
    known_by_peer: KnownByPeer,
    count: usize,
}

impl Default for TxPool {
    fn default() -> Self {
        Self::new()
    }
}

impl TxPool {
    pub fn new() -> Self {
        Self {
            inner: std::sync::Mutex::new(Inner {
                pending: HashMap::new(),
                queued: HashMap::new(),
                by_hash: HashMap::new(),
                handled: HandledSet::new(),
                known_by_peer: KnownByPeer::new(),
                count: 0,
            }),
        }
    }

    /// Runs the full validation pipeline against `tx` and, if it passes, stores it in
    /// `pending` or `queued` and attempts promotion. `local` transactions (submitted by this
    /// node's own RPC, if any) skip the pool-occupancy, per-sender, and minimum-tip checks.
    pub fn add(
        &self,
        tx: Transaction,
        state: &dyn StateView,
        latest_header: &BlockHeader,
        local: bool,
    ) -> Result<H256, PoolError> {
        let hash = tx.compute_hash();
        let mut inner = self.inner.lock().unwrap();

        if inner.handled.contains(&hash) {
            // Already processed once; report the original verdict rather than re-validating.
            return match inner.by_hash.get(&hash) {
                Some(_) => Ok(hash),
                None => Err(inner.handled.error(&hash).unwrap_or(PoolError::Underpriced)),
            };
        }

        let sender = tx
            .recover_sender()
            .map_err(|_| PoolError::InvalidSignature)?;

        let mut encoded = Vec::new();
        tx.encode(&mut encoded);
        if encoded.len() > MAX_TX_SIZE_BYTES {
            let err = PoolError::EncodedSizeExceeded(encoded.len());
            inner.handled.record(hash, sender, Some(err.clone()));
            return Err(err);
        }

        if !local {
            if inner.count >= MAX_POOL_SIZE {
                let err = PoolError::PoolFull;
                inner.handled.record(hash, sender, Some(err.clone()));
                return Err(err);
            }
            let sender_count = inner.pending.get(&sender).map(BTreeMap::len).unwrap_or(0)
                + inner.queued.get(&sender).map(BTreeMap::len).unwrap_or(0);
            if sender_count >= MAX_PER_SENDER {
                let err = PoolError::AccountQuota;
                inner.handled.record(hash, sender, Some(err.clone()));
                return Err(err);
            }
            let base_fee = latest_header.base_fee_per_gas.unwrap_or(0);
            if tx.effective_tip(base_fee) < MIN_EFFECTIVE_TIP_WEI {
                let err = PoolError::Underpriced;
                inner.handled.record(hash, sender, Some(err.clone()));
                return Err(err);
            }
        }

        if tx.gas_limit() > latest_header.gas_limit {
            let err = PoolError::GasLimitExceeded {
                tx_gas_limit: tx.gas_limit(),
                header_gas_limit: latest_header.gas_limit,
            };
            inner.handled.record(hash, sender, Some(err.clone()));
            return Err(err);
        }

        let account = state.get_account(sender);
        if tx.nonce() < account.nonce {
            let err = PoolError::NonceTooLow {
                account_nonce: account.nonce,
                tx_nonce: tx.nonce(),
            };
            inner.handled.record(hash, sender, Some(err.clone()));
            return Err(err);
        }

        let max_cost = U256::from(tx.gas_limit())
            .saturating_mul(U256::from(tx.max_fee_per_gas()))
            .saturating_add(tx.value());
        if account.balance < max_cost {
            let err = PoolError::InsufficientBalance;
            inner.handled.record(hash, sender, Some(err.clone()));
            return Err(err);
        }

        if let Some(existing) = inner
            .pending
            .get(&sender)
            .and_then(|m| m.get(&tx.nonce()))
            .or_else(|| inner.queued.get(&sender).and_then(|m| m.get(&tx.nonce())))
        {
            let tip_bump = tx.max_priority_fee_per_gas()
                >= existing.tx.max_priority_fee_per_gas() * (100 + REPLACEMENT_BUMP_PERCENT) / 100;
            let fee_bump = tx.max_fee_per_gas()
                >= existing.tx.max_fee_per_gas() * (100 + REPLACEMENT_BUMP_PERCENT) / 100;
            if !(tip_bump && fee_bump) {
                let err = PoolError::ReplacementUnderpriced;
                inner.handled.record(hash, sender, Some(err.clone()));
                return Err(err);
            }
            let old_hash = existing.hash;
            inner.by_hash.remove(&old_hash);
            inner.count = inner.count.saturating_sub(1);
        }

        let entry = TxPoolEntry {
            tx,
            hash,
            sender,
            inserted_at: Instant::now(),
            local,
        };
        let nonce = entry.nonce();
        let is_next = nonce == account.nonce
            || inner
                .pending
                .get(&sender)
                .and_then(|m| m.keys().next_back())
                .is_some_and(|&max| nonce == max + 1);

        inner.by_hash.insert(hash, sender);
        inner.count += 1;
        if is_next {
            inner.pending.entry(sender).or_default().insert(nonce, entry);
        } else {
            inner.queued.entry(sender).or_default().insert(nonce, entry);
        }
        inner.handled.record(hash, sender, None);
        Self::promote_locked(&mut inner, sender, account.nonce);

        Ok(hash)
    }

    /// Moves queued entries into pending while their nonce matches the sender's expected
    /// next nonce, starting at `account_nonce`.
    fn promote_locked(inner: &mut Inner, sender: Address, account_nonce: u64) {
        let mut expected = inner
            .pending
            .get(&sender)
            .and_then(|m| m.keys().next_back())
            .map(|&n| n + 1)
            .unwrap_or(account_nonce);
        loop {
            let Some(queued) = inner.queued.get_mut(&sender) else {
                break;
            };
            let Some(entry) = queued.remove(&expected) else {
                break;
            };
            if queued.is_empty() {
                inner.queued.remove(&sender);
            }
            inner.pending.entry(sender).or_default().insert(expected, entry);
            expected += 1;
        }
    }

    /// After a new canonical block, drop entries whose nonce is now below the account's
    /// on-chain nonce, and any whose balance can no longer cover their max cost.
    pub fn on_new_head(&self, state: &dyn StateView) {
        let mut inner = self.inner.lock().unwrap();
        let senders: Vec<Address> = inner
            .pending
            .keys()
            .chain(inner.queued.keys())
            .copied()
            .collect::<std::collections::HashSet<_>>()
            .into_iter()
            .collect();

        for sender in senders {
            let account = state.get_account(sender);
            for pool in [&mut inner.pending, &mut inner.queued] {
                if let Some(entries) = pool.get_mut(&sender) {
                    let stale: Vec<u64> = entries
                        .iter()
                        .filter(|(&nonce, entry)| {
                            nonce < account.nonce
                                || U256::from(entry.tx.gas_limit())
                                    .saturating_mul(U256::from(entry.tx.max_fee_per_gas()))
                                    .saturating_add(entry.tx.value())
                                    > account.balance
                        })
                        .map(|(&nonce, _)| nonce)
                        .collect();
                    for nonce in stale {
                        if let Some(entry) = entries.remove(&nonce) {
                            inner.by_hash.remove(&entry.hash);
                            inner.count = inner.count.saturating_sub(1);
                        }
                    }
                    if entries.is_empty() {
                        pool.remove(&sender);
                    }
                }
            }
            Self::promote_locked(&mut inner, sender, account.nonce);
        }
    }

    /// On `CHAIN_REORG(old_blocks, new_blocks)`: re-insert transactions from `old_blocks`
    /// that are not in `new_blocks`, subject to the full validation pipeline; transactions
    /// that appear in `new_blocks` are simply dropped (they're already on the new canonical
    /// chain, so `on_new_head`'s below-nonce pruning removes them).
    pub fn on_reorg(
        &self,
        old_transactions: Vec<Transaction>,
        new_transactions: &[Transaction],
        state: &dyn StateView,
        latest_header: &BlockHeader,
    ) {
        let new_hashes: std::collections::HashSet<H256> =
            new_transactions.iter().map(Transaction::compute_hash).collect();
        for tx in old_transactions {
            if new_hashes.contains(&tx.compute_hash()) {
                continue;
            }
            let _ = self.add(tx, state, latest_header, false);
        }
    }

    /// Returns, per sender, the pending chain in nonce order, merged across senders so the
    /// highest-tip head is always popped next. Senders whose lowest pending nonce doesn't
    /// match `state`'s account nonce are skipped entirely (their pending chain is stale
    /// until the next promotion pass catches up).
    pub fn txs_by_price_and_nonce(&self, state: &dyn StateView, base_fee: u64) -> Vec<Transaction> {
        let inner = self.inner.lock().unwrap();
        let mut heads: Vec<(Address, std::collections::VecDeque<Transaction>)> = Vec::new();
        for (sender, entries) in inner.pending.iter() {
            let Some((&lowest_nonce, _)) = entries.iter().next() else {
                continue;
            };
            if lowest_nonce != state.get_account(*sender).nonce {
                continue;
            }
            let chain = entries.values().map(|e| e.tx.clone()).collect();
            heads.push((*sender, chain));
        }
        drop(inner);

        let mut ordered = Vec::new();
        loop {
            let best = heads
                .iter()
                .enumerate()
                .filter(|(_, (_, chain))| !chain.is_empty())
                .max_by_key(|(_, (_, chain))| chain.front().unwrap().effective_tip(base_fee));
            let Some((index, _)) = best else {
                break;
            };
            let tx = heads[index].1.pop_front().unwrap();
            ordered.push(tx);
        }
        ordered
    }

    /// Drops pending/queued entries older than `POOLED_STORAGE_TIME_LIMIT` and `HandledSet`
    /// entries older than `HANDLED_CLEANUP_TIME_LIMIT`. Intended to be driven by a periodic
    /// maintenance task, not called per-transaction.
    pub fn run_maintenance(&self) {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        for pool in [&mut inner.pending, &mut inner.queued] {
            pool.retain(|_, entries| {
                entries.retain(|_, entry| {
                    now.duration_since(entry.inserted_at) < POOLED_STORAGE_TIME_LIMIT
                });
                !entries.is_empty()
            });
        }
        inner.by_hash = inner
            .pending
            .values()
            .chain(inner.queued.values())
            .flat_map(|m| m.values())
            .map(|entry| (entry.hash, entry.sender))
            .collect();
        inner.count = inner.by_hash.len();
        inner.handled.prune_older_than(HANDLED_CLEANUP_TIME_LIMIT);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, hash: &H256) -> bool {
        self.inner.lock().unwrap().by_hash.contains_key(hash)
    }

    /// Whether `hash` has already been validated once, whether accepted or rejected. Used
    /// by the `TxFetcher` wiring to avoid re-announcing a hash it's already seen.
    pub fn is_handled(&self, hash: &H256) -> bool {
        self.inner.lock().unwrap().handled.contains(hash)
    }

    /// The full transaction for `hash`, if still pooled. Used to answer `GetPooledTransactions`.
    pub fn get(&self, hash: &H256) -> Option<Transaction> {
        let inner = self.inner.lock().unwrap();
        let sender = *inner.by_hash.get(hash)?;
        [&inner.pending, &inner.queued]
            .into_iter()
            .find_map(|pool| pool.get(&sender))
            .and_then(|entries| entries.values().find(|entry| entry.hash == *hash))
            .map(|entry| entry.tx.clone())
    }

    pub fn remove(&self, hash: &H256) {
        let mut inner = self.inner.lock().unwrap();
        let Some(sender) = inner.by_hash.remove(hash) else {
            return;
        };
        for pool in [&mut inner.pending, &mut inner.queued] {
            if let Some(entries) = pool.get_mut(&sender) {
                entries.retain(|_, entry| entry.hash != *hash);
                if entries.is_empty() {
                    pool.remove(&sender);
                }
            }
        }
        inner.count = inner.count.saturating_sub(1);
    }

    /// Splits `peers` into a `sqrt(len)`-sized subset to receive the full transaction and
    /// the remainder to receive just its hash, per the gossip rule in §4.7. Peers already
    /// known (via [`KnownByPeer`]) to have `hash` are skipped from both groups.
    pub fn gossip_targets(
        &self,
        peers: &[ethlink_common::node::NodeId],
        hash: H256,
    ) -> (Vec<ethlink_common::node::NodeId>, Vec<ethlink_common::node::NodeId>) {
        let mut inner = self.inner.lock().unwrap();
        let mut candidates: Vec<ethlink_common::node::NodeId> = peers
            .iter()
            .copied()
            .filter(|peer| !inner.known_by_peer.knows(peer, &hash))
            .collect();
        candidates.shuffle(&mut rand::thread_rng());

        let full_count = (candidates.len() as f64).sqrt().ceil() as usize;
        let (full, hashes_only) = candidates.split_at(full_count.min(candidates.len()));
        let (full, hashes_only) = (full.to_vec(), hashes_only.to_vec());

        for peer in full.iter().chain(hashes_only.iter()) {
            inner.known_by_peer.mark_known(*peer, hash);
        }
        (full, hashes_only)
    }

    pub fn remove_peer(&self, peer: &ethlink_common::node::NodeId) {
        self.inner.lock().unwrap().known_by_peer.remove_peer(peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethlink_chain::state::{Account, InMemoryStateView};
    use ethlink_common::transaction::{LegacyTransaction, TxKind};
    use k256::ecdsa::{RecoveryId, Signature, SigningKey};
    use sha3::{Digest, Keccak256};

    fn header(gas_limit: u64) -> BlockHeader {
        BlockHeader {
            parent_hash: Default::default(),
            ommers_hash: Default::default(),
            coinbase: Address::zero(),
            state_root: Default::default(),
            transactions_root: Default::default(),
            receipts_root: Default::default(),
            logs_bloom: Default::default(),
            difficulty: U256::from(1u64),
            number: 1,
            gas_limit,
            gas_used: 0,
            timestamp: 1,
            extra_data: Default::default(),
            mix_hash: Default::default(),
            nonce: 0,
            base_fee_per_gas: None,
        }
    }

    fn signed_tx(key: &SigningKey, nonce: u64, gas_price: u64) -> Transaction {
        let mut unsigned = LegacyTransaction {
            nonce,
            gas_price,
            gas_limit: 21_000,
            to: TxKind::Call(Address::zero()),
            value: U256::zero(),
            data: Default::default(),
            v: U256::zero(),
            r: U256::zero(),
            s: U256::zero(),
        };
        let mut preimage = Vec::new();
        {
            use ethlink_rlp::structs::Encoder;
            Encoder::new(&mut preimage)
                .encode_field(&unsigned.nonce)
                .encode_field(&unsigned.gas_price)
                .encode_field(&unsigned.gas_limit)
                .encode_field(&unsigned.to)
                .encode_field(&unsigned.value)
                .encode_field(&unsigned.data)
                .finish()
                .ok();
        }
        let digest: [u8; 32] = Keccak256::digest(&preimage).into();
        let (sig, recovery_id): (Signature, RecoveryId) = key
            .sign_prehash_recoverable(&digest)
            .expect("ecdsa signing over a 32-byte prehash cannot fail");
        let bytes = sig.to_bytes();
        unsigned.r = U256::from_big_endian(&bytes[..32]);
        unsigned.s = U256::from_big_endian(&bytes[32..]);
        unsigned.v = U256::from(27 + recovery_id.to_byte() as u64);
        Transaction::Legacy(unsigned)
    }

    fn sender_of(key: &SigningKey) -> Address {
        Transaction::recover_sender(&signed_tx(key, 0, 1_000_000_000)).unwrap()
    }

    #[test]
    fn a_well_formed_tx_with_sufficient_balance_lands_in_pending() {
        let pool = TxPool::new();
        let key = SigningKey::random(&mut rand::thread_rng());
        let sender = sender_of(&key);
        let mut state = InMemoryStateView::new();
        state.set_account(
            sender,
            Account {
                nonce: 0,
                balance: U256::from(10u64).pow(U256::from(20u64)),
            },
        );
        let tx = signed_tx(&key, 0, 1_000_000_000);
        let header = header(30_000_000);
        let hash = pool.add(tx, &state, &header, false).unwrap();
        assert!(pool.contains(&hash));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn a_tx_with_a_nonce_gap_is_queued_not_pending() {
        let pool = TxPool::new();
        let key = SigningKey::random(&mut rand::thread_rng());
        let sender = sender_of(&key);
        let mut state = InMemoryStateView::new();
        state.set_account(
            sender,
            Account {
                nonce: 0,
                balance: U256::from(10u64).pow(U256::from(20u64)),
            },
        );
        let header = header(30_000_000);
        let tx = signed_tx(&key, 5, 1_000_000_000);
        pool.add(tx, &state, &header, false).unwrap();
        let ordered = pool.txs_by_price_and_nonce(&state, 0);
        assert!(ordered.is_empty(), "a queued (nonce-gapped) tx must not be returned for mining");
    }

    #[test]
    fn filling_the_nonce_gap_promotes_the_whole_chain_to_pending() {
        let pool = TxPool::new();
        let key = SigningKey::random(&mut rand::thread_rng());
        let sender = sender_of(&key);
        let mut state = InMemoryStateView::new();
        state.set_account(
            sender,
            Account {
                nonce: 0,
                balance: U256::from(10u64).pow(U256::from(20u64)),
            },
        );
        let header = header(30_000_000);
        pool.add(signed_tx(&key, 1, 1_000_000_000), &state, &header, false)
            .unwrap();
        pool.add(signed_tx(&key, 0, 1_000_000_000), &state, &header, false)
            .unwrap();
        let ordered = pool.txs_by_price_and_nonce(&state, 0);
        assert_eq!(ordered.len(), 2);
        assert_eq!(ordered[0].nonce(), 0);
        assert_eq!(ordered[1].nonce(), 1);
    }

    #[test]
    fn a_replacement_below_the_bump_threshold_is_rejected() {
        let pool = TxPool::new();
        let key = SigningKey::random(&mut rand::thread_rng());
        let sender = sender_of(&key);
        let mut state = InMemoryStateView::new();
        state.set_account(
            sender,
            Account {
                nonce: 0,
                balance: U256::from(10u64).pow(U256::from(20u64)),
            },
        );
        let header = header(30_000_000);
        pool.add(signed_tx(&key, 0, 1_000_000_000), &state, &header, false)
            .unwrap();
        let err = pool
            .add(signed_tx(&key, 0, 1_050_000_000), &state, &header, false)
            .unwrap_err();
        assert_eq!(err, PoolError::ReplacementUnderpriced);
    }

    #[test]
    fn insufficient_balance_is_rejected() {
        let pool = TxPool::new();
        let key = SigningKey::random(&mut rand::thread_rng());
        let sender = sender_of(&key);
        let mut state = InMemoryStateView::new();
        state.set_account(
            sender,
            Account {
                nonce: 0,
                balance: U256::zero(),
            },
        );
        let header = header(30_000_000);
        let err = pool
            .add(signed_tx(&key, 0, 1_000_000_000), &state, &header, false)
            .unwrap_err();
        assert_eq!(err, PoolError::InsufficientBalance);
    }
}
