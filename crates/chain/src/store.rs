use std::collections::HashMap;

use ethlink_common::block::{Block, BlockBody, BlockHeader};
use ethlink_common::receipt::Receipt;
use ethlink_common::{BlockHash, BlockNumber};

/// The three logical key-value stores named in the spec's persisted-state layout: headers
/// and bodies by hash plus hash-by-number (`chain`), trie nodes (`state`, untouched here —
/// state storage is the executor's concern), and receipts/tx-index/preimages (`meta`).
///
/// This in-memory implementation is the reference used by tests, the Synchronizer, and
/// dev-mode `cmd/ethlink` runs. A production deployment substitutes a disk-backed store
/// behind the same trait.
pub trait Store: Send + Sync {
    fn get_header(&self, hash: BlockHash) -> Option<BlockHeader>;
    fn get_body(&self, hash: BlockHash) -> Option<BlockBody>;
    fn get_hash_by_number(&self, number: BlockNumber) -> Option<BlockHash>;
    fn get_total_difficulty(&self, hash: BlockHash) -> Option<ethlink_common::U256>;
    fn get_receipts(&self, hash: BlockHash) -> Option<Vec<Receipt>>;

    fn put_block(
        &mut self,
        block: Block,
        total_difficulty: ethlink_common::U256,
        receipts: Vec<Receipt>,
    );
    fn put_canonical_number(&mut self, number: BlockNumber, hash: BlockHash);
    fn remove_canonical_number(&mut self, number: BlockNumber);
}

#[derive(Default)]
pub struct InMemoryStore {
    headers: HashMap<BlockHash, BlockHeader>,
    bodies: HashMap<BlockHash, BlockBody>,
    receipts: HashMap<BlockHash, Vec<Receipt>>,
    total_difficulties: HashMap<BlockHash, ethlink_common::U256>,
    canonical_by_number: HashMap<BlockNumber, BlockHash>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for InMemoryStore {
    fn get_header(&self, hash: BlockHash) -> Option<BlockHeader> {
        self.headers.get(&hash).cloned()
    }

    fn get_body(&self, hash: BlockHash) -> Option<BlockBody> {
        self.bodies.get(&hash).cloned()
    }

    fn get_hash_by_number(&self, number: BlockNumber) -> Option<BlockHash> {
        self.canonical_by_number.get(&number).copied()
    }

    fn get_total_difficulty(&self, hash: BlockHash) -> Option<ethlink_common::U256> {
        self.total_difficulties.get(&hash).copied()
    }

    fn get_receipts(&self, hash: BlockHash) -> Option<Vec<Receipt>> {
        self.receipts.get(&hash).cloned()
    }

    fn put_block(
        &mut self,
        block: Block,
        total_difficulty: ethlink_common::U256,
        receipts: Vec<Receipt>,
    ) {
        let hash = block.hash();
        self.total_difficulties.insert(hash, total_difficulty);
        self.receipts.insert(hash, receipts);
        self.bodies.insert(hash, block.body);
        self.headers.insert(hash, block.header);
    }

    fn put_canonical_number(&mut self, number: BlockNumber, hash: BlockHash) {
        self.canonical_by_number.insert(number, hash);
    }

    fn remove_canonical_number(&mut self, number: BlockNumber) {
        self.canonical_by_number.remove(&number);
    }
}
