use std::time::Instant;

use ethlink_common::transaction::Transaction;
use ethlink_common::{Address, H256};

/// `(tx, hash, senderAddress, insertedAt, localFlag)`. Lives in exactly one of `pending` or
/// `queued` for its sender; never both.
#[derive(Debug, Clone)]
pub struct TxPoolEntry {
    pub tx: Transaction,
    pub hash: H256,
    pub sender: Address,
    pub inserted_at: Instant,
    pub local: bool,
}

impl TxPoolEntry {
    pub fn nonce(&self) -> u64 {
        self.tx.nonce()
    }
}
