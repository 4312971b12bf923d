use bytes::Bytes;

use ethlink_common::block::{BlockBody, BlockHeader};
use ethlink_common::receipt::Receipt;
use ethlink_common::transaction::Transaction;
use ethlink_common::Address;

use crate::error::ExecutorError;
use crate::state::StateView;

/// The header fields the block builder fills in before transactions are applied; the rest
/// (parent hash, number, difficulty) are derived from the parent by the executor itself.
#[derive(Debug, Clone)]
pub struct HeaderFields {
    pub coinbase: Address,
    pub timestamp: u64,
    pub gas_limit: u64,
    pub extra_data: Bytes,
}

/// Out-of-scope port: the real EVM, state trie, and receipt accounting live behind this
/// trait in the embedder. `buildBlock` shallow-copies state at `parent` and returns a
/// builder the Miner drains `TxPool::txs_by_price_and_nonce` into.
pub trait Executor: Send + Sync {
    fn build_block(
        &self,
        parent: &BlockHeader,
        fields: HeaderFields,
        state: &dyn StateView,
    ) -> Result<Box<dyn BlockBuilder>, ExecutorError>;
}

pub trait BlockBuilder: Send {
    fn remaining_gas(&self) -> u64;

    /// Applies one transaction, returning its receipt, or an error if it can't be included
    /// (caller is expected to skip this sender's remaining nonces on failure).
    fn add_transaction(
        &mut self,
        tx: &Transaction,
        sender: Address,
    ) -> Result<Receipt, ExecutorError>;

    fn finalize(self: Box<Self>) -> (BlockHeader, BlockBody, Vec<Receipt>);
}

/// A toy, non-EVM executor: gas accounting and balance/nonce bookkeeping only, no real
/// state root. Used by the miner's tests and `cmd/ethlink --dev` mode when no real
/// execution layer is wired in; a production deployment substitutes a real EVM behind
/// the same [`Executor`] trait.
pub struct InMemoryExecutor;

struct InMemoryBlockBuilder {
    header: BlockHeader,
    body: BlockBody,
    receipts: Vec<Receipt>,
    gas_used: u64,
}

const TOY_TX_GAS: u64 = 21_000;

impl Executor for InMemoryExecutor {
    fn build_block(
        &self,
        parent: &BlockHeader,
        fields: HeaderFields,
        _state: &dyn StateView,
    ) -> Result<Box<dyn BlockBuilder>, ExecutorError> {
        let header = BlockHeader {
            parent_hash: parent.hash(),
            ommers_hash: ethlink_common::H256::zero(),
            coinbase: fields.coinbase,
            state_root: parent.state_root,
            transactions_root: ethlink_common::H256::zero(),
            receipts_root: ethlink_common::H256::zero(),
            logs_bloom: Default::default(),
            difficulty: crate::pow::next_difficulty(parent, fields.timestamp),
            number: parent.number + 1,
            gas_limit: fields.gas_limit,
            gas_used: 0,
            timestamp: fields.timestamp,
            extra_data: fields.extra_data,
            mix_hash: ethlink_common::H256::zero(),
            nonce: 0,
            base_fee_per_gas: None,
        };
        Ok(Box::new(InMemoryBlockBuilder {
            header,
            body: BlockBody::default(),
            receipts: Vec::new(),
            gas_used: 0,
        }))
    }
}

impl BlockBuilder for InMemoryBlockBuilder {
    fn remaining_gas(&self) -> u64 {
        self.header.gas_limit.saturating_sub(self.gas_used)
    }

    fn add_transaction(
        &mut self,
        tx: &Transaction,
        _sender: Address,
    ) -> Result<Receipt, ExecutorError> {
        if self.gas_used + TOY_TX_GAS > self.header.gas_limit {
            return Err(ExecutorError::GasLimitExceeded {
                used: self.gas_used,
                tx_gas: TOY_TX_GAS,
                limit: self.header.gas_limit,
            });
        }
        self.gas_used += TOY_TX_GAS;
        let receipt = Receipt {
            succeeded: true,
            cumulative_gas_used: self.gas_used,
            bloom: Default::default(),
            logs: Vec::new(),
        };
        self.body.transactions.push(tx.clone());
        self.receipts.push(receipt.clone());
        Ok(receipt)
    }

    fn finalize(self: Box<Self>) -> (BlockHeader, BlockBody, Vec<Receipt>) {
        let mut header = self.header;
        header.gas_used = self.gas_used;
        (header, self.body, self.receipts)
    }
}
