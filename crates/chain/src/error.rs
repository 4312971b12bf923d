use ethlink_common::{BlockHash, BlockNumber};
use thiserror::Error;

/// The closed `ChainError` set from the spec: a bad block, a store failure, or a request
/// for state this store never had. Every variant here either bans the peer that supplied
/// the offending data (caller's responsibility) or surfaces as a `FatalError` to the
/// embedder; the chain crate itself never panics on bad input.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("block {0} has no known parent in the store")]
    ParentNotFound(BlockHash),
    #[error("block header difficulty does not satisfy the ethash target")]
    InvalidPoW,
    #[error("block header state root does not match the executed post-state")]
    InvalidStateRoot,
    #[error("block number {got} does not follow parent number {parent}")]
    NonSequentialNumber {
        parent: BlockNumber,
        got: BlockNumber,
    },
    #[error("block timestamp does not strictly increase over its parent")]
    NonIncreasingTimestamp,
    #[error("attempted to reset to height {0}, which is above the current head")]
    ResetAboveHead(BlockNumber),
    #[error("requested height {0} is not present in the store")]
    UnknownHeight(BlockNumber),
    #[error("store is corrupt or unavailable: {0}")]
    Store(String),
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("block gas limit exceeded: used {used} + tx {tx_gas} > limit {limit}")]
    GasLimitExceeded {
        used: u64,
        tx_gas: u64,
        limit: u64,
    },
    #[error("sender account does not have enough balance for value + gas")]
    InsufficientBalance,
    #[error("transaction nonce does not match the sender's expected nonce")]
    NonceMismatch,
}
