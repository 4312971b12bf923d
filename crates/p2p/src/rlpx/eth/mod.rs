pub mod blocks;
pub mod receipts;
pub mod status;
pub mod transactions;

pub use blocks::{
    BlockBodies, BlockHeaders, GetBlockBodies, GetBlockHeaders, HashOrNumber, NewBlock,
    NewBlockHashEntry, NewBlockHashes,
};
pub use receipts::{GetReceipts, Receipts};
pub use status::StatusMessage;
pub use transactions::{
    GetPooledTransactions, NewPooledTransactionHashes, PooledTransactions, Transactions,
};
