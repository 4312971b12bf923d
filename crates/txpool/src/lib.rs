pub mod entry;
pub mod error;
pub mod fetcher;
pub mod known;
pub mod pool;

pub use entry::TxPoolEntry;
pub use error::PoolError;
pub use fetcher::TxFetcher;
pub use known::{HandledSet, KnownByPeer};
pub use pool::TxPool;
