pub mod error;
pub mod miner;

pub use error::MinerError;
pub use miner::{Miner, MinerConfig};
