use crate::fork::ForkId;
use crate::{BlockHash, U256};

/// The slice of chain state the `eth` wire protocol's STATUS handshake needs, independent
/// of whatever concrete `Chain`/`Store` implementation tracks it.
pub trait ChainStatus: Send + Sync {
    fn network_id(&self) -> u64;
    fn genesis_hash(&self) -> BlockHash;
    fn best_hash(&self) -> BlockHash;
    fn total_difficulty(&self) -> U256;
    fn fork_id(&self) -> ForkId;
}
