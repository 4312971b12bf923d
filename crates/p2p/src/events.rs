use ethlink_common::node::NodeId;
use ethlink_common::{block::BlockHeader, BlockHash};

/// Everything the core publishes for RPC and tooling to observe. One broadcast channel,
/// fanned out to as many subscribers as care; a slow subscriber only loses its own backlog.
#[derive(Debug, Clone)]
pub enum Event {
    PeerConnected(NodeId),
    PeerDisconnected(NodeId),
    PeerError(NodeId, String),
    PoolPeerAdded(NodeId),
    PoolPeerRemoved(NodeId),
    PoolPeerBanned(NodeId),
    ProtocolMessage { peer: NodeId, message: String },
    SyncFetchedBlocks(usize),
    SyncSynchronized { height: u64 },
    SyncError(String),
    ChainUpdated { head: BlockHash, number: u64 },
    ChainReorg {
        old_blocks: Vec<BlockHeader>,
        new_blocks: Vec<BlockHeader>,
    },
    ClientShutdown,
}

/// Thin wrapper over a broadcast channel. Cloning an `EventBus` shares the same underlying
/// channel; each subscription gets its own backlog and does not replay past events.
#[derive(Clone)]
pub struct EventBus {
    sender: tokio::sync::broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Publishes an event. Errors only when there are no subscribers, which is not a bug.
    pub fn publish(&self, event: Event) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
