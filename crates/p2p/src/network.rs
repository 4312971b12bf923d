//! Converts raw [`Connection`]s into eth-protocol [`Peer`]s: runs the STATUS handshake,
//! matches outbound requests to their responses, and enforces the ban policy.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ethlink_common::block::{BlockBody, BlockHeader};
use ethlink_common::chain_status::ChainStatus;
use ethlink_common::node::NodeId;
use ethlink_common::transaction::Transaction;
use ethlink_common::{BlockHash, H256, U256};
use rand::seq::IteratorRandom;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::debug;

use crate::discovery::table::KademliaTable;
use crate::events::{Event, EventBus};
use crate::node::{Connection, Direction, P2PNode};
use crate::rlpx::eth::status::ETH_VERSION;
use crate::rlpx::eth::{
    BlockBodies, BlockHeaders, GetBlockBodies, GetBlockHeaders, GetPooledTransactions,
    GetReceipts, HashOrNumber, PooledTransactions, Receipts, StatusMessage,
};
use crate::rlpx::p2p_messages::DisconnectReason;
use crate::rlpx::Message;

/// How long we wait for the remote's STATUS once ours has been sent.
const STATUS_TIMEOUT: Duration = Duration::from_secs(10);
/// Default round-trip timeout for eth sub-protocol requests, per `protocolTimeout`.
pub const DEFAULT_PROTOCOL_TIMEOUT: Duration = Duration::from_secs(6);
/// Consecutive request timeouts after which a peer is considered worth banning.
const MAX_CONSECUTIVE_TIMEOUTS: u32 = 3;
const INBOUND_MESSAGE_QUEUE_SIZE: usize = 256;

struct PendingRequest {
    reply: oneshot::Sender<Message>,
}

/// One STATUS-negotiated eth session. `idle` tracks whether a caller (the Synchronizer, most
/// often) currently treats this peer as busy with an in-flight request it issued directly;
/// request/response matching itself is independent of idleness.
pub struct Peer {
    pub node_id: NodeId,
    pub direction: Direction,
    claim: std::sync::Mutex<(BlockHash, U256)>,
    idle: AtomicBool,
    next_request_id: AtomicU64,
    pending: std::sync::Mutex<HashMap<u64, PendingRequest>>,
    consecutive_timeouts: AtomicU32,
    outbound: mpsc::Sender<Message>,
}

impl Peer {
    fn new(node_id: NodeId, direction: Direction, outbound: mpsc::Sender<Message>, best_hash: BlockHash, total_difficulty: U256) -> Self {
        Self {
            node_id,
            direction,
            claim: std::sync::Mutex::new((best_hash, total_difficulty)),
            idle: AtomicBool::new(true),
            next_request_id: AtomicU64::new(0),
            pending: std::sync::Mutex::new(HashMap::new()),
            consecutive_timeouts: AtomicU32::new(0),
            outbound,
        }
    }

    /// `(bestHash, totalDifficulty)` as last claimed by STATUS or a `NewBlock` gossip.
    pub fn claimed(&self) -> (BlockHash, U256) {
        *self.claim.lock().unwrap()
    }

    pub fn update_claim(&self, best_hash: BlockHash, total_difficulty: U256) {
        *self.claim.lock().unwrap() = (best_hash, total_difficulty);
    }

    pub fn is_idle(&self) -> bool {
        self.idle.load(Ordering::Acquire)
    }

    pub fn set_idle(&self, value: bool) {
        self.idle.store(value, Ordering::Release);
    }

    pub fn too_many_timeouts(&self) -> bool {
        self.consecutive_timeouts.load(Ordering::Relaxed) >= MAX_CONSECUTIVE_TIMEOUTS
    }

    pub async fn send(&self, message: Message) -> bool {
        self.outbound.send(message).await.is_ok()
    }

    async fn request(&self, build: impl FnOnce(u64) -> Message, timeout: Duration) -> Option<Message> {
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id, PendingRequest { reply: tx });
        if self.outbound.send(build(id)).await.is_err() {
            self.pending.lock().unwrap().remove(&id);
            return None;
        }
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(message)) => {
                self.consecutive_timeouts.store(0, Ordering::Relaxed);
                Some(message)
            }
            _ => {
                self.pending.lock().unwrap().remove(&id);
                self.consecutive_timeouts.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub async fn request_block_headers(
        &self,
        start_block: HashOrNumber,
        limit: u64,
        skip: u64,
        reverse: bool,
        timeout: Duration,
    ) -> Option<Vec<BlockHeader>> {
        let reply = self
            .request(
                move |id| {
                    Message::GetBlockHeaders(GetBlockHeaders {
                        id,
                        start_block,
                        limit,
                        skip,
                        reverse,
                    })
                },
                timeout,
            )
            .await?;
        match reply {
            Message::BlockHeaders(headers) => Some(headers.headers),
            _ => None,
        }
    }

    pub async fn request_block_bodies(&self, block_hashes: Vec<BlockHash>, timeout: Duration) -> Option<Vec<BlockBody>> {
        let reply = self
            .request(move |id| Message::GetBlockBodies(GetBlockBodies { id, block_hashes }), timeout)
            .await?;
        match reply {
            Message::BlockBodies(bodies) => Some(bodies.bodies),
            _ => None,
        }
    }

    pub async fn request_pooled_transactions(&self, transaction_hashes: Vec<H256>, timeout: Duration) -> Option<Vec<Transaction>> {
        let reply = self
            .request(
                move |id| Message::GetPooledTransactions(GetPooledTransactions { id, transaction_hashes }),
                timeout,
            )
            .await?;
        match reply {
            Message::PooledTransactions(txs) => Some(txs.transactions),
            _ => None,
        }
    }

    pub async fn request_receipts(&self, block_hashes: Vec<BlockHash>, timeout: Duration) -> Option<Vec<Vec<ethlink_common::receipt::Receipt>>> {
        let reply = self
            .request(move |id| Message::GetReceipts(GetReceipts { id, block_hashes }), timeout)
            .await?;
        match reply {
            Message::Receipts(receipts) => Some(receipts.receipts),
            _ => None,
        }
    }

    /// Hands a response message to whichever pending request matches its id. Returns `false`
    /// if no request is waiting on it (a late reply past our own timeout, most likely).
    fn resolve(&self, id: u64, message: Message) -> bool {
        match self.pending.lock().unwrap().remove(&id) {
            Some(pending) => pending.reply.send(message).is_ok(),
            None => false,
        }
    }
}

/// A message this node did not ask for: either an unsolicited broadcast (`NewBlock`,
/// `Transactions`, ...) or a request the remote is making of us. `NetworkCore` itself only
/// runs the STATUS handshake and request/response plumbing; serving these is left to
/// whatever owns the `Chain`/`TxPool` (wired up in `cmd/ethlink`).
pub type InboundMessage = (NodeId, Message);

/// Owns the set of live eth peers, sitting between [`P2PNode`]'s raw connections and the
/// Synchronizer/TxPool/Miner that actually act on chain data.
pub struct NetworkCore<C: ChainStatus> {
    node: Arc<P2PNode>,
    chain: Arc<C>,
    events: EventBus,
    table: Arc<Mutex<KademliaTable>>,
    peers: Mutex<HashMap<NodeId, Arc<Peer>>>,
    inbound: mpsc::Sender<InboundMessage>,
}

impl<C: ChainStatus + 'static> NetworkCore<C> {
    pub fn new(
        node: Arc<P2PNode>,
        chain: Arc<C>,
        events: EventBus,
        table: Arc<Mutex<KademliaTable>>,
    ) -> (Arc<Self>, mpsc::Receiver<InboundMessage>) {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_MESSAGE_QUEUE_SIZE);
        let core = Arc::new(Self {
            node,
            chain,
            events,
            table,
            peers: Mutex::new(HashMap::new()),
            inbound: inbound_tx,
        });
        (core, inbound_rx)
    }

    /// Adopts every [`Connection`] `P2PNode` produces, spawning one handler task per peer.
    pub fn spawn(self: Arc<Self>, mut incoming: mpsc::Receiver<Connection>) {
        tokio::spawn(async move {
            while let Some(conn) = incoming.recv().await {
                let this = self.clone();
                tokio::spawn(async move { this.handle_connection(conn).await });
            }
        });
    }

    pub async fn peer(&self, node_id: &NodeId) -> Option<Arc<Peer>> {
        self.peers.lock().await.get(node_id).cloned()
    }

    pub async fn peer_ids(&self) -> Vec<NodeId> {
        self.peers.lock().await.keys().copied().collect()
    }

    /// A uniformly random idle peer matching `filter`, or `None` if none qualify.
    pub async fn idle_peer(&self, filter: impl Fn(&Peer) -> bool) -> Option<Arc<Peer>> {
        let peers = self.peers.lock().await;
        peers
            .values()
            .filter(|peer| peer.is_idle() && filter(peer))
            .cloned()
            .choose(&mut rand::thread_rng())
    }

    /// Removes `node_id` from the peer pool, closes its connection, and forbids reconnection
    /// for the routing table's ban window.
    pub async fn ban_peer(&self, node_id: NodeId, reason: DisconnectReason) {
        self.peers.lock().await.remove(&node_id);
        self.node.close(node_id, reason).await;
        self.table.lock().await.ban(node_id);
        self.events.publish(Event::PoolPeerBanned(node_id));
    }

    pub async fn report_error(&self, node_id: NodeId, error: String) {
        self.events.publish(Event::PeerError(node_id, error));
        self.ban_peer(node_id, DisconnectReason::ProtocolError).await;
    }

    async fn handle_connection(self: Arc<Self>, mut conn: Connection) {
        let node_id = conn.node_id;
        let direction = conn.direction;
        let status = StatusMessage {
            eth_version: ETH_VERSION,
            network_id: self.chain.network_id(),
            total_difficulty: self.chain.total_difficulty(),
            block_hash: self.chain.best_hash(),
            genesis: self.chain.genesis_hash(),
            fork_id: self.chain.fork_id(),
        };
        if conn.send(Message::Status(status.clone())).await.is_err() {
            return;
        }

        let remote_status = match tokio::time::timeout(STATUS_TIMEOUT, Self::await_status(&mut conn)).await {
            Ok(Some(remote_status)) => remote_status,
            _ => {
                self.node.close(node_id, DisconnectReason::Timeout).await;
                return;
            }
        };
        if remote_status.network_id != status.network_id || remote_status.genesis != status.genesis {
            debug!(?node_id, "p2p: STATUS mismatch, disconnecting");
            self.node.close(node_id, DisconnectReason::SubprotocolError).await;
            return;
        }

        let peer = Arc::new(Peer::new(
            node_id,
            direction,
            conn.sender(),
            remote_status.block_hash,
            remote_status.total_difficulty,
        ));
        self.peers.lock().await.insert(node_id, peer.clone());
        self.events.publish(Event::PoolPeerAdded(node_id));

        while let Some(message) = conn.recv().await {
            self.dispatch(&peer, message).await;
        }

        self.peers.lock().await.remove(&node_id);
        self.events.publish(Event::PoolPeerRemoved(node_id));
    }

    async fn await_status(conn: &mut Connection) -> Option<StatusMessage> {
        loop {
            match conn.recv().await? {
                Message::Status(status) => return Some(status),
                _ => continue,
            }
        }
    }

    async fn dispatch(&self, peer: &Arc<Peer>, message: Message) {
        match message {
            Message::BlockHeaders(inner) => {
                let id = inner.id;
                peer.resolve(id, Message::BlockHeaders(inner));
            }
            Message::BlockBodies(inner) => {
                let id = inner.id;
                peer.resolve(id, Message::BlockBodies(inner));
            }
            Message::PooledTransactions(inner) => {
                let id = inner.id;
                peer.resolve(id, Message::PooledTransactions(inner));
            }
            Message::Receipts(inner) => {
                let id = inner.id;
                peer.resolve(id, Message::Receipts(inner));
            }
            Message::NewBlock(ref inner) => {
                peer.update_claim(inner.header.hash(), inner.total_difficulty);
                let _ = self.inbound.send((peer.node_id, message)).await;
            }
            Message::Disconnect(_) => {}
            Message::Hello(_) | Message::Ping(_) | Message::Pong(_) | Message::Status(_) => {}
            other => {
                let _ = self.inbound.send((peer.node_id, other)).await;
            }
        }
    }
}
