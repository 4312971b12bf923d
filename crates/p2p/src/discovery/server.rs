use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ethlink_common::node::{BootNode, Endpoint, Node, NodeId};
use ethlink_common::signer::Signer;
use tokio::net::UdpSocket;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, trace, warn};

use crate::discovery::message::{
    FindNodeMessage, Message, NeighboursMessage, Packet, PingMessage, PongMessage,
};
use crate::discovery::table::{bucket_index, Insertion, KademliaTable, BUCKET_SIZE, PING_TIMEOUT};
use crate::events::{Event, EventBus};

const REFRESH_INTERVAL: Duration = Duration::from_secs(60);
const REVALIDATION_INTERVAL: Duration = Duration::from_secs(10);
const EXPIRATION_WINDOW: Duration = Duration::from_secs(20);
/// Two consecutive missed liveness PINGs evict a peer, per the routing table's failure policy.
const MAX_MISSED_LIVENESS_PINGS: u8 = 2;

fn expiration() -> u64 {
    (SystemTime::now() + EXPIRATION_WINDOW)
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[derive(Clone)]
pub struct DiscoveryConfig {
    pub udp_addr: SocketAddr,
    pub bootnodes: Vec<BootNode>,
    pub only_confirmed_refresh: bool,
}

/// Kademlia/DPT discovery: a UDP service that bootstraps, refreshes, and revalidates the
/// routing table, and answers inbound discovery traffic.
pub struct DiscoveryService {
    signer: Signer,
    local_endpoint: Endpoint,
    table: Arc<Mutex<KademliaTable>>,
    socket: Arc<UdpSocket>,
    events: EventBus,
    awaiting_pong: Arc<Mutex<HashMap<NodeId, oneshot::Sender<()>>>>,
    missed_liveness_pings: Arc<Mutex<HashMap<NodeId, u8>>>,
    config: DiscoveryConfig,
}

impl DiscoveryService {
    pub async fn bind(
        signer: Signer,
        config: DiscoveryConfig,
        events: EventBus,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(config.udp_addr).await?;
        let local_endpoint = Endpoint {
            ip: config.udp_addr.ip(),
            udp_port: config.udp_addr.port(),
            tcp_port: config.udp_addr.port(),
        };
        Ok(Self {
            table: Arc::new(Mutex::new(KademliaTable::new(signer.node_id()))),
            signer,
            local_endpoint,
            socket: Arc::new(socket),
            events,
            awaiting_pong: Arc::new(Mutex::new(HashMap::new())),
            missed_liveness_pings: Arc::new(Mutex::new(HashMap::new())),
            config,
        })
    }

    pub fn table(&self) -> Arc<Mutex<KademliaTable>> {
        self.table.clone()
    }

    /// Spawns the receive loop, bootstrap, refresh, and revalidation tasks. Returns immediately;
    /// the returned handles are not joined here since discovery runs for the process lifetime.
    pub fn spawn(self) -> Arc<Self> {
        let this = Arc::new(self);
        tokio::spawn(this.clone().receive_loop());
        tokio::spawn(this.clone().bootstrap());
        tokio::spawn(this.clone().refresh_loop());
        tokio::spawn(this.clone().revalidation_loop());
        this
    }

    async fn send(&self, addr: SocketAddr, message: &Message) {
        let packet = Packet::encode(self.signer.signing_key(), message);
        if let Err(err) = self.socket.send_to(&packet, addr).await {
            warn!(%addr, %err, "discovery: failed to send packet");
        }
    }

    async fn receive_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; 1280];
        loop {
            let (len, from) = match self.socket.recv_from(&mut buf).await {
                Ok(v) => v,
                Err(err) => {
                    warn!(%err, "discovery: recv_from failed");
                    continue;
                }
            };
            let (node_id, message) = match Packet::decode(&buf[..len]) {
                Ok(v) => v,
                Err(err) => {
                    trace!(%err, "discovery: dropping malformed packet");
                    continue;
                }
            };
            if self.table.lock().await.is_banned(node_id) {
                continue;
            }
            let packet_hash = ethlink_common::H256::from_slice(&buf[..32]);
            self.handle_message(node_id, from, message, packet_hash).await;
        }
    }

    async fn handle_message(
        &self,
        node_id: NodeId,
        from: SocketAddr,
        message: Message,
        packet_hash: ethlink_common::H256,
    ) {
        match message {
            Message::Ping(ping) => self.handle_ping(node_id, from, ping, packet_hash).await,
            Message::Pong(pong) => self.handle_pong(node_id, pong).await,
            Message::FindNode(find_node) => self.handle_find_node(node_id, from, find_node).await,
            Message::Neighbours(neighbours) => self.handle_neighbours(neighbours).await,
            Message::EnrRequest(_) | Message::EnrResponse(_) => {
                // ENR content isn't tracked beyond identity; request/response is acknowledged
                // implicitly by treating the sender as confirmed via the surrounding ping/pong.
            }
        }
    }

    async fn handle_ping(
        &self,
        node_id: NodeId,
        from: SocketAddr,
        ping: PingMessage,
        packet_hash: ethlink_common::H256,
    ) {
        let pong = Message::Pong(PongMessage {
            to: ping.from,
            ping_hash: packet_hash,
            expiration: expiration(),
            enr_seq: None,
        });
        self.send(from, &pong).await;

        let node = Node {
            ip: from.ip(),
            udp_port: from.port(),
            tcp_port: ping.from.tcp_port,
            node_id,
        };
        self.note_sighting(node).await;
        // A peer that pinged us is, by definition, reachable; confirm it directly rather
        // than waiting on a round trip we'd have to initiate ourselves.
        self.table.lock().await.confirm(node_id);
    }

    async fn handle_pong(&self, node_id: NodeId, _pong: PongMessage) {
        self.table.lock().await.confirm(node_id);
        self.missed_liveness_pings.lock().await.remove(&node_id);
        if let Some(sender) = self.awaiting_pong.lock().await.remove(&node_id) {
            let _ = sender.send(());
        }
        self.events.publish(Event::PeerConnected(node_id));
    }

    async fn handle_find_node(&self, node_id: NodeId, from: SocketAddr, find_node: FindNodeMessage) {
        if !self.is_confirmed(node_id).await {
            return;
        }
        let closest = self.table.lock().await.closest_to(find_node.target, BUCKET_SIZE);
        // NEIGHBOURS caps each packet at 16 entries (a UDP datagram's worth); larger routing
        // tables would need to chunk this into multiple packets of 4 each per bucket depth,
        // but BUCKET_SIZE already bounds a single reply to the wire limit.
        let neighbours = Message::Neighbours(NeighboursMessage {
            nodes: closest,
            expiration: expiration(),
        });
        self.send(from, &neighbours).await;
    }

    async fn handle_neighbours(&self, neighbours: NeighboursMessage) {
        for node in neighbours.nodes {
            self.note_sighting(node).await;
            self.ping_and_confirm(node);
        }
    }

    async fn is_confirmed(&self, node_id: NodeId) -> bool {
        self.table
            .lock()
            .await
            .confirmed_peers()
            .any(|n| n.node_id == node_id)
    }

    async fn note_sighting(&self, node: Node) {
        let insertion = self.table.lock().await.insert_or_touch(node);
        match insertion {
            Insertion::Inserted => {
                debug!(node_id = ?node.node_id, "discovery: new candidate peer");
                self.events.publish(Event::PeerConnected(node.node_id));
            }
            Insertion::BucketFull { head } => {
                self.challenge_head_for_eviction(head.node, node);
            }
            Insertion::Refreshed => {}
        }
    }

    /// Per the table's failure policy: ping the bucket head; on timeout evict it and insert
    /// the new candidate in its place, otherwise keep the head and drop the candidate.
    fn challenge_head_for_eviction(&self, head: Node, candidate: Node) {
        let this = self.clone_handle();
        tokio::spawn(async move {
            let alive = this.ping_and_wait(head).await;
            if !alive {
                this.table
                    .lock()
                    .await
                    .evict_head_and_promote(head.node_id, Some(candidate));
            }
        });
    }

    fn ping_and_confirm(&self, node: Node) {
        let this = self.clone_handle();
        tokio::spawn(async move {
            this.ping_and_wait(node).await;
        });
    }

    fn clone_handle(&self) -> DiscoveryServiceHandle {
        DiscoveryServiceHandle {
            signer: self.signer.clone(),
            local_endpoint: self.local_endpoint,
            table: self.table.clone(),
            socket: self.socket.clone(),
            events: self.events.clone(),
            awaiting_pong: self.awaiting_pong.clone(),
        }
    }

    /// Sends PING to `node` and waits up to [`PING_TIMEOUT`] for the matching PONG.
    async fn ping_and_wait(&self, node: Node) -> bool {
        self.clone_handle().ping_and_wait(node).await
    }

    async fn bootstrap(self: Arc<Self>) {
        for bootnode in self.config.bootnodes.clone() {
            let node = Node {
                ip: bootnode.socket_address.ip(),
                udp_port: bootnode.socket_address.port(),
                tcp_port: bootnode.socket_address.port(),
                node_id: bootnode.node_id,
            };
            let handle = self.clone_handle();
            let table = self.table.clone();
            let local_id = self.signer.node_id();
            tokio::spawn(async move {
                if handle.ping_and_wait(node).await {
                    table.lock().await.insert_or_touch(node);
                    table.lock().await.confirm(node.node_id);
                    let find_node = Message::FindNode(FindNodeMessage {
                        target: local_id,
                        expiration: expiration(),
                    });
                    handle.send(node.socket_addr(), &find_node).await;
                }
            });
        }
    }

    async fn refresh_loop(self: Arc<Self>) {
        let mut cursor = 0usize;
        let mut ticker = tokio::time::interval(REFRESH_INTERVAL);
        loop {
            ticker.tick().await;
            let bucket = self
                .table
                .lock()
                .await
                .pick_bucket_to_refresh(cursor, self.config.only_confirmed_refresh);
            cursor = cursor.wrapping_add(1);
            let Some(bucket_index) = bucket else { continue };
            let target = random_target_in_bucket(self.signer.node_id(), bucket_index);
            let peer = {
                let table = self.table.lock().await;
                table.closest_to(target, 1).into_iter().next()
            };
            if let Some(peer) = peer {
                let find_node = Message::FindNode(FindNodeMessage {
                    target,
                    expiration: expiration(),
                });
                self.send(peer.socket_addr(), &find_node).await;
            }
        }
    }

    /// Periodically pings one live peer per bucket to confirm it is still reachable,
    /// evicting it after two consecutive missed PONGs.
    async fn revalidation_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(REVALIDATION_INTERVAL);
        loop {
            ticker.tick().await;
            let candidates: Vec<Node> = {
                let table = self.table.lock().await;
                table.confirmed_peers().collect()
            };
            for node in candidates {
                let this = self.clone_handle();
                let missed = self.missed_liveness_pings.clone();
                let table = self.table.clone();
                tokio::spawn(async move {
                    let alive = this.ping_and_wait(node).await;
                    let mut missed = missed.lock().await;
                    if alive {
                        missed.remove(&node.node_id);
                    } else {
                        let count = missed.entry(node.node_id).or_insert(0);
                        *count += 1;
                        if *count >= MAX_MISSED_LIVENESS_PINGS {
                            table.lock().await.remove(node.node_id);
                            missed.remove(&node.node_id);
                        }
                    }
                });
            }
        }
    }
}

/// A lightweight clone of the parts of [`DiscoveryService`] needed from a spawned task,
/// avoiding a second `Arc<DiscoveryService>` cycle through `self.clone_handle()`.
#[derive(Clone)]
struct DiscoveryServiceHandle {
    signer: Signer,
    local_endpoint: Endpoint,
    table: Arc<Mutex<KademliaTable>>,
    socket: Arc<UdpSocket>,
    events: EventBus,
    awaiting_pong: Arc<Mutex<HashMap<NodeId, oneshot::Sender<()>>>>,
}

impl DiscoveryServiceHandle {
    async fn send(&self, addr: SocketAddr, message: &Message) {
        let packet = Packet::encode(self.signer.signing_key(), message);
        let _ = self.socket.send_to(&packet, addr).await;
    }

    async fn ping_and_wait(&self, node: Node) -> bool {
        let (tx, rx) = oneshot::channel();
        self.awaiting_pong.lock().await.insert(node.node_id, tx);

        let ping = Message::Ping(PingMessage {
            version: 4,
            from: self.local_endpoint,
            to: node.endpoint(),
            expiration: expiration(),
            enr_seq: None,
        });
        self.send(node.socket_addr(), &ping).await;

        let outcome = tokio::time::timeout(PING_TIMEOUT, rx).await;
        self.awaiting_pong.lock().await.remove(&node.node_id);
        match outcome {
            Ok(Ok(())) => true,
            _ => {
                self.events.publish(Event::PeerError(
                    node.node_id,
                    "liveness ping timed out".to_string(),
                ));
                false
            }
        }
    }
}

fn random_target_in_bucket(local_id: NodeId, bucket: usize) -> NodeId {
    use rand::RngCore;
    let mut bytes = [0u8; 64];
    rand::thread_rng().fill_bytes(&mut bytes);
    // Force the distance from `local_id` to fall in the requested bucket by fixing the
    // highest differing bit and randomizing everything below it.
    let byte_index = bucket / 8;
    let bit_in_byte = 7 - (bucket % 8);
    let local_bytes = local_id.as_bytes();
    for (i, b) in bytes.iter_mut().enumerate() {
        if i < byte_index {
            *b = local_bytes[i];
        } else if i == byte_index {
            let mask_above = if bit_in_byte == 7 { 0u8 } else { !((1u8 << (bit_in_byte + 1)) - 1) };
            *b = (local_bytes[i] & mask_above) | (1 << bit_in_byte) | (*b & ((1 << bit_in_byte) - 1));
        }
    }
    NodeId::from_slice(&bytes)
}

trait NodeExt {
    fn socket_addr(&self) -> SocketAddr;
}

impl NodeExt for Node {
    fn socket_addr(&self) -> SocketAddr {
        self.endpoint().udp_address()
    }
}
