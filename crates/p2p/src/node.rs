//! TCP transport: accepts inbound RLPx connections, dials outbound ones, and hands each
//! completed handshake off as a [`Connection`] for [`crate::network::NetworkCore`] to adopt.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ethlink_common::node::{Endpoint, NodeId};
use ethlink_common::signer::Signer;
use ethlink_rlp::structs::Capability;
use k256::ecdsa::SigningKey;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::rlpx::{Message, RLPxConnection, RLPxError};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
/// A dial that keeps failing against the same address backs off for this long before being
/// retried by the caller's own dial loop.
const DIAL_BACKOFF: Duration = Duration::from_secs(30);
const OUTBOUND_QUEUE_SIZE: usize = 64;
const INBOUND_QUEUE_SIZE: usize = 64;

#[derive(Debug, Error)]
pub enum DialError {
    #[error("refusing to dial our own node id")]
    SelfDial,
    #[error("already connected to this node")]
    AlreadyConnected,
    #[error("peer advertises no tcp port")]
    NoTcpPort,
    #[error("connection pool is at capacity")]
    TooManyPeers,
    #[error("dial attempt timed out")]
    Timeout,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("handshake failed: {0}")]
    Handshake(#[from] RLPxError),
    #[error("connection is closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Clone)]
pub struct P2PNodeConfig {
    pub tcp_addr: SocketAddr,
    pub max_peers: usize,
}

/// A live, post-HELLO RLPx session, handed off by [`P2PNode`] once a connection's transport
/// handshake is done. `NetworkCore` drives the eth sub-protocol on top of it.
pub struct Connection {
    pub node_id: NodeId,
    pub direction: Direction,
    pub capabilities: Vec<Capability>,
    outbound: mpsc::Sender<Message>,
    inbound: mpsc::Receiver<Message>,
}

impl Connection {
    pub async fn send(&self, message: Message) -> Result<(), DialError> {
        self.outbound.send(message).await.map_err(|_| DialError::Closed)
    }

    pub async fn recv(&mut self) -> Option<Message> {
        self.inbound.recv().await
    }

    /// A cloned handle to this connection's outbound queue, usable after `recv`'s receiver
    /// half has been split off into a driving task.
    pub fn sender(&self) -> mpsc::Sender<Message> {
        self.outbound.clone()
    }
}

struct Registered {
    outbound: mpsc::Sender<Message>,
}

/// Owns the listening socket and the set of live connections, and runs the dial policy that
/// keeps peer count within `[minPeers, maxPeers]`. Produces completed [`Connection`]s on an
/// internal channel that the caller (`NetworkCore`) drains.
pub struct P2PNode {
    signer: Signer,
    config: P2PNodeConfig,
    connections: Arc<Mutex<HashMap<NodeId, Registered>>>,
    dial_failures: Arc<Mutex<HashMap<SocketAddr, Instant>>>,
    new_connections: mpsc::Sender<Connection>,
}

impl P2PNode {
    pub fn new(signer: Signer, config: P2PNodeConfig) -> (Arc<Self>, mpsc::Receiver<Connection>) {
        let (tx, rx) = mpsc::channel(INBOUND_QUEUE_SIZE);
        let node = Arc::new(Self {
            signer,
            config,
            connections: Arc::new(Mutex::new(HashMap::new())),
            dial_failures: Arc::new(Mutex::new(HashMap::new())),
            new_connections: tx,
        });
        (node, rx)
    }

    pub async fn peer_count(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub async fn is_connected(&self, node_id: &NodeId) -> bool {
        self.connections.lock().await.contains_key(node_id)
    }

    /// Binds the listening socket and spawns the accept loop. Returns once bound; the accept
    /// loop itself runs for the process lifetime.
    pub fn start(self: Arc<Self>) -> std::io::Result<()> {
        let addr = self.config.tcp_addr;
        tokio::spawn(async move {
            let listener = match TcpListener::bind(addr).await {
                Ok(listener) => listener,
                Err(err) => {
                    warn!(%addr, %err, "p2p: failed to bind tcp listener");
                    return;
                }
            };
            self.accept_loop(listener).await;
        });
        Ok(())
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            let (stream, addr) = match listener.accept().await {
                Ok(v) => v,
                Err(err) => {
                    warn!(%err, "p2p: accept failed");
                    continue;
                }
            };
            if self.peer_count().await >= self.config.max_peers {
                debug!(%addr, "p2p: dropping inbound connection, at capacity");
                continue;
            }
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(err) = this.accept_one(stream, addr).await {
                    debug!(%addr, %err, "p2p: inbound handshake failed");
                }
            });
        }
    }

    async fn accept_one(self: Arc<Self>, stream: TcpStream, addr: SocketAddr) -> Result<(), DialError> {
        let mut conn = RLPxConnection::receiver(self.signer.signing_key().clone(), stream, self.config.tcp_addr.port());
        tokio::time::timeout(HANDSHAKE_TIMEOUT, conn.handshake())
            .await
            .map_err(|_| DialError::Timeout)??;
        let node_id = conn.remote_node_id()?;
        self.register(conn, node_id, Direction::Inbound).await
    }

    /// Dials `expected_node_id` at `endpoint`. Refuses a self-dial, a duplicate connection,
    /// or a remote whose handshake identity doesn't match what was expected.
    pub async fn dial(self: &Arc<Self>, endpoint: Endpoint, expected_node_id: NodeId) -> Result<(), DialError> {
        if expected_node_id == self.signer.node_id() {
            return Err(DialError::SelfDial);
        }
        if self.is_connected(&expected_node_id).await {
            return Err(DialError::AlreadyConnected);
        }
        if self.peer_count().await >= self.config.max_peers {
            return Err(DialError::TooManyPeers);
        }
        let addr = endpoint.tcp_address().ok_or(DialError::NoTcpPort)?;
        if let Some(since) = self.dial_failures.lock().await.get(&addr) {
            if since.elapsed() < DIAL_BACKOFF {
                return Err(DialError::Timeout);
            }
        }

        let result = self.dial_inner(addr, expected_node_id).await;
        if result.is_err() {
            self.dial_failures.lock().await.insert(addr, Instant::now());
        } else {
            self.dial_failures.lock().await.remove(&addr);
        }
        result
    }

    async fn dial_inner(self: &Arc<Self>, addr: SocketAddr, expected_node_id: NodeId) -> Result<(), DialError> {
        let stream = tokio::time::timeout(HANDSHAKE_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| DialError::Timeout)??;
        let mut conn = RLPxConnection::initiator(
            self.signer.signing_key().clone(),
            expected_node_id,
            stream,
            self.config.tcp_addr.port(),
        );
        tokio::time::timeout(HANDSHAKE_TIMEOUT, conn.handshake())
            .await
            .map_err(|_| DialError::Timeout)??;
        let node_id = conn.remote_node_id()?;
        if node_id != expected_node_id {
            return Err(DialError::Handshake(RLPxError::InvalidPeerId));
        }
        self.register(conn, node_id, Direction::Outbound).await
    }

    async fn register(
        self: &Arc<Self>,
        conn: RLPxConnection<TcpStream>,
        node_id: NodeId,
        direction: Direction,
    ) -> Result<(), DialError> {
        let mut connections = self.connections.lock().await;
        if connections.contains_key(&node_id) {
            return Err(DialError::AlreadyConnected);
        }
        let capabilities = conn.capabilities.clone();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_SIZE);
        let (inbound_tx, inbound_rx) = mpsc::channel(OUTBOUND_QUEUE_SIZE);
        connections.insert(node_id, Registered { outbound: outbound_tx.clone() });
        drop(connections);

        let this = self.clone();
        tokio::spawn(async move {
            this.run_connection(conn, node_id, outbound_rx, inbound_tx).await;
        });

        let connection = Connection {
            node_id,
            direction,
            capabilities,
            outbound: outbound_tx,
            inbound: inbound_rx,
        };
        let _ = self.new_connections.send(connection).await;
        Ok(())
    }

    async fn run_connection(
        self: Arc<Self>,
        mut conn: RLPxConnection<TcpStream>,
        node_id: NodeId,
        mut outbound_rx: mpsc::Receiver<Message>,
        inbound_tx: mpsc::Sender<Message>,
    ) {
        loop {
            tokio::select! {
                outgoing = outbound_rx.recv() => {
                    match outgoing {
                        Some(message) => {
                            if let Err(err) = conn.send(message).await {
                                debug!(?node_id, %err, "p2p: send failed, closing connection");
                                break;
                            }
                        }
                        None => break,
                    }
                }
                incoming = conn.receive() => {
                    match incoming {
                        Ok(message) => {
                            if inbound_tx.send(message).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            debug!(?node_id, %err, "p2p: receive failed, closing connection");
                            break;
                        }
                    }
                }
            }
        }
        self.connections.lock().await.remove(&node_id);
    }

    /// Sends `Disconnect(reason)` to `node_id` if still connected, then tears the connection
    /// down. A no-op if the peer already disconnected.
    pub async fn close(&self, node_id: NodeId, reason: crate::rlpx::p2p_messages::DisconnectReason) {
        let sender = {
            let mut connections = self.connections.lock().await;
            connections.remove(&node_id).map(|r| r.outbound)
        };
        if let Some(sender) = sender {
            let _ = sender
                .send(Message::Disconnect(crate::rlpx::p2p_messages::DisconnectMessage::new(Some(reason))))
                .await;
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.signer.node_id()
    }

    pub fn signing_key(&self) -> &SigningKey {
        self.signer.signing_key()
    }
}
