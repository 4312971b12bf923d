//! Full header-and-body sync against whichever idle peer claims the most total difficulty.
//! No snap sync, no pivot block: every block between the local head and a peer's claimed
//! head is fetched and validated in order.

use std::sync::Arc;
use std::time::Duration;

use ethlink_chain::chain::ChainState;
use ethlink_chain::error::ChainError;
use ethlink_common::block::Block;
use ethlink_common::chain_status::ChainStatus;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::events::{Event, EventBus};
use crate::network::{NetworkCore, Peer, DEFAULT_PROTOCOL_TIMEOUT};
use crate::rlpx::eth::{HashOrNumber, NewBlock};
use crate::rlpx::p2p_messages::DisconnectReason;

/// Largest header batch requested per round trip. The eth wire protocol caps responses at
/// 100 headers regardless of what's asked for; asking for exactly that avoids a partial
/// batch being mistaken for "peer is caught up to us".
const HEADERS_PER_REQUEST: u64 = 100;
/// How far back `handle_new_block` will walk to find a known ancestor before giving up.
const MAX_ANCESTOR_LOOKBACK: u64 = 256;

#[derive(Debug, Error)]
enum SyncError {
    #[error("peer timed out responding to a sync request")]
    Timeout,
    #[error("peer returned {got} bodies for {expected} headers")]
    BodyCountMismatch { expected: usize, got: usize },
    #[error(transparent)]
    Chain(#[from] ChainError),
}

pub struct SyncConfig {
    pub tick_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
        }
    }
}

/// Drives full sync against a `NetworkCore`'s peer pool and a `ChainState`/`ChainStatus`
/// implementation. Runs its own periodic tick; `handle_new_block` is driven externally by
/// whatever reads `NetworkCore`'s inbound message channel.
pub struct Synchronizer<C: ChainState + ChainStatus + 'static> {
    network: Arc<NetworkCore<C>>,
    chain: Arc<C>,
    events: EventBus,
    config: SyncConfig,
}

impl<C: ChainState + ChainStatus + 'static> Synchronizer<C> {
    pub fn new(network: Arc<NetworkCore<C>>, chain: Arc<C>, events: EventBus, config: SyncConfig) -> Arc<Self> {
        Arc::new(Self {
            network,
            chain,
            events,
            config,
        })
    }

    pub fn spawn(self: Arc<Self>) {
        tokio::spawn(async move {
            loop {
                self.tick().await;
                tokio::time::sleep(self.config.tick_interval).await;
            }
        });
    }

    async fn tick(&self) {
        let local_td = ChainStatus::total_difficulty(self.chain.as_ref());
        let Some(peer) = self.network.idle_peer(|peer| peer.claimed().1 > local_td).await else {
            return;
        };
        peer.set_idle(false);
        let outcome = self.sync_once(&peer).await;
        peer.set_idle(true);

        match outcome {
            Ok(0) => {}
            Ok(imported) => {
                self.events.publish(Event::SyncFetchedBlocks(imported));
                let head = self.chain.latest_header();
                info!(number = head.number, "sync: imported blocks");
                self.events.publish(Event::ChainUpdated { head: head.hash(), number: head.number });
            }
            Err(err) => {
                warn!(node_id = ?peer.node_id, %err, "sync: banning peer after failed round");
                self.events.publish(Event::SyncError(err.to_string()));
                self.network.ban_peer(peer.node_id, DisconnectReason::SubprotocolError).await;
            }
        }
    }

    async fn sync_once(&self, peer: &Arc<Peer>) -> Result<usize, SyncError> {
        let local = self.chain.latest_header();
        let headers = peer
            .request_block_headers(HashOrNumber::Number(local.number + 1), HEADERS_PER_REQUEST, 0, false, DEFAULT_PROTOCOL_TIMEOUT)
            .await
            .ok_or(SyncError::Timeout)?;
        if headers.is_empty() {
            return Ok(0);
        }

        let hashes = headers.iter().map(|header| header.hash()).collect::<Vec<_>>();
        let bodies = peer
            .request_block_bodies(hashes, DEFAULT_PROTOCOL_TIMEOUT)
            .await
            .ok_or(SyncError::Timeout)?;
        if bodies.len() != headers.len() {
            return Err(SyncError::BodyCountMismatch {
                expected: headers.len(),
                got: bodies.len(),
            });
        }

        let count = headers.len();
        let blocks = headers.into_iter().zip(bodies).map(|(header, body)| Block { header, body }).collect();
        self.chain.put_blocks(blocks)?;
        Ok(count)
    }

    /// A peer gossiped a new block directly. Imports it if its parent is already canonical;
    /// otherwise walks backward requesting headers until a known ancestor turns up, then
    /// imports the whole run. Bans the peer on any validation failure along the way.
    pub async fn handle_new_block(&self, peer: &Arc<Peer>, announced: NewBlock) {
        let new_hash = announced.header.hash();
        peer.update_claim(new_hash, announced.total_difficulty);

        if self.chain.header_by_hash(announced.header.parent_hash).is_some() {
            if let Err(err) = self.chain.put_blocks(vec![Block {
                header: announced.header,
                body: announced.body,
            }]) {
                warn!(node_id = ?peer.node_id, %err, "sync: rejecting gossiped block");
                self.network.ban_peer(peer.node_id, DisconnectReason::SubprotocolError).await;
                return;
            }
            let head = self.chain.latest_header();
            self.events.publish(Event::ChainUpdated { head: head.hash(), number: head.number });
            return;
        }

        match self.import_missing_ancestors(peer, announced).await {
            Ok(()) => {
                let head = self.chain.latest_header();
                self.events.publish(Event::ChainUpdated { head: head.hash(), number: head.number });
            }
            Err(err) => {
                warn!(node_id = ?peer.node_id, %err, "sync: failed to backfill gossiped block's ancestors");
                self.network.ban_peer(peer.node_id, DisconnectReason::SubprotocolError).await;
            }
        }
    }

    async fn import_missing_ancestors(&self, peer: &Arc<Peer>, announced: NewBlock) -> Result<(), SyncError> {
        let target_number = announced.header.number;
        let local_number = self.chain.latest_header().number;
        if target_number <= local_number || target_number - local_number > MAX_ANCESTOR_LOOKBACK {
            debug!(target_number, local_number, "sync: gossiped block too far from local head, skipping backfill");
            return Ok(());
        }

        let missing = target_number - local_number - 1;
        let headers = peer
            .request_block_headers(HashOrNumber::Number(local_number + 1), missing, 0, false, DEFAULT_PROTOCOL_TIMEOUT)
            .await
            .ok_or(SyncError::Timeout)?;

        let hashes = headers.iter().map(|header| header.hash()).collect::<Vec<_>>();
        let bodies = peer.request_block_bodies(hashes, DEFAULT_PROTOCOL_TIMEOUT).await.ok_or(SyncError::Timeout)?;
        if bodies.len() != headers.len() {
            return Err(SyncError::BodyCountMismatch {
                expected: headers.len(),
                got: bodies.len(),
            });
        }

        let mut blocks: Vec<Block> = headers.into_iter().zip(bodies).map(|(header, body)| Block { header, body }).collect();
        blocks.push(Block {
            header: announced.header,
            body: announced.body,
        });
        self.chain.put_blocks(blocks)?;
        Ok(())
    }
}
