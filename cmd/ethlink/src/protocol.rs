//! Drains `NetworkCore`'s inbound message channel and routes each message to whichever
//! subsystem owns it: `Chain` serves header/body/receipt requests, `TxPool`/`TxFetcher`
//! own transaction gossip, `Synchronizer` owns gossiped blocks.

use std::sync::Arc;
use std::time::Duration;

use ethlink_chain::chain::ChainState;
use ethlink_chain::state::StateView;
use ethlink_common::chain_status::ChainStatus;
use ethlink_p2p::rlpx::eth::{
    BlockBodies, BlockHeaders, GetBlockBodies, GetBlockHeaders, GetPooledTransactions,
    GetReceipts, HashOrNumber, PooledTransactions, Receipts, Transactions,
};
use ethlink_p2p::rlpx::Message;
use ethlink_p2p::{NetworkCore, Synchronizer};
use ethlink_txpool::{TxFetcher, TxPool};
use tracing::debug;

const MAX_HEADERS_SERVED: u64 = 128;

/// Runs for the process lifetime, consuming `(peer, message)` pairs from `NetworkCore`.
pub async fn run_dispatch_loop<C: ChainState + ChainStatus + 'static>(
    mut inbound: tokio::sync::mpsc::Receiver<(ethlink_common::node::NodeId, Message)>,
    network: Arc<NetworkCore<C>>,
    synchronizer: Arc<Synchronizer<C>>,
    chain: Arc<C>,
    state: Arc<dyn StateView>,
    pool: Arc<TxPool>,
    fetcher: Arc<TxFetcher>,
) {
    while let Some((node_id, message)) = inbound.recv().await {
        let Some(peer) = network.peer(&node_id).await else {
            continue;
        };
        match message {
            Message::GetBlockHeaders(request) => serve_headers(&peer, request, chain.as_ref()).await,
            Message::GetBlockBodies(request) => serve_bodies(&peer, request, chain.as_ref()).await,
            Message::GetReceipts(request) => serve_receipts(&peer, request, chain.as_ref()).await,
            Message::GetPooledTransactions(request) => serve_pooled_transactions(&peer, request, pool.as_ref()).await,
            Message::Transactions(Transactions { transactions }) => {
                let latest = chain.latest_header();
                for tx in transactions {
                    let _ = pool.add(tx, state.as_ref(), &latest, false);
                }
            }
            Message::NewPooledTransactionHashes(announcement) => {
                for hash in announcement.hashes {
                    let already_handled = pool.contains(&hash) || pool.is_handled(&hash);
                    fetcher.note_announcement(hash, node_id, already_handled);
                }
            }
            Message::NewBlock(announced) => synchronizer.handle_new_block(&peer, *announced).await,
            Message::NewBlockHashes(_) => {
                // Peers that only announce hashes are left for the periodic sync tick to
                // catch, rather than driving a second fetch path for the same outcome.
            }
            other => debug!(?node_id, %other, "protocol: unhandled message"),
        }
    }
}

async fn serve_headers<C: ChainState>(peer: &ethlink_p2p::Peer, request: GetBlockHeaders, chain: &C) {
    let GetBlockHeaders { id, start_block, limit, skip, reverse } = request;
    let Some(mut number) = (match start_block {
        HashOrNumber::Number(number) => Some(number),
        HashOrNumber::Hash(hash) => chain.header_by_hash(hash).map(|header| header.number),
    }) else {
        peer.send(Message::BlockHeaders(BlockHeaders { id, headers: Vec::new() })).await;
        return;
    };

    let limit = limit.min(MAX_HEADERS_SERVED);
    let mut headers = Vec::with_capacity(limit as usize);
    for _ in 0..limit {
        let Some(header) = chain.header_by_number(number) else {
            break;
        };
        headers.push(header);
        let step = skip + 1;
        if reverse {
            match number.checked_sub(step) {
                Some(next) => number = next,
                None => break,
            }
        } else {
            number += step;
        }
    }
    peer.send(Message::BlockHeaders(BlockHeaders { id, headers })).await;
}

async fn serve_bodies<C: ChainState>(peer: &ethlink_p2p::Peer, request: GetBlockBodies, chain: &C) {
    let GetBlockBodies { id, block_hashes } = request;
    let bodies = block_hashes
        .into_iter()
        .filter_map(|hash| chain.block_by_hash(hash))
        .map(|block| block.body)
        .collect();
    peer.send(Message::BlockBodies(BlockBodies { id, bodies })).await;
}

async fn serve_receipts<C: ChainState>(peer: &ethlink_p2p::Peer, request: GetReceipts, chain: &C) {
    let GetReceipts { id, block_hashes } = request;
    let receipts = block_hashes
        .into_iter()
        .map(|hash| chain.receipts_by_hash(hash).unwrap_or_default())
        .collect();
    peer.send(Message::Receipts(Receipts { id, receipts })).await;
}

async fn serve_pooled_transactions(peer: &ethlink_p2p::Peer, request: GetPooledTransactions, pool: &TxPool) {
    let GetPooledTransactions { id, transaction_hashes } = request;
    let transactions = transaction_hashes.iter().filter_map(|hash| pool.get(hash)).collect();
    peer.send(Message::PooledTransactions(PooledTransactions { id, transactions })).await;
}

/// Periodic housekeeping for the pool and fetcher: expires stale entries and turns
/// pending announcements into `GetPooledTransactions` batches.
pub async fn run_maintenance_loop<C: ChainState + ChainStatus + 'static>(
    network: Arc<NetworkCore<C>>,
    chain: Arc<C>,
    state: Arc<dyn StateView>,
    pool: Arc<TxPool>,
    fetcher: Arc<TxFetcher>,
) {
    let mut ticker = tokio::time::interval(ethlink_txpool::fetcher::FETCH_INTERVAL);
    loop {
        ticker.tick().await;
        pool.run_maintenance();
        fetcher.expire();
        for (announcer, hashes) in fetcher.drain_batches() {
            let Some(peer) = network.peer(&announcer).await else {
                fetcher.clear(&hashes);
                continue;
            };
            let pending = hashes.clone();
            if let Some(transactions) = peer.request_pooled_transactions(hashes, Duration::from_secs(3)).await {
                let latest = chain.latest_header();
                for tx in transactions {
                    let _ = pool.add(tx, state.as_ref(), &latest, false);
                }
            }
            fetcher.clear(&pending);
        }
    }
}
