use std::collections::HashMap;
use std::time::Instant;

use ethlink_common::node::NodeId;
use ethlink_common::{Address, H256};

use crate::error::PoolError;

/// Map from tx hash to `(sender, insertedAt, errorIfRejected)`. A superset of the pool
/// itself: used to suppress re-validating a hash the pool has already seen once, whether it
/// was accepted or rejected. Pruned on a slower schedule (`HANDLED_CLEANUP_TIME_LIMIT`) than
/// the pending/queued pools (`POOLED_STORAGE_TIME_LIMIT`).
#[derive(Default)]
pub struct HandledSet {
    entries: HashMap<H256, HandledEntry>,
}

pub struct HandledEntry {
    pub sender: Address,
    pub inserted_at: Instant,
    pub error: Option<PoolError>,
}

impl HandledSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, hash: &H256) -> bool {
        self.entries.contains_key(hash)
    }

    /// The rejection reason recorded for `hash`, if any. `None` both when the hash isn't
    /// handled at all and when it was handled but accepted.
    pub fn error(&self, hash: &H256) -> Option<PoolError> {
        self.entries.get(hash).and_then(|entry| entry.error.clone())
    }

    pub fn record(&mut self, hash: H256, sender: Address, error: Option<PoolError>) {
        self.entries.insert(
            hash,
            HandledEntry {
                sender,
                inserted_at: Instant::now(),
                error,
            },
        );
    }

    pub fn prune_older_than(&mut self, max_age: std::time::Duration) {
        let now = Instant::now();
        self.entries
            .retain(|_, entry| now.duration_since(entry.inserted_at) < max_age);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-peer map of tx-hash → timestamp, so the node never re-announces a tx to the peer
/// that told it about the tx (or to whom it already sent it).
#[derive(Default)]
pub struct KnownByPeer {
    by_peer: HashMap<NodeId, HashMap<H256, Instant>>,
}

impl KnownByPeer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn knows(&self, peer: &NodeId, hash: &H256) -> bool {
        self.by_peer
            .get(peer)
            .map(|hashes| hashes.contains_key(hash))
            .unwrap_or(false)
    }

    /// Records that `peer` now knows about `hash`, whether because it announced it to us or
    /// because we just sent it. Returns `true` if this is new information.
    pub fn mark_known(&mut self, peer: NodeId, hash: H256) -> bool {
        let hashes = self.by_peer.entry(peer).or_default();
        hashes.insert(hash, Instant::now()).is_none()
    }

    pub fn remove_peer(&mut self, peer: &NodeId) {
        self.by_peer.remove(peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_by_peer_suppresses_a_hash_already_marked() {
        let mut known = KnownByPeer::new();
        let peer = NodeId::zero();
        let hash = H256::repeat_byte(0x11);
        assert!(!known.knows(&peer, &hash));
        assert!(known.mark_known(peer, hash));
        assert!(known.knows(&peer, &hash));
        assert!(!known.mark_known(peer, hash));
    }

    #[test]
    fn handled_set_prunes_entries_older_than_the_given_age() {
        let mut handled = HandledSet::new();
        let hash = H256::repeat_byte(0x22);
        handled.record(hash, Address::zero(), None);
        assert!(handled.contains(&hash));
        handled.prune_older_than(std::time::Duration::from_secs(0));
        assert!(!handled.contains(&hash));
    }
}
