use std::collections::HashMap;
use std::time::{Duration, Instant};

use ethlink_common::node::{Node, NodeId};
use sha3::{Digest, Keccak256};

/// Default per-bucket capacity, per the Kademlia routing table used by devp2p's discovery.
pub const BUCKET_SIZE: usize = 16;
/// One bucket per possible XOR-distance bit of a 512-bit node id.
pub const NUM_BUCKETS: usize = 256;

pub const PING_TIMEOUT: Duration = Duration::from_secs(10);
pub const BAN_MAX_AGE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
pub struct PeerRecord {
    pub node: Node,
    pub last_seen: Instant,
    /// Set once a PONG has actually been observed for this record; distinguishes a
    /// freshly-heard-of candidate from one the table has verified liveness for.
    pub confirmed: bool,
}

/// Ordered, bounded list of peers sharing an XOR-distance prefix to the local node id.
/// Head is least-recently-seen, tail is most-recently-seen.
#[derive(Debug, Default)]
pub struct KBucket {
    pub entries: Vec<PeerRecord>,
    /// A peer evicted for being unresponsive, kept until a successful PONG replaces it.
    pub replacement: Option<PeerRecord>,
}

impl KBucket {
    fn position(&self, node_id: NodeId) -> Option<usize> {
        self.entries.iter().position(|p| p.node.node_id == node_id)
    }

    fn touch(&mut self, node_id: NodeId) -> bool {
        if let Some(index) = self.position(node_id) {
            let record = self.entries.remove(index);
            self.entries.push(PeerRecord {
                last_seen: Instant::now(),
                confirmed: true,
                ..record
            });
            true
        } else {
            false
        }
    }
}

/// XOR distance between two node ids, expressed as the index of the highest set bit
/// (i.e. which of the 256 buckets a peer with that distance belongs in). Node ids are
/// hashed with keccak256 first, reducing the 512-bit public key to the 256-bit space the
/// table's bucket count assumes.
pub fn bucket_index(local_id: NodeId, other_id: NodeId) -> usize {
    let hash_a = Keccak256::digest(local_id.as_bytes());
    let hash_b = Keccak256::digest(other_id.as_bytes());
    let mut highest_bit = 0usize;
    for (i, (a, b)) in hash_a.iter().zip(hash_b.iter()).enumerate() {
        let xor = a ^ b;
        if xor != 0 {
            highest_bit = (31 - i) * 8 + (7 - xor.leading_zeros() as usize);
            break;
        }
    }
    highest_bit.min(NUM_BUCKETS - 1)
}

pub enum Insertion {
    /// Already present; moved to the tail.
    Refreshed,
    /// Newly inserted, room was available.
    Inserted,
    /// Bucket full; the head should be pinged to decide whether to evict it.
    BucketFull { head: PeerRecord },
}

pub struct KademliaTable {
    local_id: NodeId,
    buckets: Vec<KBucket>,
    banned: HashMap<NodeId, Instant>,
}

impl KademliaTable {
    pub fn new(local_id: NodeId) -> Self {
        Self {
            local_id,
            buckets: (0..NUM_BUCKETS).map(|_| KBucket::default()).collect(),
            banned: HashMap::new(),
        }
    }

    pub fn is_banned(&self, node_id: NodeId) -> bool {
        self.banned
            .get(&node_id)
            .is_some_and(|since| since.elapsed() < BAN_MAX_AGE)
    }

    pub fn ban(&mut self, node_id: NodeId) {
        self.remove(node_id);
        self.banned.insert(node_id, Instant::now());
    }

    fn bucket_for(&mut self, node_id: NodeId) -> &mut KBucket {
        let index = bucket_index(self.local_id, node_id);
        &mut self.buckets[index]
    }

    /// Records a sighting of `node` after some verified message (PONG, FINDNODE, NEIGHBOURS).
    pub fn insert_or_touch(&mut self, node: Node) -> Insertion {
        if node.node_id == self.local_id || self.is_banned(node.node_id) {
            return Insertion::Refreshed;
        }
        let bucket = self.bucket_for(node.node_id);
        if bucket.touch(node.node_id) {
            return Insertion::Refreshed;
        }
        if bucket.entries.len() < BUCKET_SIZE {
            bucket.entries.push(PeerRecord {
                node,
                last_seen: Instant::now(),
                confirmed: false,
            });
            return Insertion::Inserted;
        }
        Insertion::BucketFull {
            head: bucket.entries[0],
        }
    }

    /// Called once a PONG confirms liveness for a previously-unconfirmed sighting.
    pub fn confirm(&mut self, node_id: NodeId) {
        let bucket = self.bucket_for(node_id);
        if let Some(index) = bucket.position(node_id) {
            bucket.entries[index].confirmed = true;
        }
    }

    /// Drops the bucket head after it failed to answer a liveness PING, promoting the
    /// pending replacement (if any) in its place.
    pub fn evict_head_and_promote(&mut self, node_id: NodeId, replacement: Option<Node>) {
        let bucket = self.bucket_for(node_id);
        if bucket.entries.first().map(|p| p.node.node_id) == Some(node_id) {
            bucket.entries.remove(0);
        }
        if let Some(node) = replacement {
            if bucket.entries.len() < BUCKET_SIZE {
                bucket.entries.push(PeerRecord {
                    node,
                    last_seen: Instant::now(),
                    confirmed: false,
                });
            }
        }
    }

    pub fn remove(&mut self, node_id: NodeId) {
        let bucket = self.bucket_for(node_id);
        if let Some(index) = bucket.position(node_id) {
            bucket.entries.remove(index);
        }
    }

    /// Up to `count` peers (default the bucket size) closest to `target`, across all buckets.
    pub fn closest_to(&self, target: NodeId, count: usize) -> Vec<Node> {
        let mut all: Vec<(usize, Node)> = self
            .buckets
            .iter()
            .flat_map(|b| b.entries.iter())
            .map(|p| (bucket_index(target, p.node.node_id), p.node))
            .collect();
        all.sort_by_key(|(distance, _)| *distance);
        all.into_iter().take(count).map(|(_, node)| node).collect()
    }

    pub fn confirmed_peers(&self) -> impl Iterator<Item = Node> + '_ {
        self.buckets
            .iter()
            .flat_map(|b| b.entries.iter())
            .filter(|p| p.confirmed)
            .map(|p| p.node)
    }

    /// Picks a non-empty bucket to refresh, round-robin by bucket index. Returns `None` if
    /// the table is entirely empty.
    pub fn pick_bucket_to_refresh(&self, round_robin_cursor: usize, only_confirmed: bool) -> Option<usize> {
        (0..NUM_BUCKETS).find_map(|offset| {
            let index = (round_robin_cursor + offset) % NUM_BUCKETS;
            let bucket = &self.buckets[index];
            let has_candidate = if only_confirmed {
                bucket.entries.iter().any(|p| p.confirmed)
            } else {
                !bucket.entries.is_empty()
            };
            has_candidate.then_some(index)
        })
    }

    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn node(id_byte: u8) -> Node {
        Node {
            ip: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            udp_port: 30303,
            tcp_port: 30303,
            node_id: NodeId::repeat_byte(id_byte),
        }
    }

    #[test]
    fn insert_then_touch_moves_to_tail() {
        let mut table = KademliaTable::new(NodeId::zero());
        let a = node(1);
        let b = node(2);
        assert!(matches!(table.insert_or_touch(a), Insertion::Inserted));
        assert!(matches!(table.insert_or_touch(b), Insertion::Inserted));
        assert!(matches!(table.insert_or_touch(a), Insertion::Refreshed));

        let bucket_index = bucket_index(table.local_id(), a.node_id);
        assert_eq!(table.buckets[bucket_index].entries.last().unwrap().node.node_id, a.node_id);
    }

    #[test]
    fn full_bucket_reports_head_for_liveness_check() {
        let local = NodeId::zero();
        let mut table = KademliaTable::new(local);
        for i in 0..BUCKET_SIZE {
            let n = node((i + 1) as u8);
            assert!(matches!(table.insert_or_touch(n), Insertion::Inserted));
        }
        let overflow = node(200);
        match table.insert_or_touch(overflow) {
            Insertion::BucketFull { head } => assert_eq!(head.node.node_id, node(1).node_id),
            _ => panic!("expected BucketFull"),
        }
    }

    #[test]
    fn banned_node_is_rejected() {
        let mut table = KademliaTable::new(NodeId::zero());
        let a = node(1);
        table.insert_or_touch(a);
        table.ban(a.node_id);
        assert!(matches!(table.insert_or_touch(a), Insertion::Refreshed));
        assert_eq!(table.len(), 0);
    }
}
