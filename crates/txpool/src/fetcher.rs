use std::collections::HashMap;
use std::time::{Duration, Instant};

use ethlink_common::node::NodeId;
use ethlink_common::H256;

/// How often the scheduler should call [`TxFetcher::drain_batches`].
pub const FETCH_INTERVAL: Duration = Duration::from_millis(100);
/// Announcements older than this are dropped without ever being fetched.
pub const ANNOUNCEMENT_TIME_LIMIT: Duration = Duration::from_secs(60);
/// Largest hash list a single `GetPooledTransactions` batch carries.
pub const MAX_BATCH_SIZE: usize = 256;

struct Announcement {
    announcer: NodeId,
    announced_at: Instant,
    fetching: bool,
}

/// Turns `NewPooledTransactionHashes` announcements into batched `GetPooledTransactions`
/// requests, one batch per announcer per tick. Holds no network handle of its own: the
/// caller drives `drain_batches` on a timer and sends whatever it returns.
#[derive(Default)]
pub struct TxFetcher {
    announcements: std::sync::Mutex<HashMap<H256, Announcement>>,
}

impl TxFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `announcer` claims to have `hash`, unless it's already handled (the
    /// caller checks its own pool/handled-set and passes the verdict in) or already
    /// scheduled for fetching.
    pub fn note_announcement(&self, hash: H256, announcer: NodeId, already_handled: bool) {
        if already_handled {
            return;
        }
        let mut announcements = self.announcements.lock().unwrap();
        announcements.entry(hash).or_insert_with(|| Announcement {
            announcer,
            announced_at: Instant::now(),
            fetching: false,
        });
    }

    /// Groups every not-yet-fetching announcement by its announcer into batches of at most
    /// [`MAX_BATCH_SIZE`] hashes, marks them fetching, and returns `(announcer, hashes)`
    /// pairs for the caller to turn into `GetPooledTransactions` requests.
    pub fn drain_batches(&self) -> Vec<(NodeId, Vec<H256>)> {
        let mut announcements = self.announcements.lock().unwrap();
        let mut by_announcer: HashMap<NodeId, Vec<H256>> = HashMap::new();
        for (hash, announcement) in announcements.iter_mut() {
            if announcement.fetching {
                continue;
            }
            let batch = by_announcer.entry(announcement.announcer).or_default();
            if batch.len() >= MAX_BATCH_SIZE {
                continue;
            }
            batch.push(*hash);
            announcement.fetching = true;
        }
        by_announcer.into_iter().collect()
    }

    /// Clears `hashes` regardless of whether the reply actually contained them: a peer that
    /// doesn't have a tx it announced still gets the announcement forgotten rather than
    /// retried forever against the same announcer.
    pub fn clear(&self, hashes: &[H256]) {
        let mut announcements = self.announcements.lock().unwrap();
        for hash in hashes {
            announcements.remove(hash);
        }
    }

    /// Drops announcements older than [`ANNOUNCEMENT_TIME_LIMIT`] that were never fetched
    /// (a stuck fetch is cleared by `clear` once its reply, or its request's timeout, lands).
    pub fn expire(&self) {
        let now = Instant::now();
        self.announcements.lock().unwrap().retain(|_, announcement| {
            announcement.fetching || now.duration_since(announcement.announced_at) < ANNOUNCEMENT_TIME_LIMIT
        });
    }

    pub fn len(&self) -> usize {
        self.announcements.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn an_announced_hash_is_batched_once_per_announcer() {
        let fetcher = TxFetcher::new();
        let peer = NodeId::repeat_byte(0x01);
        let hash = H256::repeat_byte(0x02);
        fetcher.note_announcement(hash, peer, false);

        let batches = fetcher.drain_batches();
        assert_eq!(batches, vec![(peer, vec![hash])]);
        // Already marked fetching, so a second drain yields nothing until cleared.
        assert!(fetcher.drain_batches().is_empty());
    }

    #[test]
    fn an_already_handled_hash_is_never_scheduled() {
        let fetcher = TxFetcher::new();
        let peer = NodeId::repeat_byte(0x01);
        let hash = H256::repeat_byte(0x03);

        fetcher.note_announcement(hash, peer, true);
        assert!(fetcher.is_empty());
    }

    #[test]
    fn clearing_a_hash_allows_it_to_be_rescheduled() {
        let fetcher = TxFetcher::new();
        let peer = NodeId::repeat_byte(0x01);
        let hash = H256::repeat_byte(0x04);
        fetcher.note_announcement(hash, peer, false);
        fetcher.drain_batches();
        fetcher.clear(&[hash]);

        fetcher.note_announcement(hash, peer, false);
        assert_eq!(fetcher.drain_batches(), vec![(peer, vec![hash])]);
    }
}
