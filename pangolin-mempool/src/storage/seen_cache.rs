//! [`SeenCache`] tracks recently observed transaction ids with efficient
//! insertion, lookup, and oldest-first eviction.

use std::collections::{HashSet, VecDeque};

use pangolin_chain::transaction;

/// A bounded set of transaction ids the node has recently observed.
///
/// The cache suppresses repeated validation work: a transaction whose id is
/// in the cache is not sent to the application again, which also dampens
/// gossip loops between peers. Entries are evicted oldest-first when the
/// cache reaches capacity.
///
/// The cache is independent of the mempool itself: an id may be cached for a
/// transaction that was committed or rejected long ago, while every
/// transaction currently in the mempool is always cached.
pub struct SeenCache {
    // The ids currently in the cache.
    unique_entries: HashSet<transaction::Hash>,
    // The same ids in the order they were inserted. May also contain ids
    // that were removed from `unique_entries` and not compacted yet.
    ordered_entries: VecDeque<transaction::Hash>,
    // The maximum size of `unique_entries`.
    max_size: usize,
}

impl SeenCache {
    /// Create a new [`SeenCache`] holding at most `max_size` ids.
    pub fn new(max_size: usize) -> Self {
        debug_assert!(max_size > 0, "the seen cache cannot have zero capacity");

        Self {
            unique_entries: HashSet::with_capacity(max_size),
            ordered_entries: VecDeque::with_capacity(max_size),
            max_size,
        }
    }

    /// Checks if the given transaction id is in the cache.
    pub fn contains(&self, txid: &transaction::Hash) -> bool {
        self.unique_entries.contains(txid)
    }

    /// Inserts a transaction id, evicting the oldest entry if the cache is
    /// full.
    ///
    /// Returns `false` without changing anything if the id was already
    /// cached: entries must not get refreshed by repeated sightings, because
    /// that would let peers keep a transaction id cached forever.
    pub fn insert(&mut self, txid: transaction::Hash) -> bool {
        if !self.unique_entries.insert(txid) {
            return false;
        }

        if self.unique_entries.len() > self.max_size {
            self.evict_oldest();
        }

        // Removals leave stale ids behind in the ordered list; compact it
        // before it can grow past a constant factor of the cache size.
        if self.ordered_entries.len() >= self.max_size.saturating_mul(2) {
            let unique_entries = &self.unique_entries;
            self.ordered_entries.retain(|id| unique_entries.contains(id));
        }

        self.ordered_entries.push_back(txid);

        true
    }

    /// Removes a transaction id from the cache, so the transaction can be
    /// resubmitted and revalidated later.
    ///
    /// Idempotent: returns whether the id was present.
    pub fn remove(&mut self, txid: &transaction::Hash) -> bool {
        // The ordered list keeps the stale id until eviction or compaction
        // reaches it.
        self.unique_entries.remove(txid)
    }

    /// The number of ids in the cache.
    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.unique_entries.len()
    }

    /// Returns `true` if the cache is empty.
    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.unique_entries.is_empty()
    }

    /// Removes every id from the cache.
    pub fn clear(&mut self) {
        self.unique_entries.clear();
        self.ordered_entries.clear();
    }

    /// Evicts the oldest id still in the cache, skipping ids that were
    /// already removed.
    fn evict_oldest(&mut self) {
        while let Some(oldest) = self.ordered_entries.pop_front() {
            if self.unique_entries.remove(&oldest) {
                return;
            }
        }
    }
}
