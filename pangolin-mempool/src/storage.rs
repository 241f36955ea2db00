//! Mempool transaction storage: the verified set plus its capacity limits
//! and age-based eviction.

use std::time::{Duration, Instant};

use pangolin_chain::{block::Height, transaction};

use crate::{Config, MempoolError};

mod seen_cache;
mod verified_set;

pub use seen_cache::SeenCache;
pub use verified_set::{VerifiedSet, VerifiedUnminedTx};


/// The verified transactions in the mempool, bounded by the configured
/// count and byte limits.
///
/// Only the mempool core inserts transactions here, and only after the
/// application has validated them.
pub struct Storage {
    /// The set of verified transactions, in admission order.
    verified: VerifiedSet,

    /// The maximum number of transactions, from [`Config::size`].
    tx_count_limit: usize,

    /// The maximum total payload size, from [`Config::max_txs_bytes`].
    tx_bytes_limit: u64,

    /// Evict transactions older than this many blocks; zero disables.
    ttl_num_blocks: u64,

    /// Evict transactions older than this duration; zero disables.
    ttl_duration: Duration,
}

impl Storage {
    /// Creates empty storage with the limits from `config`.
    pub fn new(config: &Config) -> Self {
        Self {
            verified: VerifiedSet::default(),
            tx_count_limit: config.size,
            tx_bytes_limit: config.max_txs_bytes,
            ttl_num_blocks: config.ttl_num_blocks,
            ttl_duration: config.ttl_duration,
        }
    }

    /// Checks whether admitting a transaction of `tx_bytes` payload bytes
    /// would exceed the configured limits.
    ///
    /// Returns the `Full` error to surface if it would.
    pub fn check_capacity(&self, tx_bytes: usize) -> Result<(), MempoolError> {
        let tx_count = self.verified.transaction_count();
        let total_bytes = self.verified.total_serialized_size();

        if tx_count >= self.tx_count_limit || total_bytes + tx_bytes as u64 > self.tx_bytes_limit {
            return Err(MempoolError::Full {
                tx_count,
                tx_bytes: total_bytes,
            });
        }

        Ok(())
    }

    /// Inserts a verified transaction.
    ///
    /// The caller must have checked capacity first; storage never evicts to
    /// make room.
    pub fn insert(&mut self, transaction: VerifiedUnminedTx) -> Result<u64, MempoolError> {
        let sequence = self.verified.insert(transaction)?;

        metrics::gauge!("mempool.size.transactions").set(self.transaction_count() as f64);
        metrics::gauge!("mempool.size.bytes").set(self.total_serialized_size() as f64);

        Ok(sequence)
    }

    /// Removes the transaction with the given id, if it is present.
    pub fn remove_exact(&mut self, txid: &transaction::Hash) -> Option<VerifiedUnminedTx> {
        let removed = self.verified.remove(txid);

        if removed.is_some() {
            metrics::gauge!("mempool.size.transactions").set(self.transaction_count() as f64);
            metrics::gauge!("mempool.size.bytes").set(self.total_serialized_size() as f64);
        }

        removed
    }

    /// Removes all transactions that match `predicate`, returning them.
    pub fn remove_all_that(
        &mut self,
        predicate: impl Fn(&VerifiedUnminedTx) -> bool,
    ) -> Vec<VerifiedUnminedTx> {
        let removed = self.verified.remove_all_that(predicate);

        if !removed.is_empty() {
            metrics::gauge!("mempool.size.transactions").set(self.transaction_count() as f64);
            metrics::gauge!("mempool.size.bytes").set(self.total_serialized_size() as f64);
        }

        removed
    }

    /// Removes transactions that have outlived the configured block or
    /// wall-clock age limits, returning them.
    ///
    /// Called during the post-commit sweep with the new tip height.
    pub fn remove_expired_transactions(
        &mut self,
        tip_height: Height,
        now: Instant,
    ) -> Vec<VerifiedUnminedTx> {
        let ttl_num_blocks = self.ttl_num_blocks;
        let ttl_duration = self.ttl_duration;

        if ttl_num_blocks == 0 && ttl_duration.is_zero() {
            return Vec::new();
        }

        let expired = self.remove_all_that(|tx| {
            let expired_by_height =
                ttl_num_blocks > 0 && tip_height.blocks_since(tx.height) > ttl_num_blocks;
            let expired_by_time = !ttl_duration.is_zero()
                && now.saturating_duration_since(tx.inserted_at) > ttl_duration;

            expired_by_height || expired_by_time
        });

        if !expired.is_empty() {
            tracing::debug!(
                expired = expired.len(),
                ?tip_height,
                "evicted expired transactions from the mempool"
            );
            metrics::counter!("mempool.expired.transactions.total")
                .increment(expired.len() as u64);
        }

        expired
    }

    /// Returns `true` if the storage contains the transaction with the given
    /// id.
    pub fn contains(&self, txid: &transaction::Hash) -> bool {
        self.verified.contains(txid)
    }

    /// Returns the verified transaction with the given id, if present.
    #[allow(dead_code)]
    pub fn get(&self, txid: &transaction::Hash) -> Option<&VerifiedUnminedTx> {
        self.verified.get(txid)
    }

    /// Returns the verified set itself.
    pub fn verified(&self) -> &VerifiedSet {
        &self.verified
    }

    /// Returns the verified set itself, mutably.
    pub fn verified_mut(&mut self) -> &mut VerifiedSet {
        &mut self.verified
    }

    /// Returns the number of transactions in storage.
    pub fn transaction_count(&self) -> usize {
        self.verified.transaction_count()
    }

    /// Returns the total payload size of the transactions in storage, in
    /// bytes.
    pub fn total_serialized_size(&self) -> u64 {
        self.verified.total_serialized_size()
    }

    /// Removes every transaction from storage.
    pub fn clear(&mut self) {
        self.verified.clear();

        metrics::gauge!("mempool.size.transactions").set(0.0);
        metrics::gauge!("mempool.size.bytes").set(0.0);
    }
}
