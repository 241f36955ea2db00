//! User-configurable mempool parameters.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Mempool configuration section.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// The maximum number of transactions in the mempool.
    pub size: usize,

    /// The maximum size of a single transaction, in bytes.
    ///
    /// Larger transactions are rejected with `TooLarge` before any other
    /// processing.
    pub max_tx_bytes: usize,

    /// The maximum total payload size of all transactions in the mempool,
    /// in bytes.
    pub max_txs_bytes: u64,

    /// The capacity of the seen-transaction cache.
    ///
    /// The cache suppresses repeated validation of transactions the node has
    /// recently processed, whether they were accepted or not. When it fills
    /// up, the oldest entries are evicted first.
    pub cache_size: usize,

    /// Whether transactions that turn out to be invalid stay in the seen
    /// cache.
    ///
    /// Keep this disabled if an invalid transaction can become valid again
    /// under later application state; enable it to shed repeated validation
    /// of transactions that can never become valid.
    pub keep_invalid_txs_in_cache: bool,

    /// Whether to gossip mempool transactions to peers.
    pub broadcast: bool,

    /// Whether to revalidate the remaining pool contents against the
    /// application after every block commit.
    pub recheck: bool,

    /// Evict transactions that have stayed in the mempool for more than this
    /// many blocks. `0` disables block-age eviction.
    pub ttl_num_blocks: u64,

    /// Evict transactions that have stayed in the mempool for longer than
    /// this duration. Zero disables wall-clock eviction.
    #[serde(with = "humantime_serde")]
    pub ttl_duration: Duration,

    /// The mempool implementation to run.
    pub version: Version,
}

/// Selects the mempool implementation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum Version {
    /// The FIFO mempool.
    #[serde(rename = "v0")]
    V0,

    /// Accepted for configuration compatibility; currently selects the same
    /// FIFO mempool as `v0`.
    #[serde(rename = "v1")]
    V1,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            size: 5_000,
            max_tx_bytes: 1_048_576,
            max_txs_bytes: 1_073_741_824,
            cache_size: 10_000,
            keep_invalid_txs_in_cache: false,
            broadcast: true,
            recheck: true,
            ttl_num_blocks: 0,
            ttl_duration: Duration::ZERO,
            version: Version::V0,
        }
    }
}
