//! Errors that can occur when manipulating transactions in the mempool.

use thiserror::Error;

/// Mempool transaction errors.
///
/// `Full`, `TooLarge`, `InCache` and `PreCheckFailed` are surfaced directly
/// to the RPC caller. Peer-sourced duplicates are logged and absorbed by the
/// inbound handler instead of being propagated.
#[derive(Error, Clone, Debug, Eq, PartialEq)]
pub enum MempoolError {
    /// The mempool has reached its transaction count or total byte limit.
    #[error("mempool is full: {tx_count} transactions, {tx_bytes} bytes")]
    Full {
        /// The number of transactions currently in the mempool.
        tx_count: usize,
        /// The total payload size of the transactions currently in the
        /// mempool.
        tx_bytes: u64,
    },

    /// A single transaction exceeded the per-transaction size limit.
    #[error("transaction size {size} exceeds the per-transaction limit of {limit} bytes")]
    TooLarge {
        /// The size of the rejected transaction.
        size: usize,
        /// The configured per-transaction limit.
        limit: usize,
    },

    /// The transaction was recently seen, and revalidation was suppressed.
    #[error("transaction is already in the mempool cache")]
    InCache,

    /// The transaction is already in the mempool.
    #[error("transaction is already in the mempool")]
    InMempool,

    /// The transaction was not found in the mempool.
    #[error("transaction was not found in the mempool")]
    NotInMempool,

    /// The caller-supplied pre-check predicate rejected the transaction.
    #[error("transaction rejected by the pre-check predicate: {0}")]
    PreCheckFailed(String),

    /// The application rejected the transaction during validation.
    ///
    /// Not returned to RPC callers: by the time the application replies, the
    /// synchronous part of `check_tx` has already succeeded. Exposed through
    /// logs and metrics.
    #[error("transaction rejected by the application: code {code}, codespace {codespace:?}")]
    AppRejected {
        /// The application's non-zero response code.
        code: u32,
        /// The application's error namespace.
        codespace: String,
    },

    /// The request was canceled before it completed.
    #[error("request was canceled before completion")]
    Canceled,

    /// The application connection failed or the mempool has shut down.
    #[error("application connection is unavailable")]
    AppUnavailable,
}
