//! The Pangolin mempool.
//!
//! The mempool is the set of transactions this node has seen, validated
//! against the application, and not yet observed in a committed block. It
//! sits between four collaborators:
//!
//! * the RPC surface and the peer network, which submit candidate
//!   transactions through [`Mempool::check_tx`],
//! * the application, which validates candidates asynchronously over a
//!   [`tower::Service`] connection (see [`checks`]),
//! * the consensus engine, which reaps transactions for block proposals and
//!   reconciles the pool after every commit (see [`Mempool::lock`]), and
//! * the gossip engine, which forwards pool contents to peers in admission
//!   order (see [`gossip`]).
//!
//! Transactions are kept in a strict first-in-first-out order: the order in
//! which the application accepts them is the order in which they are reaped
//! and gossiped. There is no fee priority and no fairness across senders.

#[macro_use]
extern crate tracing;

pub mod checks;
pub mod config;
pub mod gossip;

mod error;
mod mempool;
mod storage;


pub use config::Config;
pub use error::MempoolError;
pub use mempool::{init, Mempool, MempoolGuard, NopMempool, PostCheckFn, PreCheckFn};

/// A boxed [`std::error::Error`], for service interfaces.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Identifies a peer connected to this node.
///
/// Assigned by the peer transport when the connection is established. The
/// local node itself never appears as a peer id.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[cfg_attr(
    any(test, feature = "proptest-impl"),
    derive(proptest_derive::Arbitrary)
)]
pub struct PeerId(pub u64);

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "peer {}", self.0)
    }
}
