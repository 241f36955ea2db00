//! Transactions: opaque payloads and their content-addressed identifiers.
//!
//! The node never interprets transaction payloads. Equality, deduplication
//! and indexing all go through [`Hash`], the SHA-256 digest of the payload
//! bytes.

use std::fmt;

use serde::{Deserialize, Serialize};

mod hash;
mod unmined;

pub use hash::Hash;
pub use unmined::UnminedTx;

/// An opaque transaction payload.
///
/// The application defines the encoding; the node treats the payload as a
/// byte string and identifies it by its content hash.
#[derive(Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
#[cfg_attr(
    any(test, feature = "proptest-impl"),
    derive(proptest_derive::Arbitrary)
)]
pub struct Transaction(Vec<u8>);

impl Transaction {
    /// Returns the raw payload bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the serialized size of this transaction, in bytes.
    pub fn size(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Computes the content hash identifying this transaction.
    pub fn hash(&self) -> Hash {
        Hash::from(self)
    }
}

impl From<Vec<u8>> for Transaction {
    fn from(bytes: Vec<u8>) -> Self {
        Transaction(bytes)
    }
}

impl From<&[u8]> for Transaction {
    fn from(bytes: &[u8]) -> Self {
        Transaction(bytes.to_vec())
    }
}

impl AsRef<[u8]> for Transaction {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("hash", &self.hash())
            .field("size", &self.size())
            .finish()
    }
}
