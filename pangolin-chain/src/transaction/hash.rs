//! Transaction identifiers.
//!
//! A transaction is identified by the SHA-256 digest of its payload bytes.
//! Every index in the node (mempool, seen cache, gossip cursors) is keyed by
//! this hash, never by the payload itself.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::Transaction;

/// A transaction identifier: the SHA-256 digest of the transaction payload.
///
/// Displayed and parsed as lowercase hex, in digest byte order.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Hash(pub [u8; 32]);

impl From<&Transaction> for Hash {
    fn from(transaction: &Transaction) -> Self {
        let digest = Sha256::digest(transaction.bytes());
        Hash(digest.into())
    }
}

impl From<Transaction> for Hash {
    fn from(transaction: Transaction) -> Self {
        Hash::from(&transaction)
    }
}

impl From<[u8; 32]> for Hash {
    fn from(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }
}

impl From<Hash> for [u8; 32] {
    fn from(hash: Hash) -> Self {
        hash.0
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("transaction::Hash")
            .field(&hex::encode(self.0))
            .finish()
    }
}

impl std::str::FromStr for Hash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0; 32];
        hex::decode_to_slice(s, &mut bytes[..])?;
        Ok(Hash(bytes))
    }
}

#[cfg(any(test, feature = "proptest-impl"))]
impl proptest::arbitrary::Arbitrary for Hash {
    type Parameters = ();
    type Strategy = proptest::strategy::BoxedStrategy<Self>;

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        use proptest::prelude::*;

        any::<[u8; 32]>().prop_map(Hash).boxed()
    }
}
