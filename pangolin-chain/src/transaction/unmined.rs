//! Unmined transactions: transactions that have not been committed to a
//! block yet, with their precomputed identifier and size.
//!
//! The mempool and the gossip protocol pass transactions around constantly,
//! so the hash and the serialized size are computed once at construction and
//! the payload is shared behind an [`Arc`].

use std::sync::Arc;

use super::{Hash, Transaction};

/// An unmined transaction, and its pre-calculated identifier and size.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UnminedTx {
    /// A unique identifier for this unmined transaction.
    pub id: Hash,

    /// The unmined transaction itself.
    pub transaction: Arc<Transaction>,

    /// The size in bytes of the transaction payload.
    pub size: usize,
}

// Each of these conversions is implemented slightly differently,
// to avoid cloning the payload where possible.

impl From<Transaction> for UnminedTx {
    fn from(transaction: Transaction) -> Self {
        Self {
            id: (&transaction).into(),
            size: transaction.size(),
            transaction: Arc::new(transaction),
        }
    }
}

impl From<&Transaction> for UnminedTx {
    fn from(transaction: &Transaction) -> Self {
        Self {
            id: transaction.into(),
            size: transaction.size(),
            transaction: Arc::new(transaction.clone()),
        }
    }
}

impl From<Arc<Transaction>> for UnminedTx {
    fn from(transaction: Arc<Transaction>) -> Self {
        Self {
            id: transaction.as_ref().into(),
            size: transaction.size(),
            transaction,
        }
    }
}

#[cfg(any(test, feature = "proptest-impl"))]
impl proptest::arbitrary::Arbitrary for UnminedTx {
    type Parameters = ();
    type Strategy = proptest::strategy::BoxedStrategy<Self>;

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        use proptest::prelude::*;

        any::<Transaction>().prop_map(UnminedTx::from).boxed()
    }
}
