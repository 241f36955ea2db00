//! The set of application-verified transactions waiting for inclusion in a
//! block, in admission order.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    time::Instant,
};

use pangolin_chain::{block::Height, transaction, transaction::UnminedTx};

use crate::{MempoolError, PeerId};

/// A transaction the application has accepted, plus its admission metadata.
#[derive(Debug)]
pub struct VerifiedUnminedTx {
    /// The admitted transaction.
    pub transaction: UnminedTx,

    /// The gas the application reported for this transaction in its most
    /// recent positive validation.
    pub gas_wanted: i64,

    /// The block height the node had observed when this transaction was
    /// admitted.
    pub height: Height,

    /// The peers this transaction has been received from.
    ///
    /// Never contains the local node: locally submitted transactions start
    /// with an empty sender set. Used by the gossip engine to avoid echoing
    /// a transaction back to a peer that already has it.
    pub senders: HashSet<PeerId>,

    /// When this transaction was admitted.
    pub inserted_at: Instant,
}

impl VerifiedUnminedTx {
    /// Creates a new verified transaction admitted at `height`, received
    /// from `sender` if it arrived over the network.
    pub fn new(
        transaction: UnminedTx,
        gas_wanted: i64,
        height: Height,
        sender: Option<PeerId>,
    ) -> Self {
        Self {
            transaction,
            gas_wanted,
            height,
            senders: sender.into_iter().collect(),
            inserted_at: Instant::now(),
        }
    }
}

/// The set of verified transactions in the mempool, in admission order.
///
/// Every admission is assigned a monotonically increasing sequence number.
/// Gossip cursors hold sequence numbers rather than references, so when the
/// transaction at a cursor is removed the cursor transparently resumes at
/// the next admitted transaction.
#[derive(Default)]
pub struct VerifiedSet {
    /// The verified transactions, keyed by admission sequence number.
    transactions: BTreeMap<u64, VerifiedUnminedTx>,

    /// An index from transaction id to admission sequence number.
    by_id: HashMap<transaction::Hash, u64>,

    /// The total payload size, in bytes, of the transactions in the set.
    transactions_serialized_size: u64,

    /// The sequence number the next admission will get.
    next_sequence: u64,
}

impl VerifiedSet {
    /// Returns an iterator over the transactions in the set, in admission
    /// order, with their sequence numbers.
    pub fn transactions(&self) -> impl Iterator<Item = (u64, &VerifiedUnminedTx)> + '_ {
        self.transactions.iter().map(|(seq, tx)| (*seq, tx))
    }

    /// Returns the number of verified transactions in the set.
    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    /// Returns the total payload size of the transactions in the set, in
    /// bytes.
    pub fn total_serialized_size(&self) -> u64 {
        self.transactions_serialized_size
    }

    /// Returns `true` if the set contains the transaction with the given id.
    pub fn contains(&self, txid: &transaction::Hash) -> bool {
        self.by_id.contains_key(txid)
    }

    /// Returns the verified transaction with the given id, if it is in the
    /// set.
    #[allow(dead_code)]
    pub fn get(&self, txid: &transaction::Hash) -> Option<&VerifiedUnminedTx> {
        let sequence = self.by_id.get(txid)?;
        self.transactions.get(sequence)
    }

    /// Returns the first transaction admitted after `cursor`, with its
    /// sequence number.
    pub fn next_after(&self, cursor: u64) -> Option<(u64, &VerifiedUnminedTx)> {
        self.transactions
            .range(cursor + 1..)
            .next()
            .map(|(seq, tx)| (*seq, tx))
    }

    /// Inserts a transaction into the set, assigning it the next admission
    /// sequence number.
    pub fn insert(&mut self, transaction: VerifiedUnminedTx) -> Result<u64, MempoolError> {
        if self.contains(&transaction.transaction.id) {
            return Err(MempoolError::InMempool);
        }

        self.next_sequence += 1;
        let sequence = self.next_sequence;

        self.transactions_serialized_size += transaction.transaction.size as u64;
        self.by_id.insert(transaction.transaction.id, sequence);
        self.transactions.insert(sequence, transaction);

        Ok(sequence)
    }

    /// Records that `peer` has sent us the transaction with the given id.
    ///
    /// No-op if the transaction is not in the set or the peer is already
    /// recorded.
    pub fn add_sender(&mut self, txid: &transaction::Hash, peer: PeerId) -> bool {
        let Some(sequence) = self.by_id.get(txid) else {
            return false;
        };

        let transaction = self
            .transactions
            .get_mut(sequence)
            .expect("ids in the index always have a matching transaction");

        transaction.senders.insert(peer)
    }

    /// Updates the gas reported for a transaction after a positive
    /// revalidation.
    pub fn set_gas_wanted(&mut self, txid: &transaction::Hash, gas_wanted: i64) {
        if let Some(sequence) = self.by_id.get(txid) {
            let transaction = self
                .transactions
                .get_mut(sequence)
                .expect("ids in the index always have a matching transaction");

            transaction.gas_wanted = gas_wanted;
        }
    }

    /// Removes a transaction from the set.
    ///
    /// Idempotent: returns the removed transaction, or `None` if it was not
    /// in the set.
    pub fn remove(&mut self, txid: &transaction::Hash) -> Option<VerifiedUnminedTx> {
        let sequence = self.by_id.remove(txid)?;
        let transaction = self
            .transactions
            .remove(&sequence)
            .expect("ids in the index always have a matching transaction");

        self.transactions_serialized_size -= transaction.transaction.size as u64;

        Some(transaction)
    }

    /// Removes all transactions in the set that match the `predicate`.
    ///
    /// Returns the removed transactions.
    pub fn remove_all_that(
        &mut self,
        predicate: impl Fn(&VerifiedUnminedTx) -> bool,
    ) -> Vec<VerifiedUnminedTx> {
        let ids_to_remove: Vec<_> = self
            .transactions
            .values()
            .filter(|tx| predicate(tx))
            .map(|tx| tx.transaction.id)
            .collect();

        ids_to_remove
            .into_iter()
            .map(|id| {
                self.remove(&id)
                    .expect("transactions selected for removal are in the set")
            })
            .collect()
    }

    /// Returns a prefix of the admission-order traversal whose cumulative
    /// payload bytes and gas stay within the given caps.
    ///
    /// A negative cap disables that limit. Does not mutate the set.
    pub fn reap(&self, max_bytes: i64, max_gas: i64) -> Vec<UnminedTx> {
        let mut reaped = Vec::new();
        let mut total_bytes: i64 = 0;
        let mut total_gas: i64 = 0;

        for transaction in self.transactions.values() {
            let tx_bytes = transaction.transaction.size as i64;

            if max_bytes >= 0 && total_bytes + tx_bytes > max_bytes {
                break;
            }
            if max_gas >= 0 && total_gas.saturating_add(transaction.gas_wanted) > max_gas {
                break;
            }

            total_bytes += tx_bytes;
            total_gas = total_gas.saturating_add(transaction.gas_wanted);
            reaped.push(transaction.transaction.clone());
        }

        reaped
    }

    /// Clears the set.
    pub fn clear(&mut self) {
        self.transactions.clear();
        self.by_id.clear();
        self.transactions_serialized_size = 0;
    }
}
