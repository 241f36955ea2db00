//! The mempool core: admission, commit reconciliation, and the consensus
//! surface.
//!
//! [`Mempool`] is a cloneable handle over shared state. Admission runs in
//! two halves: [`Mempool::check_tx`] performs the synchronous pre-admission
//! checks and hands the transaction to the application bridge, and a
//! dedicated response pump task applies the application's verdicts to the
//! store as they arrive, in submission order.
//!
//! Consensus brackets each commit in [`Mempool::lock`] / guard drop: it
//! reaps a block candidate, commits it, and calls [`MempoolGuard::update`]
//! to remove the committed transactions and revalidate the survivors.

use std::{
    sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Instant,
};

use futures::StreamExt;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tower::Service;
use tracing::Instrument;

use pangolin_chain::{
    block::Height,
    transaction::{self, UnminedTx},
};

use crate::{
    checks::{self, CheckKind, Checks, CompletedCheck, ExecTxResult, PendingChecks},
    storage::{SeenCache, Storage, VerifiedUnminedTx},
    BoxError, Config, MempoolError, PeerId,
};

/// A predicate consensus applies to a transaction before it is submitted to
/// the application, and to every survivor of a commit before it is
/// rechecked.
pub type PreCheckFn = Arc<dyn Fn(&UnminedTx) -> Result<(), BoxError> + Send + Sync>;

/// A predicate consensus applies to a transaction together with the
/// application's response; a failure is treated as a rejection.
pub type PostCheckFn = Arc<dyn Fn(&UnminedTx, &checks::Response) -> Result<(), BoxError> + Send + Sync>;

/// Requests sent from the [`Mempool`] handle to the response pump task.
enum Command {
    /// Dispatch a first-time validation.
    Check {
        transaction: UnminedTx,
        sender: Option<PeerId>,
        cancel: oneshot::Receiver<()>,
    },

    /// Dispatch a post-commit revalidation.
    Recheck {
        transaction: UnminedTx,
        cancel: oneshot::Receiver<()>,
    },

    /// Acknowledge once every request dispatched so far has completed.
    FlushApplication { done: oneshot::Sender<()> },
}

/// The mutable mempool state, guarded by the store lock.
///
/// `height`, `pending_rechecks` and the `TxsAvailable` edge trigger are only
/// mutated while this lock is held for writing.
struct State {
    /// The verified transactions, with capacity limits.
    storage: Storage,

    /// The last committed block height consensus has reported.
    height: Height,

    /// The number of revalidations still in flight for the current recheck
    /// cycle. Fresh admissions are suspended while this is non-zero.
    pending_rechecks: usize,

    /// Identifies the current recheck cycle.
    ///
    /// Bumped by every commit and flush. A recheck response carries the
    /// cycle that submitted it, so a response that outlives its cycle is
    /// recognized and dropped instead of decrementing the new cycle's
    /// counter.
    recheck_cycle: u64,

    /// The pre-check predicate consensus supplied with the latest commit.
    pre_check: Option<PreCheckFn>,

    /// The post-check predicate consensus supplied with the latest commit.
    post_check: Option<PostCheckFn>,

    /// Signals consensus that the mempool has become non-empty.
    txs_available: Option<mpsc::Sender<()>>,

    /// Set after `txs_available` fires; reset by each commit and whenever
    /// the pool drains to empty.
    notified_txs_available: bool,

    /// Set when the application connection has failed; the mempool no longer
    /// accepts transactions.
    closed: bool,
}

impl State {
    /// Signals the `TxsAvailable` channel, at most once per commit interval.
    fn notify_txs_available(&mut self) {
        debug_assert!(
            self.storage.transaction_count() > 0,
            "notified about an empty mempool"
        );

        if self.notified_txs_available {
            return;
        }

        if let Some(txs_available) = &self.txs_available {
            self.notified_txs_available = true;
            let _ = txs_available.try_send(());
        }
    }

    /// Re-arms the `TxsAvailable` edge trigger when the pool drains to
    /// empty, so the next admission signals again.
    fn re_arm_txs_available(&mut self) {
        if self.storage.transaction_count() == 0 {
            self.notified_txs_available = false;
        }
    }
}

/// The shared structures behind every [`Mempool`] handle and the response
/// pump.
#[derive(Clone)]
struct SharedState {
    /// The store lock. Writers: the response pump, Update, Flush,
    /// `remove_tx_by_key`. Readers: CheckTx pre-admission, Reap, gossip,
    /// size queries.
    state: Arc<RwLock<State>>,

    /// The seen-transaction cache, under its own mutex. May be taken while
    /// the store lock is held, never the converse.
    seen: Arc<Mutex<SeenCache>>,

    /// The in-flight validation request table.
    pending: Arc<Mutex<PendingChecks>>,

    /// Publishes the admission sequence number of the latest insertion, so
    /// gossip tasks can wait at the end of the store.
    changes: Arc<watch::Sender<u64>>,

    /// The mempool configuration.
    config: Arc<Config>,
}

impl SharedState {
    fn state_read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().expect("mempool state lock poisoned")
    }

    fn state_write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().expect("mempool state lock poisoned")
    }

    fn seen_lock(&self) -> MutexGuard<'_, SeenCache> {
        self.seen.lock().expect("seen cache lock poisoned")
    }

    fn pending_lock(&self) -> MutexGuard<'_, PendingChecks> {
        self.pending.lock().expect("pending check table lock poisoned")
    }
}

/// Mempool management and query handle.
///
/// The mempool is the set of transactions this node has validated against
/// the application and not yet observed in a committed block. Handles are
/// cheap to clone and share the same underlying pool.
#[derive(Clone)]
pub struct Mempool {
    shared: SharedState,

    /// Hands admitted candidates to the response pump for dispatch.
    commands: mpsc::UnboundedSender<Command>,
}

/// Starts a mempool backed by the given application validation service.
///
/// Returns the mempool handle and the join handle of the response pump
/// task. The pump exits with an error if the application connection fails,
/// and cleanly once every [`Mempool`] handle has been dropped.
pub fn init<ZA>(config: Config, application: ZA) -> (Mempool, JoinHandle<Result<(), BoxError>>)
where
    ZA: Service<checks::Request, Response = checks::Response, Error = BoxError> + Send + 'static,
    ZA::Future: Send + 'static,
{
    let config = Arc::new(config);
    let (commands, command_receiver) = mpsc::unbounded_channel();
    let (changes, _initial_receiver) = watch::channel(0);

    let shared = SharedState {
        state: Arc::new(RwLock::new(State {
            storage: Storage::new(&config),
            height: Height::MIN,
            pending_rechecks: 0,
            recheck_cycle: 0,
            pre_check: None,
            post_check: None,
            txs_available: None,
            notified_txs_available: false,
            closed: false,
        })),
        seen: Arc::new(Mutex::new(SeenCache::new(config.cache_size))),
        pending: Arc::new(Mutex::new(PendingChecks::default())),
        changes: Arc::new(changes),
        config,
    };

    let pump = ResponsePump {
        shared: shared.clone(),
    };
    let pump_task = tokio::spawn(pump.run(application, command_receiver).in_current_span());

    (Mempool { shared, commands }, pump_task)
}

impl Mempool {
    /// Submits a candidate transaction for validation and possible
    /// admission.
    ///
    /// `sender` is the peer the transaction arrived from, or `None` for
    /// local RPC submissions.
    ///
    /// A successful return means the transaction passed the synchronous
    /// checks and was handed to the application; whether it is admitted is
    /// decided when the application replies. Duplicates of a transaction
    /// still in the pool extend its sender set before failing with
    /// [`MempoolError::InCache`].
    #[instrument(skip(self, transaction), fields(txid = %transaction.id))]
    pub fn check_tx(
        &self,
        transaction: UnminedTx,
        sender: Option<PeerId>,
    ) -> Result<(), MempoolError> {
        let max_tx_bytes = self.shared.config.max_tx_bytes;
        if transaction.size > max_tx_bytes {
            metrics::counter!("mempool.rejected.transactions.total").increment(1);
            return Err(MempoolError::TooLarge {
                size: transaction.size,
                limit: max_tx_bytes,
            });
        }

        let state = self.shared.state_read();

        if state.closed {
            return Err(MempoolError::AppUnavailable);
        }

        state.storage.check_capacity(transaction.size)?;

        {
            let mut seen = self.shared.seen_lock();

            if seen.contains(&transaction.id) {
                let in_mempool = state.storage.contains(&transaction.id);
                drop(seen);
                drop(state);

                if in_mempool {
                    if let Some(peer) = sender {
                        let mut state = self.shared.state_write();
                        if state
                            .storage
                            .verified_mut()
                            .add_sender(&transaction.id, peer)
                        {
                            trace!(%peer, "recorded another sender for a pooled transaction");
                        }
                    }
                }

                return Err(MempoolError::InCache);
            }

            seen.insert(transaction.id);
        }

        // The id stays in the seen cache when the predicate rejects the
        // transaction, like any other rejected sighting.
        if let Some(pre_check) = &state.pre_check {
            if let Err(error) = pre_check(&transaction) {
                debug!(%error, "pre-check predicate rejected transaction");
                metrics::counter!("mempool.rejected.transactions.total").increment(1);
                return Err(MempoolError::PreCheckFailed(error.to_string()));
            }
        }

        let txid = transaction.id;
        let cancel = self
            .shared
            .pending_lock()
            .register(txid, CheckKind::New, 0)?;
        drop(state);

        metrics::counter!("mempool.checked.transactions.total").increment(1);

        let command = Command::Check {
            transaction,
            sender,
            cancel,
        };
        if self.commands.send(command).is_err() {
            // The response pump is gone; undo the bookkeeping so the
            // transaction stays reconsiderable.
            self.shared.pending_lock().cancel(&txid);
            self.shared.seen_lock().remove(&txid);
            return Err(MempoolError::AppUnavailable);
        }

        Ok(())
    }

    /// Acquires the consensus writer lock.
    ///
    /// The guard brackets one commit: reap a block candidate, then report
    /// the committed block through [`MempoolGuard::update`]. Every other
    /// mutation of the pool is excluded until the guard is dropped. The
    /// guard is not reentrant: a thread holding it must not call the
    /// self-locking [`Mempool`] methods.
    pub fn lock(&self) -> MempoolGuard<'_> {
        MempoolGuard {
            state: self.shared.state_write(),
            mempool: self,
        }
    }

    /// Removes a transaction from the pool by its id.
    ///
    /// Used when the proposer drops a transaction while constructing a
    /// block. The seen cache is left untouched: the transaction was not
    /// invalid, it just missed this block.
    pub fn remove_tx_by_key(&self, txid: &transaction::Hash) -> Result<(), MempoolError> {
        let mut state = self.shared.state_write();

        match state.storage.remove_exact(txid) {
            Some(_) => {
                state.re_arm_txs_available();
                Ok(())
            }
            None => Err(MempoolError::NotInMempool),
        }
    }

    /// Empties the pool and the seen cache, and cancels every in-flight
    /// validation.
    pub fn flush(&self) {
        let mut state = self.shared.state_write();

        state.storage.clear();
        state.pending_rechecks = 0;
        // Responses already consumed from the pending table belong to the
        // flushed cycle and must not count against a later one.
        state.recheck_cycle += 1;
        state.re_arm_txs_available();
        self.shared.seen_lock().clear();
        self.shared.pending_lock().cancel_all();

        info!("flushed the mempool");
    }

    /// Waits until the application has answered every validation request
    /// dispatched so far.
    pub async fn flush_application(&self) -> Result<(), MempoolError> {
        let (done, done_receiver) = oneshot::channel();

        self.commands
            .send(Command::FlushApplication { done })
            .map_err(|_| MempoolError::AppUnavailable)?;

        done_receiver.await.map_err(|_| MempoolError::AppUnavailable)
    }

    /// Enables the `TxsAvailable` signal and returns its receiver.
    ///
    /// The signal is edge-triggered: it fires at most once per commit
    /// interval, when the pool becomes (or remains) non-empty.
    pub fn enable_txs_available(&self) -> mpsc::Receiver<()> {
        let (sender, receiver) = mpsc::channel(1);

        let mut state = self.shared.state_write();
        state.txs_available = Some(sender);

        receiver
    }

    /// Returns the number of transactions in the pool.
    pub fn size(&self) -> usize {
        self.shared.state_read().storage.transaction_count()
    }

    /// Returns the total payload size of the pooled transactions, in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.shared.state_read().storage.total_serialized_size()
    }

    /// Returns `true` if the pool contains the transaction with this id.
    pub fn contains(&self, txid: &transaction::Hash) -> bool {
        self.shared.state_read().storage.contains(txid)
    }

    /// Returns `true` if the mempool has shut down after an application
    /// connection failure.
    pub fn is_closed(&self) -> bool {
        self.shared.state_read().closed
    }

    /// The mempool configuration.
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Subscribes to admission notifications.
    ///
    /// The channel carries the admission sequence number of the most recent
    /// insertion; gossip tasks use it to wait at the end of the store.
    pub(crate) fn changes(&self) -> watch::Receiver<u64> {
        self.shared.changes.subscribe()
    }

    /// Returns the first transaction admitted after `cursor` that should be
    /// gossiped to `peer`.
    ///
    /// `Some((sequence, None))` means the transaction at `sequence` was
    /// received from `peer` itself and must be skipped.
    pub(crate) fn next_after(
        &self,
        cursor: u64,
        peer: PeerId,
    ) -> Option<(u64, Option<UnminedTx>)> {
        let state = self.shared.state_read();
        let (sequence, transaction) = state.storage.verified().next_after(cursor)?;

        if transaction.senders.contains(&peer) {
            Some((sequence, None))
        } else {
            Some((sequence, Some(transaction.transaction.clone())))
        }
    }

    #[cfg(test)]
    pub(crate) fn senders_of(&self, txid: &transaction::Hash) -> Option<Vec<PeerId>> {
        let state = self.shared.state_read();
        let transaction = state.storage.get(txid)?;

        let mut senders: Vec<_> = transaction.senders.iter().copied().collect();
        senders.sort();
        Some(senders)
    }

    #[cfg(test)]
    pub(crate) fn seen_contains(&self, txid: &transaction::Hash) -> bool {
        self.shared.seen_lock().contains(txid)
    }

    #[cfg(test)]
    pub(crate) fn pending_rechecks(&self) -> usize {
        self.shared.state_read().pending_rechecks
    }

    #[cfg(test)]
    pub(crate) fn in_flight_checks(&self) -> usize {
        self.shared.pending_lock().len()
    }
}

/// The consensus writer lock over the mempool.
///
/// Dropping the guard releases the lock.
pub struct MempoolGuard<'a> {
    state: RwLockWriteGuard<'a, State>,
    mempool: &'a Mempool,
}

impl MempoolGuard<'_> {
    /// Returns a prefix of the pool in admission order whose cumulative
    /// payload bytes and gas stay within the caps.
    ///
    /// A negative cap disables that limit. Does not remove anything.
    pub fn reap(&self, max_bytes: i64, max_gas: i64) -> Vec<UnminedTx> {
        self.state.storage.verified().reap(max_bytes, max_gas)
    }

    /// Reconciles the pool with a committed block.
    ///
    /// Removes the committed transactions, adjusts the seen cache according
    /// to each execution result, evicts entries past their time-to-live,
    /// and submits a revalidation for every survivor. Returns without
    /// waiting for the revalidation responses; fresh admissions stay
    /// suspended until they have all arrived.
    #[instrument(skip_all, fields(height = %height, committed = committed_txs.len()))]
    pub fn update(
        &mut self,
        height: Height,
        committed_txs: &[UnminedTx],
        results: &[ExecTxResult],
        pre_check: Option<PreCheckFn>,
        post_check: Option<PostCheckFn>,
    ) -> Result<(), MempoolError> {
        let mempool = self.mempool;
        let state = &mut *self.state;

        state.height = height;
        state.notified_txs_available = false;
        state.pre_check = pre_check;
        state.post_check = post_check;

        // This commit supersedes any recheck cycle still in flight from the
        // previous height. Responses from the old cycle are dropped by
        // their stale cycle number even if they already left the pending
        // table.
        state.recheck_cycle += 1;
        if state.pending_rechecks > 0 {
            let canceled = mempool.shared.pending_lock().cancel_rechecks();
            debug!(canceled, "canceled the previous recheck cycle");
            state.pending_rechecks = 0;
        }

        // Commit sweep. Missing results are treated as successful
        // execution; per-transaction problems never fail the update.
        {
            let mut seen = mempool.shared.seen_lock();
            let mut pending = mempool.shared.pending_lock();

            for (index, transaction) in committed_txs.iter().enumerate() {
                let valid = results.get(index).map_or(true, ExecTxResult::is_ok);

                if valid {
                    seen.insert(transaction.id);
                } else if !mempool.shared.config.keep_invalid_txs_in_cache {
                    seen.remove(&transaction.id);
                }

                // A first-time check may still be in flight for this
                // transaction; its response must not re-admit it.
                pending.cancel(&transaction.id);

                state.storage.remove_exact(&transaction.id);
            }
        }

        let expired = state
            .storage
            .remove_expired_transactions(height, Instant::now());
        if !expired.is_empty() {
            let mut seen = mempool.shared.seen_lock();
            for transaction in &expired {
                seen.remove(&transaction.transaction.id);
            }
        }

        if state.storage.transaction_count() == 0 {
            return Ok(());
        }

        if !mempool.shared.config.recheck {
            state.notify_txs_available();
            return Ok(());
        }

        // Drop survivors the new pre-check predicate rejects outright, then
        // revalidate the rest in admission order.
        if let Some(pre_check) = state.pre_check.clone() {
            let removed = state
                .storage
                .remove_all_that(|tx| pre_check(&tx.transaction).is_err());

            if !removed.is_empty() {
                debug!(
                    removed = removed.len(),
                    "pre-check predicate removed transactions before recheck"
                );

                if !mempool.shared.config.keep_invalid_txs_in_cache {
                    let mut seen = mempool.shared.seen_lock();
                    for transaction in &removed {
                        seen.remove(&transaction.transaction.id);
                    }
                }
            }

            if state.storage.transaction_count() == 0 {
                return Ok(());
            }
        }

        let mut submitted = 0;
        for (_, transaction) in state.storage.verified().transactions() {
            let txid = transaction.transaction.id;

            let cancel = match mempool
                .shared
                .pending_lock()
                .register(txid, CheckKind::Recheck, state.recheck_cycle)
            {
                Ok(cancel) => cancel,
                Err(_) => {
                    debug!(%txid, "skipping recheck: another check is already in flight");
                    continue;
                }
            };

            let command = Command::Recheck {
                transaction: transaction.transaction.clone(),
                cancel,
            };
            if mempool.commands.send(command).is_err() {
                warn!("response pump has stopped; ending the recheck cycle early");
                mempool.shared.pending_lock().cancel(&txid);
                break;
            }

            submitted += 1;
        }

        state.pending_rechecks = submitted;

        if submitted == 0 {
            state.notify_txs_available();
        } else {
            debug!(rechecks = submitted, "submitted post-commit rechecks");
        }

        Ok(())
    }

    /// Removes a transaction by its id while holding the consensus lock.
    pub fn remove_tx_by_key(&mut self, txid: &transaction::Hash) -> Result<(), MempoolError> {
        match self.state.storage.remove_exact(txid) {
            Some(_) => {
                self.state.re_arm_txs_available();
                Ok(())
            }
            None => Err(MempoolError::NotInMempool),
        }
    }

    /// Returns the number of transactions in the pool.
    pub fn size(&self) -> usize {
        self.state.storage.transaction_count()
    }

    /// Returns the total payload size of the pooled transactions, in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.state.storage.total_serialized_size()
    }
}

/// Applies completed validation responses to the mempool state.
///
/// Runs as a dedicated task so callback execution is serialized with
/// respect to the consensus lock.
struct ResponsePump {
    shared: SharedState,
}

impl ResponsePump {
    async fn run<ZA>(
        self,
        application: ZA,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) -> Result<(), BoxError>
    where
        ZA: Service<checks::Request, Response = checks::Response, Error = BoxError>
            + Send
            + 'static,
        ZA::Future: Send + 'static,
    {
        info!("initializing mempool response pump task");

        let mut checks = Checks::new(application);
        let mut flush_waiters: Vec<oneshot::Sender<()>> = Vec::new();

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Check { transaction, sender, cancel }) => {
                        if let Err(error) =
                            checks.dispatch(transaction, sender, CheckKind::New, cancel).await
                        {
                            error!(%error, "application connection failed; shutting the mempool down");
                            self.shut_down();
                            return Err(error);
                        }
                    }
                    Some(Command::Recheck { transaction, cancel }) => {
                        if let Err(error) =
                            checks.dispatch(transaction, None, CheckKind::Recheck, cancel).await
                        {
                            error!(%error, "application connection failed; shutting the mempool down");
                            self.shut_down();
                            return Err(error);
                        }
                    }
                    Some(Command::FlushApplication { done }) => {
                        if checks.in_flight() == 0 {
                            let _ = done.send(());
                        } else {
                            flush_waiters.push(done);
                        }
                    }
                    None => {
                        debug!("all mempool handles dropped; stopping response pump");
                        return Ok(());
                    }
                },
                Some(completed) = checks.next() => {
                    self.handle_completed(completed)?;

                    if checks.in_flight() == 0 {
                        for waiter in flush_waiters.drain(..) {
                            let _ = waiter.send(());
                        }
                    }
                }
            }
        }
    }

    /// Routes one completed request to the matching callback.
    fn handle_completed(&self, completed: CompletedCheck) -> Result<(), BoxError> {
        let CompletedCheck {
            transaction,
            sender,
            kind,
            result,
        } = completed;

        // Requests canceled by a commit, a flush, or a superseded recheck
        // cycle are dropped before their verdict is inspected.
        let live = self.shared.pending_lock().consume(&transaction.id, kind);
        let Some(cycle) = live else {
            trace!(txid = %transaction.id, ?kind, "dropping response for a canceled check");
            return Ok(());
        };

        match kind {
            CheckKind::New => self.handle_first_time(transaction, sender, result),
            CheckKind::Recheck => {
                self.handle_recheck(transaction, result, cycle);
                Ok(())
            }
        }
    }

    /// Applies a first-time validation verdict: admit, or discard.
    fn handle_first_time(
        &self,
        transaction: UnminedTx,
        sender: Option<PeerId>,
        result: Result<checks::Response, BoxError>,
    ) -> Result<(), BoxError> {
        let response = match result {
            Ok(response) => response,
            Err(error) => {
                // A live request can only fail through the transport, which
                // is fatal to the bridge.
                error!(%error, "application connection failed; shutting the mempool down");
                self.shut_down();
                return Err(error);
            }
        };

        let mut state = self.shared.state_write();

        let rejected_by_post_check = state
            .post_check
            .as_ref()
            .is_some_and(|post_check| post_check(&transaction, &response).is_err());

        if !response.is_ok() || rejected_by_post_check {
            // Surfaced through logs and metrics only: the submitter already
            // got a successful `check_tx` return.
            let error = MempoolError::AppRejected {
                code: response.code,
                codespace: response.codespace.clone(),
            };
            debug!(
                txid = %transaction.id,
                %error,
                rejected_by_post_check,
                "application rejected transaction"
            );
            metrics::counter!("mempool.rejected.transactions.total").increment(1);

            if !self.shared.config.keep_invalid_txs_in_cache {
                self.shared.seen_lock().remove(&transaction.id);
            }

            return Ok(());
        }

        if state.pending_rechecks > 0 {
            // The transaction stays in the seen cache; peers can re-present
            // it after the cache evicts it.
            debug!(
                txid = %transaction.id,
                "dropping valid transaction: a recheck cycle is in progress"
            );
            return Ok(());
        }

        if state.storage.contains(&transaction.id) {
            return Ok(());
        }

        if state.storage.check_capacity(transaction.size).is_err() {
            // Never admitted, so it must stay reconsiderable later: the
            // cache entry goes regardless of the invalid-tx cache policy.
            debug!(txid = %transaction.id, "mempool is full; discarding valid transaction");
            metrics::counter!("mempool.rejected.transactions.total").increment(1);
            self.shared.seen_lock().remove(&transaction.id);
            return Ok(());
        }

        let txid = transaction.id;
        let height = state.height;
        let verified = VerifiedUnminedTx::new(transaction, response.gas_wanted, height, sender);

        match state.storage.insert(verified) {
            Ok(sequence) => {
                trace!(%txid, sequence, "inserted verified transaction into the mempool");
                metrics::counter!("mempool.admitted.transactions.total").increment(1);

                self.shared.changes.send_replace(sequence);
                state.notify_txs_available();
            }
            Err(error) => {
                debug!(%txid, %error, "failed to insert verified transaction");
            }
        }

        Ok(())
    }

    /// Applies a revalidation verdict to a surviving transaction.
    ///
    /// `cycle` is the recheck cycle the request was submitted in.
    fn handle_recheck(
        &self,
        transaction: UnminedTx,
        result: Result<checks::Response, BoxError>,
        cycle: u64,
    ) {
        let mut state = self.shared.state_write();

        // The pending-table entry was consumed before this lock was taken,
        // so a commit or flush may have started a newer cycle in between.
        // The old cycle's verdict and decrement must not touch the new one.
        if cycle != state.recheck_cycle {
            trace!(
                txid = %transaction.id,
                cycle,
                current_cycle = state.recheck_cycle,
                "dropping recheck response from a superseded cycle"
            );
            return;
        }

        let response = match result {
            Ok(response) => response,
            Err(error) => {
                warn!(
                    txid = %transaction.id,
                    %error,
                    "recheck failed; ending the recheck cycle early"
                );

                self.shared.pending_lock().cancel_rechecks();
                state.pending_rechecks = 0;
                if state.storage.transaction_count() > 0 {
                    state.notify_txs_available();
                }

                return;
            }
        };

        if state.storage.contains(&transaction.id) {
            let rejected_by_post_check = state
                .post_check
                .as_ref()
                .is_some_and(|post_check| post_check(&transaction, &response).is_err());

            if response.is_ok() && !rejected_by_post_check {
                state
                    .storage
                    .verified_mut()
                    .set_gas_wanted(&transaction.id, response.gas_wanted);
            } else {
                debug!(
                    txid = %transaction.id,
                    code = response.code,
                    rejected_by_post_check,
                    "recheck invalidated transaction"
                );
                metrics::counter!("mempool.rejected.transactions.total").increment(1);

                state.storage.remove_exact(&transaction.id);
                state.re_arm_txs_available();
                if !self.shared.config.keep_invalid_txs_in_cache {
                    self.shared.seen_lock().remove(&transaction.id);
                }
            }
        } else {
            // Removed between the recheck submission and this response.
            trace!(
                txid = %transaction.id,
                "recheck response for a transaction no longer in the mempool"
            );
        }

        state.pending_rechecks = state.pending_rechecks.saturating_sub(1);
        if state.pending_rechecks == 0 {
            debug!("recheck cycle complete");
            if state.storage.transaction_count() > 0 {
                state.notify_txs_available();
            }
        }
    }

    /// Closes the mempool for writes after a fatal application failure.
    fn shut_down(&self) {
        let mut state = self.shared.state_write();
        state.closed = true;
        state.pending_rechecks = 0;
        self.shared.pending_lock().cancel_all();

        // Wake the gossip tasks so they can observe the closure and drain.
        self.shared.changes.send_modify(|_| ());
    }
}

/// A mempool that accepts every call and stores nothing.
///
/// Used by operational modes that must not retain transactions, like state
/// sync and replay.
#[derive(Default)]
pub struct NopMempool {
    // Kept so the receiver returned by `enable_txs_available` stays open
    // and silent instead of closing.
    txs_available: Mutex<Option<mpsc::Sender<()>>>,
}

impl NopMempool {
    /// Creates a new no-op mempool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts and discards a candidate transaction.
    pub fn check_tx(
        &self,
        _transaction: UnminedTx,
        _sender: Option<PeerId>,
    ) -> Result<(), MempoolError> {
        Ok(())
    }

    /// Returns an empty block candidate.
    pub fn reap(&self, _max_bytes: i64, _max_gas: i64) -> Vec<UnminedTx> {
        Vec::new()
    }

    /// Accepts and ignores a commit notification.
    pub fn update(
        &self,
        _height: Height,
        _committed_txs: &[UnminedTx],
        _results: &[ExecTxResult],
        _pre_check: Option<PreCheckFn>,
        _post_check: Option<PostCheckFn>,
    ) -> Result<(), MempoolError> {
        Ok(())
    }

    /// Succeeds without removing anything.
    pub fn remove_tx_by_key(&self, _txid: &transaction::Hash) -> Result<(), MempoolError> {
        Ok(())
    }

    /// Returns a channel that never signals.
    pub fn enable_txs_available(&self) -> mpsc::Receiver<()> {
        let (sender, receiver) = mpsc::channel(1);
        *self
            .txs_available
            .lock()
            .expect("nop mempool lock poisoned") = Some(sender);
        receiver
    }

    /// Always zero.
    pub fn size(&self) -> usize {
        0
    }

    /// Always zero.
    pub fn size_bytes(&self) -> u64 {
        0
    }

    /// Does nothing.
    pub fn flush(&self) {}

    /// Succeeds immediately: there is nothing in flight.
    pub async fn flush_application(&self) -> Result<(), MempoolError> {
        Ok(())
    }
}
