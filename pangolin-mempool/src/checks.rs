//! Asynchronous transaction validation against the application.
//!
//! The application is consumed as a [`tower::Service`]: the mempool submits
//! [`Request::CheckTx`] requests and the application answers with a
//! [`Response`] carrying a result code and gas estimate. Requests are
//! dispatched in submission order, and [`Checks`] yields the completed
//! responses in that same order, so admission order always matches
//! submission order.
//!
//! Responses can arrive after the originating transaction has already left
//! the mempool — for example when a block commits while a validation is in
//! flight. The [`PendingChecks`] table tracks every in-flight request, and a
//! response whose table entry has been canceled is dropped before its
//! verdict is ever inspected.

use std::{
    collections::HashMap,
    pin::Pin,
    task::{Context, Poll},
};

use futures::{
    future::{BoxFuture, FutureExt},
    ready,
    stream::{FuturesOrdered, Stream},
};
use pin_project::pin_project;
use tokio::sync::oneshot;
use tower::{Service, ServiceExt};
use tracing::Instrument;

use pangolin_chain::transaction::{self, UnminedTx};

use crate::{BoxError, MempoolError, PeerId};

/// A validation request submitted to the application.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Request {
    /// Validate a transaction against the application's current state.
    CheckTx {
        /// The transaction to validate.
        transaction: UnminedTx,
        /// Whether this is a first sighting or a post-commit revalidation.
        kind: CheckKind,
    },
}

/// Distinguishes first-time validations from post-commit revalidations.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CheckKind {
    /// The node has not validated this transaction before.
    New,

    /// The transaction was already in the mempool, and is being revalidated
    /// after a block commit.
    Recheck,
}

/// The application's answer to a [`Request::CheckTx`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Response {
    /// The result code: zero means the transaction is valid.
    pub code: u32,

    /// Application-defined result payload.
    pub data: Vec<u8>,

    /// The gas the transaction is expected to consume.
    pub gas_wanted: i64,

    /// The gas consumed while validating.
    pub gas_used: i64,

    /// Events emitted during validation.
    pub events: Vec<Event>,

    /// The namespace of the result code, for non-zero codes.
    pub codespace: String,
}

impl Response {
    /// Returns `true` if the application accepted the transaction.
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

/// An event emitted by the application during validation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Event {
    /// The event type.
    pub kind: String,

    /// Key-value attributes attached to the event.
    pub attributes: Vec<(String, String)>,
}

/// The result of executing a committed transaction, as reported by
/// consensus in `update`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ExecTxResult {
    /// The execution result code: zero means the transaction was valid.
    pub code: u32,
}

impl ExecTxResult {
    /// Returns `true` if the committed transaction executed successfully.
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

/// A request registered in [`PendingChecks`].
struct PendingCheck {
    kind: CheckKind,
    cycle: u64,
    cancel: oneshot::Sender<()>,
}

/// The table of validation requests currently in flight.
///
/// A request is registered before it is handed to the dispatch task and
/// consumed when its response is processed. Canceling a request removes its
/// entry and signals the in-flight future to stop early; the response pump
/// drops any response whose entry is no longer in the table.
#[derive(Default)]
pub struct PendingChecks {
    entries: HashMap<transaction::Hash, PendingCheck>,
}

impl PendingChecks {
    /// Registers a new in-flight request, returning the receiver its
    /// dispatch future must watch for cancellation.
    ///
    /// `cycle` tags post-commit revalidations with the recheck cycle that
    /// submitted them; first-time checks pass zero.
    ///
    /// Fails if a request for the same transaction is already in flight,
    /// which can happen when the seen cache evicted the id under churn.
    pub fn register(
        &mut self,
        txid: transaction::Hash,
        kind: CheckKind,
        cycle: u64,
    ) -> Result<oneshot::Receiver<()>, MempoolError> {
        use std::collections::hash_map::Entry;

        let entry = match self.entries.entry(txid) {
            Entry::Occupied(_) => return Err(MempoolError::InCache),
            Entry::Vacant(entry) => entry,
        };

        let (cancel_tx, cancel_rx) = oneshot::channel();
        entry.insert(PendingCheck {
            kind,
            cycle,
            cancel: cancel_tx,
        });

        Ok(cancel_rx)
    }

    /// Consumes the entry for a completed request, returning the cycle it
    /// was registered with.
    ///
    /// Returns `None` if the entry was canceled in the meantime (or belongs
    /// to a different request kind), in which case the response must be
    /// dropped unprocessed.
    pub fn consume(&mut self, txid: &transaction::Hash, kind: CheckKind) -> Option<u64> {
        match self.entries.get(txid) {
            Some(pending) if pending.kind == kind => {
                let cycle = pending.cycle;
                self.entries.remove(txid);
                Some(cycle)
            }
            _ => None,
        }
    }

    /// Cancels the in-flight request for the given transaction, if any.
    pub fn cancel(&mut self, txid: &transaction::Hash) -> bool {
        match self.entries.remove(txid) {
            Some(pending) => {
                // The request may have already completed; then there is no
                // receiver left to signal, and consume() does the dropping.
                let _ = pending.cancel.send(());
                true
            }
            None => false,
        }
    }

    /// Cancels every in-flight revalidation, ending the current recheck
    /// cycle.
    pub fn cancel_rechecks(&mut self) -> usize {
        self.cancel_where(|kind| kind == CheckKind::Recheck)
    }

    /// Cancels every in-flight request.
    pub fn cancel_all(&mut self) -> usize {
        self.cancel_where(|_| true)
    }

    /// The number of requests currently registered.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no requests are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn cancel_where(&mut self, predicate: impl Fn(CheckKind) -> bool) -> usize {
        let mut canceled = 0;

        self.entries.retain(|_, pending| {
            if predicate(pending.kind) {
                canceled += 1;
                false
            } else {
                true
            }
        });
        // Dropping the entries drops their cancel senders, which closes the
        // receivers the in-flight futures are watching.

        canceled
    }
}

/// A completed validation request.
pub struct CompletedCheck {
    /// The transaction that was validated.
    pub transaction: UnminedTx,

    /// The peer the transaction came from, if it arrived over the network.
    pub sender: Option<PeerId>,

    /// The request kind.
    pub kind: CheckKind,

    /// The application's response, or the transport error that ended the
    /// request. Canceled requests complete with [`MempoolError::Canceled`].
    pub result: Result<Response, BoxError>,
}

/// Represents a [`Stream`] of in-flight validation requests.
///
/// Requests are dispatched to the application in the order they are queued,
/// and the stream yields completions in that same order.
#[pin_project]
pub struct Checks<ZA>
where
    ZA: Service<Request, Response = Response, Error = BoxError> + Send + 'static,
    ZA::Future: Send + 'static,
{
    /// The service validating transactions for the mempool.
    application: ZA,

    /// The in-flight requests, in submission order.
    #[pin]
    pending: FuturesOrdered<BoxFuture<'static, CompletedCheck>>,
}

impl<ZA> Stream for Checks<ZA>
where
    ZA: Service<Request, Response = Response, Error = BoxError> + Send + 'static,
    ZA::Future: Send + 'static,
{
    type Item = CompletedCheck;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        // CORRECTNESS
        //
        // The current task must be scheduled for wakeup every time we return
        // `Poll::Pending`. `FuturesOrdered` schedules a wakeup when the next
        // queued request completes, and the caller re-polls after pushing
        // new requests into an empty queue.
        Poll::Ready(ready!(this.pending.poll_next(cx)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.pending.size_hint()
    }
}

impl<ZA> Checks<ZA>
where
    ZA: Service<Request, Response = Response, Error = BoxError> + Send + 'static,
    ZA::Future: Send + 'static,
{
    /// Initialize a new check stream submitting requests to `application`.
    ///
    /// The stream is agnostic to transport policy, so retry and timeout
    /// limits should be layered onto the `application` service passed into
    /// this constructor.
    pub fn new(application: ZA) -> Self {
        Self {
            application,
            pending: FuturesOrdered::new(),
        }
    }

    /// Returns the number of requests currently in flight.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Dispatches a validation request to the application.
    ///
    /// Waits for the application service to accept the request, so dispatch
    /// order equals submission order. The returned error means the
    /// application connection itself failed, which is fatal to the bridge.
    #[instrument(skip(self, transaction, sender, cancel), fields(txid = %transaction.id))]
    pub async fn dispatch(
        &mut self,
        transaction: UnminedTx,
        sender: Option<PeerId>,
        kind: CheckKind,
        mut cancel: oneshot::Receiver<()>,
    ) -> Result<(), BoxError> {
        let request = Request::CheckTx {
            transaction: transaction.clone(),
            kind,
        };

        let call = self.application.ready().await?.call(request);

        let fut = async move {
            tokio::select! {
                _ = &mut cancel => {
                    tracing::trace!("check canceled prior to completion");
                    metrics::counter!("mempool.canceled.checks.total").increment(1);
                    CompletedCheck {
                        transaction,
                        sender,
                        kind,
                        result: Err(MempoolError::Canceled.into()),
                    }
                }
                result = call => CompletedCheck {
                    transaction,
                    sender,
                    kind,
                    result,
                },
            }
        }
        .in_current_span();

        self.pending.push_back(fut.boxed());

        tracing::trace!(
            queue_len = self.pending.len(),
            ?kind,
            "dispatched transaction check to the application"
        );

        Ok(())
    }
}
