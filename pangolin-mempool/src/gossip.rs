//! Per-peer transaction gossip.
//!
//! Every connected peer gets its own broadcast task holding a cursor into
//! the mempool. The task walks the pool in admission order and forwards
//! each transaction the peer has not already sent us, so gossip to a single
//! peer is ordered consistently with admission, and a slow peer never
//! blocks the others.
//!
//! Cursors hold admission sequence numbers, not references: when the
//! transaction at a cursor is removed from the pool, the cursor
//! transparently skips to the next live transaction.

use std::{collections::HashMap, time::Duration};

use tokio::{task::JoinHandle, time::sleep};
use tower::{Service, ServiceExt};
use tracing::Instrument;

use pangolin_chain::transaction::UnminedTx;

use crate::{BoxError, Mempool, PeerId};


/// A request to the peer transport.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Request {
    /// Send a full transaction to a peer.
    PushTransaction {
        /// The peer to send to.
        peer: PeerId,
        /// The transaction to send.
        transaction: UnminedTx,
    },
}

/// A response from the peer transport.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Response {
    /// The peer acknowledged the transaction.
    Sent,
}

/// Peer connection lifecycle events, delivered by the peer transport.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PeerEvent {
    /// A peer connected; start gossiping to it.
    Joined(PeerId),

    /// A peer disconnected; stop its broadcast task.
    Left(PeerId),
}

/// The delay before resending a transaction after a transport failure.
///
/// Failed sends are retried without advancing the peer's cursor, so this
/// bounds how fast a broken connection is retried.
const SEND_RETRY_DELAY: Duration = Duration::from_millis(100);

/// The per-peer transaction broadcaster.
///
/// Spawns one broadcast task per connected peer, and stops it when the peer
/// leaves.
pub struct GossipEngine<ZN> {
    /// The mempool to broadcast from.
    mempool: Mempool,

    /// The peer transport transactions are sent through.
    network: ZN,

    /// Peer connection events from the transport.
    peer_events: tokio::sync::mpsc::Receiver<PeerEvent>,

    /// The running broadcast tasks, by peer.
    peer_tasks: HashMap<PeerId, JoinHandle<()>>,
}

impl<ZN> GossipEngine<ZN>
where
    ZN: Service<Request, Response = Response, Error = BoxError> + Send + Clone + 'static,
    ZN::Future: Send,
{
    /// Spawn an asynchronous task to run the gossip engine.
    ///
    /// The task ends when the peer event channel closes, or immediately if
    /// gossip is disabled by [`Config::broadcast`](crate::Config::broadcast).
    pub fn spawn(
        mempool: Mempool,
        network: ZN,
        peer_events: tokio::sync::mpsc::Receiver<PeerEvent>,
    ) -> JoinHandle<Result<(), BoxError>> {
        let engine = GossipEngine {
            mempool,
            network,
            peer_events,
            peer_tasks: HashMap::new(),
        };

        tokio::spawn(engine.run().in_current_span())
    }

    /// Tracks peer arrivals and departures, running one broadcast task per
    /// connected peer.
    async fn run(mut self) -> Result<(), BoxError> {
        if !self.mempool.config().broadcast {
            info!("transaction gossip is disabled by configuration");
            return Ok(());
        }

        info!("initializing transaction gossip task");

        while let Some(event) = self.peer_events.recv().await {
            match event {
                PeerEvent::Joined(peer) => {
                    debug!(%peer, "starting transaction broadcast for new peer");

                    let task = tokio::spawn(
                        broadcast_to_peer(self.mempool.clone(), self.network.clone(), peer)
                            .in_current_span(),
                    );

                    if let Some(previous) = self.peer_tasks.insert(peer, task) {
                        previous.abort();
                    }
                }
                PeerEvent::Left(peer) => {
                    debug!(%peer, "stopping transaction broadcast for departed peer");

                    if let Some(task) = self.peer_tasks.remove(&peer) {
                        task.abort();
                    }
                }
            }
        }

        debug!("peer event channel closed; stopping transaction gossip");
        for (_, task) in self.peer_tasks.drain() {
            task.abort();
        }

        Ok(())
    }
}

/// Walks the mempool in admission order and forwards each transaction to
/// `peer`, skipping transactions the peer sent us.
///
/// Waits at the end of the pool until a new transaction is admitted. Runs
/// until the mempool closes or the task is aborted by the engine.
#[instrument(skip(mempool, network), fields(peer = %peer))]
async fn broadcast_to_peer<ZN>(mempool: Mempool, mut network: ZN, peer: PeerId)
where
    ZN: Service<Request, Response = Response, Error = BoxError> + Send + Clone + 'static,
    ZN::Future: Send,
{
    let mut changes = mempool.changes();
    let mut cursor = 0;

    loop {
        if mempool.is_closed() {
            debug!("mempool has closed; draining transaction broadcast");
            return;
        }

        match mempool.next_after(cursor, peer) {
            // Caught up with the pool: wait for the next admission.
            None => {
                if changes.changed().await.is_err() {
                    // The mempool was dropped entirely.
                    return;
                }
            }

            // The peer sent us this transaction; do not echo it back.
            Some((sequence, None)) => {
                trace!(sequence, "skipping transaction received from this peer");
                cursor = sequence;
            }

            Some((sequence, Some(transaction))) => {
                let request = Request::PushTransaction { peer, transaction };

                let result = match network.ready().await {
                    Ok(network) => network.call(request).await,
                    Err(error) => Err(error),
                };

                match result {
                    Ok(_) => {
                        metrics::counter!("mempool.gossiped.transactions.total").increment(1);
                        trace!(sequence, "sent mempool transaction to peer");
                        cursor = sequence;
                    }
                    Err(error) => {
                        // Retry the same transaction after a bounded delay.
                        debug!(%error, sequence, "failed to send mempool transaction to peer");
                        sleep(SEND_RETRY_DELAY).await;
                    }
                }
            }
        }
    }
}
