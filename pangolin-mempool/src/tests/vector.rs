//! Fixed test vectors for the mempool core.

use std::sync::Arc;

use color_eyre::Report;
use tokio::task::JoinHandle;

use pangolin_chain::{block::Height, transaction::UnminedTx};

use crate::{
    checks::ExecTxResult,
    mempool::{self, Mempool, PostCheckFn, PreCheckFn},
    tests::{invalid_transactions, unmined_transactions, MockApplication},
    BoxError, Config, MempoolError, NopMempool, PeerId,
};

/// Starts a mempool over a fresh mock application.
fn setup(config: Config) -> (Mempool, MockApplication, JoinHandle<Result<(), BoxError>>) {
    let application = MockApplication::new();
    let (mempool, pump_task) = mempool::init(config, application.clone());

    (mempool, application, pump_task)
}

/// Submits transactions and waits until their verdicts have been applied.
async fn check_and_settle(mempool: &Mempool, transactions: &[UnminedTx]) -> Result<(), Report> {
    for tx in transactions {
        mempool.check_tx(tx.clone(), None)?;
    }
    mempool.flush_application().await?;

    Ok(())
}

/// Reconciles a committed block where every transaction executed
/// successfully.
fn update_with_valid_results(
    mempool: &Mempool,
    height: u64,
    committed: &[UnminedTx],
) -> Result<(), MempoolError> {
    let results = vec![ExecTxResult::default(); committed.len()];

    let mut guard = mempool.lock();
    guard.update(Height(height), committed, &results, None, None)
}

#[tokio::test]
async fn mempool_basic_admission_and_size_cap() -> Result<(), Report> {
    let config = Config {
        size: 2,
        ..Config::default()
    };
    let (mempool, _application, _pump_task) = setup(config);
    let txs = unmined_transactions(3, 32);

    check_and_settle(&mempool, &txs[..2]).await?;

    assert_eq!(mempool.size(), 2);
    assert_eq!(mempool.size_bytes(), 64);
    assert!(mempool.contains(&txs[0].id));
    assert!(mempool.contains(&txs[1].id));
    assert!(mempool.seen_contains(&txs[0].id));
    assert!(mempool.seen_contains(&txs[1].id));

    // The pool is at capacity: the next submission fails synchronously and
    // changes nothing.
    let full = mempool.check_tx(txs[2].clone(), None);
    assert_eq!(
        full,
        Err(MempoolError::Full {
            tx_count: 2,
            tx_bytes: 64,
        })
    );
    assert_eq!(mempool.size(), 2);
    assert!(!mempool.seen_contains(&txs[2].id));

    Ok(())
}

#[tokio::test]
async fn mempool_rejects_oversized_transactions() -> Result<(), Report> {
    let config = Config {
        max_tx_bytes: 16,
        ..Config::default()
    };
    let (mempool, _application, _pump_task) = setup(config);
    let txs = unmined_transactions(1, 17);

    let too_large = mempool.check_tx(txs[0].clone(), None);

    assert_eq!(
        too_large,
        Err(MempoolError::TooLarge {
            size: 17,
            limit: 16,
        })
    );
    assert!(!mempool.seen_contains(&txs[0].id));

    Ok(())
}

#[tokio::test]
async fn duplicate_from_peer_records_sender() -> Result<(), Report> {
    let (mempool, _application, _pump_task) = setup(Config::default());
    let txs = unmined_transactions(1, 32);

    check_and_settle(&mempool, &txs).await?;

    // A locally submitted transaction starts with no senders.
    assert_eq!(mempool.senders_of(&txs[0].id), Some(Vec::new()));

    // The duplicate fails, but the peer is recorded as already holding the
    // transaction.
    let duplicate = mempool.check_tx(txs[0].clone(), Some(PeerId(1)));
    assert_eq!(duplicate, Err(MempoolError::InCache));
    assert_eq!(mempool.senders_of(&txs[0].id), Some(vec![PeerId(1)]));

    // Another peer extends the sender set.
    let duplicate = mempool.check_tx(txs[0].clone(), Some(PeerId(2)));
    assert_eq!(duplicate, Err(MempoolError::InCache));
    assert_eq!(
        mempool.senders_of(&txs[0].id),
        Some(vec![PeerId(1), PeerId(2)]),
    );

    // The pool itself is unchanged.
    assert_eq!(mempool.size(), 1);

    Ok(())
}

#[tokio::test]
async fn application_rejection_discards_and_uncaches() -> Result<(), Report> {
    let (mempool, _application, _pump_task) = setup(Config::default());
    let txs = invalid_transactions(1, 32);

    check_and_settle(&mempool, &txs).await?;

    assert_eq!(mempool.size(), 0);
    // With the default cache policy the transaction is reconsiderable:
    // submitting it again validates it again instead of failing `InCache`.
    assert!(!mempool.seen_contains(&txs[0].id));
    mempool.check_tx(txs[0].clone(), None)?;
    mempool.flush_application().await?;
    assert_eq!(mempool.size(), 0);

    Ok(())
}

#[tokio::test]
async fn invalid_transactions_stay_cached_when_configured() -> Result<(), Report> {
    let config = Config {
        keep_invalid_txs_in_cache: true,
        ..Config::default()
    };
    let (mempool, _application, _pump_task) = setup(config);
    let txs = invalid_transactions(1, 32);

    check_and_settle(&mempool, &txs).await?;

    assert_eq!(mempool.size(), 0);
    assert!(mempool.seen_contains(&txs[0].id));

    // The cached rejection suppresses revalidation.
    let duplicate = mempool.check_tx(txs[0].clone(), None);
    assert_eq!(duplicate, Err(MempoolError::InCache));

    Ok(())
}

#[tokio::test]
async fn valid_but_full_discards_and_always_uncaches() -> Result<(), Report> {
    let config = Config {
        size: 1,
        // Even the invalid-tx retention policy must not keep this entry.
        keep_invalid_txs_in_cache: true,
        ..Config::default()
    };
    let (mempool, application, _pump_task) = setup(config);
    let txs = unmined_transactions(2, 32);

    // Both submissions pass the pre-admission checks while the pool is
    // still empty; only one can be admitted when the verdicts land.
    application.pause();
    mempool.check_tx(txs[0].clone(), None)?;
    mempool.check_tx(txs[1].clone(), None)?;
    application.resume();
    mempool.flush_application().await?;

    assert_eq!(mempool.size(), 1);
    assert!(mempool.contains(&txs[0].id));
    assert!(!mempool.contains(&txs[1].id));

    // The discarded transaction must stay reconsiderable later.
    assert!(!mempool.seen_contains(&txs[1].id));
    assert!(mempool.seen_contains(&txs[0].id));

    Ok(())
}

#[tokio::test]
async fn update_removes_committed_and_rechecks_survivors() -> Result<(), Report> {
    let (mempool, application, _pump_task) = setup(Config::default());
    let txs = unmined_transactions(3, 32);

    check_and_settle(&mempool, &txs).await?;
    assert_eq!(mempool.size(), 3);

    // Commit the first two transactions.
    update_with_valid_results(&mempool, 10, &txs[..2])?;

    assert_eq!(mempool.size(), 1);
    assert!(!mempool.contains(&txs[0].id));
    assert!(!mempool.contains(&txs[1].id));
    assert!(mempool.contains(&txs[2].id));

    // Valid committed transactions stay cached.
    assert!(mempool.seen_contains(&txs[0].id));
    assert!(mempool.seen_contains(&txs[1].id));
    assert!(mempool.seen_contains(&txs[2].id));

    // The survivor was submitted for revalidation.
    assert_eq!(mempool.pending_rechecks(), 1);
    mempool.flush_application().await?;
    assert_eq!(mempool.pending_rechecks(), 0);
    assert!(mempool.contains(&txs[2].id));

    let rechecks = application
        .answered()
        .into_iter()
        .filter(|request| {
            let crate::checks::Request::CheckTx { kind, .. } = request;
            *kind == crate::checks::CheckKind::Recheck
        })
        .count();
    assert_eq!(rechecks, 1);

    Ok(())
}

#[tokio::test]
async fn recheck_invalidates_survivor() -> Result<(), Report> {
    let (mempool, application, _pump_task) = setup(Config::default());
    let txs = unmined_transactions(3, 32);

    check_and_settle(&mempool, &txs).await?;

    // The survivor fails its post-commit revalidation.
    application.set_recheck_code(txs[2].id, 1);
    update_with_valid_results(&mempool, 10, &txs[..2])?;
    mempool.flush_application().await?;

    assert_eq!(mempool.size(), 0);
    assert!(mempool.seen_contains(&txs[0].id));
    assert!(mempool.seen_contains(&txs[1].id));
    // Default policy drops invalidated transactions from the cache.
    assert!(!mempool.seen_contains(&txs[2].id));

    Ok(())
}

#[tokio::test]
async fn recheck_invalidated_survivor_stays_cached_when_configured() -> Result<(), Report> {
    let config = Config {
        keep_invalid_txs_in_cache: true,
        ..Config::default()
    };
    let (mempool, application, _pump_task) = setup(config);
    let txs = unmined_transactions(3, 32);

    check_and_settle(&mempool, &txs).await?;

    application.set_recheck_code(txs[2].id, 1);
    update_with_valid_results(&mempool, 10, &txs[..2])?;
    mempool.flush_application().await?;

    assert_eq!(mempool.size(), 0);
    assert!(mempool.seen_contains(&txs[2].id));

    Ok(())
}

#[tokio::test]
async fn stale_first_time_response_is_not_admitted() -> Result<(), Report> {
    let (mempool, application, _pump_task) = setup(Config::default());
    let txs = unmined_transactions(1, 32);

    // The commit lands before the application replies.
    application.pause();
    mempool.check_tx(txs[0].clone(), None)?;
    update_with_valid_results(&mempool, 5, &txs)?;

    application.resume();
    mempool.flush_application().await?;

    // The late verdict must not resurrect the committed transaction.
    assert_eq!(mempool.size(), 0);
    assert!(!mempool.contains(&txs[0].id));
    // The cache state follows the commit, not the stale response.
    assert!(mempool.seen_contains(&txs[0].id));
    assert_eq!(mempool.in_flight_checks(), 0);

    Ok(())
}

#[tokio::test]
async fn fresh_admissions_are_suspended_during_recheck() -> Result<(), Report> {
    let (mempool, application, _pump_task) = setup(Config::default());
    let txs = unmined_transactions(2, 32);

    check_and_settle(&mempool, &txs[..1]).await?;

    // Submit a fresh transaction, then start a recheck cycle before its
    // verdict arrives.
    application.pause();
    mempool.check_tx(txs[1].clone(), None)?;
    update_with_valid_results(&mempool, 5, &[])?;
    assert_eq!(mempool.pending_rechecks(), 1);

    application.resume();
    mempool.flush_application().await?;

    // The fresh verdict arrived while the cycle was in flight, so it was
    // dropped; the transaction stays cached for later re-presentation.
    assert!(!mempool.contains(&txs[1].id));
    assert!(mempool.seen_contains(&txs[1].id));

    // The recheck cycle itself completed and kept the survivor.
    assert_eq!(mempool.pending_rechecks(), 0);
    assert!(mempool.contains(&txs[0].id));

    Ok(())
}

#[tokio::test]
async fn superseding_update_restarts_the_recheck_cycle() -> Result<(), Report> {
    let (mempool, application, _pump_task) = setup(Config::default());
    let txs = unmined_transactions(1, 32);

    check_and_settle(&mempool, &txs).await?;

    // Two commits land before the first cycle's recheck can answer.
    application.pause();
    update_with_valid_results(&mempool, 5, &[])?;
    assert_eq!(mempool.pending_rechecks(), 1);
    update_with_valid_results(&mempool, 6, &[])?;
    assert_eq!(mempool.pending_rechecks(), 1);

    application.resume();
    mempool.flush_application().await?;

    // Only the second cycle's response counts against the counter; the
    // survivor is retained and fresh admissions are re-enabled.
    assert_eq!(mempool.pending_rechecks(), 0);
    assert!(mempool.contains(&txs[0].id));
    assert_eq!(mempool.in_flight_checks(), 0);

    Ok(())
}

#[tokio::test]
async fn txs_available_re_arms_when_the_pool_drains() -> Result<(), Report> {
    let (mempool, _application, _pump_task) = setup(Config::default());
    let txs = unmined_transactions(2, 32);

    let mut txs_available = mempool.enable_txs_available();

    check_and_settle(&mempool, &txs[..1]).await?;
    txs_available.try_recv().expect("signal after first admission");

    // Draining the pool outside a commit re-arms the edge trigger.
    mempool.remove_tx_by_key(&txs[0].id)?;
    assert_eq!(mempool.size(), 0);

    check_and_settle(&mempool, &txs[1..]).await?;
    txs_available
        .try_recv()
        .expect("signal after the pool refills");
    assert!(txs_available.try_recv().is_err());

    Ok(())
}

#[tokio::test]
async fn update_is_idempotent() -> Result<(), Report> {
    let (mempool, _application, _pump_task) = setup(Config::default());
    let txs = unmined_transactions(2, 32);

    check_and_settle(&mempool, &txs).await?;

    update_with_valid_results(&mempool, 7, &txs[..1])?;
    mempool.flush_application().await?;

    update_with_valid_results(&mempool, 7, &txs[..1])?;
    mempool.flush_application().await?;

    assert_eq!(mempool.size(), 1);
    assert!(!mempool.contains(&txs[0].id));
    assert!(mempool.contains(&txs[1].id));
    assert!(mempool.seen_contains(&txs[0].id));

    Ok(())
}

#[tokio::test]
async fn update_uncaches_failed_committed_transactions() -> Result<(), Report> {
    let (mempool, _application, _pump_task) = setup(Config::default());
    let txs = unmined_transactions(2, 32);

    check_and_settle(&mempool, &txs).await?;

    // The first committed transaction failed execution, the second
    // succeeded.
    let results = vec![ExecTxResult { code: 1 }, ExecTxResult::default()];
    {
        let mut guard = mempool.lock();
        guard.update(Height(3), &txs, &results, None, None)?;
    }

    assert_eq!(mempool.size(), 0);
    assert!(!mempool.seen_contains(&txs[0].id));
    assert!(mempool.seen_contains(&txs[1].id));

    Ok(())
}

#[tokio::test]
async fn reap_returns_admissions_in_order() -> Result<(), Report> {
    let (mempool, _application, _pump_task) = setup(Config::default());
    let txs = unmined_transactions(3, 10);

    check_and_settle(&mempool, &txs).await?;

    let guard = mempool.lock();

    assert_eq!(guard.reap(-1, -1), txs);
    assert_eq!(guard.reap(20, -1), &txs[..2]);
    // Each mock verdict reports one gas unit per transaction.
    assert_eq!(guard.reap(-1, 1), &txs[..1]);
    assert_eq!(guard.reap(0, -1), Vec::new());

    // Reap never removes anything.
    assert_eq!(guard.size(), 3);

    Ok(())
}

#[tokio::test]
async fn txs_available_signals_once_per_transition() -> Result<(), Report> {
    let (mempool, _application, _pump_task) = setup(Config::default());
    let txs = unmined_transactions(3, 32);

    let mut txs_available = mempool.enable_txs_available();

    // The first admission signals.
    check_and_settle(&mempool, &txs[..1]).await?;
    txs_available.try_recv().expect("one signal after admission");

    // Further admissions in the same commit interval do not.
    check_and_settle(&mempool, &txs[1..2]).await?;
    assert!(txs_available.try_recv().is_err());

    // A commit with survivors re-arms the signal once the recheck cycle
    // completes.
    update_with_valid_results(&mempool, 2, &txs[..1])?;
    mempool.flush_application().await?;
    txs_available.try_recv().expect("one signal after commit");
    assert!(txs_available.try_recv().is_err());

    Ok(())
}

#[tokio::test]
async fn txs_available_enabled_after_admissions() -> Result<(), Report> {
    let (mempool, _application, _pump_task) = setup(Config::default());
    let txs = unmined_transactions(3, 32);

    // Admissions before the channel is enabled are not signaled.
    check_and_settle(&mempool, &txs[..1]).await?;

    let mut txs_available = mempool.enable_txs_available();
    assert!(txs_available.try_recv().is_err());

    // The next admission still produces exactly one signal.
    check_and_settle(&mempool, &txs[1..]).await?;
    txs_available.try_recv().expect("one signal after admission");
    assert!(txs_available.try_recv().is_err());

    Ok(())
}

#[tokio::test]
async fn pre_check_rejects_submissions() -> Result<(), Report> {
    let (mempool, _application, _pump_task) = setup(Config::default());
    let txs = unmined_transactions(2, 32);

    // Install a predicate that rejects the second transaction.
    let rejected_id = txs[1].id;
    let pre_check: PreCheckFn = Arc::new(move |tx| {
        if tx.id == rejected_id {
            Err("payload is malformed".into())
        } else {
            Ok(())
        }
    });
    {
        let mut guard = mempool.lock();
        guard.update(Height(1), &[], &[], Some(pre_check), None)?;
    }
    mempool.flush_application().await?;

    check_and_settle(&mempool, &txs[..1]).await?;
    assert!(mempool.contains(&txs[0].id));

    let rejected = mempool.check_tx(txs[1].clone(), None);
    assert_eq!(
        rejected,
        Err(MempoolError::PreCheckFailed(
            "payload is malformed".to_string(),
        )),
    );
    assert!(!mempool.contains(&txs[1].id));
    // Like other rejected sightings, the id stays cached.
    assert!(mempool.seen_contains(&txs[1].id));

    Ok(())
}

#[tokio::test]
async fn pre_check_removes_survivors_before_recheck() -> Result<(), Report> {
    let (mempool, _application, _pump_task) = setup(Config::default());
    let txs = unmined_transactions(2, 32);

    check_and_settle(&mempool, &txs).await?;

    // The new chain state makes the first survivor unacceptable.
    let rejected_id = txs[0].id;
    let pre_check: PreCheckFn = Arc::new(move |tx| {
        if tx.id == rejected_id {
            Err("no longer valid".into())
        } else {
            Ok(())
        }
    });
    {
        let mut guard = mempool.lock();
        guard.update(Height(4), &[], &[], Some(pre_check), None)?;
    }
    mempool.flush_application().await?;

    assert!(!mempool.contains(&txs[0].id));
    assert!(!mempool.seen_contains(&txs[0].id));
    assert!(mempool.contains(&txs[1].id));

    Ok(())
}

#[tokio::test]
async fn post_check_failure_invalidates_on_recheck() -> Result<(), Report> {
    let (mempool, _application, _pump_task) = setup(Config::default());
    let txs = unmined_transactions(2, 32);

    check_and_settle(&mempool, &txs).await?;

    // The post-check predicate rejects the first survivor's revalidation.
    let rejected_id = txs[0].id;
    let post_check: PostCheckFn = Arc::new(move |tx, _response| {
        if tx.id == rejected_id {
            Err("gas estimate out of bounds".into())
        } else {
            Ok(())
        }
    });
    {
        let mut guard = mempool.lock();
        guard.update(Height(4), &[], &[], None, Some(post_check))?;
    }
    mempool.flush_application().await?;

    assert!(!mempool.contains(&txs[0].id));
    assert!(mempool.contains(&txs[1].id));
    assert_eq!(mempool.pending_rechecks(), 0);

    Ok(())
}

#[tokio::test]
async fn recheck_disabled_skips_revalidation() -> Result<(), Report> {
    let config = Config {
        recheck: false,
        ..Config::default()
    };
    let (mempool, application, _pump_task) = setup(config);
    let txs = unmined_transactions(2, 32);

    let mut txs_available = mempool.enable_txs_available();

    check_and_settle(&mempool, &txs).await?;
    txs_available.try_recv().expect("signal after admission");

    update_with_valid_results(&mempool, 2, &txs[..1])?;
    mempool.flush_application().await?;

    // No rechecks were dispatched, and the survivor is signaled directly.
    assert_eq!(mempool.pending_rechecks(), 0);
    assert!(mempool.contains(&txs[1].id));
    txs_available.try_recv().expect("signal after commit");

    let rechecks = application
        .answered()
        .into_iter()
        .filter(|request| {
            let crate::checks::Request::CheckTx { kind, .. } = request;
            *kind == crate::checks::CheckKind::Recheck
        })
        .count();
    assert_eq!(rechecks, 0);

    Ok(())
}

#[tokio::test]
async fn remove_tx_by_key_leaves_the_cache_alone() -> Result<(), Report> {
    let (mempool, _application, _pump_task) = setup(Config::default());
    let txs = unmined_transactions(1, 32);

    check_and_settle(&mempool, &txs).await?;

    mempool.remove_tx_by_key(&txs[0].id)?;
    assert_eq!(mempool.size(), 0);
    assert!(mempool.seen_contains(&txs[0].id));

    let missing = mempool.remove_tx_by_key(&txs[0].id);
    assert_eq!(missing, Err(MempoolError::NotInMempool));

    Ok(())
}

#[tokio::test]
async fn flush_empties_pool_and_cache() -> Result<(), Report> {
    let (mempool, _application, _pump_task) = setup(Config::default());
    let txs = unmined_transactions(2, 32);

    check_and_settle(&mempool, &txs).await?;
    assert_eq!(mempool.size(), 2);

    mempool.flush();

    assert_eq!(mempool.size(), 0);
    assert_eq!(mempool.size_bytes(), 0);
    assert!(!mempool.seen_contains(&txs[0].id));

    // Flushed transactions can be resubmitted.
    check_and_settle(&mempool, &txs[..1]).await?;
    assert!(mempool.contains(&txs[0].id));

    Ok(())
}

#[tokio::test]
async fn application_failure_closes_the_mempool() -> Result<(), Report> {
    let (mempool, application, pump_task) = setup(Config::default());
    let txs = unmined_transactions(2, 32);

    application.set_unavailable();
    mempool.check_tx(txs[0].clone(), None)?;

    // The pump shuts down and reports the transport failure.
    let pump_result = pump_task.await.expect("response pump must not panic");
    assert!(pump_result.is_err());

    assert!(mempool.is_closed());
    assert_eq!(mempool.size(), 0);
    assert_eq!(mempool.in_flight_checks(), 0);

    // Further submissions are refused.
    let refused = mempool.check_tx(txs[1].clone(), None);
    assert_eq!(refused, Err(MempoolError::AppUnavailable));

    Ok(())
}

#[tokio::test]
async fn nop_mempool_accepts_everything_and_stores_nothing() -> Result<(), Report> {
    let mempool = NopMempool::new();
    let txs = unmined_transactions(2, 32);

    mempool.check_tx(txs[0].clone(), None)?;
    mempool.check_tx(txs[1].clone(), Some(PeerId(1)))?;

    assert_eq!(mempool.size(), 0);
    assert_eq!(mempool.size_bytes(), 0);
    assert_eq!(mempool.reap(-1, -1), Vec::new());

    mempool.update(Height(1), &txs, &[], None, None)?;
    mempool.remove_tx_by_key(&txs[0].id)?;
    mempool.flush();
    mempool.flush_application().await?;

    let mut txs_available = mempool.enable_txs_available();
    assert!(txs_available.try_recv().is_err());

    Ok(())
}
