//! Sync orchestrator integration tests
//!
//! Covers:
//! - Single pass outcomes (success, repeated failure, rejection, panic)
//! - Debounce collapsing and single-flight guarantees
//! - Trigger sources (startup, connectivity, foreground)
//! - Cache invalidation scope

mod common;

use std::collections::BTreeSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{date, Behavior, Harness, MockRemote};
use sleek_sync::{
    AppLifecycleProvider, AppState, ChannelLifecycle, CheckinPayload, Domain, FailurePolicy,
    NetworkState, NutritionDayPayload, OrchestratorSettings, PassOutcome, RefetchScope,
    SkipReason, StoreOptions, SyncTrigger,
};

// =============================================================================
// Single pass
// =============================================================================

#[tokio::test]
async fn test_checkin_flushed_on_first_pass() {
    let h = Harness::new(MockRemote::new(Behavior::Succeed)).await;
    h.store
        .enqueue(CheckinPayload::new(date(2024, 1, 15)).with_weight(82.0))
        .await
        .unwrap();
    let errors_before = h.store.status().await.sync_errors;

    let outcome = h.orchestrator.run_pass_now().await;

    let PassOutcome::Completed(report) = outcome else {
        panic!("expected a completed pass");
    };
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 0);

    assert!(h.store.list(Domain::Checkins).await.is_empty());
    let status = h.store.status().await;
    assert!(status.last_sync_at.is_some());
    assert!(!status.is_syncing);
    assert_eq!(status.sync_errors, errors_before);
    assert_eq!(h.remote.call_count(), 1);
}

#[tokio::test]
async fn test_failing_entry_dropped_after_three_passes() {
    let h = Harness::new(MockRemote::new(Behavior::FailTransient)).await;
    let id = h
        .store
        .enqueue(NutritionDayPayload::new(date(2024, 1, 16)).with_calories(1800))
        .await
        .unwrap();

    for expected_attempts in 1..=2 {
        h.orchestrator.run_pass_now().await;
        let queued = h.store.list(Domain::NutritionDays).await;
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].attempts, expected_attempts);
    }

    let outcome = h.orchestrator.run_pass_now().await;
    let PassOutcome::Completed(report) = outcome else {
        panic!("expected a completed pass");
    };
    assert_eq!(report.dropped, 1);

    assert!(h.store.list(Domain::NutritionDays).await.is_empty());
    let status = h.store.status().await;
    assert!(status.sync_errors.iter().any(|e| e.contains(&id)));
    assert!(status.sync_errors.len() <= 10);
    assert!(!status.is_syncing);
    assert_eq!(h.remote.call_count(), 3);
}

#[tokio::test]
async fn test_one_failure_does_not_abort_batch() {
    let remote = MockRemote::new(Behavior::Succeed);
    remote.set_behavior(Domain::Checkins, Behavior::FailTransient);
    let h = Harness::new(remote).await;

    h.store.enqueue(CheckinPayload::new(date(2024, 1, 1))).await.unwrap();
    h.store.enqueue(CheckinPayload::new(date(2024, 1, 2))).await.unwrap();
    h.store.enqueue(NutritionDayPayload::new(date(2024, 1, 1))).await.unwrap();
    h.store.enqueue(NutritionDayPayload::new(date(2024, 1, 2))).await.unwrap();

    let PassOutcome::Completed(report) = h.orchestrator.run_pass_now().await else {
        panic!("expected a completed pass");
    };
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 2);
    assert_eq!(h.remote.call_count(), 4);

    let checkins = h.store.list(Domain::Checkins).await;
    assert_eq!(checkins.len(), 2);
    assert!(checkins.iter().all(|m| m.attempts == 1));
    assert!(h.store.list(Domain::NutritionDays).await.is_empty());
}

#[tokio::test]
async fn test_fifo_order_within_domain() {
    let h = Harness::new(MockRemote::new(Behavior::Succeed)).await;
    for d in [3, 1, 2] {
        h.store.enqueue(CheckinPayload::new(date(2024, 2, d))).await.unwrap();
    }

    h.orchestrator.run_pass_now().await;

    let sent: Vec<String> = h
        .remote
        .calls
        .lock()
        .unwrap()
        .iter()
        .map(|p| p.describe())
        .collect();
    assert_eq!(
        sent,
        vec!["check-in 2024-02-03", "check-in 2024-02-01", "check-in 2024-02-02"]
    );
}

#[tokio::test]
async fn test_empty_queue_pass_is_noop() {
    let h = Harness::new(MockRemote::new(Behavior::Succeed)).await;

    for _ in 0..2 {
        let outcome = h.orchestrator.run_pass_now().await;
        assert_eq!(outcome, PassOutcome::Skipped(SkipReason::EmptyQueue));
        let status = h.store.status().await;
        assert!(!status.is_syncing);
        assert_eq!(status.last_sync_at, None);
        assert!(status.sync_errors.is_empty());
    }
    assert_eq!(h.orchestrator.passes_started(), 0);
    assert!(h.cache.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_offline_skips_without_state_change() {
    let h = Harness::new(MockRemote::new(Behavior::Succeed)).await;
    h.store.enqueue(CheckinPayload::new(date(2024, 1, 15))).await.unwrap();

    h.connectivity.set(NetworkState {
        connected: true,
        internet_reachable: false,
    });
    assert_eq!(
        h.orchestrator.run_pass_now().await,
        PassOutcome::Skipped(SkipReason::Offline)
    );
    assert_eq!(h.remote.call_count(), 0);
    assert_eq!(h.store.list(Domain::Checkins).await[0].attempts, 0);
    assert_eq!(h.store.status().await.last_sync_at, None);
}

#[tokio::test]
async fn test_panicking_client_does_not_wedge_queue() {
    let h = Harness::new(MockRemote::new(Behavior::Panic)).await;
    h.store.enqueue(CheckinPayload::new(date(2024, 1, 15))).await.unwrap();

    let outcome = h.orchestrator.run_pass_now().await;
    assert!(matches!(outcome, PassOutcome::Aborted(ref msg) if msg.contains("remote client bug")));

    let status = h.store.status().await;
    assert!(!status.is_syncing);
    assert_eq!(status.last_sync_at, None);
    assert_eq!(h.store.pending_count().await, 1);

    // The queue is usable again once the client behaves
    h.remote.set_behavior(Domain::Checkins, Behavior::Succeed);
    assert!(matches!(
        h.orchestrator.run_pass_now().await,
        PassOutcome::Completed(_)
    ));
    assert_eq!(h.store.pending_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_persistence_failure_mid_pass_is_isolated() {
    let h = Harness::new(MockRemote::with_delay(
        Behavior::Succeed,
        Duration::from_secs(5),
    ))
    .await;
    h.store.enqueue(CheckinPayload::new(date(2024, 1, 15))).await.unwrap();

    let orchestrator = h.orchestrator.clone();
    let pass = tokio::spawn(async move { orchestrator.run_pass_now().await });

    // Break the disk while the remote call is in flight
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(h.store.indicator().is_syncing);
    h.kv.set_failing(true);

    let outcome = pass.await.unwrap();
    assert!(matches!(outcome, PassOutcome::Completed(_)));

    // The remote accepted it but the dequeue was not persisted: it stays
    // queued for an idempotent resend
    assert_eq!(h.store.pending_count().await, 1);
    assert!(!h.store.status().await.is_syncing);
    assert!(!h.store.indicator().is_syncing);
}

// =============================================================================
// Failure policy
// =============================================================================

#[tokio::test]
async fn test_uniform_policy_retries_rejections() {
    let h = Harness::new(MockRemote::new(Behavior::Reject(422))).await;
    h.store.enqueue(CheckinPayload::new(date(2024, 1, 15))).await.unwrap();

    h.orchestrator.run_pass_now().await;
    let queued = h.store.list(Domain::Checkins).await;
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].attempts, 1);
}

#[tokio::test]
async fn test_drop_rejections_policy() {
    let h = Harness::with_settings(
        MockRemote::new(Behavior::Reject(422)),
        StoreOptions::default(),
        OrchestratorSettings {
            failure_policy: FailurePolicy::DropRejections,
            ..Default::default()
        },
    )
    .await;
    h.remote.set_behavior(Domain::NutritionDays, Behavior::Reject(503));
    h.store.enqueue(CheckinPayload::new(date(2024, 1, 15))).await.unwrap();
    h.store.enqueue(NutritionDayPayload::new(date(2024, 1, 15))).await.unwrap();

    let PassOutcome::Completed(report) = h.orchestrator.run_pass_now().await else {
        panic!("expected a completed pass");
    };
    assert_eq!(report.failed, 2);
    assert_eq!(report.dropped, 1);

    // 422 is permanent, 503 is retried
    assert!(h.store.list(Domain::Checkins).await.is_empty());
    assert_eq!(h.store.list(Domain::NutritionDays).await[0].attempts, 1);
}

// =============================================================================
// Cache invalidation
// =============================================================================

#[tokio::test]
async fn test_invalidates_only_domains_with_successes() {
    let remote = MockRemote::new(Behavior::Succeed);
    remote.set_behavior(Domain::NutritionDays, Behavior::FailTransient);
    let h = Harness::new(remote).await;

    h.store.enqueue(CheckinPayload::new(date(2024, 1, 15))).await.unwrap();
    h.store.enqueue(NutritionDayPayload::new(date(2024, 1, 15))).await.unwrap();
    h.orchestrator.run_pass_now().await;

    let requests = h.cache.requests.lock().unwrap().clone();
    let expected: BTreeSet<Domain> = [Domain::Checkins].into_iter().collect();
    assert_eq!(requests, vec![(expected, RefetchScope::ActiveOnly)]);
}

#[tokio::test]
async fn test_no_invalidation_when_everything_fails() {
    let h = Harness::new(MockRemote::new(Behavior::FailTransient)).await;
    h.store.enqueue(CheckinPayload::new(date(2024, 1, 15))).await.unwrap();

    h.orchestrator.run_pass_now().await;
    assert!(h.cache.requests.lock().unwrap().is_empty());
}

// =============================================================================
// Debounce and single flight
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_trigger_burst_runs_one_pass() {
    let h = Harness::new(MockRemote::new(Behavior::FailTransient)).await;
    h.store.enqueue(CheckinPayload::new(date(2024, 1, 15))).await.unwrap();

    for _ in 0..5 {
        h.orchestrator.request_sync(SyncTrigger::ConnectivityRegained);
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(h.orchestrator.passes_started(), 0);

    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(h.orchestrator.passes_started(), 1);
    assert_eq!(h.remote.call_count(), 1);
    assert_eq!(h.store.list(Domain::Checkins).await[0].attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_triggers_during_pass_do_not_overlap() {
    let h = Harness::new(MockRemote::with_delay(
        Behavior::Succeed,
        Duration::from_secs(10),
    ))
    .await;
    h.store.enqueue(CheckinPayload::new(date(2024, 1, 15))).await.unwrap();
    h.store.enqueue(CheckinPayload::new(date(2024, 1, 16))).await.unwrap();

    let mut rx = h.store.subscribe();
    let syncing_seen = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let seen = syncing_seen.clone();
    let observer = tokio::spawn(async move {
        let mut was_syncing = false;
        while rx.changed().await.is_ok() {
            let syncing = rx.borrow().is_syncing;
            if syncing && !was_syncing {
                seen.fetch_add(1, Ordering::SeqCst);
            }
            was_syncing = syncing;
        }
    });

    h.orchestrator.request_sync(SyncTrigger::Startup);
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(h.store.indicator().is_syncing);

    // Two more triggers fire while the first pass is still sending
    h.orchestrator.request_sync(SyncTrigger::AppForegrounded);
    h.orchestrator.request_sync(SyncTrigger::Manual);
    assert_eq!(
        h.orchestrator.run_pass_now().await,
        PassOutcome::Skipped(SkipReason::AlreadySyncing)
    );

    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(h.orchestrator.passes_started(), 1);
    assert_eq!(h.remote.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(h.store.pending_count().await, 0);
    assert!(!h.store.indicator().is_syncing);
    assert_eq!(syncing_seen.load(Ordering::SeqCst), 1);
    observer.abort();
}

#[tokio::test(start_paused = true)]
async fn test_follow_up_pass_after_busy_trigger() {
    let h = Harness::new(MockRemote::with_delay(
        Behavior::FailTransient,
        Duration::from_secs(10),
    ))
    .await;
    h.store.enqueue(CheckinPayload::new(date(2024, 1, 15))).await.unwrap();

    h.orchestrator.request_sync(SyncTrigger::Startup);
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(h.store.indicator().is_syncing);

    // Fires at ~5 s while the first pass runs until ~12 s
    h.orchestrator.request_sync(SyncTrigger::Manual);
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(h.orchestrator.passes_started(), 2);
    assert_eq!(h.store.list(Domain::Checkins).await[0].attempts, 2);
}

#[tokio::test(start_paused = true)]
async fn test_enqueue_during_pass_waits_for_next_pass() {
    let h = Harness::new(MockRemote::with_delay(
        Behavior::Succeed,
        Duration::from_secs(5),
    ))
    .await;
    h.store.enqueue(CheckinPayload::new(date(2024, 1, 15))).await.unwrap();

    let orchestrator = h.orchestrator.clone();
    let pass = tokio::spawn(async move { orchestrator.run_pass_now().await });

    tokio::time::sleep(Duration::from_secs(1)).await;
    let late_id = h
        .store
        .enqueue(CheckinPayload::new(date(2024, 1, 16)))
        .await
        .unwrap();

    let PassOutcome::Completed(report) = pass.await.unwrap() else {
        panic!("expected a completed pass");
    };
    assert_eq!(report.succeeded, 1);

    let queued = h.store.list(Domain::Checkins).await;
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].local_id, late_id);
    assert_eq!(queued[0].attempts, 0);
}

// =============================================================================
// Trigger sources
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_startup_then_connectivity_regained() {
    let h = Harness::new(MockRemote::new(Behavior::Succeed)).await;
    h.connectivity.set(NetworkState::offline());
    h.store.enqueue(CheckinPayload::new(date(2024, 1, 15))).await.unwrap();

    let triggers = h.orchestrator.start(None);

    // Startup pass fires but the device is offline
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(h.orchestrator.passes_started(), 0);
    assert_eq!(h.store.pending_count().await, 1);

    h.connectivity.set(NetworkState::online());
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(h.orchestrator.passes_started(), 1);
    assert_eq!(h.store.pending_count().await, 0);
    triggers.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_foreground_triggers_pass() {
    let h = Harness::new(MockRemote::new(Behavior::Succeed)).await;
    let lifecycle = Arc::new(ChannelLifecycle::new());
    let triggers = h
        .orchestrator
        .start(Some(lifecycle.clone() as Arc<dyn AppLifecycleProvider>));

    // Nothing queued at startup
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(h.orchestrator.passes_started(), 0);

    h.store.enqueue(NutritionDayPayload::new(date(2024, 1, 15))).await.unwrap();
    lifecycle.notify(AppState::Background);
    lifecycle.notify(AppState::Foreground);
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(h.orchestrator.passes_started(), 1);
    assert_eq!(h.store.pending_count().await, 0);
    triggers.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_scheduled_pass() {
    let h = Harness::new(MockRemote::new(Behavior::Succeed)).await;
    h.store.enqueue(CheckinPayload::new(date(2024, 1, 15))).await.unwrap();

    let triggers = h.orchestrator.start(None);
    tokio::time::sleep(Duration::from_millis(500)).await;
    triggers.shutdown();

    h.connectivity.set(NetworkState::offline());
    h.connectivity.set(NetworkState::online());
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(h.orchestrator.passes_started(), 0);
    assert_eq!(h.store.pending_count().await, 1);
}
