//! Sync orchestrator
//!
//! Decides when to flush the offline queue and runs the flush.
//!
//! ```text
//!  connectivity ─┐
//!  foreground ───┼─► request_sync ─► DebounceTimer ─► eligibility ─► pass
//!  startup/manual┘        (arm)          (2 s)          re-check      │
//!                                                                     ▼
//!                                          store.finish_sync ◄─ cache invalidation
//! ```
//!
//! State machine: Idle → Syncing → Idle. Only the orchestrator enters
//! Syncing, and the store's compare-and-set keeps a single pass in flight.

mod debounce;

pub use debounce::DebounceTimer;

use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheInvalidator, RefetchScope};
use crate::config::{FailurePolicy, SyncSettings};
use crate::remote::{self, RemoteMutationClient};
use crate::store::{FailureOutcome, PendingMutationStore};
use crate::triggers::{AppLifecycleProvider, AppState, ConnectivityProvider};
use crate::types::Domain;

/// Why a pass was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    ConnectivityRegained,
    AppForegrounded,
    Startup,
    /// User pressed "sync now"
    Manual,
    /// A trigger arrived while the previous pass was running
    FollowUp,
}

/// Why an eligible-looking pass did not run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    EmptyQueue,
    AlreadySyncing,
    Offline,
}

/// Summary of a completed pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub succeeded: usize,
    pub failed: usize,
    /// Entries that left the queue without reaching the remote
    pub dropped: usize,
    /// Domains whose caches were invalidated
    pub invalidated: BTreeSet<Domain>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    Skipped(SkipReason),
    Completed(PassReport),
    /// The pass could not start or stopped unexpectedly; the syncing flag
    /// has been cleared
    Aborted(String),
}

/// Tunables for the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub debounce: Duration,
    pub failure_policy: FailurePolicy,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&SyncSettings::default())
    }
}

impl From<&SyncSettings> for OrchestratorSettings {
    fn from(settings: &SyncSettings) -> Self {
        Self {
            debounce: settings.debounce(),
            failure_policy: settings.failure_policy,
        }
    }
}

struct Inner {
    store: Arc<PendingMutationStore>,
    remote: Arc<dyn RemoteMutationClient>,
    cache: Arc<dyn CacheInvalidator>,
    connectivity: Arc<dyn ConnectivityProvider>,
    settings: OrchestratorSettings,
    timer: DebounceTimer,
    follow_up: AtomicBool,
    passes_started: AtomicU64,
}

/// Schedules and runs sync passes over a [`PendingMutationStore`].
///
/// Cheap to clone; clones share the timer and in-flight state.
#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
}

impl SyncOrchestrator {
    pub fn new(
        store: Arc<PendingMutationStore>,
        remote: Arc<dyn RemoteMutationClient>,
        cache: Arc<dyn CacheInvalidator>,
        connectivity: Arc<dyn ConnectivityProvider>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                remote,
                cache,
                connectivity,
                settings,
                timer: DebounceTimer::new(),
                follow_up: AtomicBool::new(false),
                passes_started: AtomicU64::new(0),
            }),
        }
    }

    pub fn store(&self) -> &Arc<PendingMutationStore> {
        &self.inner.store
    }

    /// Number of passes that got past the eligibility check
    pub fn passes_started(&self) -> u64 {
        self.inner.passes_started.load(Ordering::SeqCst)
    }

    /// Schedule a pass after the quiet period, replacing any pending one
    pub fn request_sync(&self, trigger: SyncTrigger) {
        debug!(?trigger, "Sync requested");
        let orchestrator = self.clone();
        self.inner.timer.arm(self.inner.settings.debounce, move || {
            // Detached so a later arm cannot cancel a running pass
            tokio::spawn(async move {
                orchestrator.run_pass_now().await;
            });
        });
    }

    /// User-initiated "sync now"; still debounced
    pub fn sync_now(&self) {
        self.request_sync(SyncTrigger::Manual);
    }

    /// Drop a scheduled pass that has not fired yet
    pub fn cancel_pending(&self) -> bool {
        self.inner.timer.cancel()
    }

    /// Subscribe to trigger sources and request the startup pass.
    ///
    /// Listening stops when the returned handle is shut down or dropped.
    pub fn start(&self, lifecycle: Option<Arc<dyn AppLifecycleProvider>>) -> TriggerHandle {
        let mut tasks = vec![self.spawn_connectivity_listener()];
        if let Some(lifecycle) = lifecycle {
            tasks.push(self.spawn_lifecycle_listener(lifecycle));
        }

        self.request_sync(SyncTrigger::Startup);
        info!("Sync orchestrator started");

        TriggerHandle {
            tasks,
            orchestrator: self.clone(),
        }
    }

    fn spawn_connectivity_listener(&self) -> JoinHandle<()> {
        let mut rx = self.inner.connectivity.subscribe();
        let orchestrator = self.clone();

        tokio::spawn(async move {
            let mut was_online: Option<bool> = None;
            loop {
                match rx.recv().await {
                    Ok(state) => {
                        let online = state.is_online();
                        if online && was_online != Some(true) {
                            info!("Connectivity regained");
                            orchestrator.request_sync(SyncTrigger::ConnectivityRegained);
                        }
                        was_online = Some(online);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Connectivity listener lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    fn spawn_lifecycle_listener(&self, lifecycle: Arc<dyn AppLifecycleProvider>) -> JoinHandle<()> {
        let mut rx = lifecycle.subscribe();
        let orchestrator = self.clone();

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(AppState::Foreground) => {
                        orchestrator.request_sync(SyncTrigger::AppForegrounded);
                    }
                    Ok(AppState::Background) => {}
                    Err(RecvError::Lagged(_)) => {
                        // Missed events still mean the app changed state
                        orchestrator.request_sync(SyncTrigger::AppForegrounded);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Re-check eligibility and, if eligible, run one pass immediately.
    ///
    /// Per-item failures are absorbed into the queue; this never returns an
    /// error and always leaves the syncing flag cleared.
    pub async fn run_pass_now(&self) -> PassOutcome {
        let inner = &self.inner;

        if let Some(reason) = self.check_eligibility().await {
            if reason == SkipReason::AlreadySyncing {
                self.defer_to_running_pass().await;
            }
            debug!(?reason, "Skipping sync pass");
            return PassOutcome::Skipped(reason);
        }

        match inner.store.try_begin_sync().await {
            Ok(true) => {}
            Ok(false) => {
                self.defer_to_running_pass().await;
                return PassOutcome::Skipped(SkipReason::AlreadySyncing);
            }
            Err(e) => {
                error!(error = %e, "Could not mark sync pass as started");
                return PassOutcome::Aborted(e.to_string());
            }
        }
        inner.passes_started.fetch_add(1, Ordering::SeqCst);

        let drained = AssertUnwindSafe(self.drain()).catch_unwind().await;

        let outcome = match drained {
            Ok(mut report) => {
                report.completed_at = Utc::now();
                info!(
                    succeeded = report.succeeded,
                    failed = report.failed,
                    dropped = report.dropped,
                    "Sync pass complete"
                );
                PassOutcome::Completed(report)
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(panic = %message, "Sync pass panicked");
                PassOutcome::Aborted(message)
            }
        };

        let completed_at = match &outcome {
            PassOutcome::Completed(report) => Some(report.completed_at),
            _ => None,
        };
        if let Err(e) = inner.store.finish_sync(completed_at).await {
            error!(error = %e, "Could not persist end of sync pass");
        }

        self.take_follow_up().await;

        outcome
    }

    /// Ask the running pass to schedule another one when it ends.
    ///
    /// The running pass may already have finished between the eligibility
    /// check and here, in which case the request is taken back and armed
    /// directly.
    async fn defer_to_running_pass(&self) {
        self.inner.follow_up.store(true, Ordering::SeqCst);
        if !self.inner.store.indicator().is_syncing {
            self.take_follow_up().await;
        }
    }

    /// Consume a pending follow-up request, arming a pass if work remains
    async fn take_follow_up(&self) {
        let inner = &self.inner;
        if inner.follow_up.swap(false, Ordering::SeqCst) && inner.store.pending_count().await > 0 {
            self.request_sync(SyncTrigger::FollowUp);
        }
    }

    async fn check_eligibility(&self) -> Option<SkipReason> {
        let inner = &self.inner;
        if inner.store.pending_count().await == 0 {
            return Some(SkipReason::EmptyQueue);
        }
        if inner.store.indicator().is_syncing {
            return Some(SkipReason::AlreadySyncing);
        }
        if !inner.connectivity.fetch_current().await.is_online() {
            return Some(SkipReason::Offline);
        }
        None
    }

    /// Flush every domain in FIFO order, isolating per-item failures
    async fn drain(&self) -> PassReport {
        let inner = &self.inner;
        let mut report = PassReport {
            succeeded: 0,
            failed: 0,
            dropped: 0,
            invalidated: BTreeSet::new(),
            completed_at: Utc::now(),
        };

        for domain in Domain::ALL {
            // Entries enqueued from here on wait for the next pass
            let snapshot = inner.store.list(domain).await;
            if snapshot.is_empty() {
                continue;
            }
            debug!(%domain, count = snapshot.len(), "Flushing domain");

            for mutation in snapshot {
                let local_id = mutation.local_id.as_str();

                match remote::dispatch(inner.remote.as_ref(), &mutation.payload).await {
                    Ok(()) => {
                        report.succeeded += 1;
                        report.invalidated.insert(domain);
                        if let Err(e) = inner.store.remove(domain, local_id).await {
                            error!(%domain, local_id, error = %e, "Synced but could not dequeue");
                        }
                    }
                    Err(err) => {
                        report.failed += 1;
                        let reason = err.to_string();

                        let drop_rejected =
                            inner.settings.failure_policy == FailurePolicy::DropRejections;
                        let dropped = if drop_rejected && err.is_rejection() {
                            inner.store.record_rejection(domain, local_id, &reason).await
                        } else {
                            inner
                                .store
                                .record_failure(domain, local_id, &reason)
                                .await
                                .map(|outcome| outcome == FailureOutcome::Exhausted)
                        };

                        match dropped {
                            Ok(true) => report.dropped += 1,
                            Ok(false) => {}
                            Err(e) => {
                                error!(%domain, local_id, error = %e, "Could not record failure")
                            }
                        }
                    }
                }
            }
        }

        if !report.invalidated.is_empty() {
            inner
                .cache
                .invalidate(&report.invalidated, RefetchScope::ActiveOnly)
                .await;
        }

        report
    }
}

/// Keeps trigger listeners alive
pub struct TriggerHandle {
    tasks: Vec<JoinHandle<()>>,
    orchestrator: SyncOrchestrator,
}

impl TriggerHandle {
    /// Unsubscribe from trigger sources and cancel any scheduled pass.
    ///
    /// A pass that is already running finishes normally.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.orchestrator.cancel_pending();
    }
}

impl Drop for TriggerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
