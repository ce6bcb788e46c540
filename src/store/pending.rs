//! Single-writer store over the queue document
//!
//! All reads and writes go through one async mutex. A mutating call builds
//! the next state on a copy, writes it to the key-value port, and only then
//! swaps it in, so a failed write leaves memory and disk in agreement.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use super::document::QueueDocument;
use crate::config::{ExhaustionPolicy, SyncSettings};
use crate::error::{Result, SyncError};
use crate::persistence::KeyValueStore;
use crate::types::{
    DeadLetter, Domain, MutationPayload, PendingMutation, SyncIndicator, SyncStatus,
};

/// Key the queue document is stored under
pub const DEFAULT_QUEUE_KEY: &str = "sleek-sync/offline-queue";

#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub key: String,
    /// Attempts before an entry leaves the queue
    pub max_attempts: u32,
    /// Error log length
    pub max_sync_errors: usize,
    pub exhaustion_policy: ExhaustionPolicy,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::from(&SyncSettings::default())
    }
}

impl From<&SyncSettings> for StoreOptions {
    fn from(settings: &SyncSettings) -> Self {
        Self {
            key: DEFAULT_QUEUE_KEY.to_string(),
            max_attempts: settings.max_attempts.max(1),
            max_sync_errors: settings.max_sync_errors,
            exhaustion_policy: settings.exhaustion_policy,
        }
    }
}

/// Result of [`PendingMutationStore::record_failure`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Entry stays queued for another pass
    Retained { attempts: u32 },
    /// Entry reached the attempt cap and left the queue
    Exhausted,
    /// No entry with that id
    Missing,
}

/// Durable, ordered per-domain queues of pending mutations
pub struct PendingMutationStore {
    kv: Arc<dyn KeyValueStore>,
    options: StoreOptions,
    state: Mutex<QueueDocument>,
    indicator_tx: watch::Sender<SyncIndicator>,
}

impl PendingMutationStore {
    /// Restore the queue from the key-value port.
    ///
    /// A missing blob starts an empty queue. A stale syncing flag from a
    /// crashed pass is cleared.
    pub async fn load(kv: Arc<dyn KeyValueStore>, options: StoreOptions) -> Result<Self> {
        let mut doc = match kv.get(&options.key).await? {
            Some(json) => {
                let was_syncing = json_flag_set(&json);
                let doc = QueueDocument::restore(&json)?;
                if was_syncing {
                    warn!("Queue was persisted mid-pass, clearing syncing flag");
                }
                doc
            }
            None => QueueDocument::new(),
        };
        while doc.sync_errors.len() > options.max_sync_errors {
            doc.sync_errors.pop_front();
        }

        info!(
            pending = doc.pending_count(),
            dead_letters = doc.dead_letters.len(),
            "Loaded offline queue"
        );

        let (indicator_tx, _) = watch::channel(indicator_for(&doc));
        Ok(Self {
            kv,
            options,
            state: Mutex::new(doc),
            indicator_tx,
        })
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Append a mutation to the end of its domain's queue
    pub async fn enqueue(&self, payload: impl Into<MutationPayload>) -> Result<String> {
        let mutation = PendingMutation::new(payload.into());
        let local_id = mutation.local_id.clone();
        let domain = mutation.domain();

        self.mutate(move |doc| doc.queue_mut(domain).push(mutation))
            .await?;

        debug!(%domain, local_id = %local_id, "Queued mutation");
        Ok(local_id)
    }

    /// Drop an entry; absent ids are ignored
    pub async fn remove(&self, domain: Domain, local_id: &str) -> Result<()> {
        self.mutate(|doc| {
            if let Some(queue) = doc.pending_by_domain.get_mut(&domain) {
                queue.retain(|m| m.local_id != local_id);
            }
        })
        .await
    }

    /// Count a failed attempt against an entry.
    ///
    /// At the attempt cap the entry leaves the queue. A message naming the
    /// entry is added to the error log either way.
    pub async fn record_failure(
        &self,
        domain: Domain,
        local_id: &str,
        reason: &str,
    ) -> Result<FailureOutcome> {
        let max_attempts = self.options.max_attempts;
        let max_errors = self.options.max_sync_errors;
        let policy = self.options.exhaustion_policy;

        let outcome = self
            .mutate(|doc| {
                let queue = doc.queue_mut(domain);
                let Some(idx) = queue.iter().position(|m| m.local_id == local_id) else {
                    return FailureOutcome::Missing;
                };

                queue[idx].attempts += 1;
                let attempts = queue[idx].attempts;
                let label = queue[idx].payload.describe();

                if attempts >= max_attempts {
                    let mutation = queue.remove(idx);
                    let message = format!(
                        "Dropped {} ({}) after {} attempts: {}",
                        label, local_id, attempts, reason
                    );
                    retire(doc, mutation, &message, policy);
                    doc.push_error(message, max_errors);
                    FailureOutcome::Exhausted
                } else {
                    doc.push_error(
                        format!(
                            "Failed to sync {} ({}), attempt {}/{}: {}",
                            label, local_id, attempts, max_attempts, reason
                        ),
                        max_errors,
                    );
                    FailureOutcome::Retained { attempts }
                }
            })
            .await?;

        match outcome {
            FailureOutcome::Exhausted => {
                warn!(%domain, local_id, reason, "Mutation exhausted its attempts")
            }
            FailureOutcome::Retained { attempts } => {
                debug!(%domain, local_id, attempts, "Mutation failed, will retry")
            }
            FailureOutcome::Missing => {}
        }
        Ok(outcome)
    }

    /// Take an entry the remote permanently refused out of the queue without
    /// spending the rest of its attempts. Returns false if it was not queued.
    pub async fn record_rejection(
        &self,
        domain: Domain,
        local_id: &str,
        reason: &str,
    ) -> Result<bool> {
        let max_errors = self.options.max_sync_errors;
        let policy = self.options.exhaustion_policy;

        let removed = self
            .mutate(|doc| {
                let queue = doc.queue_mut(domain);
                let Some(idx) = queue.iter().position(|m| m.local_id == local_id) else {
                    return false;
                };
                let mut mutation = queue.remove(idx);
                mutation.attempts += 1;
                let message = format!(
                    "Rejected {} ({}): {}",
                    mutation.payload.describe(),
                    local_id,
                    reason
                );
                retire(doc, mutation, &message, policy);
                doc.push_error(message, max_errors);
                true
            })
            .await?;

        if removed {
            warn!(%domain, local_id, reason, "Mutation rejected by remote");
        }
        Ok(removed)
    }

    /// Snapshot of one domain's queue in insertion order
    pub async fn list(&self, domain: Domain) -> Vec<PendingMutation> {
        self.state.lock().await.queue(domain).to_vec()
    }

    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.pending_count()
    }

    pub async fn status(&self) -> SyncStatus {
        self.state.lock().await.status()
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.lock().await.dead_letters.clone()
    }

    /// Current indicator without waiting for a change
    pub fn indicator(&self) -> SyncIndicator {
        self.indicator_tx.borrow().clone()
    }

    /// Receive the indicator every time the queue state changes
    pub fn subscribe(&self) -> watch::Receiver<SyncIndicator> {
        self.indicator_tx.subscribe()
    }

    /// Mark a pass as started.
    ///
    /// Returns false, without touching anything, if a pass is already running.
    pub async fn try_begin_sync(&self) -> Result<bool> {
        self.mutate(|doc| {
            if doc.is_syncing {
                false
            } else {
                doc.is_syncing = true;
                true
            }
        })
        .await
    }

    /// Mark a pass as finished.
    ///
    /// The flag is cleared in memory even when writing it out fails, so the
    /// queue cannot stay stuck in the syncing state.
    pub async fn finish_sync(&self, completed_at: Option<DateTime<Utc>>) -> Result<()> {
        let mut state = self.state.lock().await;
        state.is_syncing = false;
        if completed_at.is_some() {
            state.last_sync_at = completed_at;
        }
        let result = self.persist(&state).await;
        self.publish(&state);
        result
    }

    pub async fn clear_errors(&self) -> Result<()> {
        self.mutate(|doc| doc.sync_errors.clear()).await
    }

    /// Put a dead-lettered payload back at the end of its queue.
    ///
    /// The payload starts a new entry with its own id and attempt budget;
    /// the new id is returned.
    pub async fn requeue_dead_letter(&self, local_id: &str) -> Result<String> {
        let requeued = self
            .mutate(|doc| {
                let idx = doc
                    .dead_letters
                    .iter()
                    .position(|d| d.mutation.local_id == local_id)?;
                let letter = doc.dead_letters.remove(idx);
                let mutation = PendingMutation::new(letter.mutation.payload);
                let new_id = mutation.local_id.clone();
                doc.queue_mut(mutation.domain()).push(mutation);
                Some(new_id)
            })
            .await?;

        let Some(new_id) = requeued else {
            return Err(SyncError::NotFound(format!("dead letter {}", local_id)));
        };
        info!(local_id, new_id = %new_id, "Requeued dead letter");
        Ok(new_id)
    }

    pub async fn discard_dead_letter(&self, local_id: &str) -> Result<()> {
        let found = self
            .mutate(|doc| {
                let before = doc.dead_letters.len();
                doc.dead_letters.retain(|d| d.mutation.local_id != local_id);
                doc.dead_letters.len() != before
            })
            .await?;

        if !found {
            return Err(SyncError::NotFound(format!("dead letter {}", local_id)));
        }
        Ok(())
    }

    /// Apply `f` to a copy of the state, persist it if anything changed,
    /// then commit.
    async fn mutate<T>(&self, f: impl FnOnce(&mut QueueDocument) -> T) -> Result<T> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let out = f(&mut next);
        next.pending_by_domain.retain(|_, entries| !entries.is_empty());

        if next != *state {
            self.persist(&next).await?;
            *state = next;
            self.publish(&state);
        }
        Ok(out)
    }

    async fn persist(&self, doc: &QueueDocument) -> Result<()> {
        let json = doc.to_json()?;
        self.kv.set(&self.options.key, &json).await
    }

    fn publish(&self, doc: &QueueDocument) {
        self.indicator_tx.send_replace(indicator_for(doc));
    }
}

fn retire(
    doc: &mut QueueDocument,
    mutation: PendingMutation,
    reason: &str,
    policy: ExhaustionPolicy,
) {
    if policy == ExhaustionPolicy::DeadLetter {
        doc.dead_letters.push(DeadLetter {
            mutation,
            reason: reason.to_string(),
            failed_at: Utc::now(),
        });
    }
}

fn indicator_for(doc: &QueueDocument) -> SyncIndicator {
    SyncIndicator {
        pending_count: doc.pending_count(),
        is_syncing: doc.is_syncing,
        has_errors: !doc.sync_errors.is_empty(),
        dead_letter_count: doc.dead_letters.len(),
        last_sync_at: doc.last_sync_at,
    }
}

/// Whether a stored blob claims a pass was running
fn json_flag_set(json: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(json)
        .ok()
        .and_then(|v| v.get("isSyncing").and_then(|f| f.as_bool()))
        .unwrap_or(false)
}
