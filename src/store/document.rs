//! Persisted queue document
//!
//! Version history:
//! - 0: unversioned blob (`pendingByDomain`, `isSyncing`, `lastSyncAt`, `syncErrors`)
//! - 1: adds `version` and `deadLetters`

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::types::{DeadLetter, Domain, PendingMutation, SyncStatus};

pub const QUEUE_SCHEMA_VERSION: u32 = 1;

/// Full queue state, as held in memory and written to the key-value port
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueDocument {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub pending_by_domain: BTreeMap<Domain, Vec<PendingMutation>>,
    #[serde(default)]
    pub is_syncing: bool,
    #[serde(default)]
    pub last_sync_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sync_errors: VecDeque<String>,
    #[serde(default)]
    pub dead_letters: Vec<DeadLetter>,
}

impl QueueDocument {
    pub fn new() -> Self {
        Self {
            version: QUEUE_SCHEMA_VERSION,
            ..Default::default()
        }
    }

    /// Parse a stored blob, upgrading older versions.
    ///
    /// The syncing flag is always cleared: a pass cannot survive a restart.
    pub fn restore(json: &str) -> Result<Self> {
        let mut doc: QueueDocument = serde_json::from_str(json)?;
        if doc.version > QUEUE_SCHEMA_VERSION {
            return Err(SyncError::UnsupportedSchema {
                found: doc.version,
                supported: QUEUE_SCHEMA_VERSION,
            });
        }
        doc.version = QUEUE_SCHEMA_VERSION;
        doc.is_syncing = false;
        doc.pending_by_domain.retain(|_, entries| !entries.is_empty());
        Ok(doc)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn queue(&self, domain: Domain) -> &[PendingMutation] {
        self.pending_by_domain
            .get(&domain)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn queue_mut(&mut self, domain: Domain) -> &mut Vec<PendingMutation> {
        self.pending_by_domain.entry(domain).or_default()
    }

    pub fn pending_count(&self) -> usize {
        self.pending_by_domain.values().map(Vec::len).sum()
    }

    /// Append to the error log, evicting the oldest entries beyond `max`
    pub fn push_error(&mut self, message: String, max: usize) {
        self.sync_errors.push_back(message);
        while self.sync_errors.len() > max {
            self.sync_errors.pop_front();
        }
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            is_syncing: self.is_syncing,
            last_sync_at: self.last_sync_at,
            sync_errors: self.sync_errors.clone(),
        }
    }
}
