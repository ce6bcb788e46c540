//! Cache invalidation port
//!
//! After a pass confirms changes on the remote, reads of the affected domains
//! are stale. The orchestrator asks the UI's query cache to refetch them.

use std::collections::BTreeSet;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use crate::types::Domain;

/// Which cached reads to refetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefetchScope {
    /// Only reads that are currently rendered
    ActiveOnly,
    All,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationRequest {
    pub tags: BTreeSet<Domain>,
    pub scope: RefetchScope,
}

#[async_trait]
pub trait CacheInvalidator: Send + Sync {
    async fn invalidate(&self, tags: &BTreeSet<Domain>, scope: RefetchScope);
}

/// Publishes invalidation requests to any number of UI listeners
pub struct BroadcastInvalidator {
    tx: broadcast::Sender<InvalidationRequest>,
}

impl BroadcastInvalidator {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InvalidationRequest> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastInvalidator {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl CacheInvalidator for BroadcastInvalidator {
    async fn invalidate(&self, tags: &BTreeSet<Domain>, scope: RefetchScope) {
        let request = InvalidationRequest {
            tags: tags.clone(),
            scope,
        };
        // No listeners just means nothing is on screen
        if self.tx.send(request).is_err() {
            debug!(?tags, "No cache listeners for invalidation");
        }
    }
}
