//! Pending mutation store
//!
//! Owns every not-yet-confirmed local change, ordered per domain, together
//! with the queue-wide sync status and the bounded error log.

mod document;
mod pending;

pub use document::{QueueDocument, QUEUE_SCHEMA_VERSION};
pub use pending::{FailureOutcome, PendingMutationStore, StoreOptions, DEFAULT_QUEUE_KEY};
