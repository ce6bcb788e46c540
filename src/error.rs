//! Error types for the offline sync core

use thiserror::Error;

/// Result type for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors surfaced by the store, the persistence adapters and the ports.
///
/// Failures of individual remote calls during a pass are *not* reported
/// through this type; they are absorbed into the queue's attempt counters
/// and error log.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The durable key-value port could not read or write
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Persisted queue was written by a newer schema
    #[error("Unsupported queue schema version {found} (max supported {supported})")]
    UnsupportedSchema { found: u32, supported: u32 },

    /// Remote mutation client error
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Entry not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Persistence(err.to_string())
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        SyncError::Persistence(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::Config(err.to_string())
    }
}

/// How a remote failure should be interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// The call could not complete; it may succeed later
    Transient,
    /// The server explicitly refused the payload
    Rejected,
}

/// Error returned by a [`RemoteMutationClient`](crate::remote::RemoteMutationClient) call
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    /// HTTP status, when the server answered
    pub status: Option<u16>,
    pub message: String,
}

impl RemoteError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::Transient,
            status: None,
            message: message.into(),
        }
    }

    /// Classify an HTTP error response.
    ///
    /// 408 and 429 are retryable; other 4xx are rejections; 5xx are transient.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let kind = match status {
            408 | 429 => RemoteErrorKind::Transient,
            400..=499 => RemoteErrorKind::Rejected,
            _ => RemoteErrorKind::Transient,
        };
        Self {
            kind,
            status: Some(status),
            message: message.into(),
        }
    }

    /// Whether the server permanently refused this payload
    pub fn is_rejection(&self) -> bool {
        self.kind == RemoteErrorKind::Rejected
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => RemoteError::from_status(status.as_u16(), err.to_string()),
            None => RemoteError::transient(err.to_string()),
        }
    }
}
