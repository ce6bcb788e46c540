//! Sync configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub remote: RemoteSettings,
    #[serde(default)]
    pub storage: StorageSettings,
}

impl Config {
    /// Load from a TOML file, falling back to defaults when it does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}

/// What a remote failure costs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Every failure consumes one attempt
    #[default]
    Uniform,
    /// Permanent rejections (4xx other than 408/429) are dropped immediately
    DropRejections,
}

/// What happens to an entry that used up its attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionPolicy {
    /// Discard the entry, keeping only the error message
    #[default]
    Discard,
    /// Move the entry to the dead-letter list
    DeadLetter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Quiet period before a requested pass runs
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Attempts before an entry leaves the queue
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Size of the sync error log
    #[serde(default = "default_max_sync_errors")]
    pub max_sync_errors: usize,

    #[serde(default)]
    pub failure_policy: FailurePolicy,

    #[serde(default)]
    pub exhaustion_policy: ExhaustionPolicy,
}

impl SyncSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            max_attempts: default_max_attempts(),
            max_sync_errors: default_max_sync_errors(),
            failure_policy: FailurePolicy::default(),
            exhaustion_policy: ExhaustionPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSettings {
    /// API base URL (without the /api/v1 prefix)
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token; normally supplied through the environment
    #[serde(default)]
    pub api_token: Option<String>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// How often the connectivity probe checks the health endpoint
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_token: None,
            request_timeout_secs: default_request_timeout(),
            probe_interval_secs: default_probe_interval(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    File,
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default)]
    pub backend: StorageBackend,

    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            data_dir: default_data_dir(),
        }
    }
}

// Defaults
fn default_debounce_ms() -> u64 { 2000 }
fn default_max_attempts() -> u32 { 3 }
fn default_max_sync_errors() -> usize { 10 }
fn default_base_url() -> String { "http://localhost:8000".to_string() }
fn default_request_timeout() -> u64 { 30 }
fn default_probe_interval() -> u64 { 15 }
fn default_data_dir() -> PathBuf { PathBuf::from(".sleek-sync") }
