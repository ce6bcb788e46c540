//! Trigger sources
//!
//! Connectivity and app-lifecycle providers notify the orchestrator, which
//! schedules a pass. They never run one themselves.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::RemoteSettings;
use crate::error::{Result, SyncError};

/// Reachability as reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetworkState {
    pub connected: bool,
    pub internet_reachable: bool,
}

impl NetworkState {
    pub fn online() -> Self {
        Self {
            connected: true,
            internet_reachable: true,
        }
    }

    pub fn offline() -> Self {
        Self::default()
    }

    /// Connected to a network that reaches the internet
    pub fn is_online(&self) -> bool {
        self.connected && self.internet_reachable
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Foreground,
    Background,
}

#[async_trait]
pub trait ConnectivityProvider: Send + Sync {
    /// Changes from now on; dropping the receiver unsubscribes
    fn subscribe(&self) -> broadcast::Receiver<NetworkState>;

    /// Live check of the current state
    async fn fetch_current(&self) -> NetworkState;
}

pub trait AppLifecycleProvider: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<AppState>;
}

/// Connectivity fed by the host platform (e.g. a mobile bridge)
pub struct ChannelConnectivity {
    current: watch::Sender<NetworkState>,
    tx: broadcast::Sender<NetworkState>,
}

impl ChannelConnectivity {
    pub fn new(initial: NetworkState) -> Self {
        let (current, _) = watch::channel(initial);
        let (tx, _) = broadcast::channel(16);
        Self { current, tx }
    }

    /// Record a new state and notify subscribers
    pub fn set(&self, state: NetworkState) {
        self.current.send_replace(state);
        let _ = self.tx.send(state);
    }
}

#[async_trait]
impl ConnectivityProvider for ChannelConnectivity {
    fn subscribe(&self) -> broadcast::Receiver<NetworkState> {
        self.tx.subscribe()
    }

    async fn fetch_current(&self) -> NetworkState {
        *self.current.borrow()
    }
}

/// App lifecycle fed by the host platform
pub struct ChannelLifecycle {
    tx: broadcast::Sender<AppState>,
}

impl ChannelLifecycle {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { tx }
    }

    pub fn notify(&self, state: AppState) {
        let _ = self.tx.send(state);
    }
}

impl Default for ChannelLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl AppLifecycleProvider for ChannelLifecycle {
    fn subscribe(&self) -> broadcast::Receiver<AppState> {
        self.tx.subscribe()
    }
}

/// Connectivity derived from polling the API health endpoint.
///
/// Any HTTP response counts as online; a transport error counts as offline.
pub struct HttpConnectivityProbe {
    health_url: String,
    interval: Duration,
    http_client: reqwest::Client,
    current: watch::Sender<NetworkState>,
    tx: broadcast::Sender<NetworkState>,
}

impl HttpConnectivityProbe {
    pub fn new(settings: &RemoteSettings) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| SyncError::Config(format!("building HTTP client: {}", e)))?;
        let (current, _) = watch::channel(NetworkState::offline());
        let (tx, _) = broadcast::channel(16);

        Ok(Self {
            health_url: format!("{}/health", settings.base_url.trim_end_matches('/')),
            interval: Duration::from_secs(settings.probe_interval_secs.max(1)),
            http_client,
            current,
            tx,
        })
    }

    /// Probe once, publishing the result if it changed
    pub async fn probe(&self) -> NetworkState {
        let state = match self.http_client.get(&self.health_url).send().await {
            Ok(_) => NetworkState::online(),
            Err(e) => {
                debug!(url = %self.health_url, error = %e, "Health probe failed");
                NetworkState::offline()
            }
        };

        let previous = self.current.send_replace(state);
        if previous != state {
            info!(online = state.is_online(), "Connectivity changed");
            let _ = self.tx.send(state);
        }
        state
    }

    /// Poll in the background until the handle is aborted
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                ticker.tick().await;
                self.probe().await;
            }
        })
    }
}

#[async_trait]
impl ConnectivityProvider for HttpConnectivityProbe {
    fn subscribe(&self) -> broadcast::Receiver<NetworkState> {
        self.tx.subscribe()
    }

    async fn fetch_current(&self) -> NetworkState {
        self.probe().await
    }
}
