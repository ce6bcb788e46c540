//! Test doubles shared by the integration tests

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use sleek_sync::{
    CacheInvalidator, ChannelConnectivity, CheckinPayload, Domain, KeyValueStore, MemoryKvStore,
    MutationPayload, NetworkState, NutritionDayPayload, OrchestratorSettings, PendingMutationStore,
    RefetchScope, RemoteError, RemoteMutationClient, StoreOptions, SyncError, SyncOrchestrator,
};

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Behavior {
    Succeed,
    FailTransient,
    Reject(u16),
    Panic,
}

/// Remote client whose answers are scripted per domain
pub struct MockRemote {
    checkins: Mutex<Behavior>,
    nutrition: Mutex<Behavior>,
    delay: Duration,
    pub calls: Mutex<Vec<MutationPayload>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl MockRemote {
    pub fn new(behavior: Behavior) -> Self {
        Self::with_delay(behavior, Duration::ZERO)
    }

    pub fn with_delay(behavior: Behavior, delay: Duration) -> Self {
        Self {
            checkins: Mutex::new(behavior),
            nutrition: Mutex::new(behavior),
            delay,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn set_behavior(&self, domain: Domain, behavior: Behavior) {
        match domain {
            Domain::Checkins => *self.checkins.lock().unwrap() = behavior,
            Domain::NutritionDays => *self.nutrition.lock().unwrap() = behavior,
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    async fn answer(&self, payload: MutationPayload) -> Result<(), RemoteError> {
        let behavior = match payload.domain() {
            Domain::Checkins => *self.checkins.lock().unwrap(),
            Domain::NutritionDays => *self.nutrition.lock().unwrap(),
        };
        self.calls.lock().unwrap().push(payload);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match behavior {
            Behavior::Succeed => Ok(()),
            Behavior::FailTransient => Err(RemoteError::transient("connection reset")),
            Behavior::Reject(status) => Err(RemoteError::from_status(
                status,
                format!("HTTP {}: rejected", status),
            )),
            Behavior::Panic => panic!("remote client bug"),
        }
    }
}

#[async_trait]
impl RemoteMutationClient for MockRemote {
    async fn create_checkin(&self, payload: &CheckinPayload) -> Result<(), RemoteError> {
        self.answer(payload.clone().into()).await
    }

    async fn upsert_nutrition_day(&self, payload: &NutritionDayPayload) -> Result<(), RemoteError> {
        self.answer(payload.clone().into()).await
    }
}

/// Records every invalidation request
#[derive(Default)]
pub struct RecordingInvalidator {
    pub requests: Mutex<Vec<(BTreeSet<Domain>, RefetchScope)>>,
}

#[async_trait]
impl CacheInvalidator for RecordingInvalidator {
    async fn invalidate(&self, tags: &BTreeSet<Domain>, scope: RefetchScope) {
        self.requests.lock().unwrap().push((tags.clone(), scope));
    }
}

/// Memory store whose writes can be made to fail
#[derive(Default)]
pub struct FlakyKv {
    inner: MemoryKvStore,
    pub fail_writes: AtomicBool,
}

impl FlakyKv {
    pub fn set_failing(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl KeyValueStore for FlakyKv {
    async fn get(&self, key: &str) -> sleek_sync::Result<Option<String>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> sleek_sync::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SyncError::Persistence("disk full".into()));
        }
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> sleek_sync::Result<()> {
        self.inner.remove(key).await
    }
}

pub struct Harness {
    pub kv: Arc<FlakyKv>,
    pub store: Arc<PendingMutationStore>,
    pub remote: Arc<MockRemote>,
    pub cache: Arc<RecordingInvalidator>,
    pub connectivity: Arc<ChannelConnectivity>,
    pub orchestrator: SyncOrchestrator,
}

impl Harness {
    pub async fn new(remote: MockRemote) -> Self {
        Self::with_settings(remote, StoreOptions::default(), OrchestratorSettings::default()).await
    }

    pub async fn with_settings(
        remote: MockRemote,
        store_options: StoreOptions,
        settings: OrchestratorSettings,
    ) -> Self {
        let kv = Arc::new(FlakyKv::default());
        let store = Arc::new(
            PendingMutationStore::load(kv.clone(), store_options)
                .await
                .unwrap(),
        );
        let remote = Arc::new(remote);
        let cache = Arc::new(RecordingInvalidator::default());
        let connectivity = Arc::new(ChannelConnectivity::new(NetworkState::online()));

        let orchestrator = SyncOrchestrator::new(
            store.clone(),
            remote.clone(),
            cache.clone(),
            connectivity.clone(),
            settings,
        );

        Self {
            kv,
            store,
            remote,
            cache,
            connectivity,
            orchestrator,
        }
    }
}
