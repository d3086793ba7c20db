//! Per-integration background sync services and their registry.
//!
//! Each running service owns a request queue, a refresh loop on a fixed
//! interval, and a cache slot holding the latest [`Snapshot`]. The registry
//! is the single place services are started and stopped; starting the same
//! key twice returns the already-running instance instead of arming a
//! second timer.

use crate::config::SyncConfig;
use crate::queue::{with_timeout, RequestQueue, Task};
use dashmap::DashMap;
use hearth_memory::Snapshot;
use hearth_types::{AgentId, CacheStore, ExternalFetcher, HearthError, HearthResult};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Identifies one sync service: one agent's view of one integration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceKey {
    /// The agent this service syncs on behalf of.
    pub agent_id: AgentId,
    /// Integration name, e.g. `"feed"` or `"calendar"`.
    pub integration: String,
}

impl ServiceKey {
    /// Build a key for an agent/integration pair.
    pub fn new(agent_id: AgentId, integration: impl Into<String>) -> Self {
        Self {
            agent_id,
            integration: integration.into(),
        }
    }

    /// The cache key this service's snapshot lives under.
    pub fn cache_key(&self) -> String {
        format!("sync/{}/{}", self.integration, self.agent_id)
    }
}

/// A background service that periodically refreshes one integration's
/// external state into the cache.
pub struct SyncService {
    key: ServiceKey,
    config: SyncConfig,
    fetcher: Arc<dyn ExternalFetcher>,
    cache: Arc<dyn CacheStore>,
    queue: RequestQueue<serde_json::Value>,
    /// When the last successful refresh was invoked. Also serializes
    /// refreshes: the lock is held across the fetch.
    last_refresh: tokio::sync::Mutex<Option<Instant>>,
    shutdown_tx: watch::Sender<bool>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SyncService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncService")
            .field("key", &self.key)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SyncService {
    fn new(
        key: ServiceKey,
        fetcher: Arc<dyn ExternalFetcher>,
        cache: Arc<dyn CacheStore>,
        config: SyncConfig,
    ) -> Self {
        let queue = RequestQueue::new(config.queue.clone());
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            key,
            config,
            fetcher,
            cache,
            queue,
            last_refresh: tokio::sync::Mutex::new(None),
            shutdown_tx,
            timer: Mutex::new(None),
        }
    }

    /// The key this service is registered under.
    pub fn key(&self) -> &ServiceKey {
        &self.key
    }

    /// Refresh the cached snapshot.
    ///
    /// Unless `force` is set, a refresh inside the configured interval is a
    /// no-op that returns the cached payload unchanged. Otherwise the fetch
    /// goes through the request queue (serialized, retried with backoff,
    /// bounded by the request timeout) and, on success, the new snapshot
    /// replaces the cached one. On failure the previous snapshot stays
    /// intact and the error surfaces to this caller only.
    pub async fn refresh(&self, force: bool) -> HearthResult<serde_json::Value> {
        let mut last = self.last_refresh.lock().await;

        if !force {
            if let Some(at) = *last {
                if at.elapsed() < self.config.interval() {
                    if let Some(snapshot) = self.cached_snapshot().await? {
                        debug!(
                            integration = %self.key.integration,
                            "refresh within interval, serving cached snapshot"
                        );
                        return Ok(snapshot.payload);
                    }
                }
            }
        }

        // Freshness is measured from invocation, not completion, so a slow
        // fetch does not stretch the effective interval.
        let started = Instant::now();

        let fetcher = self.fetcher.clone();
        let timeout = self.config.request_timeout();
        let task: Task<serde_json::Value> = Box::new(move || {
            let fetcher = fetcher.clone();
            Box::pin(async move {
                with_timeout(
                    timeout,
                    async move { fetcher.fetch().await },
                    Err(HearthError::Timeout(timeout.as_millis() as u64)),
                )
                .await
            })
        });

        let payload = self.queue.enqueue(task).await?;
        let snapshot = Snapshot::now(payload.clone());
        self.cache
            .set(&self.key.cache_key(), snapshot.to_value()?)
            .await?;
        *last = Some(started);

        debug!(integration = %self.key.integration, "snapshot refreshed");
        Ok(payload)
    }

    /// Refresh immediately, bypassing the interval guard.
    pub async fn force_update(&self) -> HearthResult<serde_json::Value> {
        self.refresh(true).await
    }

    /// The latest cached snapshot, if any. Does not trigger a fetch.
    pub async fn cached_snapshot(&self) -> HearthResult<Option<Snapshot>> {
        match self.cache.get(&self.key.cache_key()).await? {
            Some(value) => Ok(Some(Snapshot::from_value(value)?)),
            None => Ok(None),
        }
    }

    fn spawn_timer(self: Arc<Self>) {
        let service = Arc::clone(&self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let interval = self.config.interval();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown_rx.changed() => {
                        debug!(integration = %service.key.integration, "sync loop: shutdown signal received");
                        break;
                    }
                }
                // A failed tick keeps the previous snapshot; the loop goes on.
                if let Err(e) = service.refresh(false).await {
                    warn!(
                        integration = %service.key.integration,
                        error = %e,
                        "scheduled refresh failed, keeping previous snapshot"
                    );
                }
            }
        });

        if let Ok(mut slot) = self.timer.lock() {
            *slot = Some(handle);
        }
    }

    /// Stop the timer and the queue. Idempotent.
    fn halt(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Ok(mut slot) = self.timer.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
        self.queue.shutdown();
    }
}

/// Registry of running sync services, keyed by agent and integration.
#[derive(Default)]
pub struct SyncRegistry {
    services: DashMap<ServiceKey, Arc<SyncService>>,
}

impl SyncRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a sync service, or return the one already running under `key`.
    ///
    /// A new service performs one immediate refresh before its timer is
    /// armed. If that initial refresh fails, the error is returned but the
    /// service stays registered with its timer running, so later ticks can
    /// recover; fetch the instance back with [`SyncRegistry::get`].
    pub async fn start(
        &self,
        key: ServiceKey,
        fetcher: Arc<dyn ExternalFetcher>,
        cache: Arc<dyn CacheStore>,
        config: SyncConfig,
    ) -> HearthResult<Arc<SyncService>> {
        let service = match self.services.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                debug!(
                    agent = %key.agent_id,
                    integration = %key.integration,
                    "sync service already running, reusing instance"
                );
                return Ok(existing.get().clone());
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let service = Arc::new(SyncService::new(key.clone(), fetcher, cache, config));
                slot.insert(service.clone());
                service
            }
        };

        info!(
            agent = %key.agent_id,
            integration = %key.integration,
            interval_secs = service.config.interval_secs,
            "starting sync service"
        );

        let initial = service.refresh(false).await;
        service.clone().spawn_timer();
        match initial {
            Ok(_) => Ok(service),
            Err(e) => {
                warn!(
                    integration = %key.integration,
                    error = %e,
                    "initial refresh failed, service stays registered"
                );
                Err(e)
            }
        }
    }

    /// Look up a running service.
    pub fn get(&self, key: &ServiceKey) -> Option<Arc<SyncService>> {
        self.services.get(key).map(|s| s.clone())
    }

    /// Stop a service and remove it. Returns whether one was running.
    pub fn stop(&self, key: &ServiceKey) -> bool {
        if let Some((_, service)) = self.services.remove(key) {
            service.halt();
            info!(
                agent = %key.agent_id,
                integration = %key.integration,
                "sync service stopped"
            );
            true
        } else {
            false
        }
    }

    /// Stop every running service.
    pub fn stop_all(&self) {
        let keys: Vec<ServiceKey> = self.services.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.stop(&key);
        }
    }

    /// Number of running services.
    pub fn active_count(&self) -> usize {
        self.services.len()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
