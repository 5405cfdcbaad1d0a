//! Registry store for live agent services
//!
//! Lock discipline: mutations take the store's write lock and, while holding
//! it, the expiry window's lock. A cleanup sweep takes the window lock alone,
//! releases it, and only then takes the store lock. Nothing acquires the
//! store lock while holding the window lock.

use crate::cleanup::{self, CleanupHandle};
use crate::entry::ServiceEntry;
use crate::expiry::ExpiryManager;
use crate::{RegistryConfig, RegistryError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};

/// Registry maintains the set of live services keyed by service id
pub struct Registry {
    // Map of service_id to the owned entry; the expiry window only holds weak references
    services: RwLock<HashMap<String, Arc<ServiceEntry>>>,
    expiry: ExpiryManager,
    config: RegistryConfig,
    evicted: AtomicU64,
}

impl Registry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
            expiry: ExpiryManager::new(config.expire_time),
            config,
            evicted: AtomicU64::new(0),
        }
    }

    /// Start the background cleanup loop for this registry
    pub fn start_cleanup(self: &Arc<Self>) -> CleanupHandle {
        cleanup::start(self.clone())
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Register a service, replacing any entry with the same id
    pub async fn register(&self, service_id: &str, host: &str, port: u16) -> Result<()> {
        if service_id.is_empty() {
            return Err(RegistryError::InvalidArgument(
                "service id must not be empty".to_string(),
            ));
        }

        let mut services = self.services.write().await;
        // Stamped under the lock so the window stays ordered by touch time
        let entry = Arc::new(ServiceEntry::new(service_id, host, port));
        let replaced = services
            .insert(service_id.to_string(), entry.clone())
            .is_some();
        self.expiry.add(&entry, services.len());

        if replaced {
            debug!("Re-registered service: {} at {}", service_id, entry.address());
        } else {
            debug!("Registered service: {} at {}", service_id, entry.address());
        }
        Ok(())
    }

    /// Deregister a service
    pub async fn deregister(&self, service_id: &str) -> Result<()> {
        let mut services = self.services.write().await;
        if services.remove(service_id).is_none() {
            return Err(RegistryError::NotFound(service_id.to_string()));
        }

        debug!("Deregistered service: {}", service_id);
        Ok(())
    }

    /// Record a heartbeat for a service
    pub async fn update(&self, service_id: &str) -> Result<()> {
        let services = self.services.write().await;
        let entry = services
            .get(service_id)
            .ok_or_else(|| RegistryError::NotFound(service_id.to_string()))?;

        entry.refresh(Instant::now());
        self.expiry.add(entry, services.len());

        debug!("Updated service: {}", service_id);
        Ok(())
    }

    /// Get a snapshot of a single service
    pub async fn get_service_by_id(&self, service_id: &str) -> Result<ServiceEntry> {
        let services = self.services.read().await;
        services
            .get(service_id)
            .map(|entry| entry.as_ref().clone())
            .ok_or_else(|| RegistryError::NotFound(service_id.to_string()))
    }

    /// Snapshot of every live service
    pub async fn get_all_services(&self) -> Vec<ServiceEntry> {
        let services = self.services.read().await;
        services
            .values()
            .map(|entry| entry.as_ref().clone())
            .collect()
    }

    pub async fn service_exists(&self, service_id: &str) -> bool {
        let services = self.services.read().await;
        services.contains_key(service_id)
    }

    /// Get count of registered services
    pub async fn count(&self) -> usize {
        let services = self.services.read().await;
        services.len()
    }

    /// Total number of entries evicted by cleanup sweeps
    pub fn evicted_total(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Evict every entry the expiry window reports as expired at `now`.
    ///
    /// A candidate is only removed if the map still holds that very entry
    /// and it is still expired: entries re-registered or heartbeated since
    /// the scan survive.
    pub async fn sweep(&self, now: Instant) -> usize {
        let candidates = self.expiry.expired_entries(now);
        if candidates.is_empty() {
            return 0;
        }

        self.evict(candidates, now).await
    }

    async fn evict(&self, candidates: Vec<Arc<ServiceEntry>>, now: Instant) -> usize {
        let mut services = self.services.write().await;
        let mut removed = 0;
        for candidate in candidates {
            let still_expired = services.get(&candidate.id).is_some_and(|current| {
                Arc::ptr_eq(current, &candidate)
                    && current.is_expired(self.config.expire_time, now)
            });

            if still_expired {
                services.remove(&candidate.id);
                removed += 1;
                info!("Evicted expired service: {} at {}", candidate.id, candidate.address());
            }
        }
        drop(services);

        self.evicted.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    #[cfg(test)]
    pub(crate) fn expiry(&self) -> &ExpiryManager {
        &self.expiry
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn advance_secs(secs: u64) {
        tokio::time::advance(Duration::from_secs(secs)).await;
    }

    /// Let background tasks woken by the last timer run to completion
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let registry = Registry::default();
        registry.register("svc-1", "10.0.0.1", 9000).await.unwrap();

        let entry = registry.get_service_by_id("svc-1").await.unwrap();
        assert_eq!(entry.host, "10.0.0.1");
        assert_eq!(entry.port, 9000);
        assert_eq!(registry.count().await, 1);
        assert!(registry.service_exists("svc-1").await);
    }

    #[tokio::test]
    async fn test_register_rejects_empty_id() {
        let registry = Registry::default();
        let err = registry.register("", "10.0.0.1", 9000).await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidArgument(_)));
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reregister_overwrites() {
        let registry = Registry::default();
        registry.register("svc-1", "10.0.0.1", 9000).await.unwrap();
        let first = registry.get_service_by_id("svc-1").await.unwrap();

        advance_secs(10).await;
        registry.register("svc-1", "10.0.0.2", 9001).await.unwrap();

        let second = registry.get_service_by_id("svc-1").await.unwrap();
        assert_eq!(registry.count().await, 1);
        assert_eq!(second.address(), "10.0.0.2:9001");
        assert!(second.last_update_time() > first.last_update_time());
    }

    #[tokio::test]
    async fn test_deregister_missing_is_not_found() {
        let registry = Registry::default();
        registry.register("svc-1", "10.0.0.1", 9000).await.unwrap();
        registry.deregister("svc-1").await.unwrap();

        assert_eq!(
            registry.deregister("svc-1").await,
            Err(RegistryError::NotFound("svc-1".to_string()))
        );
        assert_eq!(
            registry.get_service_by_id("svc-1").await.unwrap_err(),
            RegistryError::NotFound("svc-1".to_string())
        );
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let registry = Registry::default();
        assert_eq!(
            registry.update("ghost").await,
            Err(RegistryError::NotFound("ghost".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_refreshes_timestamp() {
        let registry = Registry::default();
        registry.register("svc-1", "10.0.0.1", 9000).await.unwrap();
        let before = registry.get_service_by_id("svc-1").await.unwrap();

        advance_secs(5).await;
        registry.update("svc-1").await.unwrap();

        let after = registry.get_service_by_id("svc-1").await.unwrap();
        assert_eq!(
            after.last_update_time(),
            before.last_update_time() + Duration::from_secs(5)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_stamps_entry_once_store_is_acquired() {
        let registry = Registry::default();

        let guard = registry.services.write().await;
        let register = registry.register("svc-1", "10.0.0.1", 9000);
        tokio::pin!(register);
        assert!(futures::poll!(register.as_mut()).is_pending());

        advance_secs(10).await;
        let acquired_at = Instant::now();
        drop(guard);
        register.await.unwrap();

        let entry = registry.get_service_by_id("svc-1").await.unwrap();
        assert_eq!(entry.last_update_time(), acquired_at);
    }

    #[tokio::test]
    async fn test_get_all_services_is_a_snapshot() {
        let registry = Registry::default();
        registry.register("svc-1", "10.0.0.1", 9000).await.unwrap();
        registry.register("svc-2", "10.0.0.2", 9000).await.unwrap();

        let snapshot = registry.get_all_services().await;
        registry.deregister("svc-1").await.unwrap();

        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.get_all_services().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrefreshed_entry_is_evicted_after_two_minutes() {
        let registry = Arc::new(Registry::default());
        let cleanup = registry.start_cleanup();

        registry.register("svc-1", "10.0.0.1", 9000).await.unwrap();
        assert_eq!(registry.count().await, 1);

        tokio::time::sleep(Duration::from_secs(120)).await;
        settle().await;

        assert!(registry.get_all_services().await.is_empty());
        assert_eq!(
            registry.get_service_by_id("svc-1").await.unwrap_err(),
            RegistryError::NotFound("svc-1".to_string())
        );
        assert_eq!(registry.evicted_total(), 1);

        cleanup.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_within_expire_plus_clean_interval() {
        let registry = Arc::new(Registry::default());
        let cleanup = registry.start_cleanup();
        let config = registry.config().clone();

        registry.register("svc-1", "10.0.0.1", 9000).await.unwrap();

        tokio::time::sleep(config.expire_time + config.clean_interval).await;
        settle().await;

        assert!(!registry.service_exists("svc-1").await);
        cleanup.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeated_entry_is_never_evicted() {
        let registry = Arc::new(Registry::default());
        let cleanup = registry.start_cleanup();

        registry.register("svc-1", "10.0.0.1", 9000).await.unwrap();

        for _ in 0..6 {
            tokio::time::sleep(Duration::from_secs(30)).await;
            settle().await;
            assert!(registry.get_service_by_id("svc-1").await.is_ok());
            registry.update("svc-1").await.unwrap();
        }

        assert_eq!(registry.evicted_total(), 0);
        cleanup.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_spares_entries_updated_after_scan() {
        let registry = Registry::default();
        registry.register("svc-1", "10.0.0.1", 9000).await.unwrap();
        advance_secs(61).await;

        let candidates = registry.expiry().expired_entries(Instant::now());
        assert_eq!(candidates.len(), 1);

        // A heartbeat landing between the scan and the removal wins
        registry.update("svc-1").await.unwrap();
        assert_eq!(registry.evict(candidates, Instant::now()).await, 0);
        assert!(registry.service_exists("svc-1").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_spares_reregistered_entries() {
        let registry = Registry::default();
        registry.register("svc-1", "10.0.0.1", 9000).await.unwrap();
        advance_secs(61).await;

        let candidates = registry.expiry().expired_entries(Instant::now());
        assert_eq!(candidates.len(), 1);

        registry.register("svc-1", "10.0.0.3", 9000).await.unwrap();
        assert_eq!(registry.evict(candidates, Instant::now()).await, 0);
        assert_eq!(
            registry.get_service_by_id("svc-1").await.unwrap().host,
            "10.0.0.3"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_mixed_liveness() {
        let registry = Registry::default();
        registry.register("dead", "10.0.0.1", 9000).await.unwrap();
        registry.register("alive", "10.0.0.2", 9000).await.unwrap();

        for _ in 0..4 {
            advance_secs(20).await;
            registry.update("alive").await.unwrap();
            registry.sweep(Instant::now()).await;
        }

        assert!(!registry.service_exists("dead").await);
        assert!(registry.service_exists("alive").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_window_released_before_store_lock() {
        let registry = Registry::default();
        registry.register("svc-1", "10.0.0.1", 9000).await.unwrap();
        advance_secs(61).await;

        // Hold the store lock: the scan half of the sweep must still complete,
        // and it must have let go of the window before waiting on the store.
        let guard = registry.services.write().await;
        let sweep = registry.sweep(Instant::now());
        tokio::pin!(sweep);
        assert!(futures::poll!(sweep.as_mut()).is_pending());
        assert!(!registry.expiry().is_locked());
        drop(guard);

        assert_eq!(sweep.await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_mutations_and_sweeps_do_not_deadlock() {
        let registry = Arc::new(Registry::new(
            RegistryConfig::new(Duration::from_millis(200), Duration::from_millis(100)).unwrap(),
        ));

        let mut tasks = Vec::new();
        for worker in 0..8 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                for round in 0..200 {
                    let id = format!("svc-{}-{}", worker, round % 10);
                    registry.register(&id, "10.0.0.1", 9000).await.unwrap();
                    let _ = registry.update(&id).await;
                    if round % 3 == 0 {
                        let _ = registry.deregister(&id).await;
                    }
                }
            }));
        }

        let sweeper = {
            let registry = registry.clone();
            tokio::spawn(async move {
                for _ in 0..200 {
                    registry.sweep(Instant::now()).await;
                    tokio::task::yield_now().await;
                }
            })
        };

        let all = async {
            for task in tasks {
                task.await.unwrap();
            }
            sweeper.await.unwrap();
        };
        tokio::time::timeout(Duration::from_secs(30), all)
            .await
            .expect("registry deadlocked");
    }
}
