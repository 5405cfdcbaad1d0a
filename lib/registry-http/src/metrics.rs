//! Prometheus metrics for the registry control plane

use anyhow::Result;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use registry_core::Registry as ServiceRegistry;
use std::sync::{Arc, Mutex, PoisonError};

/// Prometheus metrics collector for registry requests and membership
#[derive(Clone)]
pub struct RegistryMetrics {
    /// Control-plane requests by endpoint and response code
    pub requests_total: IntCounterVec,
    /// Live services at the last scrape
    pub services: IntGauge,
    /// Services evicted by the cleanup loop
    pub evictions_total: IntCounter,
    // Eviction total already folded into `evictions_total`
    synced_evictions: Arc<Mutex<u64>>,
    registry: Registry,
}

impl RegistryMetrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("registry_requests_total", "Total registry control-plane requests"),
            &["endpoint", "code"],
        )?;

        let services = IntGauge::new("registry_services", "Number of live registered services")?;

        let evictions_total = IntCounter::new(
            "registry_evictions_total",
            "Total services evicted after missing heartbeats",
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(services.clone()))?;
        registry.register(Box::new(evictions_total.clone()))?;

        Ok(Self {
            requests_total,
            services,
            evictions_total,
            synced_evictions: Arc::new(Mutex::new(0)),
            registry,
        })
    }

    /// Record a handled request
    pub fn record_request(&self, endpoint: &str, code: i32) {
        self.requests_total
            .with_label_values(&[endpoint, &code.to_string()])
            .inc();
    }

    /// Refresh membership gauges from the registry and render the text format
    pub async fn gather(&self, services: &ServiceRegistry) -> Result<String> {
        self.services.set(services.count().await as i64);

        self.sync_evictions(services.evicted_total());

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Catch the eviction counter up with the registry's running total.
    ///
    /// Concurrent scrapes serialize here so each eviction is counted once.
    fn sync_evictions(&self, evicted: u64) {
        let mut synced = self
            .synced_evictions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if evicted > *synced {
            self.evictions_total.inc_by(evicted - *synced);
            *synced = evicted;
        }
    }
}
