//! Discovery resolver exposing live services to RPC client load balancing

use crate::{Registry, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Tag carrying the raw service id on every resolved instance
pub const SERVICE_ID_TAG: &str = "service_id";
/// Description returned by [`BuiltinResolver::target`]
pub const TARGET_DESCRIPTION: &str = "registry-agent";

/// Weight given to every instance; the registry has no notion of capacity
const DEFAULT_WEIGHT: u32 = 1;

/// Caller-side description of the endpoint being resolved
#[derive(Clone, Debug, Default)]
pub struct EndpointInfo {
    pub service_name: String,
    pub tags: HashMap<String, String>,
}

/// A resolved, dialable service instance
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub network: String,
    pub address: String,
    pub weight: u32,
    pub tags: HashMap<String, String>,
}

impl Instance {
    pub fn new(address: impl Into<String>, weight: u32, tags: HashMap<String, String>) -> Self {
        Self {
            network: "tcp".to_string(),
            address: address.into(),
            weight,
            tags,
        }
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

/// Point-in-time result of a resolution
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DiscoveryResult {
    /// Whether callers may reuse this result for the same cache key
    pub cacheable: bool,
    pub cache_key: String,
    pub instances: Vec<Instance>,
}

/// Incremental change between two discovery results
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Change {
    /// The newer result
    pub result: DiscoveryResult,
    pub added: Vec<Instance>,
    pub updated: Vec<Instance>,
    pub removed: Vec<Instance>,
}

impl Change {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Set-diff of two results keyed by instance address.
///
/// Instances present in both results count as updated when their weight or
/// tags differ.
pub fn default_diff(
    cache_key: &str,
    prev: &DiscoveryResult,
    next: &DiscoveryResult,
) -> (Change, bool) {
    let previous: HashMap<&str, &Instance> = prev
        .instances
        .iter()
        .map(|instance| (instance.address.as_str(), instance))
        .collect();
    let current: HashMap<&str, &Instance> = next
        .instances
        .iter()
        .map(|instance| (instance.address.as_str(), instance))
        .collect();

    let mut change = Change {
        result: DiscoveryResult {
            cacheable: next.cacheable,
            cache_key: cache_key.to_string(),
            instances: next.instances.clone(),
        },
        ..Default::default()
    };

    for instance in &next.instances {
        match previous.get(instance.address.as_str()) {
            None => change.added.push(instance.clone()),
            Some(old) if old.weight != instance.weight || old.tags != instance.tags => {
                change.updated.push(instance.clone())
            }
            Some(_) => {}
        }
    }

    for instance in &prev.instances {
        if !current.contains_key(instance.address.as_str()) {
            change.removed.push(instance.clone());
        }
    }

    let changed = !change.is_empty();
    (change, changed)
}

/// Resolve/diff contract consumed by an RPC client's load-balancing layer
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Stable description of this resolver, for logs and metrics
    fn target(&self, endpoint: &EndpointInfo) -> String;

    async fn resolve(&self, key: &str) -> Result<DiscoveryResult>;

    fn diff(
        &self,
        cache_key: &str,
        prev: &DiscoveryResult,
        next: &DiscoveryResult,
    ) -> (Change, bool) {
        default_diff(cache_key, prev, next)
    }

    fn name(&self) -> &str;
}

/// Resolver backed by the in-process [`Registry`]
pub struct BuiltinResolver {
    registry: Arc<Registry>,
}

impl BuiltinResolver {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Resolver for BuiltinResolver {
    fn target(&self, _endpoint: &EndpointInfo) -> String {
        TARGET_DESCRIPTION.to_string()
    }

    /// Membership may change between any two calls, so results are never cacheable
    async fn resolve(&self, _key: &str) -> Result<DiscoveryResult> {
        let mut instances: Vec<Instance> = self
            .registry
            .get_all_services()
            .await
            .into_iter()
            .map(|entry| {
                let tags = HashMap::from([(SERVICE_ID_TAG.to_string(), entry.id.clone())]);
                Instance::new(entry.address(), DEFAULT_WEIGHT, tags)
            })
            .collect();
        instances.sort_by(|a, b| a.address.cmp(&b.address));

        Ok(DiscoveryResult {
            cacheable: false,
            cache_key: String::new(),
            instances,
        })
    }

    fn name(&self) -> &str {
        "builtin"
    }
}
