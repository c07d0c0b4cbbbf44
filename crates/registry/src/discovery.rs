//! Discovery strategies.
//!
//! Strategies produce instances; the registry aggregates them, registers the
//! auto-registering ones, and guards the network-backed strategies with
//! circuit breakers keyed by strategy name.

use std::sync::Arc;

use pi_domain::{Error, Result};

use crate::instance::Instance;

/// A way of finding worker instances.
#[async_trait::async_trait]
pub trait DiscoveryStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Whether discovered instances are registered automatically.
    fn auto_register(&self) -> bool {
        true
    }

    /// Breaker key for strategies that hit flaky backends; `None` disables
    /// breaker guarding.
    fn breaker_key(&self) -> Option<&str> {
        None
    }

    /// Produce instances.  `existing` is a snapshot of what the registry
    /// already knows, for strategies that scale on current capacity.
    async fn discover(&self, existing: &[Instance]) -> Result<Vec<Instance>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Static
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fixed list of instances from configuration.
pub struct StaticDiscovery {
    instances: Vec<Instance>,
    auto_register: bool,
}

impl StaticDiscovery {
    pub fn new(instances: Vec<Instance>, auto_register: bool) -> Self {
        Self {
            instances,
            auto_register,
        }
    }
}

#[async_trait::async_trait]
impl DiscoveryStrategy for StaticDiscovery {
    fn name(&self) -> &str {
        "static"
    }

    fn auto_register(&self) -> bool {
        self.auto_register
    }

    async fn discover(&self, _existing: &[Instance]) -> Result<Vec<Instance>> {
        Ok(self.instances.clone())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Gateway & Kubernetes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Backend seam for network-backed discovery (fleet gateway HTTP API,
/// Kubernetes pod listing).  The concrete transport lives outside the core.
#[async_trait::async_trait]
pub trait InstanceSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<Instance>>;
}

/// Ask a fleet gateway for its known workers.
pub struct GatewayDiscovery {
    source: Arc<dyn InstanceSource>,
    auto_register: bool,
}

impl GatewayDiscovery {
    pub fn new(source: Arc<dyn InstanceSource>, auto_register: bool) -> Self {
        Self {
            source,
            auto_register,
        }
    }
}

#[async_trait::async_trait]
impl DiscoveryStrategy for GatewayDiscovery {
    fn name(&self) -> &str {
        "gateway"
    }

    fn auto_register(&self) -> bool {
        self.auto_register
    }

    fn breaker_key(&self) -> Option<&str> {
        Some("gateway")
    }

    async fn discover(&self, _existing: &[Instance]) -> Result<Vec<Instance>> {
        self.source.fetch().await
    }
}

/// List worker pods via the Kubernetes API.
pub struct KubernetesDiscovery {
    source: Arc<dyn InstanceSource>,
    auto_register: bool,
}

impl KubernetesDiscovery {
    pub fn new(source: Arc<dyn InstanceSource>, auto_register: bool) -> Self {
        Self {
            source,
            auto_register,
        }
    }
}

#[async_trait::async_trait]
impl DiscoveryStrategy for KubernetesDiscovery {
    fn name(&self) -> &str {
        "kubernetes"
    }

    fn auto_register(&self) -> bool {
        self.auto_register
    }

    fn breaker_key(&self) -> Option<&str> {
        Some("kubernetes")
    }

    async fn discover(&self, _existing: &[Instance]) -> Result<Vec<Instance>> {
        self.source.fetch().await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Auto-spawn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Spawns worker child processes.  Concrete process management is external.
#[async_trait::async_trait]
pub trait WorkerSpawner: Send + Sync {
    async fn spawn(&self, provider: &str, model: Option<&str>) -> Result<Instance>;
}

/// Spawn `min(max_instances - current, min_instances)` additional workers
/// when aggregate matching available capacity dips to `capacity_threshold`
/// or below.  Per-instance spawn failures are logged, never fatal to the
/// batch.
pub struct AutoSpawnDiscovery {
    spawner: Arc<dyn WorkerSpawner>,
    provider: String,
    model: Option<String>,
    min_instances: usize,
    max_instances: usize,
    capacity_threshold: u32,
}

impl AutoSpawnDiscovery {
    pub fn new(
        spawner: Arc<dyn WorkerSpawner>,
        provider: impl Into<String>,
        model: Option<String>,
        min_instances: usize,
        max_instances: usize,
        capacity_threshold: u32,
    ) -> Self {
        Self {
            spawner,
            provider: provider.into(),
            model,
            min_instances,
            max_instances,
            capacity_threshold,
        }
    }
}

#[async_trait::async_trait]
impl DiscoveryStrategy for AutoSpawnDiscovery {
    fn name(&self) -> &str {
        "auto_spawn"
    }

    async fn discover(&self, existing: &[Instance]) -> Result<Vec<Instance>> {
        let matching: Vec<_> = existing
            .iter()
            .filter(|i| i.provider.as_str() == self.provider)
            .collect();
        let available: u32 = matching
            .iter()
            .filter(|i| i.health.is_routable())
            .map(|i| i.capacity.available)
            .sum();

        if available > self.capacity_threshold {
            return Ok(Vec::new());
        }

        // Intentional floor: never more than min_instances per call, and
        // never past max_instances in total.
        let headroom = self.max_instances.saturating_sub(matching.len());
        let needed = headroom.min(self.min_instances);
        if needed == 0 {
            return Ok(Vec::new());
        }

        let mut spawned = Vec::new();
        for n in 0..needed {
            match self
                .spawner
                .spawn(&self.provider, self.model.as_deref())
                .await
            {
                Ok(instance) => spawned.push(instance),
                Err(e) => {
                    tracing::warn!(
                        provider = %self.provider,
                        attempt = n,
                        error = %e,
                        "worker spawn failed"
                    );
                }
            }
        }
        if spawned.is_empty() && needed > 0 {
            return Err(Error::Discovery(format!(
                "auto-spawn produced no workers for provider '{}'",
                self.provider
            )));
        }
        Ok(spawned)
    }
}
