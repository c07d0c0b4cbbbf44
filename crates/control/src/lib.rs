//! Control-plane container construction and background-task spawning.
//!
//! Everything that used to be a module-level global is explicit here: the
//! container owns each subsystem, components receive their collaborators by
//! construction, and tests can swap in any tier or worker transport.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;

use pi_catalog::{ProviderCatalog, ProviderId};
use pi_domain::config::{Config, ConfigSeverity, DiscoveryStrategyConfig, StaticInstanceConfig};
use pi_registry::{
    CapacityRecord, DeploymentMode, DiscoveryStrategy, HealthProbe, HealthStatus, Instance,
    InstanceAuth, InstanceRegistry, StaticDiscovery,
};
use pi_router::Router;
use pi_sessions::SessionManager;
use pi_state::{DurableStore, FastCache, FileStore, MemoryCache, StateSynchronizer};
use pi_tools::ToolInterceptor;
use pi_tree::{TreeManager, TreeStore};
use pi_worker_protocol::{WorkerClient, WorkerEndpoint};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Container
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ControlPlane {
    pub config: Arc<Config>,
    pub catalog: Arc<ProviderCatalog>,
    pub registry: Arc<InstanceRegistry>,
    pub router: Arc<Router>,
    pub synchronizer: Arc<StateSynchronizer>,
    pub trees: Arc<TreeManager>,
    pub interceptor: Arc<ToolInterceptor>,
    pub sessions: Arc<SessionManager>,
}

impl ControlPlane {
    pub fn builder(config: Config) -> ControlPlaneBuilder {
        ControlPlaneBuilder {
            config,
            worker: None,
            probe: None,
            cache: None,
            store: None,
            extra_strategies: Vec::new(),
        }
    }

    /// Start the background machinery: health monitoring, the checkpoint
    /// cadence, and an initial discovery pass.
    pub async fn start(&self) -> anyhow::Result<()> {
        self.registry.start_health_monitoring();
        self.sessions.start_cadence();
        match self.registry.discover_instances(None).await {
            Ok(found) => {
                tracing::info!(discovered = found.len(), "initial discovery completed");
            }
            Err(e) => {
                tracing::warn!(error = %e, "initial discovery failed");
            }
        }
        Ok(())
    }

    pub fn shutdown(&self) {
        self.sessions.dispose();
        self.registry.dispose();
        tracing::info!("control plane shut down");
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Builder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ControlPlaneBuilder {
    config: Config,
    worker: Option<Arc<dyn WorkerClient>>,
    probe: Option<Arc<dyn HealthProbe>>,
    cache: Option<Arc<dyn FastCache>>,
    store: Option<Arc<dyn DurableStore>>,
    extra_strategies: Vec<Arc<dyn DiscoveryStrategy>>,
}

impl ControlPlaneBuilder {
    /// The worker transport is the one mandatory collaborator.
    pub fn worker(mut self, worker: Arc<dyn WorkerClient>) -> Self {
        self.worker = Some(worker);
        self
    }

    /// Override the health probe (default: the worker's `health_check`).
    pub fn probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn FastCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn durable_store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Add a discovery strategy beyond those derived from configuration
    /// (gateway/kubernetes sources and spawners live outside the core).
    pub fn discovery_strategy(mut self, strategy: Arc<dyn DiscoveryStrategy>) -> Self {
        self.extra_strategies.push(strategy);
        self
    }

    pub fn build(self) -> anyhow::Result<ControlPlane> {
        let issues = self.config.validate();
        for issue in &issues {
            match issue.severity {
                ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
                ConfigSeverity::Error => tracing::error!("config: {issue}"),
            }
        }
        if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
            anyhow::bail!(
                "config validation failed with {} error(s)",
                issues
                    .iter()
                    .filter(|i| i.severity == ConfigSeverity::Error)
                    .count()
            );
        }

        let config = Arc::new(self.config);
        let worker = self
            .worker
            .context("a WorkerClient transport is required")?;
        let catalog = Arc::new(ProviderCatalog::builtin());

        let probe = self
            .probe
            .unwrap_or_else(|| Arc::new(WorkerHealthProbe::new(worker.clone())));
        let registry = Arc::new(InstanceRegistry::new(config.registry.clone(), probe));

        for strategy_config in &config.registry.discovery_strategies {
            if let Some(strategy) = strategy_from_config(strategy_config, config.as_ref())? {
                registry.register_strategy(strategy);
            }
        }
        for strategy in self.extra_strategies {
            registry.register_strategy(strategy);
        }
        tracing::info!("instance registry ready");

        let router = Arc::new(Router::new(
            config.router.clone(),
            registry.clone(),
            catalog.clone(),
        ));
        tracing::info!(default_strategy = %config.router.default_strategy, "router ready");

        let cache = self.cache.unwrap_or_else(|| Arc::new(MemoryCache::new()));
        let store = match self.store {
            Some(store) => store,
            None => {
                let state_dir = PathBuf::from(&config.state.state_dir);
                Arc::new(
                    FileStore::new(&state_dir)
                        .with_context(|| format!("opening state dir {}", state_dir.display()))?,
                )
            }
        };
        let synchronizer = Arc::new(StateSynchronizer::new(cache, store, config.state.clone()));
        tracing::info!(state_dir = %config.state.state_dir, "state synchronizer ready");

        let trees = Arc::new(TreeManager::new(Some(
            synchronizer.clone() as Arc<dyn TreeStore>
        )));
        let interceptor = Arc::new(ToolInterceptor::new(
            config.tools.clone(),
            Some(trees.clone()),
        ));
        tracing::info!("tool interceptor ready");

        let sessions = Arc::new(SessionManager::new(
            config.sessions.clone(),
            registry.clone(),
            router.clone(),
            synchronizer.clone(),
            trees.clone(),
            interceptor.clone(),
            worker,
        ));

        Ok(ControlPlane {
            config,
            catalog,
            registry,
            router,
            synchronizer,
            trees,
            interceptor,
            sessions,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Health probe backed by the worker transport.
pub struct WorkerHealthProbe {
    worker: Arc<dyn WorkerClient>,
}

impl WorkerHealthProbe {
    pub fn new(worker: Arc<dyn WorkerClient>) -> Self {
        Self { worker }
    }
}

#[async_trait::async_trait]
impl HealthProbe for WorkerHealthProbe {
    async fn check(&self, instance: &Instance) -> pi_domain::Result<()> {
        self.worker
            .health_check(&WorkerEndpoint {
                instance_id: instance.id.clone(),
                url: instance.endpoint.clone(),
            })
            .await
    }
}

/// Build the strategies expressible from configuration alone.  Gateway,
/// Kubernetes, and auto-spawn strategies need external collaborators
/// (sources, spawners) and are added through the builder instead.
fn strategy_from_config(
    strategy: &DiscoveryStrategyConfig,
    config: &Config,
) -> anyhow::Result<Option<Arc<dyn DiscoveryStrategy>>> {
    match strategy {
        DiscoveryStrategyConfig::Static {
            instances,
            auto_register,
        } => {
            let instances = instances
                .iter()
                .map(|i| static_instance(i, config))
                .collect::<anyhow::Result<Vec<_>>>()?;
            Ok(Some(Arc::new(StaticDiscovery::new(
                instances,
                *auto_register,
            ))))
        }
        DiscoveryStrategyConfig::Gateway { endpoint, .. } => {
            tracing::warn!(
                endpoint = %endpoint,
                "gateway discovery configured without a source; add one via the builder"
            );
            Ok(None)
        }
        DiscoveryStrategyConfig::Kubernetes { namespace, .. } => {
            tracing::warn!(
                namespace = %namespace,
                "kubernetes discovery configured without a source; add one via the builder"
            );
            Ok(None)
        }
        DiscoveryStrategyConfig::AutoSpawn { provider, .. } => {
            tracing::warn!(
                provider = %provider,
                "auto-spawn discovery configured without a spawner; add one via the builder"
            );
            Ok(None)
        }
    }
}

fn static_instance(spec: &StaticInstanceConfig, config: &Config) -> anyhow::Result<Instance> {
    let provider = ProviderId::from_str(&spec.provider)
        .with_context(|| format!("instance '{}': unknown provider", spec.id))?;
    let now = Utc::now();
    Ok(Instance {
        id: spec.id.clone(),
        name: spec.name.clone().unwrap_or_else(|| spec.id.clone()),
        provider,
        model: spec.model.clone(),
        deployment_mode: DeploymentMode::Remote,
        endpoint: spec.endpoint.clone(),
        health: HealthStatus::Unknown,
        capabilities: if spec.capabilities.is_empty() {
            config.registry.defaults.capabilities.clone()
        } else {
            spec.capabilities.clone()
        },
        region: spec
            .region
            .clone()
            .unwrap_or_else(|| config.registry.defaults.region.clone()),
        capacity: CapacityRecord::new(
            spec.max_concurrent
                .unwrap_or(config.registry.defaults.max_concurrent),
            0,
        ),
        last_heartbeat: now,
        registered_at: now,
        auth: InstanceAuth::default(),
        metadata: config.registry.defaults.metadata.clone(),
        tags: spec.tags.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pi_domain::Result;
    use pi_worker_protocol::{InitRequest, InitResult, SendRequest, SendResult, StatusResult, StreamChunk};
    use pi_domain::stream::BoxStream;
    use serde_json::Value;

    struct NoWorker;

    #[async_trait::async_trait]
    impl WorkerClient for NoWorker {
        async fn init(&self, _e: &WorkerEndpoint, _r: InitRequest) -> Result<InitResult> {
            Err(pi_domain::Error::Worker("unreachable".into()))
        }
        async fn close(&self, _e: &WorkerEndpoint, _s: &str) -> Result<()> {
            Ok(())
        }
        async fn kill(&self, _e: &WorkerEndpoint, _s: &str) -> Result<()> {
            Ok(())
        }
        async fn send(&self, _e: &WorkerEndpoint, _s: &str, _r: SendRequest) -> Result<SendResult> {
            Err(pi_domain::Error::Worker("unreachable".into()))
        }
        async fn send_stream(
            &self,
            _e: &WorkerEndpoint,
            _s: &str,
            _r: SendRequest,
        ) -> Result<BoxStream<'static, StreamChunk>> {
            Err(pi_domain::Error::Worker("unreachable".into()))
        }
        async fn submit_tool_result(
            &self,
            _e: &WorkerEndpoint,
            _s: &str,
            _t: &str,
            _v: Value,
        ) -> Result<()> {
            Ok(())
        }
        async fn status(&self, _e: &WorkerEndpoint, _s: &str) -> Result<StatusResult> {
            Err(pi_domain::Error::Worker("unreachable".into()))
        }
        async fn switch_model(&self, _e: &WorkerEndpoint, _s: &str, _m: &str) -> Result<()> {
            Ok(())
        }
        async fn switch_provider(&self, _e: &WorkerEndpoint, _s: &str, _p: &str) -> Result<()> {
            Ok(())
        }
        async fn restore(&self, _e: &WorkerEndpoint, _v: &Value) -> Result<String> {
            Err(pi_domain::Error::Worker("unreachable".into()))
        }
        async fn verify(&self, _e: &WorkerEndpoint, _s: &str, _v: &Value) -> Result<bool> {
            Ok(false)
        }
        async fn health_check(&self, _e: &WorkerEndpoint) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn builder_wires_a_full_container() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.state.state_dir = dir.path().display().to_string();
        config.registry.discovery_strategies = vec![DiscoveryStrategyConfig::Static {
            instances: vec![StaticInstanceConfig {
                id: "w1".into(),
                provider: "ollama".into(),
                model: "llama3.2".into(),
                endpoint: "http://127.0.0.1:9000".into(),
                name: None,
                region: None,
                capabilities: vec![],
                max_concurrent: None,
                tags: vec![],
            }],
            auto_register: true,
        }];

        let plane = ControlPlane::builder(config)
            .worker(Arc::new(NoWorker))
            .build()
            .unwrap();

        let found = plane.registry.discover_instances(None).await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(plane.registry.get_instance("w1").is_some());
        plane.shutdown();
    }

    #[tokio::test]
    async fn builder_requires_a_worker() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.state.state_dir = dir.path().display().to_string();
        assert!(ControlPlane::builder(config).build().is_err());
    }

    #[test]
    fn unknown_static_provider_is_rejected() {
        let config = Config::default();
        let spec = StaticInstanceConfig {
            id: "w1".into(),
            provider: "aws".into(),
            model: "m".into(),
            endpoint: "http://x".into(),
            name: None,
            region: None,
            capabilities: vec![],
            max_concurrent: None,
            tags: vec![],
        };
        assert!(static_instance(&spec, &config).is_err());
    }
}
