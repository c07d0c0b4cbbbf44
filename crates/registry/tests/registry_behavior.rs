//! Registry behavior: registration events, health transitions with grace
//! removal, capacity-change detection, selection, and discovery aggregation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use pi_catalog::ProviderId;
use pi_domain::config::{CircuitBreakerConfig, HealthMonitoringConfig, RegistryConfig};
use pi_domain::{Error, Result};
use pi_registry::{
    CapacityRecord, DeploymentMode, DiscoveryStrategy, HealthProbe, HealthStatus, Instance,
    InstanceAuth, InstanceRegistry, RegistryEvent, SelectionCriteria, SelectionStrategy,
    StaticDiscovery,
};

// ── Fixtures ───────────────────────────────────────────────────────

fn instance(id: &str, provider: ProviderId, max: u32, active: u32) -> Instance {
    Instance {
        id: id.into(),
        name: id.into(),
        provider,
        model: "m".into(),
        deployment_mode: DeploymentMode::Local,
        endpoint: format!("http://{id}"),
        health: HealthStatus::Healthy,
        capabilities: vec!["chat".into()],
        region: "default".into(),
        capacity: CapacityRecord::new(max, active),
        last_heartbeat: chrono::Utc::now(),
        registered_at: chrono::Utc::now(),
        auth: InstanceAuth::default(),
        metadata: HashMap::new(),
        tags: Vec::new(),
    }
}

#[derive(Clone, Copy)]
enum Probe {
    Ok,
    Slow(u64),
    Fail,
}

struct ScriptedProbe {
    behaviors: Mutex<HashMap<String, Probe>>,
}

impl ScriptedProbe {
    fn new() -> Self {
        Self {
            behaviors: Mutex::new(HashMap::new()),
        }
    }

    fn set(&self, id: &str, probe: Probe) {
        self.behaviors.lock().insert(id.to_owned(), probe);
    }
}

#[async_trait::async_trait]
impl HealthProbe for ScriptedProbe {
    async fn check(&self, instance: &Instance) -> Result<()> {
        let behavior = self
            .behaviors
            .lock()
            .get(&instance.id)
            .copied()
            .unwrap_or(Probe::Ok);
        match behavior {
            Probe::Ok => Ok(()),
            Probe::Slow(ms) => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(())
            }
            Probe::Fail => Err(Error::Transient("connection refused".into())),
        }
    }
}

fn fast_config() -> RegistryConfig {
    RegistryConfig {
        health_monitoring: HealthMonitoringConfig {
            interval_ms: 50,
            timeout_ms: 300,
            max_retries: 3,
            removal_grace_period_ms: 150,
        },
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 2,
            reset_timeout_ms: 100,
        },
        ..Default::default()
    }
}

fn registry_with(probe: Arc<ScriptedProbe>) -> Arc<InstanceRegistry> {
    Arc::new(InstanceRegistry::new(fast_config(), probe))
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<RegistryEvent>) -> Vec<RegistryEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// ── Registration ───────────────────────────────────────────────────

#[tokio::test]
async fn replacing_registration_emits_unregistered_first() {
    let registry = registry_with(Arc::new(ScriptedProbe::new()));
    let mut rx = registry.subscribe();

    registry.register(instance("a", ProviderId::Openai, 10, 0));
    drain(&mut rx);

    registry.register(instance("a", ProviderId::Openai, 20, 0));
    let events = drain(&mut rx);

    match &events[0] {
        RegistryEvent::InstanceUnregistered { instance_id, reason } => {
            assert_eq!(instance_id, "a");
            assert_eq!(reason, "replaced");
        }
        other => panic!("expected unregistered first, got {other:?}"),
    }
    assert!(matches!(
        &events[1],
        RegistryEvent::InstanceRegistered { instance } if instance.id == "a"
    ));
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn unregister_missing_instance_is_not_found() {
    let registry = registry_with(Arc::new(ScriptedProbe::new()));
    let err = registry.unregister("ghost", "test").unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}

// ── Selection ──────────────────────────────────────────────────────

#[tokio::test]
async fn least_loaded_selection_scenario() {
    let registry = registry_with(Arc::new(ScriptedProbe::new()));
    registry.register(instance("A", ProviderId::Openai, 10, 3));
    registry.register(instance("B", ProviderId::Openai, 10, 1));
    registry.register(instance("C", ProviderId::Anthropic, 10, 0));

    let criteria = SelectionCriteria {
        preferred_provider: Some(ProviderId::Openai),
        strategy: SelectionStrategy::LeastLoaded,
        ..Default::default()
    };
    let picked = registry.select_instance(&criteria).unwrap();
    assert_eq!(picked.id, "B");
}

#[tokio::test]
async fn empty_candidate_set_returns_none() {
    let registry = registry_with(Arc::new(ScriptedProbe::new()));
    registry.register(instance("a", ProviderId::Openai, 10, 0));

    let criteria = SelectionCriteria {
        preferred_provider: Some(ProviderId::Groq),
        ..Default::default()
    };
    assert!(registry.select_instance(&criteria).is_none());
}

#[tokio::test]
async fn round_robin_uses_registry_counter() {
    let registry = registry_with(Arc::new(ScriptedProbe::new()));
    registry.register(instance("a", ProviderId::Openai, 10, 0));
    registry.register(instance("b", ProviderId::Openai, 10, 0));

    let criteria = SelectionCriteria {
        strategy: SelectionStrategy::RoundRobin,
        ..Default::default()
    };
    let first = registry.select_instance(&criteria).unwrap().id;
    let second = registry.select_instance(&criteria).unwrap().id;
    let third = registry.select_instance(&criteria).unwrap().id;
    assert_ne!(first, second);
    assert_eq!(first, third);
}

// ── Health ─────────────────────────────────────────────────────────

#[tokio::test]
async fn health_transitions_and_recovery_cancel_removal() {
    let probe = Arc::new(ScriptedProbe::new());
    let registry = registry_with(probe.clone());
    registry.register(instance("w", ProviderId::Openai, 10, 0));
    let mut rx = registry.subscribe();

    // Fail → unhealthy + failed event + removal scheduled.
    probe.set("w", Probe::Fail);
    registry.run_health_checks().await;
    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        RegistryEvent::InstanceHealthChanged { before: HealthStatus::Healthy, after: HealthStatus::Unhealthy, .. }
    )));
    assert!(events
        .iter()
        .any(|e| matches!(e, RegistryEvent::InstanceFailed { .. })));

    // Recover inside the grace period: instance must survive.
    probe.set("w", Probe::Ok);
    registry.run_health_checks().await;
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(registry.get_instance("w").is_some());
    assert_eq!(registry.get_instance("w").unwrap().health, HealthStatus::Healthy);
}

#[tokio::test]
async fn unhealthy_instance_is_removed_after_grace() {
    let probe = Arc::new(ScriptedProbe::new());
    let registry = registry_with(probe.clone());
    registry.register(instance("w", ProviderId::Openai, 10, 0));

    probe.set("w", Probe::Fail);
    registry.run_health_checks().await;
    assert!(registry.get_instance("w").is_some());

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(registry.get_instance("w").is_none(), "grace expiry must remove");
}

#[tokio::test]
async fn slow_probe_is_degraded_and_timeout_is_unhealthy() {
    let probe = Arc::new(ScriptedProbe::new());
    let registry = registry_with(probe.clone());
    registry.register(instance("slow", ProviderId::Openai, 10, 0));
    registry.register(instance("dead", ProviderId::Openai, 10, 0));

    // 270 ms of a 300 ms timeout is past the 80 % band.
    probe.set("slow", Probe::Slow(270));
    // 10 s sleeps straight through the timeout.
    probe.set("dead", Probe::Slow(10_000));
    registry.run_health_checks().await;

    assert_eq!(
        registry.get_instance("slow").unwrap().health,
        HealthStatus::Degraded
    );
    assert_eq!(
        registry.get_instance("dead").unwrap().health,
        HealthStatus::Unhealthy
    );
}

#[tokio::test]
async fn one_failing_check_does_not_block_others() {
    let probe = Arc::new(ScriptedProbe::new());
    let registry = registry_with(probe.clone());
    registry.register(instance("bad", ProviderId::Openai, 10, 0));
    registry.register(instance("good", ProviderId::Openai, 10, 0));

    probe.set("bad", Probe::Fail);
    registry.run_health_checks().await;

    assert_eq!(
        registry.get_instance("good").unwrap().health,
        HealthStatus::Healthy
    );
    assert_eq!(
        registry.get_instance("bad").unwrap().health,
        HealthStatus::Unhealthy
    );
}

// ── Capacity ───────────────────────────────────────────────────────

#[tokio::test]
async fn capacity_report_breaks_down_by_provider_and_region() {
    let registry = registry_with(Arc::new(ScriptedProbe::new()));
    let mut eu = instance("eu1", ProviderId::Anthropic, 10, 4);
    eu.region = "eu-west".into();
    registry.register(eu);
    registry.register(instance("us1", ProviderId::Openai, 20, 5));

    let report = registry.get_available_capacity();
    assert_eq!(report.total_available, 6 + 15);
    assert_eq!(report.by_provider["anthropic"].available, 6);
    assert_eq!(report.by_provider["openai"].available, 15);
    assert_eq!(report.by_region["eu-west"].instances, 1);
    assert_eq!(report.by_region["default"].instances, 1);
}

#[tokio::test]
async fn small_capacity_moves_do_not_emit_change() {
    let registry = registry_with(Arc::new(ScriptedProbe::new()));
    registry.register(instance("a", ProviderId::Openai, 100, 0));
    let mut rx = registry.subscribe();

    // 100 → 95 available is a 5 % move with an unchanged healthy count.
    registry.update_instance_capacity("a", 5, None).unwrap();
    let events = drain(&mut rx);
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, RegistryEvent::CapacityChanged { .. })),
        "5% move must not emit capacity_changed"
    );

    // 95 → 45 available is a big move.
    registry.update_instance_capacity("a", 55, None).unwrap();
    let events = drain(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, RegistryEvent::CapacityChanged { .. })));
}

// ── Discovery ──────────────────────────────────────────────────────

struct FailingDiscovery {
    name: &'static str,
    guarded: bool,
}

#[async_trait::async_trait]
impl DiscoveryStrategy for FailingDiscovery {
    fn name(&self) -> &str {
        self.name
    }
    fn breaker_key(&self) -> Option<&str> {
        self.guarded.then_some(self.name)
    }
    async fn discover(&self, _existing: &[Instance]) -> Result<Vec<Instance>> {
        Err(Error::Transient("backend unreachable".into()))
    }
}

#[tokio::test]
async fn discovery_aggregates_and_auto_registers() {
    let registry = registry_with(Arc::new(ScriptedProbe::new()));
    registry.register_strategy(Arc::new(StaticDiscovery::new(
        vec![instance("s1", ProviderId::Ollama, 0, 0)],
        true,
    )));

    let found = registry.discover_instances(None).await.unwrap();
    assert_eq!(found.len(), 1);
    // Auto-registered with defaults applied (max_concurrent filled in).
    let registered = registry.get_instance("s1").unwrap();
    assert!(registered.capacity.max_concurrent > 0);
}

#[tokio::test]
async fn discovery_partial_failure_still_returns_instances() {
    let registry = registry_with(Arc::new(ScriptedProbe::new()));
    registry.register_strategy(Arc::new(FailingDiscovery {
        name: "gateway",
        guarded: true,
    }));
    registry.register_strategy(Arc::new(StaticDiscovery::new(
        vec![instance("s1", ProviderId::Ollama, 4, 0)],
        true,
    )));

    let found = registry.discover_instances(None).await.unwrap();
    assert_eq!(found.len(), 1);
}

#[tokio::test]
async fn discovery_total_failure_carries_first_error() {
    let registry = registry_with(Arc::new(ScriptedProbe::new()));
    registry.register_strategy(Arc::new(FailingDiscovery {
        name: "gateway",
        guarded: true,
    }));
    registry.register_strategy(Arc::new(FailingDiscovery {
        name: "kubernetes",
        guarded: true,
    }));

    let err = registry.discover_instances(None).await.unwrap_err();
    assert_eq!(err.code(), "DISCOVERY_FAILED");
    assert!(err.to_string().contains("backend unreachable"));
}

#[tokio::test]
async fn discovery_breaker_opens_after_threshold() {
    let registry = registry_with(Arc::new(ScriptedProbe::new()));
    registry.register_strategy(Arc::new(FailingDiscovery {
        name: "gateway",
        guarded: true,
    }));

    // Threshold is 2 in the test config; the breaker trips after two calls.
    let _ = registry.discover_instances(None).await;
    let _ = registry.discover_instances(None).await;

    let err = registry.discover_instances(None).await.unwrap_err();
    assert!(err.to_string().contains("circuit breaker open"));
}

#[tokio::test]
async fn dispose_clears_everything() {
    let registry = registry_with(Arc::new(ScriptedProbe::new()));
    registry.register(instance("a", ProviderId::Openai, 10, 0));
    registry.start_health_monitoring();
    registry.dispose();
    assert!(registry.is_empty());
}
