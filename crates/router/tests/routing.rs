//! Router behavior: budget enforcement, decision shape, fallback execution,
//! and per-instance circuit breaking.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use pi_catalog::{ProviderCatalog, ProviderId};
use pi_domain::config::{RegistryConfig, RouterConfig};
use pi_domain::{Error, Result};
use pi_registry::{
    CapacityRecord, DeploymentMode, HealthProbe, HealthStatus, Instance, InstanceAuth,
    InstanceRegistry,
};
use pi_router::{RouteExecutor, Router, RoutingRequest};

// ── Fixtures ───────────────────────────────────────────────────────

struct OkProbe;

#[async_trait::async_trait]
impl HealthProbe for OkProbe {
    async fn check(&self, _instance: &Instance) -> Result<()> {
        Ok(())
    }
}

fn instance(id: &str, provider: ProviderId) -> Instance {
    Instance {
        id: id.into(),
        name: id.into(),
        provider,
        model: "m".into(),
        deployment_mode: DeploymentMode::Remote,
        endpoint: format!("http://{id}"),
        health: HealthStatus::Healthy,
        capabilities: vec!["chat".into(), "tools".into()],
        region: "default".into(),
        capacity: CapacityRecord::new(10, 0),
        last_heartbeat: chrono::Utc::now(),
        registered_at: chrono::Utc::now(),
        auth: InstanceAuth::default(),
        metadata: HashMap::new(),
        tags: Vec::new(),
    }
}

fn setup(router_config: RouterConfig) -> (Arc<InstanceRegistry>, Router) {
    let registry = Arc::new(InstanceRegistry::new(
        RegistryConfig::default(),
        Arc::new(OkProbe),
    ));
    let router = Router::new(
        router_config,
        registry.clone(),
        Arc::new(ProviderCatalog::builtin()),
    );
    (registry, router)
}

fn request(id: &str, tokens: u64) -> RoutingRequest {
    RoutingRequest {
        request_id: id.into(),
        estimated_tokens: tokens,
        required_capabilities: vec!["chat".into()],
        ..Default::default()
    }
}

/// Executor scripted per instance id: `false` = fail with the given error
/// factory, `true` = succeed.
struct ScriptedExecutor {
    ok: Mutex<HashMap<String, bool>>,
    calls: Mutex<Vec<String>>,
    error: fn() -> Error,
}

impl ScriptedExecutor {
    fn new(error: fn() -> Error) -> Self {
        Self {
            ok: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            error,
        }
    }

    fn set_ok(&self, id: &str, ok: bool) {
        self.ok.lock().insert(id.to_owned(), ok);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait::async_trait]
impl RouteExecutor for ScriptedExecutor {
    type Output = String;

    async fn execute(&self, instance: &Instance, _request: &RoutingRequest) -> Result<String> {
        self.calls.lock().push(instance.id.clone());
        if self.ok.lock().get(&instance.id).copied().unwrap_or(true) {
            Ok(instance.id.clone())
        } else {
            Err((self.error)())
        }
    }
}

// ── route() ────────────────────────────────────────────────────────

#[tokio::test]
async fn route_produces_decision_with_alternatives_and_chain() {
    let (registry, router) = setup(RouterConfig::default());
    registry.register(instance("a1", ProviderId::Anthropic));
    registry.register(instance("o1", ProviderId::Openai));

    let decision = router.route(&request("r1", 10_000), None).unwrap();
    assert_eq!(decision.strategy, "capability_matched");
    assert_eq!(decision.instance.provider, ProviderId::Anthropic);
    assert_eq!(decision.alternatives.len(), 1);
    assert!(decision.estimated_cost > 0.0);
    assert!(!decision
        .fallback_chain
        .contains(&decision.instance.provider));
    assert!(decision.fallback_chain.contains(&ProviderId::Openai));
}

#[tokio::test]
async fn route_rejects_over_budget_requests() {
    let (registry, router) = setup(RouterConfig::default());
    registry.register(instance("a1", ProviderId::Anthropic));

    let err = router.route(&request("r1", 2_000_000), None).unwrap_err();
    assert_eq!(err.code(), "COST_LIMIT_EXCEEDED");
}

#[tokio::test]
async fn route_without_candidates_is_no_candidate() {
    let (_registry, router) = setup(RouterConfig::default());
    let err = router.route(&request("r1", 1_000), None).unwrap_err();
    assert_eq!(err.code(), "NO_CANDIDATE");
}

#[tokio::test]
async fn route_honors_explicit_strategy_and_unknown_is_not_found() {
    let (registry, router) = setup(RouterConfig::default());
    registry.register(instance("g1", ProviderId::Groq));

    let decision = router
        .route(&request("r1", 1_000), Some("latency_optimized"))
        .unwrap();
    assert_eq!(decision.strategy, "latency_optimized");

    let err = router
        .route(&request("r2", 1_000), Some("mystery"))
        .unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}

// ── execute_with_fallback ──────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn fallback_moves_to_next_provider_on_transient_failure() {
    let (registry, router) = setup(RouterConfig::default());
    registry.register(instance("a1", ProviderId::Anthropic));
    registry.register(instance("o1", ProviderId::Openai));

    let executor = ScriptedExecutor::new(|| Error::Transient("connection reset".into()));
    executor.set_ok("a1", false);

    let output = router
        .execute_with_fallback(&request("r1", 1_000), &executor)
        .await
        .unwrap();
    assert_eq!(output, "o1");
    assert_eq!(executor.calls(), vec!["a1", "o1"]);
}

#[tokio::test]
async fn fallback_aborts_immediately_on_auth_errors() {
    let (registry, router) = setup(RouterConfig::default());
    registry.register(instance("a1", ProviderId::Anthropic));
    registry.register(instance("o1", ProviderId::Openai));

    let executor = ScriptedExecutor::new(|| Error::Auth("invalid api key".into()));
    executor.set_ok("a1", false);

    let err = router
        .execute_with_fallback(&request("r1", 1_000), &executor)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "AUTH_FAILED");
    assert_eq!(executor.calls(), vec!["a1"], "no provider after an auth failure");
}

#[tokio::test(start_paused = true)]
async fn fallback_skips_providers_without_instances() {
    let (registry, router) = setup(RouterConfig::default());
    // Only groq exists; the chain's earlier providers have no instances.
    registry.register(instance("g1", ProviderId::Groq));

    let executor = ScriptedExecutor::new(|| Error::Transient("x".into()));
    let output = router
        .execute_with_fallback(&request("r1", 1_000), &executor)
        .await
        .unwrap();
    assert_eq!(output, "g1");
    assert_eq!(executor.calls(), vec!["g1"]);
}

#[tokio::test(start_paused = true)]
async fn single_provider_chain_behaves_like_single_attempt() {
    let config = RouterConfig {
        fallback_chain: vec!["anthropic".into()],
        ..Default::default()
    };
    let (registry, router) = setup(config);
    registry.register(instance("a1", ProviderId::Anthropic));

    let executor = ScriptedExecutor::new(|| Error::Transient("reset".into()));
    executor.set_ok("a1", false);

    let err = router
        .execute_with_fallback(&request("r1", 1_000), &executor)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "TRANSIENT");
    assert_eq!(executor.calls(), vec!["a1"]);
}

#[tokio::test(start_paused = true)]
async fn breaker_trips_after_threshold_and_recovers_after_reset() {
    let config = RouterConfig {
        circuit_breaker_threshold: 3,
        circuit_breaker_reset_ms: 1_000,
        ..Default::default()
    };
    let (registry, router) = setup(config);
    registry.register(instance("x", ProviderId::Anthropic));
    registry.register(instance("y", ProviderId::Openai));

    let executor = ScriptedExecutor::new(|| Error::Transient("http 503".into()));
    executor.set_ok("x", false);

    // Three runs: each fails on x once, then succeeds on y.
    for _ in 0..3 {
        let output = router
            .execute_with_fallback(&request("r", 1_000), &executor)
            .await
            .unwrap();
        assert_eq!(output, "y");
    }
    assert_eq!(
        executor.calls().iter().filter(|c| c.as_str() == "x").count(),
        3
    );

    // Breaker open: the fourth run routes around x entirely.
    let output = router
        .execute_with_fallback(&request("r4", 1_000), &executor)
        .await
        .unwrap();
    assert_eq!(output, "y");
    assert_eq!(
        executor.calls().iter().filter(|c| c.as_str() == "x").count(),
        3,
        "open breaker must shield x"
    );

    // After the reset timeout a probe is admitted; a success closes.
    std::thread::sleep(std::time::Duration::from_millis(1_100));
    executor.set_ok("x", true);
    let output = router
        .execute_with_fallback(&request("r5", 1_000), &executor)
        .await
        .unwrap();
    assert_eq!(output, "x");

    let health = router.get_provider_health();
    let anthropic = health
        .iter()
        .find(|h| h.provider == "anthropic")
        .unwrap();
    assert_eq!(
        anthropic.breakers["x"].state,
        pi_domain::breaker::BreakerState::Closed
    );
}

#[tokio::test(start_paused = true)]
async fn success_rates_feed_provider_health() {
    let (registry, router) = setup(RouterConfig::default());
    registry.register(instance("a1", ProviderId::Anthropic));

    let executor = ScriptedExecutor::new(|| Error::Transient("x".into()));
    router
        .execute_with_fallback(&request("r1", 1_000), &executor)
        .await
        .unwrap();

    let health = router.get_provider_health();
    let anthropic = health.iter().find(|h| h.provider == "anthropic").unwrap();
    assert_eq!(anthropic.success_rate, Some(1.0));
    assert_eq!(anthropic.healthy_instances, 1);
}

// ── Cost API ───────────────────────────────────────────────────────

#[tokio::test]
async fn recorded_costs_show_in_summary_and_budget() {
    let (registry, router) = setup(RouterConfig::default());
    registry.register(instance("o1", ProviderId::Openai));

    router.record_actual_cost(
        pi_router::CostUsage {
            request_id: "r1".into(),
            model: "gpt-4o".into(),
            input_tokens: 10_000,
            output_tokens: 2_000,
            estimated_cost: 0.05,
            actual_cost: None,
            task_type: Some("chat".into()),
        },
        ProviderId::Openai,
    );

    let summary = router.get_cost_summary();
    assert_eq!(summary.record_count, 1);
    assert!(summary.by_provider["openai"] > 0.0);

    let budget = router.get_budget_status();
    assert!(budget.current_period_cost > 0.0);
    assert!(!budget.exceeded);
}
