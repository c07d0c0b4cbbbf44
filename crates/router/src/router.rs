//! The router: strategy dispatch, circuit breaking, budget enforcement,
//! and fallback-chain execution.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use pi_catalog::{ProviderCatalog, ProviderId};
use pi_domain::breaker::{BreakerConfig, BreakerMap, BreakerSnapshot};
use pi_domain::config::RouterConfig;
use pi_domain::trace::TraceEvent;
use pi_domain::{Error, Result};
use pi_registry::{Instance, InstanceRegistry, SelectionCriteria, SelectionStrategy};

use crate::cost::{
    estimate_cost, estimate_request_cost, BudgetStatus, CostSummary, CostTracker, CostUsage,
};
use crate::request::{RankedAlternative, RoutingDecision, RoutingRequest};
use crate::retry::{classify_error, retry_delay, ErrorCategory};
use crate::strategy::{
    CapabilityMatchedStrategy, CostOptimizedStrategy, FallbackChainStrategy,
    LatencyOptimizedStrategy, RoutingStrategy, StrategyContext,
};

/// Executes a routed request against a concrete instance.  Implemented by
/// the session manager (worker init/send) and by tests.
#[async_trait::async_trait]
pub trait RouteExecutor: Send + Sync {
    type Output: Send;

    async fn execute(&self, instance: &Instance, request: &RoutingRequest)
        -> Result<Self::Output>;
}

/// Per-provider health as the router sees it.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    pub provider: String,
    pub healthy_instances: usize,
    pub success_rate: Option<f64>,
    pub breakers: HashMap<String, BreakerSnapshot>,
}

#[derive(Default)]
struct AttemptCounters {
    successes: u64,
    total: u64,
}

pub struct Router {
    config: RouterConfig,
    registry: Arc<InstanceRegistry>,
    catalog: Arc<ProviderCatalog>,
    strategies: RwLock<HashMap<String, Arc<dyn RoutingStrategy>>>,
    default_strategy: RwLock<String>,
    breakers: BreakerMap,
    cost: CostTracker,
    attempts: Mutex<HashMap<ProviderId, AttemptCounters>>,
    fallback_chain: Vec<ProviderId>,
}

impl Router {
    pub fn new(
        config: RouterConfig,
        registry: Arc<InstanceRegistry>,
        catalog: Arc<ProviderCatalog>,
    ) -> Self {
        let fallback_chain = config
            .fallback_chain
            .iter()
            .filter_map(|name| match ProviderId::from_str(name) {
                Ok(id) => Some(id),
                Err(_) => {
                    tracing::warn!(provider = %name, "unknown provider in fallback chain, skipping");
                    None
                }
            })
            .collect();

        let breakers = BreakerMap::new(BreakerConfig {
            failure_threshold: config.circuit_breaker_threshold,
            reset_timeout: Duration::from_millis(config.circuit_breaker_reset_ms),
        });
        let cost = CostTracker::new(
            config.enable_cost_tracking,
            Duration::from_millis(config.cost_budget_period_ms),
            config.max_budget_per_period,
        );

        let mut strategies: HashMap<String, Arc<dyn RoutingStrategy>> = HashMap::new();
        let builtin: Vec<Arc<dyn RoutingStrategy>> = vec![
            Arc::new(CostOptimizedStrategy),
            Arc::new(CapabilityMatchedStrategy),
            Arc::new(LatencyOptimizedStrategy),
            Arc::new(FallbackChainStrategy),
        ];
        for strategy in builtin {
            strategies.insert(strategy.name().to_owned(), strategy);
        }

        let default_strategy = config.default_strategy.clone();
        Self {
            config,
            registry,
            catalog,
            strategies: RwLock::new(strategies),
            default_strategy: RwLock::new(default_strategy),
            breakers,
            cost,
            attempts: Mutex::new(HashMap::new()),
            fallback_chain,
        }
    }

    // ── Strategy management ────────────────────────────────────────

    pub fn register_strategy(&self, strategy: Arc<dyn RoutingStrategy>) {
        self.strategies
            .write()
            .insert(strategy.name().to_owned(), strategy);
    }

    pub fn set_default_strategy(&self, name: &str) -> Result<()> {
        if !self.strategies.read().contains_key(name) {
            return Err(Error::not_found("strategy", name));
        }
        *self.default_strategy.write() = name.to_owned();
        Ok(())
    }

    // ── Routing ────────────────────────────────────────────────────

    /// Evaluate a request into a decision.  Fails with
    /// `COST_LIMIT_EXCEEDED` before any candidate work when the estimated
    /// request cost breaks the ceiling.
    pub fn route(
        &self,
        request: &RoutingRequest,
        strategy_name: Option<&str>,
    ) -> Result<RoutingDecision> {
        let estimated = estimate_request_cost(request.estimated_tokens);
        let ceiling = request
            .max_cost
            .unwrap_or(self.config.max_cost_per_request)
            .min(self.config.max_cost_per_request);
        if estimated > ceiling {
            return Err(Error::constraint(
                "COST_LIMIT_EXCEEDED",
                format!("estimated request cost ${estimated:.4} exceeds ceiling ${ceiling:.2}"),
            ));
        }

        let strategy = {
            let name = strategy_name
                .map(str::to_owned)
                .unwrap_or_else(|| self.default_strategy.read().clone());
            self.strategies
                .read()
                .get(&name)
                .cloned()
                .ok_or_else(|| Error::not_found("strategy", &name))?
        };

        let candidates = self.gather_candidates(request);
        if candidates.is_empty() {
            return Err(Error::NoCandidate(format!(
                "request {}: no routable instance after filters",
                request.request_id
            )));
        }

        let success_rates = self.success_rates();
        let ctx = StrategyContext {
            catalog: &self.catalog,
            success_rates: &success_rates,
            fallback_chain: &self.fallback_chain,
        };
        let outcome = strategy.evaluate(request, &candidates, &ctx)?;
        let (selected, score) = outcome
            .ranked
            .first()
            .cloned()
            .ok_or_else(|| Error::NoCandidate(outcome.reason.clone()))?;

        let alternatives = outcome
            .ranked
            .iter()
            .skip(1)
            .map(|(i, s)| RankedAlternative {
                instance_id: i.id.clone(),
                provider: i.provider,
                score: *s,
            })
            .collect();

        let decision = RoutingDecision {
            request_id: request.request_id.clone(),
            estimated_cost: estimate_cost(&self.catalog, &selected, request.estimated_tokens),
            expected_latency_ms: self.catalog.expected_latency_ms(selected.provider),
            fallback_chain: self.get_fallback_chain(selected.provider),
            strategy: strategy.name().to_owned(),
            score,
            alternatives,
            timestamp: Utc::now(),
            instance: selected,
        };

        TraceEvent::RouteDecided {
            request_id: decision.request_id.clone(),
            strategy: decision.strategy.clone(),
            instance_id: decision.instance.id.clone(),
            provider: decision.instance.provider.to_string(),
            score: decision.score,
            estimated_cost: decision.estimated_cost,
        }
        .emit();
        Ok(decision)
    }

    /// Routable instances that pass the request's static filters and whose
    /// breaker currently admits traffic.
    fn gather_candidates(&self, request: &RoutingRequest) -> Vec<Instance> {
        self.registry
            .healthy_instances()
            .into_iter()
            .filter(|i| {
                request
                    .preferred_provider
                    .map(|p| i.provider == p)
                    .unwrap_or(true)
            })
            .filter(|i| i.has_capabilities(&request.required_capabilities))
            .filter(|i| {
                request
                    .max_latency_ms
                    .map(|max| self.catalog.expected_latency_ms(i.provider) <= max)
                    .unwrap_or(true)
            })
            .filter(|i| self.breakers.get(&i.id).is_callable())
            .collect()
    }

    /// The configured provider order with `primary` removed.
    pub fn get_fallback_chain(&self, primary: ProviderId) -> Vec<ProviderId> {
        self.fallback_chain
            .iter()
            .copied()
            .filter(|&p| p != primary)
            .collect()
    }

    // ── Execution ──────────────────────────────────────────────────

    /// Route, then walk `[primary] ++ fallback chain` executing against one
    /// healthy instance per provider.  Auth, invalid-request, and fatal
    /// failures abort the walk; everything else records a breaker failure,
    /// backs off per the retry table, and moves on.
    pub async fn execute_with_fallback<E: RouteExecutor>(
        &self,
        request: &RoutingRequest,
        executor: &E,
    ) -> Result<E::Output> {
        let decision = self.route(request, None)?;
        let primary = decision.instance.provider;

        let mut chain = vec![primary];
        chain.extend(decision.fallback_chain.iter().copied());

        let mut attempts = 0u32;
        let mut last_error: Option<Error> = None;

        for provider in chain {
            if attempts >= self.config.max_attempts {
                break;
            }

            // The primary decision already picked an instance; later
            // providers ask the registry for their least-loaded one.
            let instance = if provider == primary && attempts == 0 {
                Some(decision.instance.clone())
            } else {
                self.registry.select_instance(&SelectionCriteria {
                    preferred_provider: Some(provider),
                    required_capabilities: request.required_capabilities.clone(),
                    strategy: SelectionStrategy::LeastLoaded,
                    ..Default::default()
                })
            };
            let Some(instance) = instance else {
                tracing::debug!(provider = %provider, "no healthy instance, skipping provider");
                continue;
            };

            let breaker = self.breakers.get(&instance.id);
            if !breaker.try_acquire() {
                tracing::debug!(instance_id = %instance.id, "breaker open, skipping instance");
                continue;
            }

            attempts += 1;
            match executor.execute(&instance, request).await {
                Ok(output) => {
                    breaker.record_success();
                    self.record_attempt(provider, true);
                    return Ok(output);
                }
                Err(e) => {
                    breaker.record_failure();
                    self.record_attempt(provider, false);
                    let category = classify_error(&e);
                    tracing::warn!(
                        instance_id = %instance.id,
                        provider = %provider,
                        category = ?category,
                        error = %e,
                        "execution attempt failed"
                    );

                    if matches!(
                        category,
                        ErrorCategory::Auth | ErrorCategory::InvalidRequest | ErrorCategory::Fatal
                    ) {
                        return Err(e);
                    }

                    TraceEvent::RouteFallback {
                        request_id: request.request_id.clone(),
                        from_provider: provider.to_string(),
                        to_provider: "next-in-chain".into(),
                        reason: e.to_string(),
                    }
                    .emit();

                    let retry_after = match &e {
                        Error::RateLimited {
                            retry_after_secs, ..
                        } => *retry_after_secs,
                        _ => None,
                    };
                    if let Some(delay) = retry_delay(category, attempts, retry_after) {
                        tokio::time::sleep(delay).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            Error::NoCandidate(format!(
                "request {}: no provider in the fallback chain had a usable instance",
                request.request_id
            ))
        }))
    }

    // ── Breaker bookkeeping (exposed for callers that execute outside
    //    `execute_with_fallback`) ──────────────────────────────────────

    pub fn record_success(&self, instance: &Instance) {
        self.breakers.get(&instance.id).record_success();
        self.record_attempt(instance.provider, true);
    }

    pub fn record_failure(&self, instance: &Instance) {
        self.breakers.get(&instance.id).record_failure();
        self.record_attempt(instance.provider, false);
    }

    fn record_attempt(&self, provider: ProviderId, success: bool) {
        let mut attempts = self.attempts.lock();
        let counters = attempts.entry(provider).or_default();
        counters.total += 1;
        if success {
            counters.successes += 1;
        }
    }

    fn success_rates(&self) -> HashMap<ProviderId, f64> {
        self.attempts
            .lock()
            .iter()
            .filter(|(_, c)| c.total > 0)
            .map(|(&p, c)| (p, c.successes as f64 / c.total as f64))
            .collect()
    }

    // ── Cost API ───────────────────────────────────────────────────

    pub fn record_actual_cost(&self, usage: CostUsage, provider: ProviderId) {
        let record = self.cost.record_actual_cost(usage, provider, &self.catalog);
        let status = self.cost.budget_status();
        if status.exceeded {
            tracing::warn!(
                provider = %provider,
                period_cost = status.current_period_cost,
                budget = status.max_budget_per_period,
                "budget period exceeded"
            );
        }
        tracing::debug!(
            request_id = %record.request_id,
            cost = record.actual_cost,
            "cost recorded"
        );
    }

    pub fn get_average_cost(&self, provider: ProviderId, timeframe: Duration) -> Option<f64> {
        self.cost.average_cost(provider, timeframe)
    }

    pub fn get_budget_status(&self) -> BudgetStatus {
        self.cost.budget_status()
    }

    pub fn get_cost_summary(&self) -> CostSummary {
        self.cost.summary()
    }

    // ── Health ─────────────────────────────────────────────────────

    pub fn get_provider_health(&self) -> Vec<ProviderHealth> {
        let rates = self.success_rates();
        let breakers = self.breakers.snapshot_all();
        let instances = self.registry.all_instances();

        let mut by_provider: HashMap<ProviderId, ProviderHealth> = HashMap::new();
        for instance in instances {
            let entry = by_provider
                .entry(instance.provider)
                .or_insert_with(|| ProviderHealth {
                    provider: instance.provider.to_string(),
                    healthy_instances: 0,
                    success_rate: rates.get(&instance.provider).copied(),
                    breakers: HashMap::new(),
                });
            if instance.health.is_routable() {
                entry.healthy_instances += 1;
            }
            if let Some(snapshot) = breakers.get(&instance.id) {
                entry.breakers.insert(instance.id.clone(), snapshot.clone());
            }
        }
        let mut health: Vec<_> = by_provider.into_values().collect();
        health.sort_by(|a, b| a.provider.cmp(&b.provider));
        health
    }
}
