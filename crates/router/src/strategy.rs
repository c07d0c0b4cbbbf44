//! Routing strategies.
//!
//! Each strategy is a pure function of (request, candidates, context) that
//! ranks candidates and explains itself.  No strategy performs I/O; the
//! router owns candidate gathering and breaker state.

use std::collections::HashMap;

use pi_catalog::{ProviderCatalog, ProviderId};
use pi_domain::{Error, Result};
use pi_registry::{HealthStatus, Instance};

use crate::cost::{estimate_cost, MAX_REASONABLE_COST};
use crate::request::RoutingRequest;

/// Read-only inputs shared by every strategy evaluation.
pub struct StrategyContext<'a> {
    pub catalog: &'a ProviderCatalog,
    /// Historical success rate per provider, in [0, 1].
    pub success_rates: &'a HashMap<ProviderId, f64>,
    /// Configured provider priority order for the fallback-chain strategy.
    pub fallback_chain: &'a [ProviderId],
}

/// Ranked candidates (best first) plus the reasoning.
#[derive(Debug, Clone)]
pub struct StrategyOutcome {
    pub ranked: Vec<(Instance, f64)>,
    pub reason: String,
}

pub trait RoutingStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn evaluate(
        &self,
        request: &RoutingRequest,
        candidates: &[Instance],
        ctx: &StrategyContext<'_>,
    ) -> Result<StrategyOutcome>;
}

fn rank_desc(mut scored: Vec<(Instance, f64)>) -> Vec<(Instance, f64)> {
    scored.sort_by(|(a, sa), (b, sb)| {
        sb.partial_cmp(sa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    scored
}

fn no_candidate(strategy: &str) -> Error {
    Error::NoCandidate(format!("{strategy}: no candidate satisfies the request"))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// cost_optimized
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cheapest capable instance wins.
pub struct CostOptimizedStrategy;

impl RoutingStrategy for CostOptimizedStrategy {
    fn name(&self) -> &str {
        "cost_optimized"
    }

    fn evaluate(
        &self,
        request: &RoutingRequest,
        candidates: &[Instance],
        ctx: &StrategyContext<'_>,
    ) -> Result<StrategyOutcome> {
        let scored: Vec<(Instance, f64)> = candidates
            .iter()
            .filter(|i| i.has_capabilities(&request.required_capabilities))
            .map(|i| {
                let cost = estimate_cost(ctx.catalog, i, request.estimated_tokens);
                let score =
                    ((MAX_REASONABLE_COST - cost) / MAX_REASONABLE_COST).max(0.0) * 100.0;
                (i.clone(), score)
            })
            .collect();
        if scored.is_empty() {
            return Err(no_candidate(self.name()));
        }
        Ok(StrategyOutcome {
            ranked: rank_desc(scored),
            reason: format!(
                "cheapest capable instance for ~{} tokens",
                request.estimated_tokens
            ),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// capability_matched
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Weighted blend: capability coverage (0.4), provider quality (0.3),
/// context-window adequacy (0.2), historical success rate (0.1).
pub struct CapabilityMatchedStrategy;

impl CapabilityMatchedStrategy {
    fn window_adequacy(window: u64, required: u64) -> f64 {
        if required == 0 {
            return 20.0;
        }
        let ratio = window as f64 / required as f64;
        if ratio >= 2.0 {
            20.0
        } else if ratio >= 1.5 {
            15.0
        } else if ratio >= 1.0 {
            10.0
        } else if ratio >= 0.75 {
            5.0
        } else {
            0.0
        }
    }

    fn capability_coverage(instance: &Instance, required: &[String]) -> f64 {
        if required.is_empty() {
            return 100.0;
        }
        let matching = required
            .iter()
            .filter(|cap| instance.capabilities.contains(cap))
            .count();
        matching as f64 / required.len() as f64 * 100.0
    }
}

impl RoutingStrategy for CapabilityMatchedStrategy {
    fn name(&self) -> &str {
        "capability_matched"
    }

    fn evaluate(
        &self,
        request: &RoutingRequest,
        candidates: &[Instance],
        ctx: &StrategyContext<'_>,
    ) -> Result<StrategyOutcome> {
        let scored: Vec<(Instance, f64)> = candidates
            .iter()
            .filter(|i| {
                request
                    .min_quality_score
                    .map(|min| ctx.catalog.quality_score(i.provider) >= min)
                    .unwrap_or(true)
            })
            .map(|i| {
                let coverage = Self::capability_coverage(i, &request.required_capabilities);
                let quality = f64::from(ctx.catalog.quality_score(i.provider));
                let adequacy = Self::window_adequacy(
                    ctx.catalog.context_window(i.provider),
                    request.estimated_tokens,
                );
                let success = ctx.success_rates.get(&i.provider).copied().unwrap_or(0.5);
                let score = 0.4 * coverage + 0.3 * quality + 0.2 * adequacy + 0.1 * success;
                (i.clone(), score)
            })
            .collect();
        if scored.is_empty() {
            return Err(no_candidate(self.name()));
        }
        Ok(StrategyOutcome {
            ranked: rank_desc(scored),
            reason: "weighted capability/quality/window/success blend".into(),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// latency_optimized
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fastest expected provider wins.
pub struct LatencyOptimizedStrategy;

impl RoutingStrategy for LatencyOptimizedStrategy {
    fn name(&self) -> &str {
        "latency_optimized"
    }

    fn evaluate(
        &self,
        _request: &RoutingRequest,
        candidates: &[Instance],
        ctx: &StrategyContext<'_>,
    ) -> Result<StrategyOutcome> {
        let scored: Vec<(Instance, f64)> = candidates
            .iter()
            .filter(|i| i.health == HealthStatus::Healthy)
            .map(|i| {
                let latency = ctx.catalog.expected_latency_ms(i.provider) as f64;
                let score = ((5_000.0 - latency) / 5_000.0).max(0.0) * 100.0;
                (i.clone(), score)
            })
            .collect();
        if scored.is_empty() {
            return Err(no_candidate(self.name()));
        }
        Ok(StrategyOutcome {
            ranked: rank_desc(scored),
            reason: "lowest expected latency".into(),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// fallback_chain
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Rank by configured provider priority; providers not in the chain sort
/// last.  Within one priority tier, fully healthy instances come first.
pub struct FallbackChainStrategy;

impl RoutingStrategy for FallbackChainStrategy {
    fn name(&self) -> &str {
        "fallback_chain"
    }

    fn evaluate(
        &self,
        _request: &RoutingRequest,
        candidates: &[Instance],
        ctx: &StrategyContext<'_>,
    ) -> Result<StrategyOutcome> {
        if candidates.is_empty() {
            return Err(no_candidate(self.name()));
        }
        let chain_len = ctx.fallback_chain.len() as f64;
        let scored: Vec<(Instance, f64)> = candidates
            .iter()
            .map(|i| {
                let position = ctx
                    .fallback_chain
                    .iter()
                    .position(|&p| p == i.provider)
                    .map(|p| p as f64)
                    .unwrap_or(chain_len);
                let healthy_bonus = if i.health == HealthStatus::Healthy {
                    1.0
                } else {
                    0.0
                };
                // Earlier chain position dominates; health breaks the tier.
                let score = (chain_len - position) * 10.0 + healthy_bonus;
                (i.clone(), score)
            })
            .collect();
        Ok(StrategyOutcome {
            ranked: rank_desc(scored),
            reason: "configured provider priority order".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pi_registry::{CapacityRecord, DeploymentMode, InstanceAuth};

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
            metadata: Default::default(),
            tags: Vec::new(),
        }
    }

    fn ctx<'a>(
        catalog: &'a ProviderCatalog,
        rates: &'a HashMap<ProviderId, f64>,
        chain: &'a [ProviderId],
    ) -> StrategyContext<'a> {
        StrategyContext {
            catalog,
            success_rates: rates,
            fallback_chain: chain,
        }
    }

    #[test]
    fn cost_optimized_prefers_cheaper_provider() {
        let catalog = ProviderCatalog::builtin();
        let rates = HashMap::new();
        let chain: [ProviderId; 0] = [];
        let candidates = vec![
            instance("expensive", ProviderId::Anthropic),
            instance("cheap", ProviderId::Groq),
        ];
        let request = RoutingRequest {
            estimated_tokens: 100_000,
            required_capabilities: vec!["chat".into()],
            ..Default::default()
        };

        let outcome = CostOptimizedStrategy
            .evaluate(&request, &candidates, &ctx(&catalog, &rates, &chain))
            .unwrap();
        assert_eq!(outcome.ranked[0].0.id, "cheap");
        assert!(outcome.ranked[0].1 > outcome.ranked[1].1);
    }

    #[test]
    fn cost_optimized_rejects_incapable_candidates() {
        let catalog = ProviderCatalog::builtin();
        let rates = HashMap::new();
        let chain: [ProviderId; 0] = [];
        let mut candidate = instance("a", ProviderId::Openai);
        candidate.capabilities = vec!["chat".into()];
        let request = RoutingRequest {
            required_capabilities: vec!["vision".into()],
            ..Default::default()
        };

        let err = CostOptimizedStrategy
            .evaluate(&request, &[candidate], &ctx(&catalog, &rates, &chain))
            .unwrap_err();
        assert_eq!(err.code(), "NO_CANDIDATE");
    }

    #[test]
    fn capability_matched_blends_weights() {
        let catalog = ProviderCatalog::builtin();
        let rates = HashMap::from([(ProviderId::Groq, 1.0)]);
        let chain: [ProviderId; 0] = [];
        let candidates = vec![
            instance("high-quality", ProviderId::Anthropic),
            instance("fast-cheap", ProviderId::Groq),
        ];
        let request = RoutingRequest {
            required_capabilities: vec!["chat".into()],
            estimated_tokens: 1_000,
            ..Default::default()
        };

        let outcome = CapabilityMatchedStrategy
            .evaluate(&request, &candidates, &ctx(&catalog, &rates, &chain))
            .unwrap();
        // Anthropic quality (95) beats Groq (80) even with Groq's perfect
        // success rate: 0.3*15 quality points > 0.1*0.5 rate points.
        assert_eq!(outcome.ranked[0].0.provider, ProviderId::Anthropic);
    }

    #[test]
    fn capability_matched_honors_min_quality() {
        let catalog = ProviderCatalog::builtin();
        let rates = HashMap::new();
        let chain: [ProviderId; 0] = [];
        let candidates = vec![
            instance("a", ProviderId::Ollama),   // quality 60
            instance("b", ProviderId::Anthropic), // quality 95
        ];
        let request = RoutingRequest {
            min_quality_score: Some(90),
            ..Default::default()
        };

        let outcome = CapabilityMatchedStrategy
            .evaluate(&request, &candidates, &ctx(&catalog, &rates, &chain))
            .unwrap();
        assert_eq!(outcome.ranked.len(), 1);
        assert_eq!(outcome.ranked[0].0.provider, ProviderId::Anthropic);
    }

    #[test]
    fn window_adequacy_ladder() {
        assert_eq!(CapabilityMatchedStrategy::window_adequacy(200, 100), 20.0);
        assert_eq!(CapabilityMatchedStrategy::window_adequacy(150, 100), 15.0);
        assert_eq!(CapabilityMatchedStrategy::window_adequacy(100, 100), 10.0);
        assert_eq!(CapabilityMatchedStrategy::window_adequacy(75, 100), 5.0);
        assert_eq!(CapabilityMatchedStrategy::window_adequacy(50, 100), 0.0);
    }

    #[test]
    fn latency_optimized_prefers_fast_providers_and_drops_degraded() {
        let catalog = ProviderCatalog::builtin();
        let rates = HashMap::new();
        let chain: [ProviderId; 0] = [];
        let mut slow_but_degraded = instance("d", ProviderId::Cerebras);
        slow_but_degraded.health = HealthStatus::Degraded;
        let candidates = vec![
            instance("groq", ProviderId::Groq),       // 400 ms
            instance("google", ProviderId::Google),   // 2000 ms
            slow_but_degraded,                        // fastest but degraded
        ];
        let request = RoutingRequest::default();

        let outcome = LatencyOptimizedStrategy
            .evaluate(&request, &candidates, &ctx(&catalog, &rates, &chain))
            .unwrap();
        assert_eq!(outcome.ranked.len(), 2);
        assert_eq!(outcome.ranked[0].0.id, "groq");
    }

    #[test]
    fn fallback_chain_orders_by_configured_priority() {
        let catalog = ProviderCatalog::builtin();
        let rates = HashMap::new();
        let chain = [ProviderId::Anthropic, ProviderId::Openai, ProviderId::Google];
        let mut degraded_anthropic = instance("a-degraded", ProviderId::Anthropic);
        degraded_anthropic.health = HealthStatus::Degraded;
        let candidates = vec![
            instance("unlisted", ProviderId::Minimax),
            instance("openai", ProviderId::Openai),
            degraded_anthropic,
        ];
        let request = RoutingRequest::default();

        let outcome = FallbackChainStrategy
            .evaluate(&request, &candidates, &ctx(&catalog, &rates, &chain))
            .unwrap();
        let order: Vec<&str> = outcome.ranked.iter().map(|(i, _)| i.id.as_str()).collect();
        // Anthropic tier first (even degraded), then openai, unlisted last.
        assert_eq!(order, vec!["a-degraded", "openai", "unlisted"]);
    }
}
