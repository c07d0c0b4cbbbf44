//! Cost estimation, per-provider spend history, and budget enforcement.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use pi_catalog::{ProviderCatalog, ProviderId};
use pi_registry::Instance;

/// Per-request cost ceiling used by the cost-optimized strategy's scoring.
pub const MAX_REASONABLE_COST: f64 = 10.0;

/// (input, output) USD per 1k tokens used when no instance is known yet.
pub const AVERAGE_PRICE_PER_1K: (f64, f64) = (0.005, 0.015);

/// Input share of a request's tokens when the caller gives one number.
const DEFAULT_INPUT_RATIO: f64 = 0.7;

/// Most recent cost records kept per provider.
const HISTORY_CAP: usize = 1_000;

/// Estimate what routing `total_tokens` at an instance would cost.
pub fn estimate_cost(catalog: &ProviderCatalog, instance: &Instance, total_tokens: u64) -> f64 {
    let input = (total_tokens as f64 * DEFAULT_INPUT_RATIO).floor();
    let output = total_tokens as f64 - input;
    let (input_price, output_price) = catalog.price_per_1k(instance.provider, &instance.model);
    input / 1_000.0 * input_price + output / 1_000.0 * output_price
}

/// Estimate a request's cost before any instance is chosen, using average
/// market pricing.
pub fn estimate_request_cost(total_tokens: u64) -> f64 {
    let input = (total_tokens as f64 * DEFAULT_INPUT_RATIO).floor();
    let output = total_tokens as f64 - input;
    input / 1_000.0 * AVERAGE_PRICE_PER_1K.0 + output / 1_000.0 * AVERAGE_PRICE_PER_1K.1
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Records & tracker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Usage reported by a completed request.
#[derive(Debug, Clone)]
pub struct CostUsage {
    pub request_id: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub estimated_cost: f64,
    /// When absent, the actual cost is derived from the price table.
    pub actual_cost: Option<f64>,
    pub task_type: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CostRecord {
    pub request_id: String,
    pub provider: ProviderId,
    pub model: String,
    pub actual_cost: f64,
    pub estimated_cost: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BudgetStatus {
    pub current_period_cost: f64,
    pub max_budget_per_period: f64,
    pub remaining: f64,
    pub exceeded: bool,
    pub period_elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CostSummary {
    pub total_cost: f64,
    pub record_count: usize,
    pub by_provider: HashMap<String, f64>,
}

struct BudgetState {
    period_start: Instant,
    current_period_cost: f64,
}

/// Bounded per-provider cost history plus the rolling budget period.
///
/// The budget period rolls over opportunistically on record/inspect; there
/// is no dedicated timer task.
pub struct CostTracker {
    enabled: bool,
    period: Duration,
    max_budget_per_period: f64,
    records: Mutex<HashMap<ProviderId, VecDeque<CostRecord>>>,
    budget: Mutex<BudgetState>,
}

impl CostTracker {
    pub fn new(enabled: bool, period: Duration, max_budget_per_period: f64) -> Self {
        Self {
            enabled,
            period,
            max_budget_per_period,
            records: Mutex::new(HashMap::new()),
            budget: Mutex::new(BudgetState {
                period_start: Instant::now(),
                current_period_cost: 0.0,
            }),
        }
    }

    /// Record the actual cost of a finished request.
    pub fn record_actual_cost(
        &self,
        usage: CostUsage,
        provider: ProviderId,
        catalog: &ProviderCatalog,
    ) -> CostRecord {
        let (input_price, output_price) = catalog.price_per_1k(provider, &usage.model);
        let actual_cost = usage.actual_cost.unwrap_or_else(|| {
            usage.input_tokens as f64 / 1_000.0 * input_price
                + usage.output_tokens as f64 / 1_000.0 * output_price
        });

        let record = CostRecord {
            request_id: usage.request_id,
            provider,
            model: usage.model,
            actual_cost,
            estimated_cost: usage.estimated_cost,
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            timestamp: Utc::now(),
            task_type: usage.task_type,
        };

        if self.enabled {
            let mut records = self.records.lock();
            let history = records.entry(provider).or_default();
            history.push_back(record.clone());
            while history.len() > HISTORY_CAP {
                history.pop_front();
            }
        }

        let mut budget = self.budget.lock();
        self.roll_period(&mut budget);
        budget.current_period_cost += actual_cost;
        record
    }

    fn roll_period(&self, budget: &mut BudgetState) {
        if budget.period_start.elapsed() > self.period {
            budget.period_start = Instant::now();
            budget.current_period_cost = 0.0;
        }
    }

    pub fn budget_status(&self) -> BudgetStatus {
        let mut budget = self.budget.lock();
        self.roll_period(&mut budget);
        BudgetStatus {
            current_period_cost: budget.current_period_cost,
            max_budget_per_period: self.max_budget_per_period,
            remaining: (self.max_budget_per_period - budget.current_period_cost).max(0.0),
            exceeded: budget.current_period_cost > self.max_budget_per_period,
            period_elapsed_ms: budget.period_start.elapsed().as_millis() as u64,
        }
    }

    /// Mean actual cost for a provider over the trailing `timeframe`.
    pub fn average_cost(&self, provider: ProviderId, timeframe: Duration) -> Option<f64> {
        let records = self.records.lock();
        let history = records.get(&provider)?;
        let cutoff = Utc::now() - chrono::Duration::from_std(timeframe).ok()?;
        let recent: Vec<f64> = history
            .iter()
            .filter(|r| r.timestamp >= cutoff)
            .map(|r| r.actual_cost)
            .collect();
        if recent.is_empty() {
            return None;
        }
        Some(recent.iter().sum::<f64>() / recent.len() as f64)
    }

    pub fn summary(&self) -> CostSummary {
        let records = self.records.lock();
        let mut summary = CostSummary {
            total_cost: 0.0,
            record_count: 0,
            by_provider: HashMap::new(),
        };
        for (provider, history) in records.iter() {
            let provider_total: f64 = history.iter().map(|r| r.actual_cost).sum();
            summary.total_cost += provider_total;
            summary.record_count += history.len();
            summary
                .by_provider
                .insert(provider.to_string(), provider_total);
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(id: &str, input: u64, output: u64) -> CostUsage {
        CostUsage {
            request_id: id.into(),
            model: "gpt-4o".into(),
            input_tokens: input,
            output_tokens: output,
            estimated_cost: 0.0,
            actual_cost: None,
            task_type: None,
        }
    }

    #[test]
    fn request_cost_uses_average_pricing_and_ratio() {
        // 10_000 tokens: 7000 input, 3000 output.
        let cost = estimate_request_cost(10_000);
        let expected = 7.0 * 0.005 + 3.0 * 0.015;
        assert!((cost - expected).abs() < 1e-9);
    }

    #[test]
    fn record_derives_actual_cost_from_price_table() {
        let catalog = ProviderCatalog::builtin();
        let tracker = CostTracker::new(true, Duration::from_secs(3600), 100.0);
        let record =
            tracker.record_actual_cost(usage("r1", 1_000, 1_000), ProviderId::Openai, &catalog);
        // gpt-4o: 0.0025 in + 0.01 out per 1k.
        assert!((record.actual_cost - 0.0125).abs() < 1e-9);
        assert!((tracker.budget_status().current_period_cost - 0.0125).abs() < 1e-9);
    }

    #[test]
    fn history_is_bounded() {
        let catalog = ProviderCatalog::builtin();
        let tracker = CostTracker::new(true, Duration::from_secs(3600), 100.0);
        for i in 0..(HISTORY_CAP + 50) {
            tracker.record_actual_cost(
                usage(&format!("r{i}"), 10, 10),
                ProviderId::Openai,
                &catalog,
            );
        }
        assert_eq!(tracker.summary().record_count, HISTORY_CAP);
    }

    #[test]
    fn budget_period_rolls_over() {
        let catalog = ProviderCatalog::builtin();
        let tracker = CostTracker::new(true, Duration::from_millis(20), 100.0);
        tracker.record_actual_cost(usage("r1", 100_000, 0), ProviderId::Openai, &catalog);
        assert!(tracker.budget_status().current_period_cost > 0.0);

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(tracker.budget_status().current_period_cost, 0.0);
    }

    #[test]
    fn average_cost_needs_history() {
        let tracker = CostTracker::new(true, Duration::from_secs(3600), 100.0);
        assert!(tracker
            .average_cost(ProviderId::Groq, Duration::from_secs(600))
            .is_none());
    }
}
