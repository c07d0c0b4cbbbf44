//! Policy-driven provider routing.
//!
//! The router turns a routing request into a decision (one instance plus
//! ranked alternatives and a fallback chain), tracks per-instance circuit
//! breakers and per-provider spend, and executes requests across the
//! fallback chain with classified retry behavior.

mod cost;
mod request;
mod retry;
mod router;
mod strategy;

pub use cost::{
    estimate_cost, estimate_request_cost, BudgetStatus, CostRecord, CostSummary, CostTracker,
    CostUsage, AVERAGE_PRICE_PER_1K, MAX_REASONABLE_COST,
};
pub use request::{Priority, RankedAlternative, RoutingDecision, RoutingRequest};
pub use retry::{classify_error, classify_message, retry_delay, ErrorCategory};
pub use router::{ProviderHealth, RouteExecutor, Router};
pub use strategy::{
    CapabilityMatchedStrategy, CostOptimizedStrategy, FallbackChainStrategy,
    LatencyOptimizedStrategy, RoutingStrategy, StrategyContext, StrategyOutcome,
};
