//! Static provider catalog.
//!
//! Process-wide immutable metadata about every supported back-end provider:
//! models, capabilities, expected latency, context window, quality score,
//! fallback priority, and per-1k-token pricing.  Components receive the
//! catalog by construction and never mutate it.

mod pricing;
mod provider;

pub use pricing::PriceTable;
pub use provider::{ProviderDescriptor, ProviderId};

use std::collections::HashMap;

/// Immutable provider metadata table.
pub struct ProviderCatalog {
    providers: HashMap<ProviderId, ProviderDescriptor>,
    prices: PriceTable,
}

impl ProviderCatalog {
    /// The built-in catalog covering every supported provider.
    pub fn builtin() -> Self {
        let providers = provider::builtin_descriptors()
            .into_iter()
            .map(|d| (d.id, d))
            .collect();
        Self {
            providers,
            prices: PriceTable::builtin(),
        }
    }

    pub fn get(&self, id: ProviderId) -> Option<&ProviderDescriptor> {
        self.providers.get(&id)
    }

    pub fn all(&self) -> impl Iterator<Item = &ProviderDescriptor> {
        self.providers.values()
    }

    /// Providers ordered by fallback priority (lower is preferred).
    /// Ties break on provider id for determinism.
    pub fn fallback_order(&self) -> Vec<ProviderId> {
        let mut ids: Vec<_> = self.providers.values().collect();
        ids.sort_by(|a, b| {
            a.fallback_priority
                .cmp(&b.fallback_priority)
                .then_with(|| a.id.as_str().cmp(b.id.as_str()))
        });
        ids.into_iter().map(|d| d.id).collect()
    }

    /// Input/output price per 1k tokens for a model.
    ///
    /// Unknown models fall back to the `{provider}-default` entry, then to
    /// the global `(1.0, 2.0)` last resort.
    pub fn price_per_1k(&self, provider: ProviderId, model: &str) -> (f64, f64) {
        self.prices.lookup(provider, model)
    }

    pub fn quality_score(&self, id: ProviderId) -> u8 {
        self.get(id).map(|d| d.quality_score).unwrap_or(0)
    }

    pub fn expected_latency_ms(&self, id: ProviderId) -> u64 {
        self.get(id).map(|d| d.default_latency_ms).unwrap_or(5_000)
    }

    pub fn context_window(&self, id: ProviderId) -> u64 {
        self.get(id).map(|d| d.context_window).unwrap_or(0)
    }
}

impl Default for ProviderCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_covers_every_provider() {
        let catalog = ProviderCatalog::builtin();
        for id in ProviderId::ALL {
            assert!(catalog.get(id).is_some(), "missing descriptor for {id}");
        }
    }

    #[test]
    fn fallback_order_prefers_lower_priority() {
        let catalog = ProviderCatalog::builtin();
        let order = catalog.fallback_order();
        assert_eq!(order.first(), Some(&ProviderId::Anthropic));
        let anthropic_pos = order.iter().position(|&p| p == ProviderId::Anthropic);
        let custom_pos = order.iter().position(|&p| p == ProviderId::Custom);
        assert!(anthropic_pos < custom_pos);
    }

    #[test]
    fn price_lookup_falls_back_to_provider_default() {
        let catalog = ProviderCatalog::builtin();
        let known = catalog.price_per_1k(ProviderId::Openai, "gpt-4o");
        let unknown = catalog.price_per_1k(ProviderId::Openai, "gpt-99-experimental");
        let provider_default = catalog.price_per_1k(ProviderId::Openai, "openai-default");
        assert_ne!(known, (1.0, 2.0));
        assert_eq!(unknown, provider_default);
    }

    #[test]
    fn price_lookup_last_resort() {
        let catalog = ProviderCatalog::builtin();
        // Custom has no default entry in the price table.
        assert_eq!(
            catalog.price_per_1k(ProviderId::Custom, "whatever"),
            (1.0, 2.0)
        );
    }

    #[test]
    fn local_provider_needs_no_auth() {
        let catalog = ProviderCatalog::builtin();
        let ollama = catalog.get(ProviderId::Ollama).unwrap();
        assert!(!ollama.requires_auth);
        assert!(ollama.auth_env_key.is_none());
    }

    #[test]
    fn quality_scores_within_range() {
        let catalog = ProviderCatalog::builtin();
        for d in catalog.all() {
            assert!(d.quality_score <= 100, "{}: quality out of range", d.id);
        }
    }
}
