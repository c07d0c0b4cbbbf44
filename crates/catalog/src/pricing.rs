use std::collections::HashMap;

use crate::provider::{builtin_descriptors, ProviderId};

/// Last-resort price when neither the model nor a provider default is known.
pub const FALLBACK_PRICE_PER_1K: (f64, f64) = (1.0, 2.0);

/// Model → (input, output) USD per 1k tokens.
///
/// Keys are bare model names plus one `{provider}-default` entry per priced
/// provider.
pub struct PriceTable {
    entries: HashMap<String, (f64, f64)>,
}

impl PriceTable {
    pub fn builtin() -> Self {
        let mut entries = HashMap::new();

        // Per-model entries.
        for (model, input, output) in [
            ("claude-opus-4", 0.015, 0.075),
            ("claude-sonnet-4", 0.003, 0.015),
            ("claude-haiku-3-5", 0.0008, 0.004),
            ("gpt-4o", 0.0025, 0.01),
            ("gpt-4o-mini", 0.00015, 0.0006),
            ("o3", 0.002, 0.008),
            ("gemini-2.5-pro", 0.00125, 0.005),
            ("gemini-2.5-flash", 0.0003, 0.0025),
            ("kimi-k2", 0.0006, 0.0025),
            ("kimi-k2-turbo", 0.0024, 0.01),
            ("llama-3.3-70b-versatile", 0.00059, 0.00079),
            ("llama-3.1-8b-instant", 0.00005, 0.00008),
            ("llama-3.3-70b", 0.00085, 0.0012),
            ("llama-3.1-8b", 0.0001, 0.0001),
            ("minimax-m1", 0.0004, 0.0021),
            ("minimax-text-01", 0.0002, 0.0011),
            ("llama3.2", 0.0, 0.0),
            ("qwen2.5-coder", 0.0, 0.0),
            ("mistral", 0.0, 0.0),
        ] {
            entries.insert(model.to_owned(), (input, output));
        }

        // Provider defaults mirror each descriptor's headline price.  Custom
        // intentionally has none so it falls through to the global fallback.
        for d in builtin_descriptors() {
            if d.id == ProviderId::Custom {
                continue;
            }
            entries.insert(
                format!("{}-default", d.id),
                (d.input_price_per_1k, d.output_price_per_1k),
            );
        }

        Self { entries }
    }

    /// Resolve a price: exact model, then `{provider}-default`, then the
    /// global fallback.
    pub fn lookup(&self, provider: ProviderId, model: &str) -> (f64, f64) {
        if let Some(&price) = self.entries.get(model) {
            return price;
        }
        if let Some(&price) = self.entries.get(&format!("{provider}-default")) {
            return price;
        }
        FALLBACK_PRICE_PER_1K
    }
}
