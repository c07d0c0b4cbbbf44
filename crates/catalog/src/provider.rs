use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider ids
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Anthropic,
    Openai,
    Google,
    Groq,
    Cerebras,
    Ollama,
    Kimi,
    Minimax,
    Custom,
}

impl ProviderId {
    pub const ALL: [ProviderId; 9] = [
        ProviderId::Anthropic,
        ProviderId::Openai,
        ProviderId::Google,
        ProviderId::Groq,
        ProviderId::Cerebras,
        ProviderId::Ollama,
        ProviderId::Kimi,
        ProviderId::Minimax,
        ProviderId::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::Openai => "openai",
            Self::Google => "google",
            Self::Groq => "groq",
            Self::Cerebras => "cerebras",
            Self::Ollama => "ollama",
            Self::Kimi => "kimi",
            Self::Minimax => "minimax",
            Self::Custom => "custom",
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderId {
    type Err = pi_domain::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "anthropic" => Ok(Self::Anthropic),
            "openai" => Ok(Self::Openai),
            "google" => Ok(Self::Google),
            "groq" => Ok(Self::Groq),
            "cerebras" => Ok(Self::Cerebras),
            "ollama" => Ok(Self::Ollama),
            "kimi" => Ok(Self::Kimi),
            "minimax" => Ok(Self::Minimax),
            "custom" => Ok(Self::Custom),
            other => Err(pi_domain::Error::InvalidRequest(format!(
                "unknown provider '{other}'"
            ))),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Descriptors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Immutable metadata for one provider.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderDescriptor {
    pub id: ProviderId,
    pub default_model: &'static str,
    pub models: &'static [&'static str],
    pub capabilities: &'static [&'static str],
    pub default_latency_ms: u64,
    pub context_window: u64,
    /// 0–100, higher is better.
    pub quality_score: u8,
    /// Lower is preferred in fallback ordering.
    pub fallback_priority: u8,
    pub input_price_per_1k: f64,
    pub output_price_per_1k: f64,
    pub requires_auth: bool,
    pub auth_env_key: Option<&'static str>,
}

pub(crate) fn builtin_descriptors() -> Vec<ProviderDescriptor> {
    vec![
        ProviderDescriptor {
            id: ProviderId::Anthropic,
            default_model: "claude-sonnet-4",
            models: &["claude-opus-4", "claude-sonnet-4", "claude-haiku-3-5"],
            capabilities: &["chat", "tools", "streaming", "vision", "json_mode", "long_context"],
            default_latency_ms: 1_800,
            context_window: 200_000,
            quality_score: 95,
            fallback_priority: 0,
            input_price_per_1k: 0.003,
            output_price_per_1k: 0.015,
            requires_auth: true,
            auth_env_key: Some("ANTHROPIC_API_KEY"),
        },
        ProviderDescriptor {
            id: ProviderId::Openai,
            default_model: "gpt-4o",
            models: &["gpt-4o", "gpt-4o-mini", "o3"],
            capabilities: &["chat", "tools", "streaming", "vision", "json_mode"],
            default_latency_ms: 1_500,
            context_window: 128_000,
            quality_score: 93,
            fallback_priority: 1,
            input_price_per_1k: 0.0025,
            output_price_per_1k: 0.01,
            requires_auth: true,
            auth_env_key: Some("OPENAI_API_KEY"),
        },
        ProviderDescriptor {
            id: ProviderId::Google,
            default_model: "gemini-2.5-pro",
            models: &["gemini-2.5-pro", "gemini-2.5-flash"],
            capabilities: &["chat", "tools", "streaming", "vision", "json_mode", "long_context"],
            default_latency_ms: 2_000,
            context_window: 1_048_576,
            quality_score: 92,
            fallback_priority: 2,
            input_price_per_1k: 0.00125,
            output_price_per_1k: 0.005,
            requires_auth: true,
            auth_env_key: Some("GOOGLE_API_KEY"),
        },
        ProviderDescriptor {
            id: ProviderId::Kimi,
            default_model: "kimi-k2",
            models: &["kimi-k2", "kimi-k2-turbo"],
            capabilities: &["chat", "tools", "streaming", "long_context"],
            default_latency_ms: 2_500,
            context_window: 262_144,
            quality_score: 85,
            fallback_priority: 3,
            input_price_per_1k: 0.0006,
            output_price_per_1k: 0.0025,
            requires_auth: true,
            auth_env_key: Some("MOONSHOT_API_KEY"),
        },
        ProviderDescriptor {
            id: ProviderId::Groq,
            default_model: "llama-3.3-70b-versatile",
            models: &["llama-3.3-70b-versatile", "llama-3.1-8b-instant"],
            capabilities: &["chat", "tools", "streaming"],
            default_latency_ms: 400,
            context_window: 131_072,
            quality_score: 80,
            fallback_priority: 4,
            input_price_per_1k: 0.00059,
            output_price_per_1k: 0.00079,
            requires_auth: true,
            auth_env_key: Some("GROQ_API_KEY"),
        },
        ProviderDescriptor {
            id: ProviderId::Cerebras,
            default_model: "llama-3.3-70b",
            models: &["llama-3.3-70b", "llama-3.1-8b"],
            capabilities: &["chat", "streaming"],
            default_latency_ms: 300,
            context_window: 128_000,
            quality_score: 78,
            fallback_priority: 5,
            input_price_per_1k: 0.00085,
            output_price_per_1k: 0.0012,
            requires_auth: true,
            auth_env_key: Some("CEREBRAS_API_KEY"),
        },
        ProviderDescriptor {
            id: ProviderId::Minimax,
            default_model: "minimax-m1",
            models: &["minimax-m1", "minimax-text-01"],
            capabilities: &["chat", "tools", "streaming", "long_context"],
            default_latency_ms: 2_200,
            context_window: 1_000_000,
            quality_score: 82,
            fallback_priority: 6,
            input_price_per_1k: 0.0004,
            output_price_per_1k: 0.0021,
            requires_auth: true,
            auth_env_key: Some("MINIMAX_API_KEY"),
        },
        ProviderDescriptor {
            id: ProviderId::Ollama,
            default_model: "llama3.2",
            models: &["llama3.2", "qwen2.5-coder", "mistral"],
            capabilities: &["chat", "streaming"],
            default_latency_ms: 3_000,
            context_window: 32_768,
            quality_score: 60,
            fallback_priority: 8,
            input_price_per_1k: 0.0,
            output_price_per_1k: 0.0,
            requires_auth: false,
            auth_env_key: None,
        },
        ProviderDescriptor {
            id: ProviderId::Custom,
            default_model: "custom",
            models: &["custom"],
            capabilities: &["chat"],
            default_latency_ms: 5_000,
            context_window: 32_768,
            quality_score: 50,
            fallback_priority: 9,
            input_price_per_1k: 1.0,
            output_price_per_1k: 2.0,
            requires_auth: false,
            auth_env_key: None,
        },
    ]
}
