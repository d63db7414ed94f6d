use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Task category used for benchmark partitioning and provider selection.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Coding,
    Reasoning,
    General,
    Creative,
    Math,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Self::Coding,
        Self::Reasoning,
        Self::General,
        Self::Creative,
        Self::Math,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Coding => "coding",
            Self::Reasoning => "reasoning",
            Self::General => "general",
            Self::Creative => "creative",
            Self::Math => "math",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "coding" => Ok(Self::Coding),
            "reasoning" => Ok(Self::Reasoning),
            "general" => Ok(Self::General),
            "creative" => Ok(Self::Creative),
            "math" => Ok(Self::Math),
            other => Err(format!("unknown category: {other}")),
        }
    }
}

/// Circuit breaker state for a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

/// Point-in-time health view of a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub success_rate: f64,
    pub p50_latency_ms: u64,
    pub p95_latency_ms: u64,
    pub consecutive_failures: u32,
    pub circuit_state: CircuitState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error_ts: Option<DateTime<Utc>>,
}

impl Default for ProviderHealth {
    fn default() -> Self {
        Self {
            success_rate: 1.0,
            p50_latency_ms: 0,
            p95_latency_ms: 0,
            consecutive_failures: 0,
            circuit_state: CircuitState::Closed,
            last_error_ts: None,
        }
    }
}

/// Static description of one configured LLM backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub name: String,
    pub model: String,
    pub supported_categories: BTreeSet<Category>,
    pub max_context_tokens: u32,
    /// USD per input token.
    pub cost_per_input_token: f64,
    /// USD per output token.
    pub cost_per_output_token: f64,
    pub supports_streaming: bool,
}

impl ProviderDescriptor {
    pub fn supports(&self, category: Category) -> bool {
        self.supported_categories.contains(&category)
    }

    /// Projected worst-case cost for a request with the given token budget.
    pub fn projected_cost(&self, budget: &TokenBudget) -> f64 {
        budget.total() as f64 * self.cost_per_input_token.max(self.cost_per_output_token)
    }

    /// Actual cost of a finished call.
    pub fn cost_of(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        input_tokens as f64 * self.cost_per_input_token
            + output_tokens as f64 * self.cost_per_output_token
    }
}

/// Per-provider, per-category quality scores as refreshed from the
/// benchmark feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BenchmarkScores {
    pub per_category: BTreeMap<Category, f64>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl BenchmarkScores {
    pub fn quality(&self, category: Category) -> f64 {
        self.per_category.get(&category).copied().unwrap_or(0.5)
    }
}

/// Per-request split of a provider's context window.
///
/// Invariants: `reasoning_tokens + response_tokens <= provider_max_tokens`
/// and `response_tokens` respects the configured minimum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenBudget {
    pub reasoning_tokens: u32,
    pub response_tokens: u32,
    pub provider_max_tokens: u32,
    /// Fraction of the provider window in use, in [0, 1].
    pub utilization: f64,
}

impl TokenBudget {
    pub fn total(&self) -> u32 {
        self.reasoning_tokens + self.response_tokens
    }

    pub fn is_valid(&self) -> bool {
        self.total() <= self.provider_max_tokens
    }
}
