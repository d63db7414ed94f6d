use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration — maps to `sage.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SageConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub tokens: TokenConfig,
    pub cache: CacheConfig,
    pub emotion: EmotionConfig,
    pub context: ContextConfig,
    pub circuit: CircuitConfig,
    pub selector: SelectorConfig,
    pub benchmarks: BenchmarkConfig,
    pub stream: StreamConfig,
    pub budget: BudgetConfig,
    pub logging: LoggingConfig,
    /// Configured LLM backends, keyed by provider name.
    pub providers: HashMap<String, ProviderConfig>,
}

// ── Server ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address for the HTTP/WebSocket shell.
    pub listen: String,
    /// Seconds to wait for in-flight streams on shutdown before cancelling
    /// them with `generation_stopped(reason=shutdown)`.
    pub shutdown_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:3900".into(),
            shutdown_grace_secs: 20,
        }
    }
}

// ── Store ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the SQLite database.
    pub db_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("sage.db"),
        }
    }
}

// ── Token budget clamps ────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    pub min_reasoning: u32,
    pub max_reasoning: u32,
    pub min_response: u32,
    pub max_response: u32,
    /// Tokens held back from the prompt for provider-side framing.
    pub safety_margin: u32,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            min_reasoning: 256,
            max_reasoning: 8192,
            min_response: 256,
            max_response: 4096,
            safety_margin: 256,
        }
    }
}

// ── Emotion cache ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Recency tier capacity (entries).
    pub l1_capacity: u64,
    /// Frequency tier capacity (entries).
    pub l2_capacity: u64,
    /// Time-to-live for entries in both tiers.
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1_capacity: 512,
            l2_capacity: 4096,
            ttl_seconds: 900,
        }
    }
}

// ── Emotion inference ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmotionConfig {
    /// HuggingFace repo id of the emotion classifier.
    pub model_repo: String,
    /// Directory holding downstream head artifacts; embedded defaults are
    /// used when unset or when a head file is missing.
    pub registry_dir: Option<PathBuf>,
    /// Wall-clock budget for one inference pass before the neutral
    /// degraded result is returned.
    pub infer_timeout_ms: u64,
    /// Bound on concurrent classifier passes (CPU-heavy work).
    pub worker_threads: usize,
}

impl Default for EmotionConfig {
    fn default() -> Self {
        Self {
            model_repo: "SamLowe/roberta-base-go_emotions".into(),
            registry_dir: None,
            infer_timeout_ms: 200,
            worker_threads: 2,
        }
    }
}

// ── Context assembly ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Maximum recent messages included.
    pub recent_limit: usize,
    /// Token bound across the recent window.
    pub recent_token_budget: usize,
    /// Maximum semantically-relevant messages included.
    pub relevant_limit: usize,
    /// Minimum cosine similarity for a message to count as relevant.
    pub relevance_threshold: f32,
    /// Widen relevance retrieval from the session to the whole user.
    pub user_scope: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            recent_limit: 10,
            recent_token_budget: 2048,
            relevant_limit: 5,
            relevance_threshold: 0.35,
            user_scope: false,
        }
    }
}

// ── Circuit breaker ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitConfig {
    /// Consecutive failures before the circuit opens.
    pub fail_threshold: u32,
    /// Seconds the circuit stays open before a half-open probe.
    pub cooldown_secs: u64,
    /// Rolling window size by call count.
    pub window_size: usize,
    /// Rolling window size by age.
    pub window_secs: u64,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            fail_threshold: 5,
            cooldown_secs: 60,
            window_size: 128,
            window_secs: 300,
        }
    }
}

// ── Provider selection ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub weight_quality: f64,
    pub weight_health: f64,
    pub weight_cost: f64,
    pub weight_latency: f64,
    /// Initial exploration probability.
    pub epsilon_initial: f64,
    /// Per-request decay applied as ε = ε₀ / (1 + decay · requests).
    pub epsilon_decay: f64,
    /// Providers tried after the primary before giving up.
    pub fallback_chain_length: usize,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            weight_quality: 0.4,
            weight_health: 0.3,
            weight_cost: 0.2,
            weight_latency: 0.1,
            epsilon_initial: 0.2,
            epsilon_decay: 0.01,
            fallback_chain_length: 3,
        }
    }
}

// ── Benchmarks ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    /// External benchmark feed; when unset the last persisted snapshot (or
    /// neutral scores) is used.
    pub feed_url: Option<String>,
    pub refresh_interval_secs: u64,
    /// Cap for the exponential backoff after failed refreshes.
    pub backoff_max_secs: u64,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            feed_url: None,
            refresh_interval_secs: 6 * 3600,
            backoff_max_secs: 3600,
        }
    }
}

// ── Streaming ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Provider call wall-clock timeout.
    pub provider_timeout_secs: u64,
    /// Pacing delay between chunks when adapting a non-streaming backend.
    pub chunk_pacing_ms: u64,
    /// Chunk size (chars) when adapting a non-streaming backend.
    pub chunk_chars: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            provider_timeout_secs: 60,
            chunk_pacing_ms: 30,
            chunk_chars: 48,
        }
    }
}

// ── Cost budgets ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub daily_usd: f64,
    pub monthly_usd: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily_usd: 5.0,
            monthly_usd: 50.0,
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace | debug | info | warn | error
    pub level: String,
    /// pretty | json | compact
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ── Providers ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Adapter kind: "anthropic", "openai", "local", or "mock".
    #[serde(rename = "type")]
    pub provider_type: String,
    /// Model identifier sent to the backend.
    pub model: String,
    /// API endpoint override (Azure, Together, vLLM, etc.)
    #[serde(default)]
    pub base_url: Option<String>,
    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// API key inline (env var takes precedence when both are set).
    #[serde(default)]
    pub api_key: Option<String>,
    /// Task categories this backend is allowed to serve.
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,
    pub max_context_tokens: u32,
    /// USD per input token.
    pub cost_per_input_token: f64,
    /// USD per output token.
    pub cost_per_output_token: f64,
    #[serde(default = "default_true")]
    pub supports_streaming: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_categories() -> Vec<String> {
    vec!["general".into()]
}

fn default_true() -> bool {
    true
}

impl ProviderConfig {
    /// Resolve the API key: env var first, then the inline value.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(env) = &self.api_key_env
            && let Ok(v) = std::env::var(env)
        {
            return Some(v);
        }
        self.api_key.clone()
    }
}

// ── Validation ─────────────────────────────────────────────────

impl SageConfig {
    /// Validate the configuration. Returns warnings; hard errors abort
    /// startup.
    pub fn validate(&self) -> Result<Vec<String>, String> {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if self.tokens.min_reasoning > self.tokens.max_reasoning {
            errors.push("tokens: min_reasoning > max_reasoning".to_string());
        }
        if self.tokens.min_response > self.tokens.max_response {
            errors.push("tokens: min_response > max_response".to_string());
        }
        if self.selector.fallback_chain_length == 0 {
            warnings.push("selector.fallback_chain_length = 0 — no failover".to_string());
        }
        if !(0.0..=1.0).contains(&self.selector.epsilon_initial) {
            errors.push("selector.epsilon_initial must be in [0, 1]".to_string());
        }
        if self.budget.daily_usd <= 0.0 || self.budget.monthly_usd <= 0.0 {
            errors.push("budget limits must be positive".to_string());
        }
        if self.server.listen.is_empty() {
            errors.push("server.listen is empty".to_string());
        }
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            warnings.push(format!("unknown log level '{}'", self.logging.level));
        }

        for (name, p) in &self.providers {
            if !["anthropic", "openai", "local", "mock"].contains(&p.provider_type.as_str()) {
                errors.push(format!("providers.{name}: unknown type '{}'", p.provider_type));
            }
            if p.max_context_tokens == 0 {
                errors.push(format!("providers.{name}: max_context_tokens is 0"));
            }
            for c in &p.categories {
                if c.parse::<sage_core::Category>().is_err() {
                    warnings.push(format!("providers.{name}: unknown category '{c}'"));
                }
            }
            if p.enabled
                && !["mock", "local"].contains(&p.provider_type.as_str())
                && p.resolve_api_key().is_none()
            {
                warnings.push(format!("providers.{name}: no API key resolved"));
            }
        }

        if self.providers.values().filter(|p| p.enabled).count() == 0 {
            warnings.push("no enabled providers configured".to_string());
        }

        if errors.is_empty() {
            Ok(warnings)
        } else {
            Err(format!("configuration errors:\n  - {}", errors.join("\n  - ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_clean() {
        let config = SageConfig::default();
        // No providers configured is a warning, not an error.
        let warnings = config.validate().unwrap();
        assert!(warnings.iter().any(|w| w.contains("no enabled providers")));
    }

    #[test]
    fn inverted_clamps_are_errors() {
        let mut config = SageConfig::default();
        config.tokens.min_reasoning = 9000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn provider_config_parses_from_toml() {
        let raw = r#"
            [providers.claude]
            type = "anthropic"
            model = "claude-sonnet-4-20250514"
            api_key_env = "ANTHROPIC_API_KEY"
            categories = ["general", "reasoning", "coding"]
            max_context_tokens = 200000
            cost_per_input_token = 0.000003
            cost_per_output_token = 0.000015
        "#;
        let config: SageConfig = toml::from_str(raw).unwrap();
        let p = &config.providers["claude"];
        assert_eq!(p.provider_type, "anthropic");
        assert!(p.supports_streaming);
        assert_eq!(p.categories.len(), 3);
    }
}
