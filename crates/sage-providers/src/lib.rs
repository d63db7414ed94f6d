//! # sage-providers
//!
//! Everything between the pipeline and the LLM backends: the uniform
//! provider client interface with per-backend adapters, the benchmark
//! registry, the rolling health tracker with circuit breakers, and the
//! bandit-based provider selector.

pub mod anthropic;
pub mod benchmarks;
pub mod client;
pub mod health;
pub mod local;
pub mod mock;
pub mod openai;
pub mod paced;
pub mod selector;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use sage_config::SageConfig;
use sage_config::schema::ProviderConfig;
use sage_core::{Category, ProviderDescriptor};

pub use anthropic::AnthropicProvider;
pub use benchmarks::BenchmarkRegistry;
pub use client::{Chunk, Generation, ProviderClient};
pub use health::HealthTracker;
pub use local::LocalProvider;
pub use mock::{MockProvider, MockScript};
pub use openai::OpenAiProvider;
pub use paced::PacedAdapter;
pub use selector::{ProviderSelector, SelectorWeights};

/// Build a descriptor from one provider's config section.
fn descriptor_from(name: &str, cfg: &ProviderConfig) -> ProviderDescriptor {
    let supported_categories: BTreeSet<Category> = cfg
        .categories
        .iter()
        .filter_map(|c| c.parse().ok())
        .collect();
    ProviderDescriptor {
        name: name.to_string(),
        model: cfg.model.clone(),
        supported_categories,
        max_context_tokens: cfg.max_context_tokens,
        cost_per_input_token: cfg.cost_per_input_token,
        cost_per_output_token: cfg.cost_per_output_token,
        supports_streaming: cfg.supports_streaming,
    }
}

/// Construct the configured provider clients. Backends without native
/// streaming are wrapped in the pacing adapter so the streaming surface is
/// uniform.
pub fn build_providers(config: &SageConfig) -> Vec<Arc<dyn ProviderClient>> {
    let mut providers: Vec<Arc<dyn ProviderClient>> = Vec::new();

    for (name, cfg) in &config.providers {
        if !cfg.enabled {
            continue;
        }
        let descriptor = descriptor_from(name, cfg);
        let api_key = cfg.resolve_api_key().unwrap_or_default();

        let client: Arc<dyn ProviderClient> = match cfg.provider_type.as_str() {
            "anthropic" => {
                let mut p = AnthropicProvider::new(descriptor, api_key);
                if let Some(url) = &cfg.base_url {
                    p = p.with_base_url(url.clone());
                }
                Arc::new(p)
            }
            "openai" => {
                let mut p = OpenAiProvider::new(descriptor, api_key);
                if let Some(url) = &cfg.base_url {
                    p = p.with_base_url(url.clone());
                }
                Arc::new(p)
            }
            "local" => {
                let base_url = cfg
                    .base_url
                    .clone()
                    .unwrap_or_else(|| "http://127.0.0.1:11434".into());
                Arc::new(LocalProvider::new(descriptor, base_url))
            }
            "mock" => Arc::new(MockProvider::named(name).with_descriptor(descriptor)),
            other => {
                warn!(provider = name, kind = other, "unknown provider type, skipping");
                continue;
            }
        };

        let client = if cfg.supports_streaming {
            client
        } else {
            Arc::new(PacedAdapter::new(
                client,
                config.stream.chunk_chars,
                Duration::from_millis(config.stream.chunk_pacing_ms),
            ))
        };

        info!(
            provider = name,
            model = %cfg.model,
            streaming = cfg.supports_streaming,
            "registered LLM provider"
        );
        providers.push(client);
    }

    // Stable registration order regardless of map iteration.
    providers.sort_by(|a, b| a.descriptor().name.cmp(&b.descriptor().name));
    providers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_skips_disabled_and_unknown() {
        let raw = r#"
            [providers.good]
            type = "mock"
            model = "m"
            max_context_tokens = 1000
            cost_per_input_token = 0.0
            cost_per_output_token = 0.0

            [providers.off]
            type = "mock"
            model = "m"
            max_context_tokens = 1000
            cost_per_input_token = 0.0
            cost_per_output_token = 0.0
            enabled = false

            [providers.weird]
            type = "carrier-pigeon"
            model = "m"
            max_context_tokens = 1000
            cost_per_input_token = 0.0
            cost_per_output_token = 0.0
        "#;
        let config: SageConfig = toml::from_str(raw).unwrap();
        let providers = build_providers(&config);
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].descriptor().name, "good");
    }

    #[test]
    fn non_streaming_backend_still_exposes_streaming() {
        let raw = r#"
            [providers.batch]
            type = "mock"
            model = "m"
            max_context_tokens = 1000
            cost_per_input_token = 0.0
            cost_per_output_token = 0.0
            supports_streaming = false
        "#;
        let config: SageConfig = toml::from_str(raw).unwrap();
        let providers = build_providers(&config);
        assert_eq!(providers.len(), 1);
        // The descriptor still reports the backend's nature; the adapter
        // provides the uniform streaming surface on top.
        assert!(!providers[0].descriptor().supports_streaming);
    }
}
