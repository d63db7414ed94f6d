//! # sage-engine
//!
//! The request-processing core: prompt construction, token budget
//! allocation, cost enforcement, the stream registry, and the pipeline
//! engine that sequences emotion inference, context assembly, adaptive
//! difficulty, provider selection and streaming generation.

pub mod budget;
pub mod cost;
pub mod engine;
pub mod prompt;
pub mod stream;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::warn;

use sage_ability::AbilityStore;
use sage_affect::{AffectParams, AffectService, EmotionClassifier, ModelRegistry};
use sage_config::SageConfig;
use sage_context::{ContextAssembler, ContextParams};
use sage_providers::{BenchmarkRegistry, HealthTracker, ProviderSelector, SelectorWeights};
use sage_store::DocumentStore;

pub use budget::BudgetParams;
pub use cost::CostEnforcer;
pub use engine::{ChatRequest, ChatResponse, Engine, StreamRequest, classify_category};
pub use stream::StreamRegistry;

/// The engine plus the shared trackers the binary needs for background
/// work (benchmark refresh, health persistence). Instantiated once at
/// startup; no module-level state.
pub struct EngineContext {
    pub engine: Arc<Engine>,
    pub benchmarks: Arc<BenchmarkRegistry>,
    pub health: Arc<HealthTracker>,
}

/// Wire the whole pipeline from configuration. The emotion classifier is
/// injected so the binary can load the transformer artifact while tests
/// supply a stub.
pub fn build_engine(
    config: &SageConfig,
    store: Arc<DocumentStore>,
    classifier: Arc<dyn EmotionClassifier>,
) -> anyhow::Result<EngineContext> {
    let registry = ModelRegistry::new(config.emotion.registry_dir.clone());

    let affect = Arc::new(
        AffectService::new(
            classifier,
            &registry,
            AffectParams {
                l1_capacity: config.cache.l1_capacity,
                l2_capacity: config.cache.l2_capacity,
                ttl: Duration::from_secs(config.cache.ttl_seconds),
                infer_timeout: Duration::from_millis(config.emotion.infer_timeout_ms),
                worker_threads: config.emotion.worker_threads,
            },
        )
        .context("failed to build emotion service")?,
    );

    let complexity = match registry.regressor("complexity") {
        Ok(model) => Some(model),
        Err(e) => {
            warn!(error = %e, "complexity regressor unavailable, using fallback heuristic");
            None
        }
    };

    let health = Arc::new(HealthTracker::new(
        config.circuit.fail_threshold,
        Duration::from_secs(config.circuit.cooldown_secs),
        config.circuit.window_size,
        Duration::from_secs(config.circuit.window_secs),
    ));
    match store.load_provider_health() {
        Ok(rows) => {
            for (provider, snapshot) in rows {
                health.restore(&provider, &snapshot);
            }
        }
        Err(e) => warn!(error = %e, "failed to restore provider health"),
    }

    let benchmarks = Arc::new(BenchmarkRegistry::new());
    benchmarks.load_from_store(&store);

    let providers = sage_providers::build_providers(config);
    let selector = Arc::new(ProviderSelector::new(
        providers,
        Arc::clone(&health),
        Arc::clone(&benchmarks),
        SelectorWeights {
            quality: config.selector.weight_quality,
            health: config.selector.weight_health,
            cost: config.selector.weight_cost,
            latency: config.selector.weight_latency,
        },
        config.selector.epsilon_initial,
        config.selector.epsilon_decay,
        config.selector.fallback_chain_length,
    ));

    let assembler = ContextAssembler::new(
        Arc::clone(&store),
        ContextParams {
            recent_limit: config.context.recent_limit,
            recent_token_budget: config.context.recent_token_budget,
            relevant_limit: config.context.relevant_limit,
            relevance_threshold: config.context.relevance_threshold,
            user_scope: config.context.user_scope,
        },
    );

    let engine = Arc::new(Engine::new(
        Arc::clone(&store),
        affect,
        AbilityStore::new(Arc::clone(&store)),
        assembler,
        selector,
        Arc::clone(&health),
        CostEnforcer::new(
            Arc::clone(&store),
            config.budget.daily_usd,
            config.budget.monthly_usd,
        ),
        BudgetParams {
            min_reasoning: config.tokens.min_reasoning,
            max_reasoning: config.tokens.max_reasoning,
            min_response: config.tokens.min_response,
            max_response: config.tokens.max_response,
        },
        complexity,
        config.tokens.safety_margin,
        Duration::from_secs(config.stream.provider_timeout_secs),
    ));

    Ok(EngineContext {
        engine,
        benchmarks,
        health,
    })
}
