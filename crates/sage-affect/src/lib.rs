//! # sage-affect
//!
//! The emotion inference subsystem: a transformer classifier over the
//! GoEmotions taxonomy, PAD projection, registry-loaded heads for
//! learning readiness, cognitive load and flow state, the intervention
//! decision, and a two-tier cache with single-flight miss handling.

pub mod cache;
pub mod classifier;
pub mod fingerprint;
pub mod heads;
pub mod labels;
pub mod registry;
pub mod service;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use sage_core::EmotionResult;

pub use cache::EmotionCache;
pub use classifier::{EmotionClassifier, StubClassifier, TransformerClassifier};
pub use registry::ModelRegistry;
pub use service::EmotionEngine;

/// Cache + engine behind one call. This is the face the pipeline sees.
pub struct AffectService {
    engine: EmotionEngine,
    cache: EmotionCache,
}

/// Tuning knobs lifted from configuration.
pub struct AffectParams {
    pub l1_capacity: u64,
    pub l2_capacity: u64,
    pub ttl: Duration,
    pub infer_timeout: Duration,
    pub worker_threads: usize,
}

impl AffectService {
    pub fn new(
        classifier: Arc<dyn EmotionClassifier>,
        registry: &ModelRegistry,
        params: AffectParams,
    ) -> Result<Self> {
        Ok(Self {
            engine: EmotionEngine::new(
                classifier,
                registry,
                params.worker_threads,
                params.infer_timeout,
            )?,
            cache: EmotionCache::new(params.l1_capacity, params.l2_capacity, params.ttl),
        })
    }

    /// Analyze raw text. `skill` is the learner's current ability on
    /// [0, 1], feeding the flow head. Never fails; degraded results carry
    /// `degraded = true` and bypass the cache.
    pub async fn analyze(
        &self,
        text: &str,
        user_id: Option<&str>,
        skill: f32,
    ) -> EmotionResult {
        let normalized = fingerprint::normalize(text);
        if normalized.is_empty() {
            return EmotionResult::neutral();
        }
        let key = fingerprint::fingerprint(&normalized, user_id);
        self.cache
            .get_or_infer(key, || self.engine.infer(normalized, skill))
            .await
    }
}
