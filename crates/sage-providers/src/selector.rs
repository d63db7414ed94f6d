//! Category-aware provider selection: filter, score, explore.
//!
//! Candidates are filtered on circuit state, context window and category
//! support, scored on benchmark quality, health, cost and latency, and
//! ranked. An ε-greedy bandit (ε decaying with request volume) occasionally
//! samples proportional to score instead of exploiting the argmax, so
//! newly-recovered or rarely-tried providers keep receiving traffic.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};
use tracing::debug;

use sage_core::{Category, Result, SageError, TokenBudget};

use crate::benchmarks::BenchmarkRegistry;
use crate::client::ProviderClient;
use crate::health::HealthTracker;

#[derive(Debug, Clone, Copy)]
pub struct SelectorWeights {
    pub quality: f64,
    pub health: f64,
    pub cost: f64,
    pub latency: f64,
}

impl Default for SelectorWeights {
    fn default() -> Self {
        Self {
            quality: 0.4,
            health: 0.3,
            cost: 0.2,
            latency: 0.1,
        }
    }
}

pub struct ProviderSelector {
    providers: Vec<Arc<dyn ProviderClient>>,
    health: Arc<HealthTracker>,
    benchmarks: Arc<BenchmarkRegistry>,
    weights: SelectorWeights,
    epsilon_initial: f64,
    epsilon_decay: f64,
    chain_length: usize,
    requests: AtomicU64,
    rng: Mutex<StdRng>,
}

struct Candidate {
    provider: Arc<dyn ProviderClient>,
    score: f64,
    cost_per_token: f64,
    p95_latency_ms: u64,
}

impl ProviderSelector {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        providers: Vec<Arc<dyn ProviderClient>>,
        health: Arc<HealthTracker>,
        benchmarks: Arc<BenchmarkRegistry>,
        weights: SelectorWeights,
        epsilon_initial: f64,
        epsilon_decay: f64,
        chain_length: usize,
    ) -> Self {
        Self {
            providers,
            health,
            benchmarks,
            weights,
            epsilon_initial,
            epsilon_decay,
            chain_length,
            requests: AtomicU64::new(0),
            rng: Mutex::new(rand::make_rng::<StdRng>()),
        }
    }

    /// Fix the bandit's RNG seed (tests).
    pub fn with_seed(self, seed: u64) -> Self {
        *self.rng.lock() = StdRng::seed_from_u64(seed);
        self
    }

    pub fn providers(&self) -> &[Arc<dyn ProviderClient>] {
        &self.providers
    }

    /// Produce the ranked provider list for this request: the head is the
    /// primary, the tail the fallback chain. Fails only when every
    /// provider is excluded.
    pub fn select(
        &self,
        category: Category,
        budget: &TokenBudget,
    ) -> Result<Vec<Arc<dyn ProviderClient>>> {
        let mut candidates: Vec<Candidate> = Vec::new();
        for provider in &self.providers {
            let desc = provider.descriptor();
            if !desc.supports(category) {
                continue;
            }
            if desc.max_context_tokens < budget.total() {
                continue;
            }
            if !self.health.available(&desc.name) {
                debug!(provider = %desc.name, "skipping provider with open circuit");
                continue;
            }

            let snapshot = self.health.snapshot(&desc.name);
            candidates.push(Candidate {
                score: 0.0,
                cost_per_token: desc.cost_per_input_token + desc.cost_per_output_token,
                p95_latency_ms: snapshot.p95_latency_ms,
                provider: Arc::clone(provider),
            });
        }

        if candidates.is_empty() {
            return Err(SageError::NoProviderAvailable(
                category.as_str().to_string(),
            ));
        }

        // Normalize cost and latency against the candidate pool.
        let max_cost = candidates
            .iter()
            .map(|c| c.cost_per_token)
            .fold(0.0_f64, f64::max);
        let max_latency = candidates
            .iter()
            .map(|c| c.p95_latency_ms)
            .max()
            .unwrap_or(0);

        for c in &mut candidates {
            let desc = c.provider.descriptor();
            let snapshot = self.health.snapshot(&desc.name);
            let quality = self.benchmarks.quality(&desc.name, category);
            let cost_norm = if max_cost > 0.0 {
                c.cost_per_token / max_cost
            } else {
                0.0
            };
            let latency_norm = if max_latency > 0 {
                c.p95_latency_ms as f64 / max_latency as f64
            } else {
                0.0
            };
            c.score = self.weights.quality * quality + self.weights.health * snapshot.success_rate
                - self.weights.cost * cost_norm
                - self.weights.latency * latency_norm;
        }

        // Rank: score desc, then cheaper, then faster, then stable name order.
        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    a.cost_per_token
                        .partial_cmp(&b.cost_per_token)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(a.p95_latency_ms.cmp(&b.p95_latency_ms))
                .then(a.provider.descriptor().name.cmp(&b.provider.descriptor().name))
        });

        // Exploration: with probability ε, promote a score-weighted sample
        // to the front instead of the argmax.
        let n = self.requests.fetch_add(1, Ordering::Relaxed);
        let epsilon = self.epsilon_initial / (1.0 + self.epsilon_decay * n as f64);
        {
            let mut rng = self.rng.lock();
            if candidates.len() > 1 && rng.random::<f64>() < epsilon {
                let floor = 0.01;
                let total: f64 = candidates.iter().map(|c| c.score.max(floor)).sum();
                let mut roll = rng.random::<f64>() * total;
                let mut picked = 0;
                for (i, c) in candidates.iter().enumerate() {
                    roll -= c.score.max(floor);
                    if roll <= 0.0 {
                        picked = i;
                        break;
                    }
                }
                let explored = candidates.remove(picked);
                debug!(
                    provider = %explored.provider.descriptor().name,
                    epsilon,
                    "bandit exploration pick"
                );
                candidates.insert(0, explored);
            }
        }

        candidates.truncate(1 + self.chain_length);
        Ok(candidates.into_iter().map(|c| c.provider).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockProvider;
    use std::collections::BTreeSet;
    use std::time::Duration;

    use sage_core::ProviderDescriptor;

    fn descriptor(name: &str, cost: f64, categories: &[Category], window: u32) -> ProviderDescriptor {
        ProviderDescriptor {
            name: name.into(),
            model: format!("{name}-model"),
            supported_categories: categories.iter().copied().collect::<BTreeSet<_>>(),
            max_context_tokens: window,
            cost_per_input_token: cost,
            cost_per_output_token: cost * 2.0,
            supports_streaming: true,
        }
    }

    fn provider(name: &str, cost: f64, categories: &[Category]) -> Arc<dyn ProviderClient> {
        Arc::new(
            MockProvider::named(name).with_descriptor(descriptor(name, cost, categories, 32_768)),
        )
    }

    fn budget() -> TokenBudget {
        TokenBudget {
            reasoning_tokens: 1024,
            response_tokens: 1024,
            provider_max_tokens: 32_768,
            utilization: 0.06,
        }
    }

    fn selector(
        providers: Vec<Arc<dyn ProviderClient>>,
        health: Arc<HealthTracker>,
    ) -> ProviderSelector {
        ProviderSelector::new(
            providers,
            health,
            Arc::new(BenchmarkRegistry::new()),
            SelectorWeights::default(),
            0.0, // no exploration in deterministic tests
            0.01,
            3,
        )
        .with_seed(7)
    }

    fn tracker() -> Arc<HealthTracker> {
        Arc::new(HealthTracker::new(
            3,
            Duration::from_secs(60),
            64,
            Duration::from_secs(300),
        ))
    }

    #[test]
    fn open_circuit_is_never_selected() {
        let health = tracker();
        for _ in 0..3 {
            health.observe("a", false, Duration::from_millis(5));
        }
        let sel = selector(
            vec![
                provider("a", 1e-6, &[Category::General]),
                provider("b", 1e-6, &[Category::General]),
            ],
            health,
        );
        let ranked = sel.select(Category::General, &budget()).unwrap();
        assert!(
            ranked
                .iter()
                .all(|p| p.descriptor().name != "a")
        );
    }

    #[test]
    fn category_filter_applies() {
        let sel = selector(
            vec![
                provider("coder", 1e-6, &[Category::Coding]),
                provider("generalist", 1e-6, &[Category::General]),
            ],
            tracker(),
        );
        let ranked = sel.select(Category::Coding, &budget()).unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].descriptor().name, "coder");
    }

    #[test]
    fn small_context_window_is_excluded() {
        let tiny: Arc<dyn ProviderClient> = Arc::new(
            MockProvider::named("tiny")
                .with_descriptor(descriptor("tiny", 1e-7, &[Category::General], 512)),
        );
        let sel = selector(
            vec![tiny, provider("big", 1e-6, &[Category::General])],
            tracker(),
        );
        let ranked = sel.select(Category::General, &budget()).unwrap();
        assert_eq!(ranked[0].descriptor().name, "big");
        assert_eq!(ranked.len(), 1);
    }

    #[test]
    fn all_excluded_is_no_provider_available() {
        let health = tracker();
        for _ in 0..3 {
            health.observe("only", false, Duration::from_millis(5));
        }
        let sel = selector(vec![provider("only", 1e-6, &[Category::General])], health);
        let err = sel.select(Category::General, &budget()).unwrap_err();
        assert!(matches!(err, SageError::NoProviderAvailable(_)));
    }

    #[test]
    fn higher_quality_wins_with_equal_health() {
        let benchmarks = Arc::new(BenchmarkRegistry::new());
        benchmarks.apply(std::collections::HashMap::from([
            (
                "strong".to_string(),
                std::collections::BTreeMap::from([(Category::Reasoning, 0.95)]),
            ),
            (
                "weak".to_string(),
                std::collections::BTreeMap::from([(Category::Reasoning, 0.40)]),
            ),
        ]));
        let sel = ProviderSelector::new(
            vec![
                provider("weak", 1e-6, &[Category::Reasoning]),
                provider("strong", 1e-6, &[Category::Reasoning]),
            ],
            tracker(),
            benchmarks,
            SelectorWeights::default(),
            0.0,
            0.01,
            3,
        )
        .with_seed(7);
        let ranked = sel.select(Category::Reasoning, &budget()).unwrap();
        assert_eq!(ranked[0].descriptor().name, "strong");
        assert_eq!(ranked[1].descriptor().name, "weak");
    }

    #[test]
    fn ties_break_toward_cheaper_then_name() {
        let sel = selector(
            vec![
                provider("zeta", 2e-6, &[Category::General]),
                provider("alpha", 2e-6, &[Category::General]),
                provider("cheap", 1e-6, &[Category::General]),
            ],
            tracker(),
        );
        let ranked = sel.select(Category::General, &budget()).unwrap();
        let names: Vec<&str> = ranked.iter().map(|p| p.descriptor().name.as_str()).collect();
        assert_eq!(names, vec!["cheap", "alpha", "zeta"]);
    }

    #[test]
    fn chain_is_bounded() {
        let providers: Vec<Arc<dyn ProviderClient>> = (0..8)
            .map(|i| provider(&format!("p{i}"), 1e-6, &[Category::General]))
            .collect();
        let sel = selector(providers, tracker());
        let ranked = sel.select(Category::General, &budget()).unwrap();
        assert_eq!(ranked.len(), 4); // primary + 3 fallbacks
    }

    #[test]
    fn exploration_still_returns_full_chain() {
        let sel = ProviderSelector::new(
            vec![
                provider("a", 1e-6, &[Category::General]),
                provider("b", 2e-6, &[Category::General]),
            ],
            tracker(),
            Arc::new(BenchmarkRegistry::new()),
            SelectorWeights::default(),
            1.0, // always explore
            0.0,
            3,
        )
        .with_seed(42);
        for _ in 0..10 {
            let ranked = sel.select(Category::General, &budget()).unwrap();
            assert_eq!(ranked.len(), 2);
        }
    }
}
