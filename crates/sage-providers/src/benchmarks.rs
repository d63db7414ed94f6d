//! Benchmark registry: per-provider, per-category quality scores refreshed
//! from an external feed on a schedule, with exponential backoff on
//! failure. Reads never block request processing; stale data serves until
//! fresh data arrives.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sage_core::{BenchmarkScores, Category};
use sage_store::DocumentStore;

pub struct BenchmarkRegistry {
    scores: RwLock<HashMap<String, BenchmarkScores>>,
    client: reqwest::Client,
}

impl Default for BenchmarkRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BenchmarkRegistry {
    pub fn new() -> Self {
        Self {
            scores: RwLock::new(HashMap::new()),
            client: reqwest::Client::new(),
        }
    }

    /// Quality score for a provider in a category; 0.5 (neutral) when the
    /// provider or category has never been scored.
    pub fn quality(&self, provider: &str, category: Category) -> f64 {
        self.scores
            .read()
            .get(provider)
            .map(|s| s.quality(category))
            .unwrap_or(0.5)
    }

    pub fn snapshot(&self, provider: &str) -> Option<BenchmarkScores> {
        self.scores.read().get(provider).cloned()
    }

    /// Replace the scores for the given providers.
    pub fn apply(&self, update: HashMap<String, BTreeMap<Category, f64>>) {
        let mut scores = self.scores.write();
        for (provider, per_category) in update {
            scores.insert(
                provider,
                BenchmarkScores {
                    per_category,
                    refreshed_at: Some(Utc::now()),
                },
            );
        }
    }

    /// Warm the registry from the last persisted snapshot.
    pub fn load_from_store(&self, store: &DocumentStore) {
        match store.load_benchmarks() {
            Ok(rows) => {
                let count = rows.len();
                let mut scores = self.scores.write();
                for (provider, snapshot) in rows {
                    scores.insert(provider, snapshot);
                }
                if count > 0 {
                    info!(count, "loaded benchmark snapshot from store");
                }
            }
            Err(e) => warn!(error = %e, "failed to load benchmark snapshot"),
        }
    }

    /// Fetch the feed once and apply it. The feed is a JSON object mapping
    /// provider name to `{category: score}`.
    pub async fn refresh_once(
        &self,
        feed_url: &str,
        store: Option<&DocumentStore>,
    ) -> anyhow::Result<()> {
        let resp = self.client.get(feed_url).send().await?.error_for_status()?;
        let raw: HashMap<String, HashMap<String, f64>> = resp.json().await?;

        let mut update: HashMap<String, BTreeMap<Category, f64>> = HashMap::new();
        for (provider, categories) in raw {
            let mut per_category = BTreeMap::new();
            for (name, score) in categories {
                if let Ok(category) = name.parse::<Category>() {
                    per_category.insert(category, score.clamp(0.0, 1.0));
                }
            }
            update.insert(provider, per_category);
        }

        info!(providers = update.len(), "benchmark feed refreshed");
        self.apply(update);

        if let Some(store) = store {
            let scores = self.scores.read().clone();
            for (provider, snapshot) in &scores {
                if let Err(e) = store.put_benchmark(provider, snapshot) {
                    warn!(provider, error = %e, "failed to persist benchmark snapshot");
                }
            }
        }
        Ok(())
    }

    /// Run the periodic refresh until cancelled. Failures back off
    /// exponentially (capped) and keep serving the last good data.
    pub fn spawn_refresh_loop(
        self: &Arc<Self>,
        feed_url: String,
        store: Option<Arc<DocumentStore>>,
        interval: Duration,
        backoff_max: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut consecutive_failures: u32 = 0;
            loop {
                let delay = if consecutive_failures == 0 {
                    interval
                } else {
                    let backoff = interval
                        .as_secs()
                        .min(60)
                        .saturating_mul(2u64.saturating_pow(consecutive_failures - 1));
                    Duration::from_secs(backoff).min(backoff_max)
                };

                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }

                match registry
                    .refresh_once(&feed_url, store.as_deref())
                    .await
                {
                    Ok(()) => consecutive_failures = 0,
                    Err(e) => {
                        consecutive_failures = consecutive_failures.saturating_add(1);
                        warn!(
                            error = %e,
                            failures = consecutive_failures,
                            "benchmark refresh failed, serving stale scores"
                        );
                    }
                }
            }
        })
    }
}
