//! Two-tier emotion cache.
//!
//! A small recency tier (L1) sits in front of a larger frequency tier
//! (L2, TinyLFU admission). Both share one TTL. Misses are computed
//! through the L2 tier's per-key single-flight, so N concurrent requests
//! for the same fingerprint run the backing inference exactly once.
//! Degraded results are never admitted.

use std::future::Future;
use std::time::Duration;

use moka::future::Cache;

use sage_core::EmotionResult;

pub struct EmotionCache {
    l1: Cache<String, EmotionResult>,
    l2: Cache<String, EmotionResult>,
}

impl EmotionCache {
    pub fn new(l1_capacity: u64, l2_capacity: u64, ttl: Duration) -> Self {
        Self {
            l1: Cache::builder()
                .max_capacity(l1_capacity)
                .time_to_live(ttl)
                .build(),
            l2: Cache::builder()
                .max_capacity(l2_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Look up `key`, computing via `infer` on a full miss. L2 hits are
    /// promoted into L1.
    pub async fn get_or_infer<F, Fut>(&self, key: String, infer: F) -> EmotionResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EmotionResult>,
    {
        if let Some(hit) = self.l1.get(&key).await {
            return hit;
        }

        let computed = self
            .l2
            .optionally_get_with(key.clone(), async {
                let result = infer().await;
                if result.degraded { None } else { Some(result) }
            })
            .await;

        match computed {
            Some(result) => {
                self.l1.insert(key, result.clone()).await;
                result
            }
            // The backing inference degraded — serve the fallback without
            // admitting it, so a recovered classifier is consulted next time.
            None => EmotionResult::degraded_neutral(),
        }
    }

    pub fn entry_counts(&self) -> (u64, u64) {
        (self.l1.entry_count(), self.l2.entry_count())
    }
}
