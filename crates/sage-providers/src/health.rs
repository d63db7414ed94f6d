//! Provider health tracking: rolling-window latency/error counters and a
//! consecutive-failure circuit breaker per provider.
//!
//! The tracker is a pure sink — the engine calls `observe`, the selector
//! reads snapshots, and the tracker never calls back into either.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::warn;

use sage_core::{CircuitState, ProviderHealth};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Circuit {
    Closed,
    Open { since: Instant },
    /// A single probe request is in flight.
    HalfOpen,
}

struct ProviderStats {
    /// (observed_at, success, latency_ms), newest at the back.
    window: VecDeque<(Instant, bool, u64)>,
    consecutive_failures: u32,
    circuit: Circuit,
    last_error_ts: Option<chrono::DateTime<Utc>>,
}

impl ProviderStats {
    fn new() -> Self {
        Self {
            window: VecDeque::new(),
            consecutive_failures: 0,
            circuit: Circuit::Closed,
            last_error_ts: None,
        }
    }
}

pub struct HealthTracker {
    stats: DashMap<String, Mutex<ProviderStats>>,
    fail_threshold: u32,
    cooldown: Duration,
    window_size: usize,
    window_age: Duration,
}

impl HealthTracker {
    pub fn new(
        fail_threshold: u32,
        cooldown: Duration,
        window_size: usize,
        window_age: Duration,
    ) -> Self {
        Self {
            stats: DashMap::new(),
            fail_threshold: fail_threshold.max(1),
            cooldown,
            window_size: window_size.max(1),
            window_age,
        }
    }

    fn with_stats<T>(&self, provider: &str, f: impl FnOnce(&mut ProviderStats) -> T) -> T {
        let entry = self
            .stats
            .entry(provider.to_string())
            .or_insert_with(|| Mutex::new(ProviderStats::new()));
        let mut stats = entry.lock();
        f(&mut stats)
    }

    /// Record one call outcome. Updated on every request exit path.
    pub fn observe(&self, provider: &str, success: bool, latency: Duration) {
        let threshold = self.fail_threshold;
        let window_size = self.window_size;
        let window_age = self.window_age;
        self.with_stats(provider, |stats| {
            let now = Instant::now();
            stats
                .window
                .push_back((now, success, latency.as_millis() as u64));
            while stats.window.len() > window_size {
                stats.window.pop_front();
            }
            while let Some((t, _, _)) = stats.window.front() {
                if now.duration_since(*t) > window_age {
                    stats.window.pop_front();
                } else {
                    break;
                }
            }

            if success {
                stats.consecutive_failures = 0;
                stats.circuit = Circuit::Closed;
            } else {
                stats.consecutive_failures += 1;
                stats.last_error_ts = Some(Utc::now());
                let was_open = matches!(stats.circuit, Circuit::Open { .. });
                if matches!(stats.circuit, Circuit::HalfOpen)
                    || stats.consecutive_failures >= threshold
                {
                    stats.circuit = Circuit::Open { since: now };
                    if !was_open {
                        warn!(
                            provider,
                            failures = stats.consecutive_failures,
                            "circuit breaker OPEN"
                        );
                    }
                }
            }
        });
    }

    /// Whether a request may be routed to this provider right now. An open
    /// circuit past its cooldown transitions to half-open and admits one
    /// probe; further requests are refused until the probe resolves.
    pub fn available(&self, provider: &str) -> bool {
        let cooldown = self.cooldown;
        self.with_stats(provider, |stats| match stats.circuit {
            Circuit::Closed => true,
            Circuit::Open { since } => {
                if since.elapsed() >= cooldown {
                    stats.circuit = Circuit::HalfOpen;
                    true
                } else {
                    false
                }
            }
            Circuit::HalfOpen => false,
        })
    }

    /// Point-in-time health view for scoring and persistence.
    pub fn snapshot(&self, provider: &str) -> ProviderHealth {
        self.with_stats(provider, |stats| {
            let total = stats.window.len();
            let successes = stats.window.iter().filter(|(_, ok, _)| *ok).count();
            let success_rate = if total == 0 {
                1.0
            } else {
                successes as f64 / total as f64
            };

            let mut latencies: Vec<u64> = stats.window.iter().map(|(_, _, l)| *l).collect();
            latencies.sort_unstable();
            let percentile = |p: f64| -> u64 {
                if latencies.is_empty() {
                    return 0;
                }
                let idx = ((latencies.len() as f64 - 1.0) * p).round() as usize;
                latencies[idx]
            };

            ProviderHealth {
                success_rate,
                p50_latency_ms: percentile(0.50),
                p95_latency_ms: percentile(0.95),
                consecutive_failures: stats.consecutive_failures,
                circuit_state: match stats.circuit {
                    Circuit::Closed => CircuitState::Closed,
                    Circuit::Open { .. } => CircuitState::Open,
                    Circuit::HalfOpen => CircuitState::HalfOpen,
                },
                last_error_ts: stats.last_error_ts,
            }
        })
    }

    /// Seed a provider's breaker from a persisted snapshot at startup.
    pub fn restore(&self, provider: &str, health: &ProviderHealth) {
        self.with_stats(provider, |stats| {
            stats.consecutive_failures = health.consecutive_failures;
            stats.last_error_ts = health.last_error_ts;
            stats.circuit = match health.circuit_state {
                CircuitState::Closed => Circuit::Closed,
                // A restored open circuit restarts its cooldown.
                CircuitState::Open | CircuitState::HalfOpen => Circuit::Open {
                    since: Instant::now(),
                },
            };
        });
    }

    pub fn providers(&self) -> Vec<String> {
        self.stats.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> HealthTracker {
        HealthTracker::new(3, Duration::from_millis(50), 64, Duration::from_secs(300))
    }

    #[test]
    fn opens_after_consecutive_failures() {
        let t = tracker();
        for _ in 0..2 {
            t.observe("p", false, Duration::from_millis(10));
        }
        assert!(t.available("p"));
        t.observe("p", false, Duration::from_millis(10));
        assert!(!t.available("p"));
        assert_eq!(t.snapshot("p").circuit_state, CircuitState::Open);
    }

    #[test]
    fn success_resets_the_streak() {
        let t = tracker();
        t.observe("p", false, Duration::from_millis(10));
        t.observe("p", false, Duration::from_millis(10));
        t.observe("p", true, Duration::from_millis(10));
        t.observe("p", false, Duration::from_millis(10));
        assert!(t.available("p"));
        assert_eq!(t.snapshot("p").consecutive_failures, 1);
    }

    #[test]
    fn half_open_admits_exactly_one_probe() {
        let t = tracker();
        for _ in 0..3 {
            t.observe("p", false, Duration::from_millis(10));
        }
        assert!(!t.available("p"));
        std::thread::sleep(Duration::from_millis(60));
        // Cooldown elapsed: one probe allowed, the next caller refused.
        assert!(t.available("p"));
        assert!(!t.available("p"));
        assert_eq!(t.snapshot("p").circuit_state, CircuitState::HalfOpen);
    }

    #[test]
    fn probe_success_closes_probe_failure_reopens() {
        let t = tracker();
        for _ in 0..3 {
            t.observe("p", false, Duration::from_millis(10));
        }
        std::thread::sleep(Duration::from_millis(60));
        assert!(t.available("p"));
        t.observe("p", false, Duration::from_millis(10));
        assert_eq!(t.snapshot("p").circuit_state, CircuitState::Open);

        std::thread::sleep(Duration::from_millis(60));
        assert!(t.available("p"));
        t.observe("p", true, Duration::from_millis(10));
        assert_eq!(t.snapshot("p").circuit_state, CircuitState::Closed);
        assert!(t.available("p"));
    }

    #[test]
    fn percentiles_come_from_the_window() {
        let t = tracker();
        for ms in [10u64, 20, 30, 40, 100] {
            t.observe("p", true, Duration::from_millis(ms));
        }
        let snap = t.snapshot("p");
        assert_eq!(snap.p50_latency_ms, 30);
        assert_eq!(snap.p95_latency_ms, 100);
        assert_eq!(snap.success_rate, 1.0);
    }

    #[test]
    fn window_is_bounded_by_count() {
        let t = HealthTracker::new(5, Duration::from_secs(1), 4, Duration::from_secs(300));
        for _ in 0..10 {
            t.observe("p", false, Duration::from_millis(1));
        }
        t.observe("p", true, Duration::from_millis(1));
        let snap = t.snapshot("p");
        // Only the last 4 observations remain: 3 failures + 1 success.
        assert!((snap.success_rate - 0.25).abs() < 1e-9);
    }
}
