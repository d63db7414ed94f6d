//! Cost enforcement: pre-flight projection against the user's rolling
//! daily and monthly allowances, post-flight tally written through to the
//! cost ledger.
//!
//! Pre-flight reads are eventually consistent — a small overrun is
//! acceptable; the post-flight path guarantees no indefinite overrun.

use std::sync::Arc;

use tracing::debug;

use sage_core::{Result, SageError};
use sage_store::{CostPeriod, DocumentStore};

#[derive(Clone)]
pub struct CostEnforcer {
    store: Arc<DocumentStore>,
    daily_limit: f64,
    monthly_limit: f64,
}

impl CostEnforcer {
    pub fn new(store: Arc<DocumentStore>, daily_limit: f64, monthly_limit: f64) -> Self {
        Self {
            store,
            daily_limit,
            monthly_limit,
        }
    }

    /// Reject the request when the projected cost would exceed either
    /// remaining allowance. Terminal — not retryable.
    pub fn preflight(&self, user_id: &str, projected: f64) -> Result<()> {
        let daily = self.store.get_spend(user_id, CostPeriod::Daily)?;
        if daily + projected > self.daily_limit {
            return Err(SageError::BudgetExhausted {
                period: "daily".into(),
                spent: daily,
                limit: self.daily_limit,
            });
        }
        let monthly = self.store.get_spend(user_id, CostPeriod::Monthly)?;
        if monthly + projected > self.monthly_limit {
            return Err(SageError::BudgetExhausted {
                period: "monthly".into(),
                spent: monthly,
                limit: self.monthly_limit,
            });
        }
        Ok(())
    }

    /// Add actual spend to both windows (atomic per window).
    pub fn record(&self, user_id: &str, amount: f64) -> Result<()> {
        if amount <= 0.0 {
            return Ok(());
        }
        let daily = self.store.add_spend(user_id, CostPeriod::Daily, amount)?;
        self.store.add_spend(user_id, CostPeriod::Monthly, amount)?;
        debug!(user = user_id, amount, daily_total = daily, "recorded spend");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enforcer(daily: f64, monthly: f64) -> CostEnforcer {
        CostEnforcer::new(Arc::new(DocumentStore::open_in_memory().unwrap()), daily, monthly)
    }

    #[test]
    fn allows_within_budget() {
        let cost = enforcer(1.0, 10.0);
        assert!(cost.preflight("u1", 0.5).is_ok());
    }

    #[test]
    fn rejects_when_projection_crosses_daily_limit() {
        let cost = enforcer(1.0, 10.0);
        cost.record("u1", 0.9).unwrap();
        let err = cost.preflight("u1", 0.2).unwrap_err();
        assert!(matches!(err, SageError::BudgetExhausted { .. }));
        assert!(!err.recoverable());
    }

    #[test]
    fn monthly_limit_binds_independently() {
        let cost = enforcer(100.0, 1.0);
        cost.record("u1", 0.95).unwrap();
        assert!(cost.preflight("u1", 0.2).is_err());
    }

    #[test]
    fn users_have_separate_tallies() {
        let cost = enforcer(1.0, 10.0);
        cost.record("u1", 0.99).unwrap();
        assert!(cost.preflight("u2", 0.5).is_ok());
    }
}
