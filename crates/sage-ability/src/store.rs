use std::sync::Arc;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use sage_core::{AbilityEstimate, DifficultyLevel, Outcome, Result};
use sage_store::DocumentStore;

use crate::irt;

/// Persistent ability estimates keyed by (user, subject).
///
/// Writes are last-writer-wins; each write is computed from the most
/// recent read within the same request. Updates are idempotent per
/// (message_id, subject) via the store's claim ledger.
#[derive(Clone)]
pub struct AbilityStore {
    store: Arc<DocumentStore>,
}

impl AbilityStore {
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self { store }
    }

    /// Current estimate, or the prior (θ = 0.5, confidence = 0) when the
    /// learner has no history for the subject.
    pub fn get(&self, user_id: &str, subject: &str) -> Result<AbilityEstimate> {
        Ok(self
            .store
            .get_ability(user_id, subject)?
            .unwrap_or_else(|| AbilityEstimate::prior(user_id, subject)))
    }

    /// Apply one IRT step for the outcome observed on `message_id`.
    ///
    /// A second call with the same (message_id, subject) is a no-op and
    /// returns the stored estimate unchanged.
    pub fn update(
        &self,
        user_id: &str,
        subject: &str,
        message_id: Uuid,
        level: DifficultyLevel,
        outcome: Outcome,
    ) -> Result<AbilityEstimate> {
        if !self.store.claim_ability_update(message_id, subject)? {
            debug!(%message_id, subject, "ability update already applied, skipping");
            return self.get(user_id, subject);
        }

        let current = self.get(user_id, subject)?;
        let step = irt::update(
            current.theta,
            current.confidence,
            level,
            outcome.as_binary(),
        );
        let next = AbilityEstimate {
            user_id: user_id.to_string(),
            subject: subject.to_string(),
            theta: step.theta,
            confidence: step.confidence,
            sample_count: current.sample_count + 1,
            last_updated: Utc::now(),
        };
        self.store.put_ability(&next)?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> AbilityStore {
        AbilityStore::new(Arc::new(DocumentStore::open_in_memory().unwrap()))
    }

    #[test]
    fn get_returns_prior_without_history() {
        let abilities = store();
        let est = abilities.get("u1", "math").unwrap();
        assert_eq!(est.theta, 0.5);
        assert_eq!(est.sample_count, 0);
    }

    #[test]
    fn update_persists_and_counts() {
        let abilities = store();
        let est = abilities
            .update("u1", "math", Uuid::new_v4(), DifficultyLevel::Moderate, Outcome::Success)
            .unwrap();
        assert!(est.theta > 0.5);
        assert_eq!(est.sample_count, 1);

        let reloaded = abilities.get("u1", "math").unwrap();
        assert_eq!(reloaded, est);
    }

    #[test]
    fn update_is_idempotent_per_message() {
        let abilities = store();
        let msg = Uuid::new_v4();
        let first = abilities
            .update("u1", "math", msg, DifficultyLevel::Hard, Outcome::Success)
            .unwrap();
        let second = abilities
            .update("u1", "math", msg, DifficultyLevel::Hard, Outcome::Success)
            .unwrap();
        assert_eq!(first.theta, second.theta);
        assert_eq!(second.sample_count, 1);
    }

    #[test]
    fn confidence_never_decreases_across_updates() {
        let abilities = store();
        let mut last = 0.0;
        for i in 0..20 {
            let outcome = if i % 4 == 0 { Outcome::Failure } else { Outcome::Success };
            let est = abilities
                .update("u1", "rust", Uuid::new_v4(), DifficultyLevel::Moderate, outcome)
                .unwrap();
            assert!(est.confidence >= last);
            last = est.confidence;
        }
    }

    #[test]
    fn subjects_are_independent() {
        let abilities = store();
        abilities
            .update("u1", "math", Uuid::new_v4(), DifficultyLevel::Expert, Outcome::Success)
            .unwrap();
        let other = abilities.get("u1", "history").unwrap();
        assert_eq!(other.theta, 0.5);
    }
}
