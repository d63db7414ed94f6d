use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted ability estimate for one (user, subject) pair.
///
/// `confidence` is monotonically non-decreasing with `sample_count`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbilityEstimate {
    pub user_id: String,
    pub subject: String,
    /// Latent ability on a [0, 1] scale.
    pub theta: f64,
    /// Grows with accumulated Fisher information, in [0, 1].
    pub confidence: f64,
    pub sample_count: u64,
    pub last_updated: DateTime<Utc>,
}

impl AbilityEstimate {
    /// The prior used when a learner has no history for a subject.
    pub fn prior(user_id: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            subject: subject.into(),
            theta: 0.5,
            confidence: 0.0,
            sample_count: 0,
            last_updated: Utc::now(),
        }
    }
}

/// Discrete outcome of one exchange, fed back into the ability model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn as_binary(self) -> f64 {
        match self {
            Self::Success => 1.0,
            Self::Failure => 0.0,
        }
    }
}

/// Strictly ordered difficulty scale.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DifficultyLevel {
    Trivial,
    Easy,
    Moderate,
    Hard,
    Expert,
}

impl DifficultyLevel {
    pub const ALL: [DifficultyLevel; 5] = [
        Self::Trivial,
        Self::Easy,
        Self::Moderate,
        Self::Hard,
        Self::Expert,
    ];

    /// Numeric rank, 0 (trivial) through 4 (expert).
    pub fn rank(self) -> u8 {
        match self {
            Self::Trivial => 0,
            Self::Easy => 1,
            Self::Moderate => 2,
            Self::Hard => 3,
            Self::Expert => 4,
        }
    }

    pub fn from_rank(rank: u8) -> Self {
        match rank {
            0 => Self::Trivial,
            1 => Self::Easy,
            2 => Self::Moderate,
            3 => Self::Hard,
            _ => Self::Expert,
        }
    }

    /// Step up one level, saturating at expert.
    pub fn harder(self) -> Self {
        Self::from_rank(self.rank().saturating_add(1).min(4))
    }

    /// Step down one level, saturating at trivial.
    pub fn easier(self) -> Self {
        Self::from_rank(self.rank().saturating_sub(1))
    }

    /// Clamp `target` so it differs from `self` by at most one level.
    pub fn step_toward(self, target: Self) -> Self {
        use std::cmp::Ordering::*;
        match target.rank().cmp(&self.rank()) {
            Greater => self.harder(),
            Less => self.easier(),
            Equal => self,
        }
    }

    /// Human-readable directive fragment for prompt construction.
    pub fn directive(self) -> &'static str {
        match self {
            Self::Trivial => "keep the explanation extremely simple and concrete",
            Self::Easy => "keep the explanation simple with familiar examples",
            Self::Moderate => "explain at an intermediate level with some depth",
            Self::Hard => "go into depth and introduce advanced aspects",
            Self::Expert => "treat the learner as an expert; be rigorous and thorough",
        }
    }
}
