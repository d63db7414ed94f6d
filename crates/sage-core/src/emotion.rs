use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Pleasure / Arousal / Dominance coordinates, each in [-1, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Pad {
    pub pleasure: f32,
    pub arousal: f32,
    pub dominance: f32,
}

/// How ready the learner is to take in new material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LearningReadiness {
    NotReady,
    Low,
    Moderate,
    High,
    Optimal,
}

/// Estimated working-memory pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CognitiveLoad {
    Minimal,
    Low,
    Moderate,
    High,
    Overload,
}

/// Octant of the challenge/skill flow model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowState {
    Bored,
    Anxious,
    Apathy,
    Control,
    Flow,
    Arousal,
    Worry,
    Relaxation,
}

/// Whether (and how strongly) the tutor should intervene before continuing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Intervention {
    pub recommended: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Monotonic in severity, in [0, 1].
    pub strength: f32,
}

/// Full output of one emotion inference pass.
///
/// Invariants: probabilities lie in [0, 1] and sum to 1 (±1e-6);
/// `primary_emotion` is the argmax of `distribution`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionResult {
    pub primary_emotion: String,
    pub distribution: BTreeMap<String, f32>,
    /// Probability mass of the primary emotion, in [0, 1].
    pub intensity: f32,
    pub pad: Pad,
    pub learning_readiness: LearningReadiness,
    pub cognitive_load: CognitiveLoad,
    pub flow_state: FlowState,
    pub intervention: Intervention,
    /// Set when the classifier failed and this is the neutral fallback.
    #[serde(default)]
    pub degraded: bool,
}

impl EmotionResult {
    /// A neutral result: calm defaults with no intervention.
    pub fn neutral() -> Self {
        let mut distribution = BTreeMap::new();
        distribution.insert("neutral".to_string(), 1.0);
        Self {
            primary_emotion: "neutral".to_string(),
            distribution,
            intensity: 0.3,
            pad: Pad::default(),
            learning_readiness: LearningReadiness::Moderate,
            cognitive_load: CognitiveLoad::Moderate,
            flow_state: FlowState::Control,
            intervention: Intervention::default(),
            degraded: false,
        }
    }

    /// The neutral fallback returned when inference fails or times out.
    /// Never fails the enclosing request.
    pub fn degraded_neutral() -> Self {
        Self {
            degraded: true,
            ..Self::neutral()
        }
    }

    /// Recompute the primary emotion from the distribution. Ties break on
    /// label order so repeated calls stay deterministic.
    pub fn argmax(distribution: &BTreeMap<String, f32>) -> Option<(&str, f32)> {
        distribution
            .iter()
            .max_by(|a, b| {
                a.1.partial_cmp(b.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.0.cmp(a.0))
            })
            .map(|(label, p)| (label.as_str(), *p))
    }

    /// Check the distribution invariants (well-formed probabilities that sum
    /// to ~1 and a matching primary label).
    pub fn is_well_formed(&self) -> bool {
        let sum: f32 = self.distribution.values().sum();
        if (sum - 1.0).abs() >= 1e-6 {
            return false;
        }
        if self.distribution.values().any(|p| *p < 0.0 || *p > 1.0) {
            return false;
        }
        Self::argmax(&self.distribution)
            .map(|(label, _)| label == self.primary_emotion)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degraded_neutral_is_well_formed() {
        let e = EmotionResult::degraded_neutral();
        assert!(e.is_well_formed());
        assert!(e.degraded);
        assert_eq!(e.primary_emotion, "neutral");
        assert_eq!(e.learning_readiness, LearningReadiness::Moderate);
        assert_eq!(e.cognitive_load, CognitiveLoad::Moderate);
        assert!(!e.intervention.recommended);
    }

    #[test]
    fn argmax_breaks_ties_on_label_order() {
        let mut d = BTreeMap::new();
        d.insert("joy".to_string(), 0.5f32);
        d.insert("anger".to_string(), 0.5f32);
        let (label, _) = EmotionResult::argmax(&d).unwrap();
        assert_eq!(label, "anger");
    }

    #[test]
    fn readiness_ordering_matches_severity() {
        assert!(LearningReadiness::NotReady < LearningReadiness::Optimal);
        assert!(CognitiveLoad::Minimal < CognitiveLoad::Overload);
    }

    #[test]
    fn enums_serialize_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&LearningReadiness::NotReady).unwrap(),
            "\"NOT_READY\""
        );
        assert_eq!(
            serde_json::to_string(&FlowState::Relaxation).unwrap(),
            "\"RELAXATION\""
        );
    }
}
