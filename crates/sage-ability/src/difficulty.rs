//! Adaptive difficulty selection.
//!
//! Picks the level whose predicted success probability under the learner's
//! IRT curve falls inside a target band, with the band shifted by the
//! learner's emotional state, and the final choice clamped to one step
//! from the learner's current operating level.

use sage_core::{
    AbilityEstimate, CognitiveLoad, DifficultyLevel, EmotionResult, FlowState, LearningReadiness,
};

use crate::irt::success_probability;

/// Target success probability band under the IRT curve.
const BAND: (f64, f64) = (0.55, 0.75);
/// How far one emotional adjustment step moves the band.
const BAND_STEP: f64 = 0.10;

/// The level the learner is currently operating at: the one whose success
/// probability sits closest to the unshifted band center.
fn operating_level(ability: &AbilityEstimate) -> DifficultyLevel {
    let center = (BAND.0 + BAND.1) / 2.0;
    DifficultyLevel::ALL
        .into_iter()
        .min_by(|a, b| {
            let da = (success_probability(ability.theta, *a) - center).abs();
            let db = (success_probability(ability.theta, *b) - center).abs();
            da.partial_cmp(&db)
                .unwrap_or(std::cmp::Ordering::Equal)
                // Stable tie-break toward the easier level.
                .then(a.rank().cmp(&b.rank()))
        })
        .expect("non-empty level set")
}

/// Select the next difficulty for this request.
///
/// The band shifts one step toward easier material (higher target success)
/// when cognitive load is HIGH or OVERLOAD, and one step toward harder
/// material when the learner is bored and ready for more. The result never
/// moves more than one level from the current operating level, and a
/// learner's first exchange in a subject ties toward the easier level.
pub fn pick_difficulty(ability: &AbilityEstimate, emotion: &EmotionResult) -> DifficultyLevel {
    let mut lo = BAND.0;
    let mut hi = BAND.1;

    if matches!(
        emotion.cognitive_load,
        CognitiveLoad::High | CognitiveLoad::Overload
    ) {
        lo += BAND_STEP;
        hi += BAND_STEP;
    } else if emotion.flow_state == FlowState::Bored
        && matches!(
            emotion.learning_readiness,
            LearningReadiness::High | LearningReadiness::Optimal
        )
    {
        lo -= BAND_STEP;
        hi -= BAND_STEP;
    }

    let first_exchange = ability.sample_count == 0;
    let center = (lo + hi) / 2.0;

    let target = DifficultyLevel::ALL
        .into_iter()
        .min_by(|a, b| {
            let pa = success_probability(ability.theta, *a);
            let pb = success_probability(ability.theta, *b);
            let da = band_distance(pa, lo, hi, center);
            let db = band_distance(pb, lo, hi, center);
            da.partial_cmp(&db)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(if first_exchange {
                    // First message in the subject: prefer easier on ties.
                    a.rank().cmp(&b.rank())
                } else {
                    b.rank().cmp(&a.rank())
                })
        })
        .expect("non-empty level set");

    operating_level(ability).step_toward(target)
}

/// Distance of a success probability from the band (0 inside it, then
/// distance to the band center for orderable comparisons outside).
fn band_distance(p: f64, lo: f64, hi: f64, center: f64) -> f64 {
    if (lo..=hi).contains(&p) {
        0.0
    } else {
        (p - center).abs()
    }
}
