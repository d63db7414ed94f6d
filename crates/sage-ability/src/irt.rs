//! Two-parameter logistic item response model.
//!
//! Ability is stored on a [0, 1] scale and mapped linearly onto the latent
//! z scale [-3, 3] for the logistic curve. Each observed outcome applies a
//! single Newton step on the Bayesian posterior (Gaussian prior centered
//! on the current estimate); confidence grows with accumulated Fisher
//! information.

use sage_core::DifficultyLevel;

/// Prior precision of the latent ability (1/σ² of the Gaussian prior
/// before any observations).
const PRIOR_PRECISION: f64 = 1.0;

/// Information scale: confidence = I / (I + INFO_SCALE).
const INFO_SCALE: f64 = 5.0;

/// Half-width of the latent scale; theta 0..1 maps to z -3..3.
const Z_SPAN: f64 = 3.0;

/// Item difficulty on the latent scale, per level.
pub fn difficulty_b(level: DifficultyLevel) -> f64 {
    match level {
        DifficultyLevel::Trivial => -2.0,
        DifficultyLevel::Easy => -1.0,
        DifficultyLevel::Moderate => 0.0,
        DifficultyLevel::Hard => 1.0,
        DifficultyLevel::Expert => 2.0,
    }
}

/// Item discrimination per level. Harder items discriminate slightly more
/// sharply, following common 2PL calibrations.
pub fn discrimination_a(level: DifficultyLevel) -> f64 {
    match level {
        DifficultyLevel::Trivial => 0.8,
        DifficultyLevel::Easy => 0.9,
        DifficultyLevel::Moderate => 1.0,
        DifficultyLevel::Hard => 1.1,
        DifficultyLevel::Expert => 1.2,
    }
}

pub fn theta_to_z(theta: f64) -> f64 {
    (theta.clamp(0.0, 1.0) - 0.5) * 2.0 * Z_SPAN
}

pub fn z_to_theta(z: f64) -> f64 {
    (z / (2.0 * Z_SPAN) + 0.5).clamp(0.0, 1.0)
}

/// P(success) under the 2PL curve for ability `theta` at `level`.
pub fn success_probability(theta: f64, level: DifficultyLevel) -> f64 {
    let z = theta_to_z(theta);
    let a = discrimination_a(level);
    let b = difficulty_b(level);
    1.0 / (1.0 + (-a * (z - b)).exp())
}

/// Result of one IRT update step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IrtStep {
    pub theta: f64,
    pub confidence: f64,
}

/// Apply one Bayesian step for outcome `y` (1.0 success, 0.0 failure) at
/// `level`, given the current estimate and confidence.
///
/// The Newton step on the log-posterior is
/// `z' = z + a(y − P) / (a²P(1−P) + I_prev + τ)`, where `I_prev` is the
/// Fisher information already accumulated (recovered from confidence) and
/// τ the prior precision. Confidence is monotonically non-decreasing.
pub fn update(theta: f64, confidence: f64, level: DifficultyLevel, y: f64) -> IrtStep {
    let z = theta_to_z(theta);
    let a = discrimination_a(level);
    let b = difficulty_b(level);
    let p = 1.0 / (1.0 + (-a * (z - b)).exp());

    // Recover accumulated information from stored confidence.
    let info_prev = if confidence >= 1.0 {
        f64::MAX / 4.0
    } else {
        INFO_SCALE * confidence / (1.0 - confidence)
    };

    let info_step = a * a * p * (1.0 - p);
    let gradient = a * (y - p);
    let z_next = z + gradient / (info_step + info_prev + PRIOR_PRECISION);

    let info_next = info_prev + info_step;
    IrtStep {
        theta: z_to_theta(z_next),
        confidence: info_next / (info_next + INFO_SCALE),
    }
}
