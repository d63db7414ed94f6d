//! The GoEmotions label taxonomy (27 emotions + neutral) and the fixed
//! per-label PAD projection used to map a label distribution into
//! pleasure/arousal/dominance space.

use sage_core::Pad;

/// Classifier output labels, in the model's output order.
pub const GO_EMOTIONS: [&str; 28] = [
    "admiration",
    "amusement",
    "anger",
    "annoyance",
    "approval",
    "caring",
    "confusion",
    "curiosity",
    "desire",
    "disappointment",
    "disapproval",
    "disgust",
    "embarrassment",
    "excitement",
    "fear",
    "gratitude",
    "grief",
    "joy",
    "love",
    "nervousness",
    "optimism",
    "pride",
    "realization",
    "relief",
    "remorse",
    "sadness",
    "surprise",
    "neutral",
];

/// Per-label (pleasure, arousal, dominance) coordinates, aligned with
/// `GO_EMOTIONS`. Values follow the Mehrabian–Russell affect mappings.
pub const PAD_VECTORS: [(f32, f32, f32); 28] = [
    (0.62, 0.35, 0.25),   // admiration
    (0.65, 0.50, 0.35),   // amusement
    (-0.51, 0.59, 0.25),  // anger
    (-0.42, 0.40, 0.12),  // annoyance
    (0.45, 0.15, 0.30),   // approval
    (0.60, 0.20, 0.32),   // caring
    (-0.25, 0.35, -0.30), // confusion
    (0.30, 0.45, 0.10),   // curiosity
    (0.45, 0.50, 0.20),   // desire
    (-0.45, 0.15, -0.25), // disappointment
    (-0.40, 0.25, 0.15),  // disapproval
    (-0.60, 0.35, 0.11),  // disgust
    (-0.45, 0.40, -0.40), // embarrassment
    (0.70, 0.70, 0.40),   // excitement
    (-0.64, 0.60, -0.43), // fear
    (0.65, 0.20, 0.25),   // gratitude
    (-0.70, 0.30, -0.35), // grief
    (0.76, 0.48, 0.35),   // joy
    (0.82, 0.45, 0.30),   // love
    (-0.35, 0.55, -0.35), // nervousness
    (0.55, 0.30, 0.30),   // optimism
    (0.60, 0.35, 0.45),   // pride
    (0.25, 0.30, 0.15),   // realization
    (0.55, -0.10, 0.20),  // relief
    (-0.42, 0.20, -0.30), // remorse
    (-0.63, -0.27, -0.33),// sadness
    (0.20, 0.65, -0.15),  // surprise
    (0.0, 0.0, 0.0),      // neutral
];

/// Project a label distribution into PAD space as the probability-weighted
/// sum of the per-label vectors.
pub fn project_pad(distribution: &[f32]) -> Pad {
    let mut pad = Pad::default();
    for (p, (pl, ar, dom)) in distribution.iter().zip(PAD_VECTORS.iter()) {
        pad.pleasure += p * pl;
        pad.arousal += p * ar;
        pad.dominance += p * dom;
    }
    pad.pleasure = pad.pleasure.clamp(-1.0, 1.0);
    pad.arousal = pad.arousal.clamp(-1.0, 1.0);
    pad.dominance = pad.dominance.clamp(-1.0, 1.0);
    pad
}
