//! Downstream heads: small trained linear models that map the classifier
//! distribution (plus derived affect features) onto the categorical
//! learning signals. The weight matrices are model artifacts loaded from
//! the registry — the code here only evaluates them, so the
//! continuous→categorical cut points live in the artifacts, not in source.

use anyhow::{Result, anyhow};
use ndarray::{Array1, Array2};
use serde::Deserialize;

use sage_core::Pad;

use crate::labels::GO_EMOTIONS;

/// A linear softmax classifier artifact.
#[derive(Debug, Clone, Deserialize)]
pub struct LinearClassifier {
    pub version: String,
    pub classes: Vec<String>,
    pub features: Vec<String>,
    weights: Vec<Vec<f32>>,
    bias: Vec<f32>,
}

impl LinearClassifier {
    pub fn from_json(raw: &str) -> Result<Self> {
        let model: Self = serde_json::from_str(raw)?;
        model.check()?;
        Ok(model)
    }

    fn check(&self) -> Result<()> {
        if self.weights.len() != self.classes.len() || self.bias.len() != self.classes.len() {
            return Err(anyhow!(
                "artifact {}: weight rows do not match class count",
                self.version
            ));
        }
        if self.weights.iter().any(|row| row.len() != self.features.len()) {
            return Err(anyhow!(
                "artifact {}: weight columns do not match feature count",
                self.version
            ));
        }
        Ok(())
    }

    /// Class index with the highest logit, plus the softmax probability of
    /// that class.
    pub fn predict(&self, features: &[f32]) -> Result<(usize, f32)> {
        if features.len() != self.features.len() {
            return Err(anyhow!(
                "artifact {}: got {} features, expected {}",
                self.version,
                features.len(),
                self.features.len()
            ));
        }
        let w = Array2::from_shape_vec(
            (self.classes.len(), self.features.len()),
            self.weights.iter().flatten().copied().collect(),
        )?;
        let b = Array1::from_vec(self.bias.clone());
        let x = Array1::from_vec(features.to_vec());
        let logits = w.dot(&x) + &b;

        let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let exp: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
        let z: f32 = exp.iter().sum();
        let (idx, _) = logits
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .expect("non-empty class set");
        Ok((idx, exp[idx] / z))
    }

    pub fn class_name(&self, idx: usize) -> &str {
        &self.classes[idx]
    }
}

/// A linear regressor artifact with sigmoid link, producing values in [0, 1].
#[derive(Debug, Clone, Deserialize)]
pub struct LinearRegressor {
    pub version: String,
    pub features: Vec<String>,
    weights: Vec<f32>,
    bias: f32,
}

impl LinearRegressor {
    pub fn from_json(raw: &str) -> Result<Self> {
        let model: Self = serde_json::from_str(raw)?;
        if model.weights.len() != model.features.len() {
            return Err(anyhow!(
                "artifact {}: weights do not match feature count",
                model.version
            ));
        }
        Ok(model)
    }

    pub fn predict(&self, features: &[f32]) -> Result<f32> {
        if features.len() != self.features.len() {
            return Err(anyhow!(
                "artifact {}: got {} features, expected {}",
                self.version,
                features.len(),
                self.features.len()
            ));
        }
        let z: f32 = self
            .weights
            .iter()
            .zip(features)
            .map(|(w, x)| w * x)
            .sum::<f32>()
            + self.bias;
        Ok(1.0 / (1.0 + (-z).exp()))
    }
}

// ── Feature extraction ─────────────────────────────────────────

/// Features shared by the readiness and load heads:
/// top-3 emotion probabilities, arousal, valence, |arousal|, |valence|.
pub fn affect_features(distribution: &[f32], pad: Pad) -> Vec<f32> {
    let mut sorted: Vec<f32> = distribution.to_vec();
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    let top = |i: usize| sorted.get(i).copied().unwrap_or(0.0);
    vec![
        top(0),
        top(1),
        top(2),
        pad.arousal,
        pad.pleasure,
        pad.arousal.abs(),
        pad.pleasure.abs(),
    ]
}

/// Flow head features: engagement, challenge and skill proxies.
///
/// Engagement blends arousal with primary-emotion intensity; challenge is
/// the probability mass of effortful emotions; skill is the learner's
/// current ability estimate (0.5 when unknown).
pub fn flow_features(distribution: &[f32], pad: Pad, intensity: f32, skill: f32) -> Vec<f32> {
    const CHALLENGE_LABELS: [&str; 5] =
        ["confusion", "curiosity", "nervousness", "fear", "surprise"];
    let challenge: f32 = GO_EMOTIONS
        .iter()
        .zip(distribution)
        .filter(|(label, _)| CHALLENGE_LABELS.contains(label))
        .map(|(_, p)| *p)
        .sum();
    let engagement = ((pad.arousal + 1.0) / 2.0 + intensity) / 2.0;
    vec![engagement, challenge.min(1.0), skill]
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOY: &str = r#"{
        "version": "toy-v1",
        "classes": ["a", "b"],
        "features": ["x", "y"],
        "weights": [[1.0, 0.0], [0.0, 1.0]],
        "bias": [0.0, 0.0]
    }"#;

    #[test]
    fn classifier_picks_stronger_logit() {
        let model = LinearClassifier::from_json(TOY).unwrap();
        let (idx, p) = model.predict(&[2.0, 0.5]).unwrap();
        assert_eq!(model.class_name(idx), "a");
        assert!(p > 0.5);
        let (idx, _) = model.predict(&[0.1, 3.0]).unwrap();
        assert_eq!(model.class_name(idx), "b");
    }

    #[test]
    fn classifier_rejects_shape_mismatch() {
        let model = LinearClassifier::from_json(TOY).unwrap();
        assert!(model.predict(&[1.0]).is_err());
    }

    #[test]
    fn regressor_is_bounded() {
        let raw = r#"{
            "version": "toy-reg-v1",
            "features": ["x"],
            "weights": [10.0],
            "bias": 0.0
        }"#;
        let model = LinearRegressor::from_json(raw).unwrap();
        let hi = model.predict(&[100.0]).unwrap();
        let lo = model.predict(&[-100.0]).unwrap();
        assert!(hi <= 1.0 && hi > 0.99);
        assert!(lo >= 0.0 && lo < 0.01);
    }

    #[test]
    fn affect_features_shape() {
        let mut dist = vec![0.0f32; 28];
        dist[17] = 0.7;
        dist[0] = 0.3;
        let pad = Pad {
            pleasure: 0.5,
            arousal: -0.25,
            dominance: 0.0,
        };
        let feats = affect_features(&dist, pad);
        assert_eq!(feats.len(), 7);
        assert_eq!(feats[0], 0.7);
        assert_eq!(feats[1], 0.3);
        assert_eq!(feats[5], 0.25);
    }

    #[test]
    fn flow_features_track_challenge_mass() {
        let mut dist = vec![0.0f32; 28];
        dist[6] = 0.6; // confusion
        dist[27] = 0.4;
        let feats = flow_features(&dist, Pad::default(), 0.6, 0.5);
        assert_eq!(feats.len(), 3);
        assert!((feats[1] - 0.6).abs() < 1e-6);
    }
}
