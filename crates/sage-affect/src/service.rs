//! Emotion inference service: classifier pass, PAD projection, downstream
//! heads and the intervention decision, under a hard time budget with a
//! neutral degraded fallback. Emotion failure never fails the enclosing
//! request.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::de::DeserializeOwned;
use tokio::sync::Semaphore;
use tracing::warn;

use sage_core::{
    CognitiveLoad, EmotionResult, FlowState, Intervention, LearningReadiness,
};

use crate::classifier::EmotionClassifier;
use crate::heads::{LinearClassifier, affect_features, flow_features};
use crate::labels::{GO_EMOTIONS, project_pad};
use crate::registry::ModelRegistry;

/// Parse a head's class name into its typed enum via the wire spelling.
fn parse_class<T: DeserializeOwned>(name: &str) -> Result<T> {
    Ok(serde_json::from_value(serde_json::Value::String(
        name.to_string(),
    ))?)
}

/// Intervention severity on the ordinal readiness/load scales. Monotonic:
/// worse readiness or heavier load never lowers the strength.
fn intervention_for(readiness: LearningReadiness, load: CognitiveLoad) -> Intervention {
    let readiness_severity: f32 = match readiness {
        LearningReadiness::NotReady => 1.0,
        LearningReadiness::Low => 0.5,
        _ => 0.0,
    };
    let load_severity: f32 = match load {
        CognitiveLoad::Overload => 1.0,
        CognitiveLoad::High => 0.5,
        _ => 0.0,
    };
    let strength = readiness_severity.max(load_severity);
    if strength == 0.0 {
        return Intervention::default();
    }
    let kind = if load_severity >= readiness_severity {
        "reduce_load"
    } else {
        "encourage"
    };
    Intervention {
        recommended: true,
        kind: Some(kind.to_string()),
        strength,
    }
}

/// The emotion inference engine (classifier + heads).
pub struct EmotionEngine {
    classifier: Arc<dyn EmotionClassifier>,
    readiness_head: LinearClassifier,
    load_head: LinearClassifier,
    flow_head: LinearClassifier,
    /// Bounds concurrent CPU-heavy classifier passes.
    workers: Arc<Semaphore>,
    timeout: Duration,
}

impl EmotionEngine {
    pub fn new(
        classifier: Arc<dyn EmotionClassifier>,
        registry: &ModelRegistry,
        worker_threads: usize,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            classifier,
            readiness_head: registry.classifier("readiness")?,
            load_head: registry.classifier("cognitive_load")?,
            flow_head: registry.classifier("flow")?,
            workers: Arc::new(Semaphore::new(worker_threads.max(1))),
            timeout,
        })
    }

    /// Run one inference pass over already-normalized text. `skill` is the
    /// learner's current ability estimate, feeding the flow head.
    ///
    /// Infallible by contract: classifier errors, head errors and timeouts
    /// all produce the neutral degraded result.
    pub async fn infer(&self, normalized: String, skill: f32) -> EmotionResult {
        let permit = match Arc::clone(&self.workers).acquire_owned().await {
            Ok(p) => p,
            Err(_) => return EmotionResult::degraded_neutral(),
        };

        let classifier = Arc::clone(&self.classifier);
        let task = tokio::task::spawn_blocking(move || {
            let result = classifier.classify(&normalized);
            drop(permit);
            result
        });

        let distribution = match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(Ok(dist))) => dist,
            Ok(Ok(Err(e))) => {
                warn!(error = %e, "emotion classifier failed, degrading to neutral");
                return EmotionResult::degraded_neutral();
            }
            Ok(Err(e)) => {
                warn!(error = %e, "emotion inference task panicked, degrading to neutral");
                return EmotionResult::degraded_neutral();
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "emotion inference timed out");
                return EmotionResult::degraded_neutral();
            }
        };

        match self.assemble(&distribution, skill) {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "emotion head evaluation failed, degrading to neutral");
                EmotionResult::degraded_neutral()
            }
        }
    }

    /// Build the full result from a classifier distribution.
    fn assemble(&self, distribution: &[f32], skill: f32) -> Result<EmotionResult> {
        let pad = project_pad(distribution);

        let (primary_idx, intensity) = distribution
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, p)| (i, *p))
            .unwrap_or((GO_EMOTIONS.len() - 1, 0.0));

        let affect = affect_features(distribution, pad);
        let (r_idx, _) = self.readiness_head.predict(&affect)?;
        let learning_readiness: LearningReadiness =
            parse_class(self.readiness_head.class_name(r_idx))?;
        let (l_idx, _) = self.load_head.predict(&affect)?;
        let cognitive_load: CognitiveLoad = parse_class(self.load_head.class_name(l_idx))?;

        let flow = flow_features(distribution, pad, intensity, skill);
        let (f_idx, _) = self.flow_head.predict(&flow)?;
        let flow_state: FlowState = parse_class(self.flow_head.class_name(f_idx))?;

        let dist_map = GO_EMOTIONS
            .iter()
            .zip(distribution)
            .map(|(label, p)| (label.to_string(), *p))
            .collect();

        Ok(EmotionResult {
            primary_emotion: GO_EMOTIONS[primary_idx].to_string(),
            distribution: dist_map,
            intensity,
            pad,
            learning_readiness,
            cognitive_load,
            flow_state,
            intervention: intervention_for(learning_readiness, cognitive_load),
            degraded: false,
        })
    }
}
