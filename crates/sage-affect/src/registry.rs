//! Model artifact registry.
//!
//! Downstream head artifacts are JSON weight files, looked up by name in
//! the configured registry directory and falling back to the versioned
//! defaults embedded at build time.

use std::path::PathBuf;

use anyhow::{Result, anyhow};
use tracing::{debug, info};

use crate::heads::{LinearClassifier, LinearRegressor};

const READINESS_DEFAULT: &str = include_str!("../assets/readiness.json");
const COGNITIVE_LOAD_DEFAULT: &str = include_str!("../assets/cognitive_load.json");
const FLOW_DEFAULT: &str = include_str!("../assets/flow.json");
const COMPLEXITY_DEFAULT: &str = include_str!("../assets/complexity.json");

/// Loads head artifacts from a directory, falling back to embedded
/// defaults when the directory (or a specific artifact) is absent.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    dir: Option<PathBuf>,
}

impl ModelRegistry {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    fn read(&self, name: &str) -> Option<String> {
        let dir = self.dir.as_ref()?;
        let path = dir.join(format!("{name}.json"));
        match std::fs::read_to_string(&path) {
            Ok(raw) => {
                info!(?path, "loaded model artifact from registry");
                Some(raw)
            }
            Err(_) => {
                debug!(?path, "artifact not in registry, using embedded default");
                None
            }
        }
    }

    fn embedded(name: &str) -> Result<&'static str> {
        match name {
            "readiness" => Ok(READINESS_DEFAULT),
            "cognitive_load" => Ok(COGNITIVE_LOAD_DEFAULT),
            "flow" => Ok(FLOW_DEFAULT),
            "complexity" => Ok(COMPLEXITY_DEFAULT),
            other => Err(anyhow!("no embedded default for artifact '{other}'")),
        }
    }

    pub fn classifier(&self, name: &str) -> Result<LinearClassifier> {
        match self.read(name) {
            Some(raw) => LinearClassifier::from_json(&raw),
            None => LinearClassifier::from_json(Self::embedded(name)?),
        }
    }

    pub fn regressor(&self, name: &str) -> Result<LinearRegressor> {
        match self.read(name) {
            Some(raw) => LinearRegressor::from_json(&raw),
            None => LinearRegressor::from_json(Self::embedded(name)?),
        }
    }
}
