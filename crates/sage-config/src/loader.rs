use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::schema::SageConfig;

/// Loads the Sage configuration from disk with env-var overrides.
pub struct ConfigLoader {
    config: Arc<RwLock<SageConfig>>,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > SAGE_CONFIG env > ~/.sage/sage.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("SAGE_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".sage")
            .join("sage.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> sage_core::Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            let raw = std::fs::read_to_string(&config_path)?;
            toml::from_str::<SageConfig>(&raw).map_err(|e| {
                sage_core::SageError::Config(format!(
                    "failed to parse {}: {}",
                    config_path.display(),
                    e
                ))
            })?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            SageConfig::default()
        };

        let config = Self::apply_env_overrides(config);

        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
            }
            Err(e) => {
                return Err(sage_core::SageError::Config(e));
            }
        }

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    /// Get a read snapshot of the current config.
    pub fn get(&self) -> SageConfig {
        self.config.read().clone()
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Apply env var overrides (SAGE_SERVER_LISTEN, SAGE_LOG_LEVEL, etc.)
    fn apply_env_overrides(mut config: SageConfig) -> SageConfig {
        if let Ok(v) = std::env::var("SAGE_SERVER_LISTEN") {
            config.server.listen = v;
        }
        if let Ok(v) = std::env::var("SAGE_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Ok(v) = std::env::var("SAGE_DB_PATH") {
            config.store.db_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("SAGE_BUDGET_DAILY_USD")
            && let Ok(limit) = v.parse::<f64>()
        {
            config.budget.daily_usd = limit;
        }
        if let Ok(v) = std::env::var("SAGE_BUDGET_MONTHLY_USD")
            && let Ok(limit) = v.parse::<f64>()
        {
            config.budget.monthly_usd = limit;
        }
        if let Ok(v) = std::env::var("SAGE_BENCHMARK_FEED_URL") {
            config.benchmarks.feed_url = Some(v);
        }
        config
    }
}
