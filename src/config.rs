//! Engine configuration, read from TOML.
//!
//! ```toml
//! [continuations]
//! expiration_secs = 1200
//! sweep_interval_secs = 60
//! max_entries = 10000
//! background_sweep = false
//!
//! [procedures]
//! require_cloneable = ["Wizard"]
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use reprise_passes::PrepareOptions;
use reprise_runtime::{DEFAULT_EXPIRATION, DEFAULT_SWEEP_INTERVAL, Engine, ManagerConfig};
use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub continuations: ContinuationSettings,
    pub procedures: ProcedureSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContinuationSettings {
    pub expiration_secs: u64,
    pub sweep_interval_secs: u64,
    pub max_entries: Option<usize>,
    pub background_sweep: bool,
}

impl Default for ContinuationSettings {
    fn default() -> Self {
        Self {
            expiration_secs: DEFAULT_EXPIRATION.as_secs(),
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL.as_secs(),
            max_entries: None,
            background_sweep: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcedureSettings {
    /// Classes that fail to load unless they support cloning.
    pub require_cloneable: Vec<String>,
}

impl EngineConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(Error::file(path))?;
        Self::from_toml(&text)
    }

    pub fn manager_config(&self) -> ManagerConfig {
        let settings = &self.continuations;
        let config = ManagerConfig::default()
            .with_expiration(Duration::from_secs(settings.expiration_secs))
            .with_sweep_interval(Duration::from_secs(settings.sweep_interval_secs));
        match settings.max_entries {
            Some(limit) => config.with_max_entries(limit),
            None => config,
        }
    }

    pub fn prepare_options(&self) -> PrepareOptions {
        PrepareOptions::require_cloneable(self.procedures.require_cloneable.iter().cloned())
    }

    /// Build an engine, starting the background sweeper when enabled.
    pub fn build_engine(&self) -> Result<Engine> {
        let mut engine = Engine::with_options(self.manager_config(), self.prepare_options());
        if self.continuations.background_sweep {
            engine.start_sweeper()?;
        }
        Ok(engine)
    }
}
