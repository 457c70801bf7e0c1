//! Configuration Loader
//!
//! Layers an optional file under `UNIT_BOOTSTRAP_*` environment overrides.
//! Nested keys use a double underscore, e.g.
//! `UNIT_BOOTSTRAP_COMPOSITE__PARALLEL_BARRIER=true`.

use super::BootstrapConfig;
use crate::constants::ENV_PREFIX;
use crate::error::Result;
use ::config::{Config, Environment, File};
use std::path::Path;
use tracing::debug;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load from `path` (if given) and the process environment, then validate.
    pub fn load(path: Option<&Path>) -> Result<BootstrapConfig> {
        Self::from_sources(path, Self::environment())
    }

    /// Load with an explicit environment source. Tests use this to avoid
    /// mutating process-wide variables.
    pub fn from_sources(path: Option<&Path>, environment: Environment) -> Result<BootstrapConfig> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            debug!(path = %path.display(), "Loading bootstrap configuration file");
            builder = builder.add_source(File::from(path).required(true));
        }

        let config: BootstrapConfig = builder
            .add_source(environment)
            .build()?
            .try_deserialize()?;
        config.validate()?;

        debug!(
            parallel_barrier = config.composite.parallel_barrier,
            lock_timeout_ms = ?config.activation.lock_timeout_ms,
            json_logging = config.logging.json,
            "Bootstrap configuration loaded"
        );
        Ok(config)
    }

    pub fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }
}
