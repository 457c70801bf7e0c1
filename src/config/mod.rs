//! # Bootstrap Configuration
//!
//! Tunables for the lifecycle core. Every field has a default, so an empty
//! source yields a working configuration.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use unit_bootstrap::config::ConfigLoader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // File values, then UNIT_BOOTSTRAP_* environment overrides
//! let config = ConfigLoader::load(Some("config/bootstrap.toml".as_ref()))?;
//!
//! if config.composite.parallel_barrier {
//!     println!("barrier stages fan out across threads");
//! }
//! # Ok(())
//! # }
//! ```

pub mod loader;

use crate::error::{BootstrapError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

pub use loader::ConfigLoader;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub composite: CompositeConfig,
    pub activation: ActivationConfig,
    pub logging: LoggingConfig,
}

impl BootstrapConfig {
    pub fn validate(&self) -> Result<()> {
        if self.activation.lock_timeout_ms == Some(0) {
            return Err(BootstrapError::Settings(
                "activation.lock_timeout_ms must be greater than zero when set".to_string(),
            ));
        }
        if let Some(level) = &self.logging.level {
            if level.trim().is_empty() {
                return Err(BootstrapError::Settings(
                    "logging.level must not be empty when set".to_string(),
                ));
            }
            EnvFilter::try_new(level).map_err(|e| {
                BootstrapError::Settings(format!(
                    "logging.level '{level}' is not a valid filter: {e}"
                ))
            })?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositeConfig {
    /// Run each barrier stage across scoped threads instead of in declaration order.
    pub parallel_barrier: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivationConfig {
    /// Upper bound on waiting for another thread's activation; unbounded when unset.
    pub lock_timeout_ms: Option<u64>,
}

impl ActivationConfig {
    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; derived from the environment name when unset.
    pub level: Option<String>,
    pub json: bool,
}
