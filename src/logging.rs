//! # Structured Logging Module
//!
//! Environment-aware structured logging for unit lifecycle events. Console
//! output is human-readable by default; `logging.json` switches to one JSON
//! object per event for log shippers.

use crate::config::LoggingConfig;
use crate::constants::system;
use crate::unit::states::UnitState;
use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging. Only the first call has any effect.
pub fn init_structured_logging(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = config
            .level
            .clone()
            .unwrap_or_else(|| get_log_level(&environment));

        // RUST_LOG wins over configured level when set
        let filter = || {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level))
        };

        let console = (!config.json).then(|| {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_filter(filter())
        });
        let json = config.json.then(|| {
            fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_current_span(false)
                .with_filter(filter())
        });

        if tracing_subscriber::registry()
            .with(console)
            .with(json)
            .try_init()
            .is_err()
        {
            // Host application already installed a subscriber
            tracing::debug!(
                "Global tracing subscriber already initialized - continuing with existing subscriber"
            );
        }

        tracing::info!(
            environment = %environment,
            level = %log_level,
            json = config.json,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Current environment name from the first environment variable that is set.
pub fn get_environment() -> String {
    system::ENVIRONMENT_VARIABLES
        .iter()
        .find_map(|var| std::env::var(var).ok())
        .unwrap_or_else(|| system::DEFAULT_ENVIRONMENT.to_string())
}

/// Get log level based on environment
pub fn get_log_level(environment: &str) -> String {
    match environment {
        "test" => "debug".to_string(),
        "development" => "debug".to_string(),
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log structured data for unit lifecycle transitions
pub fn log_unit_operation(
    operation: &str,
    unit: &str,
    state: UnitState,
    ref_count: usize,
    details: Option<&str>,
) {
    tracing::debug!(
        operation = %operation,
        unit = %unit,
        state = %state,
        ref_count = ref_count,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📦 UNIT_OPERATION"
    );
}

/// Log structured data for registry operations
pub fn log_registry_operation(operation: &str, name: &str, status: &str, details: Option<&str>) {
    tracing::debug!(
        operation = %operation,
        name = %name,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📚 REGISTRY_OPERATION"
    );
}
