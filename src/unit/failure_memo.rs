//! Write-once storage for a unit's terminal failure.

use crate::error::BootstrapError;
use std::sync::OnceLock;
use tracing::debug;

/// Holds at most one failure per unit. The first recorded failure wins and is
/// handed back unchanged on every later attempt.
#[derive(Debug, Default)]
pub struct FailureMemo {
    failure: OnceLock<BootstrapError>,
}

impl FailureMemo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `failure` unless one is already cached, returning whichever is cached.
    pub fn record(&self, failure: BootstrapError) -> &BootstrapError {
        let cached = self.failure.get_or_init(|| failure.clone());
        if *cached != failure {
            debug!(
                cached = %cached,
                rejected = %failure,
                "Failure already memoized; keeping the first one"
            );
        }
        cached
    }

    pub fn get(&self) -> Option<&BootstrapError> {
        self.failure.get()
    }

    pub fn is_set(&self) -> bool {
        self.failure.get().is_some()
    }
}
