//! # Bootstrap Errors
//!
//! Every failure the lifecycle core surfaces to a caller. Collaborator errors
//! (`anyhow::Error`) are translated into one of these variants at the
//! state-transition boundary, so a memoized failure can be cloned and handed
//! back verbatim on every later attempt.

use crate::unit::states::{PreparationMode, UnitState};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BootstrapError {
    #[error("Configuration error in unit {unit}: {reason}")]
    Configuration { unit: String, reason: String },

    #[error("Preparation of unit {unit} failed in {mode} mode: {reason}")]
    Preparation {
        unit: String,
        mode: PreparationMode,
        reason: String,
    },

    #[error("Activation of unit {unit} failed: {reason}")]
    Activation { unit: String, reason: String },

    #[error("Unit name {name} is already in use by another live unit")]
    DuplicateActivation { name: String },

    #[error("Unit {unit} cannot be prepared in state {state}; create a new unit")]
    CannotPrepare { unit: String, state: UnitState },

    #[error("Unit {unit} cannot be activated in state {state}")]
    CannotActivate { unit: String, state: UnitState },

    #[error("Unit {unit} is a composite member and cannot be used standalone")]
    CompositeMemberStandalone { unit: String },

    #[error("Unit {unit} has been superseded and no longer accepts new handles")]
    Superseded { unit: String },

    #[error("Unit {unit} is already connected; overrides {keys:?} cannot be applied")]
    OverrideRejected { unit: String, keys: Vec<String> },

    #[error("Timed out after {waited_ms}ms waiting for the activation lock of unit {unit}")]
    LockTimeout { unit: String, waited_ms: u64 },

    #[error("Settings error: {0}")]
    Settings(String),
}

/// The error taxonomy callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    Preparation,
    Activation,
    DuplicateActivation,
    /// The operation is not legal in the unit's current lifecycle state.
    InvalidState,
}

impl BootstrapError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration { .. } | Self::Settings(_) => ErrorKind::Configuration,
            Self::Preparation { .. } => ErrorKind::Preparation,
            Self::Activation { .. } | Self::LockTimeout { .. } => ErrorKind::Activation,
            Self::DuplicateActivation { .. } => ErrorKind::DuplicateActivation,
            Self::CannotPrepare { .. }
            | Self::CannotActivate { .. }
            | Self::CompositeMemberStandalone { .. }
            | Self::Superseded { .. }
            | Self::OverrideRejected { .. } => ErrorKind::InvalidState,
        }
    }

    /// Name of the unit the error refers to, when it has one.
    pub fn unit(&self) -> Option<&str> {
        match self {
            Self::Configuration { unit, .. }
            | Self::Preparation { unit, .. }
            | Self::Activation { unit, .. }
            | Self::CannotPrepare { unit, .. }
            | Self::CannotActivate { unit, .. }
            | Self::CompositeMemberStandalone { unit }
            | Self::Superseded { unit }
            | Self::OverrideRejected { unit, .. }
            | Self::LockTimeout { unit, .. } => Some(unit),
            Self::DuplicateActivation { name } => Some(name),
            Self::Settings(_) => None,
        }
    }

    pub(crate) fn configuration(unit: &str, reason: impl Into<String>) -> Self {
        Self::Configuration {
            unit: unit.to_string(),
            reason: reason.into(),
        }
    }

    /// Translate a metadata collaborator failure.
    pub(crate) fn preparation(unit: &str, mode: PreparationMode, cause: &anyhow::Error) -> Self {
        Self::Preparation {
            unit: unit.to_string(),
            mode,
            reason: format!("{cause:#}"),
        }
    }

    /// Translate a connection collaborator failure.
    pub(crate) fn activation(unit: &str, cause: &anyhow::Error) -> Self {
        Self::Activation {
            unit: unit.to_string(),
            reason: format!("{cause:#}"),
        }
    }
}

impl From<::config::ConfigError> for BootstrapError {
    fn from(error: ::config::ConfigError) -> Self {
        BootstrapError::Settings(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BootstrapError>;
