//! # Unit States
//!
//! Lifecycle states of a unit, the preparation mode a processor is invoked
//! in, and the three barrier stages a composite walks its members through.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle states of an activation unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    /// Created, nothing prepared yet
    Initial,
    /// Composite member part-way through the barrier stages
    BarrierMember,
    /// Metadata prepared, no connection attempted
    Prepared,
    /// First activation in progress, connection not yet settled
    HalfActive,
    /// Connected (or validated) and serving handles
    Active,
    /// Preparation failed; the unit must be recreated
    PrepareFailed,
    /// Connection failed; the cached failure is rethrown until teardown
    ActivateFailed,
    /// Torn down after the last handle was released
    Undeployed,
}

impl UnitState {
    /// States a unit never leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::PrepareFailed | Self::Undeployed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::PrepareFailed | Self::ActivateFailed)
    }

    /// States in which client handles may be held.
    pub fn holds_handles(&self) -> bool {
        matches!(
            self,
            Self::Prepared | Self::HalfActive | Self::Active | Self::ActivateFailed
        )
    }

    /// States a new client handle can join without running preparation.
    pub fn is_joinable(&self) -> bool {
        matches!(self, Self::Prepared | Self::HalfActive | Self::Active)
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initial => write!(f, "initial"),
            Self::BarrierMember => write!(f, "barrier_member"),
            Self::Prepared => write!(f, "prepared"),
            Self::HalfActive => write!(f, "half_active"),
            Self::Active => write!(f, "active"),
            Self::PrepareFailed => write!(f, "prepare_failed"),
            Self::ActivateFailed => write!(f, "activate_failed"),
            Self::Undeployed => write!(f, "undeployed"),
        }
    }
}

impl std::str::FromStr for UnitState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initial" => Ok(Self::Initial),
            "barrier_member" => Ok(Self::BarrierMember),
            "prepared" => Ok(Self::Prepared),
            "half_active" => Ok(Self::HalfActive),
            "active" => Ok(Self::Active),
            "prepare_failed" => Ok(Self::PrepareFailed),
            "activate_failed" => Ok(Self::ActivateFailed),
            "undeployed" => Ok(Self::Undeployed),
            _ => Err(format!("Invalid unit state: {s}")),
        }
    }
}

impl Default for UnitState {
    fn default() -> Self {
        Self::Initial
    }
}

/// Synchronized checkpoints of composite preparation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarrierStage {
    Initial,
    Middle,
    Final,
}

impl BarrierStage {
    pub const ALL: [BarrierStage; 3] = [Self::Initial, Self::Middle, Self::Final];

    /// The stage following this one; `None` after `Final`.
    pub fn next(&self) -> Option<BarrierStage> {
        match self {
            Self::Initial => Some(Self::Middle),
            Self::Middle => Some(Self::Final),
            Self::Final => None,
        }
    }
}

impl fmt::Display for BarrierStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initial => write!(f, "barrier_initial"),
            Self::Middle => write!(f, "barrier_middle"),
            Self::Final => write!(f, "barrier_final"),
        }
    }
}

/// How the metadata processor is asked to run for one call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreparationMode {
    /// Whole preparation in a single pass (standalone unit)
    Standalone,
    /// One barrier stage of a composite member
    Barrier(BarrierStage),
}

impl fmt::Display for PreparationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standalone => write!(f, "standalone"),
            Self::Barrier(stage) => write!(f, "{stage}"),
        }
    }
}
