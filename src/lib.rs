#![allow(clippy::doc_markdown)] // Allow technical terms in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Unit Bootstrap
//!
//! Thread-safe lifecycle core for shared activation units.
//!
//! ## Overview
//!
//! An activation unit is a named bundle of configuration that is expensive to
//! bring up and is shared by many clients. Bringing one up takes two phases:
//! **prepare** resolves metadata (and may yield a transformer the client must
//! apply), **activate** opens the backend connection. The core guarantees
//! that for any number of concurrent callers each phase runs at most once per
//! unit, that a failure is remembered and replayed rather than retried, and
//! that the connection is closed exactly once when the last handle goes away.
//!
//! ## Architecture
//!
//! ```text
//! UnitProvider ──▶ UnitRegistry (name → live unit)
//!      │
//!      ▼
//! UnitStateMachine ──prepare──▶ MetadataProcessor
//!      │   └── CompositeCoordinator (barrier_initial → middle → final)
//!      └───────activate──▶ ActivationBackend
//! ```
//!
//! ## Module Organization
//!
//! - [`unit`] - State machine, composite barrier, activation lock, failure memo
//! - [`registry`] - Name-keyed registry of live units
//! - [`provider`] - Client entry point with RAII handles
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use unit_bootstrap::{
//!     ActivationBackend, ConnectionHandle, MetadataProcessor, PreparedData, Properties,
//!     StageRequest, UnitContext, UnitDescriptor, UnitProvider, UnitState,
//! };
//!
//! struct Mapper;
//! impl MetadataProcessor for Mapper {
//!     fn prepare_stage(&self, _request: StageRequest<'_>) -> anyhow::Result<PreparedData> {
//!         Ok(PreparedData::default())
//!     }
//! }
//!
//! struct Pool;
//! impl ActivationBackend for Pool {
//!     fn connect(
//!         &self,
//!         unit: &str,
//!         _prepared: &PreparedData,
//!         _properties: &Properties,
//!     ) -> anyhow::Result<ConnectionHandle> {
//!         Ok(ConnectionHandle::new(unit))
//!     }
//!
//!     fn disconnect(&self, _handle: ConnectionHandle) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = UnitProvider::new(UnitContext::new(Arc::new(Mapper), Arc::new(Pool)));
//! let handle = provider.open(&UnitDescriptor::new("orders-db"))?;
//! handle.activate(&Properties::new())?;
//! assert_eq!(handle.unit().state(), UnitState::Active);
//!
//! let unit = Arc::clone(handle.unit());
//! drop(handle);
//! assert_eq!(unit.state(), UnitState::Undeployed);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod provider;
pub mod registry;
pub mod unit;

pub use config::{BootstrapConfig, ConfigLoader};
pub use error::{BootstrapError, ErrorKind, Result};
pub use provider::{UnitHandle, UnitProvider};
pub use registry::{RegistryStats, UnitRegistry};
pub use unit::{
    ActivationBackend, BarrierStage, CompositeTransformer, ConnectionHandle, HandleAccounting,
    MetadataProcessor, PreparationMode, PreparedData, Properties, StageRequest, Transformer,
    UnitContext, UnitDescriptor, UnitSnapshot, UnitState, UnitStateMachine, WeavingMode,
};
