//! # Activation Units
//!
//! Lifecycle of a single activation unit: a named bundle of configuration
//! that must be prepared (metadata resolved) and then activated (backend
//! connection opened) before clients can use it.
//!
//! ## Components
//!
//! - **UnitStateMachine**: states, handle counting, two-phase prepare/activate
//! - **CompositeCoordinator**: three-stage barrier preparation of members
//! - **ActivationLock**: serializes the connection phase of one unit
//! - **FailureMemo**: first terminal failure, replayed to later callers
//!
//! ## Usage
//!
//! ```rust,ignore
//! let unit = UnitStateMachine::new(UnitDescriptor::new("orders-db"), context);
//!
//! unit.prepare(HandleAccounting::Counted)?;
//! unit.activate(&Properties::new())?;
//! assert_eq!(unit.state(), UnitState::Active);
//!
//! unit.release(); // last handle: disconnect and undeploy
//! ```

pub mod activation_lock;
pub mod collaborators;
pub mod composite;
pub mod descriptor;
pub mod failure_memo;
pub mod state_machine;
pub mod states;

pub use activation_lock::{ActivationGuard, ActivationLock};
pub use collaborators::{
    ActivationBackend, CompositeTransformer, ConnectionHandle, MetadataProcessor, PreparedData,
    StageRequest, Transformer,
};
pub use composite::CompositeCoordinator;
pub use descriptor::{merge_properties, Properties, UnitDescriptor, WeavingMode};
pub use failure_memo::FailureMemo;
pub use state_machine::{HandleAccounting, UnitContext, UnitSnapshot, UnitStateMachine};
pub use states::{BarrierStage, PreparationMode, UnitState};
