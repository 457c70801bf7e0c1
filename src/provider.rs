//! # Unit Provider
//!
//! Client-facing entry point. Resolves a descriptor to the shared live unit
//! for its name and hands out RAII [`UnitHandle`]s, each of which accounts
//! for one counted reference and releases it on drop.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let provider = UnitProvider::new(UnitContext::new(processor, backend));
//! let descriptor = UnitDescriptor::new("orders-db");
//!
//! // Owner pass: prepare without holding a handle
//! let transformer = provider.bootstrap(&descriptor)?;
//!
//! let handle = provider.open(&descriptor)?;
//! handle.activate(&Properties::new())?;
//! // ... use the connection ...
//! drop(handle); // last handle closes the connection
//! ```

use crate::error::{BootstrapError, Result};
use crate::registry::UnitRegistry;
use crate::unit::collaborators::Transformer;
use crate::unit::descriptor::{Properties, UnitDescriptor};
use crate::unit::state_machine::{HandleAccounting, UnitContext, UnitStateMachine};
use crate::unit::states::UnitState;
use std::sync::Arc;
use tracing::debug;

/// A stale unit can be observed between lookup and prepare: it was torn down
/// or superseded. Each retry resolves to a fresh registry entry.
const MAX_RESOLVE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct UnitProvider {
    context: UnitContext,
}

impl UnitProvider {
    pub fn new(context: UnitContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &UnitContext {
        &self.context
    }

    pub fn registry(&self) -> &Arc<UnitRegistry> {
        &self.context.registry
    }

    /// The live unit for `descriptor.name`, created in `Initial` if none exists.
    pub fn acquire(&self, descriptor: &UnitDescriptor) -> Arc<UnitStateMachine> {
        self.context.registry.get_or_insert_with(&descriptor.name, || {
            UnitStateMachine::new(descriptor.clone(), self.context.clone())
        })
    }

    /// Owner pass: prepare the unit without taking a handle. Returns the
    /// transformer when this call performed preparation with dynamic weaving.
    pub fn bootstrap(&self, descriptor: &UnitDescriptor) -> Result<Option<Arc<dyn Transformer>>> {
        self.resolve(descriptor, HandleAccounting::Uncounted)
            .map(|(_, transformer)| transformer)
    }

    /// Prepare (or join) the unit and return a counted handle to it.
    pub fn open(&self, descriptor: &UnitDescriptor) -> Result<UnitHandle> {
        let (unit, _) = self.resolve(descriptor, HandleAccounting::Counted)?;
        Ok(UnitHandle::new(unit))
    }

    /// Supersede the registered unit `name` with one rebuilt from its
    /// descriptor plus `overrides`. Existing handles keep the old unit.
    pub fn refresh(&self, name: &str, overrides: &Properties) -> Result<UnitHandle> {
        let current = self
            .context
            .registry
            .lookup(name)
            .ok_or_else(|| BootstrapError::CannotPrepare {
                unit: name.to_string(),
                state: UnitState::Undeployed,
            })?;
        let replacement = current.supersede(overrides)?;
        Ok(UnitHandle::new(replacement))
    }

    fn resolve(
        &self,
        descriptor: &UnitDescriptor,
        accounting: HandleAccounting,
    ) -> Result<(Arc<UnitStateMachine>, Option<Arc<dyn Transformer>>)> {
        let mut attempt = 1;
        loop {
            let unit = self.acquire(descriptor);
            match unit.prepare(accounting) {
                Ok(transformer) => return Ok((unit, transformer)),
                Err(stale) if is_stale(&stale) && attempt < MAX_RESOLVE_ATTEMPTS => {
                    debug!(
                        unit = %descriptor.name,
                        attempt,
                        error = %stale,
                        "Resolved a stale unit; retrying"
                    );
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn is_stale(error: &BootstrapError) -> bool {
    matches!(
        error,
        BootstrapError::Superseded { .. }
            | BootstrapError::CannotPrepare {
                state: UnitState::Undeployed,
                ..
            }
    )
}

/// One counted reference to a prepared unit. Dropping the handle releases it.
#[must_use = "dropping the handle releases the unit immediately"]
#[derive(Debug)]
pub struct UnitHandle {
    unit: Arc<UnitStateMachine>,
    released: bool,
}

impl UnitHandle {
    fn new(unit: Arc<UnitStateMachine>) -> Self {
        Self {
            unit,
            released: false,
        }
    }

    pub fn unit(&self) -> &Arc<UnitStateMachine> {
        &self.unit
    }

    pub fn name(&self) -> &str {
        self.unit.name()
    }

    pub fn activate(&self, overrides: &Properties) -> Result<()> {
        self.unit.activate(overrides)
    }

    /// Release now instead of at drop.
    pub fn close(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.unit.release();
        }
    }
}

impl Drop for UnitHandle {
    fn drop(&mut self) {
        self.release_once();
    }
}
