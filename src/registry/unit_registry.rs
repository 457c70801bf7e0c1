//! # Unit Registry
//!
//! Process-wide map from unit name to the live unit that owns it.
//!
//! ## Key Features
//!
//! - **Sharded concurrent map** (`DashMap`) so lookups for different names
//!   do not contend
//! - **Identity-checked removal**: a unit only ever removes its own entry,
//!   never a replacement registered under the same name
//! - **Atomic swap** for superseding a unit in place
//!
//! The registry never takes a unit's state lock. It only reads the unit's
//! lock-free liveness flags, so units may call into the registry while
//! holding their own state lock.

use crate::error::{BootstrapError, Result};
use crate::logging::log_registry_operation;
use crate::unit::state_machine::UnitStateMachine;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct UnitRegistry {
    units: DashMap<String, Arc<UnitStateMachine>>,
}

impl UnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `name` for `unit`. Re-registering the same unit is a no-op; a
    /// retired occupant is replaced; a different live occupant is a conflict.
    pub fn register(&self, name: &str, unit: &Arc<UnitStateMachine>) -> Result<()> {
        match self.units.entry(name.to_string()) {
            Entry::Occupied(mut occupied) => {
                let existing = occupied.get();
                if Arc::ptr_eq(existing, unit) {
                    return Ok(());
                }
                if existing.is_live() {
                    log_registry_operation("register", name, "conflict", None);
                    return Err(BootstrapError::DuplicateActivation {
                        name: name.to_string(),
                    });
                }
                occupied.insert(Arc::clone(unit));
                log_registry_operation("register", name, "replaced_retired", None);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::clone(unit));
                log_registry_operation("register", name, "registered", None);
            }
        }
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<UnitStateMachine>> {
        self.units.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.units.contains_key(name)
    }

    /// Remove `name` only if it still maps to `unit`.
    pub fn remove(&self, name: &str, unit: &UnitStateMachine) -> bool {
        let removed = self
            .units
            .remove_if(name, |_, existing| std::ptr::eq(Arc::as_ptr(existing), unit))
            .is_some();
        if removed {
            log_registry_operation("remove", name, "removed", None);
        }
        removed
    }

    /// Swap `expected` for `replacement` under `name`. Fails if the entry no
    /// longer maps to `expected`. On success `expected` stops accepting new
    /// handles before the entry lock is released.
    pub fn replace(
        &self,
        name: &str,
        expected: &UnitStateMachine,
        replacement: &Arc<UnitStateMachine>,
    ) -> Result<()> {
        match self.units.entry(name.to_string()) {
            Entry::Occupied(mut occupied)
                if std::ptr::eq(Arc::as_ptr(occupied.get()), expected) =>
            {
                occupied.insert(Arc::clone(replacement));
                expected.stop_accepting_new_handles();
                log_registry_operation("replace", name, "superseded", None);
                Ok(())
            }
            _ => {
                log_registry_operation("replace", name, "conflict", Some("entry changed"));
                Err(BootstrapError::DuplicateActivation {
                    name: name.to_string(),
                })
            }
        }
    }

    /// Return the live unit registered under `name`, or install the one
    /// produced by `create`. Units that are retired or superseded are
    /// skipped.
    pub fn get_or_insert_with(
        &self,
        name: &str,
        create: impl FnOnce() -> Arc<UnitStateMachine>,
    ) -> Arc<UnitStateMachine> {
        match self.units.entry(name.to_string()) {
            Entry::Occupied(mut occupied) => {
                let existing = occupied.get();
                if existing.is_live() && existing.accepts_new_handles() {
                    return Arc::clone(existing);
                }
                let created = create();
                occupied.insert(Arc::clone(&created));
                log_registry_operation("get_or_insert", name, "replaced_stale", None);
                created
            }
            Entry::Vacant(vacant) => {
                let created = create();
                vacant.insert(Arc::clone(&created));
                log_registry_operation("get_or_insert", name, "created", None);
                created
            }
        }
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.units.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn stats(&self) -> RegistryStats {
        // Collect first: unit state locks must not be taken under shard locks.
        let units: Vec<Arc<UnitStateMachine>> =
            self.units.iter().map(|e| Arc::clone(e.value())).collect();

        let mut stats = RegistryStats {
            total_units: units.len(),
            ..Default::default()
        };
        for unit in &units {
            let snapshot = unit.snapshot();
            if snapshot.connected {
                stats.connected_units += 1;
            }
            if !snapshot.accepting_new_handles {
                stats.draining_units += 1;
            }
            stats.open_handles += snapshot.ref_count;
            if unit.is_composite() {
                stats.composite_units += 1;
            }
        }
        stats
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total_units: usize,
    pub connected_units: usize,
    pub composite_units: usize,
    pub draining_units: usize,
    pub open_handles: usize,
}
