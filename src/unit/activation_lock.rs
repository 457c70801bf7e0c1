//! # Activation Lock
//!
//! Serializes the connection phase of one unit. It is separate from the
//! unit's state-mutation lock, so refcount bookkeeping never waits on a slow
//! or hung connection attempt; only other activators do.
//!
//! Acquisition is scoped. The returned [`ActivationGuard`] releases the lock
//! when dropped, including during unwinding out of a collaborator call.

use parking_lot::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::trace;

#[derive(Debug)]
pub struct ActivationLock {
    unit: String,
    gate: Mutex<()>,
}

impl ActivationLock {
    pub fn new(unit: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            gate: Mutex::new(()),
        }
    }

    /// Block until the lock is free.
    pub fn acquire(&self) -> ActivationGuard<'_> {
        let started = Instant::now();
        let guard = self.gate.lock();
        self.guard(guard, started)
    }

    /// Wait at most `timeout`; `None` if another activator still holds the lock.
    pub fn try_acquire_for(&self, timeout: Duration) -> Option<ActivationGuard<'_>> {
        let started = Instant::now();
        self.gate
            .try_lock_for(timeout)
            .map(|guard| self.guard(guard, started))
    }

    pub fn is_held(&self) -> bool {
        self.gate.is_locked()
    }

    fn guard<'a>(&'a self, guard: MutexGuard<'a, ()>, started: Instant) -> ActivationGuard<'a> {
        trace!(
            unit = %self.unit,
            waited_us = started.elapsed().as_micros() as u64,
            "Activation lock acquired"
        );
        ActivationGuard {
            unit: &self.unit,
            acquired_at: Instant::now(),
            _guard: guard,
        }
    }
}

/// Proof that the holder owns the connection phase of a unit.
#[must_use = "the activation lock is released as soon as the guard is dropped"]
pub struct ActivationGuard<'a> {
    unit: &'a str,
    acquired_at: Instant,
    _guard: MutexGuard<'a, ()>,
}

impl ActivationGuard<'_> {
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

impl Drop for ActivationGuard<'_> {
    fn drop(&mut self) {
        trace!(
            unit = %self.unit,
            held_us = self.acquired_at.elapsed().as_micros() as u64,
            "Activation lock released"
        );
    }
}
