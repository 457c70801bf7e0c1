//! # Unit State Machine
//!
//! Owns one activation unit's lifecycle: state, handle count, barrier
//! sub-state, cached failure and connection, and drives the metadata and
//! connection collaborators.
//!
//! ## Locking
//!
//! Three locks, never held across each other in the wrong order:
//!
//! - `inner` guards state and refcount. Held briefly and never across a
//!   collaborator call.
//! - `preparation_gate` serializes the single preparation pass, so concurrent
//!   first callers wait and then join the settled result.
//! - `activation_lock` serializes the connection phase only.
//!
//! The registry may be entered while `inner` is held (release, failure), but
//! the registry never takes a unit's `inner` lock; it reads atomics only.
//!
//! ```text
//!   Initial ──prepare──▶ Prepared ──activate──▶ HalfActive ──connect ok──▶ Active
//!      │                    │                       │                        │
//!      ▼                    │                       ▼                        │
//!  PrepareFailed            └───────release(0)──▶ Undeployed ◀──release(0)───┘
//!                                                   ▲
//!                                 ActivateFailed ───┘
//! ```

use crate::config::BootstrapConfig;
use crate::constants;
use crate::error::{BootstrapError, Result};
use crate::logging::log_unit_operation;
use crate::registry::UnitRegistry;
use crate::unit::activation_lock::{ActivationGuard, ActivationLock};
use crate::unit::collaborators::{
    guarded, ActivationBackend, ConnectionHandle, MetadataProcessor, PreparedData, StageRequest,
    Transformer,
};
use crate::unit::composite::CompositeCoordinator;
use crate::unit::descriptor::{merge_properties, Properties, UnitDescriptor, WeavingMode};
use crate::unit::failure_memo::FailureMemo;
use crate::unit::states::{BarrierStage, PreparationMode, UnitState};
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tracing::{debug, info, warn};

/// Whether a `prepare()` call creates a client handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleAccounting {
    /// The caller holds a handle and must `release()` it.
    Counted,
    /// Owner/bootstrap pass that prepares the unit without holding a handle;
    /// pairs with `release_with(Uncounted)`.
    Uncounted,
}

impl HandleAccounting {
    pub fn is_counted(&self) -> bool {
        matches!(self, Self::Counted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Registration {
    Register,
    /// Replacement units are swapped into the registry by `supersede`.
    Deferred,
}

/// Collaborators and shared services injected into every unit.
#[derive(Clone)]
pub struct UnitContext {
    pub processor: Arc<dyn MetadataProcessor>,
    pub backend: Arc<dyn ActivationBackend>,
    pub registry: Arc<UnitRegistry>,
    pub config: Arc<BootstrapConfig>,
}

impl UnitContext {
    pub fn new(processor: Arc<dyn MetadataProcessor>, backend: Arc<dyn ActivationBackend>) -> Self {
        Self {
            processor,
            backend,
            registry: Arc::new(UnitRegistry::new()),
            config: Arc::new(BootstrapConfig::default()),
        }
    }

    #[must_use]
    pub fn with_registry(mut self, registry: Arc<UnitRegistry>) -> Self {
        self.registry = registry;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: Arc<BootstrapConfig>) -> Self {
        self.config = config;
        self
    }
}

impl fmt::Debug for UnitContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitContext")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

struct UnitInner {
    state: UnitState,
    ref_count: usize,
    /// Next barrier stage to run; only set while `BarrierMember`.
    phase: Option<BarrierStage>,
    properties: Properties,
    weaving: WeavingMode,
    staged: PreparedData,
    prepared: Option<Arc<PreparedData>>,
    connection: Option<ConnectionHandle>,
    runtime_overrides: Properties,
}

/// Point-in-time view of a unit, for logging and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitSnapshot {
    pub name: String,
    pub state: UnitState,
    pub ref_count: usize,
    pub phase: Option<BarrierStage>,
    pub connected: bool,
    pub accepting_new_handles: bool,
    pub failure: Option<String>,
    pub members: Vec<String>,
}

pub struct UnitStateMachine {
    name: String,
    descriptor: UnitDescriptor,
    inner: Mutex<UnitInner>,
    preparation_gate: Mutex<()>,
    activation_lock: ActivationLock,
    memo: FailureMemo,
    retired: AtomicBool,
    accepting_new_handles: AtomicBool,
    composite: OnceLock<CompositeCoordinator>,
    parent: Option<Weak<UnitStateMachine>>,
    context: UnitContext,
}

impl UnitStateMachine {
    /// Create a standalone (or composite) unit in `Initial`.
    pub fn new(descriptor: UnitDescriptor, context: UnitContext) -> Arc<Self> {
        Arc::new(Self::build(descriptor, context, None, WeavingMode::Dynamic))
    }

    /// Create a member owned by `parent`. Members are never registered.
    pub(crate) fn new_member(
        descriptor: UnitDescriptor,
        parent: &Arc<UnitStateMachine>,
        inherited_weaving: WeavingMode,
    ) -> Arc<Self> {
        Arc::new(Self::build(
            descriptor,
            parent.context.clone(),
            Some(Arc::downgrade(parent)),
            inherited_weaving,
        ))
    }

    fn build(
        descriptor: UnitDescriptor,
        context: UnitContext,
        parent: Option<Weak<UnitStateMachine>>,
        weaving: WeavingMode,
    ) -> Self {
        Self {
            name: descriptor.name.clone(),
            activation_lock: ActivationLock::new(descriptor.name.clone()),
            inner: Mutex::new(UnitInner {
                state: UnitState::Initial,
                ref_count: 0,
                phase: None,
                properties: descriptor.properties.clone(),
                weaving,
                staged: PreparedData::default(),
                prepared: None,
                connection: None,
                runtime_overrides: Properties::new(),
            }),
            descriptor,
            preparation_gate: Mutex::new(()),
            memo: FailureMemo::new(),
            retired: AtomicBool::new(false),
            accepting_new_handles: AtomicBool::new(true),
            composite: OnceLock::new(),
            parent,
            context,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &UnitDescriptor {
        &self.descriptor
    }

    pub fn context(&self) -> &UnitContext {
        &self.context
    }

    pub fn state(&self) -> UnitState {
        self.inner.lock().state
    }

    pub fn ref_count(&self) -> usize {
        self.inner.lock().ref_count
    }

    /// Next barrier stage while this member is mid-barrier.
    pub fn phase(&self) -> Option<BarrierStage> {
        self.inner.lock().phase
    }

    /// Effective properties, including resolved member overrides.
    pub fn properties(&self) -> Properties {
        self.inner.lock().properties.clone()
    }

    /// Post-connection overrides accepted while `Active`.
    pub fn runtime_overrides(&self) -> Properties {
        self.inner.lock().runtime_overrides.clone()
    }

    pub fn weaving(&self) -> WeavingMode {
        self.inner.lock().weaving
    }

    pub fn prepared(&self) -> Option<Arc<PreparedData>> {
        self.inner.lock().prepared.clone()
    }

    pub fn connection(&self) -> Option<ConnectionHandle> {
        self.inner.lock().connection.clone()
    }

    /// The memoized terminal failure, if the unit has failed.
    pub fn failure(&self) -> Option<BootstrapError> {
        self.memo.get().cloned()
    }

    pub fn is_composite(&self) -> bool {
        self.descriptor.is_composite()
    }

    pub fn is_member(&self) -> bool {
        self.parent.is_some()
    }

    pub fn parent(&self) -> Option<Arc<UnitStateMachine>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// Members in barrier order; empty until the composite's first preparation.
    pub fn members(&self) -> &[Arc<UnitStateMachine>] {
        self.composite
            .get()
            .map(CompositeCoordinator::members)
            .unwrap_or(&[])
    }

    pub fn accepts_new_handles(&self) -> bool {
        self.accepting_new_handles.load(Ordering::Acquire)
    }

    /// False once the unit reached `PrepareFailed` or `Undeployed`.
    /// Lock-free so the registry can consult it under its own lock.
    pub fn is_live(&self) -> bool {
        !self.retired.load(Ordering::Acquire)
    }

    pub(crate) fn stop_accepting_new_handles(&self) {
        self.accepting_new_handles.store(false, Ordering::Release);
    }

    pub fn snapshot(&self) -> UnitSnapshot {
        let inner = self.inner.lock();
        UnitSnapshot {
            name: self.name.clone(),
            state: inner.state,
            ref_count: inner.ref_count,
            phase: inner.phase,
            connected: inner.connection.is_some(),
            accepting_new_handles: self.accepts_new_handles(),
            failure: self.memo.get().map(ToString::to_string),
            members: self.members().iter().map(|m| m.name.clone()).collect(),
        }
    }

    // ------------------------------------------------------------------
    // prepare
    // ------------------------------------------------------------------

    /// Join or run metadata preparation.
    ///
    /// Joining an already prepared unit is cheap. The first caller on an
    /// `Initial` unit registers it, runs preparation once and settles the
    /// state; concurrent first callers wait on the preparation gate and then
    /// observe the same outcome. Returns the transformer only from the call
    /// that actually prepared, and only with dynamic weaving.
    pub fn prepare(
        self: &Arc<Self>,
        accounting: HandleAccounting,
    ) -> Result<Option<Arc<dyn Transformer>>> {
        self.prepare_with(accounting, Registration::Register)
    }

    fn prepare_with(
        self: &Arc<Self>,
        accounting: HandleAccounting,
        registration: Registration,
    ) -> Result<Option<Arc<dyn Transformer>>> {
        if self.is_member() {
            return Err(BootstrapError::CompositeMemberStandalone {
                unit: self.name.clone(),
            });
        }
        if self.try_join(accounting)? {
            return Ok(None);
        }

        let _gate = self.preparation_gate.lock();
        // Another caller may have settled the unit while we waited.
        if self.try_join(accounting)? {
            return Ok(None);
        }

        if self.descriptor.member_only {
            return Err(BootstrapError::CompositeMemberStandalone {
                unit: self.name.clone(),
            });
        }
        if registration == Registration::Register {
            self.context.registry.register(&self.name, self)?;
        }

        log_unit_operation("prepare_begin", &self.name, UnitState::Initial, 0, None);
        let outcome = self.run_preparation();
        self.settle_preparation(outcome, accounting)
    }

    /// Ok(true) if the caller joined, Ok(false) if preparation must run.
    fn try_join(&self, accounting: HandleAccounting) -> Result<bool> {
        let mut inner = self.inner.lock();
        let state = inner.state;
        match state {
            UnitState::Prepared | UnitState::HalfActive | UnitState::Active => {
                if !self.accepts_new_handles() {
                    return Err(BootstrapError::Superseded {
                        unit: self.name.clone(),
                    });
                }
                if accounting.is_counted() {
                    inner.ref_count += 1;
                }
                log_unit_operation("prepare_join", &self.name, state, inner.ref_count, None);
                Ok(true)
            }
            UnitState::Initial => Ok(false),
            UnitState::PrepareFailed | UnitState::ActivateFailed => Err(self.cached_failure(state)),
            UnitState::BarrierMember => Err(BootstrapError::CompositeMemberStandalone {
                unit: self.name.clone(),
            }),
            UnitState::Undeployed => Err(BootstrapError::CannotPrepare {
                unit: self.name.clone(),
                state: UnitState::Undeployed,
            }),
        }
    }

    fn run_preparation(self: &Arc<Self>) -> Result<(PreparedData, WeavingMode)> {
        let properties = self.properties();
        let weaving = WeavingMode::from_properties(&self.name, &properties)?;

        if self.descriptor.is_composite() {
            let coordinator = CompositeCoordinator::build(self, &properties, weaving)?;
            let coordinator = self.composite.get_or_init(move || coordinator);
            let prepared = coordinator.prepare_members()?;
            return Ok((prepared, weaving));
        }

        let request = StageRequest {
            unit: &self.name,
            composite: None,
            mode: PreparationMode::Standalone,
            properties: &properties,
        };
        let processor = &self.context.processor;
        let prepared = guarded(|| processor.prepare_stage(request)).map_err(|cause| {
            BootstrapError::preparation(&self.name, PreparationMode::Standalone, &cause)
        })?;
        Ok((prepared, weaving))
    }

    fn settle_preparation(
        &self,
        outcome: Result<(PreparedData, WeavingMode)>,
        accounting: HandleAccounting,
    ) -> Result<Option<Arc<dyn Transformer>>> {
        let mut inner = self.inner.lock();
        match outcome {
            Ok((prepared, weaving)) => {
                inner.state = UnitState::Prepared;
                inner.weaving = weaving;
                if accounting.is_counted() {
                    inner.ref_count += 1;
                }
                let transformer = match weaving {
                    WeavingMode::Dynamic => prepared.transformer.clone(),
                    WeavingMode::Static | WeavingMode::Disabled => None,
                };
                inner.prepared = Some(Arc::new(prepared));
                log_unit_operation(
                    "prepare_end",
                    &self.name,
                    inner.state,
                    inner.ref_count,
                    None,
                );
                Ok(transformer)
            }
            Err(failure) => {
                inner.state = UnitState::PrepareFailed;
                inner.ref_count = 0;
                let cached = self.memo.record(failure).clone();
                self.retire(&mut inner);
                warn!(unit = %self.name, error = %cached, "Unit preparation failed");
                Err(cached)
            }
        }
    }

    /// Take the unit out of the registry. Called with `inner` held so the
    /// terminal state and deregistration are observed together.
    fn retire(&self, inner: &mut MutexGuard<'_, UnitInner>) {
        self.retired.store(true, Ordering::Release);
        inner.prepared = None;
        if !self.is_member() {
            self.context.registry.remove(&self.name, self);
        }
    }

    fn cached_failure(&self, state: UnitState) -> BootstrapError {
        self.memo
            .get()
            .cloned()
            .unwrap_or_else(|| BootstrapError::CannotPrepare {
                unit: self.name.clone(),
                state,
            })
    }

    // ------------------------------------------------------------------
    // activate
    // ------------------------------------------------------------------

    /// Open the backend connection exactly once.
    ///
    /// The first caller moves `Prepared` to `HalfActive` before taking the
    /// activation lock so other threads see the attempt in progress. Under
    /// the lock the state is re-checked: a waiter that finds `Active` returns
    /// without its overrides being checked against the post-connect list, one
    /// that finds `ActivateFailed` gets the cached failure without the backend
    /// being called again.
    pub fn activate(&self, overrides: &Properties) -> Result<()> {
        if self.is_member() {
            return Err(BootstrapError::CompositeMemberStandalone {
                unit: self.name.clone(),
            });
        }

        {
            let mut inner = self.inner.lock();
            let state = inner.state;
            match state {
                UnitState::Active => return self.apply_runtime_overrides(&mut inner, overrides),
                UnitState::Prepared => {
                    inner.state = UnitState::HalfActive;
                    log_unit_operation(
                        "activate_begin",
                        &self.name,
                        inner.state,
                        inner.ref_count,
                        None,
                    );
                }
                UnitState::HalfActive => {}
                UnitState::ActivateFailed => return Err(self.cached_failure(inner.state)),
                state => {
                    return Err(BootstrapError::CannotActivate {
                        unit: self.name.clone(),
                        state,
                    })
                }
            }
        }

        let _guard = self.acquire_activation_lock()?;

        let (prepared, properties) = {
            let mut inner = self.inner.lock();
            let state = inner.state;
            match state {
                // Joined an activation already in flight; its connection serves us too.
                UnitState::Active => return Ok(()),
                UnitState::ActivateFailed => return Err(self.cached_failure(inner.state)),
                UnitState::HalfActive => {}
                state => {
                    return Err(BootstrapError::CannotActivate {
                        unit: self.name.clone(),
                        state,
                    })
                }
            }
            let prepared = inner.prepared.clone().ok_or(BootstrapError::CannotActivate {
                unit: self.name.clone(),
                state: inner.state,
            })?;
            (prepared, merge_properties(&inner.properties, overrides))
        };

        let outcome = self.connect(&prepared, &properties);
        self.settle_activation(outcome)
    }

    fn acquire_activation_lock(&self) -> Result<ActivationGuard<'_>> {
        match self.context.config.activation.lock_timeout() {
            Some(timeout) => self.activation_lock.try_acquire_for(timeout).ok_or_else(|| {
                BootstrapError::LockTimeout {
                    unit: self.name.clone(),
                    waited_ms: timeout.as_millis() as u64,
                }
            }),
            None => Ok(self.activation_lock.acquire()),
        }
    }

    /// `Ok(None)` when activation is validation-only and no connection is opened.
    fn connect(
        &self,
        prepared: &PreparedData,
        properties: &Properties,
    ) -> Result<Option<ConnectionHandle>> {
        let validation_only = properties
            .get(constants::VALIDATION_ONLY)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"));
        if validation_only {
            info!(unit = %self.name, "Validation-only activation; no connection opened");
            return Ok(None);
        }

        let backend = &self.context.backend;
        let handle = guarded(|| backend.connect(&self.name, prepared, properties))
            .map_err(|cause| BootstrapError::activation(&self.name, &cause))?;

        if let Err(cause) = guarded(|| backend.initialize(&handle)) {
            self.disconnect_quietly(handle);
            return Err(BootstrapError::activation(
                &self.name,
                &cause.context("post-connect initialization failed"),
            ));
        }
        Ok(Some(handle))
    }

    fn settle_activation(&self, outcome: Result<Option<ConnectionHandle>>) -> Result<()> {
        let mut inner = self.inner.lock();
        match outcome {
            Ok(connection) => {
                if inner.state != UnitState::HalfActive {
                    // Torn down while connecting; the new connection has no owner.
                    let state = inner.state;
                    drop(inner);
                    if let Some(handle) = connection {
                        self.disconnect_quietly(handle);
                    }
                    return Err(BootstrapError::CannotActivate {
                        unit: self.name.clone(),
                        state,
                    });
                }
                inner.state = UnitState::Active;
                inner.connection = connection;
                log_unit_operation(
                    "activate_end",
                    &self.name,
                    inner.state,
                    inner.ref_count,
                    None,
                );
                drop(inner);
                if let Some(coordinator) = self.composite.get() {
                    coordinator.mark_activated();
                }
                Ok(())
            }
            Err(failure) => {
                if inner.state == UnitState::HalfActive {
                    inner.state = UnitState::ActivateFailed;
                }
                let cached = self.memo.record(failure).clone();
                warn!(
                    unit = %self.name,
                    state = %inner.state,
                    error = %cached,
                    "Unit activation failed"
                );
                drop(inner);
                if let Some(coordinator) = self.composite.get() {
                    coordinator.mark_activation_failed(&cached);
                }
                Err(cached)
            }
        }
    }

    fn apply_runtime_overrides(&self, inner: &mut UnitInner, overrides: &Properties) -> Result<()> {
        let rejected: Vec<String> = overrides
            .keys()
            .filter(|key| !constants::POST_CONNECT_OVERRIDES.contains(&key.as_str()))
            .cloned()
            .collect();
        if !rejected.is_empty() {
            return Err(BootstrapError::OverrideRejected {
                unit: self.name.clone(),
                keys: rejected,
            });
        }
        inner
            .runtime_overrides
            .extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    // ------------------------------------------------------------------
    // release
    // ------------------------------------------------------------------

    /// Drop one counted handle. The release that brings the count to zero
    /// tears the unit down: deregisters it, moves it to `Undeployed` and
    /// closes the connection. A release on a unit holding no handles is a
    /// no-op.
    ///
    /// An owner that prepared with [`HandleAccounting::Uncounted`] must use
    /// [`release_with`](Self::release_with) instead, or it consumes a
    /// client's handle.
    pub fn release(&self) {
        self.release_with(HandleAccounting::Counted);
    }

    /// Release according to how the caller prepared.
    ///
    /// `Counted` drops one handle as [`release`](Self::release) does.
    /// `Uncounted` never touches the count: it tears the unit down only when
    /// no client handle is outstanding, otherwise the clients' last release
    /// does.
    pub fn release_with(&self, accounting: HandleAccounting) {
        if self.is_member() {
            debug!(unit = %self.name, "Release on composite member ignored");
            return;
        }

        let connection = {
            let mut inner = self.inner.lock();
            if !inner.state.holds_handles() {
                return;
            }
            if accounting.is_counted() {
                inner.ref_count = inner.ref_count.saturating_sub(1);
            }
            if inner.ref_count > 0 {
                let details = (!accounting.is_counted()).then_some("owner release deferred");
                log_unit_operation("release", &self.name, inner.state, inner.ref_count, details);
                return;
            }
            let previous = inner.state;
            inner.state = UnitState::Undeployed;
            self.retire(&mut inner);
            log_unit_operation(
                "undeploy",
                &self.name,
                inner.state,
                0,
                Some(&format!("from {previous}")),
            );
            inner.connection.take()
        };

        if let Some(handle) = connection {
            self.disconnect_quietly(handle);
        }
        if let Some(coordinator) = self.composite.get() {
            coordinator.mark_undeployed();
        }
    }

    fn disconnect_quietly(&self, handle: ConnectionHandle) {
        let id = handle.id;
        let backend = &self.context.backend;
        if let Err(cause) = guarded(|| backend.disconnect(handle)) {
            warn!(
                unit = %self.name,
                connection = %id,
                error = %format!("{cause:#}"),
                "Disconnect failed during teardown"
            );
        }
    }

    // ------------------------------------------------------------------
    // supersede
    // ------------------------------------------------------------------

    /// Replace this unit in the registry with a freshly prepared one built
    /// from the same descriptor plus `overrides`.
    ///
    /// The replacement holds one counted handle for the caller. This unit
    /// stops accepting new handles and drains the ones it has; its final
    /// release leaves the replacement's registry entry alone.
    pub fn supersede(self: &Arc<Self>, overrides: &Properties) -> Result<Arc<UnitStateMachine>> {
        if self.is_member() {
            return Err(BootstrapError::CompositeMemberStandalone {
                unit: self.name.clone(),
            });
        }
        let properties = {
            let inner = self.inner.lock();
            if !inner.state.holds_handles() {
                return Err(BootstrapError::CannotPrepare {
                    unit: self.name.clone(),
                    state: inner.state,
                });
            }
            merge_properties(&inner.properties, overrides)
        };

        let descriptor = UnitDescriptor {
            properties,
            ..self.descriptor.clone()
        };
        let replacement = UnitStateMachine::new(descriptor, self.context.clone());
        replacement.prepare_with(HandleAccounting::Counted, Registration::Deferred)?;

        if let Err(conflict) = self.context.registry.replace(&self.name, self, &replacement) {
            replacement.release();
            return Err(conflict);
        }

        info!(
            unit = %self.name,
            draining_handles = self.ref_count(),
            "Unit superseded by refreshed replacement"
        );
        Ok(replacement)
    }

    // ------------------------------------------------------------------
    // composite member steps, driven by CompositeCoordinator
    // ------------------------------------------------------------------

    /// Run one barrier stage for this member. The first stage resolves the
    /// member's overrides and weaving mode; later stages must follow in order.
    pub(crate) fn prepare_barrier_stage(
        &self,
        stage: BarrierStage,
        overrides: Option<&Properties>,
    ) -> Result<()> {
        let properties = {
            let mut inner = self.inner.lock();
            match (inner.state, inner.phase) {
                (UnitState::Initial, _) if stage == BarrierStage::Initial => {
                    if let Some(overrides) = overrides {
                        inner.properties = merge_properties(&inner.properties, overrides);
                    }
                    let own = WeavingMode::from_properties(&self.name, &inner.properties)?;
                    inner.weaving = match (inner.weaving, own) {
                        (WeavingMode::Disabled, _) | (_, WeavingMode::Disabled) => {
                            WeavingMode::Disabled
                        }
                        (WeavingMode::Static, _) => WeavingMode::Static,
                        (WeavingMode::Dynamic, own) => own,
                    };
                    inner.state = UnitState::BarrierMember;
                    inner.phase = Some(BarrierStage::Initial);
                }
                (UnitState::BarrierMember, Some(expected)) if expected == stage => {}
                (state, _) => {
                    return Err(BootstrapError::CannotPrepare {
                        unit: self.name.clone(),
                        state,
                    })
                }
            }
            inner.properties.clone()
        };

        let composite = self.parent().map(|p| p.name.clone());
        let mode = PreparationMode::Barrier(stage);
        let request = StageRequest {
            unit: &self.name,
            composite: composite.as_deref(),
            mode,
            properties: &properties,
        };
        let processor = &self.context.processor;
        let data = guarded(|| processor.prepare_stage(request))
            .map_err(|cause| BootstrapError::preparation(&self.name, mode, &cause))?;

        let mut inner = self.inner.lock();
        inner.staged.absorb(data);
        inner.phase = stage.next();
        debug!(
            unit = %self.name,
            composite = composite.as_deref().unwrap_or_default(),
            stage = %stage,
            "Barrier stage complete"
        );
        Ok(())
    }

    /// All members passed every stage.
    pub(crate) fn complete_barrier(&self) {
        let mut inner = self.inner.lock();
        let staged = std::mem::take(&mut inner.staged);
        inner.prepared = Some(Arc::new(staged));
        inner.state = UnitState::Prepared;
        inner.phase = None;
    }

    pub(crate) fn fail_member(&self, failure: &BootstrapError) {
        let mut inner = self.inner.lock();
        inner.state = UnitState::PrepareFailed;
        inner.phase = None;
        inner.staged = PreparedData::default();
        self.memo.record(failure.clone());
        self.retire(&mut inner);
    }

    pub(crate) fn member_activated(&self) {
        let mut inner = self.inner.lock();
        if inner.state == UnitState::Prepared {
            inner.state = UnitState::Active;
        }
    }

    pub(crate) fn member_activation_failed(&self, failure: &BootstrapError) {
        let mut inner = self.inner.lock();
        if inner.state == UnitState::Prepared {
            inner.state = UnitState::ActivateFailed;
            self.memo.record(failure.clone());
        }
    }

    pub(crate) fn member_undeployed(&self) {
        let mut inner = self.inner.lock();
        if inner.state.holds_handles() {
            inner.state = UnitState::Undeployed;
            self.retire(&mut inner);
        }
    }

    /// The member's transformer, if its weaving mode lets it contribute.
    pub(crate) fn woven_transformer(&self) -> Option<Arc<dyn Transformer>> {
        let inner = self.inner.lock();
        if !inner.weaving.is_enabled() {
            return None;
        }
        inner.prepared.as_ref().and_then(|p| p.transformer.clone())
    }
}

impl fmt::Debug for UnitStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitStateMachine")
            .field("name", &self.name)
            .field("composite", &self.is_composite())
            .field("member", &self.is_member())
            .field("live", &self.is_live())
            .finish_non_exhaustive()
    }
}
