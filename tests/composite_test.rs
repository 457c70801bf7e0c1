mod common;

use common::*;
use std::sync::Arc;
use unit_bootstrap::config::CompositeConfig;
use unit_bootstrap::constants::{TARGET_SERVER, TRANSACTION_TYPE, WEAVING};
use unit_bootstrap::{
    BarrierStage, BootstrapConfig, BootstrapError, ErrorKind, HandleAccounting, PreparationMode,
    Properties, UnitDescriptor, UnitState, UnitStateMachine,
};

const INITIAL: PreparationMode = PreparationMode::Barrier(BarrierStage::Initial);
const MIDDLE: PreparationMode = PreparationMode::Barrier(BarrierStage::Middle);
const FINAL: PreparationMode = PreparationMode::Barrier(BarrierStage::Final);

fn reporting() -> UnitDescriptor {
    UnitDescriptor::new("reporting")
        .with_member(UnitDescriptor::new("sales").member_only())
        .with_member(UnitDescriptor::new("billing"))
        .with_member(UnitDescriptor::new("inventory"))
}

fn parallel() -> BootstrapConfig {
    BootstrapConfig {
        composite: CompositeConfig {
            parallel_barrier: true,
        },
        ..Default::default()
    }
}

/// Index of the last call in `stage` is before the first call in the next stage.
fn assert_stages_are_fenced(log: &[StageCall]) {
    let position = |mode: PreparationMode, first: bool| {
        let mut positions = log
            .iter()
            .enumerate()
            .filter(|(_, call)| call.mode == mode)
            .map(|(i, _)| i);
        if first {
            positions.next()
        } else {
            positions.last()
        }
    };
    assert!(position(INITIAL, false) < position(MIDDLE, true));
    assert!(position(MIDDLE, false) < position(FINAL, true));
}

#[test]
fn barrier_stages_run_in_lock_step() {
    let processor = RecordingProcessor::new().build();
    let backend = RecordingBackend::new().build();
    let composite = UnitStateMachine::new(reporting(), context(&processor, &backend));

    composite.prepare(HandleAccounting::Counted).unwrap();

    let log = processor.log();
    assert_eq!(log.len(), 9);
    assert_stages_are_fenced(&log);
    for mode in [INITIAL, MIDDLE, FINAL] {
        assert_eq!(processor.calls_for(mode), vec!["sales", "billing", "inventory"]);
    }
    assert!(log
        .iter()
        .all(|call| call.composite.as_deref() == Some("reporting")));
    assert!(processor.calls_for(PreparationMode::Standalone).is_empty());

    assert_eq!(composite.state(), UnitState::Prepared);
    assert_eq!(composite.ref_count(), 1);
    for member in composite.members() {
        assert_eq!(member.state(), UnitState::Prepared);
        assert_eq!(member.phase(), None);
        assert!(member.is_member());
        assert_eq!(member.ref_count(), 0);
    }
}

#[test]
fn parallel_barrier_still_fences_stages() {
    let processor = RecordingProcessor::new()
        .with_delay(std::time::Duration::from_millis(5))
        .build();
    let backend = RecordingBackend::new().build();
    let composite = UnitStateMachine::new(
        reporting(),
        context_with_config(&processor, &backend, parallel()),
    );

    composite.prepare(HandleAccounting::Counted).unwrap();

    let log = processor.log();
    assert_eq!(log.len(), 9);
    assert_stages_are_fenced(&log);
    assert_eq!(composite.state(), UnitState::Prepared);
}

#[test]
fn member_failure_fails_everyone_before_final_stage() {
    let processor = RecordingProcessor::new()
        .failing("billing", MIDDLE, "unresolved relationship Invoice.customer")
        .build();
    let backend = RecordingBackend::new().build();
    let ctx = context(&processor, &backend);
    let composite = UnitStateMachine::new(reporting(), ctx.clone());

    let err = composite.prepare(HandleAccounting::Counted).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Preparation);
    assert_eq!(err.unit(), Some("billing"));
    assert!(err.to_string().contains("barrier_middle"));

    assert!(processor.calls_for(FINAL).is_empty());
    // Sequential stages stop at the failing member
    assert_eq!(processor.calls_for(MIDDLE), vec!["sales", "billing"]);

    assert_eq!(composite.state(), UnitState::PrepareFailed);
    for member in composite.members() {
        assert_eq!(member.state(), UnitState::PrepareFailed);
        assert_eq!(member.failure(), Some(err.clone()));
    }
    assert!(ctx.registry.is_empty());

    let calls = processor.calls();
    assert_eq!(composite.prepare(HandleAccounting::Counted).unwrap_err(), err);
    assert_eq!(processor.calls(), calls);
}

#[test]
fn parallel_member_failure_reports_first_in_declaration_order() {
    let processor = RecordingProcessor::new()
        .failing("billing", MIDDLE, "billing mapping broken")
        .failing("inventory", MIDDLE, "inventory mapping broken")
        .build();
    let backend = RecordingBackend::new().build();
    let composite = UnitStateMachine::new(
        reporting(),
        context_with_config(&processor, &backend, parallel()),
    );

    let err = composite.prepare(HandleAccounting::Counted).unwrap_err();
    assert_eq!(err.unit(), Some("billing"));
    assert!(processor.calls_for(FINAL).is_empty());
    assert_eq!(processor.calls_for(MIDDLE).len(), 3);
    assert!(composite
        .members()
        .iter()
        .all(|m| m.state() == UnitState::PrepareFailed));
}

#[test]
fn member_overrides_resolve_at_first_stage() {
    let processor = RecordingProcessor::new().build();
    let backend = RecordingBackend::new().build();
    let descriptor = reporting()
        .with_property(TRANSACTION_TYPE, "jta")
        .with_member_override("billing", "schema", "billing_v2");
    let composite = UnitStateMachine::new(descriptor, context(&processor, &backend));

    composite.prepare(HandleAccounting::Counted).unwrap();

    let billing_calls: Vec<StageCall> = processor
        .log()
        .into_iter()
        .filter(|call| call.unit == "billing")
        .collect();
    assert_eq!(billing_calls.len(), 3);
    for call in &billing_calls {
        assert_eq!(
            call.properties.get("schema").map(String::as_str),
            Some("billing_v2")
        );
        assert_eq!(
            call.properties.get(TRANSACTION_TYPE).map(String::as_str),
            Some("jta")
        );
    }

    let sales = &composite.members()[0];
    assert!(!sales.properties().contains_key("schema"));
}

#[test]
fn members_inherit_composite_server_settings() {
    let processor = RecordingProcessor::new().build();
    let backend = RecordingBackend::new().build();
    let descriptor = UnitDescriptor::new("reporting").with_member(
        UnitDescriptor::new("sales")
            .with_property(TARGET_SERVER, "edge-01")
            .with_property(TRANSACTION_TYPE, "local"),
    );
    let composite = UnitStateMachine::new(descriptor, context(&processor, &backend));

    composite.prepare(HandleAccounting::Counted).unwrap();

    let properties = composite.members()[0].properties();
    assert!(!properties.contains_key(TARGET_SERVER));
    assert!(!properties.contains_key(TRANSACTION_TYPE));
}

#[test]
fn nested_composites_are_flattened() {
    let processor = RecordingProcessor::new().build();
    let backend = RecordingBackend::new().build();
    let analytics = UnitDescriptor::new("analytics")
        .with_member(UnitDescriptor::new("events"))
        .with_member(UnitDescriptor::new("metrics"));
    let descriptor = UnitDescriptor::new("warehouse")
        .with_member(UnitDescriptor::new("sales"))
        .with_member(analytics);
    let composite = UnitStateMachine::new(descriptor, context(&processor, &backend));

    composite.prepare(HandleAccounting::Counted).unwrap();

    let names: Vec<&str> = composite.members().iter().map(|m| m.name()).collect();
    assert_eq!(names, vec!["sales", "events", "metrics"]);
    assert_eq!(processor.calls_for(FINAL), vec!["sales", "events", "metrics"]);
    assert!(composite
        .members()
        .iter()
        .all(|m| Arc::ptr_eq(&m.parent().unwrap(), &composite)));
}

#[test]
fn duplicate_member_names_are_a_configuration_error() {
    let processor = RecordingProcessor::new().build();
    let backend = RecordingBackend::new().build();
    let descriptor = UnitDescriptor::new("reporting")
        .with_member(UnitDescriptor::new("sales"))
        .with_member(UnitDescriptor::new("analytics").with_member(UnitDescriptor::new("sales")));
    let composite = UnitStateMachine::new(descriptor, context(&processor, &backend));

    let err = composite.prepare(HandleAccounting::Counted).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(composite.state(), UnitState::PrepareFailed);
    assert_eq!(processor.calls(), 0);
}

#[test]
fn members_cannot_be_driven_standalone() {
    let processor = RecordingProcessor::new().build();
    let backend = RecordingBackend::new().build();
    let composite = UnitStateMachine::new(reporting(), context(&processor, &backend));
    composite.prepare(HandleAccounting::Counted).unwrap();

    let sales = Arc::clone(&composite.members()[0]);
    let expected = BootstrapError::CompositeMemberStandalone {
        unit: "sales".to_string(),
    };
    assert_eq!(sales.prepare(HandleAccounting::Counted).unwrap_err(), expected);
    assert_eq!(sales.activate(&Properties::new()).unwrap_err(), expected);
    sales.release();
    assert_eq!(sales.state(), UnitState::Prepared);
}

#[test]
fn composite_connects_once_and_members_follow() {
    let processor = RecordingProcessor::new().build();
    let backend = RecordingBackend::new().build();
    let ctx = context(&processor, &backend);
    let composite = UnitStateMachine::new(reporting(), ctx.clone());
    composite.prepare(HandleAccounting::Counted).unwrap();
    composite.prepare(HandleAccounting::Counted).unwrap();

    composite.activate(&Properties::new()).unwrap();
    assert_eq!(backend.connected_units(), vec!["reporting"]);
    assert!(composite
        .members()
        .iter()
        .all(|m| m.state() == UnitState::Active));

    let metadata = &composite.prepared().unwrap().metadata;
    assert_eq!(metadata.len(), 3);
    assert!(metadata["billing"].get("barrier_final").is_some());

    composite.release();
    assert_eq!(composite.state(), UnitState::Active);
    composite.release();
    assert_eq!(composite.state(), UnitState::Undeployed);
    assert_eq!(backend.disconnects(), 1);
    assert!(composite
        .members()
        .iter()
        .all(|m| m.state() == UnitState::Undeployed));
    assert!(ctx.registry.is_empty());
}

#[test]
fn composite_activation_failure_marks_members() {
    let processor = RecordingProcessor::new().build();
    let backend = RecordingBackend::new()
        .failing_connect("warehouse offline")
        .build();
    let composite = UnitStateMachine::new(reporting(), context(&processor, &backend));
    composite.prepare(HandleAccounting::Counted).unwrap();

    let err = composite.activate(&Properties::new()).unwrap_err();
    assert_eq!(composite.state(), UnitState::ActivateFailed);
    for member in composite.members() {
        assert_eq!(member.state(), UnitState::ActivateFailed);
        assert_eq!(member.failure(), Some(err.clone()));
    }
}

#[test]
fn composite_transformer_aggregates_woven_members() {
    let processor = RecordingProcessor::new().build();
    let backend = RecordingBackend::new().build();
    let descriptor = reporting().with_member_override("billing", WEAVING, "false");
    let composite = UnitStateMachine::new(descriptor, context(&processor, &backend));

    let transformer = composite
        .prepare(HandleAccounting::Counted)
        .unwrap()
        .unwrap();
    assert_eq!(transformer.targets(), vec!["sales", "inventory"]);
    assert_eq!(
        transformer.transform("inventory.Item", b"def"),
        Some(b"woven:inventory:def".to_vec())
    );
    assert_eq!(transformer.transform("billing.Invoice", b"def"), None);
}

#[test]
fn disabled_weaving_on_composite_disables_members() {
    let processor = RecordingProcessor::new().build();
    let backend = RecordingBackend::new().build();
    let descriptor = reporting().with_property(WEAVING, "false");
    let composite = UnitStateMachine::new(descriptor, context(&processor, &backend));

    assert!(composite
        .prepare(HandleAccounting::Counted)
        .unwrap()
        .is_none());
    assert!(composite
        .members()
        .iter()
        .all(|m| !m.weaving().is_enabled()));
}
