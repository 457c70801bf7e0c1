//! # Composite Coordinator
//!
//! Prepares a composite unit's members in lock-step. Every member completes
//! `barrier_initial` before any member starts `barrier_middle`, and likewise
//! for `barrier_final`. The first failing member fails every member and the
//! composite with the same error.
//!
//! Nested composites are flattened when the coordinator is built; the
//! barrier only ever sees leaf members. While flattening, each composite
//! imposes its [`INHERITED_MEMBER_PROPERTIES`] on the level below.
//!
//! By default each stage runs members sequentially in declaration order and
//! stops at the first failure. With `composite.parallel_barrier` set, a stage
//! fans out across scoped threads and joins before the next stage begins.

use crate::constants::INHERITED_MEMBER_PROPERTIES;
use crate::error::{BootstrapError, Result};
use crate::unit::collaborators::{CompositeTransformer, PreparedData, Transformer};
use crate::unit::descriptor::{merge_properties, Properties, UnitDescriptor, WeavingMode};
use crate::unit::state_machine::UnitStateMachine;
use crate::unit::states::{BarrierStage, PreparationMode};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct CompositeCoordinator {
    composite: String,
    members: Vec<Arc<UnitStateMachine>>,
    member_overrides: BTreeMap<String, Properties>,
    weaving: WeavingMode,
    parallel: bool,
}

impl CompositeCoordinator {
    pub(crate) fn build(
        composite: &Arc<UnitStateMachine>,
        properties: &Properties,
        weaving: WeavingMode,
    ) -> Result<Self> {
        let descriptor = composite.descriptor();
        let flattened = flatten_members(&descriptor.name, properties, &descriptor.members)?;

        let members: Vec<Arc<UnitStateMachine>> = flattened
            .into_iter()
            .map(|member| UnitStateMachine::new_member(member, composite, weaving))
            .collect();

        info!(
            composite = %descriptor.name,
            members = members.len(),
            weaving = ?weaving,
            "Composite members flattened"
        );

        Ok(Self {
            composite: descriptor.name.clone(),
            members,
            member_overrides: descriptor.member_overrides.clone(),
            weaving,
            parallel: composite.context().config.composite.parallel_barrier,
        })
    }

    pub fn composite(&self) -> &str {
        &self.composite
    }

    pub fn members(&self) -> &[Arc<UnitStateMachine>] {
        &self.members
    }

    pub fn member(&self, name: &str) -> Option<&Arc<UnitStateMachine>> {
        self.members.iter().find(|m| m.name() == name)
    }

    /// Drive every member through all three barrier stages and aggregate
    /// their prepared data.
    pub(crate) fn prepare_members(&self) -> Result<PreparedData> {
        for stage in BarrierStage::ALL {
            debug!(
                composite = %self.composite,
                stage = %stage,
                members = self.members.len(),
                parallel = self.parallel,
                "Barrier stage starting"
            );
            if let Err(failure) = self.run_stage(stage) {
                warn!(
                    composite = %self.composite,
                    stage = %stage,
                    error = %failure,
                    "Barrier stage failed; failing all members"
                );
                for member in &self.members {
                    member.fail_member(&failure);
                }
                return Err(failure);
            }
        }

        for member in &self.members {
            member.complete_barrier();
        }
        Ok(self.aggregate())
    }

    fn run_stage(&self, stage: BarrierStage) -> Result<()> {
        if self.parallel && self.members.len() > 1 {
            return self.run_stage_parallel(stage);
        }
        self.members.iter().try_for_each(|member| {
            member.prepare_barrier_stage(stage, self.overrides_for(member, stage))
        })
    }

    /// All members run the stage; the first failure in declaration order is reported.
    fn run_stage_parallel(&self, stage: BarrierStage) -> Result<()> {
        let joined = crossbeam::thread::scope(|scope| {
            let handles: Vec<_> = self
                .members
                .iter()
                .map(|member| {
                    let overrides = self.overrides_for(member, stage);
                    let handle =
                        scope.spawn(move |_| member.prepare_barrier_stage(stage, overrides));
                    (member, handle)
                })
                .collect();

            handles
                .into_iter()
                .map(|(member, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        Err(BootstrapError::Preparation {
                            unit: member.name().to_string(),
                            mode: PreparationMode::Barrier(stage),
                            reason: "barrier worker panicked".to_string(),
                        })
                    })
                })
                .collect::<Vec<Result<()>>>()
        });

        match joined {
            Ok(results) => results.into_iter().collect(),
            Err(_) => Err(BootstrapError::Preparation {
                unit: self.composite.clone(),
                mode: PreparationMode::Barrier(stage),
                reason: "barrier scope panicked".to_string(),
            }),
        }
    }

    fn overrides_for(&self, member: &UnitStateMachine, stage: BarrierStage) -> Option<&Properties> {
        if stage != BarrierStage::Initial {
            return None;
        }
        self.member_overrides.get(member.name())
    }

    fn aggregate(&self) -> PreparedData {
        let mut aggregated = PreparedData::default();
        let mut transformers: Vec<Arc<dyn Transformer>> = Vec::new();

        for member in &self.members {
            if let Some(prepared) = member.prepared() {
                let metadata: serde_json::Map<String, serde_json::Value> = prepared
                    .metadata
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                aggregated
                    .metadata
                    .insert(member.name().to_string(), serde_json::Value::Object(metadata));
            }
            if let Some(transformer) = member.woven_transformer() {
                transformers.push(transformer);
            }
        }

        if self.weaving.is_enabled() && !transformers.is_empty() {
            aggregated.transformer = Some(Arc::new(CompositeTransformer::new(transformers)));
        }
        aggregated
    }

    pub(crate) fn mark_activated(&self) {
        self.members.iter().for_each(|m| m.member_activated());
    }

    pub(crate) fn mark_activation_failed(&self, failure: &BootstrapError) {
        self.members
            .iter()
            .for_each(|m| m.member_activation_failed(failure));
    }

    pub(crate) fn mark_undeployed(&self) {
        self.members.iter().for_each(|m| m.member_undeployed());
    }
}

/// Flatten `members` into leaf descriptors. Each level imposes the inherited
/// keys of its composite; a nested composite's own member overrides are
/// folded into its leaves here since the nested composite disappears.
fn flatten_members(
    composite: &str,
    composite_properties: &Properties,
    members: &[UnitDescriptor],
) -> Result<Vec<UnitDescriptor>> {
    let mut flattened = Vec::new();
    let mut seen = BTreeSet::new();

    for declared in members {
        let mut member = declared.clone();
        inherit_properties(&mut member.properties, composite_properties);

        let leaves = if member.is_composite() {
            let mut leaves = flatten_members(&member.name, &member.properties, &member.members)?;
            for leaf in &mut leaves {
                if let Some(overrides) = member.member_overrides.get(&leaf.name) {
                    leaf.properties = merge_properties(&leaf.properties, overrides);
                }
            }
            leaves
        } else {
            vec![member]
        };

        for leaf in leaves {
            if !seen.insert(leaf.name.clone()) {
                return Err(BootstrapError::configuration(
                    composite,
                    format!("member '{}' is declared more than once", leaf.name),
                ));
            }
            flattened.push(leaf);
        }
    }
    Ok(flattened)
}

fn inherit_properties(member: &mut Properties, composite: &Properties) {
    for key in INHERITED_MEMBER_PROPERTIES {
        match composite.get(key) {
            Some(value) => {
                member.insert(key.to_string(), value.clone());
            }
            None => {
                member.remove(key);
            }
        }
    }
}
