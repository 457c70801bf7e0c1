//! # Collaborator Contracts
//!
//! The lifecycle core drives two external collaborators and never looks inside
//! their work:
//!
//! - [`MetadataProcessor`] performs metadata preparation, either in one pass
//!   for a standalone unit or one barrier stage at a time for a composite member.
//! - [`ActivationBackend`] opens, initializes and closes the backend connection.
//!
//! Both report failures as `anyhow::Error`; the core translates them into
//! [`BootstrapError`](crate::error::BootstrapError) variants and memoizes them.
//! A panic inside a collaborator is caught and treated like any other failure.

use crate::unit::descriptor::Properties;
use crate::unit::states::PreparationMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use uuid::Uuid;

/// Everything a metadata processor is told about the call it is serving.
#[derive(Debug, Clone, Copy)]
pub struct StageRequest<'a> {
    pub unit: &'a str,
    /// Name of the owning composite for a member unit.
    pub composite: Option<&'a str>,
    pub mode: PreparationMode,
    pub properties: &'a Properties,
}

pub trait MetadataProcessor: Send + Sync {
    fn prepare_stage(&self, request: StageRequest<'_>) -> anyhow::Result<PreparedData>;
}

pub trait ActivationBackend: Send + Sync {
    fn connect(
        &self,
        unit: &str,
        prepared: &PreparedData,
        properties: &Properties,
    ) -> anyhow::Result<ConnectionHandle>;

    /// Post-connection setup. A failure here closes the handle and fails activation.
    fn initialize(&self, _handle: &ConnectionHandle) -> anyhow::Result<()> {
        Ok(())
    }

    fn disconnect(&self, handle: ConnectionHandle) -> anyhow::Result<()>;
}

/// Opaque class-transformation capability produced by preparation. The client
/// applies it before constructing real instances; the core only passes it on.
pub trait Transformer: Send + Sync + fmt::Debug {
    /// Rewrite `definition` for `target`, or `None` when the target is not handled.
    fn transform(&self, target: &str, definition: &[u8]) -> Option<Vec<u8>>;

    /// Targets this transformer knows how to rewrite.
    fn targets(&self) -> Vec<String>;
}

/// Delegates to member transformers in declaration order; the first match wins.
#[derive(Debug, Default)]
pub struct CompositeTransformer {
    members: Vec<Arc<dyn Transformer>>,
}

impl CompositeTransformer {
    pub fn new(members: Vec<Arc<dyn Transformer>>) -> Self {
        Self { members }
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl Transformer for CompositeTransformer {
    fn transform(&self, target: &str, definition: &[u8]) -> Option<Vec<u8>> {
        self.members
            .iter()
            .find_map(|member| member.transform(target, definition))
    }

    fn targets(&self) -> Vec<String> {
        self.members.iter().flat_map(|member| member.targets()).collect()
    }
}

/// Output of metadata preparation, accumulated across barrier stages.
#[derive(Debug, Clone, Default)]
pub struct PreparedData {
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub transformer: Option<Arc<dyn Transformer>>,
}

impl PreparedData {
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_transformer(mut self, transformer: Arc<dyn Transformer>) -> Self {
        self.transformer = Some(transformer);
        self
    }

    /// Fold a later stage's output into this one.
    pub fn absorb(&mut self, later: PreparedData) {
        self.metadata.extend(later.metadata);
        if later.transformer.is_some() {
            self.transformer = later.transformer;
        }
    }
}

/// A live backend connection owned by exactly one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionHandle {
    pub id: Uuid,
    pub unit: String,
    pub opened_at: DateTime<Utc>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl ConnectionHandle {
    pub fn new(unit: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            unit: unit.into(),
            opened_at: Utc::now(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Run a collaborator call, turning a panic into an ordinary error.
pub(crate) fn guarded<T>(call: impl FnOnce() -> anyhow::Result<T>) -> anyhow::Result<T> {
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            Err(anyhow::anyhow!("collaborator panicked: {message}"))
        }
    }
}
