#![allow(dead_code)]

pub mod collaborators;
pub mod strategies;

pub use collaborators::*;

use std::sync::Arc;
use unit_bootstrap::{BootstrapConfig, UnitContext};

/// Fresh context with its own registry, so tests never share unit names.
pub fn context(
    processor: &Arc<RecordingProcessor>,
    backend: &Arc<RecordingBackend>,
) -> UnitContext {
    UnitContext::new(processor.clone(), backend.clone())
}

pub fn context_with_config(
    processor: &Arc<RecordingProcessor>,
    backend: &Arc<RecordingBackend>,
    config: BootstrapConfig,
) -> UnitContext {
    context(processor, backend).with_config(Arc::new(config))
}
