//! Recording collaborators with injectable failures, delays and panics.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use unit_bootstrap::{
    ActivationBackend, ConnectionHandle, MetadataProcessor, PreparationMode, PreparedData,
    Properties, StageRequest, Transformer,
};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCall {
    pub unit: String,
    pub composite: Option<String>,
    pub mode: PreparationMode,
    pub properties: Properties,
}

/// Weaves by prefixing definitions of classes under its unit's name.
#[derive(Debug)]
pub struct NamedTransformer {
    pub unit: String,
}

impl Transformer for NamedTransformer {
    fn transform(&self, target: &str, definition: &[u8]) -> Option<Vec<u8>> {
        target.starts_with(&format!("{}.", self.unit)).then(|| {
            let mut woven = format!("woven:{}:", self.unit).into_bytes();
            woven.extend_from_slice(definition);
            woven
        })
    }

    fn targets(&self) -> Vec<String> {
        vec![self.unit.clone()]
    }
}

#[derive(Default)]
pub struct RecordingProcessor {
    calls: AtomicUsize,
    log: Mutex<Vec<StageCall>>,
    failures: BTreeMap<(String, PreparationMode), String>,
    panics: BTreeMap<(String, PreparationMode), String>,
    property_failures: Vec<(String, String, String)>,
    delay: Option<Duration>,
}

impl RecordingProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, unit: &str, mode: PreparationMode, reason: &str) -> Self {
        self.failures
            .insert((unit.to_string(), mode), reason.to_string());
        self
    }

    pub fn panicking(mut self, unit: &str, mode: PreparationMode, message: &str) -> Self {
        self.panics
            .insert((unit.to_string(), mode), message.to_string());
        self
    }

    /// Fail any call whose properties map `key` to `value`.
    pub fn failing_when(mut self, key: &str, value: &str, reason: &str) -> Self {
        self.property_failures
            .push((key.to_string(), value.to_string(), reason.to_string()));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn log(&self) -> Vec<StageCall> {
        self.log.lock().clone()
    }

    pub fn calls_for(&self, mode: PreparationMode) -> Vec<String> {
        self.log
            .lock()
            .iter()
            .filter(|call| call.mode == mode)
            .map(|call| call.unit.clone())
            .collect()
    }
}

impl MetadataProcessor for RecordingProcessor {
    fn prepare_stage(&self, request: StageRequest<'_>) -> anyhow::Result<PreparedData> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log.lock().push(StageCall {
            unit: request.unit.to_string(),
            composite: request.composite.map(str::to_string),
            mode: request.mode,
            properties: request.properties.clone(),
        });

        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        let key = (request.unit.to_string(), request.mode);
        if let Some(message) = self.panics.get(&key) {
            panic!("{message}");
        }
        if let Some(reason) = self.failures.get(&key) {
            anyhow::bail!("{reason}");
        }
        for (property, value, reason) in &self.property_failures {
            if request.properties.get(property) == Some(value) {
                anyhow::bail!("{reason}");
            }
        }

        let data = PreparedData::default()
            .with_metadata(request.mode.to_string(), serde_json::json!(request.unit));
        let yields_transformer = matches!(
            request.mode,
            PreparationMode::Standalone
                | PreparationMode::Barrier(unit_bootstrap::BarrierStage::Final)
        );
        Ok(if yields_transformer {
            data.with_transformer(Arc::new(NamedTransformer {
                unit: request.unit.to_string(),
            }))
        } else {
            data
        })
    }
}

#[derive(Default)]
pub struct RecordingBackend {
    connects: AtomicUsize,
    initializes: AtomicUsize,
    disconnects: AtomicUsize,
    disconnected: Mutex<Vec<Uuid>>,
    connected_units: Mutex<Vec<String>>,
    connect_delay: Option<Duration>,
    connect_failure: Option<String>,
    connect_panic: Option<String>,
    initialize_failure: Option<String>,
    disconnect_failure: Option<String>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    pub fn failing_connect(mut self, reason: &str) -> Self {
        self.connect_failure = Some(reason.to_string());
        self
    }

    pub fn panicking_connect(mut self, message: &str) -> Self {
        self.connect_panic = Some(message.to_string());
        self
    }

    pub fn failing_initialize(mut self, reason: &str) -> Self {
        self.initialize_failure = Some(reason.to_string());
        self
    }

    pub fn failing_disconnect(mut self, reason: &str) -> Self {
        self.disconnect_failure = Some(reason.to_string());
        self
    }

    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn initializes(&self) -> usize {
        self.initializes.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn disconnected(&self) -> Vec<Uuid> {
        self.disconnected.lock().clone()
    }

    pub fn connected_units(&self) -> Vec<String> {
        self.connected_units.lock().clone()
    }
}

impl ActivationBackend for RecordingBackend {
    fn connect(
        &self,
        unit: &str,
        _prepared: &PreparedData,
        _properties: &Properties,
    ) -> anyhow::Result<ConnectionHandle> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.connected_units.lock().push(unit.to_string());
        if let Some(delay) = self.connect_delay {
            std::thread::sleep(delay);
        }
        if let Some(message) = &self.connect_panic {
            panic!("{message}");
        }
        if let Some(reason) = &self.connect_failure {
            anyhow::bail!("{reason}");
        }
        Ok(ConnectionHandle::new(unit).with_attribute("pool", "primary"))
    }

    fn initialize(&self, _handle: &ConnectionHandle) -> anyhow::Result<()> {
        self.initializes.fetch_add(1, Ordering::SeqCst);
        match &self.initialize_failure {
            Some(reason) => anyhow::bail!("{reason}"),
            None => Ok(()),
        }
    }

    fn disconnect(&self, handle: ConnectionHandle) -> anyhow::Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.disconnected.lock().push(handle.id);
        match &self.disconnect_failure {
            Some(reason) => anyhow::bail!("{reason}"),
            None => Ok(()),
        }
    }
}
