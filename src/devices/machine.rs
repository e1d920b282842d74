//! Injection molding machine behind an EMI controller
//!
//! [`MachineSource`] adapts the EMI client to the acquisition engine; by
//! default it reads the actual-value URI of every registered process
//! parameter. [`ImmDevice`] is the facade handed to callers: session
//! lifecycle, state control, sample retrieval with URIs translated back to
//! parameter names, and process parameter writes.

use super::DeviceError;
use crate::acquisition::{
    AcquisitionEngine, AcquisitionSettings, AcquisitionState, DataSource, EngineStats,
    SourceError, WorkerStatus,
};
use crate::config::DaqConfig;
use crate::emi::{EmiClient, EmiError, EmiSession, Transport, XmlElement};
use crate::registry::{ParamRegistry, ProcessValue};
use crate::sample::{collect_series, Sample, SampleSeries, SampleValue};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

impl From<EmiError> for SourceError {
    fn from(e: EmiError) -> Self {
        if e.is_connection_fault() {
            SourceError::Connection(e.to_string())
        } else {
            SourceError::Protocol(e.to_string())
        }
    }
}

// ============================================================================
// Data source
// ============================================================================

pub struct MachineSource {
    client: EmiClient,
    registry: ParamRegistry,
    read_set: Vec<String>,
    idle_timeout: Duration,
}

impl MachineSource {
    pub fn new(client: EmiClient, registry: ParamRegistry, idle_timeout: Duration) -> Self {
        let read_set = registry.get_uris();
        Self {
            client,
            registry,
            read_set,
            idle_timeout,
        }
    }

    pub fn client(&self) -> &EmiClient {
        &self.client
    }

    pub fn registry(&self) -> &ParamRegistry {
        &self.registry
    }

    /// URIs read by one worker acquisition.
    pub fn read_set(&self) -> &[String] {
        &self.read_set
    }
}

#[async_trait]
impl DataSource for MachineSource {
    type Selector = Vec<String>;

    fn device_name(&self) -> &str {
        self.client.name()
    }

    async fn acquire(&self, selector: Option<&Vec<String>>) -> Result<Sample, SourceError> {
        let uris = selector.unwrap_or(&self.read_set);
        Ok(self.client.get_value(uris).await?)
    }

    async fn keep_alive(&self) -> Result<(), SourceError> {
        // Nothing to keep alive before the first connect or after a close
        if !self.client.session().is_connected().await {
            debug!(device = %self.device_name(), "Keep-alive skipped: not connected");
            return Ok(());
        }
        self.client.info_log().await?;
        Ok(())
    }

    fn idle_timeout(&self) -> Option<Duration> {
        Some(self.idle_timeout)
    }
}

// ============================================================================
// Facade
// ============================================================================

/// Machine controller as seen by callers.
pub struct ImmDevice {
    engine: AcquisitionEngine<MachineSource>,
    host: String,
    port: u16,
    username: String,
    password: String,
}

impl ImmDevice {
    /// Build the device from configuration and start its worker. Does not
    /// connect. Must be called from within a tokio runtime.
    pub fn from_config(config: &DaqConfig) -> Self {
        let registry = ParamRegistry::from_rows(&config.parameters);
        info!(
            device = %config.machine.name,
            parameters = registry.len(),
            "Process parameters registered"
        );
        let session = EmiSession::new(&config.machine.name, config.login.policy())
            .with_response_timeout(Duration::from_millis(config.machine.response_timeout_ms))
            .with_max_frame_bytes(config.machine.max_frame_bytes);
        let source = MachineSource::new(
            EmiClient::new(session),
            registry,
            config.acquisition.idle_timeout(),
        );
        Self::with_source(source, config.acquisition.settings(), config)
    }

    pub fn with_source(source: MachineSource, settings: AcquisitionSettings, config: &DaqConfig) -> Self {
        let engine = AcquisitionEngine::new(source, settings);
        engine.start();
        Self {
            engine,
            host: config.machine.host.clone(),
            port: config.machine.port,
            username: config.machine.username.clone(),
            password: config.machine.password.clone(),
        }
    }

    pub fn name(&self) -> &str {
        self.engine.source().device_name()
    }

    pub fn registry(&self) -> &ParamRegistry {
        self.engine.source().registry()
    }

    fn client(&self) -> &EmiClient {
        self.engine.source().client()
    }

    fn session(&self) -> &EmiSession {
        self.client().session()
    }

    // ------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------

    /// Open the TCP connection. A successful connect also lifts an
    /// `Unreachable` worker status.
    pub async fn connect(&self) -> bool {
        let connected = self.session().connect(&self.host, self.port).await;
        if connected {
            self.engine.clear_fault();
        }
        connected
    }

    /// Use an already-open stream instead of connecting.
    pub async fn attach<T: Transport + 'static>(&self, stream: T) {
        self.session().attach(stream).await;
        self.engine.clear_fault();
    }

    /// Log out any stale session, then log in with the configured credentials.
    pub async fn login(&self) -> Result<String, DeviceError> {
        self.engine.note_action();
        self.session().logout().await?;
        let session_id = self.session().login(&self.username, &self.password).await?;
        self.engine.note_action();
        Ok(session_id)
    }

    pub async fn logout(&self) -> Result<(), DeviceError> {
        self.engine.note_action();
        Ok(self.session().logout().await?)
    }

    pub async fn close(&self) {
        self.session().close().await;
    }

    // ------------------------------------------------------------------
    // Data
    // ------------------------------------------------------------------

    fn translate(&self, sample: Sample) -> Sample {
        let registry = self.registry();
        sample.relabel(|uri| registry.find_by_uri(uri).map(str::to_string))
    }

    /// Read now, outside the sampling loop. `uris` defaults to the registry's
    /// read set; known URIs come back under their parameter names.
    pub async fn get_value(&self, uris: Option<Vec<String>>) -> Result<Sample, DeviceError> {
        let sample = self.engine.get_value(uris.as_ref()).await?;
        Ok(self.translate(sample))
    }

    /// Everything queued since the last call, one sequence per key.
    pub fn get_samples(&self) -> SampleSeries {
        collect_series(
            self.engine
                .drain_samples()
                .into_iter()
                .map(|s| self.translate(s)),
        )
    }

    pub async fn get_sample(&self) -> Option<Sample> {
        self.engine.get_sample().await.map(|s| self.translate(s))
    }

    pub fn queue_is_empty(&self) -> bool {
        self.engine.queue_is_empty()
    }

    // ------------------------------------------------------------------
    // State control
    // ------------------------------------------------------------------

    pub fn event(&self) {
        self.engine.set_state(AcquisitionState::Event);
    }

    /// Trigger one sample. Ignored unless the worker is in EVENT.
    pub fn event_sample(&self) -> bool {
        let accepted = self.engine.trigger_event();
        if !accepted {
            debug!(device = %self.name(), state = %self.engine.current_state(), "Trigger requires EVENT state");
        }
        accepted
    }

    pub fn trigger_event(&self) -> bool {
        self.event_sample()
    }

    pub fn idle(&self) {
        self.engine.set_state(AcquisitionState::Idle);
    }

    pub fn start_logging(&self) {
        self.engine.set_state(AcquisitionState::InternalLogging);
    }

    pub fn reset(&self) {
        self.engine.reset();
    }

    pub fn state(&self) -> AcquisitionState {
        self.engine.current_state()
    }

    pub fn status(&self) -> WorkerStatus {
        self.engine.status()
    }

    pub fn stats(&self) -> EngineStats {
        self.engine.stats()
    }

    pub async fn shutdown(&self) {
        self.engine.shutdown().await;
    }

    // ------------------------------------------------------------------
    // Process parameters
    // ------------------------------------------------------------------

    /// Write a set value (or both threshold bounds) and return the values
    /// read back.
    pub async fn set_process_param(
        &self,
        name: &str,
        value: &ProcessValue,
    ) -> Result<Vec<SampleValue>, DeviceError> {
        let param = self.registry().resolve(name)?;
        for (uri, v) in value.assign(param)? {
            info!(device = %self.name(), param = name, value = v, "Setting process parameter");
            self.engine.note_action();
            self.client().set_value(uri, v).await?;
        }
        self.get_process_param(name).await
    }

    /// Current set value, or `[low, high]` for threshold parameters.
    pub async fn get_process_param(&self, name: &str) -> Result<Vec<SampleValue>, DeviceError> {
        let param = self.registry().resolve(name)?;
        let uris: Vec<String> = param
            .write_uris()?
            .into_iter()
            .map(str::to_string)
            .collect();

        let sample = self.engine.get_value(Some(&uris)).await?;
        Ok(uris
            .iter()
            .map(|uri| sample.get(uri).cloned().unwrap_or(SampleValue::Null))
            .collect())
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    pub async fn parameter_details(&self, uri: &str) -> Result<BTreeMap<String, String>, DeviceError> {
        self.engine.note_action();
        Ok(self.client().get_parameter_details(uri).await?)
    }

    pub async fn parameter_text(&self, uri: &str) -> Result<String, DeviceError> {
        self.engine.note_action();
        Ok(self.client().get_parameter_text(uri).await?)
    }

    pub async fn process_dataset(&self, min_record: &str, max_record: &str) -> Result<XmlElement, DeviceError> {
        self.engine.note_action();
        Ok(self.client().get_process_dataset(min_record, max_record).await?)
    }

    pub async fn info_log(&self) -> Result<XmlElement, DeviceError> {
        self.engine.note_action();
        Ok(self.client().info_log().await?)
    }
}
