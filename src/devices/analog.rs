//! Analog input box (RevPi class I/O controller)
//!
//! Each configured input is one hardware pin read as a raw number and divided
//! by a per-input conversion factor. A sample holds one `<name>_<unit>` entry
//! per input and is stamped with the midpoint of the read interval.

use crate::acquisition::{
    AcquisitionEngine, AcquisitionSettings, AcquisitionState, DataSource, EngineStats,
    SourceError, WorkerStatus,
};
use crate::config::{defaults, AcquisitionConfig, AnalogConfig};
use crate::sample::{midpoint, Sample, SampleSeries, SampleValue};
use async_trait::async_trait;
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// One analog input as configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalogChannel {
    /// Hardware input name
    pub pin: String,
    #[serde(default)]
    pub unit: String,
    /// Raw reading is divided by this
    #[serde(default = "default_conversion")]
    pub conversion: f64,
}

fn default_conversion() -> f64 {
    defaults::ANALOG_CONVERSION
}

impl AnalogChannel {
    /// Sample key for an input called `name`.
    pub fn key(&self, name: &str) -> String {
        format!("{}_{}", name, self.unit)
    }
}

/// Channels to read, keyed by input name.
pub type ChannelSet = BTreeMap<String, AnalogChannel>;

/// Hardware access to the analog pins. The driver itself lives outside this
/// crate.
pub trait AnalogInput: Send + Sync + 'static {
    fn read_channel(&self, pin: &str) -> Result<f64, SourceError>;
}

/// [`DataSource`] over an [`AnalogInput`].
pub struct AnalogSource<I: AnalogInput> {
    name: String,
    channels: ChannelSet,
    input: I,
}

impl<I: AnalogInput> AnalogSource<I> {
    pub fn new(name: impl Into<String>, channels: ChannelSet, input: I) -> Self {
        Self {
            name: name.into(),
            channels,
            input,
        }
    }

    pub fn channels(&self) -> &ChannelSet {
        &self.channels
    }

    pub fn input(&self) -> &I {
        &self.input
    }
}

#[async_trait]
impl<I: AnalogInput> DataSource for AnalogSource<I> {
    type Selector = ChannelSet;

    fn device_name(&self) -> &str {
        &self.name
    }

    async fn acquire(&self, selector: Option<&ChannelSet>) -> Result<Sample, SourceError> {
        let channels = selector.unwrap_or(&self.channels);

        let start = Local::now();
        let mut readings = Vec::with_capacity(channels.len());
        for (name, channel) in channels {
            let raw = self.input.read_channel(&channel.pin)?;
            readings.push((channel.key(name), raw / channel.conversion));
        }
        let end = Local::now();

        Ok(readings
            .into_iter()
            .fold(Sample::new(&self.name, midpoint(start, end)), |sample, (key, value)| {
                sample.with_value(key, SampleValue::Number(value))
            }))
    }
}

/// Caller-facing facade of the analog box.
pub struct AnalogDaq<I: AnalogInput> {
    engine: AcquisitionEngine<AnalogSource<I>>,
}

impl<I: AnalogInput> AnalogDaq<I> {
    /// Build the facade and start its worker. Must be called from within a
    /// tokio runtime.
    pub fn new(input: I, config: &AnalogConfig, acquisition: &AcquisitionConfig) -> Self {
        let settings = acquisition.settings_at(config.sampling_rate_ms);
        info!(
            device = %config.name,
            inputs = config.inputs.len(),
            "Analog inputs selected"
        );
        Self::with_settings(
            AnalogSource::new(&config.name, config.inputs.clone(), input),
            settings,
        )
    }

    pub fn with_settings(source: AnalogSource<I>, settings: AcquisitionSettings) -> Self {
        let engine = AcquisitionEngine::new(source, settings);
        engine.start();
        Self { engine }
    }

    pub fn name(&self) -> &str {
        self.engine.source().device_name()
    }

    /// Read now, outside the sampling loop. `io` restricts the inputs read.
    pub async fn get_async_sample(&self, io: Option<&ChannelSet>) -> Result<Sample, SourceError> {
        self.engine.get_value(io).await
    }

    /// Everything queued since the last call, one sequence per key.
    pub fn get_samples(&self) -> SampleSeries {
        self.engine.pop_all_samples()
    }

    pub async fn get_sample(&self) -> Option<Sample> {
        self.engine.get_sample().await
    }

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
}
