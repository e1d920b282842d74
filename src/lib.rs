//! IMM-DAQ: process data acquisition for injection molding cells
//!
//! Reads process variables from an injection molding machine over the EMI
//! protocol of its CC300 controller and from auxiliary analog sensors, and
//! buffers them as timestamped samples for consumer applications.
//!
//! ## Architecture
//!
//! - **EMI client** ([`emi`]): framed XML-over-TCP session, login handling,
//!   batched parameter reads/writes
//! - **Acquisition engine** ([`acquisition`]): one background worker per
//!   device with IDLE / EVENT / INTERNAL_LOGGING states and a bounded sample
//!   queue, generic over a [`DataSource`]
//! - **Process parameter registry** ([`registry`]): parameter names to URIs
//! - **Device facades** ([`devices`]): [`ImmDevice`] and [`AnalogDaq`]

pub mod acquisition;
pub mod config;
pub mod devices;
pub mod emi;
pub mod registry;
pub mod sample;

// Re-export configuration
pub use config::DaqConfig;

// Re-export acquisition types
pub use acquisition::{
    AcquisitionEngine, AcquisitionSettings, AcquisitionState, DataSource, EngineStats,
    OverflowPolicy, SourceError, WorkerStatus,
};

// Re-export devices
pub use devices::{AnalogDaq, AnalogInput, DeviceError, ImmDevice};

// Re-export protocol client
pub use emi::{EmiClient, EmiError, EmiSession, LoginPolicy};

// Re-export registry and samples
pub use registry::{ParamRegistry, ParamRow, ProcessParam, ProcessValue, RegistryError};
pub use sample::{Sample, SampleSeries, SampleValue};
