//! Device facades
//!
//! One facade per physical data source, each wrapping its own
//! [`AcquisitionEngine`](crate::acquisition::AcquisitionEngine):
//!
//! - [`machine::ImmDevice`]: molding machine over EMI, with process parameters
//! - [`analog::AnalogDaq`]: analog input box

pub mod analog;
pub mod machine;

pub use analog::{AnalogChannel, AnalogDaq, AnalogInput, AnalogSource, ChannelSet};
pub use machine::{ImmDevice, MachineSource};

use crate::acquisition::SourceError;
use crate::emi::EmiError;
use crate::registry::RegistryError;
use thiserror::Error;

/// Errors surfaced by facade operations
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error(transparent)]
    Emi(#[from] EmiError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Source(#[from] SourceError),
}

impl DeviceError {
    /// Whether the device must be reconnected before it is usable again.
    pub fn is_connection_fault(&self) -> bool {
        match self {
            DeviceError::Emi(e) => e.is_connection_fault(),
            DeviceError::Source(e) => e.is_connection_fault(),
            DeviceError::Registry(_) => false,
        }
    }
}
