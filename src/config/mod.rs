//! DAQ Configuration Module
//!
//! Connection, timing and parameter-table settings loaded from a TOML file.
//!
//! ## Loading Order
//!
//! 1. `IMM_DAQ_CONFIG` environment variable (path to TOML file)
//! 2. `imm_daq.toml` in the current working directory
//! 3. Built-in defaults (see [`defaults`])
//!
//! ## Usage
//!
//! ```ignore
//! let config = DaqConfig::load();
//! let device = ImmDevice::from_config(&config);
//! ```

mod daq_config;
pub mod defaults;

pub use daq_config::*;
