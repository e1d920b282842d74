//! DAQ Configuration - connection, timing and parameter table as TOML values
//!
//! Each section implements `Default` with the values from [`super::defaults`],
//! so an empty file (or no file at all) yields a working configuration.

use super::defaults;
use crate::acquisition::{AcquisitionSettings, OverflowPolicy};
use crate::devices::analog::AnalogChannel;
use crate::emi::LoginPolicy;
use crate::registry::ParamRow;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration of one DAQ deployment (one machine, one analog box).
///
/// Load with `DaqConfig::load()` which searches:
/// 1. `$IMM_DAQ_CONFIG` env var
/// 2. `./imm_daq.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaqConfig {
    /// EMI controller connection
    #[serde(default)]
    pub machine: MachineConfig,

    /// Sampling and buffering of the machine worker
    #[serde(default)]
    pub acquisition: AcquisitionConfig,

    /// Login retry behaviour
    #[serde(default)]
    pub login: LoginConfig,

    /// Process parameter table
    #[serde(default)]
    pub parameters: Vec<ParamRow>,

    /// Analog input box
    #[serde(default)]
    pub analog: AnalogConfig,
}

impl DaqConfig {
    /// Load configuration using the standard search order:
    /// 1. `$IMM_DAQ_CONFIG` environment variable
    /// 2. `./imm_daq.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        let from_env = std::env::var_os(defaults::CONFIG_ENV_VAR).map(PathBuf::from);
        if let Some(path) = &from_env {
            if !path.exists() {
                warn!(path = %path.display(), "{} names a missing file", defaults::CONFIG_ENV_VAR);
            }
        }

        let candidates = from_env
            .into_iter()
            .chain(std::iter::once(PathBuf::from(defaults::CONFIG_FILE_NAME)));
        for path in candidates.filter(|p| p.exists()) {
            match Self::load_from_file(&path) {
                Ok(config) => {
                    info!(path = %path.display(), machine = %config.machine.name, "DAQ config loaded");
                    return config;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unusable config"),
            }
        }

        info!("No usable config file, using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Check every section and report all problems at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        if self.machine.name.trim().is_empty() {
            errors.push("machine.name must not be empty".to_string());
        }
        if self.machine.port == 0 {
            errors.push("machine.port must be > 0".to_string());
        }
        if self.machine.max_frame_bytes == 0 {
            errors.push("machine.max_frame_bytes must be > 0".to_string());
        }

        let a = &self.acquisition;
        for (value, key) in [
            (self.machine.response_timeout_ms, "machine.response_timeout_ms"),
            (a.sampling_rate_ms, "acquisition.sampling_rate_ms"),
            (a.idle_timeout_secs, "acquisition.idle_timeout_secs"),
            (a.sample_wait_ms, "acquisition.sample_wait_ms"),
            (a.event_poll_ms, "acquisition.event_poll_ms"),
            (self.login.retry_interval_ms, "login.retry_interval_ms"),
            (self.analog.sampling_rate_ms, "analog.sampling_rate_ms"),
        ] {
            if value == 0 {
                errors.push(format!("{} must be > 0", key));
            }
        }
        if a.queue_capacity == 0 {
            errors.push("acquisition.queue_capacity must be > 0".to_string());
        }
        if self.login.max_attempts == Some(0) {
            errors.push("login.max_attempts must be > 0 when set".to_string());
        }

        let mut seen = HashSet::new();
        for row in &self.parameters {
            if row.name.trim().is_empty() {
                errors.push("parameters: every row needs a name".to_string());
            } else if !seen.insert(row.name.as_str()) {
                errors.push(format!("parameters: duplicate name '{}'", row.name));
            }
        }

        if self.analog.name.trim().is_empty() {
            errors.push("analog.name must not be empty".to_string());
        }
        for (name, input) in &self.analog.inputs {
            if input.conversion == 0.0 || !input.conversion.is_finite() {
                errors.push(format!(
                    "analog.inputs.{}.conversion must be a finite non-zero number, got {}",
                    name, input.conversion
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read {}: {}", .0.display(), .1)]
    Io(PathBuf, std::io::Error),

    #[error("Invalid TOML in {}: {}", .0.display(), .1)]
    Parse(PathBuf, toml::de::Error),

    #[error("Cannot serialize config: {0}")]
    Serialize(toml::ser::Error),

    #[error("Invalid config: {}", .0.join("; "))]
    Validation(Vec<String>),
}

// ============================================================================
// Machine
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineConfig {
    /// Device name; appears in logs and in the `timestamp_<name>` key
    #[serde(default = "default_machine_name")]
    pub name: String,

    #[serde(default = "default_machine_host")]
    pub host: String,

    #[serde(default = "default_emi_port")]
    pub port: u16,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Longest wait for one response before the connection is dropped
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,

    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

fn default_machine_name() -> String {
    defaults::MACHINE_NAME.to_string()
}
fn default_machine_host() -> String {
    defaults::MACHINE_HOST.to_string()
}
fn default_emi_port() -> u16 {
    defaults::EMI_PORT
}
fn default_response_timeout_ms() -> u64 {
    defaults::RESPONSE_TIMEOUT_MS
}
fn default_max_frame_bytes() -> usize {
    defaults::MAX_FRAME_BYTES
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            name: default_machine_name(),
            host: default_machine_host(),
            port: default_emi_port(),
            username: String::new(),
            password: String::new(),
            response_timeout_ms: default_response_timeout_ms(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

// ============================================================================
// Acquisition
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    pub sampling_rate_ms: u64,
    /// Session idle budget before a keep-alive is sent
    pub idle_timeout_secs: u64,
    pub queue_capacity: usize,
    /// What to lose when the queue is full
    pub overflow: OverflowPolicy,
    pub sample_wait_ms: u64,
    pub event_poll_ms: u64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            sampling_rate_ms: defaults::SAMPLING_RATE_MS,
            idle_timeout_secs: defaults::IDLE_TIMEOUT_SECS,
            queue_capacity: defaults::QUEUE_CAPACITY,
            overflow: OverflowPolicy::default(),
            sample_wait_ms: defaults::SAMPLE_WAIT_MS,
            event_poll_ms: defaults::EVENT_POLL_MS,
        }
    }
}

impl AcquisitionConfig {
    pub fn settings(&self) -> AcquisitionSettings {
        self.settings_at(self.sampling_rate_ms)
    }

    /// Same buffering and waits with a different sampling period.
    pub fn settings_at(&self, sampling_rate_ms: u64) -> AcquisitionSettings {
        AcquisitionSettings {
            sampling_rate: Duration::from_millis(sampling_rate_ms),
            queue_capacity: self.queue_capacity,
            overflow: self.overflow,
            sample_wait: Duration::from_millis(self.sample_wait_ms),
            event_poll: Duration::from_millis(self.event_poll_ms),
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

// ============================================================================
// Login
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginConfig {
    pub retry_interval_ms: u64,
    /// Absent = retry until the controller hands out a session
    pub max_attempts: Option<u32>,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: defaults::LOGIN_RETRY_INTERVAL_MS,
            max_attempts: None,
        }
    }
}

impl LoginConfig {
    pub fn policy(&self) -> LoginPolicy {
        LoginPolicy {
            retry_interval: Duration::from_millis(self.retry_interval_ms),
            max_attempts: self.max_attempts,
        }
    }
}

// ============================================================================
// Analog
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalogConfig {
    pub name: String,
    pub sampling_rate_ms: u64,
    /// Input name -> channel
    pub inputs: BTreeMap<String, AnalogChannel>,
}

impl Default for AnalogConfig {
    fn default() -> Self {
        Self {
            name: defaults::ANALOG_NAME.to_string(),
            sampling_rate_ms: defaults::ANALOG_SAMPLING_RATE_MS,
            inputs: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = DaqConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.machine.port, 10_050);
        assert_eq!(config.acquisition.settings().sampling_rate, Duration::from_millis(100));
        assert_eq!(config.login.policy(), LoginPolicy::default());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: DaqConfig = toml::from_str(
            r#"
            [machine]
            host = "10.0.0.5"
            username = "op"

            response_timeout_ms = 2500

            [acquisition]
            overflow = "drop_oldest"
            "#,
        )
        .unwrap();

        assert_eq!(config.machine.host, "10.0.0.5");
        assert_eq!(config.machine.response_timeout_ms, 2_500);
        assert_eq!(config.machine.max_frame_bytes, defaults::MAX_FRAME_BYTES);
        assert_eq!(config.machine.name, "imm");
        assert_eq!(config.acquisition.overflow, OverflowPolicy::DropOldest);
        assert_eq!(config.acquisition.queue_capacity, defaults::QUEUE_CAPACITY);
        assert_eq!(config.analog.name, "revpi");
    }

    #[test]
    fn test_validation_collects_every_problem() {
        let mut config = DaqConfig::default();
        config.machine.port = 0;
        config.acquisition.sampling_rate_ms = 0;
        config.login.max_attempts = Some(0);

        match config.validate() {
            Err(ConfigError::Validation(errors)) => assert_eq!(errors.len(), 3),
            other => panic!("expected validation errors, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_response_timeout_rejected() {
        let mut config = DaqConfig::default();
        config.machine.response_timeout_ms = 0;

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("machine.response_timeout_ms"));
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = DaqConfig::load_from_file(Path::new("/nonexistent/imm_daq.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(..)));
        assert!(err.to_string().contains("/nonexistent/imm_daq.toml"));
    }

    #[test]
    fn test_load_from_file_with_parameter_table() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [[parameters]]
            name = "injection_pressure"
            enable = 1
            path_act_value = "act/p"
            path_set_value = "set/p"
            unit = "bar"

            [analog.inputs.force]
            pin = "InputValue_1"
            unit = "kN"
            conversion = 10.0
            "#
        )
        .unwrap();

        let config = DaqConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.parameters.len(), 1);
        assert_eq!(config.parameters[0].path_set_low_value, "");
        assert_eq!(config.analog.inputs["force"].conversion, 10.0);
    }

    #[test]
    fn test_duplicate_parameter_names_rejected() {
        let row = ParamRow {
            name: "p".to_string(),
            enable: 1,
            ..ParamRow::default()
        };
        let config = DaqConfig {
            parameters: vec![row.clone(), row],
            ..DaqConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_toml_round_trip_of_defaults() {
        let toml = DaqConfig::default().to_toml().unwrap();
        let parsed: DaqConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.machine.port, defaults::EMI_PORT);
        assert!(parsed.login.max_attempts.is_none());
    }
}
