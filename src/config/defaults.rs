//! System-wide default constants.
//!
//! Every configurable value falls back to one of these when the TOML file
//! omits it. Grouped by subsystem for easy discovery.

// ============================================================================
// Machine (EMI controller)
// ============================================================================

/// Device name of the machine controller; keys its `timestamp_<name>` entry.
pub const MACHINE_NAME: &str = "imm";

/// Controller address used when none is configured.
pub const MACHINE_HOST: &str = "127.0.0.1";

/// TCP port of the EMI service on a CC300 controller.
pub const EMI_PORT: u16 = 10_050;

/// Longest wait for the answer to one request (ms). A controller that stays
/// silent this long is treated as gone.
pub const RESPONSE_TIMEOUT_MS: u64 = 5_000;

/// Largest response accepted before the delimiter (bytes).
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

// ============================================================================
// Acquisition
// ============================================================================

/// Period between samples in INTERNAL_LOGGING (ms).
pub const SAMPLING_RATE_MS: u64 = 100;

/// Idle time after which the controller drops a session (s). The worker sends
/// a keep-alive once this much time has passed without a protocol action.
pub const IDLE_TIMEOUT_SECS: u64 = 10;

/// Sample queue bound.
///
/// 10 000 samples = 1 000 s of logging at the default rate.
pub const QUEUE_CAPACITY: usize = 10_000;

/// Longest wait for a queued sample (ms).
pub const SAMPLE_WAIT_MS: u64 = 100;

/// Wait quantum for event edges while in EVENT (ms).
pub const EVENT_POLL_MS: u64 = 100;

/// Wait quantum while the worker has nothing to do (analog IDLE, parked on a
/// connection fault) (ms).
pub const PARK_INTERVAL_MS: u64 = 1_000;

// ============================================================================
// Login
// ============================================================================

/// Pause between login attempts that returned no session id (ms).
pub const LOGIN_RETRY_INTERVAL_MS: u64 = 1_000;

// ============================================================================
// Analog inputs
// ============================================================================

/// Device name of the analog I/O controller.
pub const ANALOG_NAME: &str = "revpi";

/// Period between analog samples in INTERNAL_LOGGING (ms).
pub const ANALOG_SAMPLING_RATE_MS: u64 = 500;

/// Raw-to-engineering-unit divisor when an input does not set one.
pub const ANALOG_CONVERSION: f64 = 1.0;

// ============================================================================
// Configuration
// ============================================================================

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "IMM_DAQ_CONFIG";

/// Config file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "imm_daq.toml";
