//! Data source abstraction for acquisition workers.
//!
//! A source turns one request into one timestamped [`Sample`]. The engine
//! decides when to ask; the source decides how (EMI request, analog read).

use crate::sample::Sample;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    /// Remote end unreachable. The worker stops sampling until reconnected.
    #[error("Device unreachable: {0}")]
    Connection(String),

    /// Request went through but the answer was unusable.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Local input hardware failed to deliver a reading.
    #[error("Input error: {0}")]
    Hardware(String),
}

impl SourceError {
    /// Whether this error should park the worker.
    pub fn is_connection_fault(&self) -> bool {
        matches!(self, SourceError::Connection(_))
    }
}

/// Where samples come from.
///
/// Implementations must be safe to call from the worker task and from callers
/// of [`AcquisitionEngine::get_value`](super::AcquisitionEngine::get_value) at
/// the same time; serializing access to the underlying device is their job.
#[async_trait]
pub trait DataSource: Send + Sync + 'static {
    /// Restricts what one acquisition reads (a URI list, a channel set).
    /// `None` means "everything configured".
    type Selector: Send + Sync;

    /// Device name used for timestamp keys and logging.
    fn device_name(&self) -> &str;

    /// Take one sample.
    async fn acquire(&self, selector: Option<&Self::Selector>) -> Result<Sample, SourceError>;

    /// Cheap request that keeps an idle remote session open.
    async fn keep_alive(&self) -> Result<(), SourceError> {
        Ok(())
    }

    /// Longest period without traffic before [`keep_alive`](Self::keep_alive)
    /// is due. `None` for sources without a session.
    fn idle_timeout(&self) -> Option<Duration> {
        None
    }
}
