//! Sample acquisition
//!
//! Device-agnostic machinery that turns a [`DataSource`] into a stream of
//! timestamped samples: a state machine driven by a background worker, the
//! signals used to steer it, and the bounded queue it fills.

pub mod engine;
pub mod queue;
pub mod signal;
pub mod source;
pub mod state;

pub use engine::{AcquisitionEngine, AcquisitionSettings, EngineStats, WorkerStatus};
pub use queue::{OverflowPolicy, PushOutcome, SampleQueue};
pub use signal::{EventSignal, TriggerSignal};
pub use source::{DataSource, SourceError};
pub use state::AcquisitionState;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a std mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
