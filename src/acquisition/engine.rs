//! Acquisition engine: one background worker per device
//!
//! The worker owns the timing loop. Callers steer it by requesting states,
//! triggering events, and consuming samples from the bounded queue.
//!
//! ## Worker loop
//!
//! Each iteration first adopts a pending state request (clearing the
//! state-change flag and discarding queued event edges), then runs one step of
//! the current state:
//!
//! - **IDLE**: wait on the state-change flag until the idle budget runs out,
//!   then send a keep-alive.
//! - **EVENT**: wait (bounded) for an event edge; sample if no state change is
//!   pending at that moment.
//! - **INTERNAL_LOGGING**: sample, then wait for the rest of the period.
//!
//! A connection fault parks the worker in [`WorkerStatus::Unreachable`]. State
//! requests are still tracked while parked; sampling resumes after
//! [`AcquisitionEngine::clear_fault`].

use super::lock;
use super::queue::{OverflowPolicy, SampleQueue};
use super::signal::{EventSignal, TriggerSignal};
use super::source::{DataSource, SourceError};
use super::state::{AcquisitionState, StateCell};
use crate::config::defaults;
use crate::sample::{collect_series, Sample, SampleSeries};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// ============================================================================
// Settings and status
// ============================================================================

/// Timing and buffering parameters of one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquisitionSettings {
    /// Period between samples in INTERNAL_LOGGING.
    pub sampling_rate: Duration,
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
    /// Longest wait of [`AcquisitionEngine::get_sample`].
    pub sample_wait: Duration,
    /// Wait quantum for event edges in EVENT.
    pub event_poll: Duration,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            sampling_rate: Duration::from_millis(defaults::SAMPLING_RATE_MS),
            queue_capacity: defaults::QUEUE_CAPACITY,
            overflow: OverflowPolicy::default(),
            sample_wait: Duration::from_millis(defaults::SAMPLE_WAIT_MS),
            event_poll: Duration::from_millis(defaults::EVENT_POLL_MS),
        }
    }
}

/// Health of the worker task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkerStatus {
    NotStarted,
    Running,
    Unreachable { reason: String },
    Stopped,
}

/// Counters since the engine was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub samples_acquired: u64,
    pub samples_dropped: u64,
    pub keep_alives: u64,
    pub transitions: u64,
}

#[derive(Debug, Default)]
struct Counters {
    samples_acquired: AtomicU64,
    samples_dropped: AtomicU64,
    keep_alives: AtomicU64,
    transitions: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> EngineStats {
        EngineStats {
            samples_acquired: self.samples_acquired.load(Ordering::Relaxed),
            samples_dropped: self.samples_dropped.load(Ordering::Relaxed),
            keep_alives: self.keep_alives.load(Ordering::Relaxed),
            transitions: self.transitions.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Shared state
// ============================================================================

struct Shared<S: DataSource> {
    source: S,
    settings: AcquisitionSettings,
    state: Mutex<StateCell>,
    state_change: TriggerSignal,
    events: EventSignal,
    queue: SampleQueue,
    /// Time of the last protocol action (sample, keep-alive, direct read).
    last_action: Mutex<Option<Instant>>,
    status: Mutex<WorkerStatus>,
    counters: Counters,
    cancel: CancellationToken,
}

impl<S: DataSource> Shared<S> {
    fn touch(&self) {
        *lock(&self.last_action) = Some(Instant::now());
    }

    fn since_last_action(&self) -> Option<Duration> {
        lock(&self.last_action).map(|t| t.elapsed())
    }

    fn is_parked(&self) -> bool {
        matches!(*lock(&self.status), WorkerStatus::Unreachable { .. })
    }

    fn mark_unreachable(&self, error: &SourceError) {
        warn!(
            device = %self.source.device_name(),
            error = %error,
            "Device unreachable, sampling suspended"
        );
        *lock(&self.status) = WorkerStatus::Unreachable {
            reason: error.to_string(),
        };
    }

    fn handle_error(&self, error: &SourceError, action: &str) {
        if error.is_connection_fault() {
            self.mark_unreachable(error);
        } else {
            warn!(device = %self.source.device_name(), error = %error, action, "Acquisition step failed");
        }
    }

    /// Wait on the state-change flag, or until cancelled.
    async fn wait_for_state_change(&self, timeout: Duration) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = self.state_change.wait_timeout(timeout) => {}
        }
    }

    async fn acquire_into_queue(&self) {
        self.touch();
        match self.source.acquire(None).await {
            Ok(sample) => {
                if self.queue.push(sample).lost_sample() {
                    self.counters.samples_dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        device = %self.source.device_name(),
                        capacity = self.queue.capacity(),
                        "Sample queue full, sample dropped"
                    );
                } else {
                    self.counters.samples_acquired.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(e) => self.handle_error(&e, "acquire"),
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Per-device acquisition controller.
pub struct AcquisitionEngine<S: DataSource> {
    shared: Arc<Shared<S>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<S: DataSource> AcquisitionEngine<S> {
    pub fn new(source: S, settings: AcquisitionSettings) -> Self {
        let shared = Shared {
            queue: SampleQueue::new(settings.queue_capacity, settings.overflow),
            source,
            settings,
            state: Mutex::new(StateCell::default()),
            state_change: TriggerSignal::new(),
            events: EventSignal::new(),
            last_action: Mutex::new(None),
            status: Mutex::new(WorkerStatus::NotStarted),
            counters: Counters::default(),
            cancel: CancellationToken::new(),
        };
        Self {
            shared: Arc::new(shared),
            worker: Mutex::new(None),
        }
    }

    /// Spawn the worker task. Has no effect if it is already running or was
    /// shut down. Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut worker = lock(&self.worker);
        if worker.is_some() || self.shared.cancel.is_cancelled() {
            return;
        }
        *lock(&self.shared.status) = WorkerStatus::Running;
        info!(
            device = %self.shared.source.device_name(),
            rate_ms = self.shared.settings.sampling_rate.as_millis() as u64,
            "Acquisition worker started"
        );
        *worker = Some(tokio::spawn(run_worker(Arc::clone(&self.shared))));
    }

    /// Stop the worker and wait for it to exit. An in-flight acquisition is
    /// allowed to finish.
    pub async fn shutdown(&self) {
        self.shared.cancel.cancel();
        self.shared.state_change.set();
        let handle = lock(&self.worker).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(device = %self.shared.source.device_name(), error = %e, "Acquisition worker panicked");
            }
        }
        *lock(&self.shared.status) = WorkerStatus::Stopped;
    }

    pub fn source(&self) -> &S {
        &self.shared.source
    }

    pub fn settings(&self) -> AcquisitionSettings {
        self.shared.settings
    }

    pub fn status(&self) -> WorkerStatus {
        lock(&self.shared.status).clone()
    }

    pub fn stats(&self) -> EngineStats {
        self.shared.counters.snapshot()
    }

    pub fn current_state(&self) -> AcquisitionState {
        lock(&self.shared.state).current()
    }

    pub fn requested_state(&self) -> AcquisitionState {
        lock(&self.shared.state).requested()
    }

    /// Request a state. The worker adopts it at its next loop iteration.
    pub fn set_state(&self, state: AcquisitionState) {
        lock(&self.shared.state).request(state);
        self.shared.state_change.set();
        // Wake a worker blocked on an event edge
        self.shared.events.push();
        debug!(device = %self.shared.source.device_name(), requested = %state, "State requested");
    }

    /// Request one sample. Only honoured while the worker is in EVENT.
    pub fn trigger_event(&self) -> bool {
        if self.current_state() != AcquisitionState::Event {
            debug!(device = %self.shared.source.device_name(), "Trigger ignored outside EVENT");
            return false;
        }
        self.shared.events.push();
        true
    }

    /// Back to IDLE with an empty queue and no pending edges.
    pub fn reset(&self) {
        self.set_state(AcquisitionState::Idle);
        self.shared.queue.clear();
        self.shared.events.drain();
    }

    /// Resume sampling after a connection fault was repaired. Triggers that
    /// arrived while the device was unreachable are discarded.
    pub fn clear_fault(&self) {
        let mut status = lock(&self.shared.status);
        if matches!(*status, WorkerStatus::Unreachable { .. }) {
            let stale = self.shared.events.drain();
            *status = WorkerStatus::Running;
            drop(status);
            info!(
                device = %self.shared.source.device_name(),
                discarded_edges = stale,
                "Device reachable again, sampling resumed"
            );
            self.shared.state_change.set();
        }
    }

    /// Take one queued sample, waiting at most `sample_wait`.
    pub async fn get_sample(&self) -> Option<Sample> {
        self.shared
            .queue
            .pop_timeout(self.shared.settings.sample_wait)
            .await
    }

    /// Drain the queue into one sequence per key.
    pub fn pop_all_samples(&self) -> SampleSeries {
        collect_series(self.drain_samples())
    }

    /// Drain the queue, oldest first.
    pub fn drain_samples(&self) -> Vec<Sample> {
        self.shared.queue.drain()
    }

    pub fn queue_is_empty(&self) -> bool {
        self.shared.queue.is_empty()
    }

    pub fn queue_len(&self) -> usize {
        self.shared.queue.len()
    }

    /// Record a protocol action made outside the engine (a write, a
    /// diagnostic query) so the idle keep-alive is not sent needlessly.
    pub fn note_action(&self) {
        self.shared.touch();
    }

    /// Read directly from the source, bypassing the queue. Counts as a protocol
    /// action for the idle keep-alive.
    pub async fn get_value(&self, selector: Option<&S::Selector>) -> Result<Sample, SourceError> {
        self.shared.touch();
        let result = self.shared.source.acquire(selector).await;
        if let Err(e) = &result {
            if e.is_connection_fault() {
                self.shared.mark_unreachable(e);
            }
        }
        result
    }
}

impl<S: DataSource> Drop for AcquisitionEngine<S> {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

// ============================================================================
// Worker
// ============================================================================

async fn run_worker<S: DataSource>(shared: Arc<Shared<S>>) {
    let device = shared.source.device_name().to_string();
    let mut last_logged: Option<Instant> = None;

    while !shared.cancel.is_cancelled() {
        shared.state_change.clear();
        let transition = lock(&shared.state).take_transition();
        if let Some(state) = transition {
            let discarded = shared.events.drain();
            shared.counters.transitions.fetch_add(1, Ordering::Relaxed);
            if state == AcquisitionState::InternalLogging {
                last_logged = None;
            }
            info!(device = %device, state = %state, discarded_edges = discarded, "Changed to new state");
        }

        if shared.is_parked() {
            shared
                .wait_for_state_change(Duration::from_millis(defaults::PARK_INTERVAL_MS))
                .await;
            continue;
        }

        let current = lock(&shared.state).current();
        match current {
            AcquisitionState::Idle => idle_step(&shared).await,
            AcquisitionState::Event => event_step(&shared).await,
            AcquisitionState::InternalLogging => logging_step(&shared, &mut last_logged).await,
        }
    }

    debug!(device = %device, "Acquisition worker exiting");
}

async fn idle_step<S: DataSource>(shared: &Shared<S>) {
    let Some(budget) = shared.source.idle_timeout() else {
        shared
            .wait_for_state_change(Duration::from_millis(defaults::PARK_INTERVAL_MS))
            .await;
        return;
    };

    match shared.since_last_action() {
        Some(elapsed) if elapsed < budget => {
            shared.wait_for_state_change(budget - elapsed).await;
        }
        _ => {
            shared.touch();
            match shared.source.keep_alive().await {
                Ok(()) => {
                    shared.counters.keep_alives.fetch_add(1, Ordering::Relaxed);
                    debug!(device = %shared.source.device_name(), "Keep-alive sent");
                }
                Err(e) => shared.handle_error(&e, "keep_alive"),
            }
        }
    }
}

async fn event_step<S: DataSource>(shared: &Shared<S>) {
    let fired = tokio::select! {
        _ = shared.cancel.cancelled() => false,
        fired = shared.events.wait_timeout(shared.settings.event_poll) => fired,
    };
    // The flag is read after the edge was consumed; an edge that raced with a
    // state request is spent without sampling.
    if fired && !shared.state_change.is_set() {
        shared.acquire_into_queue().await;
    }
}

async fn logging_step<S: DataSource>(shared: &Shared<S>, last_logged: &mut Option<Instant>) {
    let rate = shared.settings.sampling_rate;
    let due = last_logged.map_or(true, |t| t.elapsed() >= rate);
    if due {
        *last_logged = Some(Instant::now());
        shared.acquire_into_queue().await;
    }

    let remaining = last_logged.map_or(Duration::ZERO, |t| rate.saturating_sub(t.elapsed()));
    if !remaining.is_zero() {
        shared.wait_for_state_change(remaining).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::SampleValue;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Counts calls and records when each acquisition started.
    #[derive(Default)]
    struct CountingSource {
        acquisitions: Mutex<Vec<Instant>>,
        keep_alives: AtomicUsize,
        idle_timeout: Option<Duration>,
    }

    #[async_trait]
    impl DataSource for CountingSource {
        type Selector = Vec<String>;

        fn device_name(&self) -> &str {
            "mock"
        }

        async fn acquire(&self, _selector: Option<&Vec<String>>) -> Result<Sample, SourceError> {
            let mut acquisitions = self.acquisitions.lock().unwrap();
            acquisitions.push(Instant::now());
            let n = acquisitions.len() as f64;
            Ok(Sample::new("mock", chrono::Local::now()).with_value("n", SampleValue::Number(n)))
        }

        async fn keep_alive(&self) -> Result<(), SourceError> {
            self.keep_alives.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn idle_timeout(&self) -> Option<Duration> {
            self.idle_timeout
        }
    }

    fn settings(rate_ms: u64) -> AcquisitionSettings {
        AcquisitionSettings {
            sampling_rate: Duration::from_millis(rate_ms),
            ..AcquisitionSettings::default()
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_requested_state_is_adopted() {
        let engine = AcquisitionEngine::new(CountingSource::default(), settings(100));
        engine.start();

        engine.set_state(AcquisitionState::Event);
        engine.set_state(AcquisitionState::InternalLogging);
        settle().await;

        assert_eq!(engine.current_state(), AcquisitionState::InternalLogging);
        assert_eq!(engine.status(), WorkerStatus::Running);
        engine.shutdown().await;
        assert_eq!(engine.status(), WorkerStatus::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_logging_respects_sampling_rate() {
        let engine = AcquisitionEngine::new(CountingSource::default(), settings(100));
        engine.start();
        engine.set_state(AcquisitionState::InternalLogging);

        tokio::time::sleep(Duration::from_millis(1_050)).await;
        engine.set_state(AcquisitionState::Idle);
        settle().await;

        let starts = engine.source().acquisitions.lock().unwrap().clone();
        assert!((10..=12).contains(&starts.len()), "got {} samples", starts.len());
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(100));
        }
        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_outside_event_is_ignored() {
        let engine = AcquisitionEngine::new(CountingSource::default(), settings(100));
        engine.start();
        settle().await;

        assert!(!engine.trigger_event());
        settle().await;
        assert!(engine.queue_is_empty());
        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_trigger_yields_one_sample() {
        let engine = AcquisitionEngine::new(CountingSource::default(), settings(100));
        engine.start();
        engine.set_state(AcquisitionState::Event);
        settle().await;

        assert!(engine.trigger_event());
        let sample = engine.get_sample().await.unwrap();
        assert_eq!(sample.get("n"), Some(&SampleValue::Number(1.0)));
        assert!(engine.get_sample().await.is_none());
        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_sends_keep_alive_after_budget() {
        let source = CountingSource {
            idle_timeout: Some(Duration::from_secs(10)),
            ..CountingSource::default()
        };
        let engine = AcquisitionEngine::new(source, settings(100));
        engine.start();

        // First iteration has no prior action, so the keep-alive goes out at once
        settle().await;
        assert_eq!(engine.source().keep_alives.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(engine.source().keep_alives.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(engine.source().keep_alives.load(Ordering::SeqCst), 2);
        assert_eq!(engine.stats().keep_alives, 2);
        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_clears_queue() {
        let engine = AcquisitionEngine::new(CountingSource::default(), settings(50));
        engine.start();
        engine.set_state(AcquisitionState::InternalLogging);
        tokio::time::sleep(Duration::from_millis(300)).await;

        engine.reset();
        settle().await;

        assert_eq!(engine.current_state(), AcquisitionState::Idle);
        assert!(engine.queue_is_empty());
        engine.shutdown().await;
    }
}
