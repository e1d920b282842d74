//! Bounded FIFO of acquired samples
//!
//! The worker pushes without ever blocking; consumers pop with a bounded wait.
//! When the queue is full the [`OverflowPolicy`] decides which sample is lost.

use super::lock;
use crate::sample::Sample;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Keep the backlog, discard the incoming sample.
    #[default]
    DropNewest,
    /// Evict the oldest queued sample to make room.
    DropOldest,
}

/// Result of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    DroppedNewest,
    DroppedOldest,
}

impl PushOutcome {
    pub fn lost_sample(self) -> bool {
        !matches!(self, PushOutcome::Queued)
    }
}

#[derive(Debug)]
pub struct SampleQueue {
    samples: Mutex<VecDeque<Sample>>,
    capacity: usize,
    policy: OverflowPolicy,
    available: Notify,
}

impl SampleQueue {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            policy,
            available: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        lock(&self.samples).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.samples).is_empty()
    }

    pub fn push(&self, sample: Sample) -> PushOutcome {
        let outcome = {
            let mut samples = lock(&self.samples);
            if samples.len() < self.capacity {
                samples.push_back(sample);
                PushOutcome::Queued
            } else {
                match self.policy {
                    OverflowPolicy::DropNewest => PushOutcome::DroppedNewest,
                    OverflowPolicy::DropOldest => {
                        samples.pop_front();
                        samples.push_back(sample);
                        PushOutcome::DroppedOldest
                    }
                }
            }
        };
        if outcome != PushOutcome::DroppedNewest {
            self.available.notify_waiters();
        }
        outcome
    }

    pub fn try_pop(&self) -> Option<Sample> {
        lock(&self.samples).pop_front()
    }

    /// Pop the oldest sample, waiting at most `timeout` for one to arrive.
    pub async fn pop_timeout(&self, timeout: Duration) -> Option<Sample> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(sample) = self.try_pop() {
                return Some(sample);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_pop();
            }
        }
    }

    /// Remove and return everything, oldest first.
    pub fn drain(&self) -> Vec<Sample> {
        lock(&self.samples).drain(..).collect()
    }

    pub fn clear(&self) {
        lock(&self.samples).clear();
    }
}
