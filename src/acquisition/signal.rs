//! Cross-task signals used by the acquisition worker
//!
//! - [`TriggerSignal`]: level-triggered "state change requested" flag. Stays
//!   set until cleared; waiting on a set flag returns immediately.
//! - [`EventSignal`]: counting "sample now" signal. Every push is one queued
//!   edge, consumed by exactly one wait.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};

#[derive(Debug, Default)]
pub struct TriggerSignal {
    flag: AtomicBool,
    notify: Notify,
}

impl TriggerSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Wait until the flag is set or `timeout` elapses. Returns the flag.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before checking so a concurrent set() cannot slip between
        notified.as_mut().enable();

        if self.is_set() {
            return true;
        }
        let _ = tokio::time::timeout(timeout, notified).await;
        self.is_set()
    }
}

#[derive(Debug)]
pub struct EventSignal {
    edges: Semaphore,
}

impl Default for EventSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSignal {
    pub fn new() -> Self {
        Self {
            edges: Semaphore::new(0),
        }
    }

    /// Queue one edge.
    pub fn push(&self) {
        self.edges.add_permits(1);
    }

    /// Number of queued edges.
    pub fn pending(&self) -> usize {
        self.edges.available_permits()
    }

    /// Consume one edge, waiting at most `timeout`. Returns whether an edge
    /// was consumed.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, self.edges.acquire()).await {
            Ok(Ok(permit)) => {
                permit.forget();
                true
            }
            _ => false,
        }
    }

    /// Discard every queued edge and return how many there were.
    pub fn drain(&self) -> usize {
        let mut drained = 0;
        while let Ok(permit) = self.edges.try_acquire() {
            permit.forget();
            drained += 1;
        }
        drained
    }
}
