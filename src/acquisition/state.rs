//! Acquisition states
//!
//! The requested state and the state the worker is actually in are kept apart.
//! Callers only ever write the requested state; the worker notices the
//! difference at the top of its loop and performs the transition.

use serde::{Deserialize, Serialize};

/// Operating mode of an acquisition worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionState {
    /// No sampling. Keeps the remote session alive if the source needs it.
    #[default]
    Idle,
    /// One sample per external trigger.
    Event,
    /// Fixed-rate sampling driven by the worker itself.
    InternalLogging,
}

impl std::fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AcquisitionState::Idle => write!(f, "IDLE"),
            AcquisitionState::Event => write!(f, "EVENT"),
            AcquisitionState::InternalLogging => write!(f, "INTERNAL_LOGGING"),
        }
    }
}

/// Current/requested pair. Requests are last-write-wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct StateCell {
    current: AcquisitionState,
    requested: AcquisitionState,
}

impl StateCell {
    pub fn current(&self) -> AcquisitionState {
        self.current
    }

    pub fn requested(&self) -> AcquisitionState {
        self.requested
    }

    pub fn request(&mut self, state: AcquisitionState) {
        self.requested = state;
    }

    /// Adopt the requested state if it differs from the current one and
    /// return the new state.
    pub fn take_transition(&mut self) -> Option<AcquisitionState> {
        if self.requested == self.current {
            return None;
        }
        self.current = self.requested;
        Some(self.current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_idle() {
        let cell = StateCell::default();
        assert_eq!(cell.current(), AcquisitionState::Idle);
        assert_eq!(cell.requested(), AcquisitionState::Idle);
    }

    #[test]
    fn test_last_request_wins() {
        let mut cell = StateCell::default();
        cell.request(AcquisitionState::Event);
        cell.request(AcquisitionState::InternalLogging);

        assert_eq!(cell.take_transition(), Some(AcquisitionState::InternalLogging));
        assert_eq!(cell.current(), AcquisitionState::InternalLogging);
        assert_eq!(cell.take_transition(), None);
    }

    #[test]
    fn test_request_of_current_state_is_not_a_transition() {
        let mut cell = StateCell::default();
        cell.request(AcquisitionState::Idle);
        assert_eq!(cell.take_transition(), None);
    }

    #[test]
    fn test_state_serializes_snake_case() {
        let json = serde_json::to_string(&AcquisitionState::InternalLogging).unwrap();
        assert_eq!(json, "\"internal_logging\"");
    }
}
