//! Connection state machine for the push endpoint.
//!
//! State transitions follow the connection lifecycle:
//! IDLE → CONNECTING → OPEN → RECONNECTING → OPEN ...
//!
//! RECONNECTING covers both the backoff wait and the retry itself. Once the
//! retry budget is spent the connection lands in FAILED and stays there until
//! a manual `connect()`. `disconnect()` returns to IDLE from anywhere.

use crate::error::{DashboardError, DashboardResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Observable states of the push connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// No connection and none scheduled.
    #[default]
    Idle,
    /// First connection attempt in progress.
    Connecting,
    /// Socket open, frames flowing.
    Open,
    /// Socket lost; waiting for or performing a retry.
    Reconnecting,
    /// Retry budget exhausted; a manual refresh is required.
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Connecting => write!(f, "CONNECTING"),
            Self::Open => write!(f, "OPEN"),
            Self::Reconnecting => write!(f, "RECONNECTING"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

impl ConnectionState {
    /// Check if a transition to `target` is valid from the current state.
    #[must_use]
    pub fn can_transition_to(&self, target: ConnectionState) -> bool {
        use ConnectionState::{Connecting, Failed, Idle, Open, Reconnecting};

        matches!(
            (self, target),
            (Idle, Connecting)
                | (Connecting, Open)
                | (Connecting, Reconnecting)
                | (Connecting, Failed)
                | (Open, Reconnecting)
                | (Reconnecting, Open)
                | (Reconnecting, Reconnecting)
                | (Reconnecting, Failed)
                // Manual reconnect after giving up
                | (Failed, Connecting)
                // disconnect() is valid from everywhere
                | (_, Idle)
        )
    }

    /// Returns true while frames can arrive.
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Returns true if background work (a socket or a pending retry) exists.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Open | Self::Reconnecting)
    }

    /// Short label for the Live/Offline indicator.
    #[must_use]
    pub fn indicator(&self) -> &'static str {
        if self.is_live() {
            "Live"
        } else {
            "Offline"
        }
    }
}

/// State machine wrapper tracking retry attempts.
#[derive(Debug, Clone, Default)]
pub struct ConnectionStateMachine {
    current: ConnectionState,
    previous: Option<ConnectionState>,
    attempt: u32,
    transition_count: u64,
}

impl ConnectionStateMachine {
    /// Create a new state machine starting in IDLE.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.current
    }

    /// Get the previous state (if any transition occurred).
    #[must_use]
    pub fn previous_state(&self) -> Option<ConnectionState> {
        self.previous
    }

    /// Number of consecutive retries since the last successful open.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Get total number of transitions.
    #[must_use]
    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Attempt a state transition.
    ///
    /// Entering OPEN resets the retry counter; entering RECONNECTING bumps it.
    pub fn transition(&mut self, target: ConnectionState) -> DashboardResult<()> {
        if !self.current.can_transition_to(target) {
            return Err(DashboardError::InvalidStateTransition {
                from: self.current.to_string(),
                to: target.to_string(),
            });
        }

        match target {
            ConnectionState::Open | ConnectionState::Idle | ConnectionState::Connecting => {
                self.attempt = 0;
            }
            ConnectionState::Reconnecting => self.attempt += 1,
            ConnectionState::Failed => {}
        }

        self.previous = Some(self.current);
        self.current = target;
        self.transition_count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut sm = ConnectionStateMachine::new();
        assert_eq!(sm.state(), ConnectionState::Idle);

        assert!(sm.transition(ConnectionState::Connecting).is_ok());
        assert!(sm.transition(ConnectionState::Open).is_ok());
        assert!(sm.state().is_live());
        assert_eq!(sm.transition_count(), 2);
    }

    #[test]
    fn test_reconnect_counts_attempts() {
        let mut sm = ConnectionStateMachine::new();
        sm.transition(ConnectionState::Connecting).unwrap();
        sm.transition(ConnectionState::Open).unwrap();

        sm.transition(ConnectionState::Reconnecting).unwrap();
        sm.transition(ConnectionState::Reconnecting).unwrap();
        assert_eq!(sm.attempt(), 2);

        // A successful open resets the budget
        sm.transition(ConnectionState::Open).unwrap();
        assert_eq!(sm.attempt(), 0);
        assert_eq!(sm.previous_state(), Some(ConnectionState::Reconnecting));
    }

    #[test]
    fn test_failed_requires_manual_connect() {
        let mut sm = ConnectionStateMachine::new();
        sm.transition(ConnectionState::Connecting).unwrap();
        sm.transition(ConnectionState::Reconnecting).unwrap();
        sm.transition(ConnectionState::Failed).unwrap();

        assert!(sm.transition(ConnectionState::Open).is_err());
        assert!(sm.transition(ConnectionState::Reconnecting).is_err());
        assert!(sm.transition(ConnectionState::Connecting).is_ok());
    }

    #[test]
    fn test_invalid_transition() {
        let mut sm = ConnectionStateMachine::new();
        let result = sm.transition(ConnectionState::Open);
        assert_eq!(
            result,
            Err(DashboardError::InvalidStateTransition {
                from: "IDLE".into(),
                to: "OPEN".into(),
            })
        );
        assert_eq!(sm.state(), ConnectionState::Idle);
    }

    #[test]
    fn test_disconnect_from_anywhere() {
        for state in [
            ConnectionState::Connecting,
            ConnectionState::Open,
            ConnectionState::Reconnecting,
            ConnectionState::Failed,
        ] {
            assert!(state.can_transition_to(ConnectionState::Idle), "{state}");
        }
    }

    #[test]
    fn test_indicator() {
        assert_eq!(ConnectionState::Open.indicator(), "Live");
        assert_eq!(ConnectionState::Reconnecting.indicator(), "Offline");
        assert!(!ConnectionState::Failed.is_active());
    }
}
