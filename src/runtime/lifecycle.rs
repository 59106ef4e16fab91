//! Lifecycle state machine shared by the scheduler and its workers

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

use tracing::debug;

use super::errors::LifecycleError;

/// Lifecycle state of a scheduler or block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LifecycleState {
    Idle = 0,
    Initialising = 1,
    Running = 2,
    RequestedPause = 3,
    Paused = 4,
    RequestedStop = 5,
    Stopped = 6,
    Error = 7,
}

impl LifecycleState {
    /// Wire name used in control messages, e.g. `REQUESTED_STOP`
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Idle => "IDLE",
            LifecycleState::Initialising => "INITIALISED",
            LifecycleState::Running => "RUNNING",
            LifecycleState::RequestedPause => "REQUESTED_PAUSE",
            LifecycleState::Paused => "PAUSED",
            LifecycleState::RequestedStop => "REQUESTED_STOP",
            LifecycleState::Stopped => "STOPPED",
            LifecycleState::Error => "ERROR",
        }
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;

        if next == Error {
            return self != Idle;
        }
        matches!(
            (self, next),
            (Idle, Initialising)
                | (Initialising, Running)
                | (Initialising, RequestedStop)
                | (Running, RequestedPause)
                | (Running, RequestedStop)
                | (Running, Stopped)
                | (RequestedPause, Paused)
                | (RequestedPause, RequestedStop)
                | (Paused, Running)
                | (Paused, RequestedStop)
                | (RequestedStop, Stopped)
                | (Stopped, Idle)
                | (Error, Idle)
        )
    }

    /// States a client may ask for through a `LifecycleState` message
    pub fn is_requestable(self) -> bool {
        matches!(
            self,
            LifecycleState::RequestedStop | LifecycleState::RequestedPause | LifecycleState::Running
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, LifecycleState::Stopped | LifecycleState::Error)
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => LifecycleState::Idle,
            1 => LifecycleState::Initialising,
            2 => LifecycleState::Running,
            3 => LifecycleState::RequestedPause,
            4 => LifecycleState::Paused,
            5 => LifecycleState::RequestedStop,
            6 => LifecycleState::Stopped,
            _ => LifecycleState::Error,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleState {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IDLE" => Ok(LifecycleState::Idle),
            "INITIALISED" => Ok(LifecycleState::Initialising),
            "RUNNING" => Ok(LifecycleState::Running),
            "REQUESTED_PAUSE" => Ok(LifecycleState::RequestedPause),
            "PAUSED" => Ok(LifecycleState::Paused),
            "REQUESTED_STOP" => Ok(LifecycleState::RequestedStop),
            "STOPPED" => Ok(LifecycleState::Stopped),
            "ERROR" => Ok(LifecycleState::Error),
            other => Err(LifecycleError::UnknownState(other.to_string())),
        }
    }
}

/// Atomically updated lifecycle state
#[derive(Debug)]
pub struct Lifecycle {
    state: AtomicU8,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(LifecycleState::Idle as u8),
        }
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `to`, returning the previous state
    ///
    /// Requesting the current state again is a no-op.
    pub fn transition(&self, to: LifecycleState) -> Result<LifecycleState, LifecycleError> {
        let mut current = self.state();
        loop {
            if current == to {
                return Ok(current);
            }
            if !current.can_transition_to(to) {
                return Err(LifecycleError::InvalidTransition { from: current, to });
            }
            match self.state.compare_exchange(
                current as u8,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    debug!("Lifecycle {} -> {}", current, to);
                    return Ok(current);
                }
                Err(actual) => current = LifecycleState::from_u8(actual),
            }
        }
    }

    /// Enter `Error` unconditionally
    pub fn force_error(&self) {
        let previous = self.state.swap(LifecycleState::Error as u8, Ordering::AcqRel);
        debug!("Lifecycle {} -> ERROR", LifecycleState::from_u8(previous));
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
