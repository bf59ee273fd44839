//! Controller state machine.
//!
//! [`StateMachine`] holds the current [`ControllerState`] and the debounce
//! deadline. It never sleeps: callers pass the current instant in and ask
//! when the deadline falls due, which keeps it deterministic under test.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::telemetry::controller::record_state_transition;

/// Lifecycle state of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ControllerState {
    /// Inventory not yet loaded.
    Initializing,
    /// Ready, no assignment round pending.
    Idle,
    /// Registry changed; waiting for the debounce window to pass quietly.
    PendingAssignment,
    /// An assignment round is running.
    Assigning,
}

impl ControllerState {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: ControllerState) -> bool {
        use ControllerState::*;
        matches!(
            (self, to),
            (Initializing, Idle)
                | (Idle, PendingAssignment)
                | (PendingAssignment, PendingAssignment) // debounce re-armed
                | (PendingAssignment, Assigning)
                | (PendingAssignment, Idle)   // registry emptied
                | (Idle, Idle)                // registry emptied while idle
                | (Assigning, Idle)
        )
    }
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ControllerState::Initializing => "initializing",
            ControllerState::Idle => "idle",
            ControllerState::PendingAssignment => "pending-assignment",
            ControllerState::Assigning => "assigning",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone)]
pub struct StateMachine {
    state: ControllerState,
    debounce: Duration,
    deadline: Option<Instant>,
}

impl StateMachine {
    pub fn new(debounce: Duration) -> Self {
        Self {
            state: ControllerState::Initializing,
            debounce,
            deadline: None,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// When the armed debounce window elapses, if one is armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// First inventory load finished.
    pub fn mark_ready(&mut self) -> Result<()> {
        self.transition(ControllerState::Idle)
    }

    /// The registry changed at `now` and now holds `workers` entries.
    ///
    /// With workers left this (re)arms the window from `now`; an empty
    /// registry goes straight to `Idle` and disarms it.
    pub fn registry_changed(&mut self, now: Instant, workers: usize) -> Result<()> {
        if workers == 0 {
            self.transition(ControllerState::Idle)?;
            self.deadline = None;
        } else {
            self.transition(ControllerState::PendingAssignment)?;
            self.deadline = Some(now + self.debounce);
        }
        Ok(())
    }

    /// The registry was wiped because a new snapshot was adopted.
    pub fn registry_cleared(&mut self) -> Result<()> {
        match self.state {
            ControllerState::Idle | ControllerState::PendingAssignment => {
                self.deadline = None;
                self.transition(ControllerState::Idle)
            }
            // Nothing pending to cancel while initializing or mid-round.
            _ => Ok(()),
        }
    }

    /// Enter `Assigning` if the window has elapsed at `now`.
    ///
    /// Returns `Ok(false)` when no deadline is armed or it is still in the
    /// future. Entering from any state but `PendingAssignment` is an error.
    pub fn begin_assignment(&mut self, now: Instant) -> Result<bool> {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                self.transition(ControllerState::Assigning)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// The assignment round ended, successfully or not.
    pub fn finish_assignment(&mut self) -> Result<()> {
        if self.state != ControllerState::Assigning {
            return Err(Error::InvalidTransition {
                from: self.state,
                to: ControllerState::Idle,
            });
        }
        self.transition(ControllerState::Idle)
    }

    fn transition(&mut self, to: ControllerState) -> Result<()> {
        let from = self.state;
        if !from.can_transition_to(to) {
            return Err(Error::InvalidTransition { from, to });
        }
        self.state = to;
        if from != to {
            record_state_transition(&from.to_string(), &to.to_string());
        }
        Ok(())
    }
}
