//! Orchestration engine: state machine, assignment rounds, controller loop.

pub mod assign;
pub mod controller;
pub mod state;

pub use assign::{AssignmentSummary, allocation_sizes, assign_tasks};
pub use controller::{Controller, ControllerConfig};
pub use state::{ControllerState, StateMachine};
