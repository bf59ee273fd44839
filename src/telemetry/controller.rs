//! Span helpers for the controller's rounds and polls.

use opentelemetry::KeyValue;
use tracing::Span;

use super::metrics;

/// Start a span for one assignment round.
///
/// `assignment.msisdns` is declared empty and filled in once the inventory
/// has been read.
pub fn start_assignment_span(workers: usize) -> Span {
    tracing::info_span!(
        "assignment.round",
        "assignment.workers" = workers,
        "assignment.msisdns" = tracing::field::Empty,
    )
}

/// Start a span for one inventory change check.
pub fn start_inventory_span() -> Span {
    tracing::info_span!("inventory.poll", "inventory.changed" = tracing::field::Empty)
}

/// Emit a state transition event and count it.
pub fn record_state_transition(from: &str, to: &str) {
    tracing::info!(from = from, to = to, "state_transition");
    metrics::state_transitions().add(
        1,
        &[
            KeyValue::new("from", from.to_string()),
            KeyValue::new("to", to.to_string()),
        ],
    );
}
