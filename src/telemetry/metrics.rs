//! Metric instrument factories for regbot-controller.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments come from the `"regbot-controller"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("regbot-controller")
}

/// Counter: control-channel messages.
/// Labels: `action`, `result` ("registered" | "duplicate" | "unregistered" | "ignored" | "invalid").
pub fn registry_events() -> Counter<u64> {
    meter()
        .u64_counter("regbot.registry.events")
        .with_description("Control-channel messages received")
        .build()
}

/// Counter: controller state transitions.
/// Labels: `from`, `to`.
pub fn state_transitions() -> Counter<u64> {
    meter()
        .u64_counter("regbot.controller.state_transitions")
        .with_description("Number of controller state transitions")
        .build()
}

/// Counter: assignment rounds.
/// Labels: `result` ("ok" | "noop" | "error").
pub fn assignment_rounds() -> Counter<u64> {
    meter()
        .u64_counter("regbot.assignment.rounds")
        .with_description("Assignment rounds run")
        .build()
}

/// Counter: MSISDNs handed to workers.
pub fn msisdns_assigned() -> Counter<u64> {
    meter()
        .u64_counter("regbot.assignment.msisdns")
        .with_description("MSISDNs included in assignment messages")
        .build()
}

/// Counter: inventory change checks.
/// Labels: `result` ("changed" | "unchanged" | "error").
pub fn inventory_polls() -> Counter<u64> {
    meter()
        .u64_counter("regbot.inventory.polls")
        .with_description("Inventory change checks")
        .build()
}

/// Histogram: assignment round duration in milliseconds.
pub fn assignment_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("regbot.assignment.duration_ms")
        .with_description("Assignment round duration in milliseconds")
        .with_unit("ms")
        .build()
}
