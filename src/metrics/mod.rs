//! Prometheus counters for the executor, the poller and change dispatch.
//!
//! Counters live in the process-wide default registry; [`render`] returns the text exposition
//! for whatever HTTP surface the embedding application provides.

use lazy_static::lazy_static;
use prometheus::register_int_counter;
use prometheus::register_int_counter_vec;
use prometheus::Encoder;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::TextEncoder;
use tracing::warn;

lazy_static! {
    pub static ref OPERATION_SUCCESSES: IntCounterVec = register_int_counter_vec!(
        "notify_operation_successes_total",
        "Storage operations that succeeded, by operation kind",
        &["kind"]
    )
    .expect("metric can not be created");

    pub static ref OPERATION_FAILURES: IntCounterVec = register_int_counter_vec!(
        "notify_operation_failures_total",
        "Failed storage operation attempts, by operation kind and failure category",
        &["kind", "category"]
    )
    .expect("metric can not be created");

    pub static ref CIRCUIT_OPENED: IntCounter = register_int_counter!(
        "notify_circuit_opened_total",
        "Transitions of the circuit breaker into OPEN"
    )
    .expect("metric can not be created");

    pub static ref CHANGE_EVENTS: IntCounterVec = register_int_counter_vec!(
        "notify_change_events_total",
        "Change events detected, by change type and source",
        &["change_type", "source"]
    )
    .expect("metric can not be created");

    pub static ref POLL_TICKS: IntCounter = register_int_counter!(
        "notify_poll_ticks_total",
        "Scheduler ticks that issued reads"
    )
    .expect("metric can not be created");

    pub static ref POLL_FAILURES: IntCounter = register_int_counter!(
        "notify_poll_failures_total",
        "Per-key poll reads that failed after retries"
    )
    .expect("metric can not be created");
}

/// Text exposition of every registered metric
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
