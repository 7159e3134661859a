//! Event bus metrics.

use metrics::{counter, describe_counter};

/// Metric names for the event bus.
pub mod names {
    /// Events published.
    pub const EVENTS_PUBLISHED_TOTAL: &str = "events_published_total";
    /// Handler invocations that failed or panicked.
    pub const EVENT_HANDLER_FAILURES_TOTAL: &str = "event_handler_failures_total";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(names::EVENTS_PUBLISHED_TOTAL, "Total number of events published");
    describe_counter!(
        names::EVENT_HANDLER_FAILURES_TOTAL,
        "Total number of failed event handler invocations"
    );
}

/// Event bus metrics recorder.
#[derive(Clone, Copy, Debug)]
pub struct EventMetrics;

impl EventMetrics {
    /// Record a published event.
    pub fn event_published(event_type: &str) {
        counter!(names::EVENTS_PUBLISHED_TOTAL, "type" => event_type.to_string()).increment(1);
    }

    /// Record a handler failure.
    pub fn handler_failed(handler: &str) {
        counter!(names::EVENT_HANDLER_FAILURES_TOTAL, "handler" => handler.to_string()).increment(1);
    }
}
