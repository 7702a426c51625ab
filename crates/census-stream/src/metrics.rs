//! Stream metrics.
//!
//! Recorded through the `metrics` facade; nothing is collected unless the
//! application installs a recorder (see `census-telemetry`).
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `census_stream_messages_total` | Counter | `kind` | Messages routed |
//! | `census_stream_reconnects_total` | Counter | - | Reconnection attempts |
//! | `census_stream_decode_failures_total` | Counter | `payload_type` | Recognised messages that failed to decode |
//! | `census_stream_handler_failures_total` | Counter | `payload_type` | Handler errors and panics |
//! | `census_stream_duplicates_suppressed_total` | Counter | `payload_type` | Messages vetoed as duplicates |
//! | `census_stream_handler_duration_seconds` | Histogram | `payload_type` | Fan-out duration per message |
//! | `census_stream_outstanding_dispatches` | Gauge | - | Dispatches in flight |

use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

use crate::payload::PayloadKind;

/// Messages routed, by kind.
pub const MESSAGES_TOTAL: &str = "census_stream_messages_total";
/// Reconnection attempts.
pub const RECONNECTS_TOTAL: &str = "census_stream_reconnects_total";
/// Decode failures.
pub const DECODE_FAILURES_TOTAL: &str = "census_stream_decode_failures_total";
/// Handler failures.
pub const HANDLER_FAILURES_TOTAL: &str = "census_stream_handler_failures_total";
/// Duplicates suppressed.
pub const DUPLICATES_SUPPRESSED_TOTAL: &str = "census_stream_duplicates_suppressed_total";
/// Fan-out duration.
pub const HANDLER_DURATION_SECONDS: &str = "census_stream_handler_duration_seconds";
/// Dispatches in flight.
pub const OUTSTANDING_DISPATCHES: &str = "census_stream_outstanding_dispatches";

/// Register descriptions for every stream metric with the installed recorder.
pub fn describe_metrics() {
    describe_counter!(MESSAGES_TOTAL, "Total number of inbound messages routed");
    describe_counter!(RECONNECTS_TOTAL, "Total number of reconnection attempts");
    describe_counter!(
        DECODE_FAILURES_TOTAL,
        "Recognised messages that could not be decoded"
    );
    describe_counter!(
        HANDLER_FAILURES_TOTAL,
        "Handler invocations that returned an error or panicked"
    );
    describe_counter!(
        DUPLICATES_SUPPRESSED_TOTAL,
        "Messages dropped by duplicate suppression"
    );
    describe_histogram!(
        HANDLER_DURATION_SECONDS,
        "Time to run every handler for one payload"
    );
    describe_gauge!(OUTSTANDING_DISPATCHES, "Dispatches currently in flight");
}

/// Records one routed message.
pub fn record_message(kind: PayloadKind) {
    counter!(MESSAGES_TOTAL, "kind" => kind.as_str()).increment(1);
}

/// Records a reconnection attempt.
pub fn record_reconnect() {
    counter!(RECONNECTS_TOTAL).increment(1);
}

/// Records a decode failure.
pub fn record_decode_failure(payload_type: &'static str) {
    counter!(DECODE_FAILURES_TOTAL, "payload_type" => payload_type).increment(1);
}

/// Records a failed handler invocation.
pub fn record_handler_failure(payload_type: &'static str) {
    counter!(HANDLER_FAILURES_TOTAL, "payload_type" => payload_type).increment(1);
}

/// Records a suppressed duplicate.
pub fn record_duplicate(payload_type: &'static str) {
    counter!(DUPLICATES_SUPPRESSED_TOTAL, "payload_type" => payload_type).increment(1);
}

/// Records how long one fan-out took.
pub fn record_dispatch_duration(payload_type: &'static str, duration: Duration) {
    histogram!(HANDLER_DURATION_SECONDS, "payload_type" => payload_type)
        .record(duration.as_secs_f64());
}

/// Sets the number of dispatches in flight.
#[allow(clippy::cast_precision_loss)]
pub fn set_outstanding(count: usize) {
    gauge!(OUTSTANDING_DISPATCHES).set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        describe_metrics();
        record_message(PayloadKind::Control);
        record_reconnect();
        record_decode_failure("Heartbeat");
        record_handler_failure("Heartbeat");
        record_duplicate("Heartbeat");
        record_dispatch_duration("Heartbeat", Duration::from_millis(3));
        set_outstanding(2);
    }

    #[test]
    fn test_metric_names_are_prefixed() {
        for name in [
            MESSAGES_TOTAL,
            RECONNECTS_TOTAL,
            DECODE_FAILURES_TOTAL,
            HANDLER_FAILURES_TOTAL,
            DUPLICATES_SUPPRESSED_TOTAL,
            HANDLER_DURATION_SECONDS,
            OUTSTANDING_DISPATCHES,
        ] {
            assert!(name.starts_with("census_stream_"), "{name}");
        }
    }
}
