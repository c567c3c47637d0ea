//! Metrics Module
//!
//! Records client metrics through the `metrics` facade. The library installs
//! no recorder; the embedding application chooses an exporter and may call
//! [`describe_metrics`] once after installing it.
//!
//! # Metrics Categories
//!
//! - **Auth**: token refresh outcomes
//! - **Historical**: chunk outcomes and fetch latency, HTTP retries
//! - **Streaming**: messages by kind, decode errors, reconnects, sessions per state

use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

use crate::domain::streaming::SessionState;

/// Token refreshes by outcome.
pub const TOKEN_REFRESHES: &str = "ts_client_token_refreshes_total";
/// Chunk fetches by outcome.
pub const CHUNKS: &str = "ts_client_chunks_total";
/// Chunk fetch latency.
pub const CHUNK_FETCH_DURATION: &str = "ts_client_chunk_fetch_duration_seconds";
/// Stream messages by kind.
pub const STREAM_MESSAGES: &str = "ts_client_stream_messages_total";
/// Undecodable stream frames.
pub const STREAM_DECODE_ERRORS: &str = "ts_client_stream_decode_errors_total";
/// Stream reconnect attempts.
pub const STREAM_RECONNECTS: &str = "ts_client_stream_reconnects_total";
/// Sessions currently in each state.
pub const STREAM_STATE: &str = "ts_client_stream_state";
/// HTTP retries.
pub const HTTP_RETRIES: &str = "ts_client_http_retries_total";

// =============================================================================
// Metric Registration
// =============================================================================

/// Register descriptions with the installed recorder.
pub fn describe_metrics() {
    describe_counter!(TOKEN_REFRESHES, "Access token refreshes by outcome");

    describe_counter!(CHUNKS, "Historical chunk fetches by outcome");
    describe_histogram!(CHUNK_FETCH_DURATION, "Time to fetch one historical chunk");
    describe_counter!(HTTP_RETRIES, "REST calls retried after a transient failure");

    describe_counter!(STREAM_MESSAGES, "Stream messages received by kind");
    describe_counter!(STREAM_DECODE_ERRORS, "Stream frames skipped as undecodable");
    describe_counter!(STREAM_RECONNECTS, "Stream reconnect attempts");
    describe_gauge!(STREAM_STATE, "Stream sessions in each lifecycle state");
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

const fn outcome(success: bool) -> &'static str {
    if success { "success" } else { "failure" }
}

/// Record a token refresh.
pub fn record_token_refresh(success: bool) {
    counter!(TOKEN_REFRESHES, "outcome" => outcome(success)).increment(1);
}

/// Record one finished chunk.
pub fn record_chunk(outcome: &'static str, elapsed: Duration) {
    counter!(CHUNKS, "outcome" => outcome).increment(1);
    histogram!(CHUNK_FETCH_DURATION).record(elapsed.as_secs_f64());
}

/// Record an HTTP retry.
pub fn record_http_retry() {
    counter!(HTTP_RETRIES).increment(1);
}

/// Record a received stream message.
pub fn record_stream_message(kind: &'static str) {
    counter!(STREAM_MESSAGES, "kind" => kind).increment(1);
}

/// Record a skipped frame.
pub fn record_decode_error() {
    counter!(STREAM_DECODE_ERRORS).increment(1);
}

/// Record a reconnect attempt.
pub fn record_reconnect() {
    counter!(STREAM_RECONNECTS).increment(1);
}

/// Move one session from `from` to `to`.
pub fn record_state_change(from: SessionState, to: SessionState) {
    if from == to {
        return;
    }
    gauge!(STREAM_STATE, "state" => from.as_str()).decrement(1.0);
    gauge!(STREAM_STATE, "state" => to.as_str()).increment(1.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_labels() {
        assert_eq!(outcome(true), "success");
        assert_eq!(outcome(false), "failure");
    }

    #[test]
    fn recording_without_recorder_is_a_no_op() {
        describe_metrics();
        record_token_refresh(true);
        record_chunk("fetched", Duration::from_millis(5));
        record_state_change(SessionState::Connecting, SessionState::Connected);
    }
}
