//! Prometheus Metrics Module
//!
//! Exposes playback metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Sessions**: Active playback sessions per data set
//! - **Delivery**: Records and frames sent to clients
//! - **Commands**: Client commands handled, by command name
//! - **Errors**: Source failures surfaced to sessions
//! - **Latency**: Time spent reading and flushing one tick
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the main listener.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Later calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_gauge!(
        "thermal_active_sessions",
        "Number of open playback sessions"
    );
    describe_counter!(
        "thermal_sessions_total",
        "Total playback sessions opened"
    );

    describe_counter!(
        "thermal_records_emitted_total",
        "Total records delivered to clients"
    );
    describe_counter!(
        "thermal_frames_sent_total",
        "Total WebSocket frames sent by message kind"
    );

    describe_counter!(
        "thermal_commands_total",
        "Total client commands handled by command name"
    );
    describe_counter!(
        "thermal_broadcasts_total",
        "Total broadcast payloads relayed"
    );

    describe_counter!(
        "thermal_source_errors_total",
        "Total time-series source failures"
    );

    describe_histogram!(
        "thermal_tick_duration_seconds",
        "Time to read and flush one playback tick"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a session opening.
pub fn record_session_opened(data_set: &str) {
    counter!("thermal_sessions_total", "data_set" => data_set.to_string()).increment(1);
}

/// Update the active session count of a data set.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_sessions(data_set: &str, count: usize) {
    gauge!("thermal_active_sessions", "data_set" => data_set.to_string()).set(count as f64);
}

/// Record records delivered to a client.
pub fn record_records_emitted(data_set: &str, count: u64) {
    if count == 0 {
        return;
    }
    counter!("thermal_records_emitted_total", "data_set" => data_set.to_string()).increment(count);
}

/// Record a frame sent, labelled by message kind.
pub fn record_frame_sent(kind: &'static str) {
    counter!("thermal_frames_sent_total", "kind" => kind).increment(1);
}

/// Record a handled client command.
pub fn record_command(data_set: &str, command: &'static str) {
    counter!(
        "thermal_commands_total",
        "data_set" => data_set.to_string(),
        "command" => command
    )
    .increment(1);
}

/// Record a relayed broadcast.
pub fn record_broadcast(data_set: &str) {
    counter!("thermal_broadcasts_total", "data_set" => data_set.to_string()).increment(1);
}

/// Record source failures.
pub fn record_source_errors(data_set: &str, count: u64) {
    if count == 0 {
        return;
    }
    counter!("thermal_source_errors_total", "data_set" => data_set.to_string()).increment(count);
}

/// Record the duration of one tick.
pub fn record_tick_duration(data_set: &str, duration: Duration) {
    histogram!("thermal_tick_duration_seconds", "data_set" => data_set.to_string())
        .record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
