//! Metrics definitions for the call engine.
//!
//! All metrics follow Prometheus naming conventions:
//! - `call_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded by closed enums:
//! - `actor_type`: 2 values (registry, session)
//! - `status`: 8 call statuses, or 2 probe statuses
//! - `topic`: 11 control topics
//! - `error_type`: bounded by `CallError` variants
//!
//! Room ids, URLs and identities are never used as labels.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;

/// Install the Prometheus recorder and return its handle.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    prometheus_builder()?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

/// Install the Prometheus recorder with its own scrape listener on `addr`.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns error if the recorder or the listener fails to install.
pub fn init_metrics_exporter(addr: SocketAddr) -> Result<(), String> {
    prometheus_builder()?
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter on {addr}: {e}"))
}

fn prometheus_builder() -> Result<PrometheusBuilder, String> {
    PrometheusBuilder::new()
        // Probe latency buckets - cross-network round trips
        .set_buckets_for_metric(
            Matcher::Prefix("call_server_probe".to_string()),
            &[
                0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000,
            ],
        )
        .map_err(|e| format!("Failed to set probe latency buckets: {e}"))?
        // Call duration buckets - minutes to hours
        .set_buckets_for_metric(
            Matcher::Prefix("call_duration".to_string()),
            &[
                10.0, 30.0, 60.0, 300.0, 600.0, 1800.0, 3600.0, 7200.0,
            ],
        )
        .map_err(|e| format!("Failed to set call duration buckets: {e}"))
}

// ============================================================================
// Server Selection
// ============================================================================

/// Record one endpoint probe.
///
/// Metrics: `call_server_probes_total` (labels: `status`),
/// `call_server_probe_latency_seconds` (successful probes only)
///
/// Cardinality: 2 (success, error)
pub fn record_server_probe(status: &str, latency: Duration) {
    counter!("call_server_probes_total", "status" => status.to_string()).increment(1);
    if status == "success" {
        histogram!("call_server_probe_latency_seconds").record(latency.as_secs_f64());
    }
}

/// Set the number of servers currently considered available.
///
/// Metric: `call_servers_available`
/// Labels: none
pub fn set_servers_available(count: usize) {
    // usize to f64 conversion is safe for realistic server counts
    #[allow(clippy::cast_precision_loss)]
    gauge!("call_servers_available").set(count as f64);
}

// ============================================================================
// Signaling
// ============================================================================

/// Record a control message encoded or decoded.
///
/// Metric: `call_control_messages_total`
/// Labels: `direction` (inbound, outbound), `topic`
///
/// Cardinality: 22 (2 directions x 11 topics)
pub fn record_control_message(direction: &str, topic: &str) {
    counter!("call_control_messages_total",
        "direction" => direction.to_string(),
        "topic" => topic.to_string()
    )
    .increment(1);
}

/// Record a control message dropped instead of sent or delivered.
///
/// Metric: `call_control_messages_dropped_total`
/// Labels: `direction`, `reason`
pub fn record_control_message_dropped(direction: &str, reason: &str) {
    counter!("call_control_messages_dropped_total",
        "direction" => direction.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

// ============================================================================
// Sessions
// ============================================================================

/// Record a transport connect attempt.
///
/// Metric: `call_connect_attempts_total`
/// Labels: `outcome` (success, network_error, rejected, error)
pub fn record_connect_attempt(outcome: &str) {
    counter!("call_connect_attempts_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record an error surfaced to session observers.
///
/// Metric: `call_errors_total`
/// Labels: `error_type`
pub fn record_call_error(error_type: &str) {
    counter!("call_errors_total", "error_type" => error_type.to_string()).increment(1);
}

/// Record a session status transition.
///
/// Metric: `call_status_transitions_total`
/// Labels: `status` (the status entered)
///
/// Cardinality: 8
pub fn record_status_transition(status: &str) {
    counter!("call_status_transitions_total", "status" => status.to_string()).increment(1);
}

/// Record connected time of a finished call.
///
/// Metric: `call_duration_seconds`
/// Labels: none
pub fn record_call_duration(duration: Duration) {
    histogram!("call_duration_seconds").record(duration.as_secs_f64());
}

/// Set the number of calls held by the registry.
///
/// Metric: `call_registry_calls`
/// Labels: none
pub fn set_calls_registered(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("call_registry_calls").set(count as f64);
}

/// Set the mailbox depth for an actor type.
///
/// Metric: `call_actor_mailbox_depth`
/// Labels: `actor_type` (registry, session)
///
/// High values indicate the actor is falling behind.
pub fn set_actor_mailbox_depth(actor_type: &str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("call_actor_mailbox_depth", "actor_type" => actor_type.to_string()).set(depth as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    // These tests execute the recording functions against the global no-op
    // recorder; values are checked in the debugging-recorder test below.

    #[test]
    fn test_record_server_probe() {
        record_server_probe("success", Duration::from_millis(40));
        record_server_probe("error", Duration::ZERO);
        set_servers_available(0);
        set_servers_available(3);
    }

    #[test]
    fn test_record_control_messages() {
        record_control_message("outbound", "chat");
        record_control_message("inbound", "raise-hand");
        record_control_message_dropped("outbound", "no_key");
        record_control_message_dropped("inbound", "decrypt");
    }

    #[test]
    fn test_record_session_metrics() {
        record_connect_attempt("success");
        record_connect_attempt("network_error");
        record_call_error("connection");
        record_status_transition("connected");
        record_call_duration(Duration::from_secs(95));
        set_calls_registered(2);
        set_actor_mailbox_depth("session", 4);
    }

    #[test]
    fn test_metrics_reach_recorder() {
        use metrics_util::debugging::DebuggingRecorder;

        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_server_probe("success", Duration::from_millis(12));
            set_servers_available(2);
            record_control_message("outbound", "chat");
            record_connect_attempt("success");
            record_status_transition("connected");
            record_call_duration(Duration::from_secs(60));
            set_actor_mailbox_depth("registry", 1);
        });

        let names: Vec<String> = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .map(|(key, _, _, _)| key.key().name().to_string())
            .collect();

        for expected in [
            "call_server_probes_total",
            "call_server_probe_latency_seconds",
            "call_servers_available",
            "call_control_messages_total",
            "call_connect_attempts_total",
            "call_status_transitions_total",
            "call_duration_seconds",
            "call_actor_mailbox_depth",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {expected}");
        }
    }
}
