//! Observability for the call engine.
//!
//! Instrumentation uses `#[instrument(skip_all)]` with explicit field
//! allow-listing; key material never reaches a span or a log line. Metric
//! labels are bounded (see [`metrics`]).
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `call_server_probes_total` | Counter | `status` | Endpoint probe outcomes |
//! | `call_server_probe_latency_seconds` | Histogram | none | Probe round-trip time |
//! | `call_servers_available` | Gauge | none | Size of the available list |
//! | `call_control_messages_total` | Counter | `direction`, `topic` | Control traffic |
//! | `call_control_messages_dropped_total` | Counter | `direction`, `reason` | Undeliverable control messages |
//! | `call_connect_attempts_total` | Counter | `outcome` | Transport connect attempts |
//! | `call_errors_total` | Counter | `error_type` | Errors surfaced to observers |
//! | `call_status_transitions_total` | Counter | `status` | Session status changes |
//! | `call_duration_seconds` | Histogram | none | Connected time per call |
//! | `call_registry_calls` | Gauge | none | Calls known to the registry |
//! | `call_actor_mailbox_depth` | Gauge | `actor_type` | Backpressure per actor type |

pub mod metrics;

pub use metrics::{init_metrics_exporter, init_metrics_recorder};
