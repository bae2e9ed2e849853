//! Call Probe
//!
//! Standalone diagnostics daemon for media-server selection.
//!
//! Runs the `ServerSelectionEngine` against the configured server URLs with
//! an HTTP prober and logs every change of the ranked list. Probe metrics
//! are exported for Prometheus on `CALL_METRICS_BIND_ADDRESS`.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Install the Prometheus exporter
//! 3. Build the HTTP prober and the selection engine
//! 4. Spawn the probe task and the ranking reporter
//! 5. Wait for shutdown signal

#![warn(clippy::pedantic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use call_engine::config::Config;
use call_engine::observability::init_metrics_exporter;
use call_engine::ports::ConfigSource;
use call_engine::selection::{HttpProber, SelectionSettings, ServerSelectionEngine};
use tokio::signal;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Upper bound on waiting for background tasks after cancellation.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "call_engine=info,call_probe=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting call probe");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        servers = config.server_urls.len(),
        pinned = ?config.pinned_server_url,
        probe_interval_seconds = config.probe_interval_seconds,
        probe_timeout_seconds = config.probe_timeout_seconds,
        metrics_bind_address = %config.metrics_bind_address,
        "Configuration loaded successfully"
    );

    if config.server_urls.is_empty() {
        warn!("CALL_SERVER_URLS is empty, only the pinned server will be reported");
    }

    let metrics_addr: SocketAddr = config
        .metrics_bind_address
        .parse()
        .with_context(|| format!("invalid metrics bind address {}", config.metrics_bind_address))?;
    init_metrics_exporter(metrics_addr).map_err(|e| {
        error!(error = %e, "Failed to install Prometheus exporter");
        anyhow::anyhow!(e)
    })?;
    info!(addr = %metrics_addr, "Prometheus exporter listening");

    let prober = HttpProber::new(Duration::from_secs(config.probe_timeout_seconds))
        .context("failed to build HTTP prober")?;
    let settings = SelectionSettings::from(&config);
    let pinned = config.pinned_server_url.clone();
    let config: Arc<dyn ConfigSource> = Arc::new(config);

    let engine = ServerSelectionEngine::new(Arc::new(prober), config, settings);
    engine.set_pinned_server(pinned);

    let shutdown_token = CancellationToken::new();
    let probe_task = engine.spawn_probe_task(shutdown_token.child_token());
    let report_task = tokio::spawn(report_rankings(
        engine.subscribe_available(),
        shutdown_token.child_token(),
    ));

    info!("Call probe running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, stopping probe task...");
    shutdown_token.cancel();

    let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
        let _ = probe_task.await;
        let _ = report_task.await;
    })
    .await;
    if drained.is_err() {
        warn!(
            grace_secs = SHUTDOWN_GRACE.as_secs(),
            "Background tasks did not stop in time"
        );
    }

    for record in engine.health_snapshot().await {
        info!(
            url = %record.url,
            status = record.status.as_str(),
            latency_ms = record.last_response_time_ms,
            error_count = record.consecutive_error_count,
            "Final server health"
        );
    }

    info!("Call probe shutdown complete");
    Ok(())
}

/// Log the ranked list each time the engine publishes a new one.
async fn report_rankings(
    mut available: watch::Receiver<Arc<[String]>>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel_token.cancelled() => break,
            changed = available.changed() => {
                if changed.is_err() {
                    break;
                }
                let ranked = Arc::clone(&*available.borrow_and_update());
                if ranked.is_empty() {
                    warn!("No media server is currently available");
                } else {
                    info!(ranked = ?ranked, "Available servers updated");
                }
            }
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
