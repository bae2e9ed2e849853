//! `ServerSelectionEngine` - background probing and ranking of media servers.
//!
//! One probe task per process measures every configured endpoint on a fixed
//! interval and whenever connectivity comes back. Probes run concurrently;
//! their results are merged by the probing task alone, under the table lock,
//! and the resulting list is published as a whole value.

use super::health::{HealthTable, ServerHealthRecord};
use crate::config::{
    Config, DEFAULT_ERROR_RESET_WINDOW_SECONDS, DEFAULT_MAX_ERROR_COUNT,
    DEFAULT_PROBE_INTERVAL_SECONDS,
};
use crate::observability::metrics;
use crate::ports::{ConfigSource, EndpointProber, ProbeResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Probe cadence and health thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionSettings {
    pub probe_interval: Duration,
    pub error_reset_window: Duration,
    pub max_error_count: u32,
}

impl Default for SelectionSettings {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(DEFAULT_PROBE_INTERVAL_SECONDS),
            error_reset_window: Duration::from_secs(DEFAULT_ERROR_RESET_WINDOW_SECONDS),
            max_error_count: DEFAULT_MAX_ERROR_COUNT,
        }
    }
}

impl From<&Config> for SelectionSettings {
    fn from(config: &Config) -> Self {
        Self {
            probe_interval: Duration::from_secs(config.probe_interval_seconds),
            error_reset_window: Duration::from_secs(config.error_reset_window_seconds),
            max_error_count: config.max_error_count,
        }
    }
}

/// Ranks media-server endpoints by measured latency and recent errors.
pub struct ServerSelectionEngine {
    prober: Arc<dyn EndpointProber>,
    config: Arc<dyn ConfigSource>,
    settings: SelectionSettings,
    table: Mutex<HealthTable>,
    available: watch::Sender<Arc<[String]>>,
    pinned: watch::Sender<Option<String>>,
    network_available: AtomicBool,
    network_restored: Notify,
}

impl ServerSelectionEngine {
    /// Create an engine. Nothing is probed until [`Self::probe`] is called
    /// or the probe task is spawned.
    pub fn new(
        prober: Arc<dyn EndpointProber>,
        config: Arc<dyn ConfigSource>,
        settings: SelectionSettings,
    ) -> Arc<Self> {
        let (available, _) = watch::channel(Arc::<[String]>::from(Vec::new()));
        let (pinned, _) = watch::channel(None);
        Arc::new(Self {
            prober,
            config,
            settings,
            table: Mutex::new(HealthTable::new(
                settings.error_reset_window,
                settings.max_error_count,
            )),
            available,
            pinned,
            network_available: AtomicBool::new(true),
            network_restored: Notify::new(),
        })
    }

    /// Measure `candidates` once and republish the available list.
    #[instrument(skip_all, name = "call.selection.probe", fields(candidates = candidates.len()))]
    pub async fn probe(&self, candidates: &[String]) -> Arc<[String]> {
        let mut probes = JoinSet::new();
        for url in candidates {
            let prober = Arc::clone(&self.prober);
            let url = url.clone();
            probes.spawn(async move {
                let result = prober.measure(&url).await;
                (url, result, Instant::now())
            });
        }

        let mut results: Vec<(String, ProbeResult, Instant)> = Vec::with_capacity(candidates.len());
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok(outcome) => results.push(outcome),
                Err(e) => warn!(target: "call.selection", error = %e, "Probe task failed"),
            }
        }

        let urls: Arc<[String]> = {
            let mut table = self.table.lock().await;
            for (url, result, at) in &results {
                metrics::record_server_probe(
                    result.status.as_str(),
                    Duration::from_millis(result.latency_ms),
                );
                debug!(
                    target: "call.selection",
                    url = %url,
                    status = result.status.as_str(),
                    latency_ms = result.latency_ms,
                    "Probe measured"
                );
                table.record(url, *result, *at);
            }
            Arc::from(table.available_urls())
        };

        metrics::set_servers_available(urls.len());
        info!(
            target: "call.selection",
            probed = results.len(),
            available = urls.len(),
            "Server ranking updated"
        );
        self.available.send_replace(Arc::clone(&urls));
        urls
    }

    /// Probe the configured candidate list.
    pub async fn probe_configured(&self) -> Arc<[String]> {
        let candidates = self.config.candidate_server_urls();
        if candidates.is_empty() {
            debug!(target: "call.selection", "No candidate servers configured, skipping probe");
            return Arc::clone(&*self.available.borrow());
        }
        self.probe(&candidates).await
    }

    /// URLs a new call should try, in order.
    ///
    /// The pinned URL wins outright. Otherwise the last published ranking is
    /// used; if that is empty the table is re-read, and as a last resort the
    /// configured candidates are returned unranked.
    pub async fn available_server_urls(&self) -> Vec<String> {
        if let Some(pinned) = self.pinned_server() {
            return vec![pinned];
        }

        let cached = Arc::clone(&*self.available.borrow());
        if !cached.is_empty() {
            return cached.to_vec();
        }

        let refreshed = self.table.lock().await.available_urls();
        if !refreshed.is_empty() {
            self.available.send_replace(Arc::from(refreshed.clone()));
            return refreshed;
        }

        self.config.candidate_server_urls()
    }

    /// Pin (or with `None`, unpin) a server URL.
    pub fn set_pinned_server(&self, url: Option<String>) {
        info!(target: "call.selection", pinned = ?url, "Pinned server changed");
        self.pinned.send_replace(url);
    }

    #[must_use]
    pub fn pinned_server(&self) -> Option<String> {
        self.pinned.borrow().clone()
    }

    /// Observe the ranked list. The receiver always sees the latest value.
    #[must_use]
    pub fn subscribe_available(&self) -> watch::Receiver<Arc<[String]>> {
        self.available.subscribe()
    }

    /// Report host connectivity. A transition back to available triggers an
    /// out-of-cycle probe; ticks are skipped while offline.
    pub fn set_network_available(&self, available: bool) {
        let was_available = self.network_available.swap(available, Ordering::SeqCst);
        if available && !was_available {
            info!(target: "call.selection", "Network restored, scheduling probe");
            self.network_restored.notify_one();
        }
    }

    /// Copy of the health table.
    pub async fn health_snapshot(&self) -> Vec<ServerHealthRecord> {
        self.table.lock().await.records().to_vec()
    }

    /// Spawn the periodic probe task. The first probe runs immediately.
    pub fn spawn_probe_task(self: &Arc<Self>, cancel_token: CancellationToken) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.run_probe_loop(cancel_token).await })
    }

    #[instrument(skip_all, name = "call.selection.probe_loop")]
    async fn run_probe_loop(self: Arc<Self>, cancel_token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.settings.probe_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            target: "call.selection",
            interval_seconds = self.settings.probe_interval.as_secs(),
            "Probe task started"
        );

        loop {
            tokio::select! {
                () = cancel_token.cancelled() => {
                    info!(target: "call.selection", "Probe task received cancellation signal");
                    break;
                }
                _ = ticker.tick() => {
                    if self.network_available.load(Ordering::SeqCst) {
                        self.probe_configured().await;
                    } else {
                        debug!(target: "call.selection", "Network unavailable, skipping probe");
                    }
                }
                () = self.network_restored.notified() => {
                    self.probe_configured().await;
                    ticker.reset();
                }
            }
        }

        info!(target: "call.selection", "Probe task stopped");
    }
}
