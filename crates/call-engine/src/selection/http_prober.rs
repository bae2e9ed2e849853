//! HTTP reachability prober.

use crate::ports::{EndpointProber, ProbeResult};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Connect timeout for probe requests.
const PROBE_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Measures round-trip time of a plain `GET` against the endpoint.
///
/// Any HTTP response counts as reachable; only transport failures
/// (DNS, TLS, connect, timeout) count as errors.
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    /// Build a prober with the given per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(PROBE_CONNECT_TIMEOUT.min(timeout))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl EndpointProber for HttpProber {
    async fn measure(&self, url: &str) -> ProbeResult {
        let started = Instant::now();
        match self.client.get(url).send().await {
            Ok(response) => {
                let elapsed = started.elapsed();
                debug!(
                    target: "call.selection.http",
                    url = %url,
                    status = response.status().as_u16(),
                    elapsed_ms = elapsed.as_millis(),
                    "Probe response"
                );
                ProbeResult::success(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
            }
            Err(e) => {
                debug!(target: "call.selection.http", url = %url, error = %e, "Probe failed");
                ProbeResult::error()
            }
        }
    }
}
