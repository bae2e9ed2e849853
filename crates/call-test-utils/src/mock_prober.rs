//! Scriptable endpoint prober.
//!
//! Each URL answers from a queue of results. The last queued result sticks,
//! so a single `set` makes a URL answer the same way forever. Unknown URLs
//! probe as errors.
//!
//! ```rust,ignore
//! let prober = MockProber::new()
//!     .with_results("https://a", [ProbeResult::error(), ProbeResult::success(40)]);
//! ```

use async_trait::async_trait;
use call_engine::ports::{EndpointProber, ProbeResult};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// [`EndpointProber`] answering from per-URL scripts.
#[derive(Default)]
pub struct MockProber {
    scripts: Mutex<HashMap<String, VecDeque<ProbeResult>>>,
    measured: Mutex<Vec<String>>,
}

impl MockProber {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `results` for `url`.
    #[must_use]
    pub fn with_results(self, url: &str, results: impl IntoIterator<Item = ProbeResult>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .extend(results);
        self
    }

    /// Replace the script of `url` with a single sticky result.
    pub fn set(&self, url: &str, result: ProbeResult) {
        self.scripts
            .lock()
            .unwrap()
            .insert(url.to_string(), VecDeque::from([result]));
    }

    /// Number of probes made against `url`.
    #[must_use]
    pub fn probe_count(&self, url: &str) -> usize {
        self.measured
            .lock()
            .unwrap()
            .iter()
            .filter(|u| *u == url)
            .count()
    }

    /// Total number of probes made.
    #[must_use]
    pub fn total_probes(&self) -> usize {
        self.measured.lock().unwrap().len()
    }
}

#[async_trait]
impl EndpointProber for MockProber {
    async fn measure(&self, url: &str) -> ProbeResult {
        self.measured.lock().unwrap().push(url.to_string());

        let mut scripts = self.scripts.lock().unwrap();
        let Some(script) = scripts.get_mut(url) else {
            return ProbeResult::error();
        };
        if script.len() > 1 {
            script.pop_front().unwrap_or_else(ProbeResult::error)
        } else {
            script.front().copied().unwrap_or_else(ProbeResult::error)
        }
    }
}
