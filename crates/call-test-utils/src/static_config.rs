//! Fixed configuration source.

use call_engine::config::IdleTimeouts;
use call_engine::ports::ConfigSource;
use std::time::Duration;

/// [`ConfigSource`] with values set by the test.
#[derive(Debug, Clone, Default)]
pub struct StaticConfig {
    pub server_urls: Vec<String>,
    pub idle_timeouts: IdleTimeouts,
    pub use_quic_signal: bool,
    pub e2ee_enabled: bool,
}

impl StaticConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_servers(mut self, urls: &[&str]) -> Self {
        self.server_urls = urls.iter().map(|u| (*u).to_string()).collect();
        self
    }

    #[must_use]
    pub fn with_idle_timeouts(mut self, solo_member: Duration, silence: Duration) -> Self {
        self.idle_timeouts = IdleTimeouts {
            solo_member,
            silence,
        };
        self
    }

    #[must_use]
    pub fn with_e2ee(mut self) -> Self {
        self.e2ee_enabled = true;
        self
    }

    #[must_use]
    pub fn with_quic_signal(mut self) -> Self {
        self.use_quic_signal = true;
        self
    }
}

impl ConfigSource for StaticConfig {
    fn candidate_server_urls(&self) -> Vec<String> {
        self.server_urls.clone()
    }

    fn idle_timeouts(&self) -> IdleTimeouts {
        self.idle_timeouts
    }

    fn use_quic_signal(&self) -> bool {
        self.use_quic_signal
    }

    fn e2ee_enabled(&self) -> bool {
        self.e2ee_enabled
    }
}
