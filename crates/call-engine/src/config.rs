//! Call engine configuration.
//!
//! Configuration is loaded from environment variables. The application
//! token is redacted in Debug output.

use crate::ports::ConfigSource;
use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default interval between background endpoint probes (5 minutes).
pub const DEFAULT_PROBE_INTERVAL_SECONDS: u64 = 300;

/// Default window after the last error before a healthy probe clears the error count (15 minutes).
pub const DEFAULT_ERROR_RESET_WINDOW_SECONDS: u64 = 900;

/// Default number of consecutive errors that excludes an endpoint.
pub const DEFAULT_MAX_ERROR_COUNT: u32 = 3;

/// Default budget for the start-call response after connecting.
pub const DEFAULT_START_RESPONSE_TIMEOUT_SECONDS: u64 = 15;

/// Default time a participant may sit alone in a call before the no-activity prompt.
pub const DEFAULT_SOLO_MEMBER_TIMEOUT_SECONDS: u64 = 300;

/// Default silence duration before the no-activity prompt.
pub const DEFAULT_SILENCE_TIMEOUT_SECONDS: u64 = 300;

/// Default time a one-on-one call waits for the peer to answer.
pub const DEFAULT_UNANSWERED_TIMEOUT_SECONDS: u64 = 60;

/// Default time a one-on-one call survives after the peer left.
pub const DEFAULT_LEAVE_TIMEOUT_SECONDS: u64 = 60;

/// Default minimum spacing between poor-connection advisories.
pub const DEFAULT_QUALITY_ADVISORY_INTERVAL_SECONDS: u64 = 60;

/// Default per-request timeout of the HTTP endpoint prober.
pub const DEFAULT_PROBE_TIMEOUT_SECONDS: u64 = 10;

/// Default metrics endpoint bind address for the `call-probe` daemon.
pub const DEFAULT_METRICS_BIND_ADDRESS: &str = "0.0.0.0:9464";

/// Idle-detection timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleTimeouts {
    /// How long the local user may be the only participant.
    pub solo_member: Duration,
    /// How long a call with remote participants may stay silent.
    pub silence: Duration,
}

impl Default for IdleTimeouts {
    fn default() -> Self {
        Self {
            solo_member: Duration::from_secs(DEFAULT_SOLO_MEMBER_TIMEOUT_SECONDS),
            silence: Duration::from_secs(DEFAULT_SILENCE_TIMEOUT_SECONDS),
        }
    }
}

/// Call engine configuration.
///
/// Loaded from environment variables with sensible defaults.
#[derive(Clone)]
pub struct Config {
    /// Token presented to the media server on connect.
    /// Protected by `SecretString` to prevent accidental logging.
    pub app_token: SecretString,

    /// Candidate media-server URLs, in configured priority order.
    pub server_urls: Vec<String>,

    /// Manually pinned media-server URL, bypassing selection.
    pub pinned_server_url: Option<String>,

    /// Interval between background probes (default: 300).
    pub probe_interval_seconds: u64,

    /// Error reset window in seconds (default: 900).
    pub error_reset_window_seconds: u64,

    /// Consecutive errors that exclude an endpoint (default: 3).
    pub max_error_count: u32,

    /// Per-request timeout of the HTTP prober (default: 10).
    pub probe_timeout_seconds: u64,

    /// Start-call response budget in seconds (default: 15).
    pub start_response_timeout_seconds: u64,

    /// Solo-member idle timeout in seconds (default: 300).
    pub solo_member_timeout_seconds: u64,

    /// Silence idle timeout in seconds (default: 300).
    pub silence_timeout_seconds: u64,

    /// One-on-one unanswered timeout in seconds (default: 60).
    pub unanswered_timeout_seconds: u64,

    /// One-on-one peer-left timeout in seconds (default: 60).
    pub leave_timeout_seconds: u64,

    /// Minimum spacing of poor-connection advisories in seconds (default: 60).
    pub quality_advisory_interval_seconds: u64,

    /// Whether the transport should prefer the QUIC signaling path.
    pub use_quic_signal: bool,

    /// Whether control messages and media are end-to-end encrypted.
    pub e2ee_enabled: bool,

    /// Metrics endpoint bind address (default: "0.0.0.0:9464").
    pub metrics_bind_address: String,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("app_token", &"[REDACTED]")
            .field("server_urls", &self.server_urls)
            .field("pinned_server_url", &self.pinned_server_url)
            .field("probe_interval_seconds", &self.probe_interval_seconds)
            .field(
                "error_reset_window_seconds",
                &self.error_reset_window_seconds,
            )
            .field("max_error_count", &self.max_error_count)
            .field("probe_timeout_seconds", &self.probe_timeout_seconds)
            .field(
                "start_response_timeout_seconds",
                &self.start_response_timeout_seconds,
            )
            .field(
                "solo_member_timeout_seconds",
                &self.solo_member_timeout_seconds,
            )
            .field("silence_timeout_seconds", &self.silence_timeout_seconds)
            .field(
                "unanswered_timeout_seconds",
                &self.unanswered_timeout_seconds,
            )
            .field("leave_timeout_seconds", &self.leave_timeout_seconds)
            .field(
                "quality_advisory_interval_seconds",
                &self.quality_advisory_interval_seconds,
            )
            .field("use_quic_signal", &self.use_quic_signal)
            .field("e2ee_enabled", &self.e2ee_enabled)
            .field("metrics_bind_address", &self.metrics_bind_address)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

fn parse_or<T: std::str::FromStr>(vars: &HashMap<String, String>, key: &str, default: T) -> T {
    vars.get(key)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_flag(vars: &HashMap<String, String>, key: &str, default: bool) -> bool {
    match vars.get(key).map(|s| s.trim().to_ascii_lowercase()) {
        Some(v) if v == "1" || v == "true" || v == "yes" => true,
        Some(v) if v == "0" || v == "false" || v == "no" => false,
        _ => default,
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let app_token = SecretString::from(
            vars.get("CALL_APP_TOKEN")
                .ok_or_else(|| ConfigError::MissingEnvVar("CALL_APP_TOKEN".to_string()))?
                .clone(),
        );

        let server_urls: Vec<String> = vars
            .get("CALL_SERVER_URLS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|url| !url.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        if let Some(bad) = server_urls
            .iter()
            .find(|url| !url.starts_with("https://") && !url.starts_with("http://"))
        {
            return Err(ConfigError::InvalidValue(format!(
                "CALL_SERVER_URLS entry is not an http(s) URL: {bad}"
            )));
        }

        let pinned_server_url = vars
            .get("CALL_PINNED_SERVER_URL")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let max_error_count = parse_or(vars, "CALL_MAX_ERROR_COUNT", DEFAULT_MAX_ERROR_COUNT);
        if max_error_count == 0 {
            return Err(ConfigError::InvalidValue(
                "CALL_MAX_ERROR_COUNT must be at least 1".to_string(),
            ));
        }

        let probe_interval_seconds = parse_or(
            vars,
            "CALL_PROBE_INTERVAL_SECONDS",
            DEFAULT_PROBE_INTERVAL_SECONDS,
        );
        if probe_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "CALL_PROBE_INTERVAL_SECONDS must be at least 1".to_string(),
            ));
        }

        let metrics_bind_address = vars
            .get("CALL_METRICS_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_METRICS_BIND_ADDRESS.to_string());

        Ok(Config {
            app_token,
            server_urls,
            pinned_server_url,
            probe_interval_seconds,
            error_reset_window_seconds: parse_or(
                vars,
                "CALL_ERROR_RESET_WINDOW_SECONDS",
                DEFAULT_ERROR_RESET_WINDOW_SECONDS,
            ),
            max_error_count,
            probe_timeout_seconds: parse_or(
                vars,
                "CALL_PROBE_TIMEOUT_SECONDS",
                DEFAULT_PROBE_TIMEOUT_SECONDS,
            ),
            start_response_timeout_seconds: parse_or(
                vars,
                "CALL_START_RESPONSE_TIMEOUT_SECONDS",
                DEFAULT_START_RESPONSE_TIMEOUT_SECONDS,
            ),
            solo_member_timeout_seconds: parse_or(
                vars,
                "CALL_SOLO_MEMBER_TIMEOUT_SECONDS",
                DEFAULT_SOLO_MEMBER_TIMEOUT_SECONDS,
            ),
            silence_timeout_seconds: parse_or(
                vars,
                "CALL_SILENCE_TIMEOUT_SECONDS",
                DEFAULT_SILENCE_TIMEOUT_SECONDS,
            ),
            unanswered_timeout_seconds: parse_or(
                vars,
                "CALL_UNANSWERED_TIMEOUT_SECONDS",
                DEFAULT_UNANSWERED_TIMEOUT_SECONDS,
            ),
            leave_timeout_seconds: parse_or(
                vars,
                "CALL_LEAVE_TIMEOUT_SECONDS",
                DEFAULT_LEAVE_TIMEOUT_SECONDS,
            ),
            quality_advisory_interval_seconds: parse_or(
                vars,
                "CALL_QUALITY_ADVISORY_INTERVAL_SECONDS",
                DEFAULT_QUALITY_ADVISORY_INTERVAL_SECONDS,
            ),
            use_quic_signal: parse_flag(vars, "CALL_USE_QUIC_SIGNAL", true),
            e2ee_enabled: parse_flag(vars, "CALL_E2EE_ENABLED", true),
            metrics_bind_address,
        })
    }

    /// Idle timeouts as durations.
    #[must_use]
    pub fn idle_timeouts(&self) -> IdleTimeouts {
        IdleTimeouts {
            solo_member: Duration::from_secs(self.solo_member_timeout_seconds),
            silence: Duration::from_secs(self.silence_timeout_seconds),
        }
    }
}

impl ConfigSource for Config {
    fn candidate_server_urls(&self) -> Vec<String> {
        self.server_urls.clone()
    }

    fn idle_timeouts(&self) -> IdleTimeouts {
        Config::idle_timeouts(self)
    }

    fn use_quic_signal(&self) -> bool {
        self.use_quic_signal
    }

    fn e2ee_enabled(&self) -> bool {
        self.e2ee_enabled
    }
}
