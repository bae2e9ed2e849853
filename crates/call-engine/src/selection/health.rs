//! Per-endpoint health bookkeeping.

use crate::ports::{ProbeResult, ProbeStatus};
use std::time::Duration;
use tokio::time::Instant;

/// Health of one media-server endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHealthRecord {
    pub url: String,
    /// Latency of the last probe (ms); meaningless when the last probe failed.
    pub last_response_time_ms: u64,
    /// Consecutive failures, capped at the exclusion threshold.
    pub consecutive_error_count: u32,
    pub status: ProbeStatus,
    pub last_tested_at: Instant,
    /// Time of the most recent failed probe. Kept across successes.
    pub last_error_at: Option<Instant>,
}

/// Health records keyed by URL, in first-probed order.
///
/// Records are created on the first probe of a URL and never removed.
#[derive(Debug)]
pub struct HealthTable {
    records: Vec<ServerHealthRecord>,
    error_reset_window: Duration,
    max_error_count: u32,
}

impl HealthTable {
    #[must_use]
    pub fn new(error_reset_window: Duration, max_error_count: u32) -> Self {
        Self {
            records: Vec::new(),
            error_reset_window,
            max_error_count,
        }
    }

    /// Fold one probe result into the table.
    pub fn record(&mut self, url: &str, result: ProbeResult, at: Instant) {
        let Some(record) = self.records.iter_mut().find(|r| r.url == url) else {
            let failed = result.status == ProbeStatus::Error;
            self.records.push(ServerHealthRecord {
                url: url.to_string(),
                last_response_time_ms: result.latency_ms,
                consecutive_error_count: u32::from(failed),
                status: result.status,
                last_tested_at: at,
                last_error_at: failed.then_some(at),
            });
            return;
        };

        match result.status {
            ProbeStatus::Error => {
                record.consecutive_error_count = record
                    .consecutive_error_count
                    .saturating_add(1)
                    .min(self.max_error_count);
                record.last_error_at = Some(at);
            }
            ProbeStatus::Success => {
                let quiet_long_enough = record
                    .last_error_at
                    .map_or(true, |err_at| {
                        at.saturating_duration_since(err_at) > self.error_reset_window
                    });
                if record.consecutive_error_count > 0 && quiet_long_enough {
                    record.consecutive_error_count = 0;
                }
            }
        }
        record.last_response_time_ms = result.latency_ms;
        record.status = result.status;
        record.last_tested_at = at;
    }

    /// URLs fit for use, fastest first.
    ///
    /// An endpoint qualifies while its error count is under the threshold and
    /// its last probe succeeded. Ties keep first-probed order.
    #[must_use]
    pub fn available_urls(&self) -> Vec<String> {
        let mut healthy: Vec<&ServerHealthRecord> = self
            .records
            .iter()
            .filter(|r| {
                r.consecutive_error_count < self.max_error_count && r.status == ProbeStatus::Success
            })
            .collect();
        healthy.sort_by_key(|r| r.last_response_time_ms);
        healthy.into_iter().map(|r| r.url.clone()).collect()
    }

    #[must_use]
    pub fn get(&self, url: &str) -> Option<&ServerHealthRecord> {
        self.records.iter().find(|r| r.url == url)
    }

    #[must_use]
    pub fn records(&self) -> &[ServerHealthRecord] {
        &self.records
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(15 * 60);

    fn table() -> HealthTable {
        HealthTable::new(WINDOW, 3)
    }

    #[test]
    fn test_sorted_by_latency() {
        let now = Instant::now();
        let mut table = table();
        table.record("https://slow", ProbeResult::success(180), now);
        table.record("https://fast", ProbeResult::success(20), now);
        table.record("https://mid", ProbeResult::success(90), now);

        assert_eq!(
            table.available_urls(),
            vec!["https://fast", "https://mid", "https://slow"]
        );
    }

    #[test]
    fn test_last_probe_error_excludes_immediately() {
        let now = Instant::now();
        let mut table = table();
        table.record("https://a", ProbeResult::success(20), now);
        table.record("https://a", ProbeResult::error(), now);

        assert!(table.available_urls().is_empty());
        assert_eq!(table.get("https://a").unwrap().consecutive_error_count, 1);
    }

    #[test]
    fn test_three_errors_exclude_until_reset_window_passes() {
        let start = Instant::now();
        let mut table = table();
        for i in 0..3 {
            table.record("https://a", ProbeResult::error(), start + Duration::from_secs(i));
        }
        let last_error = start + Duration::from_secs(2);

        // Success inside the window leaves the count alone
        table.record("https://a", ProbeResult::success(30), last_error + Duration::from_secs(60));
        assert_eq!(table.get("https://a").unwrap().consecutive_error_count, 3);
        assert!(table.available_urls().is_empty());

        // First success after the window clears it
        table.record(
            "https://a",
            ProbeResult::success(30),
            last_error + WINDOW + Duration::from_secs(1),
        );
        assert_eq!(table.get("https://a").unwrap().consecutive_error_count, 0);
        assert_eq!(table.available_urls(), vec!["https://a"]);
    }

    #[test]
    fn test_error_count_is_capped() {
        let now = Instant::now();
        let mut table = table();
        for _ in 0..10 {
            table.record("https://a", ProbeResult::error(), now);
        }
        assert_eq!(table.get("https://a").unwrap().consecutive_error_count, 3);
    }

    #[test]
    fn test_last_error_kept_across_success() {
        let now = Instant::now();
        let mut table = table();
        table.record("https://a", ProbeResult::error(), now);
        table.record("https://a", ProbeResult::success(10), now + Duration::from_secs(5));

        let record = table.get("https://a").unwrap();
        assert_eq!(record.last_error_at, Some(now));
        assert_eq!(record.status, ProbeStatus::Success);
        assert_eq!(record.consecutive_error_count, 1);
        // One error is below the threshold, and the last probe succeeded
        assert_eq!(table.available_urls(), vec!["https://a"]);
    }

    #[test]
    fn test_records_are_never_removed() {
        let now = Instant::now();
        let mut table = table();
        table.record("https://a", ProbeResult::success(10), now);
        table.record("https://b", ProbeResult::error(), now);
        assert_eq!(table.records().len(), 2);
    }
}
