//! Timer policies used by the session actor.

use crate::config::IdleTimeouts;
use std::time::Duration;
use tokio::time::Instant;

/// Debounce for active-speaker updates while someone is speaking.
pub const SPEAKER_DEBOUNCE_ACTIVE: Duration = Duration::from_millis(200);

/// Debounce for an empty active-speaker set.
pub const SPEAKER_DEBOUNCE_EMPTY: Duration = Duration::from_millis(2500);

/// Debounce to apply to a speaker update.
#[must_use]
pub const fn speaker_debounce(speakers_present: bool) -> Duration {
    if speakers_present {
        SPEAKER_DEBOUNCE_ACTIVE
    } else {
        SPEAKER_DEBOUNCE_EMPTY
    }
}

/// Format elapsed seconds as `mm:ss`, or `hh:mm:ss` from one hour on.
#[must_use]
pub fn format_duration(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

/// Which idle condition is being timed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleMode {
    /// The local user is alone.
    Solo,
    /// Others are present but nobody is talking.
    Silence,
}

impl IdleMode {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            IdleMode::Solo => "solo",
            IdleMode::Silence => "silence",
        }
    }

    #[must_use]
    pub const fn timeout(&self, timeouts: &IdleTimeouts) -> Duration {
        match self {
            IdleMode::Solo => timeouts.solo_member,
            IdleMode::Silence => timeouts.silence,
        }
    }
}

/// Idle condition that currently applies, if any.
///
/// Being alone is timed for every call kind; a one-on-one call also runs
/// its leave timeout alongside.
#[must_use]
pub fn idle_mode(
    remote_count: usize,
    any_microphone_live: bool,
    anyone_speaking: bool,
) -> Option<IdleMode> {
    if remote_count == 0 {
        return Some(IdleMode::Solo);
    }
    if !any_microphone_live || !anyone_speaking {
        return Some(IdleMode::Silence);
    }
    None
}

/// Idle detector state: the armed mode, its deadline, and whether it fired.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IdleTimer {
    pub mode: Option<IdleMode>,
    pub deadline: Option<Instant>,
    pub fired: bool,
}

impl IdleTimer {
    /// Switch to `mode`. Re-arms only when the mode changes.
    /// Returns `true` if the timer was (re)armed or cleared.
    pub fn update(&mut self, mode: Option<IdleMode>, now: Instant, timeouts: &IdleTimeouts) -> bool {
        if mode == self.mode {
            return false;
        }
        self.mode = mode;
        self.fired = false;
        self.deadline = mode.map(|m| now + m.timeout(timeouts));
        true
    }

    /// Mark the armed timer as expired. Returns the mode that fired.
    pub fn fire(&mut self) -> Option<IdleMode> {
        self.deadline = None;
        if self.fired {
            return None;
        }
        self.fired = true;
        self.mode
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Rate limit for advisories.
#[derive(Debug, Clone, Copy)]
pub struct AdvisoryThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl AdvisoryThrottle {
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Whether an advisory may be emitted at `now`; records it if so.
    pub fn allow(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// Connected-time counter that can be paused while reconnecting.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DurationCounter {
    accumulated: Duration,
    running_since: Option<Instant>,
}

impl DurationCounter {
    /// Start or resume counting. No-op while already running.
    pub fn start(&mut self, now: Instant) {
        if self.running_since.is_none() {
            self.running_since = Some(now);
        }
    }

    /// Stop counting, keeping the time accumulated so far.
    pub fn pause(&mut self, now: Instant) {
        if let Some(since) = self.running_since.take() {
            self.accumulated += now.saturating_duration_since(since);
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running_since.is_some()
    }

    #[must_use]
    pub fn elapsed(&self, now: Instant) -> Duration {
        self.accumulated
            + self
                .running_since
                .map_or(Duration::ZERO, |since| now.saturating_duration_since(since))
    }
}
