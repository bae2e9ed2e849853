//! Typed control messages.

use crate::topic::Topic;
use common::types::account_of;
use serde::{Deserialize, Serialize};

/// One raised hand as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaisedHand {
    /// Participant identity.
    pub identity: String,
    /// When the hand went up (milliseconds since epoch), if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<i64>,
}

impl RaisedHand {
    /// A hand with no timestamp.
    #[must_use]
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            ts: None,
        }
    }
}

/// Countdown operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownAction {
    /// Start a new countdown.
    Set,
    /// Restart the running countdown.
    Restart,
    /// Push the deadline out.
    Extend,
    /// Remove the countdown.
    Clear,
}

impl CountdownAction {
    /// Topic carrying this action.
    #[must_use]
    pub const fn topic(self) -> Topic {
        match self {
            CountdownAction::Set => Topic::SetCountdown,
            CountdownAction::Restart => Topic::RestartCountdown,
            CountdownAction::Extend => Topic::ExtendCountdown,
            CountdownAction::Clear => Topic::ClearCountdown,
        }
    }
}

/// Countdown timer state as stamped by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountdownTimer {
    /// Server time at which the countdown ends (ms).
    #[serde(default)]
    pub expired_time_ms: i64,
    /// Server time when the packet was produced (ms).
    #[serde(default)]
    pub current_time_ms: i64,
    /// Requested duration (ms).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    /// Identity of the participant who changed the timer.
    #[serde(default)]
    pub operator_identity: String,
}

impl CountdownTimer {
    /// Whole seconds left, clamped at zero.
    #[must_use]
    pub fn remaining_seconds(&self) -> u64 {
        let left_ms = self.expired_time_ms.saturating_sub(self.current_time_ms);
        u64::try_from(left_ms / 1000).unwrap_or(0)
    }
}

/// A control message exchanged over the data channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Barrage chat line.
    Chat {
        text: String,
        /// Preset category chosen by the sender, if any.
        kind: Option<i32>,
        sent_at: i64,
    },
    /// Ask `identities` to mute their microphone.
    MuteRequest {
        identities: Vec<String>,
        sent_at: i64,
    },
    /// Sender's own microphone state.
    MuteState {
        identity: String,
        muted: bool,
        sent_at: i64,
    },
    /// Ask `identities` to keep the call going.
    ResumeCall {
        identities: Vec<String>,
        sent_at: i64,
    },
    /// Hang up for everyone.
    EndCall { sent_at: i64 },
    /// Raise or lower a hand. Inbound packets carry the full list of raised hands.
    Hands {
        raised: bool,
        hands: Vec<RaisedHand>,
        sent_at: i64,
    },
    /// Countdown change.
    Countdown {
        action: CountdownAction,
        timer: CountdownTimer,
    },
}

impl ControlMessage {
    /// Topic this message is published under.
    #[must_use]
    pub fn topic(&self) -> Topic {
        match self {
            ControlMessage::Chat { .. } => Topic::Chat,
            ControlMessage::MuteRequest { .. } => Topic::Mute,
            ControlMessage::MuteState { .. } => Topic::MuteState,
            ControlMessage::ResumeCall { .. } => Topic::ResumeCall,
            ControlMessage::EndCall { .. } => Topic::EndCall,
            ControlMessage::Hands { raised: true, .. } => Topic::RaiseHand,
            ControlMessage::Hands { raised: false, .. } => Topic::CancelHand,
            ControlMessage::Countdown { action, .. } => action.topic(),
        }
    }

    /// Identities the message is addressed to; `None` means broadcast.
    #[must_use]
    pub fn targets(&self) -> Option<&[String]> {
        match self {
            ControlMessage::MuteRequest { identities, .. }
            | ControlMessage::ResumeCall { identities, .. } => Some(identities.as_slice()),
            _ => None,
        }
    }

    /// Whether `identity` is among the message targets.
    ///
    /// Targets may be account ids or device-qualified identities; a target
    /// matches when its account equals the account of `identity`.
    #[must_use]
    pub fn is_addressed_to(&self, identity: &str) -> bool {
        let account = account_of(identity);
        self.targets()
            .is_some_and(|targets| targets.iter().any(|t| account_of(t) == account))
    }

    /// Send timestamp (ms since epoch).
    #[must_use]
    pub fn sent_at(&self) -> i64 {
        match self {
            ControlMessage::Chat { sent_at, .. }
            | ControlMessage::MuteRequest { sent_at, .. }
            | ControlMessage::MuteState { sent_at, .. }
            | ControlMessage::ResumeCall { sent_at, .. }
            | ControlMessage::EndCall { sent_at }
            | ControlMessage::Hands { sent_at, .. } => *sent_at,
            ControlMessage::Countdown { timer, .. } => timer.current_time_ms,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_mapping() {
        let raise = ControlMessage::Hands {
            raised: true,
            hands: vec![],
            sent_at: 1,
        };
        let cancel = ControlMessage::Hands {
            raised: false,
            hands: vec![],
            sent_at: 1,
        };
        assert_eq!(raise.topic(), Topic::RaiseHand);
        assert_eq!(cancel.topic(), Topic::CancelHand);

        let extend = ControlMessage::Countdown {
            action: CountdownAction::Extend,
            timer: CountdownTimer::default(),
        };
        assert_eq!(extend.topic(), Topic::ExtendCountdown);
    }

    #[test]
    fn test_addressing() {
        let mute = ControlMessage::MuteRequest {
            identities: vec!["+1002.1".to_string()],
            sent_at: 0,
        };
        assert!(mute.is_addressed_to("+1002.1"));
        assert!(mute.is_addressed_to("+1002"));
        assert!(!mute.is_addressed_to("+1003"));

        let resume = ControlMessage::ResumeCall {
            identities: vec!["+11001.1".to_string(), "+1002".to_string()],
            sent_at: 0,
        };
        assert!(!resume.is_addressed_to("+1001.1"));
        assert!(!resume.is_addressed_to("+1001"));
        assert!(resume.is_addressed_to("+11001.1"));
        assert!(resume.is_addressed_to("+1002.3"));

        let end = ControlMessage::EndCall { sent_at: 0 };
        assert!(end.targets().is_none());
        assert!(!end.is_addressed_to("+1002"));
    }

    #[test]
    fn test_countdown_remaining_clamps() {
        let timer = CountdownTimer {
            expired_time_ms: 61_500,
            current_time_ms: 1_000,
            duration_ms: None,
            operator_identity: String::new(),
        };
        assert_eq!(timer.remaining_seconds(), 60);

        let expired = CountdownTimer {
            expired_time_ms: 1_000,
            current_time_ms: 5_000,
            ..CountdownTimer::default()
        };
        assert_eq!(expired.remaining_seconds(), 0);
    }
}
