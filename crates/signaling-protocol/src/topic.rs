//! Data-channel topics.

use std::fmt;
use std::str::FromStr;

/// Topic of a control message on the data channel.
///
/// The set is closed: an unknown topic string fails to parse instead of
/// being routed nowhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Barrage chat line.
    Chat,
    /// Request that the targeted participants mute their microphone.
    Mute,
    /// Broadcast of a participant's own microphone state.
    MuteState,
    /// Ask the targeted participants to keep the call going (re-arms idle detection).
    ResumeCall,
    /// Hang up for everyone.
    EndCall,
    /// Raise hand.
    RaiseHand,
    /// Lower hand.
    CancelHand,
    /// Start a countdown timer.
    SetCountdown,
    /// Restart the current countdown timer.
    RestartCountdown,
    /// Extend the current countdown timer.
    ExtendCountdown,
    /// Remove the countdown timer.
    ClearCountdown,
}

impl Topic {
    /// Every topic, in declaration order.
    pub const ALL: [Topic; 11] = [
        Topic::Chat,
        Topic::Mute,
        Topic::MuteState,
        Topic::ResumeCall,
        Topic::EndCall,
        Topic::RaiseHand,
        Topic::CancelHand,
        Topic::SetCountdown,
        Topic::RestartCountdown,
        Topic::ExtendCountdown,
        Topic::ClearCountdown,
    ];

    /// Wire name of the topic.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Topic::Chat => "chat",
            Topic::Mute => "mute",
            Topic::MuteState => "mute-state",
            Topic::ResumeCall => "resume-call",
            Topic::EndCall => "end-call",
            Topic::RaiseHand => "raise-hands-up",
            Topic::CancelHand => "cancel-hands-up",
            Topic::SetCountdown => "set-countdown",
            Topic::RestartCountdown => "restart-countdown",
            Topic::ExtendCountdown => "extend-countdown",
            Topic::ClearCountdown => "clear-countdown",
        }
    }

    /// Whether payloads on this topic are end-to-end encrypted.
    ///
    /// Hand and countdown packets are relayed (and rewritten) by the
    /// server, so they travel as plain signed envelopes.
    #[must_use]
    pub const fn requires_encryption(&self) -> bool {
        matches!(
            self,
            Topic::Chat | Topic::Mute | Topic::MuteState | Topic::ResumeCall | Topic::EndCall
        )
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned for a topic string outside the known set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown topic: {0}")]
pub struct UnknownTopic(pub String);

impl FromStr for Topic {
    type Err = UnknownTopic;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::ALL
            .into_iter()
            .find(|topic| topic.as_str() == s)
            .ok_or_else(|| UnknownTopic(s.to_string()))
    }
}
