//! Call status state machine.

use common::types::CallRole;

/// Lifecycle status of a call session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallStatus {
    /// Joining an existing call.
    Joining,
    /// Outgoing call, waiting for the other side.
    Calling,
    Connected,
    Reconnecting,
    Reconnected,
    /// Ended by the local side.
    Disconnected,
    /// Ended by an unrecoverable failure.
    ConnectedFailed,
    /// Ended because reconnection gave up.
    ReconnectFailed,
}

impl CallStatus {
    /// Status a new session starts in.
    #[must_use]
    pub const fn initial(role: CallRole, user_initiated: bool) -> Self {
        match (role, user_initiated) {
            (CallRole::Caller, true) => CallStatus::Calling,
            _ => CallStatus::Joining,
        }
    }

    /// Returns the status as a string for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Joining => "joining",
            CallStatus::Calling => "calling",
            CallStatus::Connected => "connected",
            CallStatus::Reconnecting => "reconnecting",
            CallStatus::Reconnected => "reconnected",
            CallStatus::Disconnected => "disconnected",
            CallStatus::ConnectedFailed => "connected_failed",
            CallStatus::ReconnectFailed => "reconnect_failed",
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallStatus::Disconnected | CallStatus::ConnectedFailed | CallStatus::ReconnectFailed
        )
    }

    /// Media is flowing (idle detection and the duration counter run).
    #[must_use]
    pub const fn is_in_call(&self) -> bool {
        matches!(self, CallStatus::Connected | CallStatus::Reconnected)
    }

    /// Still waiting for the call to be established.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, CallStatus::Joining | CallStatus::Calling)
    }

    /// Whether moving to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(&self, next: CallStatus) -> bool {
        use CallStatus::{
            Calling, Connected, ConnectedFailed, Disconnected, Joining, ReconnectFailed,
            Reconnected, Reconnecting,
        };
        match self {
            Joining | Calling => matches!(next, Connected | Disconnected | ConnectedFailed),
            Connected | Reconnected => {
                matches!(next, Reconnecting | Disconnected | ConnectedFailed)
            }
            Reconnecting => matches!(
                next,
                Reconnected | Disconnected | ConnectedFailed | ReconnectFailed
            ),
            Disconnected | ConnectedFailed | ReconnectFailed => false,
        }
    }
}
