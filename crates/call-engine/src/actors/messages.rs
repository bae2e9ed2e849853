//! Message types for actor communication.
//!
//! All communication with the session and registry actors uses strongly-typed
//! message passing via `tokio::sync::mpsc`. Request-reply uses
//! `tokio::sync::oneshot`.

use crate::errors::CallError;
use crate::session::{CallStatus, Participant};
use common::types::{CallKind, CallRole, CallerInfo, RoomId};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Messages sent to `CallSessionController`.
#[derive(Debug)]
pub enum SessionMessage {
    /// Connect to the first reachable URL of `urls`, in order.
    Connect {
        urls: Vec<String>,
        respond_to: oneshot::Sender<Result<String, CallError>>,
    },

    /// Re-establish the connection after a local network change.
    Reconnect {
        urls: Vec<String>,
        respond_to: oneshot::Sender<Result<String, CallError>>,
    },

    /// Enable or disable the local microphone.
    SetMicEnabled {
        enabled: bool,
        respond_to: oneshot::Sender<Result<(), CallError>>,
    },

    /// Enable or disable the local camera.
    SetCameraEnabled {
        enabled: bool,
        respond_to: oneshot::Sender<Result<(), CallError>>,
    },

    /// Ask a remote participant to mute.
    ToggleMute {
        identity: String,
        respond_to: oneshot::Sender<Result<SendOutcome, CallError>>,
    },

    /// Send a barrage line to the room.
    SendBarrage {
        text: String,
        kind: Option<i32>,
        respond_to: oneshot::Sender<Result<SendOutcome, CallError>>,
    },

    /// Raise or lower the local hand.
    SetHandRaised {
        raised: bool,
        respond_to: oneshot::Sender<Result<SendOutcome, CallError>>,
    },

    /// Ask a participant to keep the call going.
    SendContinueCall {
        identity: String,
        respond_to: oneshot::Sender<Result<SendOutcome, CallError>>,
    },

    /// Dismiss the no-activity prompt and re-arm idle detection.
    KeepCallAlive {
        respond_to: oneshot::Sender<Result<(), CallError>>,
    },

    /// Hang up for everyone.
    EndCall {
        respond_to: oneshot::Sender<Result<(), CallError>>,
    },

    /// Leave the call locally.
    Hangup {
        respond_to: oneshot::Sender<Result<(), CallError>>,
    },

    /// Current session state.
    GetState {
        respond_to: oneshot::Sender<SessionState>,
    },
}

/// Messages sent to `CallRegistry`.
#[derive(Debug)]
pub enum RegistryMessage {
    /// Insert a call unless the room id is empty or already present.
    Add {
        data: CallData,
        respond_to: oneshot::Sender<bool>,
    },

    Get {
        room_id: RoomId,
        respond_to: oneshot::Sender<Option<CallData>>,
    },

    /// Replace a call entry (last writer wins).
    Update {
        data: CallData,
        respond_to: oneshot::Sender<Result<(), CallError>>,
    },

    Remove {
        room_id: RoomId,
        respond_to: oneshot::Sender<Option<CallData>>,
    },

    /// Non-instant call bound to a conversation.
    GetByConversation {
        conversation_id: String,
        respond_to: oneshot::Sender<Option<CallData>>,
    },

    SetCallingState {
        room_id: RoomId,
        in_calling: bool,
        respond_to: oneshot::Sender<Result<(), CallError>>,
    },

    PromoteToInstant {
        room_id: RoomId,
        respond_to: oneshot::Sender<Result<(), CallError>>,
    },

    /// Ask permission to show an incoming-call notification.
    ClaimIncomingNotification {
        room_id: RoomId,
        respond_to: oneshot::Sender<bool>,
    },

    /// The incoming-call notification was dismissed.
    ClearNotifying {
        room_id: RoomId,
        respond_to: oneshot::Sender<Result<(), CallError>>,
    },

    /// Remember that a room has ended and drop its entry.
    MarkEnded {
        room_id: RoomId,
        respond_to: oneshot::Sender<()>,
    },

    List {
        respond_to: oneshot::Sender<Vec<CallData>>,
    },
}

// ----------------------------------------------------------------------------
// Supporting Types
// ----------------------------------------------------------------------------

/// Where a registry entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallSource {
    /// Invitation received as a message.
    Message,
    /// Call list fetched from the server.
    Server,
    /// Started on this device.
    Local,
    #[default]
    Unknown,
}

/// A call the process knows about (active, ringing or joinable).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallData {
    pub room_id: RoomId,
    pub kind: CallKind,
    /// Server-side version of the entry, for ordering updates.
    pub version: i32,
    /// Creation time (ms since epoch).
    pub created_at: i64,
    pub caller: CallerInfo,
    /// Conversation the call belongs to, if any.
    pub conversation_id: Option<String>,
    pub call_name: Option<String>,
    pub source: CallSource,
    /// An incoming-call notification is on screen.
    pub notifying: bool,
    /// Another device of the local account already joined.
    pub has_another_device_joined: bool,
    /// The local device is in the call.
    pub is_in_calling: bool,
}

impl CallData {
    /// A fresh entry with default flags.
    #[must_use]
    pub fn new(room_id: RoomId, kind: CallKind, caller: CallerInfo) -> Self {
        Self {
            room_id,
            kind,
            version: 0,
            created_at: chrono::Utc::now().timestamp_millis(),
            caller,
            conversation_id: None,
            call_name: None,
            source: CallSource::Unknown,
            notifying: false,
            has_another_device_joined: false,
            is_in_calling: false,
        }
    }
}

/// Change notification published by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Added(CallData),
    Updated(CallData),
    Removed(RoomId),
    KindChanged { room_id: RoomId, kind: CallKind },
}

/// Result of a send command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Published on the data channel.
    Sent,
    /// Nothing was sent (empty input or encryption keys unavailable).
    Dropped,
}

/// Current state of a session (for callers and tests).
#[derive(Debug, Clone)]
pub struct SessionState {
    pub room_id: RoomId,
    pub status: CallStatus,
    pub kind: CallKind,
    pub role: CallRole,
    pub participants: Arc<[Participant]>,
    pub connected_url: Option<String>,
    /// Seconds spent connected, excluding reconnect pauses.
    pub duration_secs: u64,
    /// A session key is installed.
    pub e2ee_active: bool,
    pub no_activity: bool,
    pub local_hand_raised: bool,
    /// Current mailbox depth.
    pub mailbox_depth: usize,
}
