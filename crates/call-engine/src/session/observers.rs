//! Observable state of a session.
//!
//! State values are `watch` channels: a late subscriber immediately sees the
//! latest value. One-shot happenings (errors, peer notices) are `broadcast`
//! events and are only seen by receivers subscribed at the time.

use super::participants::Participant;
use super::status::CallStatus;
use super::timers::IdleMode;
use crate::errors::CallErrorEvent;
use common::types::{CallKind, RoomId};
use signaling_protocol::RaisedHand;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

/// Capacity of the error and notice broadcast channels.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Something the UI should tell the user about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    /// Barrage chat line from a peer.
    Barrage {
        sender: String,
        display_name: Option<String>,
        text: String,
        kind: Option<i32>,
    },
    /// A peer muted our microphone.
    MutedByPeer { by: String },
    /// A peer hung up the call for everyone.
    EndedByPeer { by: String },
    /// Nobody answered the one-on-one call in time.
    NoAnswer,
    /// The one-on-one peer left and did not come back.
    PeerLeft,
    /// Idle detector fired.
    NoActivity { mode: IdleMode },
    /// A peer asked us to keep the call going.
    ContinueRequested { by: String },
    /// A peer set or restarted the countdown.
    CountdownStarted {
        operator: String,
        display_name: Option<String>,
        remaining_seconds: u64,
    },
}

/// Sending side, owned by the session actor.
pub(crate) struct SessionPublishers {
    pub status: watch::Sender<CallStatus>,
    pub participants: watch::Sender<Arc<[Participant]>>,
    pub active_speaker: watch::Sender<Option<String>>,
    pub duration: watch::Sender<String>,
    pub countdown: watch::Sender<Option<String>>,
    pub hands: watch::Sender<Arc<[RaisedHand]>>,
    pub connected_url: watch::Sender<Option<String>>,
    pub call_kind: watch::Sender<CallKind>,
    pub no_activity: watch::Sender<bool>,
    pub room_id: watch::Sender<RoomId>,
    pub errors: broadcast::Sender<CallErrorEvent>,
    pub notices: broadcast::Sender<SessionNotice>,
}

impl SessionPublishers {
    /// Emit an error event. Having no subscribers is fine.
    pub fn error(&self, event: CallErrorEvent) {
        let _ = self.errors.send(event);
    }

    /// Emit a notice. Having no subscribers is fine.
    pub fn notice(&self, notice: SessionNotice) {
        let _ = self.notices.send(notice);
    }
}

/// Receiving side, handed out with the session handle.
#[derive(Clone)]
pub struct SessionObservers {
    pub status: watch::Receiver<CallStatus>,
    pub participants: watch::Receiver<Arc<[Participant]>>,
    /// Identity of the loudest speaker.
    pub active_speaker: watch::Receiver<Option<String>>,
    /// Elapsed connected time, `mm:ss` or `hh:mm:ss`.
    pub duration: watch::Receiver<String>,
    /// Countdown remaining as `mm:ss`; `None` when no countdown is set.
    pub countdown: watch::Receiver<Option<String>>,
    pub hands: watch::Receiver<Arc<[RaisedHand]>>,
    /// URL the transport is connected to (diagnostics).
    pub connected_url: watch::Receiver<Option<String>>,
    pub call_kind: watch::Receiver<CallKind>,
    /// Dismissible "nobody is here / talking" prompt.
    pub no_activity: watch::Receiver<bool>,
    pub room_id: watch::Receiver<RoomId>,
    errors: broadcast::Sender<CallErrorEvent>,
    notices: broadcast::Sender<SessionNotice>,
}

impl SessionObservers {
    /// Subscribe to error events from now on.
    #[must_use]
    pub fn subscribe_errors(&self) -> broadcast::Receiver<CallErrorEvent> {
        self.errors.subscribe()
    }

    /// Subscribe to notices from now on.
    #[must_use]
    pub fn subscribe_notices(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }
}

/// Create the channel pair for a new session.
pub(crate) fn session_channels(
    status: CallStatus,
    kind: CallKind,
    room_id: RoomId,
) -> (SessionPublishers, SessionObservers) {
    let (status_tx, status_rx) = watch::channel(status);
    let (participants_tx, participants_rx) = watch::channel(Arc::<[Participant]>::from(Vec::new()));
    let (speaker_tx, speaker_rx) = watch::channel(None);
    let (duration_tx, duration_rx) = watch::channel(super::timers::format_duration(0));
    let (countdown_tx, countdown_rx) = watch::channel(None);
    let (hands_tx, hands_rx) = watch::channel(Arc::<[RaisedHand]>::from(Vec::new()));
    let (url_tx, url_rx) = watch::channel(None);
    let (kind_tx, kind_rx) = watch::channel(kind);
    let (idle_tx, idle_rx) = watch::channel(false);
    let (room_tx, room_rx) = watch::channel(room_id);
    let (errors, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    let (notices, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

    let publishers = SessionPublishers {
        status: status_tx,
        participants: participants_tx,
        active_speaker: speaker_tx,
        duration: duration_tx,
        countdown: countdown_tx,
        hands: hands_tx,
        connected_url: url_tx,
        call_kind: kind_tx,
        no_activity: idle_tx,
        room_id: room_tx,
        errors: errors.clone(),
        notices: notices.clone(),
    };
    let observers = SessionObservers {
        status: status_rx,
        participants: participants_rx,
        active_speaker: speaker_rx,
        duration: duration_rx,
        countdown: countdown_rx,
        hands: hands_rx,
        connected_url: url_rx,
        call_kind: kind_rx,
        no_activity: idle_rx,
        room_id: room_rx,
        errors,
        notices,
    };
    (publishers, observers)
}
