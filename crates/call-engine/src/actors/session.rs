//! `CallSessionController` - per-call actor that owns the session lifecycle.
//!
//! Each session actor:
//! - Connects to the first reachable media server of a candidate list
//! - Recovers the E2EE session key from the start-call response
//! - Tracks participants, active speakers, hands and the countdown
//! - Runs idle detection and the connected-time counter
//! - Publishes everything through `watch`/`broadcast` observers
//!
//! # Timers
//!
//! Every timer is an `Option<Instant>` deadline raced inside the actor's
//! `select!` loop, so no timer task outlives the session and no timer can
//! fire into a torn-down session.
//!
//! # Transport Events
//!
//! Each connect attempt gets its own event channel. Dropping the receiver of
//! a previous attempt discards any stale events it still had in flight.

use crate::config::{
    Config, DEFAULT_LEAVE_TIMEOUT_SECONDS, DEFAULT_QUALITY_ADVISORY_INTERVAL_SECONDS,
    DEFAULT_START_RESPONSE_TIMEOUT_SECONDS, DEFAULT_UNANSWERED_TIMEOUT_SECONDS, IdleTimeouts,
};
use crate::errors::{CallError, CallErrorEvent};
use crate::observability::metrics;
use crate::ports::{
    ConfigSource, ConnectRequest, ConnectionQuality, ContactResolver, CryptoProvider,
    DisconnectReason, MediaTransport, ParticipantSnapshot, SpeakerLevel, StartCallResponse,
    TrackSource, TrackState, TransportError, TransportEvent,
};
use crate::selection::ServerSelectionEngine;
use crate::session::observers::{session_channels, SessionPublishers};
use crate::session::timers::{idle_mode, speaker_debounce, AdvisoryThrottle, IdleTimer};
use crate::session::{
    format_duration, CallStatus, DurationCounter, ParticipantRoster, SessionNotice,
    SessionObservers,
};
use crate::signaling::SignalingCodec;

use super::messages::{CallData, CallSource, SendOutcome, SessionMessage, SessionState};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::registry::CallRegistryHandle;

use bytes::Bytes;
use common::secret::{ExposeSecret, SecretString};
use common::types::{account_of, CallKind, CallRole, CallerInfo, RoomId};
use signaling_protocol::{ControlMessage, CountdownAction, CountdownTimer, RaisedHand};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Channel buffer size for the session mailbox.
const SESSION_CHANNEL_BUFFER: usize = 64;

/// Channel buffer size for transport events of one connection.
const TRANSPORT_EVENT_BUFFER: usize = 256;

/// Start-call status meaning the call is already over.
const STATUS_CALL_ENDED: i32 = 22001;

/// Period of the duration and countdown tickers.
const TICK: Duration = Duration::from_secs(1);

/// Session timeouts other than idle detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimeouts {
    /// Budget for the start-call response after connecting.
    pub start_response: Duration,
    /// One-on-one call with nobody else in the room.
    pub unanswered: Duration,
    /// One-on-one peer left and did not come back.
    pub leave: Duration,
    /// Minimum gap between poor-connection advisories.
    pub quality_advisory: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            start_response: Duration::from_secs(DEFAULT_START_RESPONSE_TIMEOUT_SECONDS),
            unanswered: Duration::from_secs(DEFAULT_UNANSWERED_TIMEOUT_SECONDS),
            leave: Duration::from_secs(DEFAULT_LEAVE_TIMEOUT_SECONDS),
            quality_advisory: Duration::from_secs(DEFAULT_QUALITY_ADVISORY_INTERVAL_SECONDS),
        }
    }
}

impl From<&Config> for SessionTimeouts {
    fn from(config: &Config) -> Self {
        Self {
            start_response: Duration::from_secs(config.start_response_timeout_seconds),
            unanswered: Duration::from_secs(config.unanswered_timeout_seconds),
            leave: Duration::from_secs(config.leave_timeout_seconds),
            quality_advisory: Duration::from_secs(config.quality_advisory_interval_seconds),
        }
    }
}

/// What a session is about.
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub role: CallRole,
    pub kind: CallKind,
    /// The user started or accepted the call (as opposed to an automatic rejoin).
    pub user_initiated: bool,
    /// Device-qualified identity of the local participant.
    pub local_identity: String,
    pub caller: CallerInfo,
    /// Server room id when joining a known call; a provisional id is used otherwise.
    pub room_id: Option<RoomId>,
    pub conversation_id: Option<String>,
    pub call_name: Option<String>,
    /// Encoded start-call parameters handed to the transport.
    pub call_params: Option<Bytes>,
    pub timeouts: SessionTimeouts,
}

/// Collaborators injected into a session.
#[derive(Clone)]
pub struct SessionDeps {
    pub transport: Arc<dyn MediaTransport>,
    pub crypto: Arc<dyn CryptoProvider>,
    pub contacts: Arc<dyn ContactResolver>,
    pub config: Arc<dyn ConfigSource>,
    pub app_token: SecretString,
    pub registry: Option<CallRegistryHandle>,
    pub metrics: Arc<ActorMetrics>,
}

/// Handle to a `CallSessionController`.
#[derive(Clone)]
pub struct CallSessionHandle {
    sender: mpsc::Sender<SessionMessage>,
    cancel_token: CancellationToken,
    observers: SessionObservers,
    released: Arc<AtomicBool>,
}

impl CallSessionHandle {
    /// Observable session state.
    #[must_use]
    pub fn observers(&self) -> &SessionObservers {
        &self.observers
    }

    /// Connect to the first reachable URL of `urls`, tried in order.
    ///
    /// Returns the URL the transport connected to. The call is established
    /// later, once the start-call response and the room join have arrived;
    /// watch `observers().status` for that.
    pub async fn connect(&self, urls: Vec<String>) -> Result<String, CallError> {
        self.request(|respond_to| SessionMessage::Connect { urls, respond_to })
            .await?
    }

    /// Connect using the selection engine's current ranking.
    pub async fn connect_with(&self, selection: &ServerSelectionEngine) -> Result<String, CallError> {
        let urls = selection.available_server_urls().await;
        self.connect(urls).await
    }

    /// Re-establish the connection, e.g. after a network change.
    pub async fn reconnect(&self, urls: Vec<String>) -> Result<String, CallError> {
        self.request(|respond_to| SessionMessage::Reconnect { urls, respond_to })
            .await?
    }

    pub async fn set_mic_enabled(&self, enabled: bool) -> Result<(), CallError> {
        self.request(|respond_to| SessionMessage::SetMicEnabled {
            enabled,
            respond_to,
        })
        .await?
    }

    pub async fn set_camera_enabled(&self, enabled: bool) -> Result<(), CallError> {
        self.request(|respond_to| SessionMessage::SetCameraEnabled {
            enabled,
            respond_to,
        })
        .await?
    }

    /// Ask a remote participant to mute their microphone.
    pub async fn toggle_mute(&self, identity: &str) -> Result<SendOutcome, CallError> {
        let identity = identity.to_string();
        self.request(|respond_to| SessionMessage::ToggleMute {
            identity,
            respond_to,
        })
        .await?
    }

    /// Send a barrage line. Blank text is not sent.
    pub async fn send_barrage(&self, text: &str, kind: Option<i32>) -> Result<SendOutcome, CallError> {
        let text = text.to_string();
        self.request(|respond_to| SessionMessage::SendBarrage {
            text,
            kind,
            respond_to,
        })
        .await?
    }

    pub async fn set_hand_raised(&self, raised: bool) -> Result<SendOutcome, CallError> {
        self.request(|respond_to| SessionMessage::SetHandRaised { raised, respond_to })
            .await?
    }

    /// Ask `identity` to keep the call going.
    pub async fn send_continue_call(&self, identity: &str) -> Result<SendOutcome, CallError> {
        let identity = identity.to_string();
        self.request(|respond_to| SessionMessage::SendContinueCall {
            identity,
            respond_to,
        })
        .await?
    }

    /// Dismiss the no-activity prompt and restart idle detection.
    pub async fn keep_call_alive(&self) -> Result<(), CallError> {
        self.request(|respond_to| SessionMessage::KeepCallAlive { respond_to })
            .await?
    }

    /// Hang up for everyone.
    pub async fn end_call(&self) -> Result<(), CallError> {
        self.request(|respond_to| SessionMessage::EndCall { respond_to })
            .await?
    }

    /// Leave the call; others stay connected.
    pub async fn hangup(&self) -> Result<(), CallError> {
        self.request(|respond_to| SessionMessage::Hangup { respond_to })
            .await?
    }

    pub async fn get_state(&self) -> Result<SessionState, CallError> {
        self.request(|respond_to| SessionMessage::GetState { respond_to })
            .await
    }

    /// Tear the session down. Safe to call any number of times.
    pub fn dispose(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Transport and registry resources have been released.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    async fn request<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<T>) -> SessionMessage,
    ) -> Result<T, CallError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(message(tx))
            .await
            .map_err(|e| CallError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CallError::Internal(format!("response receive failed: {e}")))
    }
}

/// Armed one-shot deadlines.
#[derive(Debug, Default)]
struct Deadlines {
    start_response: Option<Instant>,
    unanswered: Option<Instant>,
    leave: Option<Instant>,
    speakers: Option<Instant>,
    duration_tick: Option<Instant>,
    countdown_tick: Option<Instant>,
}

/// The `CallSessionController` actor.
pub struct CallSessionController {
    receiver: mpsc::Receiver<SessionMessage>,
    cancel_token: CancellationToken,

    role: CallRole,
    kind: CallKind,
    local_identity: String,
    caller: CallerInfo,
    conversation_id: Option<String>,
    call_name: Option<String>,
    call_params: Option<Bytes>,
    timeouts: SessionTimeouts,
    idle_timeouts: IdleTimeouts,
    e2ee_enabled: bool,

    transport: Arc<dyn MediaTransport>,
    crypto: Arc<dyn CryptoProvider>,
    contacts: Arc<dyn ContactResolver>,
    config: Arc<dyn ConfigSource>,
    app_token: SecretString,
    registry: Option<CallRegistryHandle>,
    codec: SignalingCodec,

    room_id: RoomId,
    status: CallStatus,
    roster: ParticipantRoster,
    events: Option<mpsc::Receiver<TransportEvent>>,
    connect_attempted: bool,
    connected_url: Option<String>,
    response_received: bool,
    transport_connected: bool,
    /// The room itself is over, not just our part in it.
    room_ended: bool,

    deadlines: Deadlines,
    pending_speakers: Option<Vec<SpeakerLevel>>,
    anyone_speaking: bool,
    idle: IdleTimer,
    quality_advisory: AdvisoryThrottle,
    duration: DurationCounter,
    /// When the current countdown reaches zero.
    countdown_ends: Option<Instant>,
    local_hand_raised: bool,

    publishers: SessionPublishers,
    released: Arc<AtomicBool>,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl CallSessionController {
    /// Spawn a session actor.
    ///
    /// `cancel_token` is usually a child of the application's root token so a
    /// process shutdown tears every session down.
    pub fn spawn(
        params: SessionParams,
        deps: SessionDeps,
        cancel_token: CancellationToken,
    ) -> (CallSessionHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(SESSION_CHANNEL_BUFFER);

        let room_id = params.room_id.unwrap_or_else(RoomId::provisional);
        let status = CallStatus::initial(params.role, params.user_initiated);
        let (publishers, observers) = session_channels(status, params.kind, room_id.clone());
        let released = Arc::new(AtomicBool::new(false));

        deps.metrics.session_started();

        let actor = Self {
            receiver,
            cancel_token: cancel_token.clone(),
            role: params.role,
            kind: params.kind,
            local_identity: params.local_identity,
            caller: params.caller,
            conversation_id: params.conversation_id,
            call_name: params.call_name,
            call_params: params.call_params,
            timeouts: params.timeouts,
            idle_timeouts: deps.config.idle_timeouts(),
            e2ee_enabled: deps.config.e2ee_enabled(),
            codec: SignalingCodec::new(Arc::clone(&deps.crypto), Arc::clone(&deps.contacts)),
            transport: deps.transport,
            crypto: deps.crypto,
            contacts: deps.contacts,
            config: deps.config,
            app_token: deps.app_token,
            registry: deps.registry,
            mailbox: MailboxMonitor::new(ActorType::Session, room_id.as_str()),
            room_id,
            status,
            roster: ParticipantRoster::new(),
            events: None,
            connect_attempted: false,
            connected_url: None,
            response_received: false,
            transport_connected: false,
            room_ended: false,
            deadlines: Deadlines::default(),
            pending_speakers: None,
            anyone_speaking: false,
            idle: IdleTimer::default(),
            quality_advisory: AdvisoryThrottle::new(params.timeouts.quality_advisory),
            duration: DurationCounter::default(),
            countdown_ends: None,
            local_hand_raised: false,
            publishers,
            released: Arc::clone(&released),
            metrics: deps.metrics,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = CallSessionHandle {
            sender,
            cancel_token,
            observers,
            released,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "call.actor.session", fields(room_id = %self.room_id, kind = self.kind.as_str()))]
    async fn run(mut self) {
        info!(
            target: "call.actor.session",
            room_id = %self.room_id,
            role = ?self.role,
            status = self.status.as_str(),
            "CallSessionController started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "call.actor.session",
                        room_id = %self.room_id,
                        "CallSessionController received cancellation signal"
                    );
                    self.finish(CallStatus::Disconnected, None).await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "call.actor.session",
                                room_id = %self.room_id,
                                "CallSessionController channel closed, exiting"
                            );
                            self.finish(CallStatus::Disconnected, None).await;
                            break;
                        }
                    }
                }

                event = next_event(&mut self.events) => {
                    match event {
                        Some(event) => self.handle_transport_event(event).await,
                        None => {
                            debug!(target: "call.actor.session", room_id = %self.room_id, "Transport event channel closed");
                            self.events = None;
                        }
                    }
                }

                () = wait_until(self.deadlines.start_response) => self.on_start_response_timeout().await,
                () = wait_until(self.deadlines.unanswered) => self.on_unanswered_timeout().await,
                () = wait_until(self.deadlines.leave) => self.on_leave_timeout().await,
                () = wait_until(self.idle.deadline) => self.on_idle_timeout(),
                () = wait_until(self.deadlines.speakers) => self.flush_speakers(),
                () = wait_until(self.deadlines.duration_tick) => self.on_duration_tick(),
                () = wait_until(self.deadlines.countdown_tick) => self.on_countdown_tick(),
            }
        }

        info!(
            target: "call.actor.session",
            room_id = %self.room_id,
            status = self.status.as_str(),
            messages_processed = self.mailbox.messages_processed(),
            "CallSessionController stopped"
        );
    }

    async fn handle_message(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.get_state());
            }
            SessionMessage::Connect { urls, respond_to } => {
                let result = self.connect(urls).await;
                let _ = respond_to.send(result);
            }
            SessionMessage::Reconnect { urls, respond_to } => {
                let result = self.reconnect(urls).await;
                let _ = respond_to.send(result);
            }
            SessionMessage::SetMicEnabled {
                enabled,
                respond_to,
            } => {
                let result = self.set_mic_enabled(enabled).await;
                let _ = respond_to.send(result);
            }
            SessionMessage::SetCameraEnabled {
                enabled,
                respond_to,
            } => {
                let result = self.set_camera_enabled(enabled).await;
                let _ = respond_to.send(result);
            }
            SessionMessage::ToggleMute {
                identity,
                respond_to,
            } => {
                let result = self.toggle_mute(&identity).await;
                let _ = respond_to.send(result);
            }
            SessionMessage::SendBarrage {
                text,
                kind,
                respond_to,
            } => {
                let result = self.send_barrage(text, kind).await;
                let _ = respond_to.send(result);
            }
            SessionMessage::SetHandRaised { raised, respond_to } => {
                let result = self.set_hand_raised(raised).await;
                let _ = respond_to.send(result);
            }
            SessionMessage::SendContinueCall {
                identity,
                respond_to,
            } => {
                let result = self.send_continue_call(identity).await;
                let _ = respond_to.send(result);
            }
            SessionMessage::KeepCallAlive { respond_to } => {
                let result = self.ensure_live().map(|()| self.restart_idle_detection());
                let _ = respond_to.send(result);
            }
            SessionMessage::EndCall { respond_to } => {
                let result = self.end_call().await;
                let _ = respond_to.send(result);
            }
            SessionMessage::Hangup { respond_to } => {
                let result = match self.ensure_live() {
                    Ok(()) => {
                        self.finish(CallStatus::Disconnected, None).await;
                        Ok(())
                    }
                    Err(e) => Err(e),
                };
                let _ = respond_to.send(result);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Connection
    // ------------------------------------------------------------------------

    async fn connect(&mut self, urls: Vec<String>) -> Result<String, CallError> {
        self.ensure_live()?;
        if self.connect_attempted || !self.status.is_pending() {
            return Err(CallError::InvalidState("connect already attempted".to_string()));
        }
        self.connect_attempted = true;

        match self.connect_in_order(&urls).await {
            Ok(url) => {
                self.deadlines.start_response = Some(Instant::now() + self.timeouts.start_response);
                Ok(url)
            }
            Err(e) if self.cancel_token.is_cancelled() => Err(e),
            Err(e) => Err(self.fail(e).await),
        }
    }

    async fn reconnect(&mut self, urls: Vec<String>) -> Result<String, CallError> {
        self.ensure_live()?;
        if !self.status.is_in_call() && self.status != CallStatus::Reconnecting {
            return Err(CallError::InvalidState(format!(
                "cannot reconnect while {}",
                self.status.as_str()
            )));
        }

        self.enter_reconnecting();
        match self.connect_in_order(&urls).await {
            Ok(url) => {
                self.enter_reconnected();
                Ok(url)
            }
            Err(e) if self.cancel_token.is_cancelled() => Err(e),
            Err(e) => {
                warn!(
                    target: "call.actor.session",
                    room_id = %self.room_id,
                    error = %e,
                    "Reconnect failed"
                );
                self.finish(CallStatus::ReconnectFailed, Some(CallError::ReconnectFailed))
                    .await;
                Err(CallError::ReconnectFailed)
            }
        }
    }

    /// Try each URL once, in order. Only network failures move on.
    async fn connect_in_order(&mut self, urls: &[String]) -> Result<String, CallError> {
        let Some(call_params) = self.call_params.clone() else {
            return Err(CallError::StartCall("missing call parameters".to_string()));
        };
        if urls.is_empty() {
            return Err(CallError::StartCall("no server available".to_string()));
        }

        let request = ConnectRequest {
            app_token: self.app_token.clone(),
            call_params,
            use_quic_signal: self.config.use_quic_signal(),
        };

        let mut last_failure = None;
        for url in urls {
            let (events_tx, events_rx) = mpsc::channel(TRANSPORT_EVENT_BUFFER);
            // Events of an abandoned attempt must not leak into this one
            self.events = None;

            debug!(target: "call.actor.session", room_id = %self.room_id, url = %url, "Connecting");
            let attempt = tokio::select! {
                () = self.cancel_token.cancelled() => {
                    return Err(CallError::InvalidState("session disposed".to_string()));
                }
                result = self.transport.connect(url, &request, events_tx) => result,
            };

            match attempt {
                Ok(()) => {
                    metrics::record_connect_attempt("success");
                    info!(target: "call.actor.session", room_id = %self.room_id, url = %url, "Transport connected");
                    self.events = Some(events_rx);
                    self.connected_url = Some(url.clone());
                    self.publishers.connected_url.send_replace(Some(url.clone()));
                    return Ok(url.clone());
                }
                Err(e) if e.is_network() => {
                    metrics::record_connect_attempt("network_error");
                    warn!(
                        target: "call.actor.session",
                        room_id = %self.room_id,
                        url = %url,
                        error = %e,
                        "Server unreachable, trying next"
                    );
                    last_failure = Some((url.clone(), e));
                }
                Err(e @ (TransportError::Unauthorized(_) | TransportError::StartCallRejected(_))) => {
                    metrics::record_connect_attempt("rejected");
                    return Err(CallError::StartCall(e.to_string()));
                }
                Err(e) => {
                    metrics::record_connect_attempt("error");
                    return Err(CallError::ServerConnection(e.to_string()));
                }
            }
        }

        let (url, reason) = last_failure
            .map(|(url, e)| (url, e.to_string()))
            .unwrap_or_default();
        Err(CallError::Connection { url, reason })
    }

    async fn on_start_response_timeout(&mut self) {
        self.deadlines.start_response = None;
        if self.response_received || self.status.is_terminal() {
            return;
        }
        self.fail(CallError::ResponseTimeout(self.timeouts.start_response))
            .await;
    }

    async fn handle_start_response(&mut self, response: StartCallResponse) {
        if self.response_received || self.status.is_terminal() {
            return;
        }
        self.deadlines.start_response = None;

        if response.status == STATUS_CALL_ENDED {
            self.room_ended = true;
            self.fail(CallError::CallEnded).await;
            return;
        }
        if response.status != 0 {
            self.fail(CallError::StartCall(format!(
                "status {}: {}",
                response.status, response.reason
            )))
            .await;
            return;
        }
        if self.e2ee_enabled {
            if let Err(e) = self.install_session_key(&response) {
                self.fail(e).await;
                return;
            }
        }

        let room_id = RoomId::new(response.room_id);
        if !room_id.is_empty() && room_id != self.room_id {
            info!(
                target: "call.actor.session",
                provisional = %self.room_id,
                room_id = %room_id,
                "Room id assigned"
            );
            self.mailbox.rename(room_id.as_str());
            self.room_id = room_id;
            self.publishers.room_id.send_replace(self.room_id.clone());
        }
        self.response_received = true;

        if let Some(registry) = &self.registry {
            let mut data = CallData::new(self.room_id.clone(), self.kind, self.caller.clone());
            data.conversation_id.clone_from(&self.conversation_id);
            data.call_name.clone_from(&self.call_name);
            data.source = CallSource::Local;
            if let Err(e) = registry.add(data).await {
                warn!(target: "call.actor.session", room_id = %self.room_id, error = %e, "Failed to register call");
            }
        }

        self.maybe_enter_connected().await;
    }

    fn install_session_key(&mut self, response: &StartCallResponse) -> Result<(), CallError> {
        let (Some(encrypted_key), Some(encrypted_mk)) =
            (response.encrypted_key.as_ref(), response.encrypted_mk.as_ref())
        else {
            return Err(CallError::Encryption(
                "start-call response carries no key material".to_string(),
            ));
        };
        let Some(private_key) = self.crypto.local_private_key() else {
            return Err(CallError::Encryption("no local identity key".to_string()));
        };
        let Some(session_key) = self.crypto.decrypt_session_key(
            private_key.expose_secret(),
            encrypted_key,
            encrypted_mk,
        ) else {
            return Err(CallError::Encryption(
                "session key decryption failed".to_string(),
            ));
        };
        self.codec.set_session_key(session_key);
        debug!(target: "call.actor.session", room_id = %self.room_id, "Session key installed");
        Ok(())
    }

    /// Enter Connected once both the start-call response and the room join
    /// have arrived. A one-on-one call additionally waits for the peer.
    async fn maybe_enter_connected(&mut self) {
        if !self.status.is_pending() || !self.response_received || !self.transport_connected {
            return;
        }

        if self.kind == CallKind::OneOnOne && self.roster.remote_count() == 0 {
            if self.deadlines.unanswered.is_none() {
                self.deadlines.unanswered = Some(Instant::now() + self.timeouts.unanswered);
                debug!(target: "call.actor.session", room_id = %self.room_id, "Waiting for peer");
            }
            return;
        }

        self.deadlines.unanswered = None;
        if !self.set_status(CallStatus::Connected) {
            return;
        }
        let now = Instant::now();
        self.duration.start(now);
        self.deadlines.duration_tick = Some(now + TICK);

        if let Some(registry) = &self.registry {
            if let Err(e) = registry.set_calling_state(&self.room_id, true).await {
                debug!(target: "call.actor.session", room_id = %self.room_id, error = %e, "Registry calling state not updated");
            }
        }

        self.check_promotion().await;
        self.reevaluate_idle();
    }

    fn enter_reconnecting(&mut self) {
        if !self.set_status(CallStatus::Reconnecting) {
            return;
        }
        self.duration.pause(Instant::now());
        self.deadlines.duration_tick = None;
        self.idle.reset();
    }

    fn enter_reconnected(&mut self) {
        if self.status != CallStatus::Reconnecting || !self.set_status(CallStatus::Reconnected) {
            return;
        }
        let now = Instant::now();
        self.duration.start(now);
        self.deadlines.duration_tick = Some(now + TICK);
        self.reevaluate_idle();
    }

    // ------------------------------------------------------------------------
    // Transport events
    // ------------------------------------------------------------------------

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        if self.status.is_terminal() {
            return;
        }

        match event {
            TransportEvent::StartCallResponse(response) => {
                self.handle_start_response(response).await;
            }
            TransportEvent::Connected { local, remote } => {
                self.transport_connected = true;
                self.add_participant(&local, true).await;
                for participant in &remote {
                    self.add_participant(participant, false).await;
                }
                self.publish_participants();

                if self.status.is_pending() {
                    self.maybe_enter_connected().await;
                } else {
                    self.check_promotion().await;
                    self.reevaluate_idle();
                }
            }
            TransportEvent::ParticipantConnected(snapshot) => {
                self.add_participant(&snapshot, false).await;
                self.deadlines.leave = None;
                self.publish_participants();

                if self.status.is_pending() {
                    self.maybe_enter_connected().await;
                } else {
                    self.check_promotion().await;
                    self.reevaluate_idle();
                }
            }
            TransportEvent::ParticipantDisconnected { identity } => {
                if !self.roster.remove(&identity) {
                    return;
                }
                debug!(target: "call.actor.session", room_id = %self.room_id, identity = %identity, "Participant left");
                self.publish_participants();

                if self.kind == CallKind::OneOnOne
                    && !self.status.is_pending()
                    && self.roster.remote_count() == 0
                    && self.deadlines.leave.is_none()
                {
                    self.deadlines.leave = Some(Instant::now() + self.timeouts.leave);
                }
                self.reevaluate_idle();
            }
            TransportEvent::TrackChanged {
                identity,
                source,
                state,
            } => {
                if self.roster.apply_track(&identity, source, state) {
                    self.publish_participants();
                }
                self.reevaluate_idle();
            }
            TransportEvent::ActiveSpeakersChanged(speakers) => {
                self.anyone_speaking = !speakers.is_empty();
                self.deadlines.speakers = Some(Instant::now() + speaker_debounce(self.anyone_speaking));
                self.pending_speakers = Some(speakers);
                self.reevaluate_idle();
            }
            TransportEvent::DataReceived {
                sender,
                topic,
                payload,
            } => {
                let (Some(sender), Some(topic)) = (sender, topic) else {
                    debug!(target: "call.actor.session", room_id = %self.room_id, "Dropping data packet without sender or topic");
                    return;
                };
                if let Some(message) = self.codec.decode(&sender, &topic, &payload).await {
                    self.handle_control_message(&sender, message).await;
                }
            }
            TransportEvent::ConnectionQualityChanged { identity, quality } => {
                let poor = matches!(quality, ConnectionQuality::Poor | ConnectionQuality::Lost);
                if poor
                    && identity == self.local_identity
                    && self.quality_advisory.allow(Instant::now())
                {
                    let error = CallError::PoorConnection;
                    metrics::record_call_error(error.error_type_label());
                    self.publishers.error(CallErrorEvent::new(error, false));
                }
            }
            TransportEvent::Reconnecting => {
                info!(target: "call.actor.session", room_id = %self.room_id, "Transport reconnecting");
                self.enter_reconnecting();
            }
            TransportEvent::Reconnected => {
                info!(target: "call.actor.session", room_id = %self.room_id, "Transport reconnected");
                self.enter_reconnected();
            }
            TransportEvent::Disconnected { reason } => {
                self.handle_disconnected(reason).await;
            }
        }
    }

    async fn handle_disconnected(&mut self, reason: DisconnectReason) {
        info!(
            target: "call.actor.session",
            room_id = %self.room_id,
            reason = reason.as_str(),
            status = self.status.as_str(),
            "Transport disconnected"
        );

        if reason.is_intentional() {
            self.finish(CallStatus::Disconnected, None).await;
        } else if reason == DisconnectReason::ReconnectFailed
            || self.status == CallStatus::Reconnecting
        {
            self.finish(CallStatus::ReconnectFailed, Some(CallError::ReconnectFailed))
                .await;
        } else {
            self.finish(
                CallStatus::ConnectedFailed,
                Some(CallError::Transport(reason.as_str().to_string())),
            )
            .await;
        }
    }

    async fn add_participant(&mut self, snapshot: &ParticipantSnapshot, is_local: bool) {
        if !self.roster.upsert(snapshot, is_local) {
            return;
        }
        if let Some(name) = self.contacts.display_name(account_of(&snapshot.identity)).await {
            self.roster.set_display_name(&snapshot.identity, name);
        }
    }

    fn flush_speakers(&mut self) {
        self.deadlines.speakers = None;
        let Some(speakers) = self.pending_speakers.take() else {
            return;
        };
        self.roster.apply_speakers(&speakers);
        let primary = self.roster.primary_speaker();
        self.publishers.active_speaker.send_if_modified(|current| {
            if *current == primary {
                false
            } else {
                *current = primary;
                true
            }
        });
        self.publish_participants();
    }

    async fn check_promotion(&mut self) {
        if self.kind != CallKind::OneOnOne || self.roster.remote_count() <= 1 {
            return;
        }
        info!(
            target: "call.actor.session",
            room_id = %self.room_id,
            remote = self.roster.remote_count(),
            "Promoting one-on-one call to instant"
        );
        self.kind = CallKind::Instant;
        self.deadlines.leave = None;
        self.publishers.call_kind.send_replace(self.kind);
        if let Some(registry) = &self.registry {
            if let Err(e) = registry.promote_to_instant(&self.room_id).await {
                debug!(target: "call.actor.session", room_id = %self.room_id, error = %e, "Registry promotion failed");
            }
        }
        self.reevaluate_idle();
    }

    async fn on_unanswered_timeout(&mut self) {
        self.deadlines.unanswered = None;
        if !self.status.is_pending() {
            return;
        }
        info!(target: "call.actor.session", room_id = %self.room_id, "Nobody answered");
        self.publishers.notice(SessionNotice::NoAnswer);
        self.room_ended = true;
        self.finish(CallStatus::Disconnected, None).await;
    }

    async fn on_leave_timeout(&mut self) {
        self.deadlines.leave = None;
        if self.kind != CallKind::OneOnOne || self.roster.remote_count() > 0 {
            return;
        }
        info!(target: "call.actor.session", room_id = %self.room_id, "Peer did not come back");
        self.publishers.notice(SessionNotice::PeerLeft);
        self.room_ended = true;
        self.finish(CallStatus::Disconnected, None).await;
    }

    // ------------------------------------------------------------------------
    // Idle detection and tickers
    // ------------------------------------------------------------------------

    fn reevaluate_idle(&mut self) {
        if !self.status.is_in_call() {
            self.idle.reset();
            return;
        }
        let mode = idle_mode(
            self.roster.remote_count(),
            self.roster.any_microphone_live(),
            self.anyone_speaking,
        );
        if self.idle.update(mode, Instant::now(), &self.idle_timeouts) {
            debug!(
                target: "call.actor.session",
                room_id = %self.room_id,
                mode = mode.map(|m| m.as_str()),
                "Idle detection re-armed"
            );
        }
    }

    fn restart_idle_detection(&mut self) {
        self.idle.reset();
        self.publishers.no_activity.send_replace(false);
        self.reevaluate_idle();
    }

    fn on_idle_timeout(&mut self) {
        if let Some(mode) = self.idle.fire() {
            info!(target: "call.actor.session", room_id = %self.room_id, mode = mode.as_str(), "No activity");
            self.publishers.no_activity.send_replace(true);
            self.publishers.notice(SessionNotice::NoActivity { mode });
        }
    }

    fn on_duration_tick(&mut self) {
        let now = Instant::now();
        let elapsed = self.duration.elapsed(now);
        self.publishers.duration.send_replace(format_duration(elapsed.as_secs()));
        self.deadlines.duration_tick = self.duration.is_running().then(|| now + TICK);
    }

    fn on_countdown_tick(&mut self) {
        let Some(ends) = self.countdown_ends else {
            self.deadlines.countdown_tick = None;
            return;
        };
        let now = Instant::now();
        let remaining = seconds_until(ends, now);
        self.publishers.countdown.send_replace(Some(format_duration(remaining)));
        self.deadlines.countdown_tick = (remaining > 0).then(|| now + TICK);
    }

    // ------------------------------------------------------------------------
    // Control messages
    // ------------------------------------------------------------------------

    async fn handle_control_message(&mut self, sender: &str, message: ControlMessage) {
        match message {
            ControlMessage::Chat { text, kind, .. } => {
                let display_name = self.contacts.display_name(account_of(sender)).await;
                self.publishers.notice(SessionNotice::Barrage {
                    sender: sender.to_string(),
                    display_name,
                    text,
                    kind,
                });
            }
            ref request @ ControlMessage::MuteRequest { .. } => {
                if !request.is_addressed_to(&self.local_identity) {
                    return;
                }
                info!(target: "call.actor.session", room_id = %self.room_id, by = %sender, "Muted by peer");
                if let Err(e) = self.apply_local_microphone(false).await {
                    warn!(target: "call.actor.session", room_id = %self.room_id, error = %e, "Failed to mute microphone");
                }
                self.publishers.notice(SessionNotice::MutedByPeer {
                    by: sender.to_string(),
                });
            }
            ControlMessage::MuteState {
                identity, muted, ..
            } => {
                let state = TrackState {
                    enabled: !muted,
                    muted,
                };
                if self.roster.apply_track(&identity, TrackSource::Microphone, state) {
                    self.publish_participants();
                    self.reevaluate_idle();
                }
            }
            ref request @ ControlMessage::ResumeCall { .. } => {
                if !request.is_addressed_to(&self.local_identity) {
                    return;
                }
                self.restart_idle_detection();
                self.publishers.notice(SessionNotice::ContinueRequested {
                    by: sender.to_string(),
                });
            }
            ControlMessage::EndCall { .. } => {
                info!(target: "call.actor.session", room_id = %self.room_id, by = %sender, "Call ended by peer");
                self.publishers.notice(SessionNotice::EndedByPeer {
                    by: sender.to_string(),
                });
                self.room_ended = true;
                self.finish(CallStatus::Disconnected, None).await;
            }
            ControlMessage::Hands { raised, hands, .. } => self.apply_hands(raised, hands),
            ControlMessage::Countdown { action, timer } => {
                self.apply_countdown(action, &timer).await;
            }
        }
    }

    fn apply_hands(&mut self, raised: bool, hands: Vec<RaisedHand>) {
        let local_listed = hands.iter().any(|h| h.identity == self.local_identity);
        if local_listed {
            self.local_hand_raised = true;
        } else if !raised {
            self.local_hand_raised = false;
        }
        self.roster
            .set_hands(hands.iter().map(|h| h.identity.as_str()).collect::<Vec<_>>());
        self.publishers.hands.send_replace(Arc::from(hands));
        self.publish_participants();
    }

    async fn apply_countdown(&mut self, action: CountdownAction, timer: &CountdownTimer) {
        if action == CountdownAction::Clear {
            self.countdown_ends = None;
            self.deadlines.countdown_tick = None;
            self.publishers.countdown.send_replace(None);
            return;
        }

        let remaining = timer.remaining_seconds();
        let now = Instant::now();
        self.countdown_ends = Some(now + Duration::from_secs(remaining));
        self.publishers.countdown.send_replace(Some(format_duration(remaining)));
        self.deadlines.countdown_tick = (remaining > 0).then(|| now + TICK);

        if matches!(action, CountdownAction::Set | CountdownAction::Restart) {
            let operator = timer.operator_identity.clone();
            let display_name = self.contacts.display_name(account_of(&operator)).await;
            self.publishers.notice(SessionNotice::CountdownStarted {
                operator,
                display_name,
                remaining_seconds: remaining,
            });
        }
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    async fn set_mic_enabled(&mut self, enabled: bool) -> Result<(), CallError> {
        self.ensure_live()?;
        self.apply_local_microphone(enabled).await
    }

    async fn apply_local_microphone(&mut self, enabled: bool) -> Result<(), CallError> {
        self.transport
            .set_microphone_enabled(enabled)
            .await
            .map_err(|e| CallError::Transport(e.to_string()))?;

        let state = TrackState {
            enabled,
            muted: !enabled,
        };
        if self.roster.apply_local_track(TrackSource::Microphone, state) {
            self.publish_participants();
        }
        let outcome = self
            .send_control(ControlMessage::MuteState {
                identity: self.local_identity.clone(),
                muted: !enabled,
                sent_at: now_millis(),
            })
            .await;
        if let Err(e) = outcome {
            debug!(target: "call.actor.session", room_id = %self.room_id, error = %e, "Mute-state message not delivered");
        }
        self.reevaluate_idle();
        Ok(())
    }

    async fn set_camera_enabled(&mut self, enabled: bool) -> Result<(), CallError> {
        self.ensure_live()?;
        self.transport
            .set_camera_enabled(enabled)
            .await
            .map_err(|e| CallError::Transport(e.to_string()))?;

        let state = TrackState {
            enabled,
            muted: !enabled,
        };
        if self.roster.apply_local_track(TrackSource::Camera, state) {
            self.publish_participants();
        }
        Ok(())
    }

    async fn toggle_mute(&mut self, identity: &str) -> Result<SendOutcome, CallError> {
        self.ensure_live()?;
        if identity == self.local_identity {
            return Err(CallError::InvalidState(
                "use set_mic_enabled for the local microphone".to_string(),
            ));
        }
        if !self.roster.contains(identity) {
            return Err(CallError::NotFound(format!("participant {identity}")));
        }
        self.send_control(ControlMessage::MuteRequest {
            identities: vec![identity.to_string()],
            sent_at: now_millis(),
        })
        .await
    }

    async fn send_barrage(&mut self, text: String, kind: Option<i32>) -> Result<SendOutcome, CallError> {
        self.ensure_live()?;
        if text.trim().is_empty() {
            return Ok(SendOutcome::Dropped);
        }
        self.send_control(ControlMessage::Chat {
            text,
            kind,
            sent_at: now_millis(),
        })
        .await
    }

    async fn set_hand_raised(&mut self, raised: bool) -> Result<SendOutcome, CallError> {
        self.ensure_live()?;
        let sent_at = now_millis();
        let outcome = self
            .send_control(ControlMessage::Hands {
                raised,
                hands: vec![RaisedHand {
                    identity: self.local_identity.clone(),
                    ts: Some(sent_at),
                }],
                sent_at,
            })
            .await?;
        if outcome == SendOutcome::Sent {
            self.local_hand_raised = raised;
        }
        Ok(outcome)
    }

    async fn send_continue_call(&mut self, identity: String) -> Result<SendOutcome, CallError> {
        self.ensure_live()?;
        self.send_control(ControlMessage::ResumeCall {
            identities: vec![identity],
            sent_at: now_millis(),
        })
        .await
    }

    async fn end_call(&mut self) -> Result<(), CallError> {
        self.ensure_live()?;
        let outcome = self
            .send_control(ControlMessage::EndCall {
                sent_at: now_millis(),
            })
            .await;
        if let Err(e) = outcome {
            debug!(target: "call.actor.session", room_id = %self.room_id, error = %e, "End-call message not delivered");
        }
        self.room_ended = true;
        self.finish(CallStatus::Disconnected, None).await;
        Ok(())
    }

    async fn send_control(&self, message: ControlMessage) -> Result<SendOutcome, CallError> {
        let Some(packet) = self.codec.encode(&message) else {
            return Ok(SendOutcome::Dropped);
        };
        self.transport
            .publish_data(packet.payload, packet.topic, packet.targets)
            .await
            .map_err(|e| CallError::Transport(e.to_string()))?;
        Ok(SendOutcome::Sent)
    }

    fn get_state(&self) -> SessionState {
        SessionState {
            room_id: self.room_id.clone(),
            status: self.status,
            kind: self.kind,
            role: self.role,
            participants: self.roster.snapshot(),
            connected_url: self.connected_url.clone(),
            duration_secs: self.duration.elapsed(Instant::now()).as_secs(),
            e2ee_active: self.codec.has_session_key(),
            no_activity: *self.publishers.no_activity.borrow(),
            local_hand_raised: self.local_hand_raised,
            mailbox_depth: self.mailbox.current_depth(),
        }
    }

    // ------------------------------------------------------------------------
    // Status and teardown
    // ------------------------------------------------------------------------

    fn ensure_live(&self) -> Result<(), CallError> {
        if self.status.is_terminal() {
            return Err(CallError::InvalidState(format!(
                "call is {}",
                self.status.as_str()
            )));
        }
        Ok(())
    }

    /// Move to `next`. Returns `false` if the transition is not allowed.
    fn set_status(&mut self, next: CallStatus) -> bool {
        if self.status == next {
            return false;
        }
        if !self.status.can_transition_to(next) {
            debug!(
                target: "call.actor.session",
                room_id = %self.room_id,
                from = self.status.as_str(),
                to = next.as_str(),
                "Ignoring status transition"
            );
            return false;
        }
        info!(
            target: "call.actor.session",
            room_id = %self.room_id,
            from = self.status.as_str(),
            to = next.as_str(),
            "Call status changed"
        );
        metrics::record_status_transition(next.as_str());
        self.status = next;
        self.publishers.status.send_replace(next);
        true
    }

    /// Fail the session with `error`. Returns the error for the caller.
    async fn fail(&mut self, error: CallError) -> CallError {
        self.finish(CallStatus::ConnectedFailed, Some(error.clone()))
            .await;
        error
    }

    /// Enter a terminal status, surface `error` if any, and release resources.
    async fn finish(&mut self, status: CallStatus, error: Option<CallError>) {
        if self.status.is_terminal() {
            self.release().await;
            return;
        }
        if !self.set_status(status) {
            self.set_status(CallStatus::ConnectedFailed);
        }
        if let Some(error) = error {
            warn!(
                target: "call.actor.session",
                room_id = %self.room_id,
                error = %error,
                status = self.status.as_str(),
                "Call failed"
            );
            metrics::record_call_error(error.error_type_label());
            self.publishers.error(CallErrorEvent::new(error, true));
        }
        self.release().await;
    }

    /// Release transport and registry resources exactly once.
    async fn release(&mut self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }

        let now = Instant::now();
        let was_connected = self.duration.elapsed(now) > Duration::ZERO || self.duration.is_running();
        self.duration.pause(now);
        self.deadlines = Deadlines::default();
        self.idle.reset();
        self.pending_speakers = None;
        self.events = None;

        self.transport.disconnect().await;

        if let Some(registry) = &self.registry {
            let result = if self.room_ended || self.kind == CallKind::OneOnOne {
                registry.mark_ended(&self.room_id).await
            } else {
                registry.set_calling_state(&self.room_id, false).await
            };
            if let Err(e) = result {
                debug!(target: "call.actor.session", room_id = %self.room_id, error = %e, "Registry not updated on release");
            }
        }

        if was_connected {
            metrics::record_call_duration(self.duration.elapsed(now));
        }
        self.metrics
            .session_ended(self.status != CallStatus::Disconnected);

        self.roster.clear();
        self.publish_participants();

        info!(
            target: "call.actor.session",
            room_id = %self.room_id,
            status = self.status.as_str(),
            duration_secs = self.duration.elapsed(now).as_secs(),
            "Session released"
        );
    }

    fn publish_participants(&self) {
        self.publishers.participants.send_replace(self.roster.snapshot());
    }
}

/// Next event of the current connection; pending while there is none.
async fn next_event(events: &mut Option<mpsc::Receiver<TransportEvent>>) -> Option<TransportEvent> {
    match events {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

/// Sleep until `deadline`; pending forever when unarmed.
async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Whole seconds left until `ends`, rounded up.
fn seconds_until(ends: Instant, now: Instant) -> u64 {
    let left = ends.saturating_duration_since(now);
    left.as_secs() + u64::from(left.subsec_nanos() > 0)
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
