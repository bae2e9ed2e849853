//! Collaborator interfaces consumed by the engine.
//!
//! The media SDK, key store, contact book and endpoint prober live outside
//! this crate. Sessions and the selection engine only see these traits, so
//! tests drive them with the doubles in `call-test-utils`.

use crate::config::IdleTimeouts;
use async_trait::async_trait;
use bytes::Bytes;
use common::secret::{SecretBox, SecretString};
use signaling_protocol::Topic;
use thiserror::Error;
use tokio::sync::mpsc;

/// Failure reported by the media transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection timed out")]
    Timeout,

    #[error("TLS handshake failed: {0}")]
    Tls(String),

    #[error("Unresolved host: {0}")]
    UnresolvedHost(String),

    #[error("Not authorized: {0}")]
    Unauthorized(String),

    #[error("Start call rejected: {0}")]
    StartCallRejected(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Transport failure: {0}")]
    Other(String),
}

impl TransportError {
    /// Whether the failure is a reachability problem worth trying the next URL for.
    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            TransportError::Timeout | TransportError::Tls(_) | TransportError::UnresolvedHost(_)
        )
    }
}

/// Why the transport closed the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// We asked for it.
    ClientInitiated,
    DuplicateIdentity,
    ServerShutdown,
    ParticipantRemoved,
    RoomDeleted,
    StateMismatch,
    JoinFailure,
    Migration,
    SignalClose,
    /// The transport's own reconnection attempts ran out.
    ReconnectFailed,
    Unknown,
}

impl DisconnectReason {
    /// Whether the local side ended the session on purpose.
    #[must_use]
    pub const fn is_intentional(&self) -> bool {
        matches!(self, DisconnectReason::ClientInitiated)
    }

    /// Returns the reason as a string for logs and error details.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::ClientInitiated => "client_initiated",
            DisconnectReason::DuplicateIdentity => "duplicate_identity",
            DisconnectReason::ServerShutdown => "server_shutdown",
            DisconnectReason::ParticipantRemoved => "participant_removed",
            DisconnectReason::RoomDeleted => "room_deleted",
            DisconnectReason::StateMismatch => "state_mismatch",
            DisconnectReason::JoinFailure => "join_failure",
            DisconnectReason::Migration => "migration",
            DisconnectReason::SignalClose => "signal_close",
            DisconnectReason::ReconnectFailed => "reconnect_failed",
            DisconnectReason::Unknown => "unknown",
        }
    }
}

/// Media track kinds whose state the engine tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackSource {
    Microphone,
    Camera,
    ScreenShare,
}

/// Published/enabled and muted flags of one track.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackState {
    pub enabled: bool,
    pub muted: bool,
}

impl TrackState {
    /// Track is published and not muted.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        self.enabled && !self.muted
    }
}

/// Participant as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantSnapshot {
    pub identity: String,
    pub microphone: TrackState,
    pub camera: TrackState,
    pub screen_share: TrackState,
}

impl ParticipantSnapshot {
    /// Participant with no published tracks.
    #[must_use]
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            microphone: TrackState::default(),
            camera: TrackState::default(),
            screen_share: TrackState::default(),
        }
    }

    /// Same participant with a live microphone.
    #[must_use]
    pub fn with_microphone(mut self) -> Self {
        self.microphone = TrackState {
            enabled: true,
            muted: false,
        };
        self
    }
}

/// One entry of an active-speaker update.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakerLevel {
    pub identity: String,
    pub audio_level: f32,
}

/// Link quality as graded by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionQuality {
    Excellent,
    Good,
    Poor,
    Lost,
}

/// Server's reply to our start-call request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartCallResponse {
    /// Server-assigned room id.
    pub room_id: String,
    /// Zero on success.
    pub status: i32,
    /// Server-provided reason for a non-zero status.
    pub reason: String,
    /// Session key encrypted to our identity key.
    pub encrypted_key: Option<Bytes>,
    /// Ephemeral master key material needed to recover the session key.
    pub encrypted_mk: Option<Bytes>,
}

/// Events the transport delivers for one connection.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    StartCallResponse(StartCallResponse),
    Connected {
        local: ParticipantSnapshot,
        remote: Vec<ParticipantSnapshot>,
    },
    ParticipantConnected(ParticipantSnapshot),
    ParticipantDisconnected {
        identity: String,
    },
    TrackChanged {
        identity: String,
        source: TrackSource,
        state: TrackState,
    },
    ActiveSpeakersChanged(Vec<SpeakerLevel>),
    DataReceived {
        sender: Option<String>,
        topic: Option<String>,
        payload: Bytes,
    },
    ConnectionQualityChanged {
        identity: String,
        quality: ConnectionQuality,
    },
    Reconnecting,
    Reconnected,
    Disconnected {
        reason: DisconnectReason,
    },
}

/// Everything the transport needs to join a call.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    /// Application token.
    pub app_token: SecretString,
    /// Opaque, already-encoded start-call parameters.
    pub call_params: Bytes,
    /// Prefer the QUIC signaling path.
    pub use_quic_signal: bool,
}

/// Real-time media transport (one connection at a time).
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Connect to `url`. Events for this connection go to `events`.
    async fn connect(
        &self,
        url: &str,
        request: &ConnectRequest,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<(), TransportError>;

    /// Close the current connection, if any.
    async fn disconnect(&self);

    /// Publish a data packet, to `targets` only when given.
    async fn publish_data(
        &self,
        payload: Bytes,
        topic: Topic,
        targets: Option<Vec<String>>,
    ) -> Result<(), TransportError>;

    async fn set_microphone_enabled(&self, enabled: bool) -> Result<(), TransportError>;

    async fn set_camera_enabled(&self, enabled: bool) -> Result<(), TransportError>;
}

/// Key store and primitives for end-to-end encryption.
pub trait CryptoProvider: Send + Sync {
    /// Local identity private key, if provisioned.
    fn local_private_key(&self) -> Option<SecretBox<Vec<u8>>>;

    /// Recover the per-call session key from the start-call response.
    fn decrypt_session_key(
        &self,
        private_key: &[u8],
        encrypted_key: &[u8],
        encrypted_mk: &[u8],
    ) -> Option<SecretBox<Vec<u8>>>;

    /// Sign `data` with the local private key.
    fn sign(&self, private_key: &[u8], data: &[u8]) -> Vec<u8>;

    /// Sign and encrypt a control payload.
    fn encrypt_control_message(
        &self,
        plaintext: &[u8],
        private_key: &[u8],
        session_key: &[u8],
        timestamp: i64,
    ) -> Option<Vec<u8>>;

    /// Decrypt and verify a control payload from a peer.
    fn decrypt_control_message(
        &self,
        ciphertext: &[u8],
        sender_public_key: &str,
        session_key: &[u8],
    ) -> Option<Vec<u8>>;
}

/// Contact directory.
#[async_trait]
pub trait ContactResolver: Send + Sync {
    /// Identity public key of an account.
    async fn public_key(&self, account: &str) -> Option<String>;

    /// Display name of an account.
    async fn display_name(&self, account: &str) -> Option<String>;
}

/// Outcome of one endpoint probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStatus {
    Success,
    Error,
}

impl ProbeStatus {
    /// Returns the status as a string for metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ProbeStatus::Success => "success",
            ProbeStatus::Error => "error",
        }
    }
}

/// One latency measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    pub status: ProbeStatus,
    pub latency_ms: u64,
}

impl ProbeResult {
    #[must_use]
    pub const fn success(latency_ms: u64) -> Self {
        Self {
            status: ProbeStatus::Success,
            latency_ms,
        }
    }

    #[must_use]
    pub const fn error() -> Self {
        Self {
            status: ProbeStatus::Error,
            latency_ms: 0,
        }
    }
}

/// Measures reachability and latency of a media-server endpoint.
#[async_trait]
pub trait EndpointProber: Send + Sync {
    async fn measure(&self, url: &str) -> ProbeResult;
}

/// Runtime settings the engine reads from its host.
pub trait ConfigSource: Send + Sync {
    /// Configured media-server URLs, in priority order.
    fn candidate_server_urls(&self) -> Vec<String>;

    fn idle_timeouts(&self) -> IdleTimeouts;

    fn use_quic_signal(&self) -> bool;

    fn e2ee_enabled(&self) -> bool;
}
