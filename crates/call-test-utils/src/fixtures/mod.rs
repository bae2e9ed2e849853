//! Pre-configured test data for call-session testing.
//!
//! Provides:
//! - Fixed identities, rooms, server URLs and keys
//! - Transport event builders (start-call responses, joins, peer packets)
//! - [`TestCall`], a builder that spawns a session wired to mocks
//!
//! Every fixed key is 32 bytes, the size `MockCrypto` expects.

use crate::{MockContacts, MockCrypto, MockTransport, StaticConfig};
use bytes::Bytes;
use call_engine::actors::{
    ActorMetrics, CallRegistryHandle, CallSessionController, CallSessionHandle, SessionDeps,
    SessionParams, SessionTimeouts,
};
use call_engine::ports::{
    ParticipantSnapshot, SpeakerLevel, StartCallResponse, TrackSource, TrackState, TransportEvent,
};
use call_engine::signaling::SignalingCodec;
use common::secret::{SecretBox, SecretString};
use common::types::{CallKind, CallRole, CallerInfo, RoomId};
use signaling_protocol::ControlMessage;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const LOCAL_ACCOUNT: &str = "+1001";
pub const LOCAL_IDENTITY: &str = "+1001.1";
pub const PEER_ACCOUNT: &str = "+1002";
pub const PEER_IDENTITY: &str = "+1002.1";
pub const THIRD_ACCOUNT: &str = "+1003";
pub const THIRD_IDENTITY: &str = "+1003.1";

pub const ROOM_ID: &str = "room-42";
pub const CONVERSATION_ID: &str = "conv-7";

pub const SERVER_A: &str = "https://media-a.example.com";
pub const SERVER_B: &str = "https://media-b.example.com";
pub const SERVER_C: &str = "https://media-c.example.com";

const LOCAL_KEY_HEX: &str = "0f1e2d3c4b5a69788796a5b4c3d2e1f00112233445566778899aabbccddeeff0";
const PEER_KEY_HEX: &str = "a1b2c3d4e5f60718293a4b5c6d7e8f90a1b2c3d4e5f60718293a4b5c6d7e8f90";
const THIRD_KEY_HEX: &str = "3141592653589793238462643383279502884197169399375105820974944592";
const SESSION_KEY_HEX: &str = "deadbeefcafebabe0123456789abcdeffedcba9876543210baadf00d8badf00d";

/// Identity key of the local participant.
#[must_use]
pub fn local_key() -> Vec<u8> {
    hex::decode(LOCAL_KEY_HEX).unwrap()
}

/// Identity key of the first remote participant.
#[must_use]
pub fn peer_key() -> Vec<u8> {
    hex::decode(PEER_KEY_HEX).unwrap()
}

/// Identity key of the second remote participant.
#[must_use]
pub fn third_key() -> Vec<u8> {
    hex::decode(THIRD_KEY_HEX).unwrap()
}

/// Per-call session key handed out by the server.
#[must_use]
pub fn session_key() -> Vec<u8> {
    hex::decode(SESSION_KEY_HEX).unwrap()
}

/// Directory knowing the peer and third participant.
#[must_use]
pub fn test_contacts() -> MockContacts {
    MockContacts::new()
        .with_public_key(LOCAL_ACCOUNT, MockCrypto::public_key_of(&local_key()))
        .with_display_name(LOCAL_ACCOUNT, "Me")
        .with_public_key(PEER_ACCOUNT, MockCrypto::public_key_of(&peer_key()))
        .with_display_name(PEER_ACCOUNT, "Alice")
        .with_public_key(THIRD_ACCOUNT, MockCrypto::public_key_of(&third_key()))
        .with_display_name(THIRD_ACCOUNT, "Bob")
}

#[must_use]
pub fn urls(list: &[&str]) -> Vec<String> {
    list.iter().map(|u| (*u).to_string()).collect()
}

// ============================================================================
// Transport events
// ============================================================================

/// Successful start-call response without key material.
#[must_use]
pub fn start_call_ok(room_id: &str) -> TransportEvent {
    start_call_status(room_id, 0, "")
}

/// Start-call response with the given status.
#[must_use]
pub fn start_call_status(room_id: &str, status: i32, reason: &str) -> TransportEvent {
    TransportEvent::StartCallResponse(StartCallResponse {
        room_id: room_id.to_string(),
        status,
        reason: reason.to_string(),
        encrypted_key: None,
        encrypted_mk: None,
    })
}

/// Successful start-call response carrying [`session_key`] sealed for the
/// local identity.
#[must_use]
pub fn start_call_with_key(room_id: &str) -> TransportEvent {
    let (encrypted_key, encrypted_mk) = MockCrypto::seal_session_key(&local_key(), &session_key());
    TransportEvent::StartCallResponse(StartCallResponse {
        room_id: room_id.to_string(),
        status: 0,
        reason: String::new(),
        encrypted_key: Some(encrypted_key),
        encrypted_mk: Some(encrypted_mk),
    })
}

/// Room joined with `remotes` already present. Remote microphones are off.
#[must_use]
pub fn connected(remotes: &[&str]) -> TransportEvent {
    TransportEvent::Connected {
        local: ParticipantSnapshot::new(LOCAL_IDENTITY),
        remote: remotes.iter().map(|id| ParticipantSnapshot::new(*id)).collect(),
    }
}

#[must_use]
pub fn joined(identity: &str) -> TransportEvent {
    TransportEvent::ParticipantConnected(ParticipantSnapshot::new(identity))
}

#[must_use]
pub fn left(identity: &str) -> TransportEvent {
    TransportEvent::ParticipantDisconnected {
        identity: identity.to_string(),
    }
}

/// `identity` publishes an unmuted microphone.
#[must_use]
pub fn microphone_on(identity: &str) -> TransportEvent {
    TransportEvent::TrackChanged {
        identity: identity.to_string(),
        source: TrackSource::Microphone,
        state: TrackState {
            enabled: true,
            muted: false,
        },
    }
}

/// Active-speaker update; an empty list means nobody is speaking.
#[must_use]
pub fn speaking(levels: &[(&str, f32)]) -> TransportEvent {
    TransportEvent::ActiveSpeakersChanged(
        levels
            .iter()
            .map(|(identity, audio_level)| SpeakerLevel {
                identity: (*identity).to_string(),
                audio_level: *audio_level,
            })
            .collect(),
    )
}

/// Data packet carrying `message` as sent by `sender` holding `sender_key`.
///
/// Encrypted topics are sealed with [`session_key`].
#[must_use]
pub fn peer_packet(sender: &str, sender_key: &[u8], message: &ControlMessage) -> TransportEvent {
    let mut codec = SignalingCodec::new(
        Arc::new(MockCrypto::new(sender_key.to_vec())),
        Arc::new(test_contacts()),
    );
    codec.set_session_key(SecretBox::new(Box::new(session_key())));
    let packet = codec.encode(message).unwrap();
    TransportEvent::DataReceived {
        sender: Some(sender.to_string()),
        topic: Some(packet.topic.as_str().to_string()),
        payload: packet.payload,
    }
}

#[must_use]
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Let spawned actors drain their mailboxes and expired deadlines.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

// ============================================================================
// Sessions
// ============================================================================

/// Builder for a session wired to mocks.
///
/// Defaults: E2EE on, the local identity holds [`local_key`], the contact
/// directory is [`test_contacts`], no registry.
pub struct TestCall {
    params: SessionParams,
    transport: Arc<MockTransport>,
    crypto: MockCrypto,
    contacts: MockContacts,
    config: StaticConfig,
    registry: Option<CallRegistryHandle>,
    metrics: Arc<ActorMetrics>,
}

impl TestCall {
    /// Call started by the local user.
    #[must_use]
    pub fn outgoing(kind: CallKind) -> Self {
        Self::with_params(SessionParams {
            role: CallRole::Caller,
            kind,
            user_initiated: true,
            local_identity: LOCAL_IDENTITY.to_string(),
            caller: CallerInfo {
                uid: LOCAL_ACCOUNT.to_string(),
                did: 1,
            },
            room_id: None,
            conversation_id: None,
            call_name: None,
            call_params: Some(Bytes::from_static(b"{\"type\":\"start\"}")),
            timeouts: SessionTimeouts::default(),
        })
    }

    /// Invitation to `room_id` accepted by the local user.
    #[must_use]
    pub fn incoming(kind: CallKind, room_id: &str) -> Self {
        Self::with_params(SessionParams {
            role: CallRole::Callee,
            kind,
            user_initiated: true,
            local_identity: LOCAL_IDENTITY.to_string(),
            caller: CallerInfo {
                uid: PEER_ACCOUNT.to_string(),
                did: 1,
            },
            room_id: Some(RoomId::new(room_id)),
            conversation_id: None,
            call_name: None,
            call_params: Some(Bytes::from_static(b"{\"type\":\"join\"}")),
            timeouts: SessionTimeouts::default(),
        })
    }

    fn with_params(params: SessionParams) -> Self {
        Self {
            params,
            transport: Arc::new(MockTransport::default()),
            crypto: MockCrypto::new(local_key()),
            contacts: test_contacts(),
            config: StaticConfig::new().with_e2ee(),
            registry: None,
            metrics: ActorMetrics::new(),
        }
    }

    #[must_use]
    pub fn with_transport(mut self, transport: MockTransport) -> Self {
        self.transport = Arc::new(transport);
        self
    }

    #[must_use]
    pub fn with_crypto(mut self, crypto: MockCrypto) -> Self {
        self.crypto = crypto;
        self
    }

    #[must_use]
    pub fn with_contacts(mut self, contacts: MockContacts) -> Self {
        self.contacts = contacts;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: StaticConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_registry(mut self, registry: CallRegistryHandle) -> Self {
        self.registry = Some(registry);
        self
    }

    #[must_use]
    pub fn with_timeouts(mut self, timeouts: SessionTimeouts) -> Self {
        self.params.timeouts = timeouts;
        self
    }

    #[must_use]
    pub fn with_conversation(mut self, conversation_id: &str) -> Self {
        self.params.conversation_id = Some(conversation_id.to_string());
        self
    }

    #[must_use]
    pub fn without_call_params(mut self) -> Self {
        self.params.call_params = None;
        self
    }

    #[must_use]
    pub fn spawn(self) -> TestSession {
        let e2ee = self.config.e2ee_enabled;
        let deps = SessionDeps {
            transport: Arc::clone(&self.transport) as _,
            crypto: Arc::new(self.crypto),
            contacts: Arc::new(self.contacts),
            config: Arc::new(self.config),
            app_token: SecretString::from("test-app-token"),
            registry: self.registry,
            metrics: Arc::clone(&self.metrics),
        };
        let (handle, task) = CallSessionController::spawn(self.params, deps, CancellationToken::new());
        TestSession {
            handle,
            task,
            transport: self.transport,
            metrics: self.metrics,
            e2ee,
        }
    }
}

/// A spawned session and the mocks behind it.
pub struct TestSession {
    pub handle: CallSessionHandle,
    pub task: JoinHandle<()>,
    pub transport: Arc<MockTransport>,
    pub metrics: Arc<ActorMetrics>,
    e2ee: bool,
}

impl TestSession {
    /// Connect to [`SERVER_A`], answer the start-call request for
    /// [`ROOM_ID`] and join the room with `remotes` present.
    pub async fn establish(&self, remotes: &[&str]) {
        self.handle.connect(urls(&[SERVER_A])).await.unwrap();
        let response = if self.e2ee {
            start_call_with_key(ROOM_ID)
        } else {
            start_call_ok(ROOM_ID)
        };
        assert!(self.transport.emit(response).await);
        assert!(self.transport.emit(connected(remotes)).await);
        settle().await;
    }

    /// Push `event` and let the session process it.
    pub async fn emit(&self, event: TransportEvent) {
        assert!(self.transport.emit(event).await, "session is not listening");
        settle().await;
    }
}
