//! `SignalingCodec` - typed control messages to and from data-channel packets.
//!
//! Chat, mute, mute-state, resume-call and end-call payloads are signed and
//! encrypted with the per-call session key. Hand and countdown packets are
//! relayed by the server and travel as plain signed envelopes.
//!
//! Inbound failures never escape: a packet that cannot be parsed, decrypted
//! or attributed is logged and dropped.

use crate::observability::metrics;
use crate::ports::{ContactResolver, CryptoProvider};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use common::secret::{ExposeSecret, SecretBox};
use common::types::account_of;
use signaling_protocol::{
    decode_payload, encode_payload, unwrap_packet, wrap_packet, CodecError, ControlMessage, Topic,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// A control message ready for `MediaTransport::publish_data`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundPacket {
    pub topic: Topic,
    pub payload: Bytes,
    /// Recipients; `None` broadcasts to the room.
    pub targets: Option<Vec<String>>,
}

#[derive(Debug, Error)]
enum DecodeError {
    #[error("unknown topic {0}")]
    UnknownTopic(String),
    #[error("no session key")]
    NoSessionKey,
    #[error("no public key for sender")]
    UnknownSender,
    #[error("decryption failed")]
    Decrypt,
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl DecodeError {
    const fn label(&self) -> &'static str {
        match self {
            DecodeError::UnknownTopic(_) => "unknown_topic",
            DecodeError::NoSessionKey => "no_session_key",
            DecodeError::UnknownSender => "unknown_sender",
            DecodeError::Decrypt => "decrypt",
            DecodeError::Codec(_) => "malformed",
        }
    }
}

/// Per-session encoder/decoder of control messages.
pub struct SignalingCodec {
    crypto: Arc<dyn CryptoProvider>,
    contacts: Arc<dyn ContactResolver>,
    session_key: Option<SecretBox<Vec<u8>>>,
}

impl SignalingCodec {
    #[must_use]
    pub fn new(crypto: Arc<dyn CryptoProvider>, contacts: Arc<dyn ContactResolver>) -> Self {
        Self {
            crypto,
            contacts,
            session_key: None,
        }
    }

    /// Install the session key recovered during key exchange.
    pub fn set_session_key(&mut self, key: SecretBox<Vec<u8>>) {
        self.session_key = Some(key);
    }

    #[must_use]
    pub fn has_session_key(&self) -> bool {
        self.session_key.is_some()
    }

    /// Encode `message` for publishing.
    ///
    /// Returns `None` when an encrypted topic is missing the local private
    /// key or the session key; the message is dropped, not queued.
    #[must_use]
    pub fn encode(&self, message: &ControlMessage) -> Option<OutboundPacket> {
        let topic = message.topic();
        let payload = match encode_payload(message) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(target: "call.signaling", topic = %topic, error = %e, "Failed to serialize control message");
                return None;
            }
        };
        let private_key = self.crypto.local_private_key();

        let bytes = if topic.requires_encryption() {
            let (Some(private_key), Some(session_key)) = (private_key.as_ref(), self.session_key.as_ref())
            else {
                debug!(
                    target: "call.signaling",
                    topic = %topic,
                    has_private_key = private_key.is_some(),
                    has_session_key = self.session_key.is_some(),
                    "Dropping control message, encryption keys unavailable"
                );
                metrics::record_control_message_dropped("outbound", "no_key");
                return None;
            };
            let Some(cipher) = self.crypto.encrypt_control_message(
                &payload,
                private_key.expose_secret(),
                session_key.expose_secret(),
                message.sent_at(),
            ) else {
                warn!(target: "call.signaling", topic = %topic, "Control message encryption failed");
                metrics::record_control_message_dropped("outbound", "encrypt");
                return None;
            };
            Bytes::from(cipher)
        } else {
            let signature = private_key
                .map(|key| BASE64.encode(self.crypto.sign(key.expose_secret(), &payload)))
                .unwrap_or_default();
            match wrap_packet(&payload, signature, chrono::Utc::now().timestamp_millis()) {
                Ok(packet) => packet,
                Err(e) => {
                    warn!(target: "call.signaling", topic = %topic, error = %e, "Failed to wrap control packet");
                    return None;
                }
            }
        };

        metrics::record_control_message("outbound", topic.as_str());
        Some(OutboundPacket {
            topic,
            payload: bytes,
            targets: message.targets().map(<[String]>::to_vec),
        })
    }

    /// Decode a packet received from `sender` on `topic`.
    pub async fn decode(&self, sender: &str, topic: &str, data: &[u8]) -> Option<ControlMessage> {
        match self.try_decode(sender, topic, data).await {
            Ok(message) => {
                metrics::record_control_message("inbound", message.topic().as_str());
                Some(message)
            }
            Err(e) => {
                debug!(
                    target: "call.signaling",
                    sender = %sender,
                    topic = %topic,
                    error = %e,
                    "Dropping inbound control message"
                );
                metrics::record_control_message_dropped("inbound", e.label());
                None
            }
        }
    }

    async fn try_decode(
        &self,
        sender: &str,
        topic: &str,
        data: &[u8],
    ) -> Result<ControlMessage, DecodeError> {
        let topic: Topic = topic
            .parse()
            .map_err(|_| DecodeError::UnknownTopic(topic.to_string()))?;

        if !topic.requires_encryption() {
            let packet = unwrap_packet(data)?;
            return Ok(decode_payload(topic, packet.payload.as_bytes())?);
        }

        let session_key = self.session_key.as_ref().ok_or(DecodeError::NoSessionKey)?;
        let public_key = self
            .contacts
            .public_key(account_of(sender))
            .await
            .ok_or(DecodeError::UnknownSender)?;
        let plaintext = self
            .crypto
            .decrypt_control_message(data, &public_key, session_key.expose_secret())
            .ok_or(DecodeError::Decrypt)?;

        Ok(decode_payload(topic, &plaintext)?)
    }
}
