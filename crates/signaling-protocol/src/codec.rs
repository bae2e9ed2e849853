//! JSON wire format for control messages.
//!
//! Every message serializes to a flat JSON object that names its topic.
//! Plain (unencrypted) topics are additionally wrapped in an
//! [`RtmDataPacket`] envelope carrying a signature, timestamp and packet id.

use crate::message::{ControlMessage, CountdownAction, CountdownTimer, RaisedHand};
use crate::topic::Topic;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Error type for codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Payload is not valid JSON for the expected shape
    #[error("Malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Payload names a different topic than the one it arrived on
    #[error("Topic mismatch: expected {expected}, got {actual}")]
    TopicMismatch { expected: Topic, actual: String },

    /// A field required by the topic is missing
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    /// Inner payload is not UTF-8 text
    #[error("Payload is not valid UTF-8")]
    InvalidUtf8,
}

/// Envelope for plain topics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtmDataPacket {
    /// Inner message JSON.
    pub payload: String,
    /// Base64 signature over `payload`; empty when the sender had no key.
    #[serde(default)]
    pub signature: String,
    /// Send time (ms since epoch).
    #[serde(default)]
    pub send_timestamp: i64,
    /// Packet id for de-duplication.
    #[serde(default)]
    pub uuid: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    kind: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    identities: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    identity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    muted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hands: Option<Vec<RaisedHand>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    send_timestamp: Option<i64>,
    #[serde(flatten)]
    countdown: Option<CountdownTimer>,
}

/// Serialize a control message to its inner JSON payload.
///
/// # Errors
///
/// Returns an error if serialization fails
pub fn encode_payload(message: &ControlMessage) -> Result<Bytes, CodecError> {
    let topic = message.topic().as_str().to_string();
    let wire = match message {
        ControlMessage::Chat {
            text,
            kind,
            sent_at,
        } => WireMessage {
            topic,
            text: Some(text.clone()),
            kind: *kind,
            send_timestamp: Some(*sent_at),
            ..WireMessage::default()
        },
        ControlMessage::MuteRequest {
            identities,
            sent_at,
        }
        | ControlMessage::ResumeCall {
            identities,
            sent_at,
        } => WireMessage {
            topic,
            identities: Some(identities.clone()),
            send_timestamp: Some(*sent_at),
            ..WireMessage::default()
        },
        ControlMessage::MuteState {
            identity,
            muted,
            sent_at,
        } => WireMessage {
            topic,
            identity: Some(identity.clone()),
            muted: Some(*muted),
            send_timestamp: Some(*sent_at),
            ..WireMessage::default()
        },
        ControlMessage::EndCall { sent_at } => WireMessage {
            topic,
            send_timestamp: Some(*sent_at),
            ..WireMessage::default()
        },
        ControlMessage::Hands {
            hands, sent_at, ..
        } => WireMessage {
            topic,
            hands: Some(hands.clone()),
            send_timestamp: Some(*sent_at),
            ..WireMessage::default()
        },
        ControlMessage::Countdown { timer, .. } => WireMessage {
            topic,
            countdown: Some(timer.clone()),
            ..WireMessage::default()
        },
    };

    Ok(Bytes::from(serde_json::to_vec(&wire)?))
}

/// Parse the inner JSON payload received on `topic`.
///
/// # Errors
///
/// Returns an error if the payload is malformed, names another topic, or
/// lacks a field the topic requires
pub fn decode_payload(topic: Topic, data: &[u8]) -> Result<ControlMessage, CodecError> {
    let wire: WireMessage = serde_json::from_slice(data)?;
    if wire.topic != topic.as_str() {
        return Err(CodecError::TopicMismatch {
            expected: topic,
            actual: wire.topic,
        });
    }

    let sent_at = wire.send_timestamp.unwrap_or_default();
    let message = match topic {
        Topic::Chat => ControlMessage::Chat {
            text: wire.text.ok_or(CodecError::MissingField("text"))?,
            kind: wire.kind,
            sent_at,
        },
        Topic::Mute => ControlMessage::MuteRequest {
            identities: wire.identities.unwrap_or_default(),
            sent_at,
        },
        Topic::ResumeCall => ControlMessage::ResumeCall {
            identities: wire.identities.unwrap_or_default(),
            sent_at,
        },
        Topic::MuteState => ControlMessage::MuteState {
            identity: wire.identity.ok_or(CodecError::MissingField("identity"))?,
            muted: wire.muted.ok_or(CodecError::MissingField("muted"))?,
            sent_at,
        },
        Topic::EndCall => ControlMessage::EndCall { sent_at },
        Topic::RaiseHand | Topic::CancelHand => ControlMessage::Hands {
            raised: topic == Topic::RaiseHand,
            hands: wire.hands.unwrap_or_default(),
            sent_at,
        },
        Topic::SetCountdown
        | Topic::RestartCountdown
        | Topic::ExtendCountdown
        | Topic::ClearCountdown => {
            let action = match topic {
                Topic::SetCountdown => CountdownAction::Set,
                Topic::RestartCountdown => CountdownAction::Restart,
                Topic::ExtendCountdown => CountdownAction::Extend,
                _ => CountdownAction::Clear,
            };
            ControlMessage::Countdown {
                action,
                timer: wire.countdown.unwrap_or_default(),
            }
        }
    };

    Ok(message)
}

/// Wrap an inner payload in a plain-topic envelope.
///
/// # Errors
///
/// Returns an error if the payload is not UTF-8 JSON or serialization fails
pub fn wrap_packet(
    payload: &[u8],
    signature: String,
    send_timestamp: i64,
) -> Result<Bytes, CodecError> {
    let payload = std::str::from_utf8(payload)
        .map_err(|_| CodecError::InvalidUtf8)?
        .to_string();
    let packet = RtmDataPacket {
        payload,
        signature,
        send_timestamp,
        uuid: uuid::Uuid::new_v4().to_string(),
    };
    Ok(Bytes::from(serde_json::to_vec(&packet)?))
}

/// Parse a plain-topic envelope.
///
/// # Errors
///
/// Returns an error if the envelope is malformed
pub fn unwrap_packet(data: &[u8]) -> Result<RtmDataPacket, CodecError> {
    let packet: RtmDataPacket = serde_json::from_slice(data)?;
    tracing::trace!(
        target: "call.signaling.codec",
        packet_id = %packet.uuid,
        signed = !packet.signature.is_empty(),
        "Unwrapped data packet"
    );
    Ok(packet)
}
