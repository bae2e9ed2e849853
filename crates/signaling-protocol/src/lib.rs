//! Control-channel protocol for call sessions.
//!
//! Control messages travel over the media transport's data channel, tagged
//! with a [`Topic`]. This crate owns the closed set of topics, the typed
//! [`ControlMessage`] union, and the JSON wire format. Encryption and
//! signing are layered on top by the call engine.

#![warn(clippy::pedantic)]

pub mod codec;
pub mod message;
pub mod topic;

pub use codec::{decode_payload, encode_payload, unwrap_packet, wrap_packet, CodecError, RtmDataPacket};
pub use message::{ControlMessage, CountdownAction, CountdownTimer, RaisedHand};
pub use topic::Topic;
