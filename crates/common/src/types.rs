//! Common data types for the call engine crates.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Prefix marking a locally generated room id that the server has not confirmed yet.
pub const PROVISIONAL_ROOM_PREFIX: &str = "pending-";

/// Identifier of a media room.
///
/// Before the start-call response arrives a session is keyed by a
/// provisional id; the server-assigned id replaces it afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoomId(String);

impl RoomId {
    /// Wrap a server-assigned room id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Create a fresh provisional id.
    #[must_use]
    pub fn provisional() -> Self {
        Self(format!("{PROVISIONAL_ROOM_PREFIX}{}", Uuid::new_v4()))
    }

    /// Whether this id was generated locally and not yet confirmed.
    #[must_use]
    pub fn is_provisional(&self) -> bool {
        self.0.starts_with(PROVISIONAL_ROOM_PREFIX)
    }

    /// Whether the id is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the raw id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Kind of call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    /// Direct call between two accounts.
    OneOnOne,
    /// Call bound to a group conversation.
    Group,
    /// Ad-hoc multi-party call (also the result of promoting a one-on-one call).
    Instant,
}

impl CallKind {
    /// Returns the call kind as a string for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            CallKind::OneOnOne => "1on1",
            CallKind::Group => "group",
            CallKind::Instant => "instant",
        }
    }
}

/// Error parsing a [`CallKind`] from its string form.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown call kind: {0}")]
pub struct UnknownCallKind(pub String);

impl std::str::FromStr for CallKind {
    type Err = UnknownCallKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1on1" => Ok(CallKind::OneOnOne),
            "group" => Ok(CallKind::Group),
            "instant" => Ok(CallKind::Instant),
            other => Err(UnknownCallKind(other.to_string())),
        }
    }
}

/// Local role in a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallRole {
    /// The local user started the call.
    Caller,
    /// The local user accepted an invitation.
    Callee,
}

/// Account and device that started a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerInfo {
    /// Account id.
    pub uid: String,
    /// Device id.
    pub did: u32,
}

impl CallerInfo {
    /// Device-qualified participant identity (`uid.did`).
    #[must_use]
    pub fn identity(&self) -> String {
        format!("{}.{}", self.uid, self.did)
    }
}

/// Strip the device qualifier from a participant identity.
///
/// `"+1001.2"` becomes `"+1001"`; an identity without a qualifier is returned as is.
#[must_use]
pub fn account_of(identity: &str) -> &str {
    identity
        .rsplit_once('.')
        .map_or(identity, |(account, _device)| account)
}
