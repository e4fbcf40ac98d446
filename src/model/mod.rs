//! Core Data Model
//!
//! Identity newtypes, the message/reaction/status entities, and the typed
//! event enum shared by every transport adapter. All types serialize with
//! serde so they can travel over the push socket and the REST collaborator
//! unchanged.

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod event;
pub mod message;
pub mod reaction;

pub use event::SyncEvent;
pub use message::{DeliveryStatus, Message, MessageKind, ServerMessage};
pub use reaction::Reaction;

/// A user identifier as assigned by the identity service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A server-assigned message identifier, globally unique once confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(String);

impl ServerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A client-minted placeholder identifier for a message the server has not
/// confirmed yet. Always carries the `tmp_` prefix so it is structurally
/// distinguishable from a [`ServerId`] in logs and wire payloads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TempId(String);

impl TempId {
    pub(crate) fn from_raw(id: String) -> Self {
        debug_assert!(id.starts_with("tmp_"));
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Message identity as a type-level fact: exactly one of the two id kinds is
/// authoritative for a message at any time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum MessageRef {
    /// Client-minted placeholder, not yet confirmed by the durable store.
    Temp(TempId),
    /// Server-confirmed identifier.
    Confirmed(ServerId),
}

impl MessageRef {
    /// Stable key used for lexicographic tie-breaking when two messages share
    /// a `created_at`. Total across mixed temp/confirmed timelines.
    pub fn sort_key(&self) -> &str {
        match self {
            MessageRef::Temp(id) => id.as_str(),
            MessageRef::Confirmed(id) => id.as_str(),
        }
    }

    pub fn is_temp(&self) -> bool {
        matches!(self, MessageRef::Temp(_))
    }

    pub fn as_confirmed(&self) -> Option<&ServerId> {
        match self {
            MessageRef::Confirmed(id) => Some(id),
            MessageRef::Temp(_) => None,
        }
    }

    pub fn as_temp(&self) -> Option<&TempId> {
        match self {
            MessageRef::Temp(id) => Some(id),
            MessageRef::Confirmed(_) => None,
        }
    }
}

impl fmt::Display for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sort_key())
    }
}

impl From<ServerId> for MessageRef {
    fn from(id: ServerId) -> Self {
        MessageRef::Confirmed(id)
    }
}

impl From<TempId> for MessageRef {
    fn from(id: TempId) -> Self {
        MessageRef::Temp(id)
    }
}

/// Conversation identity derived deterministically from the sorted pair of
/// participant ids: `(a, b)` and `(b, a)` name the same conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationId {
    first: UserId,
    second: UserId,
}

impl ConversationId {
    pub fn between(a: UserId, b: UserId) -> Self {
        if a <= b {
            Self { first: a, second: b }
        } else {
            Self { first: b, second: a }
        }
    }

    pub fn participants(&self) -> (&UserId, &UserId) {
        (&self.first, &self.second)
    }

    pub fn includes(&self, user: &UserId) -> bool {
        &self.first == user || &self.second == user
    }

    /// The other participant, for direct conversations.
    pub fn peer_of(&self, me: &UserId) -> Option<&UserId> {
        if &self.first == me {
            Some(&self.second)
        } else if &self.second == me {
            Some(&self.first)
        } else {
            None
        }
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.first, self.second)
    }
}
