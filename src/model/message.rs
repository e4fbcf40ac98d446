//! Message Entity
//!
//! The canonical in-store message plus the wire shape the server reports.
//! `created_at` is client-assigned at creation time and never mutated; status
//! and reaction state are the only fields allowed to change after insertion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ConversationId, MessageRef, ServerId, TempId, UserId};

/// What the message carries besides text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageKind {
    /// Plain text message.
    Text,
    /// Image message, referenced by media id.
    Image { image_id: String },
    /// A shared feed post.
    SharedPost { post_id: String },
    /// A shared reel.
    SharedReel { reel_id: String },
}

impl Default for MessageKind {
    fn default() -> Self {
        MessageKind::Text
    }
}

/// Delivery status with the total order `Sent < Delivered < Read`.
///
/// A message's status only ever moves forward in this order; proposals that
/// would move it backward are stale events and get discarded.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
}

/// A message as held by the conversation store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Authoritative identity: temp until confirmed, server id afterwards.
    pub id: MessageRef,
    /// After promotion the temp id is retired but kept as a resolution key so
    /// late events that still reference it can be matched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retired_temp_id: Option<TempId>,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub content: String,
    #[serde(default)]
    pub kind: MessageKind,
    /// Client-assigned at creation time, never mutated.
    pub created_at: DateTime<Utc>,
    pub status: DeliveryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
    /// Weak reference to the replied-to message, never ownership.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ServerId>,
}

impl Message {
    /// Ordering key for the store sequence: ascending `created_at`,
    /// tie-broken lexicographically by id.
    pub fn ordering_key(&self) -> (DateTime<Utc>, &str) {
        (self.created_at, self.id.sort_key())
    }

    /// Server id if this message has been confirmed.
    pub fn server_id(&self) -> Option<&ServerId> {
        self.id.as_confirmed()
    }

    /// Whether `temp` identifies this message, either as its live id or as a
    /// retired resolution key.
    pub fn matches_temp(&self, temp: &TempId) -> bool {
        self.id.as_temp() == Some(temp) || self.retired_temp_id.as_ref() == Some(temp)
    }
}

/// A server-confirmed message as reported over any transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerMessage {
    pub id: ServerId,
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub content: String,
    #[serde(default)]
    pub kind: MessageKind,
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_status")]
    pub status: DeliveryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ServerId>,
}

fn default_status() -> DeliveryStatus {
    DeliveryStatus::Sent
}

impl ServerMessage {
    /// The conversation this message belongs to, derived from its
    /// participant pair.
    pub fn conversation_id(&self) -> ConversationId {
        ConversationId::between(self.sender_id.clone(), self.recipient_id.clone())
    }

    /// Convert into a store message with a confirmed identity.
    pub fn into_message(self) -> Message {
        let conversation_id = self.conversation_id();
        Message {
            id: MessageRef::Confirmed(self.id),
            retired_temp_id: None,
            conversation_id,
            sender_id: self.sender_id,
            recipient_id: self.recipient_id,
            content: self.content,
            kind: self.kind,
            created_at: self.created_at,
            status: self.status,
            delivered_at: None,
            read_at: None,
            reply_to: self.reply_to,
        }
    }
}
