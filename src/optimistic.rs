//! Optimistic Writer
//!
//! Builds the locally-created placeholder a send inserts before any server
//! confirms it, and rolls it back when the durable write is rejected. The
//! placeholder enters the store at the position implied by its client-
//! assigned `created_at` (normally the tail) with status `Sent`; promotion
//! to a server identity is the reconciliation engine's job.

use chrono::{DateTime, Utc};

use crate::model::{
    ConversationId, DeliveryStatus, Message, MessageKind, MessageRef, ServerId, TempId, UserId,
};
use crate::store::ConversationStore;

/// Build the optimistic placeholder for a freshly composed message.
pub fn build_placeholder(
    temp_id: TempId,
    sender_id: UserId,
    recipient_id: UserId,
    content: String,
    kind: MessageKind,
    reply_to: Option<ServerId>,
    created_at: DateTime<Utc>,
) -> Message {
    let conversation_id = ConversationId::between(sender_id.clone(), recipient_id.clone());
    Message {
        id: MessageRef::Temp(temp_id),
        retired_temp_id: None,
        conversation_id,
        sender_id,
        recipient_id,
        content,
        kind,
        created_at,
        status: DeliveryStatus::Sent,
        delivered_at: None,
        read_at: None,
        reply_to,
    }
}

/// Roll back a placeholder whose durable write was rejected. No silent
/// state: the caller surfaces a recoverable error alongside this removal.
pub fn roll_back(store: &mut ConversationStore, temp_id: &TempId) -> Option<Message> {
    store.remove(&MessageRef::Temp(temp_id.clone()))
}
