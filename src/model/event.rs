//! Transport Event Types
//!
//! Every transport adapter (push socket, change feed, polling fallback)
//! emits this one typed event enum. Adapters never deduplicate or order;
//! duplicate and out-of-order delivery across and within adapters is expected
//! and resolved by the reconciliation engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DeliveryStatus, Reaction, ServerId, ServerMessage, UserId};

/// A raw event from any transport, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    /// A message was created (or confirmed) on the server.
    MessageCreated { message: ServerMessage },
    /// A message's delivery status changed.
    MessageStatusChanged {
        message_id: ServerId,
        status: DeliveryStatus,
        at: DateTime<Utc>,
    },
    /// A reaction was added or removed. The payload is a hint; the engine
    /// re-fetches the authoritative per-message set before applying.
    ReactionChanged {
        message_id: ServerId,
        reaction: Reaction,
    },
    /// A message was deleted on the server.
    MessageDeleted { message_id: ServerId },
    /// A peer started or stopped typing. Ephemeral, last-write-wins.
    TypingChanged { user_id: UserId, is_typing: bool },
}
