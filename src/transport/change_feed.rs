//! Change-Feed Adapter
//!
//! Consumes row-level insert/update/delete notifications from the message
//! table, scoped to one conversation's participant pair, and maps them into
//! [`SyncEvent`]s. Authoritative, but can lag the push channel by hundreds
//! of milliseconds; the reconciliation engine makes the overlap harmless.

use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::model::{
    ConversationId, DeliveryStatus, Reaction, ServerId, ServerMessage, SyncEvent,
};

/// Row-level notification from the database change feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum ChangeFeedNotification {
    /// A message row was inserted.
    RowInserted { message: ServerMessage },
    /// A message row's status or reaction fields changed.
    RowUpdated {
        message_id: ServerId,
        /// Participants of the affected conversation, for scoping.
        sender_id: crate::model::UserId,
        recipient_id: crate::model::UserId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<DeliveryStatus>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reaction: Option<Reaction>,
        at: DateTime<Utc>,
    },
    /// A message row was deleted.
    RowDeleted {
        message_id: ServerId,
        sender_id: crate::model::UserId,
        recipient_id: crate::model::UserId,
    },
}

impl ChangeFeedNotification {
    fn conversation_id(&self) -> ConversationId {
        match self {
            ChangeFeedNotification::RowInserted { message } => message.conversation_id(),
            ChangeFeedNotification::RowUpdated {
                sender_id,
                recipient_id,
                ..
            }
            | ChangeFeedNotification::RowDeleted {
                sender_id,
                recipient_id,
                ..
            } => ConversationId::between(sender_id.clone(), recipient_id.clone()),
        }
    }
}

/// Maps a notification stream into the engine's event channel.
pub struct ChangeFeedAdapter;

impl ChangeFeedAdapter {
    /// Runs until the notification stream ends or the engine drops its
    /// receiver. Notifications for other conversations are skipped.
    pub async fn run(
        notifications: impl Stream<Item = ChangeFeedNotification> + Send,
        conversation: ConversationId,
        events: mpsc::Sender<SyncEvent>,
    ) {
        futures_util::pin_mut!(notifications);
        while let Some(notification) = notifications.next().await {
            if notification.conversation_id() != conversation {
                continue;
            }
            let Some(event) = map(notification) else {
                continue;
            };
            if events.send(event).await.is_err() {
                return;
            }
        }
        debug!(%conversation, "change feed stream ended");
    }
}

fn map(notification: ChangeFeedNotification) -> Option<SyncEvent> {
    match notification {
        ChangeFeedNotification::RowInserted { message } => {
            Some(SyncEvent::MessageCreated { message })
        }
        ChangeFeedNotification::RowUpdated {
            message_id,
            status,
            reaction,
            at,
            ..
        } => {
            if let Some(status) = status {
                Some(SyncEvent::MessageStatusChanged {
                    message_id,
                    status,
                    at,
                })
            } else {
                reaction.map(|reaction| SyncEvent::ReactionChanged {
                    message_id,
                    reaction,
                })
            }
        }
        ChangeFeedNotification::RowDeleted { message_id, .. } => {
            Some(SyncEvent::MessageDeleted { message_id })
        }
    }
}
