//! Deletion / Tombstone Handler
//!
//! Removes locally-only messages outright and soft-deletes server-known
//! ones. Either way the removed identity is tombstoned for a bounded grace
//! window so a late change-feed or polling event cannot resurrect it. For
//! server-known messages the durable delete runs after the optimistic
//! removal; on failure the message is restored from authoritative state
//! rather than failing silently.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::model::{Message, MessageRef, ServerId};
use crate::store::ConversationStore;

/// What must happen after the local removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletePlan {
    /// The message never reached the server; no durable call is made.
    LocalOnly,
    /// Issue the durable delete for this confirmed id.
    Durable(ServerId),
}

/// Remove a message from the store and tombstone its identities.
///
/// Returns the removed message (kept by the engine for rollback) and the
/// follow-up plan, or `None` if the id is not in the store.
pub fn delete_message(
    store: &mut ConversationStore,
    id: &MessageRef,
    now: DateTime<Utc>,
) -> Option<(Message, DeletePlan)> {
    let message = store.remove(id)?;

    // Tombstone every identity the message ever had, so neither a late
    // server event nor a racing durable-write confirmation re-inserts it.
    store.tombstone(message.id.clone(), now);
    if let Some(retired) = &message.retired_temp_id {
        store.tombstone(MessageRef::Temp(retired.clone()), now);
    }

    let plan = match message.server_id() {
        Some(server_id) => DeletePlan::Durable(server_id.clone()),
        None => {
            // Still temp-only: tombstoning the temp id above is what keeps a
            // durable write racing this delete from resurrecting it.
            DeletePlan::LocalOnly
        }
    };
    debug!(message = %message.id, ?plan, "message removed from store");
    Some((message, plan))
}

/// Restore a message whose durable delete failed. The tombstones are
/// cleared first so the re-insert is not suppressed.
pub fn restore_after_failed_delete(store: &mut ConversationStore, message: Message) {
    store.clear_tombstone(&message.id);
    if let Some(retired) = &message.retired_temp_id {
        store.clear_tombstone(&MessageRef::Temp(retired.clone()));
    }
    store.insert_ordered(message);
}
