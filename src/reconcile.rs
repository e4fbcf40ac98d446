//! Reconciliation Engine
//!
//! Consumes create/confirmation events from the optimistic writer and every
//! transport adapter, resolves message identity, and merges into the
//! conversation store. The merge is idempotent and the `(created_at, id)`
//! tie-break is stable, so the final store state is independent of event
//! arrival order.
//!
//! For each incoming created/confirmation event:
//!
//! 1. a known server id merge-ignores (only status may still advance),
//! 2. else a temp-match (same sender, identical content, `created_at`
//!    within the configured window) promotes the placeholder in place,
//! 3. else the message is inserted at the position implied by
//!    `(created_at, id)`,
//! 4. and a final defensive pass removes duplicate server ids, since two
//!    adapters may report the same confirmation.
//!
//! The temp-match heuristic is a known approximation: two identical messages
//! from the same sender inside the window can collapse onto one
//! confirmation. Promotion uniqueness and the de-dup pass keep the store
//! consistent even then.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::SyncConfig;
use crate::error::StaleCounters;
use crate::model::{DeliveryStatus, MessageRef, ServerId, ServerMessage, TempId};
use crate::status::{apply_status, StatusOutcome};
use crate::store::ConversationStore;

/// What the engine did with a created/confirmation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// New message, inserted in order.
    Inserted,
    /// A placeholder was promoted to its server identity in place.
    Promoted,
    /// The server id was already present; merge-ignored.
    Duplicate,
    /// The id is tombstoned; the event was dropped.
    Suppressed,
}

/// Apply a `MessageCreated` event from any transport.
pub fn apply_created(
    store: &mut ConversationStore,
    incoming: ServerMessage,
    config: &SyncConfig,
    now: DateTime<Utc>,
    counters: &mut StaleCounters,
) -> ReconcileOutcome {
    let confirmed = MessageRef::Confirmed(incoming.id.clone());
    if store.is_tombstoned(&confirmed, now) {
        counters.tombstone_suppressed += 1;
        debug!(message = %incoming.id, "suppressing created event for tombstoned id");
        return ReconcileOutcome::Suppressed;
    }

    // Step 1: known server id is a no-op apart from fields allowed to move.
    if store.contains_server_id(&incoming.id) {
        counters.duplicate_create += 1;
        merge_status(store, &incoming.id, incoming.status, incoming.created_at, counters);
        store.dedup_server_ids();
        return ReconcileOutcome::Duplicate;
    }

    // Step 2: temp-match against an unconfirmed placeholder.
    if let Some(index) = find_temp_match(store, &incoming, config) {
        let status = incoming.status;
        let at = incoming.created_at;
        store.promote(index, incoming.id.clone());
        if let Some(message) = store.message_mut(index) {
            // Status already attached to the placeholder is preserved; the
            // confirmation only advances it, never regresses it.
            apply_status(message, status, at);
        }
        store.dedup_server_ids();
        debug!(message = %incoming.id, "promoted placeholder to server identity");
        return ReconcileOutcome::Promoted;
    }

    // Step 3: genuinely new, ordered insert.
    store.insert_ordered(incoming.into_message());
    // Step 4: defensive de-dup across adapters.
    store.dedup_server_ids();
    ReconcileOutcome::Inserted
}

/// Apply the optimistic writer's own durable-write confirmation. Unlike
/// [`apply_created`] the writer knows exactly which placeholder it is
/// confirming, so resolution is by temp id first and only falls back to the
/// generic path.
pub fn apply_confirmation(
    store: &mut ConversationStore,
    temp_id: &TempId,
    incoming: ServerMessage,
    config: &SyncConfig,
    now: DateTime<Utc>,
    counters: &mut StaleCounters,
) -> ReconcileOutcome {
    // Delete-before-confirm: the placeholder was deleted while the write was
    // in flight. Tombstone the server identity as well so a late feed event
    // cannot resurrect it.
    if store.is_tombstoned(&MessageRef::Temp(temp_id.clone()), now) {
        counters.tombstone_suppressed += 1;
        store.tombstone(MessageRef::Confirmed(incoming.id.clone()), now);
        debug!(temp = %temp_id, message = %incoming.id, "confirmation for deleted placeholder dropped");
        return ReconcileOutcome::Suppressed;
    }

    if let Some(index) = store.position_of_temp(temp_id) {
        let already = store.messages()[index].server_id().cloned();
        match already {
            // An adapter beat the writer to it and the placeholder is
            // already confirmed; at most one promotion ever happens.
            Some(existing) if existing == incoming.id => {
                counters.duplicate_create += 1;
                return ReconcileOutcome::Duplicate;
            }
            Some(_) => {
                // Promoted to a different id: the temp-match heuristic
                // mis-fired on identical content. Treat the confirmation as
                // an ordinary create so the real message still lands.
                return apply_created(store, incoming, config, now, counters);
            }
            None => {
                let status = incoming.status;
                let at = incoming.created_at;
                store.promote(index, incoming.id);
                if let Some(message) = store.message_mut(index) {
                    apply_status(message, status, at);
                }
                store.dedup_server_ids();
                return ReconcileOutcome::Promoted;
            }
        }
    }

    apply_created(store, incoming, config, now, counters)
}

/// Apply a status event; regressions are discarded and counted.
pub fn apply_status_event(
    store: &mut ConversationStore,
    id: &ServerId,
    status: DeliveryStatus,
    at: DateTime<Utc>,
    counters: &mut StaleCounters,
) -> StatusOutcome {
    merge_status(store, id, status, at, counters)
}

fn merge_status(
    store: &mut ConversationStore,
    id: &ServerId,
    status: DeliveryStatus,
    at: DateTime<Utc>,
    counters: &mut StaleCounters,
) -> StatusOutcome {
    let Some(index) = store.position_of_server(id) else {
        // Status for an unknown message: stale by definition, the creation
        // either never reached us or was deleted.
        counters.stale_status += 1;
        return StatusOutcome::Stale;
    };
    let Some(message) = store.message_mut(index) else {
        return StatusOutcome::Stale;
    };
    let outcome = apply_status(message, status, at);
    if outcome == StatusOutcome::Stale {
        counters.stale_status += 1;
    }
    outcome
}

fn find_temp_match(
    store: &ConversationStore,
    incoming: &ServerMessage,
    config: &SyncConfig,
) -> Option<usize> {
    let window = chrono::Duration::from_std(config.temp_match_window)
        .unwrap_or_else(|_| chrono::Duration::seconds(10));
    store.messages().iter().position(|message| {
        message.id.is_temp()
            && message.sender_id == incoming.sender_id
            && message.content == incoming.content
            && (message.created_at - incoming.created_at).abs() <= window
    })
}
