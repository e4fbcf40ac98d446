//! Conversation Store
//!
//! The canonical, observable, in-memory table for one conversation. Owns the
//! ordered message sequence, per-message reaction aggregates, the tombstone
//! set, and the ephemeral typing flag. Every mutation goes through the
//! component contracts (optimistic writer, reconciliation engine, status
//! machine, reaction aggregator, deletion handler); no other code touches
//! messages directly.
//!
//! The sequence is always sorted ascending by `(created_at, id)`; insertion
//! is a binary search, never a blind append, so the store stays ordered no
//! matter what order events arrive in.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::model::{ConversationId, Message, MessageRef, ServerId, TempId, UserId};
use crate::reactions::ReactionAggregate;

/// Read-only view handed to the UI layer. The UI never receives raw
/// transport events, only snapshots of this shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationSnapshot {
    pub conversation_id: ConversationId,
    /// Messages in display order: ascending `(created_at, id)`.
    pub messages: Vec<Message>,
    /// Reaction aggregates keyed by message identity.
    pub reactions: HashMap<MessageRef, ReactionAggregate>,
    /// Whether the peer is currently typing. Ephemeral, last-write-wins.
    pub peer_typing: bool,
}

/// Canonical in-memory state for one conversation.
#[derive(Debug)]
pub struct ConversationStore {
    conversation_id: ConversationId,
    me: UserId,
    messages: Vec<Message>,
    known_server_ids: HashSet<ServerId>,
    reactions: HashMap<MessageRef, ReactionAggregate>,
    /// Deleted ids mapped to the instant their tombstone expires.
    tombstones: HashMap<MessageRef, DateTime<Utc>>,
    tombstone_grace: Duration,
    peer_typing: bool,
}

impl ConversationStore {
    pub fn new(conversation_id: ConversationId, me: UserId, tombstone_grace: Duration) -> Self {
        Self {
            conversation_id,
            me,
            messages: Vec::new(),
            known_server_ids: HashSet::new(),
            reactions: HashMap::new(),
            tombstones: HashMap::new(),
            tombstone_grace,
            peer_typing: false,
        }
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    pub fn me(&self) -> &UserId {
        &self.me
    }

    /// Messages in display order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains_server_id(&self, id: &ServerId) -> bool {
        self.known_server_ids.contains(id)
    }

    /// Position of the message whose live or retired identity matches `id`.
    pub fn position_of(&self, id: &MessageRef) -> Option<usize> {
        match id {
            MessageRef::Confirmed(server_id) => self.position_of_server(server_id),
            MessageRef::Temp(temp_id) => self.position_of_temp(temp_id),
        }
    }

    pub fn position_of_server(&self, id: &ServerId) -> Option<usize> {
        self.messages.iter().position(|m| m.server_id() == Some(id))
    }

    /// Matches the live temp id or a retired resolution key.
    pub fn position_of_temp(&self, id: &TempId) -> Option<usize> {
        self.messages.iter().position(|m| m.matches_temp(id))
    }

    pub fn message_mut(&mut self, index: usize) -> Option<&mut Message> {
        self.messages.get_mut(index)
    }

    /// Insert at the position implied by `(created_at, id)`. Returns the
    /// index the message landed at.
    pub fn insert_ordered(&mut self, message: Message) -> usize {
        if let Some(server_id) = message.server_id() {
            self.known_server_ids.insert(server_id.clone());
        }
        let position = self
            .messages
            .binary_search_by(|existing| existing.ordering_key().cmp(&message.ordering_key()))
            .unwrap_or_else(|insertion_point| insertion_point);
        self.messages.insert(position, message);
        position
    }

    /// Remove a message and its reaction aggregate.
    pub fn remove(&mut self, id: &MessageRef) -> Option<Message> {
        let position = self.position_of(id)?;
        let message = self.messages.remove(position);
        if let Some(server_id) = message.server_id() {
            self.known_server_ids.remove(server_id);
        }
        self.reactions.remove(&message.id);
        if let Some(retired) = &message.retired_temp_id {
            self.reactions.remove(&MessageRef::Temp(retired.clone()));
        }
        Some(message)
    }

    /// Promote the message at `index` from its temp identity to `server_id`,
    /// in place: position, `created_at`, status, and reactions are all
    /// preserved; the temp id is retired but kept as a resolution key.
    pub fn promote(&mut self, index: usize, server_id: ServerId) -> Option<&Message> {
        let message = self.messages.get_mut(index)?;
        let temp_id = message.id.as_temp()?.clone();

        message.retired_temp_id = Some(temp_id.clone());
        message.id = MessageRef::Confirmed(server_id.clone());
        self.known_server_ids.insert(server_id.clone());

        // Re-key any reactions already attached to the placeholder.
        if let Some(aggregate) = self.reactions.remove(&MessageRef::Temp(temp_id)) {
            self.reactions
                .insert(MessageRef::Confirmed(server_id), aggregate);
        }
        self.messages.get(index)
    }

    /// Remove any later duplicate occurrences of an already-present server
    /// id, keeping the first in display order. Two adapters may report the
    /// same confirmation; this pass makes that harmless.
    pub fn dedup_server_ids(&mut self) -> usize {
        let mut seen: HashSet<ServerId> = HashSet::new();
        let before = self.messages.len();
        self.messages.retain(|message| match message.server_id() {
            Some(id) => seen.insert(id.clone()),
            None => true,
        });
        before - self.messages.len()
    }

    // Reactions

    pub fn reactions_for(&self, id: &MessageRef) -> Option<&ReactionAggregate> {
        self.reactions.get(id)
    }

    /// Optimistic reaction toggle by the current user. A no-op if the
    /// message is not in the store.
    pub fn toggle_reaction(&mut self, id: &MessageRef, emoji: &str) -> bool {
        if self.position_of(id).is_none() {
            return false;
        }
        self.reactions.entry(id.clone()).or_default().toggle_mine(emoji);
        if self
            .reactions
            .get(id)
            .is_some_and(ReactionAggregate::is_empty)
        {
            self.reactions.remove(id);
        }
        true
    }

    /// Wholesale replacement with the authoritative aggregate for one
    /// message. Unrelated messages are never touched. A message no longer
    /// in the store (deleted while the fetch was in flight) gets no
    /// aggregate; anything it left behind is cleared instead.
    pub fn replace_reactions(&mut self, id: &ServerId, aggregate: ReactionAggregate) {
        let key = MessageRef::Confirmed(id.clone());
        if aggregate.is_empty() || self.position_of_server(id).is_none() {
            self.reactions.remove(&key);
        } else {
            self.reactions.insert(key, aggregate);
        }
    }

    // Tombstones

    /// Remember `id` as deleted until the grace window elapses.
    pub fn tombstone(&mut self, id: MessageRef, now: DateTime<Utc>) {
        let expires = now
            + chrono::Duration::from_std(self.tombstone_grace)
                .unwrap_or_else(|_| chrono::Duration::seconds(30));
        self.tombstones.insert(id, expires);
    }

    /// Whether an unexpired tombstone blocks this id.
    pub fn is_tombstoned(&self, id: &MessageRef, now: DateTime<Utc>) -> bool {
        self.tombstones.get(id).is_some_and(|expires| *expires > now)
    }

    /// Drop a tombstone early, for deletion rollback.
    pub fn clear_tombstone(&mut self, id: &MessageRef) {
        self.tombstones.remove(id);
    }

    /// Purge expired tombstones. After this, a late event for a forgotten id
    /// is treated as a brand-new message.
    pub fn sweep_tombstones(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.tombstones.len();
        self.tombstones.retain(|_, expires| *expires > now);
        before - self.tombstones.len()
    }

    /// Drop retired temp resolution keys once the reconciliation window has
    /// passed. A late event referencing the retired id must then resolve by
    /// server id or not at all.
    pub fn expire_retired_keys(&mut self, now: DateTime<Utc>) -> usize {
        let window = chrono::Duration::from_std(self.tombstone_grace)
            .unwrap_or_else(|_| chrono::Duration::seconds(30));
        let mut cleared = 0;
        for message in &mut self.messages {
            if message.retired_temp_id.is_some() && now - message.created_at > window {
                message.retired_temp_id = None;
                cleared += 1;
            }
        }
        cleared
    }

    // Typing & cursor

    pub fn set_peer_typing(&mut self, typing: bool) {
        self.peer_typing = typing;
    }

    pub fn peer_typing(&self) -> bool {
        self.peer_typing
    }

    /// The latest `created_at` currently in the store, used as the polling
    /// fallback's monotonic cursor.
    pub fn latest_created_at(&self) -> Option<DateTime<Utc>> {
        self.messages.iter().map(|m| m.created_at).max()
    }

    /// Read-only view for the UI layer.
    pub fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            conversation_id: self.conversation_id.clone(),
            messages: self.messages.clone(),
            reactions: self.reactions.clone(),
            peer_typing: self.peer_typing,
        }
    }
}
