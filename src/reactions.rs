//! Reaction Aggregator
//!
//! Merges optimistic local reaction toggles with the authoritative
//! per-message reaction set. Optimistic state is a bridge, not a merge
//! target: when the server set for a message arrives it replaces the
//! aggregate wholesale, which is safe because that fetch is always scoped to
//! the single message that changed.
//!
//! A plain state machine with no UI dependency; the UI layer only subscribes
//! to its output through store snapshots.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::model::{Reaction, UserId};

/// Aggregate state for one emoji on one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmojiEntry {
    /// Number of distinct users who reacted with this emoji. Never negative;
    /// an entry is removed entirely when it reaches zero.
    pub count: u32,
    /// Whether the current user is among them.
    pub reacted_by_me: bool,
}

/// Per-message mapping from emoji to aggregate reaction state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionAggregate {
    entries: BTreeMap<String, EmojiEntry>,
}

impl ReactionAggregate {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, emoji: &str) -> Option<&EmojiEntry> {
        self.entries.get(emoji)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &EmojiEntry)> {
        self.entries.iter().map(|(emoji, entry)| (emoji.as_str(), entry))
    }

    /// Optimistic toggle by the current user: add the reaction if they have
    /// none with this emoji, remove it if they do. Toggling twice in a row
    /// nets out to the starting state.
    pub fn toggle_mine(&mut self, emoji: &str) {
        match self.entries.get_mut(emoji) {
            Some(entry) if entry.reacted_by_me => {
                entry.reacted_by_me = false;
                entry.count = entry.count.saturating_sub(1);
                if entry.count == 0 {
                    self.entries.remove(emoji);
                }
            }
            Some(entry) => {
                entry.reacted_by_me = true;
                entry.count += 1;
            }
            None => {
                self.entries.insert(
                    emoji.to_owned(),
                    EmojiEntry {
                        count: 1,
                        reacted_by_me: true,
                    },
                );
            }
        }
    }

    /// Build the authoritative aggregate from the server's reaction rows,
    /// deduplicating by `(user, emoji)` so the acting user is never counted
    /// twice.
    pub fn from_server(reactions: &[Reaction], me: &UserId) -> Self {
        let mut seen: HashSet<(&UserId, &str)> = HashSet::new();
        let mut entries: BTreeMap<String, EmojiEntry> = BTreeMap::new();

        for reaction in reactions {
            if !seen.insert((&reaction.user_id, reaction.emoji.as_str())) {
                continue;
            }
            let entry = entries.entry(reaction.emoji.clone()).or_insert(EmojiEntry {
                count: 0,
                reacted_by_me: false,
            });
            entry.count += 1;
            if &reaction.user_id == me {
                entry.reacted_by_me = true;
            }
        }

        Self { entries }
    }
}
