//! Reaction Entity
//!
//! A single emoji reaction as the server records it. The per-message
//! aggregate view lives in [`crate::reactions`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ServerId, UserId};

/// One user's emoji reaction to one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub message_id: ServerId,
    pub emoji: String,
    pub user_id: UserId,
    pub at: DateTime<Utc>,
}
