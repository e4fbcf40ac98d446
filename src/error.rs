//! Error Types
//!
//! The failure taxonomy of the sync engine. Nothing here is fatal: transient
//! transport failures recover through reconnect or the polling fallback and
//! rejected writes roll back and surface to the caller for retry. Stale
//! events are not errors at all; they are discarded and tallied in
//! [`StaleCounters`].

use thiserror::Error;

use crate::model::{MessageRef, TempId};

/// Errors surfaced by the sync engine.
#[derive(Debug, Error, Clone)]
pub enum SyncError {
    /// Socket disconnect, fetch timeout, and similar. Recovered automatically
    /// by adapter reconnect and the polling fallback; callers normally never
    /// see this.
    #[error("transient transport failure: {reason}")]
    TransientTransport { reason: String },

    /// The durable write for an optimistic message failed. The placeholder
    /// has been rolled back; the caller may retry.
    #[error("durable write rejected for {temp_id}: {reason}")]
    WriteRejected { temp_id: TempId, reason: String },

    /// The authoritative reaction re-fetch failed; the aggregate stays on the
    /// optimistic view until the next successful fetch.
    #[error("reaction reconcile failed for {message}: {reason}")]
    ReactionReconcile { message: MessageRef, reason: String },

    /// A command was issued after the conversation engine shut down.
    #[error("conversation engine is closed")]
    ConversationClosed,
}

impl SyncError {
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::TransientTransport {
            reason: reason.into(),
        }
    }

    pub fn write_rejected(temp_id: TempId, reason: impl Into<String>) -> Self {
        Self::WriteRejected {
            temp_id,
            reason: reason.into(),
        }
    }
}

/// Counters for silently discarded events. Stale events are not failures,
/// but they are accounted for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StaleCounters {
    /// Status proposals rejected for implying a regression.
    pub stale_status: u64,
    /// Create events for a server id already present in the store.
    pub duplicate_create: u64,
    /// Events suppressed because the target id is tombstoned.
    pub tombstone_suppressed: u64,
}

impl StaleCounters {
    pub fn total(&self) -> u64 {
        self.stale_status + self.duplicate_create + self.tombstone_suppressed
    }
}
