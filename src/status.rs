//! Status State Machine
//!
//! Enforces monotonic delivery-status transitions per message under the
//! total order `Sent < Delivered < Read`. A proposal that would move a
//! message backward is a stale event: discarded and counted, never an error.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::model::{DeliveryStatus, Message};

/// Result of applying a status proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOutcome {
    /// The message advanced to the proposed status.
    Advanced,
    /// The proposal implied a regression (or a no-op repeat) and was
    /// discarded.
    Stale,
}

/// Apply a proposed status to a message.
///
/// `delivered_at`/`read_at` are recorded only on the first legal transition
/// into that state, so re-applying the same proposal is idempotent. A jump
/// straight from `Sent` to `Read` records both timestamps from the same
/// event time.
pub fn apply_status(
    message: &mut Message,
    proposed: DeliveryStatus,
    at: DateTime<Utc>,
) -> StatusOutcome {
    if proposed <= message.status {
        debug!(
            message = %message.id,
            current = ?message.status,
            proposed = ?proposed,
            "discarding stale status proposal"
        );
        return StatusOutcome::Stale;
    }

    if message.delivered_at.is_none() && proposed >= DeliveryStatus::Delivered {
        message.delivered_at = Some(at);
    }
    if message.read_at.is_none() && proposed == DeliveryStatus::Read {
        message.read_at = Some(at);
    }
    message.status = proposed;
    StatusOutcome::Advanced
}
