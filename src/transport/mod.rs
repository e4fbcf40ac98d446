//! Transport Adapters
//!
//! Three interchangeable event sources behind one contract: the push
//! channel (persistent socket), the change-feed channel (row-level
//! notifications), and the polling fallback (cursor-based catch-up). Each
//! runs as a restartable task pushing typed [`SyncEvent`]s into the
//! engine's channel. No adapter is assumed reliable or exclusive;
//! duplicates and reordering across and within adapters are resolved by the
//! reconciliation engine, never here.

pub mod change_feed;
pub mod polling;
pub mod push;

pub use change_feed::{ChangeFeedAdapter, ChangeFeedNotification};
pub use polling::PollingAdapter;
pub use push::{InboundFrame, LinkState, OutboundFrame, PushAdapter, PushLink, PushSocket};
