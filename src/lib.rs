//! ConvoSync - Conversation Synchronization Engine
//!
//! ConvoSync keeps a per-conversation message timeline consistent across
//! three unreliable inputs: optimistic locally-created messages, push
//! socket events, and a database change feed with a polling fallback.
//! Everything converges in one reconciliation engine, so the timeline a
//! caller observes is the same no matter which channel delivered an event
//! first.
//!
//! # Overview
//!
//! The crate provides:
//! - Optimistic sends with temp-id placeholders, promoted in place once
//!   the durable write confirms
//! - Idempotent merge of `message created` events from any adapter
//!   (dedupe, temp-match, ordered insert)
//! - Monotonic delivery status (`Sent` → `Delivered` → `Read`) with
//!   stale-event rejection
//! - Emoji reaction aggregation with optimistic toggles and wholesale
//!   server replacement
//! - Deletion with tombstones so slower adapters cannot resurrect a
//!   deleted message
//!
//! # Module Structure
//!
//! - **`model`** - ids, messages, reactions and the typed event set
//! - **`store`** - the in-memory ordered timeline for one conversation
//! - **`reconcile`** / **`status`** / **`reactions`** - the pure merge
//!   rules; no I/O, fully deterministic
//! - **`optimistic`** / **`deletion`** - placeholder construction,
//!   rollback, and tombstoned deletes
//! - **`transport`** - the push, change-feed and polling adapters
//! - **`api`** - the durable REST surface behind [`api::MessageApi`]
//! - **`engine`** - the per-conversation task tying it all together
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use convosync::{ConversationEngine, SyncConfig, UserId};
//! # use convosync::api::{HttpMessageApi, MessageApi};
//! # use convosync::transport::{ChangeFeedNotification, PushSocket};
//!
//! # async fn example(socket: Arc<dyn PushSocket>) {
//! let api: Arc<dyn MessageApi> =
//!     Arc::new(HttpMessageApi::new("https://chat.example.com").with_token("token"));
//! let handle = ConversationEngine::spawn(
//!     UserId::new("alice"),
//!     UserId::new("bob"),
//!     api,
//!     socket,
//!     None::<futures_util::stream::Empty<ChangeFeedNotification>>,
//!     SyncConfig::default(),
//! );
//!
//! let temp_id = handle.send_message("hello", None).await.unwrap();
//! let snapshot = handle.snapshots().borrow().clone();
//! # let _ = (temp_id, snapshot);
//! # }
//! ```
//!
//! # Concurrency
//!
//! One spawned task owns each conversation's state; adapters and durable
//! calls communicate with it over channels, so no locks guard the
//! timeline. See [`engine`] for details.

pub mod api;
pub mod config;
pub mod deletion;
pub mod engine;
pub mod error;
pub mod model;
pub mod optimistic;
pub mod reactions;
pub mod reconcile;
pub mod status;
pub mod store;
pub mod temp_id;
pub mod transport;

pub use config::SyncConfig;
pub use engine::{ConversationEngine, ConversationHandle};
pub use error::{StaleCounters, SyncError};
pub use model::{
    ConversationId, DeliveryStatus, Message, MessageKind, MessageRef, Reaction, ServerId,
    ServerMessage, SyncEvent, TempId, UserId,
};
pub use reactions::{EmojiEntry, ReactionAggregate};
pub use store::{ConversationSnapshot, ConversationStore};
