//! Polling Fallback
//!
//! Cursor-based catch-up fetch, active only while the push link is down.
//! Each tick fetches every message with `created_at` strictly greater than
//! the store's latest timestamp and emits it as a `MessageCreated` event;
//! the reconciliation engine deduplicates anything the change feed already
//! delivered. While the push link is healthy the poller suspends entirely,
//! which is what bounds request volume.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::api::MessageApi;
use crate::config::SyncConfig;
use crate::model::{SyncEvent, UserId};
use crate::transport::push::LinkState;

/// Runs the catch-up loop for one conversation.
pub struct PollingAdapter;

impl PollingAdapter {
    /// Runs until the engine drops its event receiver or the link watch
    /// closes. `cursor` is published by the engine and always reflects the
    /// latest `created_at` in the store.
    pub async fn run(
        api: Arc<dyn MessageApi>,
        me: UserId,
        peer: UserId,
        cursor: watch::Receiver<Option<DateTime<Utc>>>,
        mut link: watch::Receiver<LinkState>,
        events: mpsc::Sender<SyncEvent>,
        config: SyncConfig,
    ) {
        let mut ticker = tokio::time::interval(config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            if *link.borrow() == LinkState::Up {
                // Push is healthy; suspend until the link state changes.
                if link.changed().await.is_err() {
                    return;
                }
                ticker.reset();
                continue;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    let since = *cursor.borrow();
                    match api.get_messages_since(&me, &peer, since).await {
                        Ok(messages) => {
                            for message in messages {
                                let event = SyncEvent::MessageCreated { message };
                                if events.send(event).await.is_err() {
                                    return;
                                }
                            }
                        }
                        // Transient: recovered on the next tick.
                        Err(err) => debug!(%err, "poll fetch failed"),
                    }
                }
                changed = link.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }
}
