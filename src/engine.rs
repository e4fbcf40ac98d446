//! Conversation Engine
//!
//! One logical owner per conversation: a single task that `select!`s across
//! the merged adapter event channel, the user command channel, completions
//! of in-flight durable calls, and the tombstone sweep tick. Every store
//! mutation happens on this task, so the reconciliation engine is
//! effectively single-threaded per conversation even though events
//! originate from the socket, the change feed, the polling timer, and
//! user-initiated sends at once. Conversations are independent; spawn one
//! engine per open conversation.
//!
//! The durable write, the authoritative reaction re-fetch, and the restore
//! fetch after a failed delete are the only suspending operations. They run
//! as spawned tasks whose results come back through the same loop, so the
//! synchronous merge step never waits on them.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::Stream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{ApiError, MessageApi};
use crate::config::SyncConfig;
use crate::deletion::{self, DeletePlan};
use crate::error::{StaleCounters, SyncError};
use crate::model::{
    ConversationId, DeliveryStatus, Message, MessageKind, MessageRef, Reaction, ServerId,
    ServerMessage, SyncEvent, TempId, UserId,
};
use crate::optimistic;
use crate::reactions::ReactionAggregate;
use crate::reconcile::{self, ReconcileOutcome};
use crate::status::StatusOutcome;
use crate::store::{ConversationSnapshot, ConversationStore};
use crate::temp_id::TempIdAllocator;
use crate::transport::{
    ChangeFeedAdapter, ChangeFeedNotification, LinkState, OutboundFrame, PollingAdapter,
    PushAdapter, PushSocket,
};

/// User-initiated operations, serialized onto the engine task.
enum Command {
    SendMessage {
        content: String,
        kind: MessageKind,
        reply_to: Option<ServerId>,
        respond: oneshot::Sender<TempId>,
    },
    ToggleReaction {
        message: MessageRef,
        emoji: String,
    },
    DeleteMessage {
        message: MessageRef,
    },
    MarkRead,
    SetTyping {
        is_typing: bool,
    },
}

/// Completion of an in-flight durable call.
enum TaskDone {
    WriteResolved {
        temp_id: TempId,
        result: Result<ServerMessage, ApiError>,
    },
    DeleteResolved {
        removed: Box<Message>,
        result: Result<(), ApiError>,
    },
    RestoreFetched {
        removed: Box<Message>,
        result: Result<Vec<ServerMessage>, ApiError>,
    },
    ReactionsFetched {
        message_id: ServerId,
        result: Result<HashMap<ServerId, Vec<Reaction>>, ApiError>,
    },
    MarkReadResolved {
        result: Result<(), ApiError>,
    },
}

/// Public face of one running conversation engine.
///
/// Commands go in, snapshots come out; the UI layer never sees raw
/// transport events. Dropping (or [`close`](Self::close)-ing) the handle
/// shuts the engine down and releases its adapter subscriptions. The push
/// socket is a process-wide resource and stays connected for other
/// conversations.
pub struct ConversationHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<ConversationSnapshot>,
    errors: Option<mpsc::Receiver<SyncError>>,
    tasks: Vec<JoinHandle<()>>,
}

impl ConversationHandle {
    /// Create the optimistic placeholder and start the durable write.
    /// Returns the placeholder's temp id as soon as it is in the store; a
    /// rejected write rolls the placeholder back and reports through
    /// [`errors`](Self::errors).
    pub async fn send_message(
        &self,
        content: impl Into<String>,
        reply_to: Option<ServerId>,
    ) -> Result<TempId, SyncError> {
        let (respond, receive) = oneshot::channel();
        self.commands
            .send(Command::SendMessage {
                content: content.into(),
                kind: MessageKind::Text,
                reply_to,
                respond,
            })
            .await
            .map_err(|_| SyncError::ConversationClosed)?;
        receive.await.map_err(|_| SyncError::ConversationClosed)
    }

    /// Toggle the current user's emoji reaction on a message.
    pub async fn toggle_reaction(
        &self,
        message: MessageRef,
        emoji: impl Into<String>,
    ) -> Result<(), SyncError> {
        self.commands
            .send(Command::ToggleReaction {
                message,
                emoji: emoji.into(),
            })
            .await
            .map_err(|_| SyncError::ConversationClosed)
    }

    /// Delete a message, optimistically for confirmed ones.
    pub async fn delete_message(&self, message: MessageRef) -> Result<(), SyncError> {
        self.commands
            .send(Command::DeleteMessage { message })
            .await
            .map_err(|_| SyncError::ConversationClosed)
    }

    /// Mark the peer's messages in this conversation as read.
    pub async fn mark_read(&self) -> Result<(), SyncError> {
        self.commands
            .send(Command::MarkRead)
            .await
            .map_err(|_| SyncError::ConversationClosed)
    }

    /// Publish the current user's typing state to the peer.
    pub async fn set_typing(&self, is_typing: bool) -> Result<(), SyncError> {
        self.commands
            .send(Command::SetTyping { is_typing })
            .await
            .map_err(|_| SyncError::ConversationClosed)
    }

    /// Watch channel of read-only conversation snapshots.
    pub fn snapshots(&self) -> watch::Receiver<ConversationSnapshot> {
        self.snapshots.clone()
    }

    /// Take the stream of recoverable errors (rejected writes and the
    /// like). Can be taken once.
    pub fn errors(&mut self) -> Option<mpsc::Receiver<SyncError>> {
        self.errors.take()
    }

    /// Shut the engine down and cancel its adapter tasks. Commands issued
    /// after this fail with [`SyncError::ConversationClosed`] and the
    /// snapshot channel closes.
    pub fn close(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for ConversationHandle {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

/// Everything a conversation engine needs to run.
pub struct ConversationEngine {
    me: UserId,
    peer: UserId,
    store: ConversationStore,
    allocator: TempIdAllocator,
    counters: StaleCounters,
    config: SyncConfig,
    api: Arc<dyn MessageApi>,
    commands: mpsc::Receiver<Command>,
    events: mpsc::Receiver<SyncEvent>,
    done_rx: mpsc::Receiver<TaskDone>,
    done_tx: mpsc::Sender<TaskDone>,
    outbound: mpsc::Sender<OutboundFrame>,
    snapshots: watch::Sender<ConversationSnapshot>,
    cursor: watch::Sender<Option<DateTime<Utc>>>,
    errors: mpsc::Sender<SyncError>,
}

impl ConversationEngine {
    /// Spawn the engine and its three transport adapters for one
    /// conversation.
    pub fn spawn(
        me: UserId,
        peer: UserId,
        api: Arc<dyn MessageApi>,
        socket: Arc<dyn PushSocket>,
        change_feed: Option<impl Stream<Item = ChangeFeedNotification> + Send + 'static>,
        config: SyncConfig,
    ) -> ConversationHandle {
        let conversation_id = ConversationId::between(me.clone(), peer.clone());
        let store = ConversationStore::new(
            conversation_id.clone(),
            me.clone(),
            config.tombstone_grace,
        );

        let (commands_tx, commands_rx) = mpsc::channel(config.event_channel_capacity);
        let (events_tx, events_rx) = mpsc::channel(config.event_channel_capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_channel_capacity);
        let (done_tx, done_rx) = mpsc::channel(config.event_channel_capacity);
        let (errors_tx, errors_rx) = mpsc::channel(config.event_channel_capacity);
        let (link_tx, link_rx) = watch::channel(LinkState::Down);
        let (cursor_tx, cursor_rx) = watch::channel(store.latest_created_at());
        let (snapshot_tx, snapshot_rx) = watch::channel(store.snapshot());

        let mut tasks = Vec::new();

        tasks.push(tokio::spawn(PushAdapter::run(
            socket,
            events_tx.clone(),
            outbound_rx,
            link_tx,
            config.clone(),
        )));
        if let Some(feed) = change_feed {
            tasks.push(tokio::spawn(ChangeFeedAdapter::run(
                feed,
                conversation_id.clone(),
                events_tx.clone(),
            )));
        }
        tasks.push(tokio::spawn(PollingAdapter::run(
            Arc::clone(&api),
            me.clone(),
            peer.clone(),
            cursor_rx,
            link_rx,
            events_tx,
            config.clone(),
        )));

        let engine = ConversationEngine {
            me,
            peer,
            store,
            allocator: TempIdAllocator::new(),
            counters: StaleCounters::default(),
            config,
            api,
            commands: commands_rx,
            events: events_rx,
            done_rx,
            done_tx,
            outbound: outbound_tx,
            snapshots: snapshot_tx,
            cursor: cursor_tx,
            errors: errors_tx,
        };
        tasks.push(tokio::spawn(engine.run()));

        ConversationHandle {
            commands: commands_tx,
            snapshots: snapshot_rx,
            errors: Some(errors_rx),
            tasks,
        }
    }

    async fn run(mut self) {
        info!(conversation = %self.store.conversation_id(), "conversation engine started");
        let mut sweep = tokio::time::interval(self.config.tombstone_sweep_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    // All handles dropped: shut down.
                    None => break,
                },
                event = self.events.recv() => match event {
                    Some(event) => self.on_event(event),
                    None => {}
                },
                done = self.done_rx.recv() => match done {
                    Some(done) => self.on_done(done),
                    None => {}
                },
                _ = sweep.tick() => {
                    let now = Utc::now();
                    self.store.sweep_tombstones(now);
                    self.store.expire_retired_keys(now);
                }
            }
        }

        debug!(
            conversation = %self.store.conversation_id(),
            discarded = self.counters.total(),
            "conversation engine stopped"
        );
    }

    fn publish(&mut self) {
        let _ = self.cursor.send(self.store.latest_created_at());
        let _ = self.snapshots.send(self.store.snapshot());
    }

    fn surface_error(&self, error: SyncError) {
        if let Err(dropped) = self.errors.try_send(error) {
            warn!(error = %dropped.into_inner(), "error channel full, report dropped");
        }
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::SendMessage {
                content,
                kind,
                reply_to,
                respond,
            } => {
                let temp_id = self.allocator.mint();
                let placeholder = optimistic::build_placeholder(
                    temp_id.clone(),
                    self.me.clone(),
                    self.peer.clone(),
                    content.clone(),
                    kind,
                    reply_to.clone(),
                    Utc::now(),
                );
                self.store.insert_ordered(placeholder.clone());
                self.publish();
                let _ = respond.send(temp_id.clone());

                // Best-effort low-latency path; the REST call below is the
                // durable one.
                let _ = self
                    .outbound
                    .send(OutboundFrame::MessageSend {
                        message: placeholder,
                    })
                    .await;

                let api = Arc::clone(&self.api);
                let done = self.done_tx.clone();
                let me = self.me.clone();
                let peer = self.peer.clone();
                tokio::spawn(async move {
                    let result = match &reply_to {
                        Some(target) => api.send_reply(&me, &peer, &content, target).await,
                        None => api.send_message(&me, &peer, &content).await,
                    };
                    let _ = done.send(TaskDone::WriteResolved { temp_id, result }).await;
                });
            }
            Command::ToggleReaction { message, emoji } => {
                if !self.store.toggle_reaction(&message, &emoji) {
                    debug!(%message, "reaction toggle for unknown message ignored");
                    return;
                }
                self.publish();
                if let Some(server_id) = message.as_confirmed() {
                    let _ = self
                        .outbound
                        .send(OutboundFrame::ReactionToggle {
                            message_id: server_id.clone(),
                            emoji,
                        })
                        .await;
                }
            }
            Command::DeleteMessage { message } => {
                let Some((removed, plan)) =
                    deletion::delete_message(&mut self.store, &message, Utc::now())
                else {
                    debug!(%message, "delete for unknown message ignored");
                    return;
                };
                self.publish();
                if let DeletePlan::Durable(server_id) = plan {
                    let api = Arc::clone(&self.api);
                    let done = self.done_tx.clone();
                    tokio::spawn(async move {
                        let result = api.delete_message(&server_id).await;
                        let _ = done
                            .send(TaskDone::DeleteResolved {
                                removed: Box::new(removed),
                                result,
                            })
                            .await;
                    });
                }
            }
            Command::MarkRead => {
                let now = Utc::now();
                let peer = self.peer.clone();
                let mut read_ids = Vec::new();
                for index in 0..self.store.len() {
                    let Some(message) = self.store.message_mut(index) else {
                        continue;
                    };
                    if message.sender_id == peer
                        && crate::status::apply_status(message, DeliveryStatus::Read, now)
                            == StatusOutcome::Advanced
                    {
                        if let Some(server_id) = message.server_id() {
                            read_ids.push(server_id.clone());
                        }
                    }
                }
                if !read_ids.is_empty() {
                    self.publish();
                }
                for message_id in read_ids {
                    let _ = self
                        .outbound
                        .send(OutboundFrame::MessageRead { message_id })
                        .await;
                }

                let api = Arc::clone(&self.api);
                let done = self.done_tx.clone();
                let me = self.me.clone();
                tokio::spawn(async move {
                    let result = api.mark_messages_as_read(&peer, &me).await;
                    let _ = done.send(TaskDone::MarkReadResolved { result }).await;
                });
            }
            Command::SetTyping { is_typing } => {
                let _ = self.outbound.send(OutboundFrame::TypingSet { is_typing }).await;
            }
        }
    }

    fn on_event(&mut self, event: SyncEvent) {
        match event {
            SyncEvent::MessageCreated { message } => {
                let outcome = reconcile::apply_created(
                    &mut self.store,
                    message,
                    &self.config,
                    Utc::now(),
                    &mut self.counters,
                );
                if outcome != ReconcileOutcome::Suppressed {
                    self.publish();
                }
            }
            SyncEvent::MessageStatusChanged {
                message_id,
                status,
                at,
            } => {
                let outcome = reconcile::apply_status_event(
                    &mut self.store,
                    &message_id,
                    status,
                    at,
                    &mut self.counters,
                );
                if outcome == StatusOutcome::Advanced {
                    self.publish();
                }
            }
            SyncEvent::ReactionChanged { message_id, .. } => {
                // The payload is only an invalidation hint; fetch the
                // authoritative set for that single message.
                let api = Arc::clone(&self.api);
                let done = self.done_tx.clone();
                tokio::spawn(async move {
                    let result = api.get_reactions(std::slice::from_ref(&message_id)).await;
                    let _ = done
                        .send(TaskDone::ReactionsFetched { message_id, result })
                        .await;
                });
            }
            SyncEvent::MessageDeleted { message_id } => {
                let id = MessageRef::Confirmed(message_id);
                let now = Utc::now();
                if self.store.is_tombstoned(&id, now) {
                    self.counters.tombstone_suppressed += 1;
                    return;
                }
                if self.store.remove(&id).is_some() {
                    // Remember the deletion so a slower adapter's copy of
                    // the same message cannot resurrect it.
                    self.store.tombstone(id, now);
                    self.publish();
                }
            }
            SyncEvent::TypingChanged { user_id, is_typing } => {
                if user_id == self.peer {
                    self.store.set_peer_typing(is_typing);
                    self.publish();
                }
            }
        }
    }

    fn on_done(&mut self, done: TaskDone) {
        match done {
            TaskDone::WriteResolved { temp_id, result } => match result {
                Ok(confirmed) => {
                    reconcile::apply_confirmation(
                        &mut self.store,
                        &temp_id,
                        confirmed,
                        &self.config,
                        Utc::now(),
                        &mut self.counters,
                    );
                    self.publish();
                }
                Err(err) => {
                    warn!(%temp_id, %err, "durable write rejected, rolling back placeholder");
                    optimistic::roll_back(&mut self.store, &temp_id);
                    self.publish();
                    self.surface_error(SyncError::write_rejected(temp_id, err.to_string()));
                }
            },
            TaskDone::DeleteResolved { removed, result } => match result {
                Ok(()) => debug!(message = %removed.id, "durable delete confirmed"),
                Err(err) => {
                    warn!(message = %removed.id, %err, "durable delete failed, restoring from server");
                    let api = Arc::clone(&self.api);
                    let done = self.done_tx.clone();
                    let me = self.me.clone();
                    let peer = self.peer.clone();
                    tokio::spawn(async move {
                        let result = api.get_messages_since(&me, &peer, None).await;
                        let _ = done
                            .send(TaskDone::RestoreFetched { removed, result })
                            .await;
                    });
                }
            },
            TaskDone::RestoreFetched { removed, result } => {
                self.store.clear_tombstone(&removed.id);
                if let Some(retired) = &removed.retired_temp_id {
                    self.store
                        .clear_tombstone(&MessageRef::Temp(retired.clone()));
                }
                match result {
                    Ok(messages) => {
                        for message in messages {
                            reconcile::apply_created(
                                &mut self.store,
                                message,
                                &self.config,
                                Utc::now(),
                                &mut self.counters,
                            );
                        }
                    }
                    Err(err) => {
                        // Authoritative fetch also failed: put the local
                        // copy back rather than losing it silently.
                        warn!(%err, "restore fetch failed, reinserting local copy");
                        deletion::restore_after_failed_delete(&mut self.store, *removed);
                    }
                }
                self.publish();
            }
            TaskDone::ReactionsFetched { message_id, result } => match result {
                Ok(mut reactions) => {
                    let rows = reactions.remove(&message_id).unwrap_or_default();
                    let aggregate = ReactionAggregate::from_server(&rows, self.store.me());
                    self.store.replace_reactions(&message_id, aggregate);
                    self.publish();
                }
                Err(err) => {
                    // Stay on the optimistic view until the next fetch.
                    warn!(message = %message_id, %err, "reaction reconcile failed");
                    self.surface_error(SyncError::ReactionReconcile {
                        message: MessageRef::Confirmed(message_id),
                        reason: err.to_string(),
                    });
                }
            },
            TaskDone::MarkReadResolved { result } => {
                if let Err(err) = result {
                    debug!(%err, "mark-read call failed, will settle on next event");
                }
            }
        }
    }
}
