//! Common test utilities and helpers
//!
//! Provides shared fixtures for the scenario tests:
//! - An in-memory [`MessageApi`] with scriptable failures
//! - A scripted push socket that replays canned inbound frames
//! - Message fixture builders

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use convosync::api::{ApiError, MessageApi};
use convosync::error::SyncError;
use convosync::model::{
    DeliveryStatus, MessageKind, Reaction, ServerId, ServerMessage, UserId,
};
use convosync::transport::{InboundFrame, OutboundFrame, PushLink, PushSocket};

/// Opt-in log output for debugging a failing scenario:
/// `RUST_LOG=convosync=debug cargo test`.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn alice() -> UserId {
    UserId::new("alice")
}

pub fn bob() -> UserId {
    UserId::new("bob")
}

pub fn server_message(id: &str, sender: &UserId, recipient: &UserId, content: &str) -> ServerMessage {
    ServerMessage {
        id: ServerId::new(id),
        sender_id: sender.clone(),
        recipient_id: recipient.clone(),
        content: content.to_owned(),
        kind: MessageKind::Text,
        created_at: Utc::now(),
        status: DeliveryStatus::Sent,
        reply_to: None,
    }
}

#[derive(Default)]
struct ApiState {
    stored: Vec<ServerMessage>,
    reactions: HashMap<ServerId, Vec<Reaction>>,
    deleted: Vec<ServerId>,
    next_id: u64,
    fail_sends: bool,
    fail_deletes: bool,
    fail_reactions: bool,
    send_delay: Option<std::time::Duration>,
}

/// In-memory durable store standing in for the REST backend.
#[derive(Default)]
pub struct InMemoryApi {
    state: Mutex<ApiState>,
}

impl InMemoryApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Put a message into the backlog without going through `send_message`.
    pub fn seed(&self, message: ServerMessage) {
        self.state.lock().unwrap().stored.push(message);
    }

    pub fn set_reactions(&self, id: ServerId, reactions: Vec<Reaction>) {
        self.state.lock().unwrap().reactions.insert(id, reactions);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.state.lock().unwrap().fail_sends = fail;
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.state.lock().unwrap().fail_deletes = fail;
    }

    pub fn fail_reactions(&self, fail: bool) {
        self.state.lock().unwrap().fail_reactions = fail;
    }

    /// Hold every send for this long before persisting, to widen the
    /// in-flight window.
    pub fn delay_sends(&self, delay: std::time::Duration) {
        self.state.lock().unwrap().send_delay = Some(delay);
    }

    async fn apply_send_delay(&self) {
        let delay = self.state.lock().unwrap().send_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    pub fn stored(&self) -> Vec<ServerMessage> {
        self.state.lock().unwrap().stored.clone()
    }

    pub fn deleted(&self) -> Vec<ServerId> {
        self.state.lock().unwrap().deleted.clone()
    }
}

#[async_trait]
impl MessageApi for InMemoryApi {
    async fn send_message(
        &self,
        sender_id: &UserId,
        recipient_id: &UserId,
        content: &str,
    ) -> Result<ServerMessage, ApiError> {
        self.apply_send_delay().await;
        self.persist(sender_id, recipient_id, content, None)
    }

    async fn send_reply(
        &self,
        sender_id: &UserId,
        recipient_id: &UserId,
        content: &str,
        reply_to: &ServerId,
    ) -> Result<ServerMessage, ApiError> {
        self.apply_send_delay().await;
        self.persist(sender_id, recipient_id, content, Some(reply_to.clone()))
    }

    async fn delete_message(&self, message_id: &ServerId) -> Result<(), ApiError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_deletes {
            return Err(ApiError::Network("connection reset".into()));
        }
        state.stored.retain(|m| &m.id != message_id);
        state.deleted.push(message_id.clone());
        Ok(())
    }

    async fn mark_messages_as_read(
        &self,
        _sender_id: &UserId,
        _recipient_id: &UserId,
    ) -> Result<(), ApiError> {
        Ok(())
    }

    async fn get_messages_since(
        &self,
        _user_a: &UserId,
        _user_b: &UserId,
        cursor: Option<DateTime<Utc>>,
    ) -> Result<Vec<ServerMessage>, ApiError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .stored
            .iter()
            .filter(|m| cursor.map_or(true, |cursor| m.created_at > cursor))
            .cloned()
            .collect())
    }

    async fn get_reactions(
        &self,
        message_ids: &[ServerId],
    ) -> Result<HashMap<ServerId, Vec<Reaction>>, ApiError> {
        let state = self.state.lock().unwrap();
        if state.fail_reactions {
            return Err(ApiError::Network("reaction fetch failed".into()));
        }
        Ok(message_ids
            .iter()
            .filter_map(|id| state.reactions.get(id).map(|r| (id.clone(), r.clone())))
            .collect())
    }
}

impl InMemoryApi {
    fn persist(
        &self,
        sender_id: &UserId,
        recipient_id: &UserId,
        content: &str,
        reply_to: Option<ServerId>,
    ) -> Result<ServerMessage, ApiError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_sends {
            return Err(ApiError::Rejected {
                status: 422,
                message: "message rejected".into(),
            });
        }
        state.next_id += 1;
        let message = ServerMessage {
            id: ServerId::new(format!("srv_{}", state.next_id)),
            sender_id: sender_id.clone(),
            recipient_id: recipient_id.clone(),
            content: content.to_owned(),
            kind: MessageKind::Text,
            created_at: Utc::now(),
            status: DeliveryStatus::Sent,
            reply_to,
        };
        state.stored.push(message.clone());
        Ok(message)
    }
}

/// Frames one scripted connection delivers before it ends.
pub struct Script {
    pub frames: Vec<InboundFrame>,
    /// Keep the link open (and silent) after the frames are delivered.
    pub hold_open: bool,
}

impl Script {
    pub fn open(frames: Vec<InboundFrame>) -> Self {
        Self {
            frames,
            hold_open: true,
        }
    }

    pub fn then_drop(frames: Vec<InboundFrame>) -> Self {
        Self {
            frames,
            hold_open: false,
        }
    }
}

/// Push socket that replays one [`Script`] per connection attempt and
/// refuses to connect once the scripts run out.
pub struct ScriptedSocket {
    scripts: Mutex<VecDeque<Script>>,
    sent: Arc<Mutex<Vec<OutboundFrame>>>,
}

impl ScriptedSocket {
    pub fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            sent: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Frames the engine pushed over the socket, across all connections.
    pub fn sent_frames(&self) -> Vec<OutboundFrame> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushSocket for ScriptedSocket {
    async fn connect(&self) -> Result<Box<dyn PushLink>, SyncError> {
        let script = self.scripts.lock().unwrap().pop_front();
        match script {
            Some(script) => Ok(Box::new(ScriptedLink {
                frames: script.frames.into(),
                hold_open: script.hold_open,
                sent: Arc::clone(&self.sent),
            })),
            None => Err(SyncError::transport("no more scripted connections")),
        }
    }
}

struct ScriptedLink {
    frames: VecDeque<InboundFrame>,
    hold_open: bool,
    sent: Arc<Mutex<Vec<OutboundFrame>>>,
}

#[async_trait]
impl PushLink for ScriptedLink {
    async fn next_frame(&mut self) -> Result<Option<InboundFrame>, SyncError> {
        match self.frames.pop_front() {
            Some(frame) => Ok(Some(frame)),
            None if self.hold_open => std::future::pending().await,
            None => Ok(None),
        }
    }

    async fn send_frame(&mut self, frame: OutboundFrame) -> Result<(), SyncError> {
        self.sent.lock().unwrap().push(frame);
        Ok(())
    }
}
