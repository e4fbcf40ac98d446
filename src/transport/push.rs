//! Push Channel Adapter
//!
//! Low-latency, best-effort delivery over a persistent bidirectional
//! socket. The socket itself is supplied by the caller behind the
//! [`PushSocket`] trait; this adapter owns the reconnect loop (exponential
//! backoff with jitter), decodes inbound frames into [`SyncEvent`]s, and
//! forwards outbound frames from the engine.
//!
//! On reconnect the push channel does not replay missed events; the gap is
//! closed by the polling fallback, which watches this adapter's link state.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::model::{
    DeliveryStatus, Message, Reaction, ServerId, ServerMessage, SyncEvent, UserId,
};

/// Whether the push socket currently has a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Up,
    Down,
}

/// Wire frame arriving over the push socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum InboundFrame {
    #[serde(rename = "message:new")]
    MessageNew { message: ServerMessage },
    #[serde(rename = "message:status")]
    MessageStatus {
        message_id: ServerId,
        status: DeliveryStatus,
        at: DateTime<Utc>,
    },
    #[serde(rename = "reaction:changed")]
    ReactionChanged {
        message_id: ServerId,
        reaction: Reaction,
    },
    #[serde(rename = "typing:changed")]
    TypingChanged { user_id: UserId, is_typing: bool },
}

/// Wire frame the engine sends over the push socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OutboundFrame {
    #[serde(rename = "message:send")]
    MessageSend { message: Message },
    #[serde(rename = "typing:set")]
    TypingSet { is_typing: bool },
    #[serde(rename = "reaction:toggle")]
    ReactionToggle { message_id: ServerId, emoji: String },
    #[serde(rename = "message:read")]
    MessageRead { message_id: ServerId },
}

/// One live connection. `next_frame` returning `Ok(None)` means the server
/// closed the link cleanly.
#[async_trait]
pub trait PushLink: Send {
    async fn next_frame(&mut self) -> Result<Option<InboundFrame>, SyncError>;
    async fn send_frame(&mut self, frame: OutboundFrame) -> Result<(), SyncError>;
}

/// Factory for connections; process-wide, shared across conversations.
#[async_trait]
pub trait PushSocket: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn PushLink>, SyncError>;
}

/// Runs the push channel for one conversation until the outbound channel
/// closes (engine shutdown) or the event channel is dropped.
pub struct PushAdapter;

impl PushAdapter {
    pub async fn run(
        socket: Arc<dyn PushSocket>,
        events: mpsc::Sender<SyncEvent>,
        mut outbound: mpsc::Receiver<OutboundFrame>,
        link: watch::Sender<LinkState>,
        config: SyncConfig,
    ) {
        let mut attempt: u32 = 0;
        loop {
            let mut connection = match socket.connect().await {
                Ok(connection) => {
                    attempt = 0;
                    let _ = link.send(LinkState::Up);
                    info!("push link established");
                    connection
                }
                Err(err) => {
                    let delay = backoff_delay(&config, attempt);
                    attempt = attempt.saturating_add(1);
                    debug!(%err, ?delay, "push connect failed, backing off");
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };

            let reason = loop {
                tokio::select! {
                    frame = connection.next_frame() => match frame {
                        Ok(Some(frame)) => {
                            if events.send(decode(frame)).await.is_err() {
                                return;
                            }
                        }
                        Ok(None) => break "server closed the link",
                        Err(err) => {
                            debug!(%err, "push receive failed");
                            break "receive error";
                        }
                    },
                    frame = outbound.recv() => match frame {
                        Some(frame) => {
                            if let Err(err) = connection.send_frame(frame).await {
                                debug!(%err, "push send failed");
                                break "send error";
                            }
                        }
                        None => return,
                    },
                }
            };

            let _ = link.send(LinkState::Down);
            warn!(reason, "push link lost, reconnecting");
        }
    }
}

fn decode(frame: InboundFrame) -> SyncEvent {
    match frame {
        InboundFrame::MessageNew { message } => SyncEvent::MessageCreated { message },
        InboundFrame::MessageStatus {
            message_id,
            status,
            at,
        } => SyncEvent::MessageStatusChanged {
            message_id,
            status,
            at,
        },
        InboundFrame::ReactionChanged {
            message_id,
            reaction,
        } => SyncEvent::ReactionChanged {
            message_id,
            reaction,
        },
        InboundFrame::TypingChanged { user_id, is_typing } => {
            SyncEvent::TypingChanged { user_id, is_typing }
        }
    }
}

/// Exponential backoff with a cap and a small deterministic jitter so
/// reconnecting clients spread out.
fn backoff_delay(config: &SyncConfig, attempt: u32) -> Duration {
    let exp = config
        .reconnect_base
        .saturating_mul(2u32.saturating_pow(attempt.min(16)));
    let capped = exp.min(config.reconnect_cap);
    let jitter_span = capped.mul_f64(config.reconnect_jitter.clamp(0.0, 1.0));
    let nanos = Utc::now().timestamp_subsec_nanos() as f64 / 1_000_000_000.0;
    capped + jitter_span.mul_f64(nanos)
}
