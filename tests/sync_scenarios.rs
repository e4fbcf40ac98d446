//! End-to-end engine scenarios
//!
//! Spins up a full conversation engine against the in-memory API and a
//! scripted push socket, then drives it through the situations the
//! reconciliation rules exist for: duplicate delivery, stale status,
//! rejected writes, deletes racing confirmations, and push-outage
//! catch-up.

mod common;

use std::time::Duration;

use chrono::Utc;
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use convosync::api::MessageApi;
use convosync::model::{DeliveryStatus, MessageRef, Reaction, ServerId, UserId};
use convosync::transport::{
    ChangeFeedNotification, InboundFrame, OutboundFrame, PushSocket,
};
use convosync::{ConversationEngine, ConversationHandle, SyncConfig, SyncError};

use common::{alice, bob, init_tracing, server_message, InMemoryApi, Script, ScriptedSocket};

fn carol() -> UserId {
    UserId::new("carol")
}

fn fast_config() -> SyncConfig {
    SyncConfig::default()
        .with_poll_interval(Duration::from_millis(50))
        .with_reconnect_backoff(Duration::from_millis(10), Duration::from_millis(100))
}

/// Engine with a live-injectable change feed and a quiet, healthy push
/// link.
fn spawn_with_feed(
    api: &std::sync::Arc<InMemoryApi>,
    socket: &std::sync::Arc<ScriptedSocket>,
) -> (ConversationHandle, mpsc::Sender<ChangeFeedNotification>) {
    init_tracing();
    let (feed_tx, feed_rx) = mpsc::channel(32);
    let handle = ConversationEngine::spawn(
        alice(),
        bob(),
        api.clone() as std::sync::Arc<dyn MessageApi>,
        socket.clone() as std::sync::Arc<dyn PushSocket>,
        Some(ReceiverStream::new(feed_rx)),
        fast_config(),
    );
    (handle, feed_tx)
}

async fn settle() {
    // Paused-clock runs advance instantly; this just yields enough times
    // for the engine to drain its channels.
    tokio::time::sleep(Duration::from_millis(500)).await;
}

#[tokio::test(start_paused = true)]
async fn test_optimistic_send_promotes_in_place() {
    let api = InMemoryApi::new();
    let socket = ScriptedSocket::new(vec![Script::open(vec![])]);
    let (handle, _feed) = spawn_with_feed(&api, &socket);
    let mut snapshots = handle.snapshots();

    let temp_id = handle.send_message("hello bob", None).await.unwrap();

    // The placeholder is visible immediately.
    snapshots
        .wait_for(|s| s.messages.len() == 1)
        .await
        .unwrap();

    // Once the durable write lands, the same entry carries the server id.
    let confirmed = snapshots
        .wait_for(|s| s.messages.iter().any(|m| !m.id.is_temp()))
        .await
        .unwrap()
        .clone();

    assert_eq!(confirmed.messages.len(), 1);
    let message = &confirmed.messages[0];
    assert_eq!(message.server_id(), Some(&ServerId::new("srv_1")));
    assert_eq!(message.retired_temp_id.as_ref(), Some(&temp_id));
    assert_eq!(message.content, "hello bob");
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_delivery_inserts_once() {
    let api = InMemoryApi::new();
    let socket = ScriptedSocket::new(vec![Script::open(vec![])]);
    let (handle, feed) = spawn_with_feed(&api, &socket);
    let mut snapshots = handle.snapshots();

    let incoming = server_message("srv_1", &bob(), &alice(), "hi alice");
    // The push channel and the change feed both deliver the same row.
    for _ in 0..2 {
        feed.send(ChangeFeedNotification::RowInserted {
            message: incoming.clone(),
        })
        .await
        .unwrap();
    }

    snapshots
        .wait_for(|s| !s.messages.is_empty())
        .await
        .unwrap();
    settle().await;

    let snapshot = snapshots.borrow().clone();
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(snapshot.messages[0].server_id(), Some(&ServerId::new("srv_1")));
}

#[tokio::test(start_paused = true)]
async fn test_stale_status_event_is_ignored() {
    let api = InMemoryApi::new();
    let socket = ScriptedSocket::new(vec![Script::open(vec![])]);
    let (handle, feed) = spawn_with_feed(&api, &socket);
    let mut snapshots = handle.snapshots();

    let incoming = server_message("srv_1", &alice(), &bob(), "did you see this");
    feed.send(ChangeFeedNotification::RowInserted { message: incoming })
        .await
        .unwrap();
    snapshots
        .wait_for(|s| !s.messages.is_empty())
        .await
        .unwrap();

    // Read arrives before the (older) Delivered event.
    let read_at = Utc::now();
    feed.send(ChangeFeedNotification::RowUpdated {
        message_id: ServerId::new("srv_1"),
        sender_id: alice(),
        recipient_id: bob(),
        status: Some(DeliveryStatus::Read),
        reaction: None,
        at: read_at,
    })
    .await
    .unwrap();
    snapshots
        .wait_for(|s| s.messages[0].status == DeliveryStatus::Read)
        .await
        .unwrap();

    feed.send(ChangeFeedNotification::RowUpdated {
        message_id: ServerId::new("srv_1"),
        sender_id: alice(),
        recipient_id: bob(),
        status: Some(DeliveryStatus::Delivered),
        reaction: None,
        at: Utc::now(),
    })
    .await
    .unwrap();
    settle().await;

    let snapshot = snapshots.borrow().clone();
    assert_eq!(snapshot.messages[0].status, DeliveryStatus::Read);
    assert_eq!(snapshot.messages[0].read_at, Some(read_at));
}

#[tokio::test(start_paused = true)]
async fn test_poll_catches_up_while_link_down() {
    let api = InMemoryApi::new();
    let first = server_message("srv_1", &bob(), &alice(), "before the outage");
    api.seed(first.clone());
    let mut second = server_message("srv_2", &bob(), &alice(), "during the outage");
    second.created_at = first.created_at + chrono::Duration::seconds(5);
    api.seed(second);

    // One connection that delivers srv_1 and drops; reconnects then fail,
    // so the poller takes over and finds srv_2 past the cursor.
    let socket = ScriptedSocket::new(vec![Script::then_drop(vec![InboundFrame::MessageNew {
        message: first,
    }])]);
    let (handle, _feed) = spawn_with_feed(&api, &socket);
    let mut snapshots = handle.snapshots();

    let snapshot = snapshots
        .wait_for(|s| s.messages.len() == 2)
        .await
        .unwrap()
        .clone();

    let ids: Vec<_> = snapshot
        .messages
        .iter()
        .filter_map(|m| m.server_id())
        .map(|id| id.as_str().to_owned())
        .collect();
    assert_eq!(ids, vec!["srv_1", "srv_2"]);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_write_rolls_back_placeholder() {
    let api = InMemoryApi::new();
    api.fail_sends(true);
    let socket = ScriptedSocket::new(vec![Script::open(vec![])]);
    let (mut handle, _feed) = spawn_with_feed(&api, &socket);
    let mut errors = handle.errors().unwrap();
    let mut snapshots = handle.snapshots();

    let temp_id = handle.send_message("doomed", None).await.unwrap();

    // The watch channel only holds the latest snapshot, so the placeholder
    // state may already be overwritten by the rollback when we look. Gate on
    // the durable effects instead: the rejection report, then the empty
    // timeline.
    let error = errors.recv().await.unwrap();
    match error {
        SyncError::WriteRejected { temp_id: rejected, .. } => assert_eq!(rejected, temp_id),
        other => panic!("unexpected error: {other}"),
    }

    snapshots.wait_for(|s| s.messages.is_empty()).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_delete_before_confirm_is_not_resurrected() {
    let api = InMemoryApi::new();
    api.delay_sends(Duration::from_secs(2));
    let socket = ScriptedSocket::new(vec![Script::open(vec![])]);
    let (handle, feed) = spawn_with_feed(&api, &socket);
    let mut snapshots = handle.snapshots();

    let temp_id = handle.send_message("changed my mind", None).await.unwrap();
    snapshots
        .wait_for(|s| s.messages.len() == 1)
        .await
        .unwrap();

    // Delete while the durable write is still in flight.
    handle
        .delete_message(MessageRef::Temp(temp_id))
        .await
        .unwrap();
    snapshots.wait_for(|s| s.messages.is_empty()).await.unwrap();

    // Let the write resolve; the confirmation must be swallowed.
    settle().await;
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(snapshots.borrow().messages.is_empty());

    // The durable write did persist server-side; even a late feed event
    // for that row must not bring the message back.
    let stored = api.stored();
    assert_eq!(stored.len(), 1);
    feed.send(ChangeFeedNotification::RowInserted {
        message: stored[0].clone(),
    })
    .await
    .unwrap();
    settle().await;
    assert!(snapshots.borrow().messages.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_delete_restores_from_server() {
    let api = InMemoryApi::new();
    let incoming = server_message("srv_1", &bob(), &alice(), "protected");
    api.seed(incoming.clone());
    api.fail_deletes(true);
    let socket = ScriptedSocket::new(vec![Script::open(vec![])]);
    let (handle, feed) = spawn_with_feed(&api, &socket);
    let mut snapshots = handle.snapshots();

    feed.send(ChangeFeedNotification::RowInserted { message: incoming })
        .await
        .unwrap();
    snapshots
        .wait_for(|s| !s.messages.is_empty())
        .await
        .unwrap();

    handle
        .delete_message(MessageRef::Confirmed(ServerId::new("srv_1")))
        .await
        .unwrap();

    // Optimistic removal, then restoration from the authoritative fetch.
    let snapshot = snapshots
        .wait_for(|s| {
            s.messages.len() == 1
                && s.messages[0].server_id() == Some(&ServerId::new("srv_1"))
        })
        .await
        .unwrap()
        .clone();
    assert_eq!(snapshot.messages[0].content, "protected");
}

#[tokio::test(start_paused = true)]
async fn test_reaction_toggle_and_server_replacement() {
    let api = InMemoryApi::new();
    let incoming = server_message("srv_1", &bob(), &alice(), "nice");
    api.seed(incoming.clone());
    let socket = ScriptedSocket::new(vec![Script::open(vec![])]);
    let (handle, feed) = spawn_with_feed(&api, &socket);
    let mut snapshots = handle.snapshots();

    feed.send(ChangeFeedNotification::RowInserted {
        message: incoming.clone(),
    })
    .await
    .unwrap();
    snapshots
        .wait_for(|s| !s.messages.is_empty())
        .await
        .unwrap();

    let message_ref = MessageRef::Confirmed(ServerId::new("srv_1"));

    // Double-tap: the second toggle removes the first.
    handle
        .toggle_reaction(message_ref.clone(), "❤️")
        .await
        .unwrap();
    handle
        .toggle_reaction(message_ref.clone(), "❤️")
        .await
        .unwrap();
    settle().await;
    assert!(snapshots
        .borrow()
        .reactions
        .get(&message_ref)
        .map_or(true, |a| a.is_empty()));

    // Server says bob reacted; the aggregate is replaced wholesale.
    api.set_reactions(
        ServerId::new("srv_1"),
        vec![Reaction {
            message_id: ServerId::new("srv_1"),
            emoji: "👍".into(),
            user_id: bob(),
            at: Utc::now(),
        }],
    );
    feed.send(ChangeFeedNotification::RowUpdated {
        message_id: ServerId::new("srv_1"),
        sender_id: bob(),
        recipient_id: alice(),
        status: None,
        reaction: Some(Reaction {
            message_id: ServerId::new("srv_1"),
            emoji: "👍".into(),
            user_id: bob(),
            at: Utc::now(),
        }),
        at: Utc::now(),
    })
    .await
    .unwrap();

    let snapshot = snapshots
        .wait_for(|s| {
            s.reactions
                .get(&message_ref)
                .and_then(|a| a.entry("👍"))
                .is_some()
        })
        .await
        .unwrap()
        .clone();
    let entry = snapshot.reactions[&message_ref].entry("👍").unwrap();
    assert_eq!(entry.count, 1);
    assert!(!entry.reacted_by_me);
}

#[tokio::test(start_paused = true)]
async fn test_late_reaction_event_after_delete_leaves_no_aggregate() {
    let api = InMemoryApi::new();
    let incoming = server_message("srv_1", &bob(), &alice(), "gone soon");
    api.seed(incoming.clone());
    let socket = ScriptedSocket::new(vec![Script::open(vec![])]);
    let (handle, feed) = spawn_with_feed(&api, &socket);
    let mut snapshots = handle.snapshots();

    feed.send(ChangeFeedNotification::RowInserted { message: incoming })
        .await
        .unwrap();
    snapshots
        .wait_for(|s| !s.messages.is_empty())
        .await
        .unwrap();

    handle
        .delete_message(MessageRef::Confirmed(ServerId::new("srv_1")))
        .await
        .unwrap();
    snapshots.wait_for(|s| s.messages.is_empty()).await.unwrap();

    // A reaction event for the deleted row straggles in, and the fetch
    // still returns rows because the peer reacted before the delete
    // landed. The aggregate must not outlive the message.
    api.set_reactions(
        ServerId::new("srv_1"),
        vec![Reaction {
            message_id: ServerId::new("srv_1"),
            emoji: "❤️".into(),
            user_id: bob(),
            at: Utc::now(),
        }],
    );
    feed.send(ChangeFeedNotification::RowUpdated {
        message_id: ServerId::new("srv_1"),
        sender_id: bob(),
        recipient_id: alice(),
        status: None,
        reaction: Some(Reaction {
            message_id: ServerId::new("srv_1"),
            emoji: "❤️".into(),
            user_id: bob(),
            at: Utc::now(),
        }),
        at: Utc::now(),
    })
    .await
    .unwrap();
    settle().await;

    let snapshot = snapshots.borrow().clone();
    assert!(snapshot.messages.is_empty());
    assert!(snapshot
        .reactions
        .get(&MessageRef::Confirmed(ServerId::new("srv_1")))
        .is_none());
}

#[tokio::test(start_paused = true)]
async fn test_reaction_fetch_failure_keeps_optimistic_view() {
    let api = InMemoryApi::new();
    let incoming = server_message("srv_1", &bob(), &alice(), "nice");
    api.seed(incoming.clone());
    api.fail_reactions(true);
    let socket = ScriptedSocket::new(vec![Script::open(vec![])]);
    let (mut handle, feed) = spawn_with_feed(&api, &socket);
    let mut errors = handle.errors().unwrap();
    let mut snapshots = handle.snapshots();

    feed.send(ChangeFeedNotification::RowInserted { message: incoming })
        .await
        .unwrap();
    snapshots
        .wait_for(|s| !s.messages.is_empty())
        .await
        .unwrap();

    let message_ref = MessageRef::Confirmed(ServerId::new("srv_1"));
    handle
        .toggle_reaction(message_ref.clone(), "❤️")
        .await
        .unwrap();
    snapshots
        .wait_for(|s| {
            s.reactions
                .get(&message_ref)
                .and_then(|a| a.entry("❤️"))
                .is_some()
        })
        .await
        .unwrap();

    // The invalidation hint arrives but the authoritative fetch fails.
    feed.send(ChangeFeedNotification::RowUpdated {
        message_id: ServerId::new("srv_1"),
        sender_id: bob(),
        recipient_id: alice(),
        status: None,
        reaction: Some(Reaction {
            message_id: ServerId::new("srv_1"),
            emoji: "👍".into(),
            user_id: bob(),
            at: Utc::now(),
        }),
        at: Utc::now(),
    })
    .await
    .unwrap();

    let error = errors.recv().await.unwrap();
    match error {
        SyncError::ReactionReconcile { message, .. } => assert_eq!(message, message_ref),
        other => panic!("unexpected error: {other}"),
    }

    // The optimistic toggle stays until a fetch succeeds.
    let snapshot = snapshots.borrow().clone();
    let entry = snapshot.reactions[&message_ref].entry("❤️").unwrap();
    assert_eq!(entry.count, 1);
    assert!(entry.reacted_by_me);
}

#[tokio::test(start_paused = true)]
async fn test_mark_read_advances_peer_messages_and_notifies() {
    let api = InMemoryApi::new();
    let socket = ScriptedSocket::new(vec![Script::open(vec![])]);
    let (handle, feed) = spawn_with_feed(&api, &socket);
    let mut snapshots = handle.snapshots();

    feed.send(ChangeFeedNotification::RowInserted {
        message: server_message("srv_1", &bob(), &alice(), "unread"),
    })
    .await
    .unwrap();
    snapshots
        .wait_for(|s| !s.messages.is_empty())
        .await
        .unwrap();

    handle.mark_read().await.unwrap();
    let snapshot = snapshots
        .wait_for(|s| s.messages[0].status == DeliveryStatus::Read)
        .await
        .unwrap()
        .clone();
    assert!(snapshot.messages[0].read_at.is_some());

    settle().await;
    let read_frames: Vec<_> = socket
        .sent_frames()
        .into_iter()
        .filter(|f| matches!(f, OutboundFrame::MessageRead { .. }))
        .collect();
    assert_eq!(
        read_frames,
        vec![OutboundFrame::MessageRead {
            message_id: ServerId::new("srv_1")
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_typing_indicator_scoped_to_peer() {
    let api = InMemoryApi::new();
    let socket = ScriptedSocket::new(vec![Script::open(vec![
        InboundFrame::TypingChanged {
            user_id: carol(),
            is_typing: true,
        },
        InboundFrame::TypingChanged {
            user_id: bob(),
            is_typing: true,
        },
    ])]);
    let (handle, _feed) = spawn_with_feed(&api, &socket);
    let mut snapshots = handle.snapshots();

    let snapshot = snapshots.wait_for(|s| s.peer_typing).await.unwrap().clone();
    assert!(snapshot.peer_typing);
}

#[tokio::test(start_paused = true)]
async fn test_typing_from_outsider_is_ignored() {
    let api = InMemoryApi::new();
    let socket = ScriptedSocket::new(vec![Script::open(vec![InboundFrame::TypingChanged {
        user_id: carol(),
        is_typing: true,
    }])]);
    let (handle, _feed) = spawn_with_feed(&api, &socket);
    let snapshots = handle.snapshots();

    settle().await;
    assert!(!snapshots.borrow().peer_typing);
}

#[tokio::test(start_paused = true)]
async fn test_close_rejects_later_commands() {
    let api = InMemoryApi::new();
    let socket = ScriptedSocket::new(vec![Script::open(vec![])]);
    let (mut handle, _feed) = spawn_with_feed(&api, &socket);
    let mut snapshots = handle.snapshots();

    handle.send_message("last words", None).await.unwrap();
    snapshots
        .wait_for(|s| s.messages.iter().any(|m| !m.id.is_temp()))
        .await
        .unwrap();

    handle.close();
    settle().await;

    match handle.send_message("too late", None).await {
        Err(SyncError::ConversationClosed) => {}
        other => panic!("expected closed error, got {other:?}"),
    }
    match handle.mark_read().await {
        Err(SyncError::ConversationClosed) => {}
        other => panic!("expected closed error, got {other:?}"),
    }

    // The snapshot publisher shut down with the engine.
    assert!(snapshots.wait_for(|_| false).await.is_err());
}
