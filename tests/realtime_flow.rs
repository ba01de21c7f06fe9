//! End-to-end gateway flows over the in-memory store: event dispatch,
//! acknowledgement envelopes, room broadcast, and throttling.

use std::sync::Arc;

use convoy::application::ConversationService;
use convoy::config::ThrottleSettings;
use convoy::domain::ChatStore;
use convoy::infrastructure::MemoryChatStore;
use convoy::presentation::websocket::events::{conversation_room, ClientEvent, ServerEvent};
use convoy::presentation::websocket::{
    ConnectionRegistry, EventContext, EventRouter, LiveConnection, Outbound,
};
use convoy::shared::snowflake::SnowflakeGenerator;
use tokio::sync::mpsc;

struct Harness {
    store: Arc<MemoryChatStore>,
    registry: Arc<ConnectionRegistry>,
    router: EventRouter<MemoryChatStore>,
    conversations: ConversationService<MemoryChatStore>,
}

fn harness(throttle: ThrottleSettings) -> Harness {
    let store = Arc::new(MemoryChatStore::new());
    let registry = Arc::new(ConnectionRegistry::new(5));
    let ids = Arc::new(SnowflakeGenerator::new(1, 1));
    let router = EventRouter::new(store.clone(), registry.clone(), ids.clone(), throttle);
    let conversations = ConversationService::new(store.clone(), ids);
    Harness {
        store,
        registry,
        router,
        conversations,
    }
}

fn unthrottled() -> ThrottleSettings {
    ThrottleSettings {
        send_message_ms: 0,
        typing_ms: 0,
        read_receipt_ms: 0,
        sweep_interval_secs: 60,
    }
}

fn connect(
    h: &Harness,
    connection_id: &str,
    user_id: i64,
) -> (EventContext, mpsc::UnboundedReceiver<Outbound>) {
    let (tx, rx) = mpsc::unbounded_channel();
    h.registry.register(LiveConnection {
        connection_id: connection_id.to_string(),
        user_id,
        tenant_id: 1,
        sender: tx,
    });
    (
        EventContext {
            connection_id: connection_id.to_string(),
            user_id,
            tenant_id: 1,
        },
        rx,
    )
}

fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(outbound) = rx.try_recv() {
        if let Outbound::Event(event) = outbound {
            events.push(event);
        }
    }
    events
}

#[tokio::test]
async fn send_message_broadcasts_to_room_and_fans_out() {
    let h = harness(unthrottled());
    let group = h
        .conversations
        .create_group(1, 10, "delivery", &[20, 30])
        .await
        .unwrap();

    let (sender_ctx, mut sender_rx) = connect(&h, "c-sender", 10);
    let (_recipient_ctx, mut recipient_rx) = connect(&h, "c-recipient", 20);
    h.registry.join_room("c-sender", &conversation_room(group.id));
    h.registry.join_room("c-recipient", &conversation_room(group.id));

    let ack = h
        .router
        .dispatch(
            &sender_ctx,
            ClientEvent::SendMessage {
                conversation_id: group.id,
                content: "hello room".into(),
                parent_message_id: None,
                upload_session_id: None,
            },
        )
        .await
        .expect("send-message always acks");
    assert!(ack.success);
    let message_id = ack.data.unwrap()["id"].as_i64().unwrap();

    // One inbox entry per participant excluding the sender.
    let entries = h.store.find_inbox_entries(message_id).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.recipient_id != 10));

    for rx in [&mut sender_rx, &mut recipient_rx] {
        let events = drain(rx);
        assert!(matches!(
            events.as_slice(),
            [ServerEvent::MessageCreated { message }] if message.content == "hello room"
        ));
    }
}

#[tokio::test]
async fn non_admin_add_participant_is_forbidden() {
    let h = harness(unthrottled());
    let group = h
        .conversations
        .create_group(1, 10, "locked", &[20])
        .await
        .unwrap();

    let (member_ctx, _rx) = connect(&h, "c-member", 20);
    let ack = h
        .router
        .dispatch(
            &member_ctx,
            ClientEvent::AddParticipant {
                conversation_id: group.id,
                user_ids: vec![30],
            },
        )
        .await
        .unwrap();

    assert!(!ack.success);
    assert_eq!(ack.error.unwrap().code, "FORBIDDEN");
}

#[tokio::test]
async fn second_rapid_send_is_rate_limited() {
    let h = harness(ThrottleSettings {
        send_message_ms: 500,
        ..unthrottled()
    });
    let group = h
        .conversations
        .create_group(1, 10, "fast", &[20])
        .await
        .unwrap();
    let (ctx, _rx) = connect(&h, "c-1", 10);

    let send = |content: &str| ClientEvent::SendMessage {
        conversation_id: group.id,
        content: content.into(),
        parent_message_id: None,
        upload_session_id: None,
    };

    let first = h.router.dispatch(&ctx, send("one")).await.unwrap();
    assert!(first.success);

    let second = h.router.dispatch(&ctx, send("two")).await.unwrap();
    assert!(!second.success);
    assert_eq!(second.error.unwrap().code, "RATE_LIMITED");

    assert_eq!(h.store.message_count(), 1);
}

#[tokio::test]
async fn outsider_send_is_denied_with_envelope() {
    let h = harness(unthrottled());
    let group = h
        .conversations
        .create_group(1, 10, "private", &[20])
        .await
        .unwrap();
    let (outsider_ctx, _rx) = connect(&h, "c-out", 99);

    let ack = h
        .router
        .dispatch(
            &outsider_ctx,
            ClientEvent::SendMessage {
                conversation_id: group.id,
                content: "let me in".into(),
                parent_message_id: None,
                upload_session_id: None,
            },
        )
        .await
        .unwrap();

    assert!(!ack.success);
    assert_eq!(ack.error.unwrap().code, "FORBIDDEN");
    assert_eq!(h.store.message_count(), 0);
}

#[tokio::test]
async fn oversize_content_rejected_before_any_write() {
    let h = harness(unthrottled());
    let group = h
        .conversations
        .create_group(1, 10, "bounded", &[20])
        .await
        .unwrap();
    let (ctx, _rx) = connect(&h, "c-1", 10);

    let ack = h
        .router
        .dispatch(
            &ctx,
            ClientEvent::SendMessage {
                conversation_id: group.id,
                content: "a".repeat(5001),
                parent_message_id: None,
                upload_session_id: None,
            },
        )
        .await
        .unwrap();

    assert!(!ack.success);
    let error = ack.error.unwrap();
    assert_eq!(error.code, "VALIDATION_ERROR");
    assert!(error.message.contains("5000"));
    assert_eq!(h.store.message_count(), 0);
}

#[tokio::test]
async fn cross_conversation_parent_rejected_before_any_write() {
    let h = harness(unthrottled());
    let first = h
        .conversations
        .create_group(1, 10, "first", &[20])
        .await
        .unwrap();
    let second = h
        .conversations
        .create_group(1, 10, "second", &[20])
        .await
        .unwrap();
    let (ctx, _rx) = connect(&h, "c-1", 10);

    let parent = h
        .router
        .dispatch(
            &ctx,
            ClientEvent::SendMessage {
                conversation_id: first.id,
                content: "root".into(),
                parent_message_id: None,
                upload_session_id: None,
            },
        )
        .await
        .unwrap();
    let parent_id = parent.data.unwrap()["id"].as_i64().unwrap();

    let ack = h
        .router
        .dispatch(
            &ctx,
            ClientEvent::SendMessage {
                conversation_id: second.id,
                content: "reply".into(),
                parent_message_id: Some(parent_id),
                upload_session_id: None,
            },
        )
        .await
        .unwrap();

    assert!(!ack.success);
    assert_eq!(ack.error.unwrap().code, "VALIDATION_ERROR");
    assert_eq!(h.store.message_count(), 1);
}

#[tokio::test]
async fn throttled_typing_is_silently_dropped() {
    let h = harness(ThrottleSettings {
        typing_ms: 2000,
        ..unthrottled()
    });
    let group = h
        .conversations
        .create_group(1, 10, "typing", &[20])
        .await
        .unwrap();
    let (ctx, _rx) = connect(&h, "c-1", 10);
    let (_peer_ctx, mut peer_rx) = connect(&h, "c-2", 20);
    h.registry.join_room("c-2", &conversation_room(group.id));

    let first = h
        .router
        .dispatch(
            &ctx,
            ClientEvent::Typing {
                conversation_id: group.id,
            },
        )
        .await;
    assert!(matches!(first, Some(ack) if ack.success));

    let second = h
        .router
        .dispatch(
            &ctx,
            ClientEvent::Typing {
                conversation_id: group.id,
            },
        )
        .await;
    assert!(second.is_none());

    // Only the first typing notification reached the room.
    assert_eq!(drain(&mut peer_rx).len(), 1);
}

#[tokio::test]
async fn denied_join_is_noop_with_error_envelope() {
    let h = harness(unthrottled());
    let group = h
        .conversations
        .create_group(1, 10, "members-only", &[20])
        .await
        .unwrap();
    let (outsider_ctx, _rx) = connect(&h, "c-out", 99);

    let ack = h
        .router
        .dispatch(
            &outsider_ctx,
            ClientEvent::JoinConversation {
                conversation_id: group.id,
            },
        )
        .await
        .unwrap();

    assert!(!ack.success);
    assert_eq!(ack.error.unwrap().code, "ACCESS_DENIED");
    assert_eq!(h.registry.room_size(&conversation_room(group.id)), 0);
}

#[tokio::test]
async fn added_participants_are_force_joined_and_removed_force_left() {
    let h = harness(unthrottled());
    let group = h
        .conversations
        .create_group(1, 10, "roster", &[20])
        .await
        .unwrap();
    let room = conversation_room(group.id);

    let (owner_ctx, _owner_rx) = connect(&h, "c-owner", 10);
    let (_new_ctx, mut new_rx) = connect(&h, "c-new", 30);
    h.registry.join_room("c-owner", &room);

    let ack = h
        .router
        .dispatch(
            &owner_ctx,
            ClientEvent::AddParticipant {
                conversation_id: group.id,
                user_ids: vec![30],
            },
        )
        .await
        .unwrap();
    assert!(ack.success);
    assert_eq!(h.registry.room_size(&room), 2);

    let ack = h
        .router
        .dispatch(
            &owner_ctx,
            ClientEvent::RemoveParticipant {
                conversation_id: group.id,
                user_ids: vec![30],
            },
        )
        .await
        .unwrap();
    assert!(ack.success);
    assert_eq!(h.registry.room_size(&room), 1);

    // The removed user saw the roster change before leaving the room.
    let saw_update = drain(&mut new_rx).iter().any(|event| {
        matches!(event, ServerEvent::ParticipantsUpdated { user_ids, .. } if user_ids == &vec![30])
    });
    assert!(saw_update);
}

#[tokio::test]
async fn mark_as_read_broadcasts_receipt() {
    let h = harness(unthrottled());
    let group = h
        .conversations
        .create_group(1, 10, "receipts", &[20])
        .await
        .unwrap();
    let room = conversation_room(group.id);

    let (sender_ctx, mut sender_rx) = connect(&h, "c-sender", 10);
    let (reader_ctx, _reader_rx) = connect(&h, "c-reader", 20);
    h.registry.join_room("c-sender", &room);

    let ack = h
        .router
        .dispatch(
            &sender_ctx,
            ClientEvent::SendMessage {
                conversation_id: group.id,
                content: "read me".into(),
                parent_message_id: None,
                upload_session_id: None,
            },
        )
        .await
        .unwrap();
    let message_id = ack.data.unwrap()["id"].as_i64().unwrap();
    drain(&mut sender_rx);

    let ack = h
        .router
        .dispatch(&reader_ctx, ClientEvent::MarkAsRead { message_id })
        .await
        .unwrap();
    assert!(ack.success);

    let events = drain(&mut sender_rx);
    assert!(matches!(
        events.as_slice(),
        [ServerEvent::MessageRead { user_id: 20, .. }]
    ));
}

#[tokio::test]
async fn reaction_events_round_trip_through_room() {
    let h = harness(unthrottled());
    let group = h
        .conversations
        .create_group(1, 10, "reactions", &[20])
        .await
        .unwrap();
    let room = conversation_room(group.id);

    let (sender_ctx, mut sender_rx) = connect(&h, "c-sender", 10);
    let (peer_ctx, _peer_rx) = connect(&h, "c-peer", 20);
    h.registry.join_room("c-sender", &room);

    let ack = h
        .router
        .dispatch(
            &sender_ctx,
            ClientEvent::SendMessage {
                conversation_id: group.id,
                content: "react to me".into(),
                parent_message_id: None,
                upload_session_id: None,
            },
        )
        .await
        .unwrap();
    let message_id = ack.data.unwrap()["id"].as_i64().unwrap();
    drain(&mut sender_rx);

    let ack = h
        .router
        .dispatch(
            &peer_ctx,
            ClientEvent::AddReaction {
                message_id,
                emoji: "👍".into(),
            },
        )
        .await
        .unwrap();
    assert!(ack.success);

    let ack = h
        .router
        .dispatch(
            &peer_ctx,
            ClientEvent::RemoveReaction {
                message_id,
                emoji: "👍".into(),
            },
        )
        .await
        .unwrap();
    assert!(ack.success);

    let events = drain(&mut sender_rx);
    assert!(matches!(
        events.as_slice(),
        [
            ServerEvent::ReactionAdded { user_id: 20, .. },
            ServerEvent::ReactionRemoved { user_id: 20, .. }
        ]
    ));
}

#[tokio::test]
async fn malformed_emoji_rejected_with_validation_error() {
    let h = harness(unthrottled());
    let group = h
        .conversations
        .create_group(1, 10, "emoji", &[20])
        .await
        .unwrap();
    let (ctx, _rx) = connect(&h, "c-1", 10);

    let ack = h
        .router
        .dispatch(
            &ctx,
            ClientEvent::SendMessage {
                conversation_id: group.id,
                content: "target".into(),
                parent_message_id: None,
                upload_session_id: None,
            },
        )
        .await
        .unwrap();
    let message_id = ack.data.unwrap()["id"].as_i64().unwrap();

    let ack = h
        .router
        .dispatch(
            &ctx,
            ClientEvent::AddReaction {
                message_id,
                emoji: "not-an-emoji-at-all".into(),
            },
        )
        .await
        .unwrap();

    assert!(!ack.success);
    assert_eq!(ack.error.unwrap().code, "VALIDATION_ERROR");
}
