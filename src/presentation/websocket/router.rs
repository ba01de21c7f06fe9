//! Realtime Event Router
//!
//! Dispatches inbound client events: throttle check, delegation to the
//! application services, broadcast of the resulting outbound event. Every
//! handler resolves to the uniform acknowledgement envelope; nothing
//! propagates past `dispatch` in a way that could tear down a connection.

use std::sync::Arc;
use std::time::Duration;

use super::events::{
    conversation_room, ClientEvent, EventAck, MessageView, ParticipantAction, ServerEvent,
};
use super::registry::ConnectionRegistry;
use super::throttle::{ThrottleMap, ThrottleSettings};
use crate::application::{
    AccessControl, ConversationService, MessagePipeline, ReadTracker,
};
use crate::domain::ChatStore;
use crate::infrastructure::metrics::{
    EVENTS_REJECTED_TOTAL, FANOUT_RECIPIENTS, MESSAGES_CREATED_TOTAL,
};
use crate::shared::error::ChatError;
use crate::shared::sanitize::is_valid_emoji;
use crate::shared::snowflake::SnowflakeGenerator;

/// Identity of the connection an event arrived on.
#[derive(Debug, Clone)]
pub struct EventContext {
    pub connection_id: String,
    pub user_id: i64,
    pub tenant_id: i64,
}

pub struct EventRouter<S: ChatStore> {
    store: Arc<S>,
    registry: Arc<ConnectionRegistry>,
    access: AccessControl<S>,
    pipeline: MessagePipeline<S>,
    conversations: ConversationService<S>,
    tracker: ReadTracker<S>,
    throttle: ThrottleMap,
    settings: ThrottleSettings,
}

impl<S: ChatStore> EventRouter<S> {
    pub fn new(
        store: Arc<S>,
        registry: Arc<ConnectionRegistry>,
        ids: Arc<SnowflakeGenerator>,
        settings: ThrottleSettings,
    ) -> Self {
        Self {
            access: AccessControl::new(store.clone()),
            pipeline: MessagePipeline::new(store.clone(), ids.clone()),
            conversations: ConversationService::new(store.clone(), ids),
            tracker: ReadTracker::new(store.clone()),
            registry,
            store,
            throttle: ThrottleMap::new(),
            settings,
        }
    }

    pub fn throttle(&self) -> &ThrottleMap {
        &self.throttle
    }

    pub fn throttle_settings(&self) -> &ThrottleSettings {
        &self.settings
    }

    /// Route one inbound event to its handler.
    ///
    /// `None` means the event was silently dropped by a throttle (typing,
    /// read receipts); every other outcome produces an acknowledgement.
    pub async fn dispatch(&self, ctx: &EventContext, event: ClientEvent) -> Option<EventAck> {
        let name = event.name();
        let result = self.handle(ctx, event).await;
        match result {
            Ok(Handled::Ack(data)) => Some(EventAck::ok(data)),
            Ok(Handled::Dropped) => {
                tracing::debug!(user_id = ctx.user_id, event = name, "Event throttled, dropped");
                None
            }
            Err(e) => {
                let code = e.error_code().as_str();
                EVENTS_REJECTED_TOTAL.with_label_values(&[code]).inc();
                if matches!(e, ChatError::Database(_) | ChatError::Internal(_)) {
                    tracing::error!(user_id = ctx.user_id, event = name, error = %e, "Event failed");
                } else {
                    tracing::debug!(user_id = ctx.user_id, event = name, error = %e, "Event rejected");
                }
                Some(EventAck::err(&e))
            }
        }
    }

    async fn handle(
        &self,
        ctx: &EventContext,
        event: ClientEvent,
    ) -> Result<Handled, ChatError> {
        match event {
            ClientEvent::SendMessage {
                conversation_id,
                content,
                parent_message_id,
                upload_session_id,
            } => {
                self.send_message(
                    ctx,
                    conversation_id,
                    &content,
                    parent_message_id,
                    upload_session_id,
                )
                .await
            }
            ClientEvent::UpdateMessage {
                message_id,
                content,
            } => {
                let message = self
                    .pipeline
                    .update_message(message_id, ctx.user_id, &content)
                    .await?;
                let view = MessageView::from(&message);
                self.registry.broadcast(
                    &conversation_room(message.conversation_id),
                    &ServerEvent::MessageUpdated {
                        message: view.clone(),
                    },
                );
                Ok(Handled::Ack(Some(view_json(view)?)))
            }
            ClientEvent::DeleteMessage { message_id } => {
                let message = self
                    .store
                    .find_message(message_id)
                    .await?
                    .ok_or_else(|| ChatError::NotFound("Message not found".into()))?;
                self.pipeline.delete_message(message_id, ctx.user_id).await?;
                self.registry.broadcast(
                    &conversation_room(message.conversation_id),
                    &ServerEvent::MessageDeleted {
                        conversation_id: message.conversation_id,
                        message_id,
                        deleted_by: ctx.user_id,
                    },
                );
                Ok(Handled::Ack(None))
            }
            ClientEvent::JoinConversation { conversation_id } => {
                self.join_conversation(ctx, conversation_id).await
            }
            ClientEvent::LeaveConversation { conversation_id } => {
                self.registry
                    .leave_room(&ctx.connection_id, &conversation_room(conversation_id));
                Ok(Handled::Ack(None))
            }
            ClientEvent::Typing { conversation_id } => {
                self.typing(ctx, conversation_id, true)
            }
            ClientEvent::StopTyping { conversation_id } => {
                self.typing(ctx, conversation_id, false)
            }
            ClientEvent::MarkAsRead { message_id } => self.mark_as_read(ctx, message_id).await,
            ClientEvent::AddReaction { message_id, emoji } => {
                self.reaction(ctx, message_id, &emoji, true).await
            }
            ClientEvent::RemoveReaction { message_id, emoji } => {
                self.reaction(ctx, message_id, &emoji, false).await
            }
            ClientEvent::AddParticipant {
                conversation_id,
                user_ids,
            } => {
                self.mutate_participants(ctx, conversation_id, user_ids, ParticipantAction::Added)
                    .await
            }
            ClientEvent::RemoveParticipant {
                conversation_id,
                user_ids,
            } => {
                self.mutate_participants(ctx, conversation_id, user_ids, ParticipantAction::Removed)
                    .await
            }
        }
    }

    async fn send_message(
        &self,
        ctx: &EventContext,
        conversation_id: i64,
        content: &str,
        parent_message_id: Option<i64>,
        upload_session_id: Option<String>,
    ) -> Result<Handled, ChatError> {
        let key = format!("send-message:{}:{}", ctx.user_id, conversation_id);
        if !self
            .throttle
            .check(&key, Duration::from_millis(self.settings.send_message_ms))
        {
            return Err(ChatError::RateLimited);
        }

        let message = self
            .pipeline
            .create_message(
                conversation_id,
                ctx.user_id,
                ctx.tenant_id,
                content,
                parent_message_id,
                upload_session_id,
            )
            .await?;

        MESSAGES_CREATED_TOTAL.inc();
        match self.store.find_inbox_entries(message.id).await {
            Ok(entries) => FANOUT_RECIPIENTS.observe(entries.len() as f64),
            Err(e) => tracing::warn!(message_id = message.id, error = %e, "Fan-out width unavailable"),
        }

        let view = MessageView::from(&message);
        self.registry.broadcast(
            &conversation_room(conversation_id),
            &ServerEvent::MessageCreated {
                message: view.clone(),
            },
        );
        Ok(Handled::Ack(Some(view_json(view)?)))
    }

    async fn join_conversation(
        &self,
        ctx: &EventContext,
        conversation_id: i64,
    ) -> Result<Handled, ChatError> {
        if !self
            .access
            .can_access(conversation_id, ctx.user_id, ctx.tenant_id)
            .await
        {
            return Err(ChatError::AccessDenied(
                "Not a participant of this conversation".into(),
            ));
        }

        self.registry
            .join_room(&ctx.connection_id, &conversation_room(conversation_id));

        // Best-effort activity marker; failure never fails the join.
        if let Err(e) = self
            .store
            .touch_last_active(conversation_id, ctx.user_id)
            .await
        {
            tracing::warn!(
                conversation_id,
                user_id = ctx.user_id,
                error = %e,
                "Failed to update last_active_at"
            );
        }

        Ok(Handled::Ack(None))
    }

    fn typing(
        &self,
        ctx: &EventContext,
        conversation_id: i64,
        started: bool,
    ) -> Result<Handled, ChatError> {
        let kind = if started { "typing" } else { "stop-typing" };
        let key = format!("{kind}:{}:{}", ctx.user_id, conversation_id);
        if !self
            .throttle
            .check(&key, Duration::from_millis(self.settings.typing_ms))
        {
            return Ok(Handled::Dropped);
        }

        let event = if started {
            ServerEvent::UserTyping {
                conversation_id,
                user_id: ctx.user_id,
            }
        } else {
            ServerEvent::UserStoppedTyping {
                conversation_id,
                user_id: ctx.user_id,
            }
        };
        self.registry
            .broadcast(&conversation_room(conversation_id), &event);
        Ok(Handled::Ack(None))
    }

    async fn mark_as_read(
        &self,
        ctx: &EventContext,
        message_id: i64,
    ) -> Result<Handled, ChatError> {
        let key = format!("mark-as-read:{}", ctx.user_id);
        if !self
            .throttle
            .check(&key, Duration::from_millis(self.settings.read_receipt_ms))
        {
            return Ok(Handled::Dropped);
        }

        let conversation_id = self
            .tracker
            .mark_read(message_id, ctx.user_id, ctx.tenant_id)
            .await?;
        self.registry.broadcast(
            &conversation_room(conversation_id),
            &ServerEvent::MessageRead {
                conversation_id,
                message_id,
                user_id: ctx.user_id,
                read_at: chrono::Utc::now(),
            },
        );
        Ok(Handled::Ack(None))
    }

    async fn reaction(
        &self,
        ctx: &EventContext,
        message_id: i64,
        emoji: &str,
        adding: bool,
    ) -> Result<Handled, ChatError> {
        if !is_valid_emoji(emoji) {
            return Err(ChatError::InvalidInput("Invalid emoji".into()));
        }

        let message = if adding {
            self.pipeline
                .add_reaction(message_id, ctx.user_id, ctx.tenant_id, emoji)
                .await?
        } else {
            self.pipeline
                .remove_reaction(message_id, ctx.user_id, ctx.tenant_id, emoji)
                .await?
        };

        let event = if adding {
            ServerEvent::ReactionAdded {
                conversation_id: message.conversation_id,
                message_id,
                user_id: ctx.user_id,
                emoji: emoji.to_string(),
            }
        } else {
            ServerEvent::ReactionRemoved {
                conversation_id: message.conversation_id,
                message_id,
                user_id: ctx.user_id,
                emoji: emoji.to_string(),
            }
        };
        self.registry
            .broadcast(&conversation_room(message.conversation_id), &event);
        Ok(Handled::Ack(None))
    }

    async fn mutate_participants(
        &self,
        ctx: &EventContext,
        conversation_id: i64,
        user_ids: Vec<i64>,
        action: ParticipantAction,
    ) -> Result<Handled, ChatError> {
        if user_ids.is_empty() {
            return Err(ChatError::InvalidInput(
                "Participant id list must not be empty".into(),
            ));
        }

        match action {
            ParticipantAction::Added => {
                self.conversations
                    .add_participants(conversation_id, ctx.user_id, ctx.tenant_id, &user_ids)
                    .await?
            }
            ParticipantAction::Removed => {
                self.conversations
                    .remove_participants(conversation_id, ctx.user_id, ctx.tenant_id, &user_ids)
                    .await?
            }
        }

        let room = conversation_room(conversation_id);
        self.registry.broadcast(
            &room,
            &ServerEvent::ParticipantsUpdated {
                conversation_id,
                action,
                user_ids: user_ids.clone(),
            },
        );

        // Live connections of affected users follow the membership change.
        for user_id in &user_ids {
            match action {
                ParticipantAction::Added => self.registry.force_join_user(*user_id, &room),
                ParticipantAction::Removed => self.registry.force_leave_user(*user_id, &room),
            }
        }

        Ok(Handled::Ack(None))
    }
}

enum Handled {
    Ack(Option<serde_json::Value>),
    Dropped,
}

fn view_json(view: MessageView) -> Result<serde_json::Value, ChatError> {
    serde_json::to_value(view).map_err(|e| ChatError::Internal(e.to_string()))
}
