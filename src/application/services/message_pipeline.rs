//! Message Pipeline
//!
//! Validates, sanitizes and persists messages. Persistence, attachment
//! binding, inbox fan-out and the conversation timestamp bump happen inside
//! the store's single atomic transaction; realtime broadcast is the router's
//! job so a failed broadcast can never roll back a committed write.

use std::sync::Arc;

use crate::application::services::access_control::AccessControl;
use crate::domain::entities::{is_deleted, Message};
use crate::domain::{ChatStore, NewMessage};
use crate::shared::error::ChatError;
use crate::shared::sanitize;
use crate::shared::snowflake::SnowflakeGenerator;

/// Maximum message content length in characters.
pub const MAX_CONTENT_CHARS: usize = 5000;

pub struct MessagePipeline<S: ChatStore> {
    store: Arc<S>,
    access: AccessControl<S>,
    ids: Arc<SnowflakeGenerator>,
}

impl<S: ChatStore> MessagePipeline<S> {
    pub fn new(store: Arc<S>, ids: Arc<SnowflakeGenerator>) -> Self {
        let access = AccessControl::new(store.clone());
        Self { store, access, ids }
    }

    /// Create a message.
    ///
    /// Step order is load-bearing: emptiness, sanitization and length reject
    /// before any storage read; access before parent resolution; everything
    /// that writes runs inside the store transaction.
    pub async fn create_message(
        &self,
        conversation_id: i64,
        sender_id: i64,
        tenant_id: i64,
        content: &str,
        parent_id: Option<i64>,
        upload_session_id: Option<String>,
    ) -> Result<Message, ChatError> {
        let has_attachments = upload_session_id.is_some();

        if content.trim().is_empty() && !has_attachments {
            return Err(ChatError::InvalidInput(
                "Message needs content or attachments".into(),
            ));
        }

        if content.chars().count() > MAX_CONTENT_CHARS {
            return Err(ChatError::InvalidInput(format!(
                "Content exceeds maximum length of {} characters",
                MAX_CONTENT_CHARS
            )));
        }

        let clean_content = if content.trim().is_empty() {
            // Attachment-only message; nothing to sanitize.
            String::new()
        } else {
            // Distinguishes "stripped to nothing" from "was already empty".
            sanitize::sanitize(content).ok_or_else(|| {
                ChatError::InvalidInput("Content is empty after sanitization".into())
            })?
        };

        if !self
            .access
            .can_access(conversation_id, sender_id, tenant_id)
            .await
        {
            return Err(ChatError::Forbidden(
                "Sender is not a participant of this conversation".into(),
            ));
        }

        if let Some(parent_id) = parent_id {
            let parent = self
                .store
                .find_message(parent_id)
                .await?
                .ok_or_else(|| ChatError::NotFound("Parent message not found".into()))?;
            if parent.conversation_id != conversation_id {
                return Err(ChatError::InvalidInput(
                    "Parent message belongs to a different conversation".into(),
                ));
            }
        }

        self.store
            .create_message(NewMessage {
                id: self.ids.generate(),
                conversation_id,
                sender_id,
                content: clean_content,
                parent_id,
                upload_session_id,
            })
            .await
    }

    /// Edit a message. Sender-only; deleted messages cannot be edited. The
    /// previous content is appended to the edit history, so history always
    /// lags the live content by one version.
    pub async fn update_message(
        &self,
        message_id: i64,
        user_id: i64,
        new_content: &str,
    ) -> Result<Message, ChatError> {
        if new_content.chars().count() > MAX_CONTENT_CHARS {
            return Err(ChatError::InvalidInput(format!(
                "Content exceeds maximum length of {} characters",
                MAX_CONTENT_CHARS
            )));
        }
        let clean = sanitize::sanitize(new_content)
            .ok_or_else(|| ChatError::InvalidInput("Content must not be empty".into()))?;

        let message = self
            .store
            .find_message(message_id)
            .await?
            .ok_or_else(|| ChatError::NotFound("Message not found".into()))?;

        if message.sender_id != user_id {
            return Err(ChatError::Forbidden(
                "Only the sender may edit a message".into(),
            ));
        }
        if is_deleted(&message) {
            return Err(ChatError::InvalidOperation(
                "Deleted messages cannot be edited".into(),
            ));
        }

        self.store.update_message_content(message_id, &clean).await
    }

    /// Soft-delete a message. Sender-only; attachments and inbox entries
    /// remain for audit. Re-deleting is a no-op.
    pub async fn delete_message(&self, message_id: i64, user_id: i64) -> Result<(), ChatError> {
        let message = self
            .store
            .find_message(message_id)
            .await?
            .ok_or_else(|| ChatError::NotFound("Message not found".into()))?;

        if message.sender_id != user_id {
            return Err(ChatError::Forbidden(
                "Only the sender may delete a message".into(),
            ));
        }
        if is_deleted(&message) {
            return Ok(());
        }

        self.store.soft_delete_message(message_id, user_id).await
    }

    /// Add a reaction. Idempotent: duplicate `(user, emoji)` pairs no-op.
    pub async fn add_reaction(
        &self,
        message_id: i64,
        user_id: i64,
        tenant_id: i64,
        emoji: &str,
    ) -> Result<Message, ChatError> {
        let message = self.reaction_target(message_id, user_id, tenant_id).await?;
        if is_deleted(&message) {
            return Err(ChatError::InvalidOperation(
                "Cannot react to a deleted message".into(),
            ));
        }
        self.store.add_reaction(message_id, user_id, emoji).await
    }

    /// Remove a reaction. Removing an absent pair is a no-op, not an error.
    pub async fn remove_reaction(
        &self,
        message_id: i64,
        user_id: i64,
        tenant_id: i64,
        emoji: &str,
    ) -> Result<Message, ChatError> {
        self.reaction_target(message_id, user_id, tenant_id).await?;
        self.store.remove_reaction(message_id, user_id, emoji).await
    }

    async fn reaction_target(
        &self,
        message_id: i64,
        user_id: i64,
        tenant_id: i64,
    ) -> Result<Message, ChatError> {
        let message = self
            .store
            .find_message(message_id)
            .await?
            .ok_or_else(|| ChatError::NotFound("Message not found".into()))?;

        if !self
            .access
            .can_access(message.conversation_id, user_id, tenant_id)
            .await
        {
            return Err(ChatError::AccessDenied(
                "Not a participant of this conversation".into(),
            ));
        }
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::services::conversation_service::ConversationService;
    use crate::domain::entities::{find_reaction, MessageStatus};
    use crate::infrastructure::memory::MemoryChatStore;
    use pretty_assertions::assert_eq;

    const TENANT: i64 = 1;

    struct Fixture {
        store: Arc<MemoryChatStore>,
        pipeline: MessagePipeline<MemoryChatStore>,
        conversations: ConversationService<MemoryChatStore>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryChatStore::new());
        let ids = Arc::new(SnowflakeGenerator::new(3, 0));
        Fixture {
            store: store.clone(),
            pipeline: MessagePipeline::new(store.clone(), ids.clone()),
            conversations: ConversationService::new(store, ids),
        }
    }

    #[tokio::test]
    async fn creates_message_with_fanout_excluding_sender() {
        let f = fixture();
        let conv = f
            .conversations
            .create_group(TENANT, 1, "team", &[2, 3, 4])
            .await
            .unwrap();

        let msg = f
            .pipeline
            .create_message(conv.id, 1, TENANT, "hello", None, None)
            .await
            .unwrap();

        assert_eq!(msg.status, MessageStatus::Sent);
        assert_eq!(msg.content, "hello");

        let entries = f.store.find_inbox_entries(msg.id).await.unwrap();
        assert_eq!(entries.len(), 3); // participants - 1
        assert!(entries.iter().all(|e| e.recipient_id != 1));

        let conv = f.store.find_conversation(conv.id).await.unwrap().unwrap();
        assert!(conv.last_message_at.is_some());
    }

    #[tokio::test]
    async fn retried_fanout_for_same_message_id_adds_no_duplicate_entries() {
        let f = fixture();
        let conv = f
            .conversations
            .create_group(TENANT, 1, "team", &[2, 3])
            .await
            .unwrap();

        let new = NewMessage {
            id: 4242,
            conversation_id: conv.id,
            sender_id: 1,
            content: "retry".into(),
            parent_id: None,
            upload_session_id: None,
        };
        f.store.create_message(new.clone()).await.unwrap();
        // A delivery retry replays the same pre-generated id.
        f.store.create_message(new).await.unwrap();

        let entries = f.store.find_inbox_entries(4242).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.recipient_id != 1));
    }

    #[tokio::test]
    async fn empty_content_without_attachments_is_rejected() {
        let f = fixture();
        let conv = f
            .conversations
            .create_or_get_direct(TENANT, 1, 2)
            .await
            .unwrap();
        let err = f
            .pipeline
            .create_message(conv.id, 1, TENANT, "   ", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn content_stripped_to_nothing_is_rejected() {
        let f = fixture();
        let conv = f
            .conversations
            .create_or_get_direct(TENANT, 1, 2)
            .await
            .unwrap();
        let err = f
            .pipeline
            .create_message(conv.id, 1, TENANT, "\u{1}\u{2}", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn content_boundary_5000_accepted_5001_rejected() {
        let f = fixture();
        let conv = f
            .conversations
            .create_or_get_direct(TENANT, 1, 2)
            .await
            .unwrap();

        let ok = "a".repeat(MAX_CONTENT_CHARS);
        f.pipeline
            .create_message(conv.id, 1, TENANT, &ok, None, None)
            .await
            .unwrap();

        let too_long = "a".repeat(MAX_CONTENT_CHARS + 1);
        let err = f
            .pipeline
            .create_message(conv.id, 1, TENANT, &too_long, None, None)
            .await
            .unwrap_err();
        match err {
            ChatError::InvalidInput(msg) => assert!(msg.contains("5000")),
            other => panic!("expected InvalidInput, got {other:?}"),
        }
        // No row was persisted for the rejected send.
        assert_eq!(f.store.message_count(), 1);
    }

    #[tokio::test]
    async fn non_participant_sender_is_forbidden() {
        let f = fixture();
        let conv = f
            .conversations
            .create_or_get_direct(TENANT, 1, 2)
            .await
            .unwrap();
        let err = f
            .pipeline
            .create_message(conv.id, 9, TENANT, "hi", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Forbidden(_)));
        assert_eq!(f.store.message_count(), 0);
    }

    #[tokio::test]
    async fn cross_conversation_parent_is_rejected_with_no_row() {
        let f = fixture();
        let conv_a = f
            .conversations
            .create_or_get_direct(TENANT, 1, 2)
            .await
            .unwrap();
        let conv_b = f
            .conversations
            .create_or_get_direct(TENANT, 1, 3)
            .await
            .unwrap();

        let parent = f
            .pipeline
            .create_message(conv_a.id, 1, TENANT, "root", None, None)
            .await
            .unwrap();

        let err = f
            .pipeline
            .create_message(conv_b.id, 1, TENANT, "reply", Some(parent.id), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::InvalidInput(_)));
        assert_eq!(f.store.message_count(), 1);
    }

    #[tokio::test]
    async fn missing_parent_is_not_found() {
        let f = fixture();
        let conv = f
            .conversations
            .create_or_get_direct(TENANT, 1, 2)
            .await
            .unwrap();
        let err = f
            .pipeline
            .create_message(conv.id, 1, TENANT, "reply", Some(424242), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
    }

    #[tokio::test]
    async fn same_conversation_reply_links_parent() {
        let f = fixture();
        let conv = f
            .conversations
            .create_or_get_direct(TENANT, 1, 2)
            .await
            .unwrap();
        let parent = f
            .pipeline
            .create_message(conv.id, 1, TENANT, "root", None, None)
            .await
            .unwrap();
        let reply = f
            .pipeline
            .create_message(conv.id, 2, TENANT, "reply", Some(parent.id), None)
            .await
            .unwrap();
        assert_eq!(reply.parent_id, Some(parent.id));
    }

    #[tokio::test]
    async fn edit_appends_previous_content_and_lags_by_one() {
        let f = fixture();
        let conv = f
            .conversations
            .create_or_get_direct(TENANT, 1, 2)
            .await
            .unwrap();
        let msg = f
            .pipeline
            .create_message(conv.id, 1, TENANT, "v1", None, None)
            .await
            .unwrap();

        let v2 = f.pipeline.update_message(msg.id, 1, "v2").await.unwrap();
        assert_eq!(v2.content, "v2");
        assert!(v2.is_edited);
        assert_eq!(v2.edit_history.len(), 1);
        assert_eq!(v2.edit_history[0].content, "v1");

        let v3 = f.pipeline.update_message(msg.id, 1, "v3").await.unwrap();
        assert_eq!(v3.edit_history.len(), 2);
        assert_eq!(v3.edit_history[1].content, "v2");
    }

    #[tokio::test]
    async fn only_sender_may_edit_or_delete() {
        let f = fixture();
        let conv = f
            .conversations
            .create_or_get_direct(TENANT, 1, 2)
            .await
            .unwrap();
        let msg = f
            .pipeline
            .create_message(conv.id, 1, TENANT, "mine", None, None)
            .await
            .unwrap();

        let err = f.pipeline.update_message(msg.id, 2, "hax").await.unwrap_err();
        assert!(matches!(err, ChatError::Forbidden(_)));
        let err = f.pipeline.delete_message(msg.id, 2).await.unwrap_err();
        assert!(matches!(err, ChatError::Forbidden(_)));
    }

    #[tokio::test]
    async fn deleted_message_cannot_be_edited() {
        let f = fixture();
        let conv = f
            .conversations
            .create_or_get_direct(TENANT, 1, 2)
            .await
            .unwrap();
        let msg = f
            .pipeline
            .create_message(conv.id, 1, TENANT, "bye", None, None)
            .await
            .unwrap();

        f.pipeline.delete_message(msg.id, 1).await.unwrap();
        let err = f.pipeline.update_message(msg.id, 1, "zombie").await.unwrap_err();
        assert!(matches!(err, ChatError::InvalidOperation(_)));

        // Soft delete keeps the inbox entries for audit.
        assert_eq!(f.store.find_inbox_entries(msg.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reactions_are_idempotent_both_ways() {
        let f = fixture();
        let conv = f
            .conversations
            .create_or_get_direct(TENANT, 1, 2)
            .await
            .unwrap();
        let msg = f
            .pipeline
            .create_message(conv.id, 1, TENANT, "react to me", None, None)
            .await
            .unwrap();

        f.pipeline.add_reaction(msg.id, 2, TENANT, "👍").await.unwrap();
        let after_dup = f
            .pipeline
            .add_reaction(msg.id, 2, TENANT, "👍")
            .await
            .unwrap();
        assert_eq!(
            after_dup
                .reactions
                .iter()
                .filter(|r| r.user_id == 2 && r.emoji == "👍")
                .count(),
            1
        );

        let after_remove = f
            .pipeline
            .remove_reaction(msg.id, 2, TENANT, "👍")
            .await
            .unwrap();
        assert_eq!(find_reaction(&after_remove, 2, "👍"), None);

        // Removing again is a no-op, not an error.
        f.pipeline
            .remove_reaction(msg.id, 2, TENANT, "👍")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn attachment_session_with_no_eligible_files_rolls_back() {
        let f = fixture();
        let conv = f
            .conversations
            .create_or_get_direct(TENANT, 1, 2)
            .await
            .unwrap();

        let err = f
            .pipeline
            .create_message(conv.id, 1, TENANT, "", None, Some("session-x".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::InvalidInput(_)));
        assert_eq!(f.store.message_count(), 0);
    }

    #[tokio::test]
    async fn completed_attachments_are_bound_and_session_cleared() {
        let f = fixture();
        let conv = f
            .conversations
            .create_or_get_direct(TENANT, 1, 2)
            .await
            .unwrap();

        f.store.seed_attachment(conv.id, 1, "sess-1", "photo.png", true);
        f.store.seed_attachment(conv.id, 1, "sess-1", "pending.png", false);

        let msg = f
            .pipeline
            .create_message(conv.id, 1, TENANT, "", None, Some("sess-1".into()))
            .await
            .unwrap();

        assert_eq!(msg.attachments.len(), 1);
        assert_eq!(msg.attachments[0].message_id, Some(msg.id));
        assert_eq!(msg.attachments[0].upload_session_id, None);
    }
}
