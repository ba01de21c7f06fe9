//! Read/Unread Tracker
//!
//! Per-user read cursors and unread counters. The authoritative count is
//! recomputed from the store on demand; the conversation's cached snapshot
//! is refreshed best-effort and never trusted.

use std::sync::Arc;

use chrono::Utc;

use crate::application::services::access_control::AccessControl;
use crate::domain::ChatStore;
use crate::shared::error::ChatError;

pub struct ReadTracker<S: ChatStore> {
    store: Arc<S>,
    access: AccessControl<S>,
}

impl<S: ChatStore> ReadTracker<S> {
    pub fn new(store: Arc<S>) -> Self {
        let access = AccessControl::new(store.clone());
        Self { store, access }
    }

    /// Mark a message read for a user. Idempotent: marking twice is a no-op
    /// on the second call, not an error.
    ///
    /// Returns the conversation id for broadcast routing.
    pub async fn mark_read(
        &self,
        message_id: i64,
        user_id: i64,
        tenant_id: i64,
    ) -> Result<i64, ChatError> {
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

        self.store.mark_read(message_id, user_id).await?;

        // Advisory snapshot refresh; failures are logged, never surfaced.
        self.refresh_snapshot(message.conversation_id, user_id, message_id)
            .await;

        Ok(message.conversation_id)
    }

    /// Recompute the unread count for a user in a conversation.
    pub async fn unread_count(
        &self,
        conversation_id: i64,
        user_id: i64,
    ) -> Result<i64, ChatError> {
        self.store.unread_count(conversation_id, user_id).await
    }

    async fn refresh_snapshot(&self, conversation_id: i64, user_id: i64, message_id: i64) {
        if let Err(e) = self
            .store
            .set_last_read(conversation_id, user_id, message_id, Utc::now())
            .await
        {
            tracing::warn!(conversation_id, user_id, error = %e, "Read cursor snapshot update failed");
        }
        match self.store.unread_count(conversation_id, user_id).await {
            Ok(count) => {
                if let Err(e) = self
                    .store
                    .update_unread_snapshot(conversation_id, user_id, count)
                    .await
                {
                    tracing::warn!(conversation_id, user_id, error = %e, "Unread snapshot update failed");
                }
            }
            Err(e) => {
                tracing::warn!(conversation_id, user_id, error = %e, "Unread recount failed");
            }
        }
    }
}
