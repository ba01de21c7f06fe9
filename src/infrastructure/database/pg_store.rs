//! PostgreSQL Chat Store
//!
//! sqlx implementation of the persistence port. The message-creation path
//! runs inside one transaction: row insert, attachment binding, inbox
//! fan-out and the conversation timestamp bump commit together or roll back
//! together.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};

use crate::domain::entities::{
    direct_key, Attachment, AttachmentStatus, Conversation, ConversationKind, EditRecord,
    InboxEntry, Message, MessageKind, MessageStatus, Participant, ParticipantRole,
    ParticipantStatus, Reaction, ReadCursor,
};
use crate::domain::{ChatStore, NewMessage, NewParticipant};
use crate::shared::error::ChatError;

/// PostgreSQL unique-violation SQLSTATE.
const UNIQUE_VIOLATION: &str = "23505";

pub struct PgChatStore {
    pool: PgPool,
}

impl PgChatStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_insert_error(e: sqlx::Error) -> ChatError {
    if let sqlx::Error::Database(db) = &e {
        if db.code().as_deref() == Some(UNIQUE_VIOLATION) {
            return ChatError::Conflict(db.message().to_string());
        }
    }
    ChatError::Database(e)
}

const CONVERSATION_COLUMNS: &str = "id, tenant_id, kind::text AS kind, name, is_private, \
     metadata, last_message_at, last_read, unread_counts, deleted_at, created_at";

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, content, kind::text AS kind, \
     status::text AS status, parent_id, reactions, edit_history, read_by, is_edited, \
     deleted_at, deleted_by, created_at";

const ATTACHMENT_COLUMNS: &str = "id, message_id, conversation_id, uploader_id, \
     upload_session_id, file_key, mime_type, status::text AS status, upload_verified, created_at";

const PARTICIPANT_COLUMNS: &str = "id, conversation_id, user_id, role::text AS role, \
     status::text AS status, last_active_at, muted, pinned, notifications_enabled, joined_at";

#[derive(Debug, sqlx::FromRow)]
struct ConversationRow {
    id: i64,
    tenant_id: i64,
    kind: String,
    name: Option<String>,
    is_private: bool,
    metadata: Json<serde_json::Value>,
    last_message_at: Option<DateTime<Utc>>,
    last_read: Json<HashMap<i64, ReadCursor>>,
    unread_counts: Json<HashMap<i64, i64>>,
    deleted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl ConversationRow {
    fn into_conversation(self) -> Conversation {
        Conversation {
            id: self.id,
            tenant_id: self.tenant_id,
            kind: ConversationKind::from_str(&self.kind),
            name: self.name,
            is_private: self.is_private,
            metadata: self.metadata.0,
            last_message_at: self.last_message_at,
            last_read: self.last_read.0,
            unread_counts: self.unread_counts.0,
            deleted_at: self.deleted_at,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ParticipantRow {
    id: i64,
    conversation_id: i64,
    user_id: i64,
    role: String,
    status: String,
    last_active_at: Option<DateTime<Utc>>,
    muted: bool,
    pinned: bool,
    notifications_enabled: bool,
    joined_at: DateTime<Utc>,
}

impl ParticipantRow {
    fn into_participant(self) -> Participant {
        Participant {
            id: self.id,
            conversation_id: self.conversation_id,
            user_id: self.user_id,
            role: ParticipantRole::from_str(&self.role),
            status: ParticipantStatus::from_str(&self.status),
            last_active_at: self.last_active_at,
            muted: self.muted,
            pinned: self.pinned,
            notifications_enabled: self.notifications_enabled,
            joined_at: self.joined_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    id: i64,
    conversation_id: i64,
    sender_id: i64,
    content: String,
    kind: String,
    status: String,
    parent_id: Option<i64>,
    reactions: Json<Vec<Reaction>>,
    edit_history: Json<Vec<EditRecord>>,
    read_by: Json<HashMap<i64, DateTime<Utc>>>,
    is_edited: bool,
    deleted_at: Option<DateTime<Utc>>,
    deleted_by: Option<i64>,
    created_at: DateTime<Utc>,
}

impl MessageRow {
    fn into_message(self) -> Message {
        Message {
            id: self.id,
            conversation_id: self.conversation_id,
            sender_id: self.sender_id,
            content: self.content,
            kind: MessageKind::from_str(&self.kind),
            status: MessageStatus::from_str(&self.status),
            parent_id: self.parent_id,
            reactions: self.reactions.0,
            edit_history: self.edit_history.0,
            read_by: self.read_by.0,
            is_edited: self.is_edited,
            deleted_at: self.deleted_at,
            deleted_by: self.deleted_by,
            created_at: self.created_at,
            attachments: Vec::new(),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AttachmentRow {
    id: i64,
    message_id: Option<i64>,
    conversation_id: i64,
    uploader_id: i64,
    upload_session_id: Option<String>,
    file_key: String,
    mime_type: String,
    status: String,
    upload_verified: bool,
    created_at: DateTime<Utc>,
}

impl AttachmentRow {
    fn into_attachment(self) -> Attachment {
        Attachment {
            id: self.id,
            message_id: self.message_id,
            conversation_id: self.conversation_id,
            uploader_id: self.uploader_id,
            upload_session_id: self.upload_session_id,
            file_key: self.file_key,
            mime_type: self.mime_type,
            status: AttachmentStatus::from_str(&self.status),
            upload_verified: self.upload_verified,
            created_at: self.created_at,
        }
    }
}

impl PgChatStore {
    async fn load_attachments(&self, message_id: i64) -> Result<Vec<Attachment>, ChatError> {
        let rows = sqlx::query_as::<_, AttachmentRow>(&format!(
            "SELECT {ATTACHMENT_COLUMNS} FROM attachments WHERE message_id = $1 ORDER BY id"
        ))
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.into_attachment()).collect())
    }

    async fn insert_participant_tx(
        tx: &mut Transaction<'static, Postgres>,
        conversation_id: i64,
        p: &NewParticipant,
    ) -> Result<(), ChatError> {
        sqlx::query(
            r#"
            INSERT INTO participants (id, conversation_id, user_id, role, status)
            VALUES ($1, $2, $3, $4::participant_role, $5::participant_status)
            ON CONFLICT (user_id, conversation_id)
            DO UPDATE SET status = EXCLUDED.status
            "#,
        )
        .bind(p.id)
        .bind(conversation_id)
        .bind(p.user_id)
        .bind(p.role.as_str())
        .bind(p.status.as_str())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ChatStore for PgChatStore {
    async fn find_conversation(&self, id: i64) -> Result<Option<Conversation>, ChatError> {
        let row = sqlx::query_as::<_, ConversationRow>(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.into_conversation()))
    }

    async fn find_direct_conversation(
        &self,
        user_a: i64,
        user_b: i64,
        tenant_id: i64,
    ) -> Result<Option<Conversation>, ChatError> {
        let row = sqlx::query_as::<_, ConversationRow>(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations \
             WHERE tenant_id = $1 AND direct_key = $2"
        ))
        .bind(tenant_id)
        .bind(direct_key(user_a, user_b))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.into_conversation()))
    }

    async fn create_conversation(
        &self,
        conversation: &Conversation,
        participants: &[NewParticipant],
    ) -> Result<Conversation, ChatError> {
        let key = if conversation.kind == ConversationKind::Direct {
            let users: Vec<i64> = participants.iter().map(|p| p.user_id).collect();
            if users.len() != 2 {
                return Err(ChatError::InvalidInput(
                    "Direct conversations take exactly two participants".into(),
                ));
            }
            Some(direct_key(users[0], users[1]))
        } else {
            None
        };

        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, ConversationRow>(&format!(
            "INSERT INTO conversations \
                 (id, tenant_id, kind, name, is_private, metadata, direct_key, created_at) \
             VALUES ($1, $2, $3::conversation_kind, $4, $5, $6, $7, $8) \
             RETURNING {CONVERSATION_COLUMNS}"
        ))
        .bind(conversation.id)
        .bind(conversation.tenant_id)
        .bind(conversation.kind.as_str())
        .bind(&conversation.name)
        .bind(conversation.is_private)
        .bind(Json(&conversation.metadata))
        .bind(key)
        .bind(conversation.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_insert_error)?;

        for p in participants {
            Self::insert_participant_tx(&mut tx, conversation.id, p).await?;
        }

        tx.commit().await?;
        Ok(row.into_conversation())
    }

    async fn rename_conversation(&self, id: i64, name: &str) -> Result<(), ChatError> {
        let result = sqlx::query("UPDATE conversations SET name = $2 WHERE id = $1")
            .bind(id)
            .bind(name)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ChatError::NotFound("Conversation not found".into()));
        }
        Ok(())
    }

    async fn set_conversation_privacy(&self, id: i64, is_private: bool) -> Result<(), ChatError> {
        let result = sqlx::query("UPDATE conversations SET is_private = $2 WHERE id = $1")
            .bind(id)
            .bind(is_private)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ChatError::NotFound("Conversation not found".into()));
        }
        Ok(())
    }

    async fn conversation_ids_for_user(&self, user_id: i64) -> Result<Vec<i64>, ChatError> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT conversation_id FROM participants WHERE user_id = $1 AND status = 'member'",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn set_last_read(
        &self,
        conversation_id: i64,
        user_id: i64,
        message_id: i64,
        timestamp: DateTime<Utc>,
    ) -> Result<(), ChatError> {
        sqlx::query(
            r#"
            UPDATE conversations
            SET last_read = jsonb_set(
                last_read,
                ARRAY[$2::text],
                jsonb_build_object('message_id', $3::bigint, 'timestamp', to_jsonb($4::timestamptz))
            )
            WHERE id = $1
            "#,
        )
        .bind(conversation_id)
        .bind(user_id.to_string())
        .bind(message_id)
        .bind(timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_unread_snapshot(
        &self,
        conversation_id: i64,
        user_id: i64,
        count: i64,
    ) -> Result<(), ChatError> {
        sqlx::query(
            r#"
            UPDATE conversations
            SET unread_counts = jsonb_set(unread_counts, ARRAY[$2::text], to_jsonb($3::bigint))
            WHERE id = $1
            "#,
        )
        .bind(conversation_id)
        .bind(user_id.to_string())
        .bind(count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_participant(
        &self,
        conversation_id: i64,
        user_id: i64,
    ) -> Result<Option<Participant>, ChatError> {
        let row = sqlx::query_as::<_, ParticipantRow>(&format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM participants \
             WHERE conversation_id = $1 AND user_id = $2"
        ))
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.into_participant()))
    }

    async fn find_participants(
        &self,
        conversation_id: i64,
    ) -> Result<Vec<Participant>, ChatError> {
        let rows = sqlx::query_as::<_, ParticipantRow>(&format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM participants \
             WHERE conversation_id = $1 ORDER BY joined_at"
        ))
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.into_participant()).collect())
    }

    async fn add_participants(
        &self,
        conversation_id: i64,
        participants: &[NewParticipant],
    ) -> Result<(), ChatError> {
        let mut tx = self.pool.begin().await?;
        for p in participants {
            Self::insert_participant_tx(&mut tx, conversation_id, p).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn set_participant_status(
        &self,
        conversation_id: i64,
        user_id: i64,
        status: ParticipantStatus,
    ) -> Result<(), ChatError> {
        let result = sqlx::query(
            "UPDATE participants SET status = $3::participant_status \
             WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(ChatError::NotFound("Participant not found".into()));
        }
        Ok(())
    }

    async fn touch_last_active(
        &self,
        conversation_id: i64,
        user_id: i64,
    ) -> Result<(), ChatError> {
        let result = sqlx::query(
            "UPDATE participants SET last_active_at = NOW() \
             WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(conversation_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(ChatError::NotFound("Participant not found".into()));
        }
        Ok(())
    }

    async fn find_message(&self, id: i64) -> Result<Option<Message>, ChatError> {
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let mut message = row.into_message();
                message.attachments = self.load_attachments(message.id).await?;
                Ok(Some(message))
            }
            None => Ok(None),
        }
    }

    async fn create_message(&self, new_message: NewMessage) -> Result<Message, ChatError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "INSERT INTO messages (id, conversation_id, sender_id, content, parent_id, status) \
             VALUES ($1, $2, $3, $4, $5, 'sent') \
             RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(new_message.id)
        .bind(new_message.conversation_id)
        .bind(new_message.sender_id)
        .bind(&new_message.content)
        .bind(new_message.parent_id)
        .fetch_one(&mut *tx)
        .await?;

        let mut attachments = Vec::new();
        if let Some(session) = &new_message.upload_session_id {
            let bound = sqlx::query_as::<_, AttachmentRow>(&format!(
                "UPDATE attachments \
                 SET message_id = $1, upload_session_id = NULL \
                 WHERE upload_session_id = $2 AND uploader_id = $3 AND conversation_id = $4 \
                   AND status = 'completed' AND upload_verified AND message_id IS NULL \
                 RETURNING {ATTACHMENT_COLUMNS}"
            ))
            .bind(new_message.id)
            .bind(session)
            .bind(new_message.sender_id)
            .bind(new_message.conversation_id)
            .fetch_all(&mut *tx)
            .await?;

            if bound.is_empty() {
                // Dropping the transaction rolls back the message insert.
                return Err(ChatError::InvalidInput(
                    "No completed attachments found for upload session".into(),
                ));
            }
            attachments = bound.into_iter().map(|r| r.into_attachment()).collect();
        }

        // Fan-out excluding the sender; ON CONFLICT makes retries idempotent.
        sqlx::query(
            r#"
            INSERT INTO inbox_entries (recipient_id, message_id, conversation_id)
            SELECT user_id, $1, $2
            FROM participants
            WHERE conversation_id = $2 AND status = 'member' AND user_id <> $3
            ON CONFLICT (recipient_id, message_id) DO NOTHING
            "#,
        )
        .bind(new_message.id)
        .bind(new_message.conversation_id)
        .bind(new_message.sender_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE conversations SET last_message_at = NOW() WHERE id = $1")
            .bind(new_message.conversation_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let mut message = row.into_message();
        message.attachments = attachments;
        Ok(message)
    }

    async fn update_message_content(
        &self,
        id: i64,
        new_content: &str,
    ) -> Result<Message, ChatError> {
        // Appends the previous content in the same statement, so history
        // lags content by exactly one version.
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "UPDATE messages \
             SET edit_history = edit_history || jsonb_build_array( \
                     jsonb_build_object('content', content, 'replaced_at', to_jsonb(NOW()))), \
                 content = $2, \
                 is_edited = TRUE \
             WHERE id = $1 \
             RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(id)
        .bind(new_content)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ChatError::NotFound("Message not found".into()))?;

        let mut message = row.into_message();
        message.attachments = self.load_attachments(id).await?;
        Ok(message)
    }

    async fn soft_delete_message(&self, id: i64, deleted_by: i64) -> Result<(), ChatError> {
        let result = sqlx::query(
            "UPDATE messages SET deleted_at = NOW(), deleted_by = $2 \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(deleted_by)
        .execute(&self.pool)
        .await?;
        // Zero rows means already deleted or missing; the pipeline resolved
        // existence beforehand, so treat it as the idempotent no-op.
        let _ = result;
        Ok(())
    }

    async fn add_reaction(
        &self,
        message_id: i64,
        user_id: i64,
        emoji: &str,
    ) -> Result<Message, ChatError> {
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "UPDATE messages \
             SET reactions = reactions || jsonb_build_array(jsonb_build_object( \
                     'user_id', $2::bigint, 'emoji', $3::text, 'created_at', to_jsonb(NOW()))) \
             WHERE id = $1 AND NOT EXISTS ( \
                 SELECT 1 FROM jsonb_array_elements(reactions) r \
                 WHERE (r->>'user_id')::bigint = $2 AND r->>'emoji' = $3) \
             RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(message_id)
        .bind(user_id)
        .bind(emoji)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let mut message = row.into_message();
                message.attachments = self.load_attachments(message_id).await?;
                Ok(message)
            }
            // Duplicate pair: the guarded update matched nothing. No-op.
            None => self
                .find_message(message_id)
                .await?
                .ok_or_else(|| ChatError::NotFound("Message not found".into())),
        }
    }

    async fn remove_reaction(
        &self,
        message_id: i64,
        user_id: i64,
        emoji: &str,
    ) -> Result<Message, ChatError> {
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "UPDATE messages \
             SET reactions = COALESCE( \
                 (SELECT jsonb_agg(r) FROM jsonb_array_elements(reactions) r \
                  WHERE NOT ((r->>'user_id')::bigint = $2 AND r->>'emoji' = $3)), '[]'::jsonb) \
             WHERE id = $1 \
             RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(message_id)
        .bind(user_id)
        .bind(emoji)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ChatError::NotFound("Message not found".into()))?;

        let mut message = row.into_message();
        message.attachments = self.load_attachments(message_id).await?;
        Ok(message)
    }

    async fn mark_read(&self, message_id: i64, user_id: i64) -> Result<(), ChatError> {
        let mut tx = self.pool.begin().await?;

        // Guarded jsonb_set keeps the first receipt timestamp on repeat calls.
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET read_by = CASE
                WHEN read_by ? $2::text THEN read_by
                ELSE jsonb_set(read_by, ARRAY[$2::text], to_jsonb(NOW()))
            END
            WHERE id = $1
            "#,
        )
        .bind(message_id)
        .bind(user_id.to_string())
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(ChatError::NotFound("Message not found".into()));
        }

        sqlx::query(
            "UPDATE inbox_entries SET read = TRUE, read_at = NOW() \
             WHERE message_id = $1 AND recipient_id = $2 AND read = FALSE",
        )
        .bind(message_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn unread_count(&self, conversation_id: i64, user_id: i64) -> Result<i64, ChatError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM messages \
             WHERE conversation_id = $1 AND sender_id <> $2 \
               AND deleted_at IS NULL AND NOT (read_by ? $3)",
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(user_id.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn find_inbox_entries(&self, message_id: i64) -> Result<Vec<InboxEntry>, ChatError> {
        let rows = sqlx::query_as::<_, InboxEntryRow>(
            "SELECT id, recipient_id, message_id, conversation_id, \
                    delivered, delivered_at, read, read_at \
             FROM inbox_entries WHERE message_id = $1 ORDER BY id",
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.into_entry()).collect())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct InboxEntryRow {
    id: i64,
    recipient_id: i64,
    message_id: i64,
    conversation_id: i64,
    delivered: bool,
    delivered_at: Option<DateTime<Utc>>,
    read: bool,
    read_at: Option<DateTime<Utc>>,
}

impl InboxEntryRow {
    fn into_entry(self) -> InboxEntry {
        InboxEntry {
            id: self.id,
            recipient_id: self.recipient_id,
            message_id: self.message_id,
            conversation_id: self.conversation_id,
            delivered: self.delivered,
            delivered_at: self.delivered_at,
            read: self.read,
            read_at: self.read_at,
        }
    }
}
