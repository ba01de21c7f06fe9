//! Persistence Port
//!
//! The `ChatStore` trait is the only storage contract the delivery core
//! depends on. Any store satisfying it is sufficient, from PostgreSQL to
//! the in-memory implementation the test suite runs against.
//!
//! `create_message` is the single atomic operation: message insert,
//! attachment binding, inbox fan-out and the `last_message_at` bump commit
//! together or not at all.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::entities::{
    Conversation, InboxEntry, Message, Participant, ParticipantRole, ParticipantStatus,
};
use crate::shared::error::ChatError;

/// Everything the store needs to persist a new message atomically.
///
/// Validation (empty content, sanitization, access, parent checks) happens in
/// the pipeline before this is built; the store re-verifies only what must
/// hold inside the transaction (attachment eligibility).
#[derive(Debug, Clone)]
pub struct NewMessage {
    /// Pre-generated snowflake id
    pub id: i64,
    pub conversation_id: i64,
    pub sender_id: i64,
    /// Already-sanitized content (may be empty when attachments carry the
    /// message)
    pub content: String,
    pub parent_id: Option<i64>,
    /// When set, all bindable attachments in this session are attached; the
    /// transaction fails with `InvalidInput` if none qualify
    pub upload_session_id: Option<String>,
}

/// A new participant row to insert alongside a conversation or into an
/// existing one.
#[derive(Debug, Clone)]
pub struct NewParticipant {
    pub id: i64,
    pub user_id: i64,
    pub role: ParticipantRole,
    pub status: ParticipantStatus,
}

/// Transactional store for conversations, participants, messages,
/// attachments and inbox entries.
#[async_trait]
pub trait ChatStore: Send + Sync + 'static {
    // ----- conversations -----

    async fn find_conversation(&self, id: i64) -> Result<Option<Conversation>, ChatError>;

    /// Look up the direct conversation for an unordered user pair in a
    /// tenant.
    async fn find_direct_conversation(
        &self,
        user_a: i64,
        user_b: i64,
        tenant_id: i64,
    ) -> Result<Option<Conversation>, ChatError>;

    /// Insert a conversation and its initial participants in one
    /// transaction. A unique violation on the direct key surfaces as
    /// `ChatError::Conflict`; callers fetch the winner instead of failing.
    async fn create_conversation(
        &self,
        conversation: &Conversation,
        participants: &[NewParticipant],
    ) -> Result<Conversation, ChatError>;

    async fn rename_conversation(&self, id: i64, name: &str) -> Result<(), ChatError>;

    async fn set_conversation_privacy(&self, id: i64, is_private: bool) -> Result<(), ChatError>;

    /// Conversation ids the user is an active member of (bulk room join at
    /// connect time).
    async fn conversation_ids_for_user(&self, user_id: i64) -> Result<Vec<i64>, ChatError>;

    /// Refresh the advisory read cursor snapshot on the conversation.
    async fn set_last_read(
        &self,
        conversation_id: i64,
        user_id: i64,
        message_id: i64,
        timestamp: DateTime<Utc>,
    ) -> Result<(), ChatError>;

    /// Refresh the advisory unread counter snapshot on the conversation.
    async fn update_unread_snapshot(
        &self,
        conversation_id: i64,
        user_id: i64,
        count: i64,
    ) -> Result<(), ChatError>;

    // ----- participants -----

    async fn find_participant(
        &self,
        conversation_id: i64,
        user_id: i64,
    ) -> Result<Option<Participant>, ChatError>;

    async fn find_participants(&self, conversation_id: i64)
        -> Result<Vec<Participant>, ChatError>;

    /// Insert participants; re-adding a previously removed user flips the
    /// existing row back to the given status instead of violating the
    /// `(user_id, conversation_id)` uniqueness.
    async fn add_participants(
        &self,
        conversation_id: i64,
        participants: &[NewParticipant],
    ) -> Result<(), ChatError>;

    async fn set_participant_status(
        &self,
        conversation_id: i64,
        user_id: i64,
        status: ParticipantStatus,
    ) -> Result<(), ChatError>;

    async fn touch_last_active(
        &self,
        conversation_id: i64,
        user_id: i64,
    ) -> Result<(), ChatError>;

    // ----- messages -----

    /// Fetch a message hydrated with its attachments. Soft-deleted messages
    /// are returned; callers decide how to treat them.
    async fn find_message(&self, id: i64) -> Result<Option<Message>, ChatError>;

    /// The atomic message transaction: insert the row (status Sent), bind
    /// eligible attachments when a session id is given (failing the whole
    /// transaction with `InvalidInput` if none qualify), fan out one inbox
    /// entry per active participant excluding the sender (idempotent on
    /// retry), and bump the conversation's `last_message_at`.
    async fn create_message(&self, new_message: NewMessage) -> Result<Message, ChatError>;

    /// Replace content, appending the previous content to the edit history
    /// and setting the edited flag, in one statement.
    async fn update_message_content(
        &self,
        id: i64,
        new_content: &str,
    ) -> Result<Message, ChatError>;

    async fn soft_delete_message(&self, id: i64, deleted_by: i64) -> Result<(), ChatError>;

    /// Idempotent: adding an existing `(user, emoji)` pair is a no-op.
    async fn add_reaction(
        &self,
        message_id: i64,
        user_id: i64,
        emoji: &str,
    ) -> Result<Message, ChatError>;

    /// Idempotent: removing an absent pair is a no-op.
    async fn remove_reaction(
        &self,
        message_id: i64,
        user_id: i64,
        emoji: &str,
    ) -> Result<Message, ChatError>;

    /// Mark the message read for a user: `read_by` receipt on the message
    /// plus the matching inbox entry. Idempotent.
    async fn mark_read(&self, message_id: i64, user_id: i64) -> Result<(), ChatError>;

    /// Recompute the unread count: non-deleted messages in the conversation
    /// not sent by the user and without a `read_by` receipt for them.
    async fn unread_count(&self, conversation_id: i64, user_id: i64) -> Result<i64, ChatError>;

    /// Inbox entries for a message (fan-out verification and delivery
    /// consumers).
    async fn find_inbox_entries(&self, message_id: i64) -> Result<Vec<InboxEntry>, ChatError>;
}
