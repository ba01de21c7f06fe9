//! In-Memory Chat Store
//!
//! A `ChatStore` implementation backed by a single mutex-guarded state
//! struct. The one lock makes `create_message` naturally atomic, which is
//! exactly the transactional guarantee the port demands. Used by the test
//! suite and useful for local development without PostgreSQL.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::domain::entities::{
    direct_key, is_bindable, Attachment, AttachmentStatus, Conversation, ConversationKind,
    EditRecord, InboxEntry, Message, MessageStatus, Participant, ParticipantStatus, Reaction,
    ReadCursor,
};
use crate::domain::{ChatStore, NewMessage, NewParticipant};
use crate::shared::error::ChatError;

#[derive(Default)]
struct State {
    conversations: HashMap<i64, Conversation>,
    /// (tenant_id, direct_key) -> conversation id; the uniqueness constraint
    /// behind idempotent direct creation
    direct_index: HashMap<(i64, String), i64>,
    /// conversation id -> participants
    participants: HashMap<i64, Vec<Participant>>,
    messages: HashMap<i64, Message>,
    attachments: Vec<Attachment>,
    /// message id -> inbox entries
    inbox: HashMap<i64, Vec<InboxEntry>>,
    next_inbox_id: i64,
    next_attachment_id: i64,
}

pub struct MemoryChatStore {
    state: Mutex<State>,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    /// Number of persisted messages. Test helper for verifying rollbacks.
    pub fn message_count(&self) -> usize {
        self.state.lock().messages.len()
    }

    /// Insert an attachment row in the state an upload-confirm flow would
    /// leave behind. Test/dev helper.
    pub fn seed_attachment(
        &self,
        conversation_id: i64,
        uploader_id: i64,
        upload_session_id: &str,
        file_key: &str,
        completed: bool,
    ) -> i64 {
        let mut state = self.state.lock();
        state.next_attachment_id += 1;
        let id = state.next_attachment_id;
        state.attachments.push(Attachment {
            id,
            message_id: None,
            conversation_id,
            uploader_id,
            upload_session_id: Some(upload_session_id.to_string()),
            file_key: file_key.to_string(),
            mime_type: "application/octet-stream".into(),
            status: if completed {
                AttachmentStatus::Completed
            } else {
                AttachmentStatus::Pending
            },
            upload_verified: completed,
            created_at: Utc::now(),
        });
        id
    }

    fn hydrate(state: &State, message: &Message) -> Message {
        let mut message = message.clone();
        message.attachments = state
            .attachments
            .iter()
            .filter(|a| a.message_id == Some(message.id))
            .cloned()
            .collect();
        message
    }
}

impl Default for MemoryChatStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn find_conversation(&self, id: i64) -> Result<Option<Conversation>, ChatError> {
        Ok(self.state.lock().conversations.get(&id).cloned())
    }

    async fn find_direct_conversation(
        &self,
        user_a: i64,
        user_b: i64,
        tenant_id: i64,
    ) -> Result<Option<Conversation>, ChatError> {
        let state = self.state.lock();
        let id = state
            .direct_index
            .get(&(tenant_id, direct_key(user_a, user_b)));
        Ok(id.and_then(|id| state.conversations.get(id)).cloned())
    }

    async fn create_conversation(
        &self,
        conversation: &Conversation,
        participants: &[NewParticipant],
    ) -> Result<Conversation, ChatError> {
        let mut state = self.state.lock();

        if conversation.kind == ConversationKind::Direct {
            let users: Vec<i64> = participants.iter().map(|p| p.user_id).collect();
            if users.len() != 2 {
                return Err(ChatError::InvalidInput(
                    "Direct conversations take exactly two participants".into(),
                ));
            }
            let key = (conversation.tenant_id, direct_key(users[0], users[1]));
            if state.direct_index.contains_key(&key) {
                return Err(ChatError::Conflict(
                    "Direct conversation already exists".into(),
                ));
            }
            state.direct_index.insert(key, conversation.id);
        }

        state
            .conversations
            .insert(conversation.id, conversation.clone());

        let now = Utc::now();
        let rows: Vec<Participant> = participants
            .iter()
            .map(|p| Participant {
                id: p.id,
                conversation_id: conversation.id,
                user_id: p.user_id,
                role: p.role,
                status: p.status,
                last_active_at: None,
                muted: false,
                pinned: false,
                notifications_enabled: true,
                joined_at: now,
            })
            .collect();
        state.participants.insert(conversation.id, rows);

        Ok(conversation.clone())
    }

    async fn rename_conversation(&self, id: i64, name: &str) -> Result<(), ChatError> {
        let mut state = self.state.lock();
        let conv = state
            .conversations
            .get_mut(&id)
            .ok_or_else(|| ChatError::NotFound("Conversation not found".into()))?;
        conv.name = Some(name.to_string());
        Ok(())
    }

    async fn set_conversation_privacy(&self, id: i64, is_private: bool) -> Result<(), ChatError> {
        let mut state = self.state.lock();
        let conv = state
            .conversations
            .get_mut(&id)
            .ok_or_else(|| ChatError::NotFound("Conversation not found".into()))?;
        conv.is_private = is_private;
        Ok(())
    }

    async fn conversation_ids_for_user(&self, user_id: i64) -> Result<Vec<i64>, ChatError> {
        let state = self.state.lock();
        Ok(state
            .participants
            .iter()
            .filter(|(_, rows)| {
                rows.iter()
                    .any(|p| p.user_id == user_id && p.status == ParticipantStatus::Member)
            })
            .map(|(&conversation_id, _)| conversation_id)
            .collect())
    }

    async fn set_last_read(
        &self,
        conversation_id: i64,
        user_id: i64,
        message_id: i64,
        timestamp: DateTime<Utc>,
    ) -> Result<(), ChatError> {
        let mut state = self.state.lock();
        let conv = state
            .conversations
            .get_mut(&conversation_id)
            .ok_or_else(|| ChatError::NotFound("Conversation not found".into()))?;
        conv.last_read.insert(
            user_id,
            ReadCursor {
                message_id,
                timestamp,
            },
        );
        Ok(())
    }

    async fn update_unread_snapshot(
        &self,
        conversation_id: i64,
        user_id: i64,
        count: i64,
    ) -> Result<(), ChatError> {
        let mut state = self.state.lock();
        let conv = state
            .conversations
            .get_mut(&conversation_id)
            .ok_or_else(|| ChatError::NotFound("Conversation not found".into()))?;
        conv.unread_counts.insert(user_id, count);
        Ok(())
    }

    async fn find_participant(
        &self,
        conversation_id: i64,
        user_id: i64,
    ) -> Result<Option<Participant>, ChatError> {
        let state = self.state.lock();
        Ok(state
            .participants
            .get(&conversation_id)
            .and_then(|rows| rows.iter().find(|p| p.user_id == user_id))
            .cloned())
    }

    async fn find_participants(
        &self,
        conversation_id: i64,
    ) -> Result<Vec<Participant>, ChatError> {
        let state = self.state.lock();
        Ok(state
            .participants
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn add_participants(
        &self,
        conversation_id: i64,
        participants: &[NewParticipant],
    ) -> Result<(), ChatError> {
        let mut state = self.state.lock();
        let now = Utc::now();
        let rows = state.participants.entry(conversation_id).or_default();
        for p in participants {
            if let Some(existing) = rows.iter_mut().find(|r| r.user_id == p.user_id) {
                // Unique (user, conversation): flip the existing row back.
                existing.status = p.status;
            } else {
                rows.push(Participant {
                    id: p.id,
                    conversation_id,
                    user_id: p.user_id,
                    role: p.role,
                    status: p.status,
                    last_active_at: None,
                    muted: false,
                    pinned: false,
                    notifications_enabled: true,
                    joined_at: now,
                });
            }
        }
        Ok(())
    }

    async fn set_participant_status(
        &self,
        conversation_id: i64,
        user_id: i64,
        status: ParticipantStatus,
    ) -> Result<(), ChatError> {
        let mut state = self.state.lock();
        let row = state
            .participants
            .get_mut(&conversation_id)
            .and_then(|rows| rows.iter_mut().find(|p| p.user_id == user_id))
            .ok_or_else(|| ChatError::NotFound("Participant not found".into()))?;
        row.status = status;
        Ok(())
    }

    async fn touch_last_active(
        &self,
        conversation_id: i64,
        user_id: i64,
    ) -> Result<(), ChatError> {
        let mut state = self.state.lock();
        let row = state
            .participants
            .get_mut(&conversation_id)
            .and_then(|rows| rows.iter_mut().find(|p| p.user_id == user_id))
            .ok_or_else(|| ChatError::NotFound("Participant not found".into()))?;
        row.last_active_at = Some(Utc::now());
        Ok(())
    }

    async fn find_message(&self, id: i64) -> Result<Option<Message>, ChatError> {
        let state = self.state.lock();
        Ok(state
            .messages
            .get(&id)
            .map(|m| Self::hydrate(&state, m)))
    }

    async fn create_message(&self, new_message: NewMessage) -> Result<Message, ChatError> {
        let mut state = self.state.lock();
        let now = Utc::now();

        // Attachment binding happens before the insert so an ineligible
        // session leaves no trace, mirroring a rolled-back transaction.
        if let Some(session) = &new_message.upload_session_id {
            let bindable: Vec<usize> = state
                .attachments
                .iter()
                .enumerate()
                .filter(|(_, a)| {
                    a.upload_session_id.as_deref() == Some(session.as_str())
                        && a.uploader_id == new_message.sender_id
                        && a.conversation_id == new_message.conversation_id
                        && is_bindable(a)
                })
                .map(|(i, _)| i)
                .collect();
            if bindable.is_empty() {
                return Err(ChatError::InvalidInput(
                    "No completed attachments found for upload session".into(),
                ));
            }
            for i in bindable {
                let a = &mut state.attachments[i];
                a.message_id = Some(new_message.id);
                a.upload_session_id = None;
            }
        }

        let message = Message {
            id: new_message.id,
            conversation_id: new_message.conversation_id,
            sender_id: new_message.sender_id,
            content: new_message.content.clone(),
            parent_id: new_message.parent_id,
            status: MessageStatus::Sent,
            created_at: now,
            ..Default::default()
        };
        state.messages.insert(message.id, message.clone());

        // Fan-out: one inbox entry per active participant except the sender,
        // skipping entries a prior attempt already created.
        let recipients: Vec<i64> = state
            .participants
            .get(&new_message.conversation_id)
            .map(|rows| {
                rows.iter()
                    .filter(|p| {
                        p.status == ParticipantStatus::Member
                            && p.user_id != new_message.sender_id
                    })
                    .map(|p| p.user_id)
                    .collect()
            })
            .unwrap_or_default();

        for recipient_id in recipients {
            let exists = state
                .inbox
                .get(&message.id)
                .map(|entries| entries.iter().any(|e| e.recipient_id == recipient_id))
                .unwrap_or(false);
            if exists {
                continue;
            }
            state.next_inbox_id += 1;
            let entry = InboxEntry {
                id: state.next_inbox_id,
                recipient_id,
                message_id: message.id,
                conversation_id: message.conversation_id,
                delivered: false,
                delivered_at: None,
                read: false,
                read_at: None,
            };
            state.inbox.entry(message.id).or_default().push(entry);
        }

        if let Some(conv) = state.conversations.get_mut(&new_message.conversation_id) {
            conv.last_message_at = Some(now);
        }

        Ok(Self::hydrate(&state, &message))
    }

    async fn update_message_content(
        &self,
        id: i64,
        new_content: &str,
    ) -> Result<Message, ChatError> {
        let mut state = self.state.lock();
        let message = state
            .messages
            .get_mut(&id)
            .ok_or_else(|| ChatError::NotFound("Message not found".into()))?;

        let previous = std::mem::replace(&mut message.content, new_content.to_string());
        message.edit_history.push(EditRecord {
            content: previous,
            replaced_at: Utc::now(),
        });
        message.is_edited = true;
        let message = message.clone();
        Ok(Self::hydrate(&state, &message))
    }

    async fn soft_delete_message(&self, id: i64, deleted_by: i64) -> Result<(), ChatError> {
        let mut state = self.state.lock();
        let message = state
            .messages
            .get_mut(&id)
            .ok_or_else(|| ChatError::NotFound("Message not found".into()))?;
        if message.deleted_at.is_none() {
            message.deleted_at = Some(Utc::now());
            message.deleted_by = Some(deleted_by);
        }
        Ok(())
    }

    async fn add_reaction(
        &self,
        message_id: i64,
        user_id: i64,
        emoji: &str,
    ) -> Result<Message, ChatError> {
        let mut state = self.state.lock();
        let message = state
            .messages
            .get_mut(&message_id)
            .ok_or_else(|| ChatError::NotFound("Message not found".into()))?;

        let exists = message
            .reactions
            .iter()
            .any(|r| r.user_id == user_id && r.emoji == emoji);
        if !exists {
            message.reactions.push(Reaction {
                user_id,
                emoji: emoji.to_string(),
                created_at: Utc::now(),
            });
        }
        let message = message.clone();
        Ok(Self::hydrate(&state, &message))
    }

    async fn remove_reaction(
        &self,
        message_id: i64,
        user_id: i64,
        emoji: &str,
    ) -> Result<Message, ChatError> {
        let mut state = self.state.lock();
        let message = state
            .messages
            .get_mut(&message_id)
            .ok_or_else(|| ChatError::NotFound("Message not found".into()))?;
        message
            .reactions
            .retain(|r| !(r.user_id == user_id && r.emoji == emoji));
        let message = message.clone();
        Ok(Self::hydrate(&state, &message))
    }

    async fn mark_read(&self, message_id: i64, user_id: i64) -> Result<(), ChatError> {
        let mut state = self.state.lock();
        let now = Utc::now();

        let message = state
            .messages
            .get_mut(&message_id)
            .ok_or_else(|| ChatError::NotFound("Message not found".into()))?;
        message.read_by.entry(user_id).or_insert(now);

        if let Some(entries) = state.inbox.get_mut(&message_id) {
            if let Some(entry) = entries
                .iter_mut()
                .find(|e| e.recipient_id == user_id && !e.read)
            {
                entry.read = true;
                entry.read_at = Some(now);
            }
        }
        Ok(())
    }

    async fn unread_count(&self, conversation_id: i64, user_id: i64) -> Result<i64, ChatError> {
        let state = self.state.lock();
        Ok(state
            .messages
            .values()
            .filter(|m| {
                m.conversation_id == conversation_id
                    && m.sender_id != user_id
                    && m.deleted_at.is_none()
                    && !m.read_by.contains_key(&user_id)
            })
            .count() as i64)
    }

    async fn find_inbox_entries(&self, message_id: i64) -> Result<Vec<InboxEntry>, ChatError> {
        let state = self.state.lock();
        Ok(state.inbox.get(&message_id).cloned().unwrap_or_default())
    }
}
