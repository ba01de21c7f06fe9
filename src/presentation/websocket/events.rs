//! Realtime Event Types
//!
//! Wire formats for the gateway: inbound client events, outbound broadcast
//! events, and the uniform acknowledgement envelope. Event names and room
//! names are a contract other collaborators (e.g. a push-notification
//! worker) may subscribe against.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::entities::{Message, Reaction};
use crate::shared::error::ChatError;

/// Personal room name for a user.
pub fn user_room(user_id: i64) -> String {
    format!("user:{user_id}")
}

/// Shared room name for a conversation.
pub fn conversation_room(conversation_id: i64) -> String {
    format!("conversation:{conversation_id}")
}

/// Inbound client events.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    SendMessage {
        conversation_id: i64,
        #[serde(default)]
        content: String,
        #[serde(default)]
        parent_message_id: Option<i64>,
        #[serde(default)]
        upload_session_id: Option<String>,
    },
    UpdateMessage {
        message_id: i64,
        content: String,
    },
    DeleteMessage {
        message_id: i64,
    },
    JoinConversation {
        conversation_id: i64,
    },
    LeaveConversation {
        conversation_id: i64,
    },
    Typing {
        conversation_id: i64,
    },
    StopTyping {
        conversation_id: i64,
    },
    MarkAsRead {
        message_id: i64,
    },
    AddReaction {
        message_id: i64,
        emoji: String,
    },
    RemoveReaction {
        message_id: i64,
        emoji: String,
    },
    AddParticipant {
        conversation_id: i64,
        user_ids: Vec<i64>,
    },
    RemoveParticipant {
        conversation_id: i64,
        user_ids: Vec<i64>,
    },
}

impl ClientEvent {
    /// Event name for throttle keys and logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SendMessage { .. } => "send-message",
            Self::UpdateMessage { .. } => "update-message",
            Self::DeleteMessage { .. } => "delete-message",
            Self::JoinConversation { .. } => "join-conversation",
            Self::LeaveConversation { .. } => "leave-conversation",
            Self::Typing { .. } => "typing",
            Self::StopTyping { .. } => "stop-typing",
            Self::MarkAsRead { .. } => "mark-as-read",
            Self::AddReaction { .. } => "add-reaction",
            Self::RemoveReaction { .. } => "remove-reaction",
            Self::AddParticipant { .. } => "add-participant",
            Self::RemoveParticipant { .. } => "remove-participant",
        }
    }
}

/// Message payload broadcast to rooms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageView {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_id: i64,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_message_id: Option<i64>,
    pub is_edited: bool,
    pub reactions: Vec<Reaction>,
    pub attachments: Vec<AttachmentView>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentView {
    pub id: i64,
    pub file_key: String,
    pub mime_type: String,
}

impl From<&Message> for MessageView {
    fn from(m: &Message) -> Self {
        Self {
            id: m.id,
            conversation_id: m.conversation_id,
            sender_id: m.sender_id,
            content: m.content.clone(),
            parent_message_id: m.parent_id,
            is_edited: m.is_edited,
            reactions: m.reactions.clone(),
            attachments: m
                .attachments
                .iter()
                .map(|a| AttachmentView {
                    id: a.id,
                    file_key: a.file_key.clone(),
                    mime_type: a.mime_type.clone(),
                })
                .collect(),
            created_at: m.created_at,
        }
    }
}

/// Participant mutation direction for `participants-updated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantAction {
    Added,
    Removed,
}

/// Outbound broadcast events (server→client).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    MessageCreated {
        message: MessageView,
    },
    MessageUpdated {
        message: MessageView,
    },
    MessageDeleted {
        conversation_id: i64,
        message_id: i64,
        deleted_by: i64,
    },
    UserTyping {
        conversation_id: i64,
        user_id: i64,
    },
    UserStoppedTyping {
        conversation_id: i64,
        user_id: i64,
    },
    MessageRead {
        conversation_id: i64,
        message_id: i64,
        user_id: i64,
        read_at: DateTime<Utc>,
    },
    ReactionAdded {
        conversation_id: i64,
        message_id: i64,
        user_id: i64,
        emoji: String,
    },
    ReactionRemoved {
        conversation_id: i64,
        message_id: i64,
        user_id: i64,
        emoji: String,
    },
    ParticipantsUpdated {
        conversation_id: i64,
        action: ParticipantAction,
        user_ids: Vec<i64>,
    },
    Error {
        code: String,
        message: String,
    },
}

/// Error body inside a failed acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckError {
    pub code: String,
    pub message: String,
}

/// Uniform response envelope for every inbound event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventAck {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AckError>,
}

impl EventAck {
    pub fn ok(data: Option<serde_json::Value>) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    pub fn err(e: &ChatError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(AckError {
                code: e.error_code().as_str().to_string(),
                message: e.client_message(),
            }),
        }
    }
}

/// Frames a connection's writer task can receive.
#[derive(Debug, Clone)]
pub enum Outbound {
    Event(ServerEvent),
    Ack(EventAck),
    Close,
}
