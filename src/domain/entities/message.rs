//! Message entity.
//!
//! Maps to the `messages` table. Reactions, edit history and read receipts
//! are JSONB columns: they are small per-message collections mutated in
//! place, not independently addressable rows.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::attachment::Attachment;

/// Message kinds matching the PostgreSQL ENUM `message_kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// A regular user message
    #[default]
    Text,
    /// Server-generated notice (participant changes etc.)
    System,
}

impl MessageKind {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "system" => Self::System,
            _ => Self::Text,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::System => "system",
        }
    }
}

/// Delivery statuses matching the PostgreSQL ENUM `message_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Sending,
    #[default]
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "sending" => Self::Sending,
            "delivered" => Self::Delivered,
            "read" => Self::Read,
            "failed" => Self::Failed,
            _ => Self::Sent,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Failed => "failed",
        }
    }
}

/// A single emoji reaction. At most one entry per `(user_id, emoji)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub user_id: i64,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

/// A superseded content snapshot. The history always lags the live content
/// by one version: editing appends the *previous* content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditRecord {
    pub content: String,
    pub replaced_at: DateTime<Utc>,
}

/// Represents a message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Snowflake ID (primary key)
    pub id: i64,

    pub conversation_id: i64,

    pub sender_id: i64,

    pub content: String,

    pub kind: MessageKind,

    pub status: MessageStatus,

    /// Thread parent; must reference a message in the same conversation
    pub parent_id: Option<i64>,

    #[serde(default)]
    pub reactions: Vec<Reaction>,

    #[serde(default)]
    pub edit_history: Vec<EditRecord>,

    /// Read receipts keyed by user id
    #[serde(default)]
    pub read_by: HashMap<i64, DateTime<Utc>>,

    pub is_edited: bool,

    /// Soft-delete marker; the row and its inbox entries stay for audit
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<i64>,

    pub created_at: DateTime<Utc>,

    /// Attachments bound at creation time (hydrated on read)
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// Whether the message has been soft-deleted.
pub fn is_deleted(message: &Message) -> bool {
    message.deleted_at.is_some()
}

/// Whether the message is a reply into a thread.
pub fn is_reply(message: &Message) -> bool {
    message.parent_id.is_some()
}

/// Find a reaction index for `(user_id, emoji)`, if present.
pub fn find_reaction(message: &Message, user_id: i64, emoji: &str) -> Option<usize> {
    message
        .reactions
        .iter()
        .position(|r| r.user_id == user_id && r.emoji == emoji)
}

impl Default for Message {
    fn default() -> Self {
        Self {
            id: 0,
            conversation_id: 0,
            sender_id: 0,
            content: String::new(),
            kind: MessageKind::Text,
            status: MessageStatus::Sent,
            parent_id: None,
            reactions: Vec::new(),
            edit_history: Vec::new(),
            read_by: HashMap::new(),
            is_edited: false,
            deleted_at: None,
            deleted_by: None,
            created_at: Utc::now(),
            attachments: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips() {
        for status in [
            MessageStatus::Sending,
            MessageStatus::Sent,
            MessageStatus::Delivered,
            MessageStatus::Read,
            MessageStatus::Failed,
        ] {
            assert_eq!(MessageStatus::from_str(status.as_str()), status);
        }
    }

    #[test]
    fn reaction_lookup_matches_pair() {
        let mut msg = Message::default();
        msg.reactions.push(Reaction {
            user_id: 1,
            emoji: "👍".into(),
            created_at: Utc::now(),
        });
        assert_eq!(find_reaction(&msg, 1, "👍"), Some(0));
        assert_eq!(find_reaction(&msg, 1, "❤️"), None);
        assert_eq!(find_reaction(&msg, 2, "👍"), None);
    }
}
