//! Conversation entity.
//!
//! Maps to the `conversations` table. A conversation is the aggregate root
//! owning participants and messages; it is only ever soft-deleted.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Conversation kinds matching the PostgreSQL ENUM `conversation_kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    /// One-to-one chat. Exactly two participants; identity is the unordered
    /// user pair within a tenant.
    Direct,
    /// Multi-party chat with owner/admin roles.
    Group,
}

impl ConversationKind {
    /// Convert from database string representation.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "direct" => Self::Direct,
            _ => Self::Group,
        }
    }

    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
        }
    }
}

impl std::fmt::Display for ConversationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-user read cursor stored on the conversation (advisory snapshot).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadCursor {
    pub message_id: i64,
    pub timestamp: DateTime<Utc>,
}

/// Represents a conversation.
///
/// `last_read` and `unread_counts` are denormalized snapshots refreshed
/// best-effort after reads and writes; the read tracker recomputes unread
/// counts from messages on demand and never trusts these fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Snowflake ID (primary key)
    pub id: i64,

    /// Tenant isolation boundary; every access check is scoped to it
    pub tenant_id: i64,

    /// Direct or group
    pub kind: ConversationKind,

    /// Display name; required by convention for group conversations
    pub name: Option<String>,

    /// Whether the conversation is hidden from tenant-wide listings
    pub is_private: bool,

    /// Free-form metadata attached by callers
    #[serde(default)]
    pub metadata: serde_json::Value,

    /// Timestamp of the most recent message (bumped inside the message
    /// transaction, last-writer-wins)
    pub last_message_at: Option<DateTime<Utc>>,

    /// Advisory per-user read cursors, keyed by user id
    #[serde(default)]
    pub last_read: HashMap<i64, ReadCursor>,

    /// Advisory per-user unread counters, keyed by user id
    #[serde(default)]
    pub unread_counts: HashMap<i64, i64>,

    /// Soft-delete timestamp; conversations are never hard-deleted
    pub deleted_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

/// Canonical key identifying a direct conversation: the unordered user pair.
///
/// A unique index on `(tenant_id, direct_key)` makes direct creation
/// idempotent and lets concurrent creators race safely.
pub fn direct_key(user_a: i64, user_b: i64) -> String {
    let (lo, hi) = if user_a <= user_b {
        (user_a, user_b)
    } else {
        (user_b, user_a)
    };
    format!("{}:{}", lo, hi)
}

/// Whether the conversation is still visible (not soft-deleted).
pub fn is_active(conversation: &Conversation) -> bool {
    conversation.deleted_at.is_none()
}

impl Default for Conversation {
    fn default() -> Self {
        Self {
            id: 0,
            tenant_id: 0,
            kind: ConversationKind::Group,
            name: None,
            is_private: false,
            metadata: serde_json::Value::Null,
            last_message_at: None,
            last_read: HashMap::new(),
            unread_counts: HashMap::new(),
            deleted_at: None,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_key_is_order_independent() {
        assert_eq!(direct_key(7, 3), direct_key(3, 7));
        assert_eq!(direct_key(3, 7), "3:7");
    }

    #[test]
    fn kind_round_trips() {
        assert_eq!(
            ConversationKind::from_str(ConversationKind::Direct.as_str()),
            ConversationKind::Direct
        );
        assert_eq!(ConversationKind::from_str("unknown"), ConversationKind::Group);
    }
}
