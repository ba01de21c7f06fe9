//! Inbox entry entity.
//!
//! Maps to the `inbox_entries` table; unique on `(recipient_id, message_id)`.
//! This is the physical unit of fan-out: one row per recipient other than
//! the sender, created inside the message transaction. The read tracker and
//! any future push-notification worker consume these rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Represents one recipient's delivery record for a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxEntry {
    /// Store-assigned primary key
    pub id: i64,

    pub recipient_id: i64,

    pub message_id: i64,

    pub conversation_id: i64,

    pub delivered: bool,
    pub delivered_at: Option<DateTime<Utc>>,

    pub read: bool,
    pub read_at: Option<DateTime<Utc>>,
}

impl Default for InboxEntry {
    fn default() -> Self {
        Self {
            id: 0,
            recipient_id: 0,
            message_id: 0,
            conversation_id: 0,
            delivered: false,
            delivered_at: None,
            read: false,
            read_at: None,
        }
    }
}
