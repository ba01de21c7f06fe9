//! Attachment entity.
//!
//! Maps to the `attachments` table. Rows are created at upload-prepare time
//! with `message_id = NULL` and bound to a message only if completed and
//! verified when the message transaction runs. Orphaned pending rows are
//! never exposed via read paths.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upload statuses matching the PostgreSQL ENUM `attachment_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl AttachmentStatus {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Represents an uploaded file attachment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    /// Snowflake ID (primary key)
    pub id: i64,

    /// Bound message; NULL while the upload is pending
    pub message_id: Option<i64>,

    pub conversation_id: i64,

    /// User who initiated the upload
    pub uploader_id: i64,

    /// Upload session grouping several files into one message; cleared when
    /// the attachment is bound
    pub upload_session_id: Option<String>,

    /// Storage object key
    pub file_key: String,

    pub mime_type: String,

    pub status: AttachmentStatus,

    /// Set once the storage layer confirmed the object exists
    pub upload_verified: bool,

    pub created_at: DateTime<Utc>,
}

/// Whether the attachment may be bound to a new message.
pub fn is_bindable(attachment: &Attachment) -> bool {
    attachment.message_id.is_none()
        && attachment.status == AttachmentStatus::Completed
        && attachment.upload_verified
}

impl Default for Attachment {
    fn default() -> Self {
        Self {
            id: 0,
            message_id: None,
            conversation_id: 0,
            uploader_id: 0,
            upload_session_id: None,
            file_key: String::new(),
            mime_type: "application/octet-stream".into(),
            status: AttachmentStatus::Pending,
            upload_verified: false,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_completed_verified_unbound_is_bindable() {
        let mut a = Attachment::default();
        assert!(!is_bindable(&a));

        a.status = AttachmentStatus::Completed;
        assert!(!is_bindable(&a));

        a.upload_verified = true;
        assert!(is_bindable(&a));

        a.message_id = Some(42);
        assert!(!is_bindable(&a));
    }
}
