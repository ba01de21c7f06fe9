//! Participant entity.
//!
//! Maps to the `participants` table; unique on `(user_id, conversation_id)`.
//! Removal marks `status = Left` rather than deleting, so membership history
//! survives for audit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Roles matching the PostgreSQL ENUM `participant_role`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Owner,
    Admin,
    #[default]
    Member,
}

impl ParticipantRole {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "owner" => Self::Owner,
            "admin" => Self::Admin,
            _ => Self::Member,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }
}

/// Membership statuses matching the PostgreSQL ENUM `participant_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    Pending,
    #[default]
    Member,
    Banned,
    /// Removed from the conversation; row kept for audit
    Left,
}

impl ParticipantStatus {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pending" => Self::Pending,
            "banned" => Self::Banned,
            "left" => Self::Left,
            _ => Self::Member,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Member => "member",
            Self::Banned => "banned",
            Self::Left => "left",
        }
    }
}

/// Represents a user's membership in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    /// Snowflake ID (primary key)
    pub id: i64,

    pub conversation_id: i64,

    pub user_id: i64,

    pub role: ParticipantRole,

    pub status: ParticipantStatus,

    /// Last time the user interacted with the conversation (join events bump
    /// this best-effort)
    pub last_active_at: Option<DateTime<Utc>>,

    /// Per-user conversation settings
    pub muted: bool,
    pub pinned: bool,
    pub notifications_enabled: bool,

    pub joined_at: DateTime<Utc>,
}

/// Whether this participant can read and write the conversation.
pub fn is_active_member(participant: &Participant) -> bool {
    participant.status == ParticipantStatus::Member
}

/// Whether this participant may perform admin-only operations.
pub fn has_admin_role(participant: &Participant) -> bool {
    matches!(
        participant.role,
        ParticipantRole::Admin | ParticipantRole::Owner
    )
}

impl Default for Participant {
    fn default() -> Self {
        Self {
            id: 0,
            conversation_id: 0,
            user_id: 0,
            role: ParticipantRole::Member,
            status: ParticipantStatus::Member,
            last_active_at: None,
            muted: false,
            pinned: false,
            notifications_enabled: true,
            joined_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_and_admin_have_admin_role() {
        let mut p = Participant::default();
        assert!(!has_admin_role(&p));
        p.role = ParticipantRole::Admin;
        assert!(has_admin_role(&p));
        p.role = ParticipantRole::Owner;
        assert!(has_admin_role(&p));
    }

    #[test]
    fn only_member_status_is_active() {
        let mut p = Participant::default();
        assert!(is_active_member(&p));
        for status in [
            ParticipantStatus::Pending,
            ParticipantStatus::Banned,
            ParticipantStatus::Left,
        ] {
            p.status = status;
            assert!(!is_active_member(&p));
        }
    }
}
