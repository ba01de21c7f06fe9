//! Conversation Service
//!
//! Direct/group conversation lifecycle and participant management. Group-only
//! operations reject on direct conversations regardless of the caller's role.

use std::sync::Arc;

use chrono::Utc;

use crate::application::services::access_control::AccessControl;
use crate::domain::entities::{
    Conversation, ConversationKind, ParticipantRole, ParticipantStatus,
};
use crate::domain::{ChatStore, NewParticipant};
use crate::shared::error::ChatError;
use crate::shared::snowflake::SnowflakeGenerator;

pub struct ConversationService<S: ChatStore> {
    store: Arc<S>,
    access: AccessControl<S>,
    ids: Arc<SnowflakeGenerator>,
}

impl<S: ChatStore> ConversationService<S> {
    pub fn new(store: Arc<S>, ids: Arc<SnowflakeGenerator>) -> Self {
        let access = AccessControl::new(store.clone());
        Self { store, access, ids }
    }

    /// Idempotent create-or-get for a direct conversation.
    ///
    /// Two simultaneous requests for the same pair resolve through the
    /// store's uniqueness constraint: the loser sees `Conflict` and fetches
    /// the winner.
    pub async fn create_or_get_direct(
        &self,
        tenant_id: i64,
        user_a: i64,
        user_b: i64,
    ) -> Result<Conversation, ChatError> {
        if user_a == user_b {
            return Err(ChatError::InvalidInput(
                "A direct conversation needs two distinct users".into(),
            ));
        }

        if let Some(existing) = self
            .store
            .find_direct_conversation(user_a, user_b, tenant_id)
            .await?
        {
            return Ok(existing);
        }

        let conversation = Conversation {
            id: self.ids.generate(),
            tenant_id,
            kind: ConversationKind::Direct,
            name: None,
            is_private: true,
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
            ..Default::default()
        };

        let participants = [user_a, user_b]
            .iter()
            .map(|&user_id| NewParticipant {
                id: self.ids.generate(),
                user_id,
                role: ParticipantRole::Member,
                status: ParticipantStatus::Member,
            })
            .collect::<Vec<_>>();

        match self
            .store
            .create_conversation(&conversation, &participants)
            .await
        {
            Ok(created) => Ok(created),
            Err(ChatError::Conflict(_)) => {
                // Lost the creation race; the winner's row is authoritative.
                self.store
                    .find_direct_conversation(user_a, user_b, tenant_id)
                    .await?
                    .ok_or_else(|| {
                        ChatError::Internal(
                            "Direct conversation vanished after conflict".into(),
                        )
                    })
            }
            Err(e) => Err(e),
        }
    }

    /// Create a group conversation. The name is required by convention.
    pub async fn create_group(
        &self,
        tenant_id: i64,
        owner_id: i64,
        name: &str,
        member_ids: &[i64],
    ) -> Result<Conversation, ChatError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ChatError::InvalidInput(
                "Group conversations require a name".into(),
            ));
        }

        let conversation = Conversation {
            id: self.ids.generate(),
            tenant_id,
            kind: ConversationKind::Group,
            name: Some(name.to_string()),
            is_private: false,
            created_at: Utc::now(),
            ..Default::default()
        };

        let mut participants = vec![NewParticipant {
            id: self.ids.generate(),
            user_id: owner_id,
            role: ParticipantRole::Owner,
            status: ParticipantStatus::Member,
        }];
        for &user_id in member_ids {
            if user_id == owner_id {
                continue;
            }
            participants.push(NewParticipant {
                id: self.ids.generate(),
                user_id,
                role: ParticipantRole::Member,
                status: ParticipantStatus::Member,
            });
        }

        self.store
            .create_conversation(&conversation, &participants)
            .await
    }

    /// Add users to a group conversation. Admin-only; direct conversations
    /// reject regardless of role.
    pub async fn add_participants(
        &self,
        conversation_id: i64,
        actor_id: i64,
        tenant_id: i64,
        user_ids: &[i64],
    ) -> Result<(), ChatError> {
        self.check_group_admin(conversation_id, actor_id, tenant_id)
            .await?;

        let participants: Vec<NewParticipant> = user_ids
            .iter()
            .map(|&user_id| NewParticipant {
                id: self.ids.generate(),
                user_id,
                role: ParticipantRole::Member,
                status: ParticipantStatus::Member,
            })
            .collect();

        self.store
            .add_participants(conversation_id, &participants)
            .await
    }

    /// Remove users from a group conversation by marking their status,
    /// keeping the rows for audit.
    pub async fn remove_participants(
        &self,
        conversation_id: i64,
        actor_id: i64,
        tenant_id: i64,
        user_ids: &[i64],
    ) -> Result<(), ChatError> {
        self.check_group_admin(conversation_id, actor_id, tenant_id)
            .await?;

        for &user_id in user_ids {
            self.store
                .set_participant_status(conversation_id, user_id, ParticipantStatus::Left)
                .await?;
        }
        Ok(())
    }

    /// Rename a group conversation. Admin-only.
    pub async fn rename(
        &self,
        conversation_id: i64,
        actor_id: i64,
        tenant_id: i64,
        name: &str,
    ) -> Result<(), ChatError> {
        self.check_group_admin(conversation_id, actor_id, tenant_id)
            .await?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ChatError::InvalidInput("Name must not be empty".into()));
        }
        self.store.rename_conversation(conversation_id, name).await
    }

    /// Toggle privacy on a group conversation. Admin-only.
    pub async fn set_privacy(
        &self,
        conversation_id: i64,
        actor_id: i64,
        tenant_id: i64,
        is_private: bool,
    ) -> Result<(), ChatError> {
        self.check_group_admin(conversation_id, actor_id, tenant_id)
            .await?;
        self.store
            .set_conversation_privacy(conversation_id, is_private)
            .await
    }

    /// The shared error ladder for group-only admin operations: NotFound →
    /// InvalidOperation (direct) → Forbidden (non-admin).
    async fn check_group_admin(
        &self,
        conversation_id: i64,
        actor_id: i64,
        tenant_id: i64,
    ) -> Result<(), ChatError> {
        let conversation = self
            .store
            .find_conversation(conversation_id)
            .await?
            .filter(|c| c.tenant_id == tenant_id && c.deleted_at.is_none())
            .ok_or_else(|| ChatError::NotFound("Conversation not found".into()))?;

        if conversation.kind == ConversationKind::Direct {
            return Err(ChatError::InvalidOperation(
                "Direct conversations cannot be modified this way".into(),
            ));
        }

        if !self.access.is_admin(conversation_id, actor_id).await {
            return Err(ChatError::Forbidden(
                "Only owners and admins may modify the conversation".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::memory::MemoryChatStore;

    const TENANT: i64 = 7;

    fn service() -> (Arc<MemoryChatStore>, ConversationService<MemoryChatStore>) {
        let store = Arc::new(MemoryChatStore::new());
        let ids = Arc::new(SnowflakeGenerator::new(2, 0));
        (store.clone(), ConversationService::new(store, ids))
    }

    #[tokio::test]
    async fn direct_creation_is_idempotent() {
        let (_, svc) = service();
        let first = svc.create_or_get_direct(TENANT, 1, 2).await.unwrap();
        let second = svc.create_or_get_direct(TENANT, 2, 1).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.kind, ConversationKind::Direct);
        assert!(first.is_private);
    }

    #[tokio::test]
    async fn direct_creation_has_two_member_participants() {
        let (store, svc) = service();
        let conv = svc.create_or_get_direct(TENANT, 1, 2).await.unwrap();
        let participants = store.find_participants(conv.id).await.unwrap();
        assert_eq!(participants.len(), 2);
        assert!(participants
            .iter()
            .all(|p| p.role == ParticipantRole::Member
                && p.status == ParticipantStatus::Member));
    }

    #[tokio::test]
    async fn concurrent_direct_creation_yields_one_conversation() {
        let (_, svc) = service();
        let svc = Arc::new(svc);
        let a = {
            let svc = svc.clone();
            tokio::spawn(async move { svc.create_or_get_direct(TENANT, 5, 6).await })
        };
        let b = {
            let svc = svc.clone();
            tokio::spawn(async move { svc.create_or_get_direct(TENANT, 6, 5).await })
        };
        let (a, b) = (a.await.unwrap().unwrap(), b.await.unwrap().unwrap());
        assert_eq!(a.id, b.id);
    }

    #[tokio::test]
    async fn direct_rejects_same_user_pair() {
        let (_, svc) = service();
        let err = svc.create_or_get_direct(TENANT, 1, 1).await.unwrap_err();
        assert!(matches!(err, ChatError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn group_requires_name() {
        let (_, svc) = service();
        let err = svc.create_group(TENANT, 1, "  ", &[2]).await.unwrap_err();
        assert!(matches!(err, ChatError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn add_participant_to_direct_is_invalid_operation_for_any_role() {
        let (_, svc) = service();
        let conv = svc.create_or_get_direct(TENANT, 1, 2).await.unwrap();
        // Both participants are plain members, but the direct check fires
        // before the role check, so the code must be InvalidOperation.
        let err = svc
            .add_participants(conv.id, 1, TENANT, &[3])
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn non_admin_member_cannot_add_participants() {
        let (_, svc) = service();
        let conv = svc.create_group(TENANT, 1, "team", &[2]).await.unwrap();
        let err = svc
            .add_participants(conv.id, 2, TENANT, &[3])
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Forbidden(_)));
    }

    #[tokio::test]
    async fn owner_can_add_and_remove_participants() {
        let (store, svc) = service();
        let conv = svc.create_group(TENANT, 1, "team", &[2]).await.unwrap();

        svc.add_participants(conv.id, 1, TENANT, &[3]).await.unwrap();
        let active: Vec<_> = store
            .find_participants(conv.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|p| p.status == ParticipantStatus::Member)
            .collect();
        assert_eq!(active.len(), 3);

        svc.remove_participants(conv.id, 1, TENANT, &[3])
            .await
            .unwrap();
        let removed = store.find_participant(conv.id, 3).await.unwrap().unwrap();
        assert_eq!(removed.status, ParticipantStatus::Left);
    }

    #[tokio::test]
    async fn removed_participant_can_be_re_added() {
        let (store, svc) = service();
        let conv = svc.create_group(TENANT, 1, "team", &[2, 3]).await.unwrap();
        svc.remove_participants(conv.id, 1, TENANT, &[3])
            .await
            .unwrap();
        svc.add_participants(conv.id, 1, TENANT, &[3]).await.unwrap();

        let p = store.find_participant(conv.id, 3).await.unwrap().unwrap();
        assert_eq!(p.status, ParticipantStatus::Member);
        // Still exactly one row per (user, conversation).
        let rows = store
            .find_participants(conv.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|p| p.user_id == 3)
            .count();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn rename_is_admin_only_and_rejects_empty_names() {
        let (store, svc) = service();
        let conv = svc.create_group(TENANT, 1, "old", &[2]).await.unwrap();

        let err = svc.rename(conv.id, 2, TENANT, "new").await.unwrap_err();
        assert!(matches!(err, ChatError::Forbidden(_)));

        let err = svc.rename(conv.id, 1, TENANT, "   ").await.unwrap_err();
        assert!(matches!(err, ChatError::InvalidInput(_)));

        svc.rename(conv.id, 1, TENANT, "new").await.unwrap();
        let conv = store.find_conversation(conv.id).await.unwrap().unwrap();
        assert_eq!(conv.name.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn owner_can_toggle_privacy() {
        let (store, svc) = service();
        let conv = svc.create_group(TENANT, 1, "team", &[2]).await.unwrap();
        assert!(!conv.is_private);

        svc.set_privacy(conv.id, 1, TENANT, true).await.unwrap();
        let conv = store.find_conversation(conv.id).await.unwrap().unwrap();
        assert!(conv.is_private);

        let err = svc
            .set_privacy(conv.id, 2, TENANT, false)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Forbidden(_)));
    }

    #[tokio::test]
    async fn unknown_conversation_is_not_found() {
        let (_, svc) = service();
        let err = svc
            .add_participants(999, 1, TENANT, &[3])
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
    }
}
