//! Access Control
//!
//! Resolves whether a user may read/write a conversation. Read-only checks
//! fail closed: a store error or tenant mismatch yields `false`, never an
//! error past this boundary.

use std::sync::Arc;

use crate::domain::entities::{has_admin_role, is_active, is_active_member};
use crate::domain::ChatStore;

pub struct AccessControl<S: ChatStore> {
    store: Arc<S>,
}

impl<S: ChatStore> AccessControl<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// True iff the user is an active member of a live conversation in the
    /// caller's tenant.
    pub async fn can_access(&self, conversation_id: i64, user_id: i64, tenant_id: i64) -> bool {
        let conversation = match self.store.find_conversation(conversation_id).await {
            Ok(Some(c)) => c,
            Ok(None) => return false,
            Err(e) => {
                tracing::warn!(
                    conversation_id,
                    user_id,
                    error = %e,
                    "Access check failed on conversation lookup, denying"
                );
                return false;
            }
        };

        if conversation.tenant_id != tenant_id || !is_active(&conversation) {
            return false;
        }

        match self.store.find_participant(conversation_id, user_id).await {
            Ok(Some(p)) => is_active_member(&p),
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(
                    conversation_id,
                    user_id,
                    error = %e,
                    "Access check failed on participant lookup, denying"
                );
                false
            }
        }
    }

    /// True iff the user's role in the conversation is Admin or Owner.
    pub async fn is_admin(&self, conversation_id: i64, user_id: i64) -> bool {
        match self.store.find_participant(conversation_id, user_id).await {
            Ok(Some(p)) => is_active_member(&p) && has_admin_role(&p),
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(
                    conversation_id,
                    user_id,
                    error = %e,
                    "Admin check failed, denying"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::services::conversation_service::ConversationService;
    use crate::infrastructure::memory::MemoryChatStore;
    use crate::shared::snowflake::SnowflakeGenerator;

    const TENANT: i64 = 1;

    fn fixture() -> (Arc<MemoryChatStore>, ConversationService<MemoryChatStore>) {
        let store = Arc::new(MemoryChatStore::new());
        let ids = Arc::new(SnowflakeGenerator::new(1, 0));
        let service = ConversationService::new(store.clone(), ids);
        (store, service)
    }

    #[tokio::test]
    async fn member_of_matching_tenant_can_access() {
        let (store, conversations) = fixture();
        let access = AccessControl::new(store);
        let conv = conversations
            .create_or_get_direct(TENANT, 10, 20)
            .await
            .unwrap();

        assert!(access.can_access(conv.id, 10, TENANT).await);
        assert!(access.can_access(conv.id, 20, TENANT).await);
    }

    #[tokio::test]
    async fn tenant_mismatch_fails_closed() {
        let (store, conversations) = fixture();
        let access = AccessControl::new(store);
        let conv = conversations
            .create_or_get_direct(TENANT, 10, 20)
            .await
            .unwrap();

        assert!(!access.can_access(conv.id, 10, TENANT + 1).await);
    }

    #[tokio::test]
    async fn non_participant_is_denied() {
        let (store, conversations) = fixture();
        let access = AccessControl::new(store);
        let conv = conversations
            .create_or_get_direct(TENANT, 10, 20)
            .await
            .unwrap();

        assert!(!access.can_access(conv.id, 99, TENANT).await);
        assert!(!access.can_access(conv.id + 1, 10, TENANT).await);
    }

    #[tokio::test]
    async fn owner_and_admin_pass_admin_check() {
        let (store, conversations) = fixture();
        let access = AccessControl::new(store.clone());
        let conv = conversations
            .create_group(TENANT, 1, "ops", &[2, 3])
            .await
            .unwrap();

        assert!(access.is_admin(conv.id, 1).await); // owner
        assert!(!access.is_admin(conv.id, 2).await); // plain member
        assert!(!access.is_admin(conv.id, 42).await); // stranger
    }
}
