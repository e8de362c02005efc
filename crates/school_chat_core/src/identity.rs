//! crates/school_chat_core/src/identity.rs
//!
//! Classifies users for chat purposes. This is the only place where external
//! user kinds are mapped onto chat roles.

use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{ChatRole, ExternalUser, UserKind};
use crate::ports::{PortError, PortResult, UserDirectory};

#[derive(Clone)]
pub struct IdentityResolver {
    users: Arc<dyn UserDirectory>,
}

impl IdentityResolver {
    pub fn new(users: Arc<dyn UserDirectory>) -> Self {
        Self { users }
    }

    pub async fn resolve_user(&self, user_id: Uuid) -> PortResult<ExternalUser> {
        self.users
            .find_user(user_id)
            .await?
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))
    }

    /// The chat role of an existing user. Admins chat as teachers.
    pub async fn resolve_role(&self, user_id: Uuid) -> PortResult<ChatRole> {
        let user = self.resolve_user(user_id).await?;
        Ok(Self::participant_role(user.kind))
    }

    /// Role used when a user is the counterpart of a chat.
    pub fn participant_role(kind: UserKind) -> ChatRole {
        match kind {
            UserKind::Student => ChatRole::Student,
            UserKind::Teacher | UserKind::Admin => ChatRole::Teacher,
        }
    }

    /// Role of a caller starting a direct conversation. Admins may not initiate.
    pub fn initiator_role(kind: UserKind) -> PortResult<ChatRole> {
        match kind {
            UserKind::Student => Ok(ChatRole::Student),
            UserKind::Teacher => Ok(ChatRole::Teacher),
            UserKind::Admin => Err(PortError::Forbidden(
                "admins cannot initiate direct chat".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryUserDirectory;

    fn user(kind: UserKind) -> ExternalUser {
        ExternalUser {
            user_id: Uuid::new_v4(),
            kind,
            display_name: format!("{kind} user"),
        }
    }

    #[tokio::test]
    async fn admin_resolves_as_teacher() {
        let admin = user(UserKind::Admin);
        let student = user(UserKind::Student);
        let resolver = IdentityResolver::new(Arc::new(InMemoryUserDirectory::new([
            admin.clone(),
            student.clone(),
        ])));

        assert_eq!(resolver.resolve_role(admin.user_id).await.unwrap(), ChatRole::Teacher);
        assert_eq!(resolver.resolve_role(student.user_id).await.unwrap(), ChatRole::Student);
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let resolver = IdentityResolver::new(Arc::new(InMemoryUserDirectory::default()));
        let err = resolver.resolve_role(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, PortError::NotFound(_)));
    }

    #[test]
    fn admins_cannot_initiate() {
        assert!(matches!(
            IdentityResolver::initiator_role(UserKind::Admin),
            Err(PortError::Forbidden(_))
        ));
        assert_eq!(
            IdentityResolver::initiator_role(UserKind::Teacher).unwrap(),
            ChatRole::Teacher
        );
    }
}
