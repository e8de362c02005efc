//! crates/school_chat_core/src/chats.rs
//!
//! The chat directory: resolves an unordered pair of participants to its single
//! private chat, creating it on first contact.

use chrono::Utc;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::domain::{Chat, Participant, ParticipantPair};
use crate::ports::{ChatStore, PortError, PortResult};

#[derive(Clone)]
pub struct ChatDirectory {
    store: Arc<dyn ChatStore>,
}

impl ChatDirectory {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    pub async fn get_or_create_chat(&self, a: Participant, b: Participant) -> PortResult<Chat> {
        let pair = ParticipantPair::new(a, b)
            .ok_or_else(|| PortError::Validation("cannot chat with yourself".to_string()))?;
        let chat = self.store.get_or_create_chat(&pair, Utc::now()).await?;
        debug!(chat_id = %chat.id, pair = %pair.key(), "resolved private chat");
        Ok(chat)
    }

    pub async fn get_chat(&self, chat_id: Uuid) -> PortResult<Chat> {
        self.store
            .get_chat(chat_id)
            .await?
            .ok_or_else(|| PortError::NotFound(format!("Chat {} not found", chat_id)))
    }

    /// Lookup only; never creates.
    pub async fn find_existing_chat(&self, user_a: Uuid, user_b: Uuid) -> PortResult<Option<Chat>> {
        if user_a == user_b {
            return Ok(None);
        }
        self.store.find_chat_between(user_a, user_b).await
    }

    pub async fn find_chats_for_user(&self, participant: Participant) -> PortResult<Vec<Chat>> {
        self.store.list_chats_for_participant(&participant).await
    }
}
