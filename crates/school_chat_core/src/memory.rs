//! crates/school_chat_core/src/memory.rs
//!
//! In-process implementations of the ports. Every chat and message write goes
//! through one mutex, which gives the same single-chat-per-pair guarantee the
//! database gets from its unique constraint.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{
    Chat, ExternalUser, Message, MessagePage, Participant, ParticipantPair, SortOrder,
};
use crate::ports::{ChatStore, PortError, PortResult, UserDirectory};

//=========================================================================================
// Chat Store
//=========================================================================================

#[derive(Default)]
struct MemoryState {
    chats: HashMap<Uuid, Chat>,
    by_pair: HashMap<String, Uuid>,
    /// Global append order; per chat this is also creation-time order.
    messages: Vec<Message>,
}

impl MemoryState {
    fn chats_of(&self, user_id: Uuid) -> Vec<Chat> {
        let mut chats: Vec<Chat> = self
            .chats
            .values()
            .filter(|chat| chat.has_member(user_id))
            .cloned()
            .collect();
        chats.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        chats
    }
}

#[derive(Default)]
pub struct InMemoryChatStore {
    state: Mutex<MemoryState>,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatStore for InMemoryChatStore {
    async fn get_or_create_chat(&self, pair: &ParticipantPair, now: DateTime<Utc>) -> PortResult<Chat> {
        let mut state = self.state.lock().await;
        let key = pair.key();
        if let Some(chat) = state.by_pair.get(&key).and_then(|id| state.chats.get(id)) {
            return Ok(chat.clone());
        }

        let chat = Chat {
            id: Uuid::new_v4(),
            participants: *pair,
            created_at: now,
            last_activity_at: now,
        };
        state.by_pair.insert(key, chat.id);
        state.chats.insert(chat.id, chat.clone());
        Ok(chat)
    }

    async fn get_chat(&self, chat_id: Uuid) -> PortResult<Option<Chat>> {
        let state = self.state.lock().await;
        Ok(state.chats.get(&chat_id).cloned())
    }

    async fn find_chat_between(&self, user_a: Uuid, user_b: Uuid) -> PortResult<Option<Chat>> {
        let state = self.state.lock().await;
        Ok(state
            .chats
            .values()
            .filter(|chat| chat.has_member(user_a) && chat.has_member(user_b))
            .max_by_key(|chat| chat.last_activity_at)
            .cloned())
    }

    async fn list_chats_for_participant(&self, participant: &Participant) -> PortResult<Vec<Chat>> {
        let state = self.state.lock().await;
        let chats = state
            .chats_of(participant.user_id)
            .into_iter()
            .filter(|chat| {
                chat.participants.first() == participant || chat.participants.second() == participant
            })
            .collect();
        Ok(chats)
    }

    async fn is_member(&self, chat_id: Uuid, user_id: Uuid) -> PortResult<bool> {
        let state = self.state.lock().await;
        Ok(state
            .chats
            .get(&chat_id)
            .is_some_and(|chat| chat.has_member(user_id)))
    }

    async fn append_message(
        &self,
        chat_id: Uuid,
        sender: &Participant,
        text: &str,
        now: DateTime<Utc>,
    ) -> PortResult<Message> {
        let mut state = self.state.lock().await;
        let chat = state
            .chats
            .get_mut(&chat_id)
            .ok_or_else(|| PortError::NotFound(format!("Chat {} not found", chat_id)))?;

        let created_at = now.max(chat.last_activity_at);
        chat.last_activity_at = created_at;

        let message = Message {
            id: Uuid::new_v4(),
            chat_id,
            sender_id: sender.user_id,
            sender_role: sender.role,
            text: text.to_string(),
            created_at,
        };
        state.messages.push(message.clone());
        Ok(message)
    }

    async fn list_messages(&self, chat_id: Uuid, page: &MessagePage) -> PortResult<Vec<Message>> {
        let state = self.state.lock().await;
        let mut messages: Vec<Message> = state
            .messages
            .iter()
            .filter(|message| message.chat_id == chat_id)
            .cloned()
            .collect();

        if page.order == SortOrder::Desc {
            messages.reverse();
        }

        let limit = page.limit.unwrap_or(usize::MAX);
        Ok(messages.into_iter().skip(page.offset).take(limit).collect())
    }

    async fn list_messages_for_participant(&self, participant: &Participant) -> PortResult<Vec<Message>> {
        let state = self.state.lock().await;
        let mut messages: Vec<Message> = state
            .messages
            .iter()
            .filter(|message| {
                state.chats.get(&message.chat_id).is_some_and(|chat| {
                    chat.participants.first() == participant
                        || chat.participants.second() == participant
                })
            })
            .cloned()
            .collect();

        // Stable sort keeps append order among equal timestamps, then reversed.
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        messages.reverse();
        Ok(messages)
    }

    async fn count_unread(&self, user_id: Uuid) -> PortResult<u64> {
        let state = self.state.lock().await;
        let count = state
            .messages
            .iter()
            .filter(|message| message.sender_id != user_id)
            .filter(|message| {
                state
                    .chats
                    .get(&message.chat_id)
                    .is_some_and(|chat| chat.has_member(user_id))
            })
            .count();
        Ok(count as u64)
    }

    async fn latest_messages(&self, user_id: Uuid) -> PortResult<Vec<(Chat, Option<Message>)>> {
        let state = self.state.lock().await;
        let rows = state
            .chats_of(user_id)
            .into_iter()
            .map(|chat| {
                let latest = state
                    .messages
                    .iter()
                    .rev()
                    .find(|message| message.chat_id == chat.id)
                    .cloned();
                (chat, latest)
            })
            .collect();
        Ok(rows)
    }
}

//=========================================================================================
// User Directory
//=========================================================================================

/// A fixed set of users, used by tests.
#[derive(Default)]
pub struct InMemoryUserDirectory {
    users: HashMap<Uuid, ExternalUser>,
}

impl InMemoryUserDirectory {
    pub fn new(users: impl IntoIterator<Item = ExternalUser>) -> Self {
        Self {
            users: users.into_iter().map(|user| (user.user_id, user)).collect(),
        }
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_user(&self, user_id: Uuid) -> PortResult<Option<ExternalUser>> {
        Ok(self.users.get(&user_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ChatRole;
    use chrono::Duration;
    use std::sync::Arc;

    fn pair() -> ParticipantPair {
        ParticipantPair::new(
            Participant::new(ChatRole::Student, Uuid::new_v4()),
            Participant::new(ChatRole::Teacher, Uuid::new_v4()),
        )
        .expect("pair")
    }

    #[tokio::test]
    async fn concurrent_first_contact_creates_one_chat() {
        let store = Arc::new(InMemoryChatStore::new());
        let pair = pair();

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.get_or_create_chat(&pair, Utc::now()).await })
            })
            .collect();

        let results = futures::future::join_all(tasks).await;
        let ids: std::collections::HashSet<Uuid> = results
            .into_iter()
            .map(|joined| joined.expect("join").expect("chat").id)
            .collect();
        assert_eq!(ids.len(), 1);
    }

    #[tokio::test]
    async fn append_never_moves_time_backwards() {
        let store = InMemoryChatStore::new();
        let pair = pair();
        let start = Utc::now();
        let chat = store.get_or_create_chat(&pair, start).await.expect("chat");

        let first = store
            .append_message(chat.id, pair.first(), "first", start + Duration::seconds(10))
            .await
            .expect("first");
        // A clock that jumps backwards must not reorder the log.
        let second = store
            .append_message(chat.id, pair.second(), "second", start)
            .await
            .expect("second");

        assert!(second.created_at >= first.created_at);
        let listed = store
            .list_messages(chat.id, &MessagePage::full())
            .await
            .expect("list");
        assert_eq!(listed, vec![first, second.clone()]);

        let chat = store.get_chat(chat.id).await.expect("get").expect("chat");
        assert_eq!(chat.last_activity_at, second.created_at);
    }

    #[tokio::test]
    async fn append_to_unknown_chat_is_not_found() {
        let store = InMemoryChatStore::new();
        let sender = Participant::new(ChatRole::Student, Uuid::new_v4());
        let err = store
            .append_message(Uuid::new_v4(), &sender, "hi", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::NotFound(_)));
    }
}
