//! crates/school_chat_core/src/messages.rs
//!
//! The message log: appending to a chat, ordered reads, and the per-user
//! aggregations behind the conversation list and unread badge.

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{ConversationPreview, Message, MessagePage, MessageQuery, Participant};
use crate::identity::IdentityResolver;
use crate::ports::{ChatStore, PortError, PortResult};

pub const MAX_PAGE_SIZE: usize = 100;
pub const MAX_MESSAGE_CHARS: usize = 4_000;

#[derive(Clone)]
pub struct MessageLog {
    store: Arc<dyn ChatStore>,
    identity: IdentityResolver,
}

impl MessageLog {
    pub fn new(store: Arc<dyn ChatStore>, identity: IdentityResolver) -> Self {
        Self { store, identity }
    }

    pub async fn append(&self, chat_id: Uuid, sender: Participant, text: &str) -> PortResult<Message> {
        let text = validate_message_text(text)?;
        if !self.store.is_member(chat_id, sender.user_id).await? {
            return Err(PortError::Forbidden("Not allowed in chat".to_string()));
        }
        self.store
            .append_message(chat_id, &sender, text, Utc::now())
            .await
    }

    pub async fn list(&self, chat_id: Uuid, query: MessageQuery) -> PortResult<Vec<Message>> {
        self.store.list_messages(chat_id, &build_message_page(query)).await
    }

    /// Every message of the chat, oldest first.
    pub async fn full_history(&self, chat_id: Uuid) -> PortResult<Vec<Message>> {
        self.store.list_messages(chat_id, &MessagePage::full()).await
    }

    pub async fn list_for_user(&self, participant: Participant) -> PortResult<Vec<Message>> {
        self.store.list_messages_for_participant(&participant).await
    }

    pub async fn is_member(&self, chat_id: Uuid, user_id: Uuid) -> PortResult<bool> {
        self.store.is_member(chat_id, user_id).await
    }

    pub async fn unread_count(&self, user_id: Uuid) -> PortResult<u64> {
        self.store.count_unread(user_id).await
    }

    /// One row per counterpart with the newest message exchanged.
    pub async fn last_messages(&self, user_id: Uuid) -> PortResult<Vec<ConversationPreview>> {
        let rows = self.store.latest_messages(user_id).await?;
        let mut previews = Vec::with_capacity(rows.len());

        for (chat, latest) in rows {
            let Some(counterpart) = chat.participants.counterpart_of(user_id).copied() else {
                continue;
            };
            let counterpart_name = match self.identity.resolve_user(counterpart.user_id).await {
                Ok(user) => Some(user.display_name),
                Err(PortError::NotFound(_)) => None,
                Err(e) => return Err(e),
            };
            previews.push(ConversationPreview {
                chat_id: chat.id,
                counterpart,
                counterpart_name,
                last_message_at: latest.as_ref().map(|m| m.created_at),
                last_message: latest.map(|m| m.text),
                last_activity_at: chat.last_activity_at,
            });
        }

        Ok(previews)
    }
}

/// Trims the text and enforces the non-empty and length rules.
pub fn validate_message_text(text: &str) -> PortResult<&str> {
    let text = text.trim();
    if text.is_empty() {
        return Err(PortError::Validation("message content is required".to_string()));
    }
    if text.chars().count() > MAX_MESSAGE_CHARS {
        return Err(PortError::Validation(format!(
            "message exceeds max length of {MAX_MESSAGE_CHARS}"
        )));
    }
    Ok(text)
}

pub fn build_message_page(query: MessageQuery) -> MessagePage {
    let limit = query
        .limit
        .map(|limit| limit.clamp(1, MAX_PAGE_SIZE as i64) as usize)
        .unwrap_or(MAX_PAGE_SIZE);
    MessagePage {
        limit: Some(limit),
        offset: query.offset.unwrap_or(0).max(0) as usize,
        order: query.order,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chats::ChatDirectory;
    use crate::domain::{ChatRole, ExternalUser, SortOrder, UserKind};
    use crate::memory::{InMemoryChatStore, InMemoryUserDirectory};

    struct Fixture {
        chats: ChatDirectory,
        log: MessageLog,
        student: Participant,
        teacher: Participant,
    }

    fn fixture() -> Fixture {
        let student = Participant::new(ChatRole::Student, Uuid::new_v4());
        let teacher = Participant::new(ChatRole::Teacher, Uuid::new_v4());
        let users = InMemoryUserDirectory::new([
            ExternalUser {
                user_id: student.user_id,
                kind: UserKind::Student,
                display_name: "Sam Student".to_string(),
            },
            ExternalUser {
                user_id: teacher.user_id,
                kind: UserKind::Teacher,
                display_name: "Tess Teacher".to_string(),
            },
        ]);
        let store: Arc<dyn ChatStore> = Arc::new(InMemoryChatStore::new());
        let identity = IdentityResolver::new(Arc::new(users));
        Fixture {
            chats: ChatDirectory::new(store.clone()),
            log: MessageLog::new(store, identity),
            student,
            teacher,
        }
    }

    #[tokio::test]
    async fn last_activity_tracks_newest_message() {
        let f = fixture();
        let chat = f.chats.get_or_create_chat(f.student, f.teacher).await.unwrap();

        f.log.append(chat.id, f.student, "hello").await.unwrap();
        let reply = f.log.append(chat.id, f.teacher, "  hi there  ").await.unwrap();

        assert_eq!(reply.text, "hi there");
        let chat = f.chats.get_chat(chat.id).await.unwrap();
        assert_eq!(chat.last_activity_at, reply.created_at);
    }

    #[tokio::test]
    async fn whitespace_message_is_rejected_and_nothing_changes() {
        let f = fixture();
        let chat = f.chats.get_or_create_chat(f.student, f.teacher).await.unwrap();

        let err = f.log.append(chat.id, f.student, "   ").await.unwrap_err();
        assert!(matches!(err, PortError::Validation(_)));

        assert!(f.log.full_history(chat.id).await.unwrap().is_empty());
        let unchanged = f.chats.get_chat(chat.id).await.unwrap();
        assert_eq!(unchanged.last_activity_at, chat.last_activity_at);
    }

    #[tokio::test]
    async fn outsider_cannot_append() {
        let f = fixture();
        let chat = f.chats.get_or_create_chat(f.student, f.teacher).await.unwrap();
        let outsider = Participant::new(ChatRole::Student, Uuid::new_v4());

        let err = f.log.append(chat.id, outsider, "psst").await.unwrap_err();
        assert!(matches!(err, PortError::Forbidden(_)));
        assert!(!f.log.is_member(chat.id, outsider.user_id).await.unwrap());
        assert!(f.log.is_member(chat.id, f.teacher.user_id).await.unwrap());
    }

    #[tokio::test]
    async fn ascending_history_is_time_ordered_and_pages_work() {
        let f = fixture();
        let chat = f.chats.get_or_create_chat(f.student, f.teacher).await.unwrap();
        for i in 0..5 {
            f.log.append(chat.id, f.student, &format!("m{i}")).await.unwrap();
        }

        let history = f.log.full_history(chat.id).await.unwrap();
        assert!(history.windows(2).all(|w| w[0].created_at <= w[1].created_at));
        assert_eq!(history.first().unwrap().text, "m0");

        let newest_two = f
            .log
            .list(
                chat.id,
                MessageQuery {
                    limit: Some(2),
                    offset: None,
                    order: SortOrder::Desc,
                },
            )
            .await
            .unwrap();
        let texts: Vec<_> = newest_two.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["m4", "m3"]);

        let skipped = f
            .log
            .list(
                chat.id,
                MessageQuery {
                    limit: Some(10),
                    offset: Some(3),
                    order: SortOrder::Asc,
                },
            )
            .await
            .unwrap();
        assert_eq!(skipped.len(), 2);
    }

    #[tokio::test]
    async fn unread_and_previews() {
        let f = fixture();
        let chat = f.chats.get_or_create_chat(f.student, f.teacher).await.unwrap();
        f.log.append(chat.id, f.teacher, "homework due").await.unwrap();
        f.log.append(chat.id, f.teacher, "tomorrow").await.unwrap();
        f.log.append(chat.id, f.student, "ok").await.unwrap();

        assert_eq!(f.log.unread_count(f.student.user_id).await.unwrap(), 2);
        assert_eq!(f.log.unread_count(f.teacher.user_id).await.unwrap(), 1);

        let previews = f.log.last_messages(f.student.user_id).await.unwrap();
        assert_eq!(previews.len(), 1);
        assert_eq!(previews[0].counterpart, f.teacher);
        assert_eq!(previews[0].counterpart_name.as_deref(), Some("Tess Teacher"));
        assert_eq!(previews[0].last_message.as_deref(), Some("ok"));

        let all = f.log.list_for_user(f.student).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].created_at >= w[1].created_at));
        assert_eq!(all[0].text, "ok");
    }

    #[test]
    fn page_is_clamped() {
        let page = build_message_page(MessageQuery {
            limit: Some(10_000),
            offset: Some(-5),
            order: SortOrder::Asc,
        });
        assert_eq!(page.limit, Some(MAX_PAGE_SIZE));
        assert_eq!(page.offset, 0);

        let page = build_message_page(MessageQuery {
            limit: Some(0),
            ..Default::default()
        });
        assert_eq!(page.limit, Some(1));
    }

    #[test]
    fn overlong_message_is_rejected() {
        assert!(validate_message_text(&"x".repeat(MAX_MESSAGE_CHARS + 1)).is_err());
        assert_eq!(validate_message_text(" hi ").unwrap(), "hi");
    }
}
