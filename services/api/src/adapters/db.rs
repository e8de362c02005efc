//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapters, the concrete implementations
//! of the `ChatStore` and `UserDirectory` ports from the core crate. They handle
//! all interactions with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use school_chat_core::domain::{
    Chat, ChatRole, ExternalUser, Message, MessagePage, Participant, ParticipantPair, SortOrder,
    UserKind,
};
use school_chat_core::ports::{ChatStore, PortError, PortResult, UserDirectory};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `ChatStore` and `UserDirectory` ports.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn parse_role(raw: &str) -> PortResult<ChatRole> {
    raw.parse::<ChatRole>().map_err(PortError::Unexpected)
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

/// Selects a chat together with both participants, ordered by position.
const CHAT_SELECT: &str = r#"
SELECT c.id, c.created_at, c.last_activity_at,
       p1.user_id AS first_user_id, p1.role AS first_role,
       p2.user_id AS second_user_id, p2.role AS second_role
FROM chats c
JOIN chat_participants p1 ON p1.chat_id = c.id AND p1.position = 0
JOIN chat_participants p2 ON p2.chat_id = c.id AND p2.position = 1
"#;

const MESSAGE_COLUMNS: &str = "m.id, m.chat_id, m.sender_id, m.sender_role, m.text, m.created_at";

#[derive(FromRow)]
struct ChatRecord {
    id: Uuid,
    created_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
    first_user_id: Uuid,
    first_role: String,
    second_user_id: Uuid,
    second_role: String,
}
impl ChatRecord {
    fn to_domain(self) -> PortResult<Chat> {
        let first = Participant::new(parse_role(&self.first_role)?, self.first_user_id);
        let second = Participant::new(parse_role(&self.second_role)?, self.second_user_id);
        let participants = ParticipantPair::new(first, second).ok_or_else(|| {
            PortError::Unexpected(format!("Chat {} has a single participant", self.id))
        })?;
        Ok(Chat {
            id: self.id,
            participants,
            created_at: self.created_at,
            last_activity_at: self.last_activity_at,
        })
    }
}

#[derive(FromRow)]
struct MessageRecord {
    id: Uuid,
    chat_id: Uuid,
    sender_id: Uuid,
    sender_role: String,
    text: String,
    created_at: DateTime<Utc>,
}
impl MessageRecord {
    fn to_domain(self) -> PortResult<Message> {
        Ok(Message {
            id: self.id,
            chat_id: self.chat_id,
            sender_id: self.sender_id,
            sender_role: parse_role(&self.sender_role)?,
            text: self.text,
            created_at: self.created_at,
        })
    }
}

/// A chat row joined with its newest message, if any.
#[derive(FromRow)]
struct LatestMessageRecord {
    #[sqlx(flatten)]
    chat: ChatRecord,
    message_id: Option<Uuid>,
    message_sender_id: Option<Uuid>,
    message_sender_role: Option<String>,
    message_text: Option<String>,
    message_created_at: Option<DateTime<Utc>>,
}
impl LatestMessageRecord {
    fn to_domain(self) -> PortResult<(Chat, Option<Message>)> {
        let chat = self.chat.to_domain()?;
        let message = match (
            self.message_id,
            self.message_sender_id,
            self.message_sender_role,
            self.message_text,
            self.message_created_at,
        ) {
            (Some(id), Some(sender_id), Some(role), Some(text), Some(created_at)) => Some(Message {
                id,
                chat_id: chat.id,
                sender_id,
                sender_role: parse_role(&role)?,
                text,
                created_at,
            }),
            _ => None,
        };
        Ok((chat, message))
    }
}

#[derive(FromRow)]
struct UserRecord {
    id: Uuid,
    name: String,
    kind: String,
}
impl UserRecord {
    fn to_domain(self) -> PortResult<ExternalUser> {
        Ok(ExternalUser {
            user_id: self.id,
            kind: self.kind.parse::<UserKind>().map_err(PortError::Unexpected)?,
            display_name: self.name,
        })
    }
}

fn chats_to_domain(records: Vec<ChatRecord>) -> PortResult<Vec<Chat>> {
    records.into_iter().map(ChatRecord::to_domain).collect()
}

fn messages_to_domain(records: Vec<MessageRecord>) -> PortResult<Vec<Message>> {
    records.into_iter().map(MessageRecord::to_domain).collect()
}

//=========================================================================================
// `ChatStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl ChatStore for DbAdapter {
    async fn get_or_create_chat(&self, pair: &ParticipantPair, now: DateTime<Utc>) -> PortResult<Chat> {
        let key = pair.key();
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        // The unique pair_key makes a concurrent inserter wait and then do nothing.
        let inserted: Option<(Uuid,)> = sqlx::query_as(
            "INSERT INTO chats (id, pair_key, created_at, last_activity_at) VALUES ($1, $2, $3, $3) \
             ON CONFLICT (pair_key) DO NOTHING RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(&key)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(unexpected)?;

        if let Some((chat_id,)) = inserted {
            for (position, participant) in [(0_i16, pair.first()), (1_i16, pair.second())] {
                sqlx::query(
                    "INSERT INTO chat_participants (chat_id, user_id, role, position) VALUES ($1, $2, $3, $4)",
                )
                .bind(chat_id)
                .bind(participant.user_id)
                .bind(participant.role.as_str())
                .bind(position)
                .execute(&mut *tx)
                .await
                .map_err(unexpected)?;
            }
        }
        tx.commit().await.map_err(unexpected)?;

        let record = sqlx::query_as::<_, ChatRecord>(&format!("{CHAT_SELECT} WHERE c.pair_key = $1"))
            .bind(&key)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::RowNotFound => PortError::NotFound(format!("Chat for {} not found", key)),
                _ => unexpected(e),
            })?;
        record.to_domain()
    }

    async fn get_chat(&self, chat_id: Uuid) -> PortResult<Option<Chat>> {
        let record = sqlx::query_as::<_, ChatRecord>(&format!("{CHAT_SELECT} WHERE c.id = $1"))
            .bind(chat_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?;
        record.map(ChatRecord::to_domain).transpose()
    }

    async fn find_chat_between(&self, user_a: Uuid, user_b: Uuid) -> PortResult<Option<Chat>> {
        let record = sqlx::query_as::<_, ChatRecord>(&format!(
            "{CHAT_SELECT} WHERE c.id IN ( \
                SELECT a.chat_id FROM chat_participants a \
                JOIN chat_participants b ON b.chat_id = a.chat_id \
                WHERE a.user_id = $1 AND b.user_id = $2) \
             ORDER BY c.last_activity_at DESC LIMIT 1"
        ))
        .bind(user_a)
        .bind(user_b)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        record.map(ChatRecord::to_domain).transpose()
    }

    async fn list_chats_for_participant(&self, participant: &Participant) -> PortResult<Vec<Chat>> {
        let records = sqlx::query_as::<_, ChatRecord>(&format!(
            "{CHAT_SELECT} WHERE EXISTS ( \
                SELECT 1 FROM chat_participants me \
                WHERE me.chat_id = c.id AND me.user_id = $1 AND me.role = $2) \
             ORDER BY c.last_activity_at DESC"
        ))
        .bind(participant.user_id)
        .bind(participant.role.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        chats_to_domain(records)
    }

    async fn is_member(&self, chat_id: Uuid, user_id: Uuid) -> PortResult<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM chat_participants WHERE chat_id = $1 AND user_id = $2)",
        )
        .bind(chat_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(exists)
    }

    async fn append_message(
        &self,
        chat_id: Uuid,
        sender: &Participant,
        text: &str,
        now: DateTime<Utc>,
    ) -> PortResult<Message> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        // Locking the chat row serializes appends to the same chat.
        let (last_activity_at,) =
            sqlx::query_as::<_, (DateTime<Utc>,)>("SELECT last_activity_at FROM chats WHERE id = $1 FOR UPDATE")
                .bind(chat_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(unexpected)?
                .ok_or_else(|| PortError::NotFound(format!("Chat {} not found", chat_id)))?;

        let created_at = now.max(last_activity_at);

        let record = sqlx::query_as::<_, MessageRecord>(
            "INSERT INTO messages (id, chat_id, sender_id, sender_role, text, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING id, chat_id, sender_id, sender_role, text, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(chat_id)
        .bind(sender.user_id)
        .bind(sender.role.as_str())
        .bind(text)
        .bind(created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(unexpected)?;

        sqlx::query("UPDATE chats SET last_activity_at = $2 WHERE id = $1")
            .bind(chat_id)
            .bind(record.created_at)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;

        tx.commit().await.map_err(unexpected)?;
        record.to_domain()
    }

    async fn list_messages(&self, chat_id: Uuid, page: &MessagePage) -> PortResult<Vec<Message>> {
        let direction = match page.order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        // LIMIT NULL reads everything.
        let records = sqlx::query_as::<_, MessageRecord>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.chat_id = $1 \
             ORDER BY m.created_at {direction}, m.seq {direction} LIMIT $2 OFFSET $3"
        ))
        .bind(chat_id)
        .bind(page.limit.map(|limit| limit as i64))
        .bind(page.offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        messages_to_domain(records)
    }

    async fn list_messages_for_participant(&self, participant: &Participant) -> PortResult<Vec<Message>> {
        let records = sqlx::query_as::<_, MessageRecord>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m \
             JOIN chat_participants me ON me.chat_id = m.chat_id \
             WHERE me.user_id = $1 AND me.role = $2 \
             ORDER BY m.created_at DESC, m.seq DESC"
        ))
        .bind(participant.user_id)
        .bind(participant.role.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        messages_to_domain(records)
    }

    async fn count_unread(&self, user_id: Uuid) -> PortResult<u64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM messages m \
             JOIN chat_participants me ON me.chat_id = m.chat_id \
             WHERE me.user_id = $1 AND m.sender_id <> $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(count.max(0) as u64)
    }

    async fn latest_messages(&self, user_id: Uuid) -> PortResult<Vec<(Chat, Option<Message>)>> {
        let records = sqlx::query_as::<_, LatestMessageRecord>(
            r#"
SELECT c.id, c.created_at, c.last_activity_at,
       p1.user_id AS first_user_id, p1.role AS first_role,
       p2.user_id AS second_user_id, p2.role AS second_role,
       lm.id AS message_id, lm.sender_id AS message_sender_id,
       lm.sender_role AS message_sender_role, lm.text AS message_text,
       lm.created_at AS message_created_at
FROM chats c
JOIN chat_participants p1 ON p1.chat_id = c.id AND p1.position = 0
JOIN chat_participants p2 ON p2.chat_id = c.id AND p2.position = 1
JOIN chat_participants me ON me.chat_id = c.id AND me.user_id = $1
LEFT JOIN LATERAL (
    SELECT m.id, m.sender_id, m.sender_role, m.text, m.created_at
    FROM messages m
    WHERE m.chat_id = c.id
    ORDER BY m.created_at DESC, m.seq DESC
    LIMIT 1
) lm ON TRUE
ORDER BY c.last_activity_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        records.into_iter().map(LatestMessageRecord::to_domain).collect()
    }
}

//=========================================================================================
// `UserDirectory` Trait Implementation
//=========================================================================================

#[async_trait]
impl UserDirectory for DbAdapter {
    async fn find_user(&self, user_id: Uuid) -> PortResult<Option<ExternalUser>> {
        let record = sqlx::query_as::<_, UserRecord>(
            r#"
SELECT id, name, 'student' AS kind FROM students WHERE id = $1
UNION ALL
SELECT id, name, role AS kind FROM teachers WHERE id = $1
LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        record.map(UserRecord::to_domain).transpose()
    }
}
