//! crates/school_chat_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the chat core.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the concrete user store and chat storage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{Chat, ExternalUser, Message, MessagePage, Participant, ParticipantPair};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port and service operations.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Invalid input: {0}")]
    Validation(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// Read access to the external store of students, teachers and admins.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, user_id: Uuid) -> PortResult<Option<ExternalUser>>;
}

/// Storage for chats and their message logs.
#[async_trait]
pub trait ChatStore: Send + Sync {
    // --- Chats ---

    /// Returns the chat for `pair`, creating it with `now` as its creation time if absent.
    ///
    /// Implementations must guarantee a single chat per `pair.key()` even when called
    /// concurrently for the same pair.
    async fn get_or_create_chat(&self, pair: &ParticipantPair, now: DateTime<Utc>) -> PortResult<Chat>;

    async fn get_chat(&self, chat_id: Uuid) -> PortResult<Option<Chat>>;

    /// The most recently active chat between two users, regardless of roles.
    async fn find_chat_between(&self, user_a: Uuid, user_b: Uuid) -> PortResult<Option<Chat>>;

    /// All chats of `participant`, most recent activity first.
    async fn list_chats_for_participant(&self, participant: &Participant) -> PortResult<Vec<Chat>>;

    async fn is_member(&self, chat_id: Uuid, user_id: Uuid) -> PortResult<bool>;

    // --- Messages ---

    /// Appends a message and moves the chat's last activity to its creation time,
    /// as one write. `created_at` is `max(now, chat.last_activity_at)`.
    async fn append_message(
        &self,
        chat_id: Uuid,
        sender: &Participant,
        text: &str,
        now: DateTime<Utc>,
    ) -> PortResult<Message>;

    async fn list_messages(&self, chat_id: Uuid, page: &MessagePage) -> PortResult<Vec<Message>>;

    /// Every message across the participant's chats, newest first.
    async fn list_messages_for_participant(&self, participant: &Participant) -> PortResult<Vec<Message>>;

    /// Messages in the user's chats that the user did not send.
    async fn count_unread(&self, user_id: Uuid) -> PortResult<u64>;

    /// Each chat of the user paired with its newest message, most recent activity first.
    async fn latest_messages(&self, user_id: Uuid) -> PortResult<Vec<(Chat, Option<Message>)>>;
}
