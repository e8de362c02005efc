//! crates/school_chat_core/src/domain.rs
//!
//! Defines the pure, core data structures for private chat.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

//=========================================================================================
// User Kinds and Chat Roles
//=========================================================================================

/// The kind of an account as reported by the external user store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserKind {
    Student,
    Teacher,
    Admin,
}

impl UserKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserKind::Student => "student",
            UserKind::Teacher => "teacher",
            UserKind::Admin => "admin",
        }
    }
}

impl FromStr for UserKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "student" => Ok(UserKind::Student),
            "teacher" => Ok(UserKind::Teacher),
            "admin" => Ok(UserKind::Admin),
            other => Err(format!("unknown user kind '{other}'")),
        }
    }
}

impl fmt::Display for UserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The role a participant holds inside a private chat.
///
/// Only two roles exist here; admins appear as `Teacher`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChatRole {
    Student,
    Teacher,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::Student => "student",
            ChatRole::Teacher => "teacher",
        }
    }
}

impl FromStr for ChatRole {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "student" => Ok(ChatRole::Student),
            "teacher" => Ok(ChatRole::Teacher),
            other => Err(format!("unknown chat role '{other}'")),
        }
    }
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//=========================================================================================
// Participants
//=========================================================================================

/// A `(role, user id)` reference to one side of a chat.
///
/// Field order matters: the derived ordering sorts by user id first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Participant {
    pub user_id: Uuid,
    pub role: ChatRole,
}

impl Participant {
    pub fn new(role: ChatRole, user_id: Uuid) -> Self {
        Self { user_id, role }
    }
}

/// The unordered pair of participants identifying a private chat.
///
/// Construction sorts the two sides, so `new(a, b)` and `new(b, a)` are equal
/// and share the same `key()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParticipantPair {
    first: Participant,
    second: Participant,
}

impl ParticipantPair {
    /// Returns `None` when both sides are the same user.
    pub fn new(a: Participant, b: Participant) -> Option<Self> {
        if a.user_id == b.user_id {
            return None;
        }
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        Some(Self { first, second })
    }

    /// Canonical string used as the uniqueness key in storage.
    pub fn key(&self) -> String {
        format!(
            "{}:{}|{}:{}",
            self.first.role, self.first.user_id, self.second.role, self.second.user_id
        )
    }

    pub fn first(&self) -> &Participant {
        &self.first
    }

    pub fn second(&self) -> &Participant {
        &self.second
    }

    pub fn contains(&self, user_id: Uuid) -> bool {
        self.first.user_id == user_id || self.second.user_id == user_id
    }

    /// The side that is not `user_id`, if `user_id` is in the pair.
    pub fn counterpart_of(&self, user_id: Uuid) -> Option<&Participant> {
        if self.first.user_id == user_id {
            Some(&self.second)
        } else if self.second.user_id == user_id {
            Some(&self.first)
        } else {
            None
        }
    }
}

//=========================================================================================
// Chats and Messages
//=========================================================================================

/// A persistent private conversation between exactly two participants.
#[derive(Debug, Clone, PartialEq)]
pub struct Chat {
    pub id: Uuid,
    pub participants: ParticipantPair,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl Chat {
    pub fn has_member(&self, user_id: Uuid) -> bool {
        self.participants.contains(user_id)
    }
}

/// A single immutable message inside a chat.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub sender_id: Uuid,
    pub sender_role: ChatRole,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// A user record from the external user store.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalUser {
    pub user_id: Uuid,
    pub kind: UserKind,
    pub display_name: String,
}

/// One row of the conversation list: a counterpart and the latest message exchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationPreview {
    pub chat_id: Uuid,
    pub counterpart: Participant,
    pub counterpart_name: Option<String>,
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub last_activity_at: DateTime<Utc>,
}

//=========================================================================================
// Message Queries
//=========================================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(format!("order must be asc or desc, got '{other}'")),
        }
    }
}

/// Raw pagination input as supplied by a caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub order: SortOrder,
}

/// A clamped page request handed to the store. `limit: None` reads everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessagePage {
    pub limit: Option<usize>,
    pub offset: usize,
    pub order: SortOrder,
}

impl MessagePage {
    /// The full log in ascending order.
    pub fn full() -> Self {
        Self {
            limit: None,
            offset: 0,
            order: SortOrder::Asc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_is_order_independent() {
        let student = Participant::new(ChatRole::Student, Uuid::new_v4());
        let teacher = Participant::new(ChatRole::Teacher, Uuid::new_v4());

        let forward = ParticipantPair::new(student, teacher).expect("pair");
        let backward = ParticipantPair::new(teacher, student).expect("pair");

        assert_eq!(forward, backward);
        assert_eq!(forward.key(), backward.key());
    }

    #[test]
    fn pair_rejects_same_user() {
        let id = Uuid::new_v4();
        let as_student = Participant::new(ChatRole::Student, id);
        let as_teacher = Participant::new(ChatRole::Teacher, id);
        assert!(ParticipantPair::new(as_student, as_teacher).is_none());
    }

    #[test]
    fn counterpart_lookup() {
        let a = Participant::new(ChatRole::Student, Uuid::new_v4());
        let b = Participant::new(ChatRole::Teacher, Uuid::new_v4());
        let pair = ParticipantPair::new(a, b).expect("pair");

        assert_eq!(pair.counterpart_of(a.user_id), Some(&b));
        assert_eq!(pair.counterpart_of(b.user_id), Some(&a));
        assert_eq!(pair.counterpart_of(Uuid::new_v4()), None);
    }

    #[test]
    fn kinds_parse_case_insensitively() {
        assert_eq!("ADMIN".parse::<UserKind>(), Ok(UserKind::Admin));
        assert_eq!(" Teacher ".parse::<ChatRole>(), Ok(ChatRole::Teacher));
        assert!("admin".parse::<ChatRole>().is_err());
        assert!("parent".parse::<UserKind>().is_err());
    }
}
