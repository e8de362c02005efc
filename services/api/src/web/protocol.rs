//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket event protocol between chat clients and the API server,
//! and the JSON shapes shared with the REST endpoints.

use chrono::{DateTime, Utc};
use school_chat_core::{Chat, ConversationPreview, Message};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

//=========================================================================================
// Shared Payloads
//=========================================================================================

/// A single chat message as seen by clients.
#[derive(Serialize, Debug, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MessageDto {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub sender_id: Uuid,
    /// `student` or `teacher`.
    pub sender_role: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl From<&Message> for MessageDto {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id,
            chat_id: message.chat_id,
            sender_id: message.sender_id,
            sender_role: message.sender_role.as_str().to_string(),
            text: message.text.clone(),
            created_at: message.created_at,
        }
    }
}

pub fn message_dtos(messages: &[Message]) -> Vec<MessageDto> {
    messages.iter().map(MessageDto::from).collect()
}

#[derive(Serialize, Debug, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantDto {
    pub user_id: Uuid,
    pub role: String,
}

/// A private chat between exactly two participants.
#[derive(Serialize, Debug, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatDto {
    pub id: Uuid,
    pub participants: Vec<ParticipantDto>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl From<&Chat> for ChatDto {
    fn from(chat: &Chat) -> Self {
        let participants = [chat.participants.first(), chat.participants.second()]
            .into_iter()
            .map(|p| ParticipantDto {
                user_id: p.user_id,
                role: p.role.as_str().to_string(),
            })
            .collect();
        Self {
            id: chat.id,
            participants,
            created_at: chat.created_at,
            last_activity_at: chat.last_activity_at,
        }
    }
}

/// One row of the conversation list.
#[derive(Serialize, Debug, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPreviewDto {
    pub chat_id: Uuid,
    pub user_id: Uuid,
    pub user_role: String,
    pub user_name: Option<String>,
    pub last_message: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub last_activity_at: DateTime<Utc>,
}

impl From<&ConversationPreview> for ConversationPreviewDto {
    fn from(preview: &ConversationPreview) -> Self {
        Self {
            chat_id: preview.chat_id,
            user_id: preview.counterpart.user_id,
            user_role: preview.counterpart.role.as_str().to_string(),
            user_name: preview.counterpart_name.clone(),
            last_message: preview.last_message.clone(),
            last_message_at: preview.last_message_at,
            last_activity_at: preview.last_activity_at,
        }
    }
}

//=========================================================================================
// Frames Sent FROM the Client TO the Server
//=========================================================================================

/// The envelope of every text frame a client sends.
///
/// `data` is kept raw until the event name is known.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ClientFrame {
    pub event: String,
    #[serde(default)]
    pub ack_id: Option<u64>,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRequest {
    #[serde(default)]
    pub chat_id: Option<Uuid>,
    #[serde(default)]
    pub user_id: Option<Uuid>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub to_user_id: Uuid,
    pub content: String,
    #[serde(default)]
    pub temp_id: Option<String>,
}

/// The events a client can raise.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    GetMessageHistory(HistoryRequest),
    SendMessage(SendMessageRequest),
}

/// Why a frame could not be turned into a [`ClientEvent`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    #[error("Unknown event")]
    UnknownEvent,
    #[error("Invalid payload")]
    InvalidPayload,
}

impl ClientEvent {
    pub fn from_frame(frame: ClientFrame) -> Result<Self, EventError> {
        match frame.event.as_str() {
            "getMessageHistory" => serde_json::from_value(frame.data)
                .map(ClientEvent::GetMessageHistory)
                .map_err(|_| EventError::InvalidPayload),
            "sendMessage" => serde_json::from_value(frame.data)
                .map(ClientEvent::SendMessage)
                .map_err(|_| EventError::InvalidPayload),
            _ => Err(EventError::UnknownEvent),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::GetMessageHistory(_) => "getMessageHistory",
            ClientEvent::SendMessage(_) => "sendMessage",
        }
    }
}

//=========================================================================================
// Frames Sent FROM the Server TO the Client
//=========================================================================================

/// Everything the server pushes down a connection.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Reply to a client event that carried an `ackId`.
    Ack {
        #[serde(rename = "ackId")]
        ack_id: u64,
        data: Ack,
    },

    /// A newly appended message, pushed to every device of both participants.
    Message { data: MessageEvent },

    /// The history of a chat, pushed after a `getMessageHistory` by chat id.
    MessageHistory { data: MessageHistoryEvent },
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageEvent {
    #[serde(flatten)]
    pub message: MessageDto,
    pub from_current_user: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageHistoryEvent {
    pub chat_id: Uuid,
    pub messages: Vec<MessageDto>,
}

/// The outcome of a client event.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Ack {
    Ok(AckBody),
    Error { error: String },
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AckBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<MessageDto>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<MessageDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
}

impl Ack {
    pub fn error(message: impl Into<String>) -> Self {
        Ack::Error {
            error: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Ack::Ok(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(value: serde_json::Value) -> ClientFrame {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn parses_send_message_with_optional_temp_id() {
        let to = Uuid::new_v4();
        let event = ClientEvent::from_frame(frame(json!({
            "event": "sendMessage",
            "ackId": 4,
            "data": { "toUserId": to, "content": "hi" }
        })))
        .unwrap();
        assert_eq!(
            event,
            ClientEvent::SendMessage(SendMessageRequest {
                to_user_id: to,
                content: "hi".into(),
                temp_id: None,
            })
        );
    }

    #[test]
    fn history_request_accepts_empty_payload() {
        let event = ClientEvent::from_frame(frame(json!({
            "event": "getMessageHistory",
            "data": {}
        })))
        .unwrap();
        assert_eq!(
            event,
            ClientEvent::GetMessageHistory(HistoryRequest {
                chat_id: None,
                user_id: None,
            })
        );
    }

    #[test]
    fn rejects_unknown_events_and_bad_payloads() {
        let unknown = ClientEvent::from_frame(frame(json!({ "event": "typing" })));
        assert_eq!(unknown, Err(EventError::UnknownEvent));

        let bad = ClientEvent::from_frame(frame(json!({
            "event": "sendMessage",
            "data": { "toUserId": "not-a-uuid", "content": "hi" }
        })));
        assert_eq!(bad, Err(EventError::InvalidPayload));
    }

    #[test]
    fn ack_serializes_with_status_tag() {
        let event = ServerEvent::Ack {
            ack_id: 9,
            data: Ack::error("Not allowed in chat"),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "event": "ack",
                "ackId": 9,
                "data": { "status": "error", "error": "Not allowed in chat" }
            })
        );

        let chat_id = Uuid::new_v4();
        let ok = Ack::Ok(AckBody {
            chat_id: Some(chat_id),
            messages: Some(Vec::new()),
            ..Default::default()
        });
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({ "status": "ok", "chatId": chat_id, "messages": [] })
        );
    }

    #[test]
    fn message_event_flattens_the_message() {
        let dto = MessageDto {
            id: Uuid::new_v4(),
            chat_id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            sender_role: "teacher".into(),
            text: "see you in class".into(),
            created_at: Utc::now(),
        };
        let value = serde_json::to_value(ServerEvent::Message {
            data: MessageEvent {
                message: dto.clone(),
                from_current_user: false,
            },
        })
        .unwrap();
        assert_eq!(value["event"], "message");
        assert_eq!(value["data"]["text"], "see you in class");
        assert_eq!(value["data"]["senderRole"], "teacher");
        assert_eq!(value["data"]["fromCurrentUser"], false);
    }
}
