//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::error::ApiError;
use crate::web::auth::AuthUser;
use crate::web::extract::{ApiPath, ApiQuery};
use crate::web::protocol::{message_dtos, ChatDto, ConversationPreviewDto, MessageDto, ParticipantDto};
use crate::web::state::AppState;
use axum::{
    extract::State,
    response::Json,
    Extension,
};
use school_chat_core::{
    ChatRole, IdentityResolver, MessageQuery, Participant, PortError, SortOrder,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        health_handler,
        private_chat_handler,
        existing_chat_handler,
        chat_messages_handler,
        user_messages_handler,
        last_messages_handler,
        unread_count_handler,
    ),
    components(
        schemas(
            HealthResponse,
            ChatWithMessagesResponse,
            UnreadCountResponse,
            ErrorResponse,
            ChatDto,
            ParticipantDto,
            MessageDto,
            ConversationPreviewDto,
        )
    ),
    tags(
        (name = "School Chat API", description = "Private chats between students and teachers.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    status: String,
    version: String,
}

/// A chat together with its full history.
#[derive(Serialize, ToSchema)]
pub struct ChatWithMessagesResponse {
    chat: Option<ChatDto>,
    messages: Vec<MessageDto>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCountResponse {
    unread_count: u64,
}

/// The body of every error response.
#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    error: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PrivateChatParams {
    pub user_type: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct MessageListParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub order: Option<String>,
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Open (creating on first contact) the private chat with another user.
///
/// `userType`, when given, must agree with the peer's actual role.
#[utoipa::path(
    get,
    path = "/chats/private/{user_id}",
    responses(
        (status = 200, description = "The chat and its full history", body = ChatWithMessagesResponse),
        (status = 400, description = "Self-chat or a mismatched userType", body = ErrorResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
        (status = 403, description = "Admins cannot initiate direct chat", body = ErrorResponse),
        (status = 404, description = "Peer not found", body = ErrorResponse)
    ),
    params(
        ("user_id" = Uuid, Path, description = "The other participant."),
        ("userType" = Option<String>, Query, description = "Expected peer role: student or teacher.")
    )
)]
pub async fn private_chat_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(caller): Extension<AuthUser>,
    ApiPath(peer_id): ApiPath<Uuid>,
    ApiQuery(params): ApiQuery<PrivateChatParams>,
) -> Result<Json<ChatWithMessagesResponse>, ApiError> {
    let caller_role = IdentityResolver::initiator_role(caller.kind)?;
    let peer_role = app_state.identity.resolve_role(peer_id).await?;

    if let Some(user_type) = params.user_type.as_deref() {
        let claimed = user_type
            .parse::<ChatRole>()
            .map_err(ApiError::BadRequest)?;
        if claimed != peer_role {
            return Err(ApiError::BadRequest(format!(
                "user {} is not a {}",
                peer_id, claimed
            )));
        }
    }

    let chat = app_state
        .chats
        .get_or_create_chat(
            Participant::new(caller_role, caller.user_id),
            Participant::new(peer_role, peer_id),
        )
        .await?;
    let messages = app_state.messages.full_history(chat.id).await?;

    Ok(Json(ChatWithMessagesResponse {
        chat: Some(ChatDto::from(&chat)),
        messages: message_dtos(&messages),
    }))
}

/// Look up the private chat with another user without creating it.
#[utoipa::path(
    get,
    path = "/chats/{user_id}",
    responses(
        (status = 200, description = "The chat, or null with no messages", body = ChatWithMessagesResponse),
        (status = 400, description = "Malformed user id", body = ErrorResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse)
    ),
    params(("user_id" = Uuid, Path, description = "The other participant."))
)]
pub async fn existing_chat_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(caller): Extension<AuthUser>,
    ApiPath(peer_id): ApiPath<Uuid>,
) -> Result<Json<ChatWithMessagesResponse>, ApiError> {
    let Some(chat) = app_state
        .chats
        .find_existing_chat(caller.user_id, peer_id)
        .await?
    else {
        return Ok(Json(ChatWithMessagesResponse {
            chat: None,
            messages: Vec::new(),
        }));
    };

    let messages = app_state.messages.full_history(chat.id).await?;
    Ok(Json(ChatWithMessagesResponse {
        chat: Some(ChatDto::from(&chat)),
        messages: message_dtos(&messages),
    }))
}

/// A page of one chat's messages.
#[utoipa::path(
    get,
    path = "/messages/{chat_id}",
    responses(
        (status = 200, description = "Messages of the chat", body = [MessageDto]),
        (status = 400, description = "Malformed chat id, limit, offset or order", body = ErrorResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
        (status = 403, description = "Caller is not a participant", body = ErrorResponse),
        (status = 404, description = "Chat not found", body = ErrorResponse)
    ),
    params(
        ("chat_id" = Uuid, Path, description = "The chat to read."),
        ("limit" = Option<i64>, Query, description = "Page size, clamped to 1..=100. Defaults to 100."),
        ("offset" = Option<i64>, Query, description = "Messages to skip. Negative values count as 0."),
        ("order" = Option<String>, Query, description = "asc (default) or desc by creation time.")
    )
)]
pub async fn chat_messages_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(caller): Extension<AuthUser>,
    ApiPath(chat_id): ApiPath<Uuid>,
    ApiQuery(params): ApiQuery<MessageListParams>,
) -> Result<Json<Vec<MessageDto>>, ApiError> {
    let order = match params.order.as_deref() {
        Some(raw) => raw.parse::<SortOrder>().map_err(ApiError::BadRequest)?,
        None => SortOrder::default(),
    };

    let chat = app_state.chats.get_chat(chat_id).await?;
    if !chat.has_member(caller.user_id) {
        return Err(PortError::Forbidden("Not allowed in chat".to_string()).into());
    }

    let messages = app_state
        .messages
        .list(
            chat.id,
            MessageQuery {
                limit: params.limit,
                offset: params.offset,
                order,
            },
        )
        .await?;
    Ok(Json(message_dtos(&messages)))
}

/// Every message across the caller's chats, newest first.
#[utoipa::path(
    get,
    path = "/messages/user/all",
    responses(
        (status = 200, description = "All of the caller's messages", body = [MessageDto]),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse)
    )
)]
pub async fn user_messages_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(caller): Extension<AuthUser>,
) -> Result<Json<Vec<MessageDto>>, ApiError> {
    let participant = Participant::new(
        IdentityResolver::participant_role(caller.kind),
        caller.user_id,
    );
    let messages = app_state.messages.list_for_user(participant).await?;
    Ok(Json(message_dtos(&messages)))
}

/// The caller's conversations with the newest message of each.
#[utoipa::path(
    get,
    path = "/lastChats/last-messages",
    responses(
        (status = 200, description = "One row per counterpart", body = [ConversationPreviewDto]),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse)
    )
)]
pub async fn last_messages_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(caller): Extension<AuthUser>,
) -> Result<Json<Vec<ConversationPreviewDto>>, ApiError> {
    let previews = app_state.messages.last_messages(caller.user_id).await?;
    Ok(Json(
        previews.iter().map(ConversationPreviewDto::from).collect(),
    ))
}

/// Messages in the caller's chats sent by someone else.
#[utoipa::path(
    get,
    path = "/lastChats/unread-count",
    responses(
        (status = 200, description = "Unread message count", body = UnreadCountResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse)
    )
)]
pub async fn unread_count_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(caller): Extension<AuthUser>,
) -> Result<Json<UnreadCountResponse>, ApiError> {
    let unread_count = app_state.messages.unread_count(caller.user_id).await?;
    debug!(user_id = %caller.user_id, unread_count, "unread count requested");
    Ok(Json(UnreadCountResponse { unread_count }))
}
