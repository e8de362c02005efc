//! services/api/src/web/gateway.rs
//!
//! The chat event handlers behind a live connection.
//!
//! Nothing here touches the socket. Replies and pushes go through the
//! [`ConnectionRegistry`](crate::web::presence::ConnectionRegistry), so the
//! same code runs under the WebSocket handler and in tests with bare channels.

use school_chat_core::messages::validate_message_text;
use school_chat_core::{IdentityResolver, Participant, PortError, PortResult};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::port_error_status;
use crate::web::presence::Outbound;
use crate::web::protocol::{
    message_dtos, Ack, AckBody, ClientEvent, ClientFrame, HistoryRequest, MessageDto,
    MessageHistoryEvent, SendMessageRequest, ServerEvent,
};
use crate::web::state::{AppState, SessionContext};

/// Registers a freshly authenticated connection and joins the rooms of every
/// chat the user already belongs to. Returns the number of rooms joined.
pub async fn open_session(
    app_state: &AppState,
    session: &SessionContext,
    outbound: Outbound,
) -> PortResult<usize> {
    let participant = Participant::new(
        IdentityResolver::participant_role(session.kind),
        session.user_id,
    );
    let chats = app_state.chats.find_chats_for_user(participant).await?;

    app_state.registry.register(session, outbound).await;
    for chat in &chats {
        app_state
            .registry
            .join_room(chat.id, session.connection_id)
            .await;
    }
    Ok(chats.len())
}

pub async fn close_session(app_state: &AppState, session: &SessionContext) {
    app_state.registry.unregister(session.connection_id).await;
}

/// Handles one text frame from a client.
///
/// Malformed JSON is logged and dropped. Everything else produces an ack when
/// the client asked for one.
pub async fn handle_frame(app_state: &AppState, session: &SessionContext, text: &str) {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(connection_id = %session.connection_id, "Ignoring malformed frame: {}", e);
            return;
        }
    };
    let ack_id = frame.ack_id;

    let ack = match ClientEvent::from_frame(frame) {
        Ok(event) => {
            debug!(connection_id = %session.connection_id, event = event.name(), "handling event");
            handle_event(app_state, session, event).await
        }
        Err(e) => Ack::error(e.to_string()),
    };

    if let Some(ack_id) = ack_id {
        app_state
            .registry
            .emit_to_connection(session.connection_id, ServerEvent::Ack { ack_id, data: ack })
            .await;
    }
}

/// Runs a client event to completion and turns the outcome into an ack.
pub async fn handle_event(app_state: &AppState, session: &SessionContext, event: ClientEvent) -> Ack {
    let result = match event {
        ClientEvent::GetMessageHistory(request) => {
            get_message_history(app_state, session, request).await
        }
        ClientEvent::SendMessage(request) => send_message(app_state, session, request).await,
    };

    match result {
        Ok(body) => Ack::Ok(body),
        Err(err) => {
            if let PortError::Unexpected(detail) = &err {
                error!(
                    connection_id = %session.connection_id,
                    user_id = %session.user_id,
                    "Event failed: {}", detail
                );
            }
            Ack::error(port_error_status(&err).1)
        }
    }
}

pub async fn get_message_history(
    app_state: &AppState,
    session: &SessionContext,
    request: HistoryRequest,
) -> PortResult<AckBody> {
    match (request.chat_id, request.user_id) {
        (Some(chat_id), _) => history_by_chat(app_state, session, chat_id).await,
        (None, Some(peer_id)) => history_by_peer(app_state, session, peer_id).await,
        (None, None) => Err(PortError::Validation(
            "chatId or userId is required".to_string(),
        )),
    }
}

async fn history_by_chat(
    app_state: &AppState,
    session: &SessionContext,
    chat_id: Uuid,
) -> PortResult<AckBody> {
    let chat = app_state.chats.get_chat(chat_id).await?;
    if !chat.has_member(session.user_id) {
        return Err(PortError::Forbidden("Not allowed in chat".to_string()));
    }

    app_state
        .registry
        .join_room(chat.id, session.connection_id)
        .await;
    let messages = message_dtos(&app_state.messages.full_history(chat.id).await?);

    app_state
        .registry
        .emit_to_connection(
            session.connection_id,
            ServerEvent::MessageHistory {
                data: MessageHistoryEvent {
                    chat_id: chat.id,
                    messages: messages.clone(),
                },
            },
        )
        .await;

    Ok(AckBody {
        messages: Some(messages),
        ..Default::default()
    })
}

async fn history_by_peer(
    app_state: &AppState,
    session: &SessionContext,
    peer_id: Uuid,
) -> PortResult<AckBody> {
    let caller = caller_participant(session)?;
    let peer = peer_participant(app_state, peer_id).await?;
    let chat = app_state.chats.get_or_create_chat(caller, peer).await?;

    app_state
        .registry
        .join_room(chat.id, session.connection_id)
        .await;
    let messages = app_state.messages.full_history(chat.id).await?;

    Ok(AckBody {
        chat_id: Some(chat.id),
        messages: Some(message_dtos(&messages)),
        ..Default::default()
    })
}

pub async fn send_message(
    app_state: &AppState,
    session: &SessionContext,
    request: SendMessageRequest,
) -> PortResult<AckBody> {
    let text = validate_message_text(&request.content)?;
    let sender = caller_participant(session)?;
    let peer = peer_participant(app_state, request.to_user_id).await?;
    let chat = app_state.chats.get_or_create_chat(sender, peer).await?;

    app_state
        .registry
        .join_room(chat.id, session.connection_id)
        .await;
    let message = app_state.messages.append(chat.id, sender, text).await?;
    let report = app_state
        .registry
        .deliver_message(&message, request.to_user_id)
        .await;
    info!(
        chat_id = %chat.id,
        message_id = %message.id,
        sender_id = %session.user_id,
        recipient_online = report.recipient_connections > 0,
        "message sent"
    );

    Ok(AckBody {
        message: Some(MessageDto::from(&message)),
        temp_id: request.temp_id,
        ..Default::default()
    })
}

fn caller_participant(session: &SessionContext) -> PortResult<Participant> {
    let role = IdentityResolver::initiator_role(session.kind)?;
    Ok(Participant::new(role, session.user_id))
}

async fn peer_participant(app_state: &AppState, peer_id: Uuid) -> PortResult<Participant> {
    let role = app_state.identity.resolve_role(peer_id).await?;
    Ok(Participant::new(role, peer_id))
}
