//! services/api/src/web/ws_handler.rs
//!
//! This is the entry point and control loop for a chat WebSocket connection.
//! It upgrades authenticated requests, runs the socket writer task, and hands every
//! text frame to the gateway.

use crate::{
    error::INTERNAL_ERROR_MESSAGE,
    web::{
        auth::AuthUser,
        gateway,
        presence::OUTBOUND_BUFFER,
        protocol::ServerEvent,
        state::{AppState, ConnectionPhase, SessionContext},
    },
};
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    Extension,
};
use futures::{stream::StreamExt, Sink, SinkExt};
use std::{sync::Arc, time::Duration};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// The handler for upgrading HTTP requests to WebSocket connections.
///
/// Runs behind [`require_socket_auth`](crate::web::middleware::require_socket_auth),
/// so an unauthenticated client gets a plain 401 and never reaches an event handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state, user))
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>, user: AuthUser) {
    let session = SessionContext::new(user);
    info!(
        phase = ?ConnectionPhase::Connecting,
        connection_id = %session.connection_id,
        user_id = %session.user_id,
        "New WebSocket connection established"
    );

    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::channel::<ServerEvent>(OUTBOUND_BUFFER);

    // --- 1. Join Phase ---
    match gateway::open_session(&app_state, &session, outbound_tx).await {
        Ok(rooms) => info!(
            phase = ?ConnectionPhase::Joined,
            connection_id = %session.connection_id,
            rooms,
            "Connection joined its chats"
        ),
        Err(e) => {
            error!("Failed to load chats for user {}: {:?}", session.user_id, e);
            let _ = sender
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::ERROR,
                    reason: INTERNAL_ERROR_MESSAGE.into(),
                })))
                .await;
            return;
        }
    }

    // --- 2. Writer Task ---
    let shutdown = CancellationToken::new();
    let ping_every = Duration::from_secs(app_state.config.ws_ping_interval_secs.max(1));
    let writer = spawn_writer(sender, outbound_rx, shutdown.clone(), ping_every);

    // --- 3. Main Message Loop ---
    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                gateway::handle_frame(&app_state, &session, text.as_str()).await;
            }
            Ok(Message::Close(_)) => {
                info!(connection_id = %session.connection_id, "Client sent close frame.");
                break;
            }
            Ok(Message::Binary(_)) => {
                warn!(connection_id = %session.connection_id, "Ignoring binary frame.");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(connection_id = %session.connection_id, "WebSocket read error: {}", e);
                break;
            }
        }
    }

    // --- 4. Cleanup ---
    gateway::close_session(&app_state, &session).await;
    shutdown.cancel();
    if let Err(e) = writer.await {
        error!("WebSocket writer task failed: {:?}", e);
    }
    info!(
        phase = ?ConnectionPhase::Disconnected,
        connection_id = %session.connection_id,
        user_id = %session.user_id,
        "WebSocket connection closed"
    );
}

/// Drains the connection's outbound queue into the socket and keeps it alive
/// with periodic pings. Events already queued at shutdown are still sent.
fn spawn_writer<W>(
    mut sender: W,
    mut outbound_rx: mpsc::Receiver<ServerEvent>,
    shutdown: CancellationToken,
    ping_every: Duration,
) -> JoinHandle<()>
where
    W: Sink<Message> + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(ping_every);
        // The first tick completes immediately.
        heartbeat.tick().await;

        loop {
            tokio::select! {
                biased;
                event = outbound_rx.recv() => {
                    let Some(event) = event else { break };
                    if !send_event(&mut sender, &event).await {
                        return;
                    }
                }
                _ = shutdown.cancelled() => {
                    while let Ok(event) = outbound_rx.try_recv() {
                        if !send_event(&mut sender, &event).await {
                            return;
                        }
                    }
                    break;
                }
                _ = heartbeat.tick() => {
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = sender.close().await;
    })
}

/// Writes one event as a text frame. Returns false once the socket is gone.
async fn send_event<W>(sender: &mut W, event: &ServerEvent) -> bool
where
    W: Sink<Message> + Unpin,
{
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize server event: {}", e);
            return true;
        }
    };
    sender.send(Message::Text(json.into())).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::protocol::Ack;
    use futures::channel::mpsc as sink_channel;

    fn ack(ack_id: u64) -> ServerEvent {
        ServerEvent::Ack {
            ack_id,
            data: Ack::error("Unknown event"),
        }
    }

    #[tokio::test]
    async fn writer_flushes_queued_events_before_closing() {
        let (socket_tx, socket_rx) = sink_channel::unbounded::<Message>();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        for ack_id in 1..=3 {
            outbound_tx.try_send(ack(ack_id)).unwrap();
        }
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let writer = spawn_writer(socket_tx, outbound_rx, shutdown, Duration::from_secs(3600));
        writer.await.unwrap();

        let frames: Vec<Message> = socket_rx.collect().await;
        let ack_ids: Vec<u64> = frames
            .iter()
            .map(|frame| match frame {
                Message::Text(text) => {
                    let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
                    value["ackId"].as_u64().unwrap()
                }
                other => panic!("expected a text frame, got {other:?}"),
            })
            .collect();
        assert_eq!(ack_ids, [1, 2, 3]);
        drop(outbound_tx);
    }

    #[tokio::test]
    async fn writer_closes_once_every_sender_is_gone() {
        let (socket_tx, socket_rx) = sink_channel::unbounded::<Message>();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        outbound_tx.try_send(ack(9)).unwrap();
        drop(outbound_tx);

        let writer = spawn_writer(
            socket_tx,
            outbound_rx,
            CancellationToken::new(),
            Duration::from_secs(3600),
        );
        writer.await.unwrap();

        let frames: Vec<Message> = socket_rx.collect().await;
        assert_eq!(frames.len(), 1);
    }
}
