//! services/api/src/web/presence.rs
//!
//! Tracks live connections so events can be pushed to every device of a user.
//!
//! Each connection owns a bounded channel drained by its socket writer task.
//! Emitting only enqueues, so a slow or dead socket never holds up delivery to
//! the others. A connection whose queue fills up is dropped from the registry.

use school_chat_core::Message;
use std::collections::{HashMap, HashSet};
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    RwLock,
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::web::protocol::{MessageDto, MessageEvent, ServerEvent};
use crate::web::state::SessionContext;

/// Events a connection may have queued before it counts as stalled.
pub const OUTBOUND_BUFFER: usize = 256;

pub type Outbound = mpsc::Sender<ServerEvent>;

struct ConnectionEntry {
    user_id: Uuid,
    outbound: Outbound,
    rooms: HashSet<Uuid>,
}

#[derive(Default)]
struct RegistryState {
    connections: HashMap<Uuid, ConnectionEntry>,
    /// Personal-delivery groups: user id to connection ids.
    users: HashMap<Uuid, HashSet<Uuid>>,
    /// Chat rooms: chat id to connection ids.
    rooms: HashMap<Uuid, HashSet<Uuid>>,
}

/// How many connections a message reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub sender_connections: usize,
    pub recipient_connections: usize,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection to its user's personal-delivery group.
    pub async fn register(&self, session: &SessionContext, outbound: Outbound) {
        let mut state = self.state.write().await;
        state.connections.insert(
            session.connection_id,
            ConnectionEntry {
                user_id: session.user_id,
                outbound,
                rooms: HashSet::new(),
            },
        );
        state
            .users
            .entry(session.user_id)
            .or_default()
            .insert(session.connection_id);
    }

    /// Removes a connection from its personal group and every room it joined.
    pub async fn unregister(&self, connection_id: Uuid) {
        let mut state = self.state.write().await;
        let Some(entry) = state.connections.remove(&connection_id) else {
            return;
        };

        if let Some(group) = state.users.get_mut(&entry.user_id) {
            group.remove(&connection_id);
            if group.is_empty() {
                state.users.remove(&entry.user_id);
            }
        }
        for chat_id in entry.rooms {
            if let Some(room) = state.rooms.get_mut(&chat_id) {
                room.remove(&connection_id);
                if room.is_empty() {
                    state.rooms.remove(&chat_id);
                }
            }
        }
    }

    /// Joins a chat room. Returns false when the connection is not registered.
    pub async fn join_room(&self, chat_id: Uuid, connection_id: Uuid) -> bool {
        let mut state = self.state.write().await;
        let Some(entry) = state.connections.get_mut(&connection_id) else {
            return false;
        };
        entry.rooms.insert(chat_id);
        state.rooms.entry(chat_id).or_default().insert(connection_id);
        true
    }

    pub async fn rooms_of(&self, connection_id: Uuid) -> HashSet<Uuid> {
        self.state
            .read()
            .await
            .connections
            .get(&connection_id)
            .map(|entry| entry.rooms.clone())
            .unwrap_or_default()
    }

    pub async fn room_members(&self, chat_id: Uuid) -> HashSet<Uuid> {
        self.state
            .read()
            .await
            .rooms
            .get(&chat_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn connection_count(&self, user_id: Uuid) -> usize {
        self.state
            .read()
            .await
            .users
            .get(&user_id)
            .map(HashSet::len)
            .unwrap_or(0)
    }

    /// Sends to a single connection. Returns false if it is gone or stalled.
    pub async fn emit_to_connection(&self, connection_id: Uuid, event: ServerEvent) -> bool {
        let outcome = {
            let state = self.state.read().await;
            match state.connections.get(&connection_id) {
                Some(entry) => entry.outbound.try_send(event),
                None => return false,
            }
        };
        match outcome {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.drop_stalled(vec![connection_id]).await;
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Sends to every live connection of a user and returns how many accepted it.
    pub async fn emit_to_user(&self, user_id: Uuid, event: &ServerEvent) -> usize {
        let (delivered, stalled) = {
            let state = self.state.read().await;
            let Some(group) = state.users.get(&user_id) else {
                return 0;
            };
            let mut delivered = 0;
            let mut stalled = Vec::new();
            for connection_id in group {
                let Some(entry) = state.connections.get(connection_id) else {
                    continue;
                };
                match entry.outbound.try_send(event.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => stalled.push(*connection_id),
                    Err(TrySendError::Closed(_)) => {}
                }
            }
            (delivered, stalled)
        };
        self.drop_stalled(stalled).await;
        delivered
    }

    /// Unregisters connections that stopped draining their queue. Dropping the
    /// sender lets the writer flush what it has and close the socket.
    async fn drop_stalled(&self, stalled: Vec<Uuid>) {
        for connection_id in stalled {
            warn!(%connection_id, "Outbound queue full, dropping connection");
            self.unregister(connection_id).await;
        }
    }

    /// Pushes a newly appended message to both participants' devices.
    pub async fn deliver_message(&self, message: &Message, recipient_id: Uuid) -> DeliveryReport {
        let dto = MessageDto::from(message);
        let to_sender = ServerEvent::Message {
            data: MessageEvent {
                message: dto.clone(),
                from_current_user: true,
            },
        };
        let to_recipient = ServerEvent::Message {
            data: MessageEvent {
                message: dto,
                from_current_user: false,
            },
        };

        let report = DeliveryReport {
            sender_connections: self.emit_to_user(message.sender_id, &to_sender).await,
            recipient_connections: self.emit_to_user(recipient_id, &to_recipient).await,
        };
        debug!(
            message_id = %message.id,
            chat_id = %message.chat_id,
            sender_connections = report.sender_connections,
            recipient_connections = report.recipient_connections,
            "message delivered"
        );
        report
    }
}
