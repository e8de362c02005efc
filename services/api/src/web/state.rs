//! services/api/src/web/state.rs
//!
//! Defines the application's shared and connection-specific states.

use crate::config::Config;
use crate::web::auth::{AuthUser, TokenVerifier};
use crate::web::presence::ConnectionRegistry;
use school_chat_core::{
    ChatDirectory, ChatStore, IdentityResolver, MessageLog, UserDirectory, UserKind,
};
use std::sync::Arc;
use uuid::Uuid;

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub identity: IdentityResolver,
    pub chats: ChatDirectory,
    pub messages: MessageLog,
    pub registry: Arc<ConnectionRegistry>,
    pub verifier: TokenVerifier,
}

impl AppState {
    /// Wires the core services over a chat store and a user directory.
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn ChatStore>,
        users: Arc<dyn UserDirectory>,
    ) -> Self {
        let identity = IdentityResolver::new(users);
        Self {
            verifier: TokenVerifier::new(&config.jwt_secret),
            chats: ChatDirectory::new(store.clone()),
            messages: MessageLog::new(store, identity.clone()),
            identity,
            registry: Arc::new(ConnectionRegistry::new()),
            config,
        }
    }
}

//=========================================================================================
// Connection State (Specific to One WebSocket Connection)
//=========================================================================================

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Connecting,
    Authenticating,
    Joined,
    Disconnected,
}

/// Who is on the other end of a connection. Built once after the handshake
/// and never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionContext {
    pub connection_id: Uuid,
    pub user_id: Uuid,
    pub kind: UserKind,
}

impl SessionContext {
    pub fn new(user: AuthUser) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            user_id: user.user_id,
            kind: user.kind,
        }
    }
}
