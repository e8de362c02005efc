pub mod auth;
pub mod extract;
pub mod gateway;
pub mod middleware;
pub mod presence;
pub mod protocol;
pub mod rest;
pub mod state;
pub mod ws_handler;

use axum::{middleware as axum_middleware, routing::get, Router};
use std::sync::Arc;

// Re-export the handlers the binary needs to build the web server router.
pub use middleware::{require_auth, require_socket_auth};
pub use rest::{
    chat_messages_handler, existing_chat_handler, health_handler, last_messages_handler,
    private_chat_handler, unread_count_handler, user_messages_handler,
};
pub use ws_handler::ws_handler;

use state::AppState;

/// Every route of the service, with authentication applied where needed.
pub fn router(app_state: Arc<AppState>) -> Router {
    // Public routes (no auth required)
    let public_routes = Router::new().route("/health", get(health_handler));

    // The socket handshake may carry its token in the query string
    let socket_routes = Router::new()
        .route("/ws", get(ws_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_socket_auth,
        ));

    // Protected routes (bearer token required)
    let protected_routes = Router::new()
        .route("/chats/private/{user_id}", get(private_chat_handler))
        .route("/chats/{user_id}", get(existing_chat_handler))
        .route("/messages/user/all", get(user_messages_handler))
        .route("/messages/{chat_id}", get(chat_messages_handler))
        .route("/lastChats/last-messages", get(last_messages_handler))
        .route("/lastChats/unread-count", get(unread_count_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(socket_routes)
        .merge(protected_routes)
        .with_state(app_state)
}
