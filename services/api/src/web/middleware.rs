//! services/api/src/web/middleware.rs
//!
//! Authentication middleware for protecting routes.

use axum::{
    extract::{Query, Request, State},
    middleware::Next,
    response::Response,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;

use crate::error::ApiError;
use crate::web::auth::authenticate;
use crate::web::state::{AppState, ConnectionPhase};

/// Middleware that validates the bearer token and extracts the caller.
///
/// If valid, inserts an [`AuthUser`](crate::web::auth::AuthUser) into request
/// extensions for handlers to use. If invalid or missing, returns 401.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let user = authenticate(&state.verifier, req.headers(), None)?;
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

#[derive(Deserialize, Debug, Default)]
struct HandshakeParams {
    token: Option<String>,
}

/// Like [`require_auth`], but also accepts the token as a `?token=` query
/// parameter, since browsers cannot set headers on a WebSocket upgrade.
pub async fn require_socket_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let params = Query::<HandshakeParams>::try_from_uri(req.uri())
        .map(|Query(params)| params)
        .unwrap_or_default();
    let user = authenticate(&state.verifier, req.headers(), params.token.as_deref()).map_err(|e| {
        warn!(phase = ?ConnectionPhase::Authenticating, "Rejected WebSocket handshake: {}", e);
        ApiError::from(e)
    })?;
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}
