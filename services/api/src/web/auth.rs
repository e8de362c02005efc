//! services/api/src/web/auth.rs
//!
//! Verification of the bearer tokens issued by the school portal.
//!
//! Tokens are HS256 JWTs signed with the shared `JWT_SECRET`. This service never
//! issues tokens; it only checks them and turns their claims into an [`AuthUser`].

use axum::http::{header, HeaderMap};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use school_chat_core::UserKind;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::error::ApiError;

/// Claims carried by a portal token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub exp: usize,
}

/// The verified identity of a caller. Inserted into request extensions by
/// [`crate::web::middleware::require_auth`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub kind: UserKind,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Authentication token missing")]
    MissingToken,
    #[error("Invalid or expired token")]
    InvalidToken,
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Unauthorized(err.to_string())
    }
}

/// Checks token signatures and expiry against the shared secret.
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> Result<AuthUser, AuthError> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|err| {
            warn!(error = %err, "invalid auth token");
            AuthError::InvalidToken
        })?;

        let user_id = Uuid::parse_str(&data.claims.sub).map_err(|_| {
            warn!(sub = %data.claims.sub, "token subject is not a user id");
            AuthError::InvalidToken
        })?;
        let kind = data.claims.role.parse::<UserKind>().map_err(|_| {
            warn!(role = %data.claims.role, "token missing or invalid role");
            AuthError::InvalidToken
        })?;

        Ok(AuthUser { user_id, kind })
    }
}

/// The token from an `Authorization: Bearer` header, if present.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?;
    let value = value.to_str().ok()?;
    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Verifies the caller of a request, preferring the header over a query token.
pub fn authenticate(
    verifier: &TokenVerifier,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> Result<AuthUser, AuthError> {
    let token = bearer_token(headers)
        .or(query_token.filter(|token| !token.is_empty()))
        .ok_or(AuthError::MissingToken)?;
    verifier.verify(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use std::time::{SystemTime, UNIX_EPOCH};

    const SECRET: &str = "test-secret";

    fn token(secret: &str, sub: &str, role: &str, ttl: i64) -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time")
            .as_secs() as i64;
        let claims = Claims {
            sub: sub.to_string(),
            role: role.to_string(),
            exp: (now + ttl) as usize,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .expect("token")
    }

    fn headers_with(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    #[test]
    fn accepts_a_valid_token() {
        let user_id = Uuid::new_v4();
        let verifier = TokenVerifier::new(SECRET);
        let user = verifier
            .verify(&token(SECRET, &user_id.to_string(), "teacher", 3600))
            .unwrap();
        assert_eq!(
            user,
            AuthUser {
                user_id,
                kind: UserKind::Teacher
            }
        );
    }

    #[test]
    fn rejects_wrong_secret_expiry_and_bad_claims() {
        let verifier = TokenVerifier::new(SECRET);
        let id = Uuid::new_v4().to_string();

        let forged = token("other-secret", &id, "student", 3600);
        assert_eq!(verifier.verify(&forged), Err(AuthError::InvalidToken));

        let expired = token(SECRET, &id, "student", -3600);
        assert_eq!(verifier.verify(&expired), Err(AuthError::InvalidToken));

        let bad_sub = token(SECRET, "user-123", "student", 3600);
        assert_eq!(verifier.verify(&bad_sub), Err(AuthError::InvalidToken));

        let bad_role = token(SECRET, &id, "parent", 3600);
        assert_eq!(verifier.verify(&bad_role), Err(AuthError::InvalidToken));
    }

    #[test]
    fn header_wins_over_query_token() {
        let verifier = TokenVerifier::new(SECRET);
        let header_user = Uuid::new_v4();
        let query_user = Uuid::new_v4();
        let headers = headers_with(&token(SECRET, &header_user.to_string(), "student", 60));
        let query = token(SECRET, &query_user.to_string(), "student", 60);

        let user = authenticate(&verifier, &headers, Some(&query)).unwrap();
        assert_eq!(user.user_id, header_user);

        let user = authenticate(&verifier, &HeaderMap::new(), Some(&query)).unwrap();
        assert_eq!(user.user_id, query_user);
    }

    #[test]
    fn missing_token_is_reported_separately() {
        let verifier = TokenVerifier::new(SECRET);
        assert_eq!(
            authenticate(&verifier, &HeaderMap::new(), None),
            Err(AuthError::MissingToken)
        );
        assert_eq!(
            authenticate(&verifier, &HeaderMap::new(), Some("")),
            Err(AuthError::MissingToken)
        );
    }
}
