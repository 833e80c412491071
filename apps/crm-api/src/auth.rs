//! Bearer-token authentication for the API.
//!
//! Tokens are HS256 JWTs carrying the caller's `user_id`. The middleware
//! verifies the token and inserts an [`AuthenticatedUser`] into request
//! extensions for the handlers.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header::AUTHORIZATION, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use crm_core::{AuthenticatedUser, UserId};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JWT claims issued by the CRM's login endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    pub exp: i64,
}

impl Claims {
    fn into_user(self) -> AuthenticatedUser {
        let mut user = AuthenticatedUser::new(UserId::from_uuid(self.user_id));
        if let Some(email) = self.email {
            user = user.with_email(email);
        }
        if let Some(role) = self.role {
            user = user.with_role(role);
        }
        user
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing Authorization header")]
    MissingHeader,

    #[error("Invalid Authorization header format")]
    InvalidHeader,

    #[error("Invalid or expired token")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = StatusCode::UNAUTHORIZED;
        let body = serde_json::json!({
            "error": "unauthorized",
            "message": self.to_string(),
            "status": status.as_u16(),
        });
        (status, Json(body)).into_response()
    }
}

/// Verifies bearer tokens against the shared HS256 secret.
#[derive(Clone)]
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        Ok(decode::<Claims>(token, &self.key, &self.validation)?.claims)
    }

    fn authenticate(&self, request: &Request) -> Result<AuthenticatedUser, AuthError> {
        let header = request
            .headers()
            .get(AUTHORIZATION)
            .ok_or(AuthError::MissingHeader)?
            .to_str()
            .map_err(|_| AuthError::InvalidHeader)?;

        let token = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::InvalidHeader)?;

        Ok(self.verify(token)?.into_user())
    }
}

/// Reject unauthenticated requests with 401; otherwise attach the caller.
pub async fn require_auth(
    State(verifier): State<Arc<JwtVerifier>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let user = verifier.authenticate(&request).map_err(|e| {
        tracing::warn!(error = %e, path = %request.uri().path(), "Rejected request");
        e
    })?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}
