//! Server token authentication

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};

use crate::event::ServerRef;
use crate::store::with_deadline;
use crate::{AppError, AppState};

/// Game server identified by its log token
#[derive(Debug, Clone)]
pub struct ServerContext {
    pub server: ServerRef,
}

/// Middleware: Require game server token authentication
pub async fn require_server_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(&req)?;
    let token_hash = hash_token(&token);

    let server = with_deadline(
        state.config.store_timeout,
        state.store.find_server_by_token_hash(&token_hash),
    )
    .await?
    .ok_or(AppError::Unauthorized)?;

    if !server.is_enabled {
        tracing::warn!(server = %server.short_name, "Log push from disabled server");
        return Err(AppError::Forbidden);
    }

    req.extensions_mut().insert(ServerContext {
        server: ServerRef::new(server.server_id, server.short_name),
    });

    Ok(next.run(req).await)
}

/// Extract bearer token from Authorization header
fn extract_bearer_token(req: &Request) -> Result<String, AppError> {
    let auth_header = req
        .headers()
        .get(AUTHORIZATION)
        .ok_or(AppError::Unauthorized)?
        .to_str()
        .map_err(|_| AppError::Unauthorized)?;

    match auth_header.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
        _ => Err(AppError::Unauthorized),
    }
}

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for ServerContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<ServerContext>()
            .cloned()
            .ok_or(AppError::Unauthorized)
    }
}
