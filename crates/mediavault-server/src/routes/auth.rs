//! Service-token authentication.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use constant_time_eq::constant_time_eq;

use mediavault_crypto::sha256_bytes;

use super::AppState;
use crate::error::AppError;

/// Rejects requests without a configured bearer token.
pub async fn require_service_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if state.service_tokens.is_empty() {
        return Ok(next.run(request).await);
    }

    let presented = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim);

    match presented {
        Some(token) if state.service_tokens.iter().any(|known| tokens_match(known, token)) => {
            Ok(next.run(request).await)
        }
        Some(_) => Err(AppError::PermissionDenied("Unknown service token".to_string())),
        None => Err(AppError::PermissionDenied(
            "Missing bearer service token".to_string(),
        )),
    }
}

/// Compares digests so timing does not depend on where the tokens differ.
fn tokens_match(known: &str, presented: &str) -> bool {
    constant_time_eq(
        &sha256_bytes(known.as_bytes()),
        &sha256_bytes(presented.as_bytes()),
    )
}
