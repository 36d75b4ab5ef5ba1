//! Provider webhook endpoint.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use serde::Serialize;

use super::AppState;
use crate::error::AppError;
use crate::webhook::{IngestOutcome, SIGNATURE_HEADER, TIMESTAMP_HEADER};

/// Creates the webhooks router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/provider", post(handle_provider_webhook))
        .with_state(state)
}

/// Response for webhook processing.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub received: bool,
    pub outcome: IngestOutcome,
}

/// POST /api/v1/webhooks/provider
///
/// Signature failures are rejected with 422. Unknown assets, duplicates and
/// unhandled event types are acknowledged so the provider stops redelivering.
async fn handle_provider_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, AppError> {
    let header = |name: &str| headers.get(name).and_then(|value| value.to_str().ok());
    let ctx = state.context();
    let outcome = state
        .ingestor
        .ingest(&ctx, header(TIMESTAMP_HEADER), header(SIGNATURE_HEADER), &body)
        .await?;

    Ok(Json(WebhookResponse {
        received: true,
        outcome,
    }))
}
