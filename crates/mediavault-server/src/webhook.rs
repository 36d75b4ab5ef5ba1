//! Webhook ingestor: turns signed provider notifications into lifecycle
//! transitions.
//!
//! The signature over `(timestamp, body)` is checked before anything is read
//! from the stores. Past that point the provider only ever sees an error for
//! transient failures it can fix by redelivering.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use mediavault_crypto::{sha256_hex, WebhookVerifier};

use crate::context::RequestContext;
use crate::error::{AppError, AppResult};
use crate::lifecycle::{LifecycleEngine, TransitionOutcome};

/// Unix-seconds timestamp the signature covers.
pub const TIMESTAMP_HEADER: &str = "x-webhook-timestamp";
/// `v1=<hex>` signature list.
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Provider event types this service acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderEventType {
    /// `video.asset.ready`, `image.asset.ready`
    AssetReady,
    /// `video.asset.errored`, `image.asset.errored`
    AssetErrored,
    /// `video.upload.errored`, `video.upload.cancelled`
    UploadFailed,
}

/// Parses the provider event type string.
pub fn parse_event_type(event_type: &str) -> Option<ProviderEventType> {
    match event_type {
        "video.asset.ready" | "image.asset.ready" => Some(ProviderEventType::AssetReady),
        "video.asset.errored" | "image.asset.errored" => Some(ProviderEventType::AssetErrored),
        "video.upload.errored" | "video.upload.cancelled" => Some(ProviderEventType::UploadFailed),
        _ => None,
    }
}

/// Envelope of every provider notification.
#[derive(Debug, Deserialize)]
pub struct ProviderEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
}

/// What happened to a verified notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestOutcome {
    /// A transition was committed.
    Applied,
    /// Duplicate, late, or unknown asset.
    Discarded,
    /// Event type not handled, or payload unusable.
    Ignored,
}

impl From<TransitionOutcome> for IngestOutcome {
    fn from(outcome: TransitionOutcome) -> Self {
        match outcome {
            TransitionOutcome::Applied => IngestOutcome::Applied,
            TransitionOutcome::Discarded => IngestOutcome::Discarded,
        }
    }
}

pub struct WebhookIngestor {
    verifier: WebhookVerifier,
    engine: Arc<LifecycleEngine>,
}

impl WebhookIngestor {
    pub fn new(verifier: WebhookVerifier, engine: Arc<LifecycleEngine>) -> Self {
        Self { verifier, engine }
    }

    /// Verifies and dispatches one notification.
    pub async fn ingest(
        &self,
        ctx: &RequestContext,
        timestamp: Option<&str>,
        signature: Option<&str>,
        body: &[u8],
    ) -> AppResult<IngestOutcome> {
        let (Some(timestamp), Some(signature)) = (timestamp, signature) else {
            return Err(AppError::ValidationFailed(
                "Missing webhook timestamp or signature header".to_string(),
            ));
        };
        self.verifier
            .verify(timestamp, signature, body, Utc::now().timestamp())
            .map_err(|e| AppError::ValidationFailed(e.to_string()))?;

        let body_hash = sha256_hex(body);
        let event: ProviderEvent = match serde_json::from_slice(body) {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(
                    body_sha256 = %body_hash,
                    error = %err,
                    "Unparseable webhook body ignored"
                );
                return Ok(IngestOutcome::Ignored);
            }
        };

        let Some(kind) = parse_event_type(&event.event_type) else {
            tracing::debug!(event_type = %event.event_type, "Unhandled webhook event type");
            return Ok(IngestOutcome::Ignored);
        };

        let result = match kind {
            ProviderEventType::AssetReady => {
                let (Some(upload_id), Some(asset_id)) =
                    (string_field(&event.data, "upload_id"), string_field(&event.data, "id"))
                else {
                    return Ok(self.ignore_incomplete(&event, &body_hash));
                };
                self.engine
                    .on_provider_ready(ctx, upload_id, asset_id, event.data.clone())
                    .await
            }
            ProviderEventType::AssetErrored => {
                let Some(upload_id) = string_field(&event.data, "upload_id") else {
                    return Ok(self.ignore_incomplete(&event, &body_hash));
                };
                self.engine
                    .on_provider_errored(ctx, upload_id, event.data.clone())
                    .await
            }
            ProviderEventType::UploadFailed => {
                let Some(upload_id) = string_field(&event.data, "id") else {
                    return Ok(self.ignore_incomplete(&event, &body_hash));
                };
                self.engine
                    .on_provider_errored(ctx, upload_id, event.data.clone())
                    .await
            }
        };

        match result {
            Ok(outcome) => {
                tracing::info!(
                    event_type = %event.event_type,
                    body_sha256 = %body_hash,
                    outcome = ?outcome,
                    "Webhook processed"
                );
                Ok(outcome.into())
            }
            Err(err) if err.is_retryable() => Err(err),
            Err(err) => {
                tracing::error!(
                    event_type = %event.event_type,
                    body_sha256 = %body_hash,
                    error = %err,
                    "Webhook could not be applied; discarded"
                );
                Ok(IngestOutcome::Discarded)
            }
        }
    }

    fn ignore_incomplete(&self, event: &ProviderEvent, body_hash: &str) -> IngestOutcome {
        tracing::warn!(
            event_type = %event.event_type,
            body_sha256 = %body_hash,
            "Webhook missing required identifiers; ignored"
        );
        IngestOutcome::Ignored
    }
}

fn string_field<'a>(data: &'a Value, key: &str) -> Option<&'a str> {
    data.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}
