//! HTTP routes for the media asset service.

pub mod admin;
pub mod assets;
pub mod auth;
pub mod webhooks;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::get;
use axum::{middleware, Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::context::RequestContext;
use crate::error::AppError;
use crate::lifecycle::LifecycleEngine;
use crate::sweep::ReconciliationSweep;
use crate::webhook::WebhookIngestor;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<LifecycleEngine>,
    pub ingestor: Arc<WebhookIngestor>,
    pub sweep: Arc<ReconciliationSweep>,
    pub request_timeout: Duration,
    /// Accepted bearer tokens. Empty disables authentication.
    pub service_tokens: Arc<Vec<String>>,
}

impl AppState {
    /// A fresh context bounded by the request timeout.
    pub fn context(&self) -> RequestContext {
        RequestContext::with_timeout(self.request_timeout)
    }
}

/// Creates the main API router with all routes mounted.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_v1_routes(state))
        .layer(TraceLayer::new_for_http())
}

/// Creates the v1 API routes.
fn api_v1_routes(state: AppState) -> Router {
    let auth = middleware::from_fn_with_state(state.clone(), auth::require_service_token);
    Router::new()
        .nest("/assets", assets::router(state.clone()).route_layer(auth.clone()))
        .nest("/admin", admin::router(state.clone()).route_layer(auth))
        .nest("/webhooks", webhooks::router(state.clone()))
        .merge(Router::new().route("/health", get(health)).with_state(state))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    mirror_pending: usize,
}

/// GET /api/v1/health
async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    let ctx = state.context();
    ctx.guard(
        "record store health check",
        state.request_timeout,
        state.engine.records().health_check(),
    )
    .await?;

    Ok(Json(HealthResponse {
        status: "ok",
        mirror_pending: state.engine.mirror().pending_tasks(),
    }))
}
