//! Operator endpoints.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use super::AppState;
use crate::error::AppError;
use crate::sweep::SweepReport;

/// Creates the admin router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/reconcile", post(reconcile))
        .route("/mirror", get(mirror_status))
        .with_state(state)
}

/// POST /api/v1/admin/reconcile - run one reconciliation sweep now.
async fn reconcile(State(state): State<AppState>) -> Result<Json<SweepReport>, AppError> {
    let ctx = state.context();
    let report = state.sweep.run_once(&ctx).await?;
    tracing::info!(
        scanned = report.scanned,
        repaired = report.repaired,
        failed = report.failed,
        "On-demand reconciliation finished"
    );
    Ok(Json(report))
}

#[derive(Debug, Serialize)]
struct MirrorStatus {
    pending: usize,
}

/// GET /api/v1/admin/mirror - queued metadata repairs.
async fn mirror_status(State(state): State<AppState>) -> Json<MirrorStatus> {
    Json(MirrorStatus {
        pending: state.engine.mirror().pending_tasks(),
    })
}
