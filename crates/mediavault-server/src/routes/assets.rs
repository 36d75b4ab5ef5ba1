//! Asset lifecycle and ownership endpoints.

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AppState;
use crate::error::AppError;
use crate::lifecycle::{AssetView, CreateUpload, CreatedUpload, PlaybackCredential};
use crate::models::{AssetKind, AssetMetadata, AssetRecord, AssetState, MetadataPatch, OwnerRef};
use crate::store::{ListQuery, Scope, DEFAULT_LIST_LIMIT};

/// Default playback credential lifetime.
const DEFAULT_PLAYBACK_TTL_SECS: u64 = 3600;

/// Creates the assets router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_assets))
        .route("/uploads", post(create_upload))
        .route("/{id}", get(get_asset).delete(delete_asset))
        .route("/{id}/metadata", axum::routing::patch(update_metadata))
        .route("/{id}/archive", post(archive_asset))
        .route("/{id}/unarchive", post(unarchive_asset))
        .route("/{id}/restore", post(restore_asset))
        .route("/{id}/permanent", delete(delete_asset_permanently))
        .route("/{id}/owners", post(associate_owner).put(update_owners))
        .route("/{id}/owners/{owner_type}/{owner_id}", delete(deassociate_owner))
        .route("/{id}/playback-token", post(sign_playback))
        .with_state(state)
}

/// Query parameters for listing assets.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub scope: Option<Scope>,
    #[serde(default)]
    pub unowned: Option<bool>,
    #[serde(default)]
    pub kind: Option<AssetKind>,
    #[serde(default)]
    pub state: Option<AssetState>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

impl From<ListParams> for ListQuery {
    fn from(params: ListParams) -> Self {
        ListQuery {
            scope: params.scope.unwrap_or_default(),
            unowned_only: params.unowned.unwrap_or(false),
            kind: params.kind,
            state: params.state,
            limit: params.limit.unwrap_or(DEFAULT_LIST_LIMIT),
            offset: params.offset.unwrap_or(0),
        }
        .normalized()
    }
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub assets: Vec<AssetView>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct GetParams {
    #[serde(default)]
    pub include_deleted: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateOwnersRequest {
    pub owners: Vec<OwnerRef>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PlaybackRequest {
    #[serde(default)]
    pub viewer: Option<String>,
    #[serde(default)]
    pub ttl_secs: Option<u64>,
    #[serde(default)]
    pub claims: serde_json::Map<String, serde_json::Value>,
}

/// POST /api/v1/assets/uploads
async fn create_upload(
    State(state): State<AppState>,
    Json(request): Json<CreateUpload>,
) -> Result<(StatusCode, Json<CreatedUpload>), AppError> {
    let ctx = state.context();
    let created = state.engine.create_upload(&ctx, request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/v1/assets
async fn list_assets(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ListResponse>, AppError> {
    let ctx = state.context();
    let query = ListQuery::from(params);
    let (limit, offset) = (query.limit, query.offset);
    let assets = state.engine.list(&ctx, query).await?;
    Ok(Json(ListResponse {
        assets,
        limit,
        offset,
    }))
}

/// GET /api/v1/assets/{id}
async fn get_asset(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<GetParams>,
) -> Result<Json<AssetView>, AppError> {
    let ctx = state.context();
    let view = if params.include_deleted {
        state.engine.get_with_deleted(&ctx, id).await?
    } else {
        state.engine.get(&ctx, id).await?
    };
    Ok(Json(view))
}

/// PATCH /api/v1/assets/{id}/metadata
async fn update_metadata(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(patch): Json<MetadataPatch>,
) -> Result<Json<AssetMetadata>, AppError> {
    let ctx = state.context();
    Ok(Json(state.engine.update_metadata(&ctx, id, patch).await?))
}

/// POST /api/v1/assets/{id}/archive
async fn archive_asset(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AssetRecord>, AppError> {
    let ctx = state.context();
    Ok(Json(state.engine.archive(&ctx, id).await?))
}

/// POST /api/v1/assets/{id}/unarchive
async fn unarchive_asset(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AssetRecord>, AppError> {
    let ctx = state.context();
    Ok(Json(state.engine.unarchive(&ctx, id).await?))
}

/// POST /api/v1/assets/{id}/restore
async fn restore_asset(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AssetRecord>, AppError> {
    let ctx = state.context();
    Ok(Json(state.engine.restore(&ctx, id).await?))
}

/// DELETE /api/v1/assets/{id}
async fn delete_asset(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AssetRecord>, AppError> {
    let ctx = state.context();
    Ok(Json(state.engine.delete(&ctx, id).await?))
}

/// DELETE /api/v1/assets/{id}/permanent
async fn delete_asset_permanently(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let ctx = state.context();
    state.engine.delete_permanent(&ctx, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/assets/{id}/owners
async fn associate_owner(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(owner): Json<OwnerRef>,
) -> Result<Json<AssetRecord>, AppError> {
    let ctx = state.context();
    Ok(Json(state.engine.associate(&ctx, id, owner).await?))
}

/// DELETE /api/v1/assets/{id}/owners/{owner_type}/{owner_id}
async fn deassociate_owner(
    State(state): State<AppState>,
    Path((id, owner_type, owner_id)): Path<(Uuid, String, String)>,
) -> Result<Json<AssetRecord>, AppError> {
    let ctx = state.context();
    let owner = OwnerRef::new(owner_id, owner_type);
    Ok(Json(state.engine.deassociate(&ctx, id, owner).await?))
}

/// PUT /api/v1/assets/{id}/owners
async fn update_owners(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateOwnersRequest>,
) -> Result<Json<AssetRecord>, AppError> {
    let ctx = state.context();
    Ok(Json(state.engine.update_owners(&ctx, id, request.owners).await?))
}

/// POST /api/v1/assets/{id}/playback-token
async fn sign_playback(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<PlaybackRequest>,
) -> Result<Json<PlaybackCredential>, AppError> {
    let ctx = state.context();
    let ttl = Duration::from_secs(request.ttl_secs.unwrap_or(DEFAULT_PLAYBACK_TTL_SECS));
    let credential = state
        .engine
        .sign_playback(&ctx, id, request.viewer, ttl, request.claims)
        .await?;
    Ok(Json(credential))
}
