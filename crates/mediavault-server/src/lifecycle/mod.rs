//! Lifecycle engine: the asset state machine and its dual-store writes.
//!
//! Every mutation commits to the record store first, guarded by the state the
//! engine observed, and only then mirrors the change to the metadata store.
//! A mirror failure never fails the operation; the change is queued for
//! repair instead. Record commits are never rolled back, and the mirror write
//! and ownership notification that follow a commit run on their own task so a
//! dropped request cannot skip them.

pub mod ownership;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::{CallTimeouts, RequestContext};
use crate::error::{AppError, AppResult};
use crate::metadata::{MetadataStore, WRITE_ATTEMPTS};
use crate::mirror::{Mirror, MirrorOp};
use crate::models::{
    AssetKind, AssetMetadata, AssetRecord, AssetState, Field, MetadataPatch, NewAssetRecord,
    OwnerRef, OwnershipEvent, ProviderDetail,
};
use crate::notifier::OwnershipNotifier;
use crate::provider::{PlaybackPolicy, ProviderGateway, UploadRequest, UploadTarget};
use crate::store::{ListQuery, RecordGuard, RecordPatch, RecordStore, Scope};

pub use ownership::OwnershipDiff;

/// Shortest playback credential lifetime.
pub const MIN_PLAYBACK_TTL: Duration = Duration::from_secs(1);
/// Longest playback credential lifetime.
pub const MAX_PLAYBACK_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub timeouts: CallTimeouts,
    /// Origin allowed to PUT bytes to issued upload URLs.
    pub upload_cors_origin: String,
    pub playback_policy: PlaybackPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeouts: CallTimeouts::default(),
            upload_cors_origin: "*".to_string(),
            playback_policy: PlaybackPolicy::default(),
        }
    }
}

/// Input of [`LifecycleEngine::create_upload`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateUpload {
    pub kind: Option<AssetKind>,
    #[serde(default)]
    pub owner: Option<OwnerRef>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub passthrough: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedUpload {
    pub asset: AssetRecord,
    pub upload: UploadTarget,
}

/// Result of a provider-driven transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionOutcome {
    Applied,
    /// Duplicate, late or unknown event; nothing changed.
    Discarded,
}

/// A record joined with its metadata document.
#[derive(Debug, Clone, Serialize)]
pub struct AssetView {
    #[serde(flatten)]
    pub record: AssetRecord,
    /// `None` when the document is missing or could not be read.
    pub metadata: Option<AssetMetadata>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlaybackCredential {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

pub struct LifecycleEngine {
    records: Arc<dyn RecordStore>,
    metadata: Arc<dyn MetadataStore>,
    provider: Arc<dyn ProviderGateway>,
    notifier: Arc<dyn OwnershipNotifier>,
    mirror: Arc<Mirror>,
    config: EngineConfig,
}

impl LifecycleEngine {
    pub fn new(
        records: Arc<dyn RecordStore>,
        metadata: Arc<dyn MetadataStore>,
        provider: Arc<dyn ProviderGateway>,
        notifier: Arc<dyn OwnershipNotifier>,
        mirror: Arc<Mirror>,
        config: EngineConfig,
    ) -> Self {
        Self {
            records,
            metadata,
            provider,
            notifier,
            mirror,
            config,
        }
    }

    pub fn mirror(&self) -> &Arc<Mirror> {
        &self.mirror
    }

    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.records
    }

    /// Requests an upload target and records a `pending` asset for it.
    pub async fn create_upload(
        &self,
        ctx: &RequestContext,
        request: CreateUpload,
    ) -> AppResult<CreatedUpload> {
        let kind = request
            .kind
            .ok_or_else(|| AppError::InvalidArgument("kind is required".to_string()))?;
        let patch = MetadataPatch {
            title: request.title.into(),
            description: request.description.into(),
            passthrough: request.passthrough.clone().into(),
        };
        patch.validate()?;

        if let Some(owner) = &request.owner {
            owner.validate()?;
            self.ensure_owner_free(ctx, owner, None).await?;
            self.ensure_owner_exists(ctx, owner).await?;
        }

        let asset_id = Uuid::new_v4();
        let upload = ctx
            .guard(
                "upload target creation",
                self.config.timeouts.provider,
                self.provider.create_upload_target(&UploadRequest {
                    asset_id,
                    kind,
                    cors_origin: self.config.upload_cors_origin.clone(),
                    passthrough: request.passthrough,
                    playback_policy: self.config.playback_policy,
                }),
            )
            .await?;

        let new = NewAssetRecord {
            id: asset_id,
            kind,
            provider_upload_id: upload.upload_id.clone(),
            owner: request.owner.clone(),
        };
        let asset = match self.store(ctx, "record insert", self.records.insert(&new)).await {
            Ok(asset) => asset,
            Err(err) => {
                tracing::warn!(
                    asset_id = %asset_id,
                    upload_id = %upload.upload_id,
                    error = %err,
                    "Record insert failed after upload target was issued"
                );
                return Err(err);
            }
        };

        let seed = MirrorOp::Seed {
            owner: request.owner.clone(),
            patch,
        };
        let event = request
            .owner
            .as_ref()
            .map(|owner| OwnershipEvent::associated(asset.id, owner));
        self.settle(ctx, asset.id, seed, event).await;

        tracing::info!(
            asset_id = %asset.id,
            kind = asset.kind.as_str(),
            upload_id = %upload.upload_id,
            owner = ?request.owner.as_ref().map(|o| o.to_string()),
            "Upload target issued"
        );
        Ok(CreatedUpload { asset, upload })
    }

    /// Marks the pending asset behind `upload_id` ready.
    pub async fn on_provider_ready(
        &self,
        ctx: &RequestContext,
        upload_id: &str,
        provider_asset_id: &str,
        detail: serde_json::Value,
    ) -> AppResult<TransitionOutcome> {
        let patch = RecordPatch {
            state: Some(AssetState::Ready),
            provider_asset_id: Field::Set(provider_asset_id.to_string()),
            ..Default::default()
        };
        let provider_detail = ProviderDetail {
            provider_asset_id: Some(provider_asset_id.to_string()),
            status: "ready".to_string(),
            detail,
        };
        self.complete_pending(ctx, upload_id, patch, provider_detail).await
    }

    /// Marks the pending asset behind `upload_id` broken.
    pub async fn on_provider_errored(
        &self,
        ctx: &RequestContext,
        upload_id: &str,
        detail: serde_json::Value,
    ) -> AppResult<TransitionOutcome> {
        let provider_detail = ProviderDetail {
            provider_asset_id: None,
            status: "errored".to_string(),
            detail,
        };
        let patch = RecordPatch::state(AssetState::Broken);
        self.complete_pending(ctx, upload_id, patch, provider_detail)
            .await
    }

    /// Shared `pending -> ready|broken` path. Soft-deleted rows still move so
    /// a later permanent delete knows about the remote asset.
    async fn complete_pending(
        &self,
        ctx: &RequestContext,
        upload_id: &str,
        patch: RecordPatch,
        detail: ProviderDetail,
    ) -> AppResult<TransitionOutcome> {
        let Some(record) = self
            .store(ctx, "record lookup", self.records.find_by_upload_id(upload_id))
            .await?
        else {
            tracing::warn!(
                upload_id,
                status = %detail.status,
                "No asset for upload; event discarded"
            );
            return Ok(TransitionOutcome::Discarded);
        };

        if record.state != AssetState::Pending {
            tracing::info!(
                asset_id = %record.id,
                state = record.state.as_str(),
                status = %detail.status,
                "Asset no longer pending; event discarded"
            );
            return Ok(TransitionOutcome::Discarded);
        }

        let guard = RecordGuard::default().in_state(AssetState::Pending);
        let applied = self
            .store(ctx, "record update", self.records.update(record.id, &guard, &patch))
            .await?;
        if applied == 0 {
            tracing::info!(asset_id = %record.id, "Concurrent completion won; event discarded");
            return Ok(TransitionOutcome::Discarded);
        }

        tracing::info!(
            asset_id = %record.id,
            upload_id,
            state = ?patch.state,
            "Asset completed by provider"
        );
        self.settle(ctx, record.id, MirrorOp::MergeProvider(detail), None)
            .await;
        Ok(TransitionOutcome::Applied)
    }

    /// `ready -> archived`.
    pub async fn archive(&self, ctx: &RequestContext, id: Uuid) -> AppResult<AssetRecord> {
        self.flip_state(ctx, id, AssetState::Ready, AssetState::Archived).await
    }

    /// `archived -> ready`.
    pub async fn unarchive(&self, ctx: &RequestContext, id: Uuid) -> AppResult<AssetRecord> {
        self.flip_state(ctx, id, AssetState::Archived, AssetState::Ready).await
    }

    async fn flip_state(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        from: AssetState,
        to: AssetState,
    ) -> AppResult<AssetRecord> {
        let mut record = self.load(ctx, id, Scope::Active).await?;
        if record.state != from || !from.can_transition_to(to) {
            return Err(AppError::Conflict(format!(
                "Asset {} is {}; cannot move to {}",
                id,
                record.state.as_str(),
                to.as_str()
            )));
        }

        let patch = RecordPatch::state(to);
        let guard = RecordGuard::active().in_state(from);
        self.commit(ctx, id, &guard, &patch, "state changed concurrently")
            .await?;
        patch.apply(&mut record, Utc::now());

        tracing::info!(
            asset_id = %id,
            from = from.as_str(),
            to = to.as_str(),
            "Asset state changed"
        );
        Ok(record)
    }

    /// Soft-deletes an asset, releasing its owner in the same write.
    pub async fn delete(&self, ctx: &RequestContext, id: Uuid) -> AppResult<AssetRecord> {
        let mut record = self.load(ctx, id, Scope::All).await?;
        if record.is_deleted() {
            return Err(AppError::Conflict(format!("Asset {} is already deleted", id)));
        }

        let previous_owner = record.owner();
        let patch = RecordPatch {
            owner: Field::Clear,
            deleted_at: Field::Set(Utc::now()),
            ..Default::default()
        };
        let guard = RecordGuard::active().owned_by(previous_owner.clone());
        self.commit(ctx, id, &guard, &patch, "asset changed concurrently")
            .await?;
        patch.apply(&mut record, Utc::now());

        tracing::info!(
            asset_id = %id,
            owner = ?previous_owner.as_ref().map(|o| o.to_string()),
            "Asset soft-deleted"
        );
        let event = previous_owner
            .as_ref()
            .map(|owner| OwnershipEvent::deassociated(id, owner));
        self.settle(ctx, id, MirrorOp::ClearOwners, event).await;
        Ok(record)
    }

    /// Clears the soft-delete marker. Ownership is not restored.
    pub async fn restore(&self, ctx: &RequestContext, id: Uuid) -> AppResult<AssetRecord> {
        let mut record = self.load(ctx, id, Scope::All).await?;
        if !record.is_deleted() {
            return Err(AppError::Conflict(format!("Asset {} is not deleted", id)));
        }

        let patch = RecordPatch {
            deleted_at: Field::Clear,
            ..Default::default()
        };
        self.commit(ctx, id, &RecordGuard::deleted(), &patch, "asset changed concurrently")
            .await?;
        patch.apply(&mut record, Utc::now());

        tracing::info!(asset_id = %id, state = record.state.as_str(), "Asset restored");
        Ok(record)
    }

    /// Destroys a soft-deleted asset: remote asset first, then the row, then
    /// the document.
    ///
    /// A `pending` asset may still turn into a remote asset, so it is refused
    /// until the provider reports the upload ready or failed.
    pub async fn delete_permanent(&self, ctx: &RequestContext, id: Uuid) -> AppResult<()> {
        let record = self.load(ctx, id, Scope::All).await?;
        if !record.is_deleted() {
            return Err(AppError::Conflict(format!(
                "Asset {} must be soft-deleted before permanent deletion",
                id
            )));
        }
        if record.state == AssetState::Pending {
            return Err(AppError::Conflict(format!(
                "Asset {} is still pending at the provider; retry once the upload settles",
                id
            )));
        }

        if let Some(provider_asset_id) = &record.provider_asset_id {
            ctx.guard(
                "remote asset deletion",
                self.config.timeouts.provider,
                self.provider.delete_remote_asset(record.kind, provider_asset_id),
            )
            .await?;
        }

        let removed = self
            .store(ctx, "record delete", self.records.delete_row(id))
            .await?;
        if removed == 0 {
            tracing::error!(
                asset_id = %id,
                "Remote asset deleted but record was restored or removed concurrently"
            );
            return Err(AppError::Conflict(format!(
                "Asset {} was restored or removed concurrently",
                id
            )));
        }

        self.settle(ctx, id, MirrorOp::Purge, None).await;
        tracing::info!(
            asset_id = %id,
            provider_asset_id = ?record.provider_asset_id,
            "Asset permanently deleted"
        );
        Ok(())
    }

    /// An active asset with its metadata.
    pub async fn get(&self, ctx: &RequestContext, id: Uuid) -> AppResult<AssetView> {
        let record = self.load(ctx, id, Scope::Active).await?;
        Ok(self.hydrate_one(ctx, record).await)
    }

    /// Any asset, soft-deleted included, with its metadata.
    pub async fn get_with_deleted(&self, ctx: &RequestContext, id: Uuid) -> AppResult<AssetView> {
        let record = self.load(ctx, id, Scope::All).await?;
        Ok(self.hydrate_one(ctx, record).await)
    }

    pub async fn list(&self, ctx: &RequestContext, query: ListQuery) -> AppResult<Vec<AssetView>> {
        let query = query.normalized();
        let records = self.store(ctx, "record listing", self.records.list(&query)).await?;
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = records.iter().map(|record| record.id).collect();
        let mut docs = match self
            .store(ctx, "metadata listing", self.metadata.list_by_keys(&ids))
            .await
        {
            Ok(docs) => docs,
            Err(err) => {
                tracing::warn!(error = %err, "Metadata unavailable; listing records only");
                Vec::new()
            }
        };

        Ok(records
            .into_iter()
            .map(|record| {
                let metadata = docs
                    .iter()
                    .position(|doc| doc.asset_id == record.id)
                    .map(|index| docs.swap_remove(index));
                AssetView { record, metadata }
            })
            .collect())
    }

    /// Mints a playback credential for a ready asset.
    pub async fn sign_playback(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        viewer: Option<String>,
        ttl: Duration,
        mut claims: serde_json::Map<String, serde_json::Value>,
    ) -> AppResult<PlaybackCredential> {
        if ttl < MIN_PLAYBACK_TTL || ttl > MAX_PLAYBACK_TTL {
            return Err(AppError::InvalidArgument(format!(
                "ttl must be between {}s and {}s",
                MIN_PLAYBACK_TTL.as_secs(),
                MAX_PLAYBACK_TTL.as_secs()
            )));
        }

        let record = self.load(ctx, id, Scope::Active).await?;
        let provider_asset_id = match (&record.state, &record.provider_asset_id) {
            (AssetState::Ready, Some(provider_asset_id)) => provider_asset_id,
            _ => {
                return Err(AppError::Conflict(format!(
                    "Asset {} is {}; only ready assets can be played",
                    id,
                    record.state.as_str()
                )))
            }
        };

        if let Some(viewer) = viewer {
            claims.insert("viewer".to_string(), serde_json::Value::String(viewer));
        }
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| AppError::InvalidArgument(format!("Invalid ttl: {}", e)))?;
        let expires_at = Utc::now() + ttl;
        if ctx.is_canceled() {
            return Err(AppError::Canceled("Request canceled before signing".to_string()));
        }
        let token = self.provider.sign_playback_credential(
            record.kind,
            provider_asset_id,
            expires_at,
            claims,
        )?;

        Ok(PlaybackCredential { token, expires_at })
    }

    /// Edits descriptive metadata of an active asset. Metadata failures are
    /// the operation's failures here since no record write precedes them.
    pub async fn update_metadata(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        patch: MetadataPatch,
    ) -> AppResult<AssetMetadata> {
        patch.validate()?;
        let record = self.load(ctx, id, Scope::Active).await?;
        let owners: Vec<OwnerRef> = record.owner().into_iter().collect();

        for _ in 0..WRITE_ATTEMPTS {
            let mut doc = self
                .store(ctx, "metadata read", self.metadata.get(id))
                .await?
                .unwrap_or_else(|| {
                    let mut doc = AssetMetadata::new(id);
                    doc.replace_owners(&owners, Utc::now());
                    doc
                });
            if patch.is_empty() {
                return Ok(doc);
            }
            doc.apply_patch(&patch);
            doc.updated_at = Utc::now();
            if self
                .store(ctx, "metadata write", self.metadata.upsert(&doc))
                .await?
            {
                doc.version += 1;
                tracing::info!(asset_id = %id, "Asset metadata updated");
                return Ok(doc);
            }
        }

        Err(AppError::Unavailable(format!(
            "Metadata for asset {} kept changing; retry the update",
            id
        )))
    }

    /// Runs a store call under the store timeout.
    async fn store<T, F>(&self, ctx: &RequestContext, what: &str, fut: F) -> AppResult<T>
    where
        F: std::future::Future<Output = AppResult<T>>,
    {
        ctx.guard(what, self.config.timeouts.store, fut).await
    }

    async fn load(&self, ctx: &RequestContext, id: Uuid, scope: Scope) -> AppResult<AssetRecord> {
        self.store(ctx, "record read", self.records.get(id, scope))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Asset {} not found", id)))
    }

    /// Applies a guarded record write; an unmet guard is a `Conflict`.
    async fn commit(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        guard: &RecordGuard,
        patch: &RecordPatch,
        lost: &str,
    ) -> AppResult<()> {
        let applied = self
            .store(ctx, "record update", self.records.update(id, guard, patch))
            .await?;
        if applied == 0 {
            return Err(AppError::Conflict(format!("Asset {}: {}", id, lost)));
        }
        Ok(())
    }

    async fn hydrate_one(&self, ctx: &RequestContext, record: AssetRecord) -> AssetView {
        let metadata = match self
            .store(ctx, "metadata read", self.metadata.get(record.id))
            .await
        {
            Ok(doc) => doc,
            Err(err) => {
                tracing::warn!(
                    asset_id = %record.id,
                    error = %err,
                    "Metadata unavailable; returning record only"
                );
                None
            }
        };
        AssetView { record, metadata }
    }

    /// Mirrors a committed change and delivers its ownership event on a task
    /// of its own, then waits for it. Dropping the caller does not stop it.
    async fn settle(
        &self,
        ctx: &RequestContext,
        asset_id: Uuid,
        op: MirrorOp,
        event: Option<OwnershipEvent>,
    ) {
        let mirror = self.mirror.clone();
        let notifier = self.notifier.clone();
        let notify_timeout = self.config.timeouts.notifier;
        let ctx = ctx.clone();

        let tail = tokio::spawn(async move {
            mirror.write(&ctx, asset_id, op).await;
            if let Some(event) = event {
                emit(notifier.as_ref(), &ctx, notify_timeout, &event).await;
            }
        });
        if let Err(err) = tail.await {
            tracing::error!(asset_id = %asset_id, error = %err, "Post-commit task failed");
        }
    }

    /// Fails with `Conflict` if `owner` holds an active asset other than `except`.
    async fn ensure_owner_free(
        &self,
        ctx: &RequestContext,
        owner: &OwnerRef,
        except: Option<Uuid>,
    ) -> AppResult<()> {
        let holder = self
            .store(ctx, "owner lookup", self.records.find_by_owner(owner))
            .await?;
        match holder {
            Some(holder) if Some(holder.id) != except => Err(AppError::Conflict(format!(
                "Owner {} is already bound to asset {}",
                owner, holder.id
            ))),
            _ => Ok(()),
        }
    }

    async fn ensure_owner_exists(&self, ctx: &RequestContext, owner: &OwnerRef) -> AppResult<()> {
        let exists = ctx
            .guard(
                "owner existence check",
                self.config.timeouts.notifier,
                self.notifier.owner_exists(owner),
            )
            .await?;
        if !exists {
            return Err(AppError::NotFound(format!("Owner {} does not exist", owner)));
        }
        Ok(())
    }
}

/// Delivers an ownership event; failures are logged only.
async fn emit(
    notifier: &dyn OwnershipNotifier,
    ctx: &RequestContext,
    timeout: Duration,
    event: &OwnershipEvent,
) {
    let result = ctx
        .guard("ownership notification", timeout, notifier.notify(event))
        .await;
    if let Err(err) = result {
        tracing::warn!(
            asset_id = %event.asset_id,
            owner_id = %event.owner_id,
            owner_type = %event.owner_type,
            kind = ?event.kind,
            error = %err,
            "Ownership notification failed"
        );
    }
}
