//! Ownership reconciler.
//!
//! An asset has at most one owner and an owner holds at most one active
//! asset. Both rules are enforced by the record store at write time; the
//! reads here only pick the right error to report.

use chrono::Utc;
use uuid::Uuid;

use super::LifecycleEngine;
use crate::context::RequestContext;
use crate::error::{AppError, AppResult};
use crate::mirror::MirrorOp;
use crate::models::{AssetRecord, Field, OwnerRef, OwnershipEvent};
use crate::store::{RecordGuard, RecordPatch, Scope};

/// Owners to add and remove to turn one owner set into another.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnershipDiff {
    pub to_add: Vec<OwnerRef>,
    pub to_remove: Vec<OwnerRef>,
}

impl OwnershipDiff {
    /// Order-preserving set difference; duplicates are ignored.
    pub fn compute(current: &[OwnerRef], requested: &[OwnerRef]) -> Self {
        let mut diff = Self::default();
        for owner in requested {
            if !current.contains(owner) && !diff.to_add.contains(owner) {
                diff.to_add.push(owner.clone());
            }
        }
        for owner in current {
            if !requested.contains(owner) && !diff.to_remove.contains(owner) {
                diff.to_remove.push(owner.clone());
            }
        }
        diff
    }

    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

impl LifecycleEngine {
    /// Binds `owner` to an unowned asset. Re-binding the same owner succeeds
    /// without changes.
    pub async fn associate(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        owner: OwnerRef,
    ) -> AppResult<AssetRecord> {
        owner.validate()?;
        let mut record = self.load(ctx, id, Scope::Active).await?;

        match record.owner() {
            Some(current) if current == owner => return Ok(record),
            Some(current) => {
                return Err(AppError::Conflict(format!(
                    "Asset {} is already owned by {}",
                    id, current
                )))
            }
            None => {}
        }

        self.ensure_owner_free(ctx, &owner, Some(id)).await?;
        self.ensure_owner_exists(ctx, &owner).await?;

        let patch = RecordPatch {
            owner: Field::Set(owner.clone()),
            ..Default::default()
        };
        let guard = RecordGuard::active().owned_by(None);
        let applied = self
            .store(ctx, "record update", self.records.update(id, &guard, &patch))
            .await?;
        if applied == 0 {
            // Lost a race; succeed only if the winner bound the same owner.
            let current = self.load(ctx, id, Scope::Active).await?;
            if current.is_owned_by(&owner) {
                return Ok(current);
            }
            return Err(AppError::Conflict(format!(
                "Asset {} changed ownership concurrently",
                id
            )));
        }
        patch.apply(&mut record, Utc::now());

        tracing::info!(
            asset_id = %id,
            owner_id = %owner.owner_id,
            owner_type = %owner.owner_type,
            "Owner associated"
        );
        let event = OwnershipEvent::associated(id, &owner);
        self.settle(ctx, id, MirrorOp::AddOwner(owner), Some(event))
            .await;
        Ok(record)
    }

    /// Unbinds `owner`. Succeeds without changes when it is not bound.
    pub async fn deassociate(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        owner: OwnerRef,
    ) -> AppResult<AssetRecord> {
        owner.validate()?;
        let mut record = self.load(ctx, id, Scope::Active).await?;
        if !record.is_owned_by(&owner) {
            return Ok(record);
        }

        let patch = RecordPatch {
            owner: Field::Clear,
            ..Default::default()
        };
        let guard = RecordGuard::active().owned_by(Some(owner.clone()));
        let applied = self
            .store(ctx, "record update", self.records.update(id, &guard, &patch))
            .await?;
        if applied == 0 {
            let current = self.load(ctx, id, Scope::Active).await?;
            if current.is_owned_by(&owner) {
                return Err(AppError::Conflict(format!(
                    "Asset {} changed concurrently",
                    id
                )));
            }
            return Ok(current);
        }
        patch.apply(&mut record, Utc::now());

        tracing::info!(
            asset_id = %id,
            owner_id = %owner.owner_id,
            owner_type = %owner.owner_type,
            "Owner deassociated"
        );
        let event = OwnershipEvent::deassociated(id, &owner);
        self.settle(ctx, id, MirrorOp::RemoveOwner(owner), Some(event))
            .await;
        Ok(record)
    }

    /// Makes the asset's owner set equal to `requested` (zero or one owner).
    ///
    /// A change of owner runs as deassociate then associate. If the second
    /// half fails the asset is left unowned and the error is returned.
    pub async fn update_owners(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        requested: Vec<OwnerRef>,
    ) -> AppResult<AssetRecord> {
        let mut unique: Vec<OwnerRef> = Vec::with_capacity(requested.len());
        for owner in requested {
            if !unique.contains(&owner) {
                unique.push(owner);
            }
        }
        if unique.len() > 1 {
            return Err(AppError::InvalidArgument(
                "An asset can have at most one owner".to_string(),
            ));
        }
        for owner in &unique {
            owner.validate()?;
        }

        let mut record = self.load(ctx, id, Scope::Active).await?;
        let current: Vec<OwnerRef> = record.owner().into_iter().collect();
        let diff = OwnershipDiff::compute(&current, &unique);
        if diff.is_empty() {
            return Ok(record);
        }

        for owner in diff.to_remove {
            record = self.deassociate(ctx, id, owner).await?;
        }
        for owner in diff.to_add {
            record = self.associate(ctx, id, owner).await?;
        }
        Ok(record)
    }
}
