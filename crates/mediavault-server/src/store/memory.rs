//! In-process record store.
//!
//! Enforces the same uniqueness rules as the Postgres schema, so engine tests
//! and the `memory` backend observe the same conflicts.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{ListQuery, RecordGuard, RecordPatch, RecordStore, Scope};
use crate::error::{AppError, AppResult};
use crate::models::{AssetRecord, Field, NewAssetRecord, OwnerRef};

#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    rows: Mutex<HashMap<Uuid, AssetRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every row, soft-deleted ones included.
    pub async fn snapshot(&self) -> Vec<AssetRecord> {
        self.rows.lock().await.values().cloned().collect()
    }
}

fn owner_holder<'a>(
    rows: &'a HashMap<Uuid, AssetRecord>,
    owner: &OwnerRef,
    except: Option<Uuid>,
) -> Option<&'a AssetRecord> {
    rows.values()
        .find(|row| Some(row.id) != except && !row.is_deleted() && row.is_owned_by(owner))
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn insert(&self, new: &NewAssetRecord) -> AppResult<AssetRecord> {
        let mut rows = self.rows.lock().await;

        if rows.contains_key(&new.id) {
            return Err(AppError::AlreadyExists(format!("Asset {} already exists", new.id)));
        }
        if rows
            .values()
            .any(|row| row.provider_upload_id.as_deref() == Some(new.provider_upload_id.as_str()))
        {
            return Err(AppError::AlreadyExists(format!(
                "Upload {} is already tracked",
                new.provider_upload_id
            )));
        }
        if let Some(owner) = &new.owner {
            if let Some(holder) = owner_holder(&rows, owner, None) {
                return Err(AppError::Conflict(format!(
                    "Owner {} is already bound to asset {}",
                    owner, holder.id
                )));
            }
        }

        let record = AssetRecord::from_new(new, Utc::now());
        rows.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: Uuid, scope: Scope) -> AppResult<Option<AssetRecord>> {
        let rows = self.rows.lock().await;
        Ok(rows.get(&id).filter(|row| scope.admits(row)).cloned())
    }

    async fn find_by_upload_id(&self, upload_id: &str) -> AppResult<Option<AssetRecord>> {
        let rows = self.rows.lock().await;
        Ok(rows
            .values()
            .find(|row| row.provider_upload_id.as_deref() == Some(upload_id))
            .cloned())
    }

    async fn find_by_owner(&self, owner: &OwnerRef) -> AppResult<Option<AssetRecord>> {
        let rows = self.rows.lock().await;
        Ok(owner_holder(&rows, owner, None).cloned())
    }

    async fn list(&self, query: &ListQuery) -> AppResult<Vec<AssetRecord>> {
        let rows = self.rows.lock().await;
        let mut matching: Vec<AssetRecord> = rows
            .values()
            .filter(|row| query.matches(row))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(matching
            .into_iter()
            .skip(query.offset.max(0) as usize)
            .take(query.limit.max(0) as usize)
            .collect())
    }

    async fn update(&self, id: Uuid, guard: &RecordGuard, patch: &RecordPatch) -> AppResult<u64> {
        let mut rows = self.rows.lock().await;

        match rows.get(&id) {
            Some(row) if guard.holds_for(row) => {}
            _ => return Ok(0),
        }

        if let Field::Set(owner) = &patch.owner {
            if let Some(holder) = owner_holder(&rows, owner, Some(id)) {
                return Err(AppError::Conflict(format!(
                    "Owner {} is already bound to asset {}",
                    owner, holder.id
                )));
            }
        }
        if let Field::Set(asset_id) = &patch.provider_asset_id {
            if rows.values().any(|row| {
                row.id != id && row.provider_asset_id.as_deref() == Some(asset_id.as_str())
            }) {
                return Err(AppError::Conflict(format!(
                    "Provider asset {} is already tracked",
                    asset_id
                )));
            }
        }

        match rows.get_mut(&id) {
            Some(row) => {
                patch.apply(row, Utc::now());
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_row(&self, id: Uuid) -> AppResult<u64> {
        let mut rows = self.rows.lock().await;
        match rows.get(&id) {
            Some(row) if row.is_deleted() => {
                rows.remove(&id);
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn health_check(&self) -> AppResult<()> {
        Ok(())
    }
}
