//! In-process metadata store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::MetadataStore;
use crate::error::AppResult;
use crate::models::AssetMetadata;

#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    docs: Mutex<HashMap<Uuid, AssetMetadata>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.docs.lock().await.len()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn get(&self, asset_id: Uuid) -> AppResult<Option<AssetMetadata>> {
        Ok(self.docs.lock().await.get(&asset_id).cloned())
    }

    async fn upsert(&self, doc: &AssetMetadata) -> AppResult<bool> {
        let mut docs = self.docs.lock().await;
        let stored = docs.get(&doc.asset_id).map_or(0, |current| current.version);
        if stored != doc.version {
            return Ok(false);
        }
        let mut next = doc.clone();
        next.version = stored + 1;
        docs.insert(doc.asset_id, next);
        Ok(true)
    }

    async fn delete(&self, asset_id: Uuid) -> AppResult<u64> {
        Ok(self.docs.lock().await.remove(&asset_id).map_or(0, |_| 1))
    }

    async fn list_by_keys(&self, asset_ids: &[Uuid]) -> AppResult<Vec<AssetMetadata>> {
        let docs = self.docs.lock().await;
        Ok(asset_ids
            .iter()
            .filter_map(|id| docs.get(id).cloned())
            .collect())
    }
}
