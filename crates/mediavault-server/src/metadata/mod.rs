//! Metadata store: one schema-flexible document per asset.
//!
//! The record store is authoritative; documents here are a mirror that the
//! engine keeps in step on a best-effort basis and the reconciliation sweep
//! repairs when they drift.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::AssetMetadata;

pub use memory::MemoryMetadataStore;
pub use postgres::PgMetadataStore;

/// Read-modify-write rounds before a contended document write gives up.
pub const WRITE_ATTEMPTS: usize = 5;

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get(&self, asset_id: Uuid) -> AppResult<Option<AssetMetadata>>;

    /// Writes the whole document if the stored copy is still at
    /// `doc.version` (0 meaning absent), bumping the stored version.
    /// Returns `false` when another writer got there first.
    async fn upsert(&self, doc: &AssetMetadata) -> AppResult<bool>;

    /// Removes a document; returns documents affected.
    async fn delete(&self, asset_id: Uuid) -> AppResult<u64>;

    /// Documents for the given assets, in no particular order. Missing keys
    /// are skipped.
    async fn list_by_keys(&self, asset_ids: &[Uuid]) -> AppResult<Vec<AssetMetadata>>;
}
