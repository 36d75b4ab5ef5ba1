//! Record store: the authoritative relational store of asset rows.
//!
//! All state changes go through [`RecordStore::update`], a compare-and-swap
//! that applies a [`RecordPatch`] only when the row still satisfies a
//! [`RecordGuard`]. The affected-row count tells the engine whether its
//! precondition held at write time.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{AssetKind, AssetRecord, AssetState, Field, NewAssetRecord, OwnerRef};

pub use memory::MemoryRecordStore;
pub use postgres::PgRecordStore;

/// Default page size for listings.
pub const DEFAULT_LIST_LIMIT: i64 = 50;
/// Largest page a caller may request.
pub const MAX_LIST_LIMIT: i64 = 500;

/// Which rows a read may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Rows without the soft-delete marker.
    #[default]
    Active,
    /// Soft-deleted rows only.
    Deleted,
    /// Every row.
    All,
}

impl Scope {
    pub fn admits(&self, record: &AssetRecord) -> bool {
        match self {
            Scope::Active => !record.is_deleted(),
            Scope::Deleted => record.is_deleted(),
            Scope::All => true,
        }
    }
}

/// Listing filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub scope: Scope,
    /// Only rows without an owner.
    pub unowned_only: bool,
    pub kind: Option<AssetKind>,
    pub state: Option<AssetState>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            scope: Scope::Active,
            unowned_only: false,
            kind: None,
            state: None,
            limit: DEFAULT_LIST_LIMIT,
            offset: 0,
        }
    }
}

impl ListQuery {
    /// Clamps paging to sane bounds.
    pub fn normalized(mut self) -> Self {
        self.limit = self.limit.clamp(1, MAX_LIST_LIMIT);
        self.offset = self.offset.max(0);
        self
    }

    pub fn matches(&self, record: &AssetRecord) -> bool {
        self.scope.admits(record)
            && (!self.unowned_only || record.owner().is_none())
            && self.kind.map_or(true, |kind| record.kind == kind)
            && self.state.map_or(true, |state| record.state == state)
    }
}

/// Expected owner at write time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OwnerGuard {
    #[default]
    Any,
    Unowned,
    Is(OwnerRef),
}

/// Preconditions a row must satisfy for an update to apply.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RecordGuard {
    /// Row must be in one of these states (any state when `None`).
    pub states: Option<Vec<AssetState>>,
    /// `Some(true)`: must be soft-deleted; `Some(false)`: must be active.
    pub deleted: Option<bool>,
    pub owner: OwnerGuard,
}

impl RecordGuard {
    pub fn active() -> Self {
        Self {
            deleted: Some(false),
            ..Default::default()
        }
    }

    pub fn deleted() -> Self {
        Self {
            deleted: Some(true),
            ..Default::default()
        }
    }

    pub fn in_state(mut self, state: AssetState) -> Self {
        self.states = Some(vec![state]);
        self
    }

    pub fn owned_by(mut self, owner: Option<OwnerRef>) -> Self {
        self.owner = match owner {
            Some(owner) => OwnerGuard::Is(owner),
            None => OwnerGuard::Unowned,
        };
        self
    }

    pub fn holds_for(&self, record: &AssetRecord) -> bool {
        let state_ok = self
            .states
            .as_ref()
            .map_or(true, |states| states.contains(&record.state));
        let deleted_ok = self.deleted.map_or(true, |d| d == record.is_deleted());
        let owner_ok = match &self.owner {
            OwnerGuard::Any => true,
            OwnerGuard::Unowned => record.owner().is_none(),
            OwnerGuard::Is(owner) => record.is_owned_by(owner),
        };
        state_ok && deleted_ok && owner_ok
    }
}

/// Field-level changes to an asset row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordPatch {
    pub state: Option<AssetState>,
    pub provider_asset_id: Field<String>,
    /// Setting or clearing the owner always writes both owner columns.
    pub owner: Field<OwnerRef>,
    pub deleted_at: Field<DateTime<Utc>>,
}

impl RecordPatch {
    pub fn state(state: AssetState) -> Self {
        Self {
            state: Some(state),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_none()
            && self.provider_asset_id.is_unchanged()
            && self.owner.is_unchanged()
            && self.deleted_at.is_unchanged()
    }

    /// Applies the patch to an in-memory row.
    pub fn apply(&self, record: &mut AssetRecord, now: DateTime<Utc>) {
        if let Some(state) = self.state {
            record.state = state;
        }
        self.provider_asset_id.apply_to(&mut record.provider_asset_id);
        match &self.owner {
            Field::Unchanged => {}
            Field::Clear => {
                record.owner_id = None;
                record.owner_type = None;
            }
            Field::Set(owner) => {
                record.owner_id = Some(owner.owner_id.clone());
                record.owner_type = Some(owner.owner_type.clone());
            }
        }
        self.deleted_at.apply_to(&mut record.deleted_at);
        record.updated_at = now;
    }
}

/// Relational CRUD over asset rows.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Inserts a `pending` row. Owner or upload id collisions fail with
    /// `Conflict` / `AlreadyExists`.
    async fn insert(&self, new: &NewAssetRecord) -> AppResult<AssetRecord>;

    async fn get(&self, id: Uuid, scope: Scope) -> AppResult<Option<AssetRecord>>;

    /// Looks a row up by provider upload id, including soft-deleted rows.
    async fn find_by_upload_id(&self, upload_id: &str) -> AppResult<Option<AssetRecord>>;

    /// The active row bound to `owner`, if any.
    async fn find_by_owner(&self, owner: &OwnerRef) -> AppResult<Option<AssetRecord>>;

    /// Rows matching `query`, newest first.
    async fn list(&self, query: &ListQuery) -> AppResult<Vec<AssetRecord>>;

    /// Applies `patch` if the row satisfies `guard`; returns rows affected.
    async fn update(&self, id: Uuid, guard: &RecordGuard, patch: &RecordPatch) -> AppResult<u64>;

    /// Removes a soft-deleted row; returns rows affected.
    async fn delete_row(&self, id: Uuid) -> AppResult<u64>;

    async fn health_check(&self) -> AppResult<()>;
}
