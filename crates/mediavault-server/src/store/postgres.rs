//! Postgres-backed record store.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{ListQuery, OwnerGuard, RecordGuard, RecordPatch, RecordStore, Scope};
use crate::error::{AppError, AppResult};
use crate::models::{AssetRecord, Field, NewAssetRecord, OwnerRef};

const RECORD_COLUMNS: &str = "id, kind, provider_upload_id, provider_asset_id, owner_id, \
     owner_type, state, created_at, updated_at, deleted_at";

/// Constraint names from `migrations/records`.
const UPLOAD_ID_CONSTRAINT: &str = "assets_provider_upload_id_key";
const PRIMARY_KEY_CONSTRAINT: &str = "assets_pkey";

#[derive(Debug, Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn scope_clause(scope: Scope) -> &'static str {
    match scope {
        Scope::Active => " AND deleted_at IS NULL",
        Scope::Deleted => " AND deleted_at IS NOT NULL",
        Scope::All => "",
    }
}

/// Maps unique violations on insert to the right error kind.
fn insert_error(err: sqlx::Error, new: &NewAssetRecord) -> AppError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return match db_err.constraint() {
                Some(UPLOAD_ID_CONSTRAINT) => AppError::AlreadyExists(format!(
                    "Upload {} is already tracked",
                    new.provider_upload_id
                )),
                Some(PRIMARY_KEY_CONSTRAINT) => {
                    AppError::AlreadyExists(format!("Asset {} already exists", new.id))
                }
                _ => match &new.owner {
                    Some(owner) => AppError::Conflict(format!(
                        "Owner {} is already bound to another asset",
                        owner
                    )),
                    None => err.into(),
                },
            };
        }
    }
    err.into()
}

fn push_owner_guard(qb: &mut QueryBuilder<'_, Postgres>, owner: &OwnerGuard) {
    match owner {
        OwnerGuard::Any => {}
        OwnerGuard::Unowned => {
            qb.push(" AND owner_id IS NULL");
        }
        OwnerGuard::Is(OwnerRef {
            owner_id,
            owner_type,
        }) => {
            qb.push(" AND owner_id = ")
                .push_bind(owner_id.clone())
                .push(" AND owner_type = ")
                .push_bind(owner_type.clone());
        }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn insert(&self, new: &NewAssetRecord) -> AppResult<AssetRecord> {
        let sql = format!(
            "INSERT INTO assets (id, kind, provider_upload_id, owner_id, owner_type, state) \
             VALUES ($1, $2, $3, $4, $5, 'pending') RETURNING {}",
            RECORD_COLUMNS
        );
        sqlx::query_as::<_, AssetRecord>(&sql)
            .bind(new.id)
            .bind(new.kind)
            .bind(&new.provider_upload_id)
            .bind(new.owner.as_ref().map(|o| o.owner_id.as_str()))
            .bind(new.owner.as_ref().map(|o| o.owner_type.as_str()))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| insert_error(e, new))
    }

    async fn get(&self, id: Uuid, scope: Scope) -> AppResult<Option<AssetRecord>> {
        let sql = format!(
            "SELECT {} FROM assets WHERE id = $1{}",
            RECORD_COLUMNS,
            scope_clause(scope)
        );
        let record = sqlx::query_as::<_, AssetRecord>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn find_by_upload_id(&self, upload_id: &str) -> AppResult<Option<AssetRecord>> {
        let sql = format!(
            "SELECT {} FROM assets WHERE provider_upload_id = $1",
            RECORD_COLUMNS
        );
        let record = sqlx::query_as::<_, AssetRecord>(&sql)
            .bind(upload_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn find_by_owner(&self, owner: &OwnerRef) -> AppResult<Option<AssetRecord>> {
        let sql = format!(
            "SELECT {} FROM assets \
             WHERE owner_id = $1 AND owner_type = $2 AND deleted_at IS NULL",
            RECORD_COLUMNS
        );
        let record = sqlx::query_as::<_, AssetRecord>(&sql)
            .bind(&owner.owner_id)
            .bind(&owner.owner_type)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn list(&self, query: &ListQuery) -> AppResult<Vec<AssetRecord>> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {} FROM assets WHERE TRUE", RECORD_COLUMNS));
        qb.push(scope_clause(query.scope));
        if query.unowned_only {
            qb.push(" AND owner_id IS NULL");
        }
        if let Some(kind) = query.kind {
            qb.push(" AND kind = ").push_bind(kind);
        }
        if let Some(state) = query.state {
            qb.push(" AND state = ").push_bind(state);
        }
        qb.push(" ORDER BY created_at DESC, id LIMIT ")
            .push_bind(query.limit)
            .push(" OFFSET ")
            .push_bind(query.offset);

        let records = qb
            .build_query_as::<AssetRecord>()
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    async fn update(&self, id: Uuid, guard: &RecordGuard, patch: &RecordPatch) -> AppResult<u64> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new("UPDATE assets SET updated_at = NOW()");

        if let Some(state) = patch.state {
            qb.push(", state = ").push_bind(state);
        }
        match &patch.provider_asset_id {
            Field::Unchanged => {}
            Field::Clear => {
                qb.push(", provider_asset_id = NULL");
            }
            Field::Set(asset_id) => {
                qb.push(", provider_asset_id = ").push_bind(asset_id.clone());
            }
        }
        match &patch.owner {
            Field::Unchanged => {}
            Field::Clear => {
                qb.push(", owner_id = NULL, owner_type = NULL");
            }
            Field::Set(owner) => {
                qb.push(", owner_id = ")
                    .push_bind(owner.owner_id.clone())
                    .push(", owner_type = ")
                    .push_bind(owner.owner_type.clone());
            }
        }
        match &patch.deleted_at {
            Field::Unchanged => {}
            Field::Clear => {
                qb.push(", deleted_at = NULL");
            }
            Field::Set(at) => {
                qb.push(", deleted_at = ").push_bind(*at);
            }
        }

        qb.push(" WHERE id = ").push_bind(id);
        if let Some(states) = guard.states.as_ref().filter(|s| !s.is_empty()) {
            qb.push(" AND state IN (");
            let mut separated = qb.separated(", ");
            for state in states {
                separated.push_bind(*state);
            }
            separated.push_unseparated(")");
        }
        match guard.deleted {
            Some(true) => {
                qb.push(" AND deleted_at IS NOT NULL");
            }
            Some(false) => {
                qb.push(" AND deleted_at IS NULL");
            }
            None => {}
        }
        push_owner_guard(&mut qb, &guard.owner);

        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn delete_row(&self, id: Uuid) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM assets WHERE id = $1 AND deleted_at IS NOT NULL")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn health_check(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
