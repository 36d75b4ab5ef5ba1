//! Postgres-backed metadata store, one JSONB document per asset.

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use super::MetadataStore;
use crate::error::AppResult;
use crate::models::AssetMetadata;

#[derive(Debug, Clone)]
pub struct PgMetadataStore {
    pool: PgPool,
}

impl PgMetadataStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MetadataStore for PgMetadataStore {
    async fn get(&self, asset_id: Uuid) -> AppResult<Option<AssetMetadata>> {
        let row: Option<(Json<AssetMetadata>, i64)> =
            sqlx::query_as("SELECT document, version FROM asset_metadata WHERE asset_id = $1")
                .bind(asset_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(with_version))
    }

    async fn upsert(&self, doc: &AssetMetadata) -> AppResult<bool> {
        let result = if doc.version == 0 {
            sqlx::query(
                r#"
                INSERT INTO asset_metadata (asset_id, document, version, updated_at)
                VALUES ($1, $2, 1, NOW())
                ON CONFLICT (asset_id) DO NOTHING
                "#,
            )
            .bind(doc.asset_id)
            .bind(Json(doc))
            .execute(&self.pool)
            .await?
        } else {
            sqlx::query(
                r#"
                UPDATE asset_metadata
                SET document = $2, version = version + 1, updated_at = NOW()
                WHERE asset_id = $1 AND version = $3
                "#,
            )
            .bind(doc.asset_id)
            .bind(Json(doc))
            .bind(doc.version)
            .execute(&self.pool)
            .await?
        };
        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, asset_id: Uuid) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM asset_metadata WHERE asset_id = $1")
            .bind(asset_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn list_by_keys(&self, asset_ids: &[Uuid]) -> AppResult<Vec<AssetMetadata>> {
        if asset_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<(Json<AssetMetadata>, i64)> = sqlx::query_as(
            "SELECT document, version FROM asset_metadata WHERE asset_id = ANY($1)",
        )
        .bind(asset_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(with_version).collect())
    }
}

fn with_version((Json(mut doc), version): (Json<AssetMetadata>, i64)) -> AssetMetadata {
    doc.version = version;
    doc
}
