//! Database connection and pool management.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Creates a database connection pool.
///
/// # Arguments
/// * `database_url` - PostgreSQL connection string
/// * `max_connections` - Upper bound on pooled connections
/// * `acquire_timeout` - How long a caller waits for a free connection
///
/// # Returns
/// A configured PgPool ready for use.
pub async fn create_pool(
    database_url: &str,
    max_connections: u32,
    acquire_timeout: Duration,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(acquire_timeout)
        .connect(database_url)
        .await
}

/// Runs pending migrations for the record store.
///
/// The record and metadata stores may share a database, so each migrator
/// ignores versions applied by the other.
pub async fn run_record_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    let mut migrator = sqlx::migrate!("./migrations/records");
    migrator.set_ignore_missing(true);
    migrator.run(pool).await
}

/// Runs pending migrations for the metadata store.
pub async fn run_metadata_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    let mut migrator = sqlx::migrate!("./migrations/metadata");
    migrator.set_ignore_missing(true);
    migrator.run(pool).await
}
