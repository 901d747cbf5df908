//! Database wiring: connection pool and schema.

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::error::{StoreError, map_sqlx_error};

const SCHEMA: &str = include_str!("../migrations/0001_ledger.sql");

pub async fn connect(database_url: &str, acquire_timeout: Duration) -> Result<PgPool, StoreError> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(acquire_timeout)
        .connect(database_url)
        .await
        .map_err(|e| map_sqlx_error("connect", e))
}

/// Apply the ledger schema. Every statement is idempotent, so this runs on
/// each start.
pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| map_sqlx_error("migrate", e))?;
    info!("ledger schema applied");
    Ok(())
}
