//! Postgres-backed catalog records (`stock_items`, `stock_locations`).
//!
//! Scoped reads and replaces carry `organization_id` in the WHERE clause; only
//! the raw `fetch` used by the gateway's ownership check omits it.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;

use stockledger_core::{ItemId, LocationId, OrganizationId};
use stockledger_ledger::{StockItem, StockItemFilter, StockLocation, StockLocationFilter};

use super::RecordStore;
use crate::error::{StoreError, map_sqlx_error};

#[derive(Debug, Clone)]
pub struct PostgresCatalogStore {
    pool: Arc<PgPool>,
}

impl PostgresCatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl RecordStore<StockItem> for PostgresCatalogStore {
    async fn fetch(&self, id: ItemId) -> Result<Option<StockItem>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT item_id, organization_id, name, canonical_unit, active
            FROM stock_items
            WHERE item_id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_stock_item", e))?;

        row.map(|r| StockItemRow::from_row(&r).map(Into::into))
            .transpose()
            .map_err(|e| map_sqlx_error("fetch_stock_item", e))
    }

    #[instrument(skip(self, filter), fields(organization_id = %organization_id), err)]
    async fn fetch_scoped(
        &self,
        organization_id: OrganizationId,
        filter: &StockItemFilter,
    ) -> Result<Vec<StockItem>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT item_id, organization_id, name, canonical_unit, active
            FROM stock_items
            WHERE organization_id = $1
                AND ($2::bool IS NULL OR active = $2)
                AND ($3::text IS NULL OR name ILIKE '%' || $3 || '%')
            ORDER BY name, item_id
            "#,
        )
        .bind(organization_id.as_uuid())
        .bind(filter.active)
        .bind(filter.name_contains.as_deref())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_stock_items", e))?;

        rows.iter()
            .map(|r| StockItemRow::from_row(r).map(Into::into))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_sqlx_error("list_stock_items", e))
    }

    #[instrument(skip(self, record), fields(organization_id = %record.organization_id, item_id = %record.id), err)]
    async fn insert(&self, record: StockItem) -> Result<StockItem, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO stock_items (item_id, organization_id, name, canonical_unit, active)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.organization_id.as_uuid())
        .bind(&record.name)
        .bind(&record.canonical_unit)
        .bind(record.active)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_stock_item", e))?;

        Ok(record)
    }

    #[instrument(skip(self, record), fields(organization_id = %record.organization_id, item_id = %record.id), err)]
    async fn replace(&self, record: StockItem) -> Result<StockItem, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE stock_items
            SET name = $3, canonical_unit = $4, active = $5
            WHERE item_id = $1 AND organization_id = $2
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.organization_id.as_uuid())
        .bind(&record.name)
        .bind(&record.canonical_unit)
        .bind(record.active)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("replace_stock_item", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("stock_item {}", record.id)));
        }
        Ok(record)
    }
}

#[async_trait]
impl RecordStore<StockLocation> for PostgresCatalogStore {
    async fn fetch(&self, id: LocationId) -> Result<Option<StockLocation>, StoreError> {
        let row = sqlx::query(
            "SELECT location_id, organization_id, name FROM stock_locations WHERE location_id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_stock_location", e))?;

        row.map(|r| StockLocationRow::from_row(&r).map(Into::into))
            .transpose()
            .map_err(|e| map_sqlx_error("fetch_stock_location", e))
    }

    #[instrument(skip(self, filter), fields(organization_id = %organization_id), err)]
    async fn fetch_scoped(
        &self,
        organization_id: OrganizationId,
        filter: &StockLocationFilter,
    ) -> Result<Vec<StockLocation>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT location_id, organization_id, name
            FROM stock_locations
            WHERE organization_id = $1
                AND ($2::text IS NULL OR name ILIKE '%' || $2 || '%')
            ORDER BY name, location_id
            "#,
        )
        .bind(organization_id.as_uuid())
        .bind(filter.name_contains.as_deref())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_stock_locations", e))?;

        rows.iter()
            .map(|r| StockLocationRow::from_row(r).map(Into::into))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_sqlx_error("list_stock_locations", e))
    }

    async fn insert(&self, record: StockLocation) -> Result<StockLocation, StoreError> {
        sqlx::query(
            "INSERT INTO stock_locations (location_id, organization_id, name) VALUES ($1, $2, $3)",
        )
        .bind(record.id.as_uuid())
        .bind(record.organization_id.as_uuid())
        .bind(&record.name)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_stock_location", e))?;

        Ok(record)
    }

    async fn replace(&self, record: StockLocation) -> Result<StockLocation, StoreError> {
        let result = sqlx::query(
            "UPDATE stock_locations SET name = $3 WHERE location_id = $1 AND organization_id = $2",
        )
        .bind(record.id.as_uuid())
        .bind(record.organization_id.as_uuid())
        .bind(&record.name)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("replace_stock_location", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("stock_location {}", record.id)));
        }
        Ok(record)
    }
}

#[derive(Debug)]
struct StockItemRow {
    item_id: uuid::Uuid,
    organization_id: uuid::Uuid,
    name: String,
    canonical_unit: String,
    active: bool,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StockItemRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StockItemRow {
            item_id: row.try_get("item_id")?,
            organization_id: row.try_get("organization_id")?,
            name: row.try_get("name")?,
            canonical_unit: row.try_get("canonical_unit")?,
            active: row.try_get("active")?,
        })
    }
}

impl From<StockItemRow> for StockItem {
    fn from(row: StockItemRow) -> Self {
        StockItem {
            id: ItemId::from_uuid(row.item_id),
            organization_id: OrganizationId::from_uuid(row.organization_id),
            name: row.name,
            canonical_unit: row.canonical_unit,
            active: row.active,
        }
    }
}

#[derive(Debug)]
struct StockLocationRow {
    location_id: uuid::Uuid,
    organization_id: uuid::Uuid,
    name: String,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StockLocationRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StockLocationRow {
            location_id: row.try_get("location_id")?,
            organization_id: row.try_get("organization_id")?,
            name: row.try_get("name")?,
        })
    }
}

impl From<StockLocationRow> for StockLocation {
    fn from(row: StockLocationRow) -> Self {
        StockLocation {
            id: LocationId::from_uuid(row.location_id),
            organization_id: OrganizationId::from_uuid(row.organization_id),
            name: row.name,
        }
    }
}
