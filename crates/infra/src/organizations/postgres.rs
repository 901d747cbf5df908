//! Postgres-backed organization directory.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;

use stockledger_core::OrganizationId;
use stockledger_tenancy::{NewOrganization, Organization};

use super::OrganizationStore;
use crate::error::{StoreError, map_sqlx_error};

const SELECT_ORGANIZATION: &str = r#"
    SELECT organization_id, display_name, routing_key, api_key, active, created_at, deactivated_at
    FROM organizations
"#;

#[derive(Debug, Clone)]
pub struct PostgresOrganizationStore {
    pool: Arc<PgPool>,
}

impl PostgresOrganizationStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    async fn fetch_one_where(
        &self,
        operation: &'static str,
        predicate: &str,
        value: &str,
    ) -> Result<Option<Organization>, StoreError> {
        let sql = format!("{SELECT_ORGANIZATION} WHERE {predicate} LIMIT 1");
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;

        row.map(|r| OrganizationRow::from_row(&r).map(Into::into))
            .transpose()
            .map_err(|e| map_sqlx_error(operation, e))
    }
}

#[async_trait]
impl OrganizationStore for PostgresOrganizationStore {
    #[instrument(skip(self, new), fields(display_name = %new.display_name), err)]
    async fn create(&self, new: NewOrganization) -> Result<Organization, StoreError> {
        let org = new.into_organization(Utc::now())?;

        sqlx::query(
            r#"
            INSERT INTO organizations
                (organization_id, display_name, routing_key, api_key, active, created_at)
            VALUES ($1, $2, $3, $4, TRUE, $5)
            "#,
        )
        .bind(org.id.as_uuid())
        .bind(&org.display_name)
        .bind(org.routing_key.as_deref())
        .bind(org.api_key.as_deref())
        .bind(org.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_organization", e))?;

        Ok(org)
    }

    #[instrument(skip(self), fields(organization_id = %id), err)]
    async fn deactivate(&self, id: OrganizationId) -> Result<Organization, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE organizations
            SET active = FALSE,
                deactivated_at = COALESCE(deactivated_at, now())
            WHERE organization_id = $1
            RETURNING organization_id, display_name, routing_key, api_key, active, created_at, deactivated_at
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("deactivate_organization", e))?
        .ok_or_else(|| StoreError::NotFound(format!("organization {id}")))?;

        OrganizationRow::from_row(&row)
            .map(Into::into)
            .map_err(|e| map_sqlx_error("deactivate_organization", e))
    }

    async fn get(&self, id: OrganizationId) -> Result<Option<Organization>, StoreError> {
        let sql = format!("{SELECT_ORGANIZATION} WHERE organization_id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_organization", e))?;

        row.map(|r| OrganizationRow::from_row(&r).map(Into::into))
            .transpose()
            .map_err(|e| map_sqlx_error("get_organization", e))
    }

    async fn find_by_routing_key(
        &self,
        routing_key: &str,
    ) -> Result<Option<Organization>, StoreError> {
        self.fetch_one_where("find_by_routing_key", "routing_key = $1", routing_key)
            .await
    }

    async fn find_by_api_key(&self, api_key: &str) -> Result<Option<Organization>, StoreError> {
        self.fetch_one_where("find_by_api_key", "api_key = $1", api_key)
            .await
    }

    async fn list_active(&self) -> Result<Vec<Organization>, StoreError> {
        let sql = format!("{SELECT_ORGANIZATION} WHERE active ORDER BY organization_id");
        self.fetch_many("list_active_organizations", &sql).await
    }

    async fn list_all(&self) -> Result<Vec<Organization>, StoreError> {
        let sql = format!("{SELECT_ORGANIZATION} ORDER BY organization_id");
        self.fetch_many("list_organizations", &sql).await
    }
}

impl PostgresOrganizationStore {
    async fn fetch_many(
        &self,
        operation: &'static str,
        sql: &str,
    ) -> Result<Vec<Organization>, StoreError> {
        let rows = sqlx::query(sql)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;

        rows.iter()
            .map(|r| OrganizationRow::from_row(r).map(Into::into))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_sqlx_error(operation, e))
    }
}

#[derive(Debug)]
struct OrganizationRow {
    organization_id: uuid::Uuid,
    display_name: String,
    routing_key: Option<String>,
    api_key: Option<String>,
    active: bool,
    created_at: DateTime<Utc>,
    deactivated_at: Option<DateTime<Utc>>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for OrganizationRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(OrganizationRow {
            organization_id: row.try_get("organization_id")?,
            display_name: row.try_get("display_name")?,
            routing_key: row.try_get("routing_key")?,
            api_key: row.try_get("api_key")?,
            active: row.try_get("active")?,
            created_at: row.try_get("created_at")?,
            deactivated_at: row.try_get("deactivated_at")?,
        })
    }
}

impl From<OrganizationRow> for Organization {
    fn from(row: OrganizationRow) -> Self {
        Organization {
            id: OrganizationId::from_uuid(row.organization_id),
            display_name: row.display_name,
            routing_key: row.routing_key,
            api_key: row.api_key,
            active: row.active,
            created_at: row.created_at,
            deactivated_at: row.deactivated_at,
        }
    }
}
