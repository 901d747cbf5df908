//! Organization directory: the one store that is not organization-scoped.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;

use stockledger_core::OrganizationId;
use stockledger_tenancy::{NewOrganization, Organization};

use crate::error::StoreError;

pub use in_memory::InMemoryOrganizationStore;
pub use postgres::PostgresOrganizationStore;

/// Administrative access to organizations.
///
/// Organizations are never deleted: `deactivate` keeps the row so the
/// organization's ledger history stays attributable.
#[async_trait]
pub trait OrganizationStore: Send + Sync {
    /// Fails with `Conflict` when the id, routing key or API key is taken.
    async fn create(&self, new: NewOrganization) -> Result<Organization, StoreError>;

    /// Idempotent; returns the (now inactive) organization.
    async fn deactivate(&self, id: OrganizationId) -> Result<Organization, StoreError>;

    async fn get(&self, id: OrganizationId) -> Result<Option<Organization>, StoreError>;

    /// `routing_key` must already be normalized (lowercase).
    async fn find_by_routing_key(&self, routing_key: &str)
    -> Result<Option<Organization>, StoreError>;

    async fn find_by_api_key(&self, api_key: &str) -> Result<Option<Organization>, StoreError>;

    async fn list_active(&self) -> Result<Vec<Organization>, StoreError>;

    /// Active and deactivated organizations, ordered by id.
    async fn list_all(&self) -> Result<Vec<Organization>, StoreError>;
}

#[async_trait]
impl<S> OrganizationStore for Arc<S>
where
    S: OrganizationStore + ?Sized,
{
    async fn create(&self, new: NewOrganization) -> Result<Organization, StoreError> {
        (**self).create(new).await
    }

    async fn deactivate(&self, id: OrganizationId) -> Result<Organization, StoreError> {
        (**self).deactivate(id).await
    }

    async fn get(&self, id: OrganizationId) -> Result<Option<Organization>, StoreError> {
        (**self).get(id).await
    }

    async fn find_by_routing_key(
        &self,
        routing_key: &str,
    ) -> Result<Option<Organization>, StoreError> {
        (**self).find_by_routing_key(routing_key).await
    }

    async fn find_by_api_key(&self, api_key: &str) -> Result<Option<Organization>, StoreError> {
        (**self).find_by_api_key(api_key).await
    }

    async fn list_active(&self) -> Result<Vec<Organization>, StoreError> {
        (**self).list_active().await
    }

    async fn list_all(&self) -> Result<Vec<Organization>, StoreError> {
        (**self).list_all().await
    }
}
