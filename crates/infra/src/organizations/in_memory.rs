use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use stockledger_core::OrganizationId;
use stockledger_tenancy::{NewOrganization, Organization};

use super::OrganizationStore;
use crate::error::StoreError;

/// In-memory organization directory for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryOrganizationStore {
    inner: RwLock<BTreeMap<OrganizationId, Organization>>,
}

impl InMemoryOrganizationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn find(&self, pred: impl Fn(&Organization) -> bool) -> Result<Option<Organization>, StoreError> {
        let map = self.inner.read().map_err(|_| StoreError::poisoned())?;
        Ok(map.values().find(|o| pred(o)).cloned())
    }
}

#[async_trait]
impl OrganizationStore for InMemoryOrganizationStore {
    async fn create(&self, new: NewOrganization) -> Result<Organization, StoreError> {
        let org = new.into_organization(Utc::now())?;
        let mut map = self.inner.write().map_err(|_| StoreError::poisoned())?;

        if map.contains_key(&org.id) {
            return Err(StoreError::Conflict(format!("organization {} already exists", org.id)));
        }
        for existing in map.values() {
            if org.routing_key.is_some() && existing.routing_key == org.routing_key {
                return Err(StoreError::Conflict("routing key already assigned".to_string()));
            }
            if org.api_key.is_some() && existing.api_key == org.api_key {
                return Err(StoreError::Conflict("api key already assigned".to_string()));
            }
        }

        map.insert(org.id, org.clone());
        Ok(org)
    }

    async fn deactivate(&self, id: OrganizationId) -> Result<Organization, StoreError> {
        let mut map = self.inner.write().map_err(|_| StoreError::poisoned())?;
        let org = map
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("organization {id}")))?;
        org.deactivate(Utc::now());
        Ok(org.clone())
    }

    async fn get(&self, id: OrganizationId) -> Result<Option<Organization>, StoreError> {
        let map = self.inner.read().map_err(|_| StoreError::poisoned())?;
        Ok(map.get(&id).cloned())
    }

    async fn find_by_routing_key(
        &self,
        routing_key: &str,
    ) -> Result<Option<Organization>, StoreError> {
        self.find(|o| o.routing_key.as_deref() == Some(routing_key))
    }

    async fn find_by_api_key(&self, api_key: &str) -> Result<Option<Organization>, StoreError> {
        self.find(|o| o.api_key.as_deref() == Some(api_key))
    }

    async fn list_active(&self) -> Result<Vec<Organization>, StoreError> {
        let map = self.inner.read().map_err(|_| StoreError::poisoned())?;
        Ok(map.values().filter(|o| o.active).cloned().collect())
    }

    async fn list_all(&self) -> Result<Vec<Organization>, StoreError> {
        let map = self.inner.read().map_err(|_| StoreError::poisoned())?;
        Ok(map.values().cloned().collect())
    }
}
