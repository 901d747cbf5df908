use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use stockledger_core::{OrganizationId, OrganizationOwned};
use stockledger_ledger::{StockItem, StockLocation};

use crate::error::StoreError;

/// Raw persistence for one organization-owned record type.
///
/// Only [`super::ScopedQuery`] should call this: `fetch` is deliberately
/// unscoped so the gateway can tell "belongs to someone else" apart from
/// "does not exist".
#[async_trait]
pub trait RecordStore<R: OrganizationOwned>: Send + Sync {
    async fn fetch(&self, id: R::Id) -> Result<Option<R>, StoreError>;

    async fn fetch_scoped(
        &self,
        organization_id: OrganizationId,
        filter: &R::Filter,
    ) -> Result<Vec<R>, StoreError>;

    /// Fails with `Conflict` if the id already exists.
    async fn insert(&self, record: R) -> Result<R, StoreError>;

    /// Replace the record with the same id *and* organization; `NotFound`
    /// when no such row exists.
    async fn replace(&self, record: R) -> Result<R, StoreError>;
}

#[async_trait]
impl<R, S> RecordStore<R> for Arc<S>
where
    R: OrganizationOwned + Send + Sync + 'static,
    S: RecordStore<R> + ?Sized,
{
    async fn fetch(&self, id: R::Id) -> Result<Option<R>, StoreError> {
        (**self).fetch(id).await
    }

    async fn fetch_scoped(
        &self,
        organization_id: OrganizationId,
        filter: &R::Filter,
    ) -> Result<Vec<R>, StoreError> {
        (**self).fetch_scoped(organization_id, filter).await
    }

    async fn insert(&self, record: R) -> Result<R, StoreError> {
        (**self).insert(record).await
    }

    async fn replace(&self, record: R) -> Result<R, StoreError> {
        (**self).replace(record).await
    }
}

/// In-memory record store for tests/dev.
#[derive(Debug)]
pub struct InMemoryRecordStore<R: OrganizationOwned> {
    inner: RwLock<HashMap<R::Id, R>>,
}

impl<R: OrganizationOwned> InMemoryRecordStore<R> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<R: OrganizationOwned> Default for InMemoryRecordStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<R> RecordStore<R> for InMemoryRecordStore<R>
where
    R: OrganizationOwned + Clone + Send + Sync + 'static,
{
    async fn fetch(&self, id: R::Id) -> Result<Option<R>, StoreError> {
        let map = self.inner.read().map_err(|_| StoreError::poisoned())?;
        Ok(map.get(&id).cloned())
    }

    async fn fetch_scoped(
        &self,
        organization_id: OrganizationId,
        filter: &R::Filter,
    ) -> Result<Vec<R>, StoreError> {
        let map = self.inner.read().map_err(|_| StoreError::poisoned())?;
        Ok(map
            .values()
            .filter(|r| r.organization_id() == organization_id && r.matches(filter))
            .cloned()
            .collect())
    }

    async fn insert(&self, record: R) -> Result<R, StoreError> {
        let mut map = self.inner.write().map_err(|_| StoreError::poisoned())?;
        if map.contains_key(&record.id()) {
            return Err(StoreError::Conflict(format!("{} {} already exists", R::KIND, record.id())));
        }
        map.insert(record.id(), record.clone());
        Ok(record)
    }

    async fn replace(&self, record: R) -> Result<R, StoreError> {
        let mut map = self.inner.write().map_err(|_| StoreError::poisoned())?;
        match map.get_mut(&record.id()) {
            Some(existing) if existing.organization_id() == record.organization_id() => {
                *existing = record.clone();
                Ok(record)
            }
            _ => Err(StoreError::NotFound(format!("{} {}", R::KIND, record.id()))),
        }
    }
}

/// Both catalog record types behind one handle.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    pub items: InMemoryRecordStore<StockItem>,
    pub locations: InMemoryRecordStore<StockLocation>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

macro_rules! delegate_record_store {
    ($record:ty, $field:ident) => {
        #[async_trait]
        impl RecordStore<$record> for InMemoryCatalog {
            async fn fetch(
                &self,
                id: <$record as stockledger_core::Entity>::Id,
            ) -> Result<Option<$record>, StoreError> {
                self.$field.fetch(id).await
            }

            async fn fetch_scoped(
                &self,
                organization_id: OrganizationId,
                filter: &<$record as OrganizationOwned>::Filter,
            ) -> Result<Vec<$record>, StoreError> {
                self.$field.fetch_scoped(organization_id, filter).await
            }

            async fn insert(&self, record: $record) -> Result<$record, StoreError> {
                self.$field.insert(record).await
            }

            async fn replace(&self, record: $record) -> Result<$record, StoreError> {
                self.$field.replace(record).await
            }
        }
    };
}

delegate_record_store!(StockItem, items);
delegate_record_store!(StockLocation, locations);
