//! Scoped Query Gateway.
//!
//! A [`ScopedQuery`] is bound to exactly one organization when it is built and
//! offers no way to name another one:
//!
//! - `list` only asks the store for that organization's rows, then checks every
//!   returned row again before handing it out.
//! - `get` and `update` load the record by id, then compare its organization to
//!   the scope. A mismatch is a `CrossTenantAccess` integrity failure (logged at
//!   error), distinct from `RecordNotFound`.
//! - `create` and `update` overwrite whatever organization id the caller put on
//!   the record with the scope's.

pub mod postgres;
pub mod store;

use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};

use stockledger_core::{OrganizationId, OrganizationOwned};

use crate::error::{GatewayError, StoreError};

pub use postgres::PostgresCatalogStore;
pub use store::{InMemoryCatalog, InMemoryRecordStore, RecordStore};

pub const DEFAULT_GATEWAY_TIMEOUT: Duration = Duration::from_secs(5);

/// Query handle for one organization.
pub struct ScopedQuery<'a, S: ?Sized> {
    organization_id: OrganizationId,
    store: &'a S,
    timeout: Duration,
}

impl<'a, S: ?Sized> ScopedQuery<'a, S> {
    pub fn new(organization_id: OrganizationId, store: &'a S) -> Self {
        Self {
            organization_id,
            store,
            timeout: DEFAULT_GATEWAY_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn organization_id(&self) -> OrganizationId {
        self.organization_id
    }

    pub async fn get<R>(&self, id: R::Id) -> Result<R, GatewayError>
    where
        R: OrganizationOwned,
        S: RecordStore<R>,
    {
        let found = self
            .bounded("get", <S as RecordStore<R>>::fetch(self.store, id))
            .await?;
        self.owned(id, found)
    }

    pub async fn list<R>(&self, filter: &R::Filter) -> Result<Vec<R>, GatewayError>
    where
        R: OrganizationOwned,
        S: RecordStore<R>,
    {
        let rows = self
            .bounded(
                "list",
                <S as RecordStore<R>>::fetch_scoped(self.store, self.organization_id, filter),
            )
            .await?;

        if let Some(stray) = rows.iter().find(|r| r.organization_id() != self.organization_id) {
            return Err(self.cross_tenant::<R>(stray.id(), stray.organization_id()));
        }
        Ok(rows)
    }

    pub async fn create<R>(&self, mut record: R) -> Result<R, GatewayError>
    where
        R: OrganizationOwned,
        S: RecordStore<R>,
    {
        self.stamp(&mut record);
        validate(&record)?;
        self.bounded("create", <S as RecordStore<R>>::insert(self.store, record))
            .await
    }

    /// Replace the record `id` with `record`. The id and organization carried
    /// by `record` are ignored.
    pub async fn update<R>(&self, id: R::Id, mut record: R) -> Result<R, GatewayError>
    where
        R: OrganizationOwned,
        S: RecordStore<R>,
    {
        let existing = self
            .bounded("update", <S as RecordStore<R>>::fetch(self.store, id))
            .await?;
        self.owned(id, existing)?;

        record.assign_id(id);
        self.stamp(&mut record);
        validate(&record)?;

        self.bounded("update", <S as RecordStore<R>>::replace(self.store, record))
            .await
            .map_err(|e| match e {
                // Vanished between fetch and replace.
                GatewayError::Store(StoreError::NotFound(_)) => GatewayError::RecordNotFound {
                    kind: R::KIND,
                    id: id.to_string(),
                },
                other => other,
            })
    }

    fn stamp<R: OrganizationOwned>(&self, record: &mut R) {
        let supplied = record.organization_id();
        if supplied != self.organization_id {
            warn!(
                kind = R::KIND,
                supplied_organization_id = %supplied,
                organization_id = %self.organization_id,
                "caller-supplied organization id overwritten by scope"
            );
        }
        record.assign_organization(self.organization_id);
    }

    fn owned<R: OrganizationOwned>(&self, id: R::Id, found: Option<R>) -> Result<R, GatewayError> {
        match found {
            None => Err(GatewayError::RecordNotFound {
                kind: R::KIND,
                id: id.to_string(),
            }),
            Some(r) if r.organization_id() != self.organization_id => {
                Err(self.cross_tenant::<R>(id, r.organization_id()))
            }
            Some(r) => Ok(r),
        }
    }

    fn cross_tenant<R: OrganizationOwned>(&self, id: R::Id, owner: OrganizationId) -> GatewayError {
        error!(
            kind = R::KIND,
            record_id = %id,
            organization_id = %self.organization_id,
            owner_organization_id = %owner,
            "cross-tenant access blocked"
        );
        GatewayError::CrossTenantAccess {
            kind: R::KIND,
            id: id.to_string(),
            organization_id: self.organization_id,
        }
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, GatewayError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(GatewayError::from),
            Err(_) => Err(GatewayError::Timeout { operation }),
        }
    }
}

fn validate<R: OrganizationOwned>(record: &R) -> Result<(), GatewayError> {
    record.validate().map_err(|e| GatewayError::Validation {
        kind: R::KIND,
        reason: e.to_string(),
    })
}
