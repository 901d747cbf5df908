//! Request-path facade: tenant resolution, scoped catalog access and ledger
//! posting behind one handle.
//!
//! Every method below the resolver takes the resolved `OrganizationId`
//! explicitly. The service never reads request metadata itself, and never
//! trusts an organization id carried inside a payload.

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use stockledger_core::{ItemId, LedgerEntryId, LocationId, LotId, OrganizationId};
use stockledger_ledger::{
    Balance, BalanceKey, LedgerEntry, LedgerFilter, LedgerPage, MovementType, NewLedgerEntry,
    PageRequest, StockItem, StockLocation,
};
use stockledger_tenancy::{RequestContext, TenantError};

use crate::error::{GatewayError, LedgerError, StoreError};
use crate::gateway::{RecordStore, ScopedQuery};
use crate::ledger_store::{AppendReceipt, LedgerStore};
use crate::organizations::OrganizationStore;
use crate::resolver::TenantResolver;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

pub struct LedgerService<O, C, L> {
    resolver: TenantResolver<O>,
    catalog: C,
    ledger: L,
    request_timeout: Duration,
}

impl<O, C, L> LedgerService<O, C, L>
where
    O: OrganizationStore,
    C: RecordStore<StockItem> + RecordStore<StockLocation>,
    L: LedgerStore,
{
    pub fn new(resolver: TenantResolver<O>, catalog: C, ledger: L) -> Self {
        Self {
            resolver,
            catalog,
            ledger,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Bound for every gateway and ledger call (and tenant resolution).
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.resolver = self.resolver.with_timeout(timeout);
        self.request_timeout = timeout;
        self
    }

    pub async fn resolve_tenant(&self, ctx: &RequestContext) -> Result<OrganizationId, TenantError> {
        self.resolver.resolve(ctx).await
    }

    /// Catalog access bound to one organization.
    pub fn scoped(&self, organization_id: OrganizationId) -> ScopedQuery<'_, C> {
        ScopedQuery::new(organization_id, &self.catalog).with_timeout(self.request_timeout)
    }

    /// Post one movement and return the balance right after it.
    pub async fn append(
        &self,
        organization_id: OrganizationId,
        entry: NewLedgerEntry,
    ) -> Result<Balance, LedgerError> {
        let entry = stamp_and_validate(organization_id, entry)?;
        self.verify_references(organization_id, &entry.item_id, &entry.location_id, entry.movement_type)
            .await?;

        let receipt = self
            .within("append", LedgerError::AppendFailure, self.ledger.append(organization_id, entry))
            .await?;

        log_posted(&receipt);
        Ok(receipt.balance)
    }

    /// Post the entries of one logical operation (same correlation id)
    /// atomically.
    pub async fn append_batch(
        &self,
        organization_id: OrganizationId,
        entries: Vec<NewLedgerEntry>,
    ) -> Result<Vec<AppendReceipt>, LedgerError> {
        let Some(first) = entries.first() else {
            return Err(LedgerError::Validation("batch is empty".to_string()));
        };
        let correlation_id = first.correlation_id;
        if entries.iter().any(|e| e.correlation_id != correlation_id) {
            return Err(LedgerError::Validation(
                "all entries of a batch must share one correlation id".to_string(),
            ));
        }

        let entries = entries
            .into_iter()
            .map(|e| stamp_and_validate(organization_id, e))
            .collect::<Result<Vec<_>, _>>()?;

        let mut checked = BTreeSet::new();
        for e in &entries {
            if checked.insert((e.item_id, e.location_id, e.movement_type == MovementType::Receipt)) {
                self.verify_references(organization_id, &e.item_id, &e.location_id, e.movement_type)
                    .await?;
            }
        }

        let receipts = self
            .within(
                "append_batch",
                LedgerError::AppendFailure,
                self.ledger.append_batch(organization_id, entries),
            )
            .await?;

        info!(
            organization_id = %organization_id,
            correlation_id = %correlation_id,
            entry_count = receipts.len(),
            "ledger batch posted"
        );
        receipts.iter().for_each(log_posted);
        Ok(receipts)
    }

    /// Zero for a key with no entries yet.
    pub async fn get_balance(
        &self,
        organization_id: OrganizationId,
        item_id: ItemId,
        location_id: LocationId,
        lot_id: Option<LotId>,
    ) -> Result<Balance, LedgerError> {
        let key = BalanceKey {
            organization_id,
            item_id,
            location_id,
            lot_id,
        };
        self.within("get_balance", LedgerError::Storage, self.ledger.get_balance(&key))
            .await
    }

    pub async fn list_ledger(
        &self,
        organization_id: OrganizationId,
        filter: &LedgerFilter,
        page: PageRequest,
    ) -> Result<LedgerPage, LedgerError> {
        self.within(
            "list_ledger",
            LedgerError::Storage,
            self.ledger.list_entries(organization_id, filter, page),
        )
        .await
    }

    pub async fn get_entry(
        &self,
        organization_id: OrganizationId,
        entry_id: LedgerEntryId,
    ) -> Result<LedgerEntry, LedgerError> {
        self.within("get_entry", LedgerError::Storage, self.ledger.get_entry(organization_id, entry_id))
            .await?
            .ok_or_else(|| {
                LedgerError::Gateway(GatewayError::RecordNotFound {
                    kind: "ledger_entry",
                    id: entry_id.to_string(),
                })
            })
    }

    /// Item and location must exist under `organization_id`; receipts also
    /// need an active item.
    async fn verify_references(
        &self,
        organization_id: OrganizationId,
        item_id: &ItemId,
        location_id: &LocationId,
        movement_type: MovementType,
    ) -> Result<(), LedgerError> {
        let scope = self.scoped(organization_id);
        let item: StockItem = scope.get(*item_id).await?;
        if !item.active && movement_type == MovementType::Receipt {
            return Err(LedgerError::Validation(format!(
                "stock item {} is inactive and cannot receive stock",
                item.id
            )));
        }
        let _: StockLocation = scope.get(*location_id).await?;
        Ok(())
    }

    async fn within<T>(
        &self,
        operation: &'static str,
        wrap: fn(StoreError) -> LedgerError,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, LedgerError> {
        match tokio::time::timeout(self.request_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!(operation, error = %e, "ledger operation failed");
                Err(wrap(e))
            }
            Err(_) => {
                warn!(operation, timeout_ms = self.request_timeout.as_millis() as u64, "ledger operation timed out");
                Err(LedgerError::Timeout { operation })
            }
        }
    }
}

/// Replace any caller-supplied organization with the resolved one, then
/// apply the movement rules.
fn stamp_and_validate(
    organization_id: OrganizationId,
    mut entry: NewLedgerEntry,
) -> Result<NewLedgerEntry, LedgerError> {
    if let Some(claimed) = entry.organization_id.filter(|c| *c != organization_id) {
        warn!(
            claimed_organization_id = %claimed,
            organization_id = %organization_id,
            "entry organization overwritten by resolved tenant"
        );
    }
    entry.organization_id = Some(organization_id);
    entry.validate()?;
    Ok(entry)
}

fn log_posted(receipt: &AppendReceipt) {
    let e = &receipt.entry;
    info!(
        organization_id = %e.organization_id,
        entry_id = %e.id,
        item_id = %e.item_id,
        location_id = %e.location_id,
        quantity = e.quantity,
        movement_type = %e.movement_type,
        correlation_id = %e.correlation_id,
        balance = receipt.balance.quantity,
        "ledger entry posted"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::InMemoryCatalog;
    use crate::ledger_store::InMemoryLedgerStore;
    use crate::organizations::InMemoryOrganizationStore;
    use stockledger_core::{ActorId, CorrelationId};
    use stockledger_tenancy::{NewOrganization, ResolverSettings};

    type Service = LedgerService<InMemoryOrganizationStore, InMemoryCatalog, InMemoryLedgerStore>;

    async fn service_with_stock() -> (Service, OrganizationId, StockItem, StockLocation) {
        let orgs = InMemoryOrganizationStore::new();
        let org = orgs.create(NewOrganization::named("Harbour Grill")).await.unwrap();
        let svc = LedgerService::new(
            TenantResolver::new(orgs, ResolverSettings::default()),
            InMemoryCatalog::new(),
            InMemoryLedgerStore::new(),
        );
        let item = svc.scoped(org.id).create(StockItem::new(org.id, "Butter", "kg")).await.unwrap();
        let loc = svc.scoped(org.id).create(StockLocation::new(org.id, "Cold room")).await.unwrap();
        (svc, org.id, item, loc)
    }

    fn movement(item: &StockItem, loc: &StockLocation, quantity: f64, movement: MovementType) -> NewLedgerEntry {
        NewLedgerEntry::new(item.id, loc.id, quantity, movement, CorrelationId::new(), ActorId::new())
    }

    #[tokio::test]
    async fn caller_supplied_organization_is_ignored() {
        let (svc, org, item, loc) = service_with_stock().await;
        let mut entry = movement(&item, &loc, 2.0, MovementType::Receipt);
        entry.organization_id = Some(OrganizationId::new());

        let balance = svc.append(org, entry).await.unwrap();
        assert_eq!(balance.key.organization_id, org);
        assert_eq!(balance.quantity, 2.0);
    }

    #[tokio::test]
    async fn invalid_movement_is_rejected_before_storage() {
        let (svc, org, item, loc) = service_with_stock().await;
        let err = svc
            .append(org, movement(&item, &loc, 5.0, MovementType::Usage))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        assert!(!err.is_retryable());

        let page = svc.list_ledger(org, &LedgerFilter::default(), PageRequest::default()).await.unwrap();
        assert!(page.entries.is_empty());
    }

    #[tokio::test]
    async fn unknown_item_is_not_found() {
        let (svc, org, _, loc) = service_with_stock().await;
        let ghost = StockItem::new(org, "Ghost", "ea");
        let err = svc
            .append(org, movement(&ghost, &loc, 1.0, MovementType::Receipt))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Gateway(GatewayError::RecordNotFound { .. })));
    }

    #[tokio::test]
    async fn inactive_item_cannot_receive_but_can_be_counted() {
        let (svc, org, item, loc) = service_with_stock().await;
        svc.append(org, movement(&item, &loc, 4.0, MovementType::Receipt)).await.unwrap();

        let mut retired = item.clone();
        retired.active = false;
        svc.scoped(org).update(item.id, retired).await.unwrap();

        assert!(
            svc.append(org, movement(&item, &loc, 1.0, MovementType::Receipt))
                .await
                .is_err()
        );
        let balance = svc
            .append(org, movement(&item, &loc, -4.0, MovementType::CountAdjustment))
            .await
            .unwrap();
        assert_eq!(balance.quantity, 0.0);
    }

    #[tokio::test]
    async fn batch_requires_a_single_correlation_id() {
        let (svc, org, item, loc) = service_with_stock().await;
        let entries = vec![
            movement(&item, &loc, 1.0, MovementType::Receipt),
            movement(&item, &loc, 2.0, MovementType::Receipt),
        ];
        assert!(matches!(
            svc.append_batch(org, entries).await,
            Err(LedgerError::Validation(_))
        ));
        assert!(matches!(svc.append_batch(org, vec![]).await, Err(LedgerError::Validation(_))));
    }

    #[tokio::test]
    async fn missing_entry_is_not_found() {
        let (svc, org, _, _) = service_with_stock().await;
        let err = svc.get_entry(org, LedgerEntryId::new()).await.unwrap_err();
        assert!(matches!(err, LedgerError::Gateway(GatewayError::RecordNotFound { .. })));
    }
}
