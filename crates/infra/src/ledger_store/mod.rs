//! Ledger Store + Balance Projection.
//!
//! Every implementation must make the ledger insert and the balance increment
//! one atomic unit: either both are visible or neither is. Balances are only
//! ever written by `append`/`append_batch` and by `correct_balance`.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use stockledger_core::{LedgerEntryId, OrganizationId};
use stockledger_ledger::{
    AuditSnapshot, Balance, BalanceKey, Discrepancy, LedgerEntry, LedgerFilter, LedgerPage,
    NewLedgerEntry, PageRequest, Resolution,
};

use crate::error::StoreError;

pub use in_memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;

/// A committed entry together with its balance right after the commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppendReceipt {
    pub entry: LedgerEntry,
    pub balance: Balance,
}

/// Result of a guarded balance overwrite.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionOutcome {
    Applied,
    /// The balance changed after the audit snapshot; nothing was written.
    Superseded,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert one entry and apply it to its balance atomically.
    ///
    /// The caller has already validated the entry and stamped the organization;
    /// `organization_id` is authoritative.
    async fn append(
        &self,
        organization_id: OrganizationId,
        entry: NewLedgerEntry,
    ) -> Result<AppendReceipt, StoreError>;

    /// All-or-nothing variant of `append` for one logical operation.
    async fn append_batch(
        &self,
        organization_id: OrganizationId,
        entries: Vec<NewLedgerEntry>,
    ) -> Result<Vec<AppendReceipt>, StoreError>;

    /// Current balance, or a zero balance when the key has no entries.
    async fn get_balance(&self, key: &BalanceKey) -> Result<Balance, StoreError>;

    /// Entries in `(recorded_at, sequence)` order, starting after `page.after`.
    async fn list_entries(
        &self,
        organization_id: OrganizationId,
        filter: &LedgerFilter,
        page: PageRequest,
    ) -> Result<LedgerPage, StoreError>;

    async fn get_entry(
        &self,
        organization_id: OrganizationId,
        entry_id: LedgerEntryId,
    ) -> Result<Option<LedgerEntry>, StoreError>;

    /// Ledger sums and balance rows for one organization, read from a single
    /// consistent snapshot without blocking appends.
    async fn snapshot(&self, organization_id: OrganizationId) -> Result<AuditSnapshot, StoreError>;

    /// Overwrite (or create) a balance with the discrepancy's ledger sum, but
    /// only if the row still looks exactly as it did in the snapshot.
    async fn correct_balance(
        &self,
        discrepancy: &Discrepancy,
    ) -> Result<CorrectionOutcome, StoreError>;
}

#[async_trait]
impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    async fn append(
        &self,
        organization_id: OrganizationId,
        entry: NewLedgerEntry,
    ) -> Result<AppendReceipt, StoreError> {
        (**self).append(organization_id, entry).await
    }

    async fn append_batch(
        &self,
        organization_id: OrganizationId,
        entries: Vec<NewLedgerEntry>,
    ) -> Result<Vec<AppendReceipt>, StoreError> {
        (**self).append_batch(organization_id, entries).await
    }

    async fn get_balance(&self, key: &BalanceKey) -> Result<Balance, StoreError> {
        (**self).get_balance(key).await
    }

    async fn list_entries(
        &self,
        organization_id: OrganizationId,
        filter: &LedgerFilter,
        page: PageRequest,
    ) -> Result<LedgerPage, StoreError> {
        (**self).list_entries(organization_id, filter, page).await
    }

    async fn get_entry(
        &self,
        organization_id: OrganizationId,
        entry_id: LedgerEntryId,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        (**self).get_entry(organization_id, entry_id).await
    }

    async fn snapshot(&self, organization_id: OrganizationId) -> Result<AuditSnapshot, StoreError> {
        (**self).snapshot(organization_id).await
    }

    async fn correct_balance(
        &self,
        discrepancy: &Discrepancy,
    ) -> Result<CorrectionOutcome, StoreError> {
        (**self).correct_balance(discrepancy).await
    }
}

/// Only discrepancies the audit marked for correction may reach a store.
pub(crate) fn ensure_correctable(discrepancy: &Discrepancy) -> Result<(), StoreError> {
    if discrepancy.resolution != Resolution::PendingCorrection {
        return Err(StoreError::Validation(format!(
            "discrepancy on {} is {:?}, not pending correction",
            discrepancy.key, discrepancy.resolution
        )));
    }
    if !discrepancy.ledger_sum.is_finite() {
        return Err(StoreError::Validation("ledger sum is not finite".to_string()));
    }
    Ok(())
}
