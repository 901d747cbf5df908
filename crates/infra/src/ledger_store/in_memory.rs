use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};

use stockledger_core::{LedgerEntryId, OrganizationId};
use stockledger_ledger::{
    AuditSnapshot, Balance, BalanceKey, Discrepancy, LedgerEntry, LedgerFilter, LedgerPage,
    LedgerTotal, MAX_PAGE_SIZE, NewLedgerEntry, PageRequest,
};

use super::{AppendReceipt, CorrectionOutcome, LedgerStore, ensure_correctable};
use crate::error::StoreError;

/// In-memory ledger + projection.
///
/// Intended for tests/dev. One lock guards both the entries and the balances,
/// which gives the same all-or-nothing visibility as the Postgres transaction.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: Vec<LedgerEntry>,
    balances: HashMap<BalanceKey, Balance>,
    next_sequence: u64,
    last_recorded_at: Option<DateTime<Utc>>,
    /// Projection updates left before a simulated failure.
    #[cfg(test)]
    fail_projection_after: Option<usize>,
}

/// State needed to undo a partially applied append.
struct Checkpoint {
    entries_len: usize,
    last_recorded_at: Option<DateTime<Utc>>,
    balances: HashMap<BalanceKey, Option<Balance>>,
}

impl Inner {
    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            entries_len: self.entries.len(),
            last_recorded_at: self.last_recorded_at,
            balances: HashMap::new(),
        }
    }

    /// Sequence numbers are not reused after a rollback (same as BIGSERIAL).
    fn rollback(&mut self, checkpoint: Checkpoint) {
        self.entries.truncate(checkpoint.entries_len);
        self.last_recorded_at = checkpoint.last_recorded_at;
        for (key, original) in checkpoint.balances {
            match original {
                Some(b) => {
                    self.balances.insert(key, b);
                }
                None => {
                    self.balances.remove(&key);
                }
            }
        }
    }

    /// Microsecond precision, never earlier than the previous entry.
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now().trunc_subsecs(6);
        let ts = match self.last_recorded_at {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_recorded_at = Some(ts);
        ts
    }

    fn commit_one(
        &mut self,
        organization_id: OrganizationId,
        new: NewLedgerEntry,
        checkpoint: &mut Checkpoint,
    ) -> Result<AppendReceipt, StoreError> {
        self.next_sequence += 1;
        let recorded_at = self.next_timestamp();
        let entry = LedgerEntry::commit(
            organization_id,
            new,
            LedgerEntryId::new(),
            self.next_sequence,
            recorded_at,
        );
        self.entries.push(entry.clone());

        if self.projection_fault_due() {
            return Err(StoreError::Backend("balance projection update failed".to_string()));
        }

        let key = entry.key();
        if !checkpoint.balances.contains_key(&key) {
            checkpoint.balances.insert(key, self.balances.get(&key).cloned());
        }
        let balance = self.balances.entry(key).or_insert_with(|| Balance::zero(key));
        balance.apply(&entry);

        Ok(AppendReceipt {
            balance: balance.clone(),
            entry,
        })
    }

    fn commit_all(
        &mut self,
        organization_id: OrganizationId,
        entries: Vec<NewLedgerEntry>,
    ) -> Result<Vec<AppendReceipt>, StoreError> {
        let mut checkpoint = self.checkpoint();
        let mut receipts = Vec::with_capacity(entries.len());

        for new in entries {
            match self.commit_one(organization_id, new, &mut checkpoint) {
                Ok(receipt) => receipts.push(receipt),
                Err(e) => {
                    self.rollback(checkpoint);
                    return Err(e);
                }
            }
        }

        Ok(receipts)
    }

    #[cfg(test)]
    fn projection_fault_due(&mut self) -> bool {
        match self.fail_projection_after {
            Some(0) => {
                self.fail_projection_after = None;
                true
            }
            Some(n) => {
                self.fail_projection_after = Some(n - 1);
                false
            }
            None => false,
        }
    }

    #[cfg(not(test))]
    fn projection_fault_due(&mut self) -> bool {
        false
    }
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let `successes` more balance updates through, then fail the next one
    /// after its ledger row has been written.
    #[cfg(test)]
    pub(crate) fn fail_projection_after(&self, successes: usize) {
        if let Ok(mut inner) = self.inner.write() {
            inner.fail_projection_after = Some(successes);
        }
    }

    /// Write a balance row directly, as a manual database edit would.
    #[cfg(test)]
    pub(crate) fn overwrite_balance(&self, key: BalanceKey, quantity: f64) {
        if let Ok(mut inner) = self.inner.write() {
            inner
                .balances
                .entry(key)
                .or_insert_with(|| Balance::zero(key))
                .quantity = quantity;
        }
    }

    #[cfg(test)]
    pub(crate) fn drop_balance(&self, key: &BalanceKey) {
        if let Ok(mut inner) = self.inner.write() {
            inner.balances.remove(key);
        }
    }

    #[cfg(test)]
    pub(crate) fn entry_count(&self) -> usize {
        self.inner.read().map(|i| i.entries.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn append(
        &self,
        organization_id: OrganizationId,
        entry: NewLedgerEntry,
    ) -> Result<AppendReceipt, StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::poisoned())?;
        let mut receipts = inner.commit_all(organization_id, vec![entry])?;
        receipts
            .pop()
            .ok_or_else(|| StoreError::Backend("append produced no receipt".to_string()))
    }

    async fn append_batch(
        &self,
        organization_id: OrganizationId,
        entries: Vec<NewLedgerEntry>,
    ) -> Result<Vec<AppendReceipt>, StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::poisoned())?;
        inner.commit_all(organization_id, entries)
    }

    async fn get_balance(&self, key: &BalanceKey) -> Result<Balance, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::poisoned())?;
        Ok(inner
            .balances
            .get(key)
            .cloned()
            .unwrap_or_else(|| Balance::zero(*key)))
    }

    async fn list_entries(
        &self,
        organization_id: OrganizationId,
        filter: &LedgerFilter,
        page: PageRequest,
    ) -> Result<LedgerPage, StoreError> {
        let limit = page.limit.clamp(1, MAX_PAGE_SIZE);
        let inner = self.inner.read().map_err(|_| StoreError::poisoned())?;

        // Entries are stored in (recorded_at, sequence) order already.
        let rows: Vec<LedgerEntry> = inner
            .entries
            .iter()
            .filter(|e| e.organization_id == organization_id)
            .filter(|e| filter.matches(e))
            .filter(|e| page.after.is_none_or(|c| c.precedes(e)))
            .take(limit as usize + 1)
            .cloned()
            .collect();

        Ok(LedgerPage::from_overfetch(rows, limit))
    }

    async fn get_entry(
        &self,
        organization_id: OrganizationId,
        entry_id: LedgerEntryId,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::poisoned())?;
        Ok(inner
            .entries
            .iter()
            .find(|e| e.id == entry_id && e.organization_id == organization_id)
            .cloned())
    }

    async fn snapshot(&self, organization_id: OrganizationId) -> Result<AuditSnapshot, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::poisoned())?;

        let mut totals: BTreeMap<BalanceKey, (f64, u64)> = BTreeMap::new();
        for entry in inner.entries.iter().filter(|e| e.organization_id == organization_id) {
            let slot = totals.entry(entry.key()).or_insert((0.0, 0));
            slot.0 += entry.quantity;
            slot.1 += 1;
        }

        let balances = inner
            .balances
            .values()
            .filter(|b| b.key.organization_id == organization_id)
            .cloned()
            .collect();

        Ok(AuditSnapshot {
            organization_id,
            taken_at: Utc::now(),
            totals: totals
                .into_iter()
                .map(|(key, (sum, entry_count))| LedgerTotal {
                    key,
                    sum,
                    entry_count,
                })
                .collect(),
            balances,
        })
    }

    async fn correct_balance(
        &self,
        discrepancy: &Discrepancy,
    ) -> Result<CorrectionOutcome, StoreError> {
        ensure_correctable(discrepancy)?;
        let key = discrepancy.key;
        let mut inner = self.inner.write().map_err(|_| StoreError::poisoned())?;

        let unchanged = match (inner.balances.get(&key), discrepancy.balance_quantity) {
            (Some(current), Some(observed)) => {
                current.quantity == observed
                    && current.last_entry_id == discrepancy.observed_last_entry_id
            }
            (None, None) => true,
            _ => false,
        };
        if !unchanged {
            return Ok(CorrectionOutcome::Superseded);
        }

        let last_entry_id = inner
            .entries
            .iter()
            .rev()
            .find(|e| e.key() == key)
            .map(|e| e.id);
        let balance = inner.balances.entry(key).or_insert_with(|| Balance::zero(key));
        balance.quantity = discrepancy.ledger_sum;
        balance.last_updated = Some(Utc::now());
        if balance.last_entry_id.is_none() {
            balance.last_entry_id = last_entry_id;
        }

        Ok(CorrectionOutcome::Applied)
    }
}
