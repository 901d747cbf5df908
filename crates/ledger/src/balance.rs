use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{ItemId, LedgerEntryId, LocationId, LotId, OrganizationId};

use crate::LedgerEntry;

/// One trackable stock position: (organization, item, location, lot-or-none).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BalanceKey {
    pub organization_id: OrganizationId,
    pub item_id: ItemId,
    pub location_id: LocationId,
    pub lot_id: Option<LotId>,
}

impl core::fmt::Display for BalanceKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.organization_id,
            self.item_id,
            self.location_id,
            self.lot_id.map(|l| l.to_string()).unwrap_or_else(|| "-".to_string())
        )
    }
}

/// Materialized current quantity for a key tuple.
///
/// Must always equal the sum of the ledger entries for the same key (within
/// `QUANTITY_TOLERANCE`). Only the ledger append path and the reconciliation
/// correction step write it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub key: BalanceKey,
    pub quantity: f64,
    /// `None` for the zero default of a key with no entries.
    pub last_updated: Option<DateTime<Utc>>,
    pub last_entry_id: Option<LedgerEntryId>,
}

impl Balance {
    /// The balance of a key tuple that has never had a ledger entry.
    pub fn zero(key: BalanceKey) -> Self {
        Self {
            key,
            quantity: 0.0,
            last_updated: None,
            last_entry_id: None,
        }
    }

    /// Fold one committed entry into the projection.
    pub fn apply(&mut self, entry: &LedgerEntry) {
        debug_assert_eq!(entry.key(), self.key);
        self.quantity += entry.quantity;
        self.last_updated = Some(entry.recorded_at);
        self.last_entry_id = Some(entry.id);
    }
}
