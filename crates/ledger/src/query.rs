//! Ledger listing: filters and cursor pagination.
//!
//! Pages are keyed by `(recorded_at, sequence)` rather than by offset, so an
//! append landing between two page requests never shifts or duplicates rows.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, ItemId, LocationId, LotId};

use crate::LedgerEntry;

pub const DEFAULT_PAGE_SIZE: u32 = 100;
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Optional narrowing of a ledger listing. The organization is implied by scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerFilter {
    pub item_id: Option<ItemId>,
    pub location_id: Option<LocationId>,
    pub lot_id: Option<LotId>,
    /// Inclusive lower bound on `recorded_at`.
    pub recorded_from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `recorded_at`.
    pub recorded_until: Option<DateTime<Utc>>,
}

impl LedgerFilter {
    pub fn for_item(item_id: ItemId) -> Self {
        Self {
            item_id: Some(item_id),
            ..Default::default()
        }
    }

    pub fn at_location(mut self, location_id: LocationId) -> Self {
        self.location_id = Some(location_id);
        self
    }

    pub fn between(mut self, from: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.recorded_from = Some(from);
        self.recorded_until = Some(until);
        self
    }

    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        self.item_id.is_none_or(|i| i == entry.item_id)
            && self.location_id.is_none_or(|l| l == entry.location_id)
            && self.lot_id.is_none_or(|l| Some(l) == entry.lot_id)
            && self.recorded_from.is_none_or(|t| entry.recorded_at >= t)
            && self.recorded_until.is_none_or(|t| entry.recorded_at < t)
    }
}

/// Position after the last entry of a page.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LedgerCursor {
    pub recorded_at: DateTime<Utc>,
    pub sequence: u64,
}

impl LedgerCursor {
    pub fn after(entry: &LedgerEntry) -> Self {
        Self {
            recorded_at: entry.recorded_at,
            sequence: entry.sequence,
        }
    }

    /// True when `entry` sorts strictly after this cursor.
    pub fn precedes(&self, entry: &LedgerEntry) -> bool {
        (entry.recorded_at, entry.sequence) > (self.recorded_at, self.sequence)
    }
}

/// Opaque token form: `<unix micros>.<sequence>`.
impl core::fmt::Display for LedgerCursor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{}", self.recorded_at.timestamp_micros(), self.sequence)
    }
}

impl core::str::FromStr for LedgerCursor {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DomainError::validation(format!("invalid ledger cursor '{s}'"));
        let (micros, seq) = s.split_once('.').ok_or_else(invalid)?;
        let micros: i64 = micros.parse().map_err(|_| invalid())?;
        let sequence: u64 = seq.parse().map_err(|_| invalid())?;
        let recorded_at = Utc.timestamp_micros(micros).single().ok_or_else(invalid)?;
        Ok(Self {
            recorded_at,
            sequence,
        })
    }
}

/// Page size + resume position.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub limit: u32,
    pub after: Option<LedgerCursor>,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_SIZE,
            after: None,
        }
    }
}

impl PageRequest {
    pub fn new(limit: Option<u32>, after: Option<LedgerCursor>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
            after,
        }
    }

    pub fn first(limit: u32) -> Self {
        Self::new(Some(limit), None)
    }

    /// The request for the page following `page`, if there is one.
    pub fn next(&self, page: &LedgerPage) -> Option<Self> {
        page.next_cursor.map(|c| Self {
            limit: self.limit,
            after: Some(c),
        })
    }
}

/// One page of ledger entries in ascending `(recorded_at, sequence)` order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerPage {
    pub entries: Vec<LedgerEntry>,
    /// Present when more entries may follow.
    pub next_cursor: Option<LedgerCursor>,
}

impl LedgerPage {
    /// Build a page from up to `limit + 1` ordered rows (the extra row only
    /// signals that another page exists).
    pub fn from_overfetch(mut rows: Vec<LedgerEntry>, limit: u32) -> Self {
        let limit = limit as usize;
        let has_more = rows.len() > limit;
        rows.truncate(limit);
        let next_cursor = if has_more {
            rows.last().map(LedgerCursor::after)
        } else {
            None
        };
        Self {
            entries: rows,
            next_cursor,
        }
    }
}
