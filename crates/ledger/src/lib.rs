//! Inventory ledger domain.
//!
//! This crate holds the ledger's business rules as deterministic domain logic
//! (no IO, no storage): movement validation, the balance projection rule, cursor
//! pagination types, catalog records, and the reconciliation audit that
//! compares ledger and projection.

pub mod balance;
pub mod catalog;
pub mod entry;
pub mod query;
pub mod reconcile;

pub use balance::{Balance, BalanceKey};
pub use catalog::{StockItem, StockItemFilter, StockLocation, StockLocationFilter};
pub use entry::{LedgerEntry, MovementType, NewLedgerEntry};
pub use query::{DEFAULT_PAGE_SIZE, LedgerCursor, LedgerFilter, LedgerPage, MAX_PAGE_SIZE, PageRequest};
pub use reconcile::{
    AuditOutcome, AuditSnapshot, Discrepancy, DiscrepancyKind, DriftClass, LedgerTotal,
    ReconciliationPolicy, ReconciliationReport, ReportSummary, Resolution, audit_snapshot,
};
