//! Ledger vs. projection audit.
//!
//! Detection is a pure function over a snapshot ([`audit_snapshot`]); applying
//! corrections is a separate step owned by the reconciliation job. Keeping the
//! two apart lets the thresholds be exercised without any store.
//!
//! Classification of `delta = |ledger_sum - balance|`:
//!
//! | delta                                   | action                         |
//! |-----------------------------------------|--------------------------------|
//! | `delta <= auto_correct_threshold`       | none, not reported             |
//! | `auto_correct < delta <= escalation`    | overwrite balance, report      |
//! | `delta > escalation_threshold`          | escalate, balance left as-is   |
//!
//! A balance row with no ledger entries at all is always escalated.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{
    DomainError, DomainResult, LedgerEntryId, OrganizationId, QUANTITY_TOLERANCE,
};

use crate::{Balance, BalanceKey};

/// Thresholds driving drift classification.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationPolicy {
    pub auto_correct_threshold: f64,
    pub escalation_threshold: f64,
}

impl Default for ReconciliationPolicy {
    fn default() -> Self {
        Self {
            auto_correct_threshold: QUANTITY_TOLERANCE,
            escalation_threshold: 0.01,
        }
    }
}

impl ReconciliationPolicy {
    pub fn with_escalation_threshold(escalation_threshold: f64) -> DomainResult<Self> {
        let policy = Self {
            escalation_threshold,
            ..Default::default()
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> DomainResult<()> {
        if !self.auto_correct_threshold.is_finite() || self.auto_correct_threshold < 0.0 {
            return Err(DomainError::validation("auto-correct threshold must be a finite, non-negative number"));
        }
        if !self.escalation_threshold.is_finite()
            || self.escalation_threshold <= self.auto_correct_threshold
        {
            return Err(DomainError::validation(
                "escalation threshold must be finite and above the auto-correct threshold",
            ));
        }
        Ok(())
    }

    pub fn classify(&self, delta: f64) -> DriftClass {
        if !delta.is_finite() {
            return DriftClass::Escalate;
        }
        if delta <= self.auto_correct_threshold {
            DriftClass::WithinTolerance
        } else if delta <= self.escalation_threshold {
            DriftClass::AutoCorrect
        } else {
            DriftClass::Escalate
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftClass {
    WithinTolerance,
    AutoCorrect,
    Escalate,
}

/// Ledger sum for one key tuple as of the snapshot.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerTotal {
    pub key: BalanceKey,
    pub sum: f64,
    pub entry_count: u64,
}

/// Consistent read of one organization's ledger totals and balance rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditSnapshot {
    pub organization_id: OrganizationId,
    pub taken_at: DateTime<Utc>,
    pub totals: Vec<LedgerTotal>,
    pub balances: Vec<Balance>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyKind {
    /// Balance row exists but disagrees with the ledger.
    Drift,
    /// Ledger entries exist but no balance row does.
    MissingBalance,
    /// Balance row exists with no ledger entries behind it.
    OrphanedBalance,
}

/// What happened (or will happen) to a discrepancy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum Resolution {
    /// Eligible for correction; the correction phase has not run yet.
    PendingCorrection,
    AutoCorrected,
    /// The balance moved after the snapshot; left for the next run.
    Superseded,
    Escalated,
    CorrectionFailed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub key: BalanceKey,
    pub kind: DiscrepancyKind,
    pub ledger_sum: f64,
    /// `None` when no balance row exists.
    pub balance_quantity: Option<f64>,
    pub delta: f64,
    pub ledger_entry_count: u64,
    /// Balance row's last entry as seen in the snapshot (correction guard).
    pub observed_last_entry_id: Option<LedgerEntryId>,
    pub resolution: Resolution,
}

/// Result of auditing one snapshot.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AuditOutcome {
    pub discrepancies: Vec<Discrepancy>,
    pub tuples_checked: usize,
    /// False when `keep_going` stopped the audit early.
    pub completed: bool,
}

/// Compare ledger totals against balance rows, key tuple by key tuple.
///
/// `keep_going` is consulted before each key tuple and never in the middle of
/// one, so an interrupted audit only ever reports tuples it fully evaluated.
/// Tuples are visited in key order to keep reports deterministic.
pub fn audit_snapshot(
    snapshot: &AuditSnapshot,
    policy: &ReconciliationPolicy,
    mut keep_going: impl FnMut() -> bool,
) -> AuditOutcome {
    let mut groups: BTreeMap<BalanceKey, (Option<&LedgerTotal>, Option<&Balance>)> =
        BTreeMap::new();
    for total in &snapshot.totals {
        groups.entry(total.key).or_default().0 = Some(total);
    }
    for balance in &snapshot.balances {
        groups.entry(balance.key).or_default().1 = Some(balance);
    }

    let mut outcome = AuditOutcome::default();

    for (key, (total, balance)) in groups {
        if !keep_going() {
            return outcome;
        }
        outcome.tuples_checked += 1;

        if key.organization_id != snapshot.organization_id {
            // A row filed under the wrong organization is never "corrected" here.
            outcome.discrepancies.push(Discrepancy {
                key,
                kind: DiscrepancyKind::Drift,
                ledger_sum: total.map(|t| t.sum).unwrap_or(0.0),
                balance_quantity: balance.map(|b| b.quantity),
                delta: f64::NAN,
                ledger_entry_count: total.map(|t| t.entry_count).unwrap_or(0),
                observed_last_entry_id: balance.and_then(|b| b.last_entry_id),
                resolution: Resolution::Escalated,
            });
            continue;
        }

        let entry_count = total.map(|t| t.entry_count).unwrap_or(0);
        let ledger_sum = total.map(|t| t.sum).unwrap_or(0.0);

        let discrepancy = match (entry_count, balance) {
            (0, Some(b)) => Some(Discrepancy {
                key,
                kind: DiscrepancyKind::OrphanedBalance,
                ledger_sum: 0.0,
                balance_quantity: Some(b.quantity),
                delta: b.quantity.abs(),
                ledger_entry_count: 0,
                observed_last_entry_id: b.last_entry_id,
                resolution: Resolution::Escalated,
            }),
            (0, None) => None,
            (count, balance) => {
                let balance_quantity = balance.map(|b| b.quantity);
                let delta = (ledger_sum - balance_quantity.unwrap_or(0.0)).abs();
                let resolution = match policy.classify(delta) {
                    DriftClass::WithinTolerance => None,
                    DriftClass::AutoCorrect => Some(Resolution::PendingCorrection),
                    DriftClass::Escalate => Some(Resolution::Escalated),
                };
                resolution.map(|resolution| Discrepancy {
                    key,
                    kind: if balance.is_some() {
                        DiscrepancyKind::Drift
                    } else {
                        DiscrepancyKind::MissingBalance
                    },
                    ledger_sum,
                    balance_quantity,
                    delta,
                    ledger_entry_count: count,
                    observed_last_entry_id: balance.and_then(|b| b.last_entry_id),
                    resolution,
                })
            }
        };

        if let Some(d) = discrepancy {
            outcome.discrepancies.push(d);
        }
    }

    outcome.completed = true;
    outcome
}

/// Output of one reconciliation run (logged and alerted, never persisted).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub organizations_audited: Vec<OrganizationId>,
    /// Organizations whose snapshot could not be read, with the error text.
    pub failed_organizations: Vec<(OrganizationId, String)>,
    pub tuples_checked: usize,
    pub discrepancies: Vec<Discrepancy>,
    pub cancelled: bool,
}

/// Counts-only view of a report, for log lines and run statistics.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReportSummary {
    pub organizations_audited: usize,
    pub organizations_failed: usize,
    pub tuples_checked: usize,
    pub auto_corrected: usize,
    pub escalated: usize,
    pub superseded: usize,
    pub correction_failures: usize,
    pub cancelled: bool,
}

impl ReconciliationReport {
    pub fn started(at: DateTime<Utc>) -> Self {
        Self {
            started_at: at,
            finished_at: at,
            organizations_audited: Vec::new(),
            failed_organizations: Vec::new(),
            tuples_checked: 0,
            discrepancies: Vec::new(),
            cancelled: false,
        }
    }

    fn count(&self, pred: impl Fn(&Resolution) -> bool) -> usize {
        self.discrepancies.iter().filter(|d| pred(&d.resolution)).count()
    }

    pub fn auto_corrected(&self) -> usize {
        self.count(|r| matches!(r, Resolution::AutoCorrected))
    }

    pub fn escalated(&self) -> usize {
        self.count(|r| matches!(r, Resolution::Escalated))
    }

    pub fn superseded(&self) -> usize {
        self.count(|r| matches!(r, Resolution::Superseded))
    }

    pub fn is_clean(&self) -> bool {
        self.discrepancies.is_empty() && self.failed_organizations.is_empty() && !self.cancelled
    }

    pub fn summary(&self) -> ReportSummary {
        ReportSummary {
            organizations_audited: self.organizations_audited.len(),
            organizations_failed: self.failed_organizations.len(),
            tuples_checked: self.tuples_checked,
            auto_corrected: self.auto_corrected(),
            escalated: self.escalated(),
            superseded: self.superseded(),
            correction_failures: self.count(|r| matches!(r, Resolution::CorrectionFailed(_))),
            cancelled: self.cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockledger_core::{ItemId, LocationId};

    fn key(org: OrganizationId) -> BalanceKey {
        BalanceKey {
            organization_id: org,
            item_id: ItemId::new(),
            location_id: LocationId::new(),
            lot_id: None,
        }
    }

    fn balance(key: BalanceKey, quantity: f64) -> Balance {
        Balance {
            key,
            quantity,
            last_updated: Some(Utc::now()),
            last_entry_id: Some(LedgerEntryId::new()),
        }
    }

    fn total(key: BalanceKey, sum: f64, entry_count: u64) -> LedgerTotal {
        LedgerTotal {
            key,
            sum,
            entry_count,
        }
    }

    fn snapshot(org: OrganizationId, totals: Vec<LedgerTotal>, balances: Vec<Balance>) -> AuditSnapshot {
        AuditSnapshot {
            organization_id: org,
            taken_at: Utc::now(),
            totals,
            balances,
        }
    }

    #[test]
    fn classification_boundaries_are_strict() {
        let policy = ReconciliationPolicy::default();
        assert_eq!(policy.classify(0.0), DriftClass::WithinTolerance);
        assert_eq!(policy.classify(QUANTITY_TOLERANCE), DriftClass::WithinTolerance);
        assert_eq!(policy.classify(2e-6), DriftClass::AutoCorrect);
        assert_eq!(policy.classify(0.01), DriftClass::AutoCorrect);
        assert_eq!(policy.classify(0.010_001), DriftClass::Escalate);
        assert_eq!(policy.classify(f64::NAN), DriftClass::Escalate);
    }

    #[test]
    fn policy_rejects_inverted_thresholds() {
        assert!(ReconciliationPolicy::with_escalation_threshold(0.5).is_ok());
        assert!(ReconciliationPolicy::with_escalation_threshold(1e-7).is_err());
        assert!(ReconciliationPolicy::with_escalation_threshold(f64::INFINITY).is_err());
    }

    #[test]
    fn consistent_snapshot_reports_nothing() {
        let org = OrganizationId::new();
        let k = key(org);
        let out = audit_snapshot(
            &snapshot(org, vec![total(k, 75.0, 3)], vec![balance(k, 75.0)]),
            &ReconciliationPolicy::default(),
            || true,
        );
        assert!(out.completed);
        assert_eq!(out.tuples_checked, 1);
        assert!(out.discrepancies.is_empty());
    }

    #[test]
    fn large_drift_is_escalated_not_corrected() {
        let org = OrganizationId::new();
        let k = key(org);
        let out = audit_snapshot(
            &snapshot(org, vec![total(k, 75.0, 3)], vec![balance(k, 999.0)]),
            &ReconciliationPolicy::default(),
            || true,
        );
        assert_eq!(out.discrepancies.len(), 1);
        let d = &out.discrepancies[0];
        assert_eq!(d.kind, DiscrepancyKind::Drift);
        assert_eq!(d.resolution, Resolution::Escalated);
        assert_eq!(d.delta, 924.0);
        assert_eq!(d.balance_quantity, Some(999.0));
    }

    #[test]
    fn small_drift_is_marked_for_correction() {
        let org = OrganizationId::new();
        let k = key(org);
        let out = audit_snapshot(
            &snapshot(org, vec![total(k, 10.0, 2)], vec![balance(k, 10.005)]),
            &ReconciliationPolicy::default(),
            || true,
        );
        assert_eq!(out.discrepancies[0].resolution, Resolution::PendingCorrection);
    }

    #[test]
    fn missing_balance_is_treated_as_zero() {
        let org = OrganizationId::new();
        let k = key(org);
        let out = audit_snapshot(
            &snapshot(org, vec![total(k, 0.004, 1)], vec![]),
            &ReconciliationPolicy::default(),
            || true,
        );
        let d = &out.discrepancies[0];
        assert_eq!(d.kind, DiscrepancyKind::MissingBalance);
        assert_eq!(d.balance_quantity, None);
        assert_eq!(d.resolution, Resolution::PendingCorrection);
    }

    #[test]
    fn orphaned_balance_is_always_escalated() {
        let org = OrganizationId::new();
        let k = key(org);
        let out = audit_snapshot(
            &snapshot(org, vec![], vec![balance(k, 0.0)]),
            &ReconciliationPolicy::default(),
            || true,
        );
        assert_eq!(out.discrepancies.len(), 1);
        assert_eq!(out.discrepancies[0].kind, DiscrepancyKind::OrphanedBalance);
        assert_eq!(out.discrepancies[0].resolution, Resolution::Escalated);
    }

    #[test]
    fn foreign_organization_row_is_escalated() {
        let org = OrganizationId::new();
        let foreign = key(OrganizationId::new());
        let out = audit_snapshot(
            &snapshot(org, vec![], vec![balance(foreign, 1.0)]),
            &ReconciliationPolicy::default(),
            || true,
        );
        assert_eq!(out.discrepancies[0].resolution, Resolution::Escalated);
    }

    #[test]
    fn cancellation_stops_between_tuples() {
        let org = OrganizationId::new();
        let keys: Vec<_> = (0..5).map(|_| key(org)).collect();
        let totals = keys.iter().map(|k| total(*k, 1.0, 1)).collect();
        let balances = keys.iter().map(|k| balance(*k, 500.0)).collect();

        let mut budget = 2;
        let out = audit_snapshot(
            &snapshot(org, totals, balances),
            &ReconciliationPolicy::default(),
            || {
                if budget == 0 {
                    return false;
                }
                budget -= 1;
                true
            },
        );
        assert!(!out.completed);
        assert_eq!(out.tuples_checked, 2);
        assert_eq!(out.discrepancies.len(), 2);
    }

    #[test]
    fn report_counts_by_resolution() {
        let org = OrganizationId::new();
        let mut report = ReconciliationReport::started(Utc::now());
        for resolution in [
            Resolution::AutoCorrected,
            Resolution::Escalated,
            Resolution::Escalated,
            Resolution::Superseded,
        ] {
            report.discrepancies.push(Discrepancy {
                key: key(org),
                kind: DiscrepancyKind::Drift,
                ledger_sum: 1.0,
                balance_quantity: Some(2.0),
                delta: 1.0,
                ledger_entry_count: 1,
                observed_last_entry_id: None,
                resolution,
            });
        }
        let s = report.summary();
        assert_eq!((s.auto_corrected, s.escalated, s.superseded), (1, 2, 1));
        assert!(!report.is_clean());
    }

    mod properties {
        use super::*;
        use crate::{LedgerEntry, MovementType, NewLedgerEntry};
        use proptest::prelude::*;
        use stockledger_core::{ActorId, CorrelationId};

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            /// Folding any sequence of movements into a balance, in order,
            /// leaves nothing for the audit to report.
            #[test]
            fn folded_balance_always_matches_ledger_sum(
                quantities in prop::collection::vec(-10_000.0f64..10_000.0f64, 1..40)
            ) {
                let org = OrganizationId::new();
                let (item, location) = (ItemId::new(), LocationId::new());
                let k = BalanceKey { organization_id: org, item_id: item, location_id: location, lot_id: None };

                let mut projected = Balance::zero(k);
                let mut sum = 0.0;
                for (i, q) in quantities.iter().enumerate() {
                    let new = NewLedgerEntry::new(
                        item, location, *q, MovementType::CountAdjustment,
                        CorrelationId::new(), ActorId::new(),
                    );
                    let entry = LedgerEntry::commit(org, new, LedgerEntryId::new(), i as u64 + 1, Utc::now());
                    projected.apply(&entry);
                    sum += entry.quantity;
                }

                let out = audit_snapshot(
                    &snapshot(org, vec![total(k, sum, quantities.len() as u64)], vec![projected]),
                    &ReconciliationPolicy::default(),
                    || true,
                );
                prop_assert!(out.completed);
                prop_assert!(out.discrepancies.is_empty());
            }

            /// Anything beyond the escalation threshold is never auto-corrected.
            #[test]
            fn large_drift_never_auto_corrects(
                base in -1_000.0f64..1_000.0f64,
                drift in 0.02f64..1_000_000.0f64,
            ) {
                let org = OrganizationId::new();
                let k = key(org);
                let out = audit_snapshot(
                    &snapshot(org, vec![total(k, base, 1)], vec![balance(k, base + drift)]),
                    &ReconciliationPolicy::default(),
                    || true,
                );
                prop_assert_eq!(out.discrepancies.len(), 1);
                prop_assert_eq!(&out.discrepancies[0].resolution, &Resolution::Escalated);
            }
        }
    }
}
