//! Reconciliation job: audit every organization's balances against its
//! ledger, auto-correct small drift, escalate the rest.
//!
//! Organizations are processed one at a time, each from its own snapshot, so
//! no step ever reads two organizations' data together. A failure on one
//! organization is recorded and alerted; the run moves on to the next.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{error, info, instrument, warn};

use stockledger_core::OrganizationId;
use stockledger_ledger::{
    Discrepancy, ReconciliationPolicy, ReconciliationReport, Resolution, audit_snapshot,
};

use super::CancellationFlag;
use super::scheduler::{PeriodicTask, RunOutcome};
use crate::alerts::{Alert, AlertSink, AlertSource};
use crate::error::StoreError;
use crate::ledger_store::{CorrectionOutcome, LedgerStore};
use crate::organizations::OrganizationStore;

pub struct ReconciliationJob<O, L> {
    organizations: O,
    ledger: L,
    alerts: Arc<dyn AlertSink>,
    policy: ReconciliationPolicy,
}

impl<O, L> ReconciliationJob<O, L>
where
    O: OrganizationStore,
    L: LedgerStore,
{
    pub fn new(organizations: O, ledger: L, alerts: Arc<dyn AlertSink>, policy: ReconciliationPolicy) -> Self {
        Self {
            organizations,
            ledger,
            alerts,
            policy,
        }
    }

    pub fn policy(&self) -> &ReconciliationPolicy {
        &self.policy
    }

    /// Run one pass over `scope`, or over every organization (deactivated ones
    /// included) when `scope` is `None`.
    ///
    /// Only a failure to list organizations fails the run as a whole.
    #[instrument(skip_all, fields(scoped = scope.is_some()))]
    pub async fn run(
        &self,
        scope: Option<&[OrganizationId]>,
        cancel: &CancellationFlag,
    ) -> Result<ReconciliationReport, StoreError> {
        let mut report = ReconciliationReport::started(Utc::now());

        let targets = match scope {
            Some(ids) => ids.to_vec(),
            None => match self.organizations.list_all().await {
                Ok(orgs) => orgs.into_iter().map(|o| o.id).collect(),
                Err(e) => {
                    error!(error = %e, "reconciliation could not list organizations");
                    self.alerts
                        .raise(Alert::critical(
                            AlertSource::Reconciliation,
                            "reconciliation run aborted: organization directory unavailable",
                            json!({ "error": e.to_string() }),
                        ))
                        .await;
                    return Err(e);
                }
            },
        };

        for organization_id in targets {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let snapshot = match self.ledger.snapshot(organization_id).await {
                Ok(s) => s,
                Err(e) => {
                    error!(organization_id = %organization_id, error = %e, "reconciliation snapshot failed");
                    self.alerts
                        .raise(Alert::critical(
                            AlertSource::Reconciliation,
                            "reconciliation could not read organization",
                            json!({ "organization_id": organization_id, "error": e.to_string() }),
                        ))
                        .await;
                    report.failed_organizations.push((organization_id, e.to_string()));
                    continue;
                }
            };

            let outcome = audit_snapshot(&snapshot, &self.policy, || !cancel.is_cancelled());
            report.tuples_checked += outcome.tuples_checked;

            let mut discrepancies = outcome.discrepancies;
            let corrections_finished = self.apply_corrections(&mut discrepancies, cancel).await;

            for d in discrepancies.iter().filter(|d| d.resolution == Resolution::Escalated) {
                self.escalate(organization_id, d).await;
            }
            report.discrepancies.extend(discrepancies);

            if !outcome.completed || !corrections_finished {
                report.cancelled = true;
                break;
            }
            report.organizations_audited.push(organization_id);
        }

        report.finished_at = Utc::now();
        let s = report.summary();
        info!(
            organizations_audited = s.organizations_audited,
            organizations_failed = s.organizations_failed,
            tuples_checked = s.tuples_checked,
            auto_corrected = s.auto_corrected,
            escalated = s.escalated,
            superseded = s.superseded,
            correction_failures = s.correction_failures,
            cancelled = s.cancelled,
            "reconciliation run finished"
        );
        Ok(report)
    }

    /// Returns false if cancelled before every pending correction was tried.
    async fn apply_corrections(&self, discrepancies: &mut [Discrepancy], cancel: &CancellationFlag) -> bool {
        for d in discrepancies
            .iter_mut()
            .filter(|d| d.resolution == Resolution::PendingCorrection)
        {
            if cancel.is_cancelled() {
                return false;
            }

            let outcome = self.ledger.correct_balance(d).await;
            d.resolution = match outcome {
                Ok(CorrectionOutcome::Applied) => {
                    warn!(
                        key = %d.key,
                        kind = ?d.kind,
                        previous = ?d.balance_quantity,
                        ledger_sum = d.ledger_sum,
                        delta = d.delta,
                        "balance auto-corrected to ledger sum"
                    );
                    Resolution::AutoCorrected
                }
                Ok(CorrectionOutcome::Superseded) => {
                    info!(key = %d.key, "balance moved since snapshot; correction skipped");
                    Resolution::Superseded
                }
                Err(e) => {
                    warn!(key = %d.key, error = %e, "balance correction failed");
                    self.alerts
                        .raise(Alert::warning(
                            AlertSource::Reconciliation,
                            "balance correction failed",
                            json!({ "key": d.key, "delta": d.delta, "error": e.to_string() }),
                        ))
                        .await;
                    Resolution::CorrectionFailed(e.to_string())
                }
            };
        }
        true
    }

    async fn escalate(&self, organization_id: OrganizationId, d: &Discrepancy) {
        error!(
            organization_id = %organization_id,
            key = %d.key,
            kind = ?d.kind,
            ledger_sum = d.ledger_sum,
            balance = ?d.balance_quantity,
            delta = d.delta,
            "balance drift escalated"
        );
        self.alerts
            .raise(Alert::critical(
                AlertSource::Reconciliation,
                format!("balance drift of {} on {} needs review", d.delta, d.key),
                json!({
                    "organization_id": organization_id,
                    "discrepancy": d,
                    "escalation_threshold": self.policy.escalation_threshold,
                }),
            ))
            .await;
    }
}

#[async_trait]
impl<O, L> PeriodicTask for ReconciliationJob<O, L>
where
    O: OrganizationStore + 'static,
    L: LedgerStore + 'static,
{
    fn name(&self) -> &'static str {
        "reconciliation"
    }

    async fn run_once(&self, cancel: &CancellationFlag) -> RunOutcome {
        match self.run(None, cancel).await {
            Ok(report) if report.is_clean() => RunOutcome::Clean,
            Ok(report) => {
                let s = report.summary();
                RunOutcome::Findings(format!(
                    "{} corrected, {} escalated, {} failed organizations{}",
                    s.auto_corrected,
                    s.escalated,
                    s.organizations_failed,
                    if s.cancelled { ", cancelled" } else { "" }
                ))
            }
            Err(e) => RunOutcome::Failed(e.to_string()),
        }
    }
}
