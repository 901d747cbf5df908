//! End-to-end tests over the in-memory adapters.
//!
//! Request path: RequestContext → TenantResolver → ScopedQuery → LedgerStore
//! Background: ReconciliationJob / BackupMonitor → AlertSink
//!
//! Verifies:
//! - Balances always equal the ledger sum after appends
//! - A failed projection update leaves no ledger row behind
//! - Organizations never see each other's data
//! - Reconciliation corrects small drift once and escalates large drift

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;

    use stockledger_core::{ActorId, CorrelationId, OrganizationId};
    use stockledger_ledger::{
        BalanceKey, LedgerFilter, MovementType, NewLedgerEntry, PageRequest, ReconciliationPolicy,
        Resolution, StockItem, StockLocation,
    };
    use stockledger_tenancy::{NewOrganization, RequestContext, ResolverSettings, TenantError};

    use crate::alerts::{AlertSeverity, InMemoryAlertSink};
    use crate::backup::{BackupFreshness, BackupMonitor, BackupStatus, BackupThresholds, StaticBackupSource};
    use crate::error::{ExternalErrorKind, GatewayError, LedgerError};
    use crate::gateway::InMemoryCatalog;
    use crate::jobs::{CancellationFlag, ReconciliationJob, Scheduler};
    use crate::ledger_store::{InMemoryLedgerStore, LedgerStore};
    use crate::organizations::{InMemoryOrganizationStore, OrganizationStore};
    use crate::resolver::TenantResolver;
    use crate::service::LedgerService;

    type Service = LedgerService<
        Arc<InMemoryOrganizationStore>,
        Arc<InMemoryCatalog>,
        Arc<InMemoryLedgerStore>,
    >;

    struct Harness {
        orgs: Arc<InMemoryOrganizationStore>,
        ledger: Arc<InMemoryLedgerStore>,
        alerts: Arc<InMemoryAlertSink>,
        service: Arc<Service>,
    }

    struct Stocked {
        org: OrganizationId,
        item: StockItem,
        location: StockLocation,
    }

    impl Stocked {
        fn key(&self) -> BalanceKey {
            BalanceKey {
                organization_id: self.org,
                item_id: self.item.id,
                location_id: self.location.id,
                lot_id: None,
            }
        }

        fn movement(&self, quantity: f64, movement: MovementType) -> NewLedgerEntry {
            NewLedgerEntry::new(
                self.item.id,
                self.location.id,
                quantity,
                movement,
                CorrelationId::new(),
                ActorId::new(),
            )
        }
    }

    fn harness() -> Harness {
        let orgs = Arc::new(InMemoryOrganizationStore::new());
        let ledger = Arc::new(InMemoryLedgerStore::new());
        let settings = ResolverSettings {
            base_domain: Some("stock.example.com".to_string()),
            ..Default::default()
        };
        let service = Arc::new(LedgerService::new(
            TenantResolver::new(orgs.clone(), settings),
            Arc::new(InMemoryCatalog::new()),
            ledger.clone(),
        ));
        Harness {
            orgs,
            ledger,
            alerts: Arc::new(InMemoryAlertSink::new()),
            service,
        }
    }

    impl Harness {
        async fn organization(&self, new: NewOrganization) -> Stocked {
            let org = self.orgs.create(new).await.unwrap().id;
            let scope = self.service.scoped(org);
            let item = scope.create(StockItem::new(org, "Whole milk", "l")).await.unwrap();
            let location = scope.create(StockLocation::new(org, "Walk-in")).await.unwrap();
            Stocked { org, item, location }
        }

        fn reconciliation(&self) -> ReconciliationJob<Arc<InMemoryOrganizationStore>, Arc<InMemoryLedgerStore>> {
            ReconciliationJob::new(
                self.orgs.clone(),
                self.ledger.clone(),
                self.alerts.clone(),
                ReconciliationPolicy::default(),
            )
        }
    }

    #[tokio::test]
    async fn receipt_usage_and_count_fold_into_balance() {
        let h = harness();
        let s = h.organization(NewOrganization::named("Harbour Grill")).await;

        h.service.append(s.org, s.movement(100.0, MovementType::Receipt)).await.unwrap();
        h.service.append(s.org, s.movement(-30.0, MovementType::Usage)).await.unwrap();
        let balance = h
            .service
            .append(s.org, s.movement(5.0, MovementType::CountAdjustment))
            .await
            .unwrap();
        assert_eq!(balance.quantity, 75.0);

        let stored = h
            .service
            .get_balance(s.org, s.item.id, s.location.id, None)
            .await
            .unwrap();
        assert_eq!(stored, balance);

        // Two pages, in insertion order.
        let filter = LedgerFilter::for_item(s.item.id);
        let first = h.service.list_ledger(s.org, &filter, PageRequest::first(2)).await.unwrap();
        let quantities: Vec<f64> = first.entries.iter().map(|e| e.quantity).collect();
        assert_eq!(quantities, vec![100.0, -30.0]);

        let next = PageRequest::first(2).next(&first).expect("second page");
        let second = h.service.list_ledger(s.org, &filter, next).await.unwrap();
        assert_eq!(second.entries.len(), 1);
        assert_eq!(second.entries[0].quantity, 5.0);
        assert!(second.next_cursor.is_none());
    }

    #[tokio::test]
    async fn failed_projection_update_leaves_no_ledger_row() {
        let h = harness();
        let s = h.organization(NewOrganization::named("Harbour Grill")).await;
        h.service.append(s.org, s.movement(10.0, MovementType::Receipt)).await.unwrap();

        h.ledger.fail_projection_after(0);
        let err = h
            .service
            .append(s.org, s.movement(4.0, MovementType::Receipt))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::AppendFailure(_)));
        assert!(err.is_retryable());
        assert_eq!(h.ledger.entry_count(), 1);

        // Third entry of a count sheet fails: none of the sheet is kept.
        let sheet = CorrelationId::new();
        let entries: Vec<NewLedgerEntry> = [-1.0, -2.0, -3.0]
            .into_iter()
            .map(|q| {
                let mut e = s.movement(q, MovementType::CountAdjustment);
                e.correlation_id = sheet;
                e
            })
            .collect();
        h.ledger.fail_projection_after(2);
        assert!(h.service.append_batch(s.org, entries.clone()).await.is_err());
        assert_eq!(h.ledger.entry_count(), 1);
        assert_eq!(h.ledger.get_balance(&s.key()).await.unwrap().quantity, 10.0);

        // The retry goes through unchanged.
        let receipts = h.service.append_batch(s.org, entries).await.unwrap();
        assert_eq!(receipts.len(), 3);
        assert_eq!(receipts[2].balance.quantity, 4.0);
        assert!(receipts.iter().all(|r| r.entry.correlation_id == sheet));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_to_one_key_are_all_counted() {
        let h = harness();
        let s = Arc::new(h.organization(NewOrganization::named("Harbour Grill")).await);

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let service = h.service.clone();
                let s = s.clone();
                tokio::spawn(async move {
                    service.append(s.org, s.movement(1.5, MovementType::Receipt)).await
                })
            })
            .collect();
        for t in tasks {
            t.await.unwrap().unwrap();
        }

        assert_eq!(h.ledger.get_balance(&s.key()).await.unwrap().quantity, 75.0);
        let report = h.reconciliation().run(None, &CancellationFlag::new()).await.unwrap();
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn organizations_never_see_each_other() {
        let h = harness();
        let a = h.organization(NewOrganization::named("A")).await;
        let b = h.organization(NewOrganization::named("B")).await;
        h.service.append(a.org, a.movement(12.0, MovementType::Receipt)).await.unwrap();
        h.service.append(b.org, b.movement(7.0, MovementType::Receipt)).await.unwrap();

        let page = h
            .service
            .list_ledger(b.org, &LedgerFilter::default(), PageRequest::default())
            .await
            .unwrap();
        assert!(page.entries.iter().all(|e| e.organization_id == b.org));
        assert_eq!(page.entries.len(), 1);

        // B reading A's item id under its own scope gets its own (empty) key.
        let balance = h
            .service
            .get_balance(b.org, a.item.id, a.location.id, None)
            .await
            .unwrap();
        assert_eq!(balance.quantity, 0.0);

        // B posting against A's item is blocked and reported as not found.
        let err = h
            .service
            .append(b.org, a.movement(1.0, MovementType::Receipt))
            .await
            .unwrap_err();
        let gateway = match err {
            LedgerError::Gateway(g) => g,
            other => panic!("expected gateway error, got {other:?}"),
        };
        assert!(matches!(gateway, GatewayError::CrossTenantAccess { .. }));
        assert_eq!(gateway.external_kind(), ExternalErrorKind::NotFound);
        assert_eq!(h.ledger.get_balance(&a.key()).await.unwrap().quantity, 12.0);
    }

    #[tokio::test]
    async fn header_claim_beats_subdomain_claim() {
        let h = harness();
        let a = h.organization(NewOrganization::named("A")).await;
        let b = h
            .organization(NewOrganization::named("B").with_routing_key("harbour"))
            .await;

        let ctx = RequestContext::new()
            .with_header("X-Organization-Id", a.org.to_string())
            .with_host("harbour.stock.example.com");
        assert_eq!(h.service.resolve_tenant(&ctx).await.unwrap(), a.org);

        let ctx = RequestContext::new().with_host("harbour.stock.example.com");
        assert_eq!(h.service.resolve_tenant(&ctx).await.unwrap(), b.org);

        h.orgs.deactivate(b.org).await.unwrap();
        assert_eq!(
            h.service.resolve_tenant(&ctx).await.unwrap_err(),
            TenantError::OrganizationInactive(b.org)
        );
    }

    #[tokio::test]
    async fn large_drift_is_escalated_and_left_alone() {
        let h = harness();
        let s = h.organization(NewOrganization::named("Harbour Grill")).await;
        h.service.append(s.org, s.movement(100.0, MovementType::Receipt)).await.unwrap();
        h.service.append(s.org, s.movement(-30.0, MovementType::Usage)).await.unwrap();
        h.service.append(s.org, s.movement(5.0, MovementType::CountAdjustment)).await.unwrap();
        h.ledger.overwrite_balance(s.key(), 999.0);

        let job = h.reconciliation();
        let report = job.run(None, &CancellationFlag::new()).await.unwrap();

        assert_eq!(report.discrepancies.len(), 1);
        let d = &report.discrepancies[0];
        assert_eq!(d.resolution, Resolution::Escalated);
        assert_eq!(d.ledger_sum, 75.0);
        assert_eq!(d.balance_quantity, Some(999.0));
        assert_eq!(d.delta, 924.0);
        assert_eq!(h.ledger.get_balance(&s.key()).await.unwrap().quantity, 999.0);
        assert_eq!(h.alerts.count(AlertSeverity::Critical), 1);

        // Still there next night; an operator has to fix it.
        let again = job.run(None, &CancellationFlag::new()).await.unwrap();
        assert_eq!(again.escalated(), 1);
        assert_eq!(again.auto_corrected(), 0);
    }

    #[tokio::test]
    async fn small_drift_is_corrected_once() {
        let h = harness();
        let s = h.organization(NewOrganization::named("Harbour Grill")).await;
        h.service.append(s.org, s.movement(75.0, MovementType::Receipt)).await.unwrap();
        h.ledger.overwrite_balance(s.key(), 75.004);

        let job = h.reconciliation();
        let first = job.run(None, &CancellationFlag::new()).await.unwrap();
        assert_eq!(first.auto_corrected(), 1);
        assert_eq!(h.ledger.get_balance(&s.key()).await.unwrap().quantity, 75.0);

        let second = job.run(None, &CancellationFlag::new()).await.unwrap();
        assert!(second.discrepancies.is_empty());
        assert!(second.is_clean());
        assert_eq!(h.alerts.count(AlertSeverity::Critical), 0);
    }

    #[tokio::test]
    async fn tolerance_boundary() {
        let h = harness();
        let inside = h.organization(NewOrganization::named("Inside")).await;
        let outside = h.organization(NewOrganization::named("Outside")).await;
        for s in [&inside, &outside] {
            h.service.append(s.org, s.movement(0.5, MovementType::Receipt)).await.unwrap();
        }
        // 2^-20 ≈ 9.5e-7 is within 1e-6; 2^-19 ≈ 1.9e-6 is not. Both exact in f64.
        h.ledger.overwrite_balance(inside.key(), 0.5 + 2f64.powi(-20));
        h.ledger.overwrite_balance(outside.key(), 0.5 + 2f64.powi(-19));

        let report = h.reconciliation().run(None, &CancellationFlag::new()).await.unwrap();

        assert_eq!(report.discrepancies.len(), 1);
        assert_eq!(report.discrepancies[0].key, outside.key());
        assert_eq!(report.discrepancies[0].resolution, Resolution::AutoCorrected);
        assert_eq!(h.ledger.get_balance(&inside.key()).await.unwrap().quantity, 0.5 + 2f64.powi(-20));
        assert_eq!(h.ledger.get_balance(&outside.key()).await.unwrap().quantity, 0.5);
    }

    #[tokio::test]
    async fn orphaned_balance_is_escalated() {
        let h = harness();
        let s = h.organization(NewOrganization::named("Harbour Grill")).await;
        h.ledger.overwrite_balance(s.key(), 0.000_5);

        let report = h.reconciliation().run(None, &CancellationFlag::new()).await.unwrap();
        assert_eq!(report.escalated(), 1);
        assert_eq!(h.ledger.get_balance(&s.key()).await.unwrap().quantity, 0.000_5);
    }

    #[tokio::test]
    async fn missing_balance_row_is_recreated() {
        let h = harness();
        let s = h.organization(NewOrganization::named("Harbour Grill")).await;
        let receipt = h.service.append(s.org, s.movement(0.004, MovementType::Receipt)).await.unwrap();
        h.ledger.drop_balance(&s.key());

        let report = h.reconciliation().run(None, &CancellationFlag::new()).await.unwrap();
        assert_eq!(report.auto_corrected(), 1);
        let rebuilt = h.ledger.get_balance(&s.key()).await.unwrap();
        assert_eq!(rebuilt.quantity, 0.004);
        assert_eq!(rebuilt.last_entry_id, receipt.last_entry_id);
    }

    #[tokio::test]
    async fn stale_backup_raises_critical_alert() {
        let h = harness();
        let now = Utc::now();
        let source = Arc::new(StaticBackupSource::new(Some(BackupStatus {
            snapshot_id: "nightly-2026-10-15".to_string(),
            taken_at: now - chrono::Duration::hours(26),
            size_bytes: Some(1 << 30),
        })));
        let monitor = BackupMonitor::new(source.clone(), h.alerts.clone(), BackupThresholds::default());

        let check = monitor.check_freshness_at(now).await;
        assert_eq!(check.freshness, BackupFreshness::Critical);
        assert_eq!(h.alerts.count(AlertSeverity::Critical), 1);

        source.set(Some(BackupStatus {
            snapshot_id: "nightly-2026-10-16".to_string(),
            taken_at: now - chrono::Duration::hours(2),
            size_bytes: None,
        }));
        let check = monitor.check_freshness_at(now).await;
        assert_eq!(check.freshness, BackupFreshness::Fresh);
        assert!(check.alert.is_none());
        assert_eq!(h.alerts.alerts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduler_runs_both_jobs_until_shutdown() {
        let h = harness();
        let s = h.organization(NewOrganization::named("Harbour Grill")).await;
        h.service.append(s.org, s.movement(3.0, MovementType::Receipt)).await.unwrap();
        h.ledger.overwrite_balance(s.key(), 3.002);

        let monitor = BackupMonitor::new(
            Arc::new(StaticBackupSource::new(None)),
            h.alerts.clone(),
            BackupThresholds::default(),
        );
        let handle = Scheduler::new()
            .every(Duration::from_secs(86_400), Arc::new(h.reconciliation()))
            .every(Duration::from_secs(3_600), Arc::new(monitor))
            .spawn();

        tokio::time::sleep(Duration::from_secs(2 * 3_600 + 60)).await;
        let stats = handle.stats();
        handle.shutdown().await;

        assert_eq!(stats.tasks["reconciliation"].runs, 1);
        assert_eq!(stats.tasks["reconciliation"].with_findings, 1);
        assert_eq!(stats.tasks["backup_freshness"].runs, 3);
        assert_eq!(h.ledger.get_balance(&s.key()).await.unwrap().quantity, 3.0);
    }
}
