//! Infrastructure layer: persistence adapters, tenant resolution, the scoped
//! gateway, background jobs and configuration.

pub mod alerts;
pub mod backup;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod jobs;
pub mod ledger_store;
pub mod organizations;
pub mod resolver;
pub mod service;

mod integration_tests;

pub use alerts::{Alert, AlertSeverity, AlertSink, AlertSource, InMemoryAlertSink, TracingAlertSink};
pub use backup::{
    BackupCheck, BackupFreshness, BackupMonitor, BackupSource, BackupSourceError, BackupStatus,
    BackupThresholds, HttpBackupSource, StaticBackupSource,
};
pub use config::{ConfigError, LedgerConfig};
pub use error::{ExternalErrorKind, GatewayError, LedgerError, StoreError};
pub use gateway::{InMemoryCatalog, PostgresCatalogStore, RecordStore, ScopedQuery};
pub use jobs::{CancellationFlag, ReconciliationJob, Scheduler, SchedulerHandle};
pub use ledger_store::{
    AppendReceipt, CorrectionOutcome, InMemoryLedgerStore, LedgerStore, PostgresLedgerStore,
};
pub use organizations::{InMemoryOrganizationStore, OrganizationStore, PostgresOrganizationStore};
pub use resolver::TenantResolver;
pub use service::LedgerService;
