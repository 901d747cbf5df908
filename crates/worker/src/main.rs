//! Background process: nightly reconciliation and backup freshness checks.

use std::sync::Arc;

use anyhow::Context;
use stockledger_infra::backup::BackupSource;
use stockledger_infra::db;
use stockledger_infra::jobs::PeriodicTask;
use stockledger_infra::{
    AlertSink, BackupMonitor, HttpBackupSource, LedgerConfig, PostgresLedgerStore,
    PostgresOrganizationStore, ReconciliationJob, Scheduler, StaticBackupSource, TracingAlertSink,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stockledger_observability::init();

    let config = LedgerConfig::from_env().context("loading configuration")?;

    let pool = db::connect(&config.database_url, config.request_timeout)
        .await
        .context("connecting to postgres")?;
    db::migrate(&pool).await.context("applying migrations")?;

    let alerts: Arc<dyn AlertSink> = Arc::new(TracingAlertSink);

    let backups: Arc<dyn BackupSource> = match &config.backup_api_url {
        Some(url) => Arc::new(
            HttpBackupSource::new(url.clone(), config.backup_api_token.clone(), config.request_timeout)
                .context("building backup API client")?,
        ),
        None => Arc::new(StaticBackupSource::failing("no backup API configured")),
    };

    let reconciliation: Arc<dyn PeriodicTask> = Arc::new(ReconciliationJob::new(
        Arc::new(PostgresOrganizationStore::new(pool.clone())),
        Arc::new(PostgresLedgerStore::new(pool.clone())),
        alerts.clone(),
        config.reconciliation,
    ));
    let backup_check: Arc<dyn PeriodicTask> =
        Arc::new(BackupMonitor::new(backups, alerts, config.backup_thresholds));

    let handle = Scheduler::new()
        .every(config.reconcile_interval, reconciliation)
        .every(config.backup_check_interval, backup_check)
        .spawn();

    tracing::info!(
        reconcile_every_secs = config.reconcile_interval.as_secs(),
        backup_check_every_secs = config.backup_check_interval.as_secs(),
        "worker started"
    );

    let signal = wait_for_shutdown_signal().await.context("waiting for shutdown signal")?;
    tracing::info!(signal, stats = ?handle.stats(), "shutting down");
    handle.shutdown().await;
    pool.close().await;
    Ok(())
}

/// SIGTERM (container stop) or SIGINT (Ctrl-C), whichever comes first.
async fn wait_for_shutdown_signal() -> std::io::Result<&'static str> {
    ShutdownSignals::register()?.recv().await
}

/// Handlers are installed on `register`, so a signal sent after that returns
/// is observed even if nobody is awaiting `recv` yet.
struct ShutdownSignals {
    #[cfg(unix)]
    sigterm: tokio::signal::unix::Signal,
    #[cfg(unix)]
    sigint: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl ShutdownSignals {
    fn register() -> std::io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};
        Ok(Self {
            sigterm: signal(SignalKind::terminate())?,
            sigint: signal(SignalKind::interrupt())?,
        })
    }

    async fn recv(&mut self) -> std::io::Result<&'static str> {
        tokio::select! {
            _ = self.sigterm.recv() => Ok("SIGTERM"),
            _ = self.sigint.recv() => Ok("SIGINT"),
        }
    }
}

#[cfg(not(unix))]
impl ShutdownSignals {
    fn register() -> std::io::Result<Self> {
        Ok(Self {})
    }

    async fn recv(&mut self) -> std::io::Result<&'static str> {
        tokio::signal::ctrl_c().await?;
        Ok("ctrl-c")
    }
}
