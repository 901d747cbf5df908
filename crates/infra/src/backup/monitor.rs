use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument};

use super::{BackupSource, BackupStatus};
use crate::alerts::{Alert, AlertSink, AlertSource};
use crate::config::ConfigError;
use crate::jobs::{CancellationFlag, PeriodicTask, RunOutcome};

pub const DEFAULT_SOURCE_TIMEOUT: Duration = Duration::from_secs(30);

/// Age limits for the newest snapshot.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BackupThresholds {
    pub warning: chrono::Duration,
    pub critical: chrono::Duration,
}

impl Default for BackupThresholds {
    fn default() -> Self {
        Self {
            warning: chrono::Duration::hours(24),
            critical: chrono::Duration::hours(25),
        }
    }
}

impl BackupThresholds {
    pub fn new(warning: chrono::Duration, critical: chrono::Duration) -> Result<Self, ConfigError> {
        if warning <= chrono::Duration::zero() || warning >= critical {
            return Err(ConfigError::Invalid {
                var: "BACKUP_WARNING_HOURS",
                value: format!("{}h / {}h", warning.num_hours(), critical.num_hours()),
                reason: "warning threshold must be positive and below the critical threshold".to_string(),
            });
        }
        Ok(Self { warning, critical })
    }

    /// `age <= warning` is fresh; `warning < age <= critical` warns; beyond
    /// that is critical.
    pub fn classify(&self, age: chrono::Duration) -> BackupFreshness {
        if age > self.critical {
            BackupFreshness::Critical
        } else if age > self.warning {
            BackupFreshness::Warning
        } else {
            BackupFreshness::Fresh
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupFreshness {
    Fresh,
    Warning,
    Critical,
}

/// Result of one freshness check.
#[derive(Debug, Clone, PartialEq)]
pub struct BackupCheck {
    pub checked_at: DateTime<Utc>,
    pub status: Option<BackupStatus>,
    /// Never negative; a snapshot stamped in the future counts as age zero.
    pub age: Option<chrono::Duration>,
    pub freshness: BackupFreshness,
    /// Set when the source could not be queried.
    pub failure: Option<String>,
    pub alert: Option<Alert>,
}

pub struct BackupMonitor {
    source: Arc<dyn BackupSource>,
    alerts: Arc<dyn AlertSink>,
    thresholds: BackupThresholds,
    timeout: Duration,
}

impl BackupMonitor {
    pub fn new(source: Arc<dyn BackupSource>, alerts: Arc<dyn AlertSink>, thresholds: BackupThresholds) -> Self {
        Self {
            source,
            alerts,
            thresholds,
            timeout: DEFAULT_SOURCE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn thresholds(&self) -> BackupThresholds {
        self.thresholds
    }

    pub async fn check_freshness(&self) -> BackupCheck {
        self.check_freshness_at(Utc::now()).await
    }

    /// Check against an explicit clock. Any alert is raised before returning.
    #[instrument(skip(self))]
    pub async fn check_freshness_at(&self, now: DateTime<Utc>) -> BackupCheck {
        let queried = match tokio::time::timeout(self.timeout, self.source.latest()).await {
            Ok(Ok(status)) => Ok(status),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("backup source timed out after {:?}", self.timeout)),
        };

        let check = match queried {
            Err(failure) => {
                let alert = Alert::critical(
                    AlertSource::Backup,
                    "backup status could not be determined",
                    json!({ "error": failure }),
                );
                BackupCheck {
                    checked_at: now,
                    status: None,
                    age: None,
                    freshness: BackupFreshness::Critical,
                    failure: Some(failure),
                    alert: Some(alert),
                }
            }
            Ok(None) => BackupCheck {
                checked_at: now,
                status: None,
                age: None,
                freshness: BackupFreshness::Critical,
                failure: None,
                alert: Some(Alert::critical(
                    AlertSource::Backup,
                    "no backup snapshot exists",
                    json!({ "critical_hours": self.thresholds.critical.num_hours() }),
                )),
            },
            Ok(Some(status)) => {
                let age = (now - status.taken_at).max(chrono::Duration::zero());
                let freshness = self.thresholds.classify(age);
                let details = json!({
                    "snapshot_id": status.snapshot_id,
                    "taken_at": status.taken_at,
                    "age_minutes": age.num_minutes(),
                    "warning_hours": self.thresholds.warning.num_hours(),
                    "critical_hours": self.thresholds.critical.num_hours(),
                });
                let alert = match freshness {
                    BackupFreshness::Fresh => None,
                    BackupFreshness::Warning => {
                        Some(Alert::warning(AlertSource::Backup, "latest backup is getting old", details))
                    }
                    BackupFreshness::Critical => {
                        Some(Alert::critical(AlertSource::Backup, "latest backup is too old", details))
                    }
                };
                BackupCheck {
                    checked_at: now,
                    status: Some(status),
                    age: Some(age),
                    freshness,
                    failure: None,
                    alert,
                }
            }
        };

        if let Some(alert) = &check.alert {
            self.alerts.raise(alert.clone()).await;
        } else {
            info!(
                age_minutes = check.age.map(|a| a.num_minutes()),
                "backup fresh"
            );
        }
        check
    }
}

#[async_trait]
impl PeriodicTask for BackupMonitor {
    fn name(&self) -> &'static str {
        "backup_freshness"
    }

    async fn run_once(&self, _cancel: &CancellationFlag) -> RunOutcome {
        let check = self.check_freshness().await;
        match (check.freshness, check.failure) {
            (_, Some(failure)) => RunOutcome::Failed(failure),
            (BackupFreshness::Fresh, None) => RunOutcome::Clean,
            (freshness, None) => RunOutcome::Findings(format!("backup freshness {freshness:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{AlertSeverity, InMemoryAlertSink};
    use crate::backup::StaticBackupSource;

    fn status(taken_at: DateTime<Utc>) -> BackupStatus {
        BackupStatus {
            snapshot_id: "nightly".to_string(),
            taken_at,
            size_bytes: Some(4096),
        }
    }

    fn monitor(source: StaticBackupSource) -> (BackupMonitor, Arc<InMemoryAlertSink>) {
        let alerts = Arc::new(InMemoryAlertSink::new());
        let m = BackupMonitor::new(Arc::new(source), alerts.clone(), BackupThresholds::default());
        (m, alerts)
    }

    #[tokio::test]
    async fn classification_across_thresholds() {
        let now = Utc::now();
        let source = StaticBackupSource::new(None);
        let (m, alerts) = monitor(source);

        for (hours, expected) in [
            (1, BackupFreshness::Fresh),
            (24, BackupFreshness::Fresh),
            (25, BackupFreshness::Warning),
            (26, BackupFreshness::Critical),
        ] {
            let src = StaticBackupSource::new(Some(status(now - chrono::Duration::hours(hours))));
            let m = BackupMonitor::new(Arc::new(src), alerts.clone(), m.thresholds());
            assert_eq!(m.check_freshness_at(now).await.freshness, expected, "{hours}h");
        }
        assert_eq!(alerts.count(AlertSeverity::Warning), 1);
        assert_eq!(alerts.count(AlertSeverity::Critical), 1);
    }

    #[tokio::test]
    async fn missing_backup_is_critical() {
        let (m, alerts) = monitor(StaticBackupSource::new(None));
        let check = m.check_freshness().await;
        assert_eq!(check.freshness, BackupFreshness::Critical);
        assert!(check.failure.is_none());
        assert_eq!(alerts.count(AlertSeverity::Critical), 1);
    }

    #[tokio::test]
    async fn source_failure_is_critical_not_silent() {
        let (m, alerts) = monitor(StaticBackupSource::failing("connection refused"));
        let check = m.check_freshness().await;
        assert_eq!(check.freshness, BackupFreshness::Critical);
        assert!(check.failure.unwrap().contains("connection refused"));
        assert_eq!(alerts.count(AlertSeverity::Critical), 1);
        assert!(matches!(m.run_once(&CancellationFlag::new()).await, RunOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn future_timestamp_clamps_to_zero_age() {
        let now = Utc::now();
        let (m, _) = monitor(StaticBackupSource::new(Some(status(now + chrono::Duration::minutes(5)))));
        let check = m.check_freshness_at(now).await;
        assert_eq!(check.age, Some(chrono::Duration::zero()));
        assert_eq!(check.freshness, BackupFreshness::Fresh);
    }

    #[test]
    fn thresholds_must_be_ordered() {
        assert!(BackupThresholds::new(chrono::Duration::hours(25), chrono::Duration::hours(24)).is_err());
        assert!(BackupThresholds::new(chrono::Duration::hours(6), chrono::Duration::hours(12)).is_ok());
    }
}
