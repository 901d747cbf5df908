//! Operator alerts raised by the background jobs.
//!
//! Alerts are fire-and-forget: a sink that cannot deliver logs the failure
//! itself, so raising an alert never fails the job that raised it.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSource {
    Reconciliation,
    Backup,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub severity: AlertSeverity,
    pub source: AlertSource,
    pub summary: String,
    /// Structured context for the on-call operator.
    pub details: serde_json::Value,
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    pub fn warning(source: AlertSource, summary: impl Into<String>, details: serde_json::Value) -> Self {
        Self::new(AlertSeverity::Warning, source, summary, details)
    }

    pub fn critical(source: AlertSource, summary: impl Into<String>, details: serde_json::Value) -> Self {
        Self::new(AlertSeverity::Critical, source, summary, details)
    }

    fn new(
        severity: AlertSeverity,
        source: AlertSource,
        summary: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            severity,
            source,
            summary: summary.into(),
            details,
            raised_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn raise(&self, alert: Alert);
}

/// Emits alerts as structured log events (`warn` / `error`).
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

#[async_trait]
impl AlertSink for TracingAlertSink {
    async fn raise(&self, alert: Alert) {
        let details = alert.details.to_string();
        match alert.severity {
            AlertSeverity::Warning => warn!(
                alert.source = ?alert.source,
                alert.details = %details,
                "{}",
                alert.summary
            ),
            AlertSeverity::Critical => error!(
                alert.source = ?alert.source,
                alert.details = %details,
                "{}",
                alert.summary
            ),
        }
    }
}

/// Collects alerts in memory (tests/dev).
#[derive(Debug, Default)]
pub struct InMemoryAlertSink {
    raised: Mutex<Vec<Alert>>,
}

impl InMemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.raised.lock().map(|a| a.clone()).unwrap_or_default()
    }

    pub fn count(&self, severity: AlertSeverity) -> usize {
        self.alerts().iter().filter(|a| a.severity == severity).count()
    }
}

#[async_trait]
impl AlertSink for InMemoryAlertSink {
    async fn raise(&self, alert: Alert) {
        if let Ok(mut raised) = self.raised.lock() {
            raised.push(alert);
        }
    }
}
