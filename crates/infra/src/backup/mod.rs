//! Backup freshness monitoring.
//!
//! A [`BackupSource`] reports the most recent durable snapshot; the
//! [`BackupMonitor`] turns its age into a freshness verdict and an alert.

pub mod http;
pub mod monitor;

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use http::HttpBackupSource;
pub use monitor::{BackupCheck, BackupFreshness, BackupMonitor, BackupThresholds};

/// Metadata of the most recent durable snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupStatus {
    pub snapshot_id: String,
    pub taken_at: DateTime<Utc>,
    pub size_bytes: Option<u64>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackupSourceError {
    #[error("backup API unreachable: {0}")]
    Transport(String),

    #[error("backup API rejected credentials")]
    Unauthorized,

    #[error("backup API returned status {0}")]
    Status(u16),

    #[error("backup API response could not be decoded: {0}")]
    Decode(String),
}

#[async_trait]
pub trait BackupSource: Send + Sync {
    /// Newest snapshot, or `None` when no snapshot exists at all.
    async fn latest(&self) -> Result<Option<BackupStatus>, BackupSourceError>;
}

#[async_trait]
impl<S> BackupSource for Arc<S>
where
    S: BackupSource + ?Sized,
{
    async fn latest(&self) -> Result<Option<BackupStatus>, BackupSourceError> {
        (**self).latest().await
    }
}

/// Fixed answer, settable at runtime (tests/dev).
#[derive(Debug)]
pub struct StaticBackupSource {
    answer: Mutex<Result<Option<BackupStatus>, BackupSourceError>>,
}

impl StaticBackupSource {
    pub fn new(status: Option<BackupStatus>) -> Self {
        Self {
            answer: Mutex::new(Ok(status)),
        }
    }

    /// A source whose every query fails with `reason`.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            answer: Mutex::new(Err(BackupSourceError::Transport(reason.into()))),
        }
    }

    pub fn set(&self, status: Option<BackupStatus>) {
        *self.answer.lock().unwrap_or_else(PoisonError::into_inner) = Ok(status);
    }
}

#[async_trait]
impl BackupSource for StaticBackupSource {
    async fn latest(&self) -> Result<Option<BackupStatus>, BackupSourceError> {
        self.answer.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}
