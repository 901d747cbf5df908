//! Backup source backed by the platform's snapshot listing API.
//!
//! Accepts either a bare JSON array of snapshots or `{"snapshots": [...]}`.
//! The newest snapshot by timestamp wins, whatever order the API returns.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, instrument};

use super::{BackupSource, BackupSourceError, BackupStatus};

#[derive(Debug, Clone)]
pub struct HttpBackupSource {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl HttpBackupSource {
    pub fn new(url: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self, BackupSourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackupSourceError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
            token,
        })
    }
}

#[async_trait]
impl BackupSource for HttpBackupSource {
    #[instrument(skip(self), fields(url = %self.url), err)]
    async fn latest(&self) -> Result<Option<BackupStatus>, BackupSourceError> {
        let mut req = self.client.get(&self.url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| BackupSourceError::Transport(e.to_string()))?;

        match resp.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => return Err(BackupSourceError::Unauthorized),
            s if !s.is_success() => return Err(BackupSourceError::Status(s.as_u16())),
            _ => {}
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| BackupSourceError::Transport(e.to_string()))?;
        let latest = newest_snapshot(&body)?;
        debug!(snapshot = ?latest.as_ref().map(|s| &s.snapshot_id), "backup listing fetched");
        Ok(latest)
    }
}

#[derive(Debug, Deserialize)]
struct SnapshotRecord {
    #[serde(alias = "snapshot_id", alias = "name")]
    id: String,
    #[serde(alias = "taken_at", alias = "createdAt")]
    created_at: DateTime<Utc>,
    #[serde(default, alias = "size", alias = "sizeBytes")]
    size_bytes: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Listing {
    Bare(Vec<SnapshotRecord>),
    Wrapped { snapshots: Vec<SnapshotRecord> },
}

fn newest_snapshot(body: &[u8]) -> Result<Option<BackupStatus>, BackupSourceError> {
    let listing: Listing = serde_json::from_slice(body).map_err(|e| BackupSourceError::Decode(e.to_string()))?;
    let records = match listing {
        Listing::Bare(r) | Listing::Wrapped { snapshots: r } => r,
    };

    Ok(records
        .into_iter()
        .max_by_key(|r| r.created_at)
        .map(|r| BackupStatus {
            snapshot_id: r.id,
            taken_at: r.created_at,
            size_bytes: r.size_bytes,
        }))
}
