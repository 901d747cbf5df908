//! Runtime configuration from environment variables.
//!
//! Unset variables fall back to documented defaults (with a warning); set but
//! unparseable values are an error, never silently replaced.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use stockledger_core::OrganizationId;
use stockledger_ledger::ReconciliationPolicy;
use stockledger_tenancy::ResolverSettings;

use crate::backup::BackupThresholds;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LedgerConfig {
    pub database_url: String,
    /// Consumed by `TenantResolver::from_config`.
    pub resolver: ResolverSettings,
    pub request_timeout: Duration,
    pub reconciliation: ReconciliationPolicy,
    pub reconcile_interval: Duration,
    pub backup_thresholds: BackupThresholds,
    pub backup_check_interval: Duration,
    pub backup_api_url: Option<String>,
    pub backup_api_token: Option<String>,
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable lookup (tests pass a map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { lookup: &lookup };

        let database_url = env.required("DATABASE_URL")?;

        let resolver = ResolverSettings {
            header_name: env
                .or_default("TENANT_HEADER", "x-organization-id".to_string())?
                .to_ascii_lowercase(),
            base_domain: env.optional("TENANT_BASE_DOMAIN"),
            default_organization: env
                .optional("DEFAULT_ORGANIZATION_ID")
                .map(|raw| parse::<OrganizationId>("DEFAULT_ORGANIZATION_ID", &raw))
                .transpose()?,
        };

        let request_timeout = Duration::from_millis(env.positive("REQUEST_TIMEOUT_MS", 5_000)?);

        let threshold: f64 = env.or_default("RECONCILE_ESCALATION_THRESHOLD", 0.01)?;
        let reconciliation = ReconciliationPolicy::with_escalation_threshold(threshold).map_err(|e| {
            ConfigError::Invalid {
                var: "RECONCILE_ESCALATION_THRESHOLD",
                value: threshold.to_string(),
                reason: e.to_string(),
            }
        })?;
        let reconcile_interval = Duration::from_secs(env.positive("RECONCILE_INTERVAL_SECS", 86_400)?);

        let backup_thresholds = BackupThresholds::new(
            env.hours("BACKUP_WARNING_HOURS", 24)?,
            env.hours("BACKUP_CRITICAL_HOURS", 25)?,
        )?;
        let backup_check_interval = Duration::from_secs(env.positive("BACKUP_CHECK_INTERVAL_SECS", 3_600)?);

        let backup_api_url = env.optional("BACKUP_API_URL");
        if backup_api_url.is_none() {
            warn!("BACKUP_API_URL not set; backup checks will report every run as critical");
        }

        Ok(Self {
            database_url,
            resolver,
            request_timeout,
            reconciliation,
            reconcile_interval,
            backup_thresholds,
            backup_check_interval,
            backup_api_url,
            backup_api_token: env.optional("BACKUP_API_TOKEN"),
        })
    }
}

struct Env<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Env<'_> {
    /// Blank values count as unset.
    fn optional(&self, var: &str) -> Option<String> {
        (self.lookup)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, var: &'static str) -> Result<String, ConfigError> {
        self.optional(var).ok_or(ConfigError::Missing(var))
    }

    fn or_default<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + std::fmt::Debug,
        T::Err: std::fmt::Display,
    {
        match self.optional(var) {
            Some(raw) => parse(var, &raw),
            None => {
                warn!(var, default = ?default, "environment variable not set; using default");
                Ok(default)
            }
        }
    }

    fn positive(&self, var: &'static str, default: u64) -> Result<u64, ConfigError> {
        let value = self.or_default(var, default)?;
        if value == 0 {
            return Err(ConfigError::Invalid {
                var,
                value: value.to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(value)
    }

    /// Positive hour count that fits a `chrono::Duration`.
    fn hours(&self, var: &'static str, default: u64) -> Result<chrono::Duration, ConfigError> {
        let value = self.positive(var, default)?;
        i64::try_from(value)
            .ok()
            .and_then(chrono::Duration::try_hours)
            .ok_or_else(|| ConfigError::Invalid {
                var,
                value: value.to_string(),
                reason: "too many hours".to_string(),
            })
    }
}

fn parse<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}
