use thiserror::Error;

use stockledger_core::OrganizationId;

/// Tenant resolution failure.
///
/// Every variant aborts the in-flight request. None of them fall back to an
/// arbitrary organization.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TenantError {
    /// No source produced an organization (and no default applies).
    #[error("tenant not resolved: {0}")]
    TenantNotResolved(String),

    /// The resolved organization exists but has been deactivated.
    #[error("organization {0} is inactive")]
    OrganizationInactive(OrganizationId),

    /// The organization directory could not be read.
    #[error("organization lookup failed: {0}")]
    Lookup(String),

    /// Resolution exceeded its time budget.
    #[error("tenant resolution timed out")]
    Timeout,
}

impl TenantError {
    pub fn not_resolved(reason: impl Into<String>) -> Self {
        Self::TenantNotResolved(reason.into())
    }

    /// Authentication-class failures are the caller's problem; lookups and
    /// timeouts are ours and may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TenantError::Lookup(_) | TenantError::Timeout)
    }
}
