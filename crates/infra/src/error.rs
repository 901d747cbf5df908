//! Infrastructure error types and the sqlx error mapping.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (foreign key / check / restrict violation) | `23503`, `23514`, `23001` | `Constraint` |
//! | Database (serialization failure / deadlock) | `40001`, `40P01` | `Unavailable` |
//! | Database (other) | any other | `Backend` |
//! | PoolClosed, PoolTimedOut, Io, Tls | N/A | `Unavailable` |
//! | RowNotFound | N/A | `NotFound` |
//! | ColumnDecode, Decode | N/A | `Decode` |

use thiserror::Error;

use stockledger_core::{DomainError, OrganizationId};

/// Storage-layer failure shared by every store trait.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Rejected by a database constraint or trigger.
    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("invalid record: {0}")]
    Validation(String),

    /// Transient: the backend could not be reached or asked us to retry.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("stored data could not be decoded: {0}")]
    Decode(String),

    #[error("store error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }

    pub(crate) fn poisoned() -> Self {
        StoreError::Backend("in-memory store lock poisoned".to_string())
    }
}

impl From<DomainError> for StoreError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Conflict(msg) => StoreError::Conflict(msg),
            other => StoreError::Validation(other.to_string()),
        }
    }
}

/// Map SQLx errors to `StoreError`, tagging the failing operation.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                Some("23503") | Some("23514") | Some("23001") => StoreError::Constraint(msg),
                Some("40001") | Some("40P01") => StoreError::Unavailable(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
            StoreError::Unavailable(format!("connection pool unavailable in {}", operation))
        }
        sqlx::Error::Io(e) => StoreError::Unavailable(format!("io error in {}: {}", operation, e)),
        sqlx::Error::Tls(e) => StoreError::Unavailable(format!("tls error in {}: {}", operation, e)),
        sqlx::Error::RowNotFound => StoreError::NotFound(format!("no row returned in {}", operation)),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Decode(format!("in {}: {}", operation, err))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

/// How a gateway error may be shown outside this process.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExternalErrorKind {
    NotFound,
    InvalidInput,
    Unavailable,
}

/// Failure of a scoped read or write.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The record exists but belongs to another organization. Internal
    /// integrity violation; never reported to callers as such.
    #[error("cross-tenant access: {kind} {id} requested under organization {organization_id}")]
    CrossTenantAccess {
        kind: &'static str,
        id: String,
        organization_id: OrganizationId,
    },

    #[error("{kind} {id} not found")]
    RecordNotFound { kind: &'static str, id: String },

    #[error("invalid {kind}: {reason}")]
    Validation { kind: &'static str, reason: String },

    #[error("{operation} timed out")]
    Timeout { operation: &'static str },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl GatewayError {
    /// Cross-tenant hits surface as plain not-found so callers cannot probe
    /// for other organizations' ids.
    pub fn external_kind(&self) -> ExternalErrorKind {
        match self {
            GatewayError::CrossTenantAccess { .. } | GatewayError::RecordNotFound { .. } => {
                ExternalErrorKind::NotFound
            }
            GatewayError::Validation { .. } => ExternalErrorKind::InvalidInput,
            GatewayError::Store(StoreError::Validation(_))
            | GatewayError::Store(StoreError::Conflict(_))
            | GatewayError::Store(StoreError::Constraint(_)) => ExternalErrorKind::InvalidInput,
            GatewayError::Store(StoreError::NotFound(_)) => ExternalErrorKind::NotFound,
            GatewayError::Timeout { .. } | GatewayError::Store(_) => ExternalErrorKind::Unavailable,
        }
    }

    /// Message safe to hand to a caller.
    pub fn external_message(&self) -> String {
        match self {
            GatewayError::CrossTenantAccess { kind, id, .. } => {
                GatewayError::RecordNotFound { kind: *kind, id: id.clone() }.to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Failure of a ledger operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("invalid ledger entry: {0}")]
    Validation(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// The append transaction was aborted; nothing was written.
    #[error("ledger append failed: {0}")]
    AppendFailure(StoreError),

    #[error("ledger read failed: {0}")]
    Storage(StoreError),

    #[error("ledger {operation} timed out")]
    Timeout { operation: &'static str },
}

impl LedgerError {
    /// Appends are atomic, so a failed or timed-out append can always be
    /// resubmitted as-is.
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::AppendFailure(e) => !matches!(
                e,
                StoreError::Validation(_) | StoreError::Constraint(_)
            ),
            LedgerError::Timeout { .. } => true,
            LedgerError::Storage(e) => e.is_retryable(),
            LedgerError::Gateway(GatewayError::Timeout { .. }) => true,
            LedgerError::Gateway(GatewayError::Store(e)) => e.is_retryable(),
            LedgerError::Validation(_) | LedgerError::Gateway(_) => false,
        }
    }
}

impl From<DomainError> for LedgerError {
    fn from(err: DomainError) -> Self {
        LedgerError::Validation(err.detail().to_string())
    }
}
