//! Errors raised by pure ledger rules, before any storage is touched.

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// Deterministic rule failures. Storage, transport and tenancy failures are
/// modelled in their own crates.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed input: non-finite quantity, sign that contradicts the
    /// movement type, blank name, out-of-range threshold.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// Uniqueness clash inside one organization (e.g. a reused SKU).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// The human-readable detail without the category prefix.
    pub fn detail(&self) -> &str {
        match self {
            Self::Validation(m) | Self::InvalidId(m) | Self::Conflict(m) => m,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_category_and_detail() {
        let err = DomainError::validation("quantity must be finite");
        assert_eq!(err.to_string(), "validation failed: quantity must be finite");
        assert_eq!(err.detail(), "quantity must be finite");
    }
}
