use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, OrganizationId};

/// An organization: the isolation boundary for all ledger data.
///
/// Organizations are never hard-deleted. Deactivation keeps the row (and its
/// ledger history) and only stops new requests from resolving to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrganizationId,
    pub display_name: String,
    /// Subdomain label routed to this organization (lowercase).
    pub routing_key: Option<String>,
    pub api_key: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl Organization {
    pub fn deactivate(&mut self, at: DateTime<Utc>) {
        if self.active {
            self.active = false;
            self.deactivated_at = Some(at);
        }
    }
}

/// Administrative request to create an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrganization {
    /// Caller-chosen id; a fresh one is generated when absent.
    pub id: Option<OrganizationId>,
    pub display_name: String,
    pub routing_key: Option<String>,
    pub api_key: Option<String>,
}

impl NewOrganization {
    pub fn named(display_name: impl Into<String>) -> Self {
        Self {
            id: None,
            display_name: display_name.into(),
            routing_key: None,
            api_key: None,
        }
    }

    pub fn with_id(mut self, id: OrganizationId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_routing_key(mut self, key: impl Into<String>) -> Self {
        self.routing_key = Some(key.into());
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Validate and normalize into an active organization.
    pub fn into_organization(self, now: DateTime<Utc>) -> DomainResult<Organization> {
        let display_name = self.display_name.trim().to_string();
        if display_name.is_empty() {
            return Err(DomainError::validation("display name cannot be empty"));
        }

        let routing_key = self.routing_key.as_deref().map(normalize_routing_key).transpose()?;

        let api_key = match self.api_key {
            Some(k) if k.trim().len() < 16 => {
                return Err(DomainError::validation("api key must be at least 16 characters"));
            }
            Some(k) => Some(k.trim().to_string()),
            None => None,
        };

        Ok(Organization {
            id: self.id.unwrap_or_default(),
            display_name,
            routing_key,
            api_key,
            active: true,
            created_at: now,
            deactivated_at: None,
        })
    }
}

/// Lowercase a routing key and check it is a single DNS label.
pub fn normalize_routing_key(raw: &str) -> DomainResult<String> {
    let key = raw.trim().to_ascii_lowercase();
    if key.is_empty() || key.len() > 63 {
        return Err(DomainError::validation("routing key must be 1-63 characters"));
    }
    if key.starts_with('-') || key.ends_with('-') {
        return Err(DomainError::validation("routing key cannot start or end with '-'"));
    }
    if !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(DomainError::validation(
            "routing key may only contain letters, digits and '-'",
        ));
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_key_is_lowercased() {
        let org = NewOrganization::named("Acme Kitchen")
            .with_routing_key("Acme-Kitchen")
            .into_organization(Utc::now())
            .unwrap();
        assert_eq!(org.routing_key.as_deref(), Some("acme-kitchen"));
        assert!(org.active);
    }

    #[test]
    fn rejects_multi_label_routing_key() {
        assert!(normalize_routing_key("acme.kitchen").is_err());
        assert!(normalize_routing_key("-acme").is_err());
        assert!(normalize_routing_key("").is_err());
    }

    #[test]
    fn rejects_short_api_key() {
        let err = NewOrganization::named("Acme")
            .with_api_key("short")
            .into_organization(Utc::now())
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn deactivate_keeps_first_timestamp() {
        let mut org = NewOrganization::named("Acme").into_organization(Utc::now()).unwrap();
        let first = Utc::now();
        org.deactivate(first);
        org.deactivate(first + chrono::Duration::hours(1));
        assert!(!org.active);
        assert_eq!(org.deactivated_at, Some(first));
    }
}
