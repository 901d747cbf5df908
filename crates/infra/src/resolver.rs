//! Tenant resolution: request metadata in, one active organization id out.
//!
//! Claims are tried in precedence order (header, subdomain, API key,
//! configured default) and the first applicable one decides. Lower-precedence
//! claims on the same request are ignored, never merged or cross-checked.
//!
//! A claim that is present but names nothing fails the request, except for a
//! subdomain: hosts such as `www.example.com` carry a first label that was
//! never meant as a tenant, so an unmatched subdomain falls through to the
//! next source.

use std::time::Duration;

use tracing::{debug, warn};

use stockledger_core::OrganizationId;
use stockledger_tenancy::{
    ClaimSource, Organization, RequestContext, ResolverSettings, TenantClaims, TenantError,
};

use crate::config::LedgerConfig;
use crate::organizations::OrganizationStore;

pub const DEFAULT_RESOLUTION_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct TenantResolver<O> {
    directory: O,
    settings: ResolverSettings,
    timeout: Duration,
}

impl<O: OrganizationStore> TenantResolver<O> {
    pub fn new(directory: O, settings: ResolverSettings) -> Self {
        Self {
            directory,
            settings,
            timeout: DEFAULT_RESOLUTION_TIMEOUT,
        }
    }

    /// Resolver using the configured tenant sources, bounded by the request timeout.
    pub fn from_config(directory: O, config: &LedgerConfig) -> Self {
        Self::new(directory, config.resolver.clone()).with_timeout(config.request_timeout)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    /// Resolve the active organization for one request.
    ///
    /// The result is meant to be computed once per request and passed along
    /// explicitly; nothing downstream re-reads request metadata.
    pub async fn resolve(&self, ctx: &RequestContext) -> Result<OrganizationId, TenantError> {
        match tokio::time::timeout(self.timeout, self.resolve_claims(ctx)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "tenant resolution timed out");
                Err(TenantError::Timeout)
            }
        }
    }

    async fn resolve_claims(&self, ctx: &RequestContext) -> Result<OrganizationId, TenantError> {
        let claims = TenantClaims::from_request(ctx, &self.settings)?;
        let sources = claims.in_precedence_order();

        for (idx, source) in sources.iter().enumerate() {
            let Some(org) = self.lookup(source).await? else {
                debug!(source = source.label(), "subdomain matched no organization; trying next source");
                continue;
            };

            if !org.active {
                warn!(
                    source = source.label(),
                    organization_id = %org.id,
                    "request resolved to an inactive organization"
                );
                return Err(TenantError::OrganizationInactive(org.id));
            }

            let ignored: Vec<&str> = sources[idx + 1..].iter().map(ClaimSource::label).collect();
            debug!(
                source = source.label(),
                organization_id = %org.id,
                ignored_sources = ?ignored,
                "tenant resolved"
            );
            return Ok(org.id);
        }

        Err(TenantError::not_resolved(if claims.is_empty() {
            "request carries no tenant claim and no default organization is configured"
        } else {
            "no tenant claim matched an organization"
        }))
    }

    /// `Ok(None)` means "try the next source" and is only produced for subdomains.
    async fn lookup(&self, source: &ClaimSource) -> Result<Option<Organization>, TenantError> {
        let lookup_err = |e: crate::error::StoreError| TenantError::Lookup(e.to_string());

        match source {
            ClaimSource::Header(id) => self
                .directory
                .get(*id)
                .await
                .map_err(lookup_err)?
                .map(Some)
                .ok_or_else(|| TenantError::not_resolved("organization header names an unknown organization")),
            ClaimSource::Subdomain(label) => {
                self.directory.find_by_routing_key(label).await.map_err(lookup_err)
            }
            ClaimSource::ApiKey(key) => self
                .directory
                .find_by_api_key(key)
                .await
                .map_err(lookup_err)?
                .map(Some)
                .ok_or_else(|| TenantError::not_resolved("api key is not recognized")),
            ClaimSource::Default(id) => self
                .directory
                .get(*id)
                .await
                .map_err(lookup_err)?
                .map(Some)
                .ok_or_else(|| TenantError::not_resolved("configured default organization does not exist")),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::organizations::InMemoryOrganizationStore;
    use stockledger_tenancy::NewOrganization;

    async fn directory() -> (Arc<InMemoryOrganizationStore>, Organization, Organization) {
        let store = Arc::new(InMemoryOrganizationStore::new());
        let a = store
            .create(
                NewOrganization::named("Org A")
                    .with_routing_key("org-a")
                    .with_api_key("key-org-a-0000000000"),
            )
            .await
            .unwrap();
        let b = store
            .create(NewOrganization::named("Org B").with_routing_key("org-b"))
            .await
            .unwrap();
        (store, a, b)
    }

    fn settings() -> ResolverSettings {
        ResolverSettings {
            base_domain: Some("stock.example.com".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn subdomain_resolves_by_routing_key() {
        let (store, _a, b) = directory().await;
        let resolver = TenantResolver::new(store, settings());
        let ctx = RequestContext::new().with_host("org-b.stock.example.com:443");
        assert_eq!(resolver.resolve(&ctx).await.unwrap(), b.id);
    }

    #[tokio::test]
    async fn unknown_subdomain_falls_through_to_api_key() {
        let (store, a, _b) = directory().await;
        let resolver = TenantResolver::new(store, settings());
        let ctx = RequestContext::new()
            .with_host("closed-bistro.stock.example.com")
            .with_api_key("key-org-a-0000000000");
        assert_eq!(resolver.resolve(&ctx).await.unwrap(), a.id);
    }

    #[tokio::test]
    async fn unknown_header_does_not_fall_through() {
        let (store, a, _b) = directory().await;
        let resolver = TenantResolver::new(
            store,
            ResolverSettings {
                default_organization: Some(a.id),
                ..settings()
            },
        );
        let ctx = RequestContext::new().with_header("X-Organization-Id", OrganizationId::new().to_string());
        assert!(matches!(
            resolver.resolve(&ctx).await,
            Err(TenantError::TenantNotResolved(_))
        ));
    }

    #[tokio::test]
    async fn unknown_api_key_is_rejected() {
        let (store, _a, _b) = directory().await;
        let resolver = TenantResolver::new(store, settings());
        let ctx = RequestContext::new().with_api_key("not-a-real-key-000000");
        assert!(matches!(
            resolver.resolve(&ctx).await,
            Err(TenantError::TenantNotResolved(_))
        ));
    }

    #[tokio::test]
    async fn default_applies_only_when_nothing_else_is_present() {
        let (store, a, _b) = directory().await;
        let resolver = TenantResolver::new(
            store.clone(),
            ResolverSettings {
                default_organization: Some(a.id),
                ..settings()
            },
        );
        assert_eq!(resolver.resolve(&RequestContext::new()).await.unwrap(), a.id);

        let no_default = TenantResolver::new(store, settings());
        assert!(matches!(
            no_default.resolve(&RequestContext::new()).await,
            Err(TenantError::TenantNotResolved(_))
        ));
    }

    #[tokio::test]
    async fn inactive_organization_fails_instead_of_defaulting() {
        let (store, a, b) = directory().await;
        store.deactivate(b.id).await.unwrap();
        let resolver = TenantResolver::new(
            store,
            ResolverSettings {
                default_organization: Some(a.id),
                ..settings()
            },
        );
        let ctx = RequestContext::new().with_host("org-b.stock.example.com");
        assert_eq!(
            resolver.resolve(&ctx).await,
            Err(TenantError::OrganizationInactive(b.id))
        );
    }

    #[tokio::test]
    async fn configured_sources_drive_resolution() {
        let (store, a, b) = directory().await;
        let default_org = a.id.to_string();
        let config = LedgerConfig::from_lookup(|var| match var {
            "DATABASE_URL" => Some("postgres://localhost/stock".to_string()),
            "TENANT_HEADER" => Some("X-Tenant".to_string()),
            "TENANT_BASE_DOMAIN" => Some("stock.example.com".to_string()),
            "DEFAULT_ORGANIZATION_ID" => Some(default_org.clone()),
            "REQUEST_TIMEOUT_MS" => Some("250".to_string()),
            _ => None,
        })
        .unwrap();
        let resolver = TenantResolver::from_config(store, &config);

        assert_eq!(resolver.timeout, Duration::from_millis(250));
        assert_eq!(resolver.resolve(&RequestContext::new()).await.unwrap(), a.id);
        let ctx = RequestContext::new().with_header("x-tenant", b.id.to_string());
        assert_eq!(resolver.resolve(&ctx).await.unwrap(), b.id);
        let ctx = RequestContext::new().with_host("org-b.stock.example.com");
        assert_eq!(resolver.resolve(&ctx).await.unwrap(), b.id);
    }

    #[tokio::test]
    async fn malformed_header_is_rejected() {
        let (store, _a, _b) = directory().await;
        let resolver = TenantResolver::new(store, settings());
        let ctx = RequestContext::new().with_header("x-organization-id", "not-a-uuid");
        assert!(resolver.resolve(&ctx).await.is_err());
    }
}
