//! Extraction of tenant claims from request metadata.
//!
//! A request can carry several claims at once (an org-id header, a subdomain,
//! an API key). They are never merged: [`TenantClaims::in_precedence_order`]
//! yields them header → subdomain → API key → configured default, and the
//! resolver acts on the first one that applies. A header naming org A on a
//! subdomain routed to org B therefore resolves to A, intentionally.

use std::net::IpAddr;

use stockledger_core::OrganizationId;

use crate::{RequestContext, TenantError};

/// Static resolver configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverSettings {
    /// Header carrying an explicit organization id.
    pub header_name: String,
    /// Domain under which organizations get subdomains (e.g. `stock.example.com`).
    /// When unset, any host with three or more labels contributes its first label.
    pub base_domain: Option<String>,
    pub default_organization: Option<OrganizationId>,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            header_name: "x-organization-id".to_string(),
            base_domain: None,
            default_organization: None,
        }
    }
}

/// One candidate source of the active organization.
#[derive(Clone, PartialEq, Eq)]
pub enum ClaimSource {
    Header(OrganizationId),
    Subdomain(String),
    ApiKey(String),
    Default(OrganizationId),
}

impl ClaimSource {
    /// Short label safe for logs (never includes key material).
    pub fn label(&self) -> &'static str {
        match self {
            ClaimSource::Header(_) => "header",
            ClaimSource::Subdomain(_) => "subdomain",
            ClaimSource::ApiKey(_) => "api_key",
            ClaimSource::Default(_) => "default",
        }
    }
}

impl core::fmt::Debug for ClaimSource {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ClaimSource::Header(id) => f.debug_tuple("Header").field(id).finish(),
            ClaimSource::Subdomain(s) => f.debug_tuple("Subdomain").field(s).finish(),
            ClaimSource::ApiKey(_) => f.write_str("ApiKey(<redacted>)"),
            ClaimSource::Default(id) => f.debug_tuple("Default").field(id).finish(),
        }
    }
}

/// All tenant claims present on one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenantClaims {
    pub header: Option<OrganizationId>,
    pub subdomain: Option<String>,
    pub api_key: Option<String>,
    pub default: Option<OrganizationId>,
}

impl TenantClaims {
    /// Extract claims. A malformed org-id header is an error, not an absent claim:
    /// silently ignoring it would let the request fall through to another source.
    pub fn from_request(
        ctx: &RequestContext,
        settings: &ResolverSettings,
    ) -> Result<Self, TenantError> {
        let header = match ctx.header(&settings.header_name) {
            Some(raw) => Some(raw.parse::<OrganizationId>().map_err(|e| {
                TenantError::not_resolved(format!("malformed {} header: {e}", settings.header_name))
            })?),
            None => None,
        };

        let subdomain = ctx
            .host()
            .and_then(|h| extract_subdomain(h, settings.base_domain.as_deref()));

        Ok(Self {
            header,
            subdomain,
            api_key: ctx.api_key().map(str::to_string),
            default: settings.default_organization,
        })
    }

    pub fn in_precedence_order(&self) -> Vec<ClaimSource> {
        let mut out = Vec::with_capacity(4);
        if let Some(id) = self.header {
            out.push(ClaimSource::Header(id));
        }
        if let Some(s) = &self.subdomain {
            out.push(ClaimSource::Subdomain(s.clone()));
        }
        if let Some(k) = &self.api_key {
            out.push(ClaimSource::ApiKey(k.clone()));
        }
        if let Some(id) = self.default {
            out.push(ClaimSource::Default(id));
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.header.is_none()
            && self.subdomain.is_none()
            && self.api_key.is_none()
            && self.default.is_none()
    }
}

/// Leftmost label of `host` when it names an organization subdomain.
fn extract_subdomain(host: &str, base_domain: Option<&str>) -> Option<String> {
    let host = strip_port(host.trim()).trim_end_matches('.').to_ascii_lowercase();
    if host.is_empty() || host.parse::<IpAddr>().is_ok() {
        return None;
    }

    let label = match base_domain {
        Some(base) => {
            let base = base.trim().trim_matches('.').to_ascii_lowercase();
            let prefix = host.strip_suffix(&base)?.strip_suffix('.')?;
            if prefix.is_empty() || prefix.contains('.') {
                return None;
            }
            prefix.to_string()
        }
        None => {
            let labels: Vec<&str> = host.split('.').collect();
            if labels.len() < 3 {
                return None;
            }
            labels[0].to_string()
        }
    };

    if label == "www" { None } else { Some(label) }
}

fn strip_port(host: &str) -> &str {
    // Bracketed IPv6 literal.
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match host.rsplit_once(':') {
        Some((h, port)) if port.chars().all(|c| c.is_ascii_digit()) && !h.contains(':') => h,
        _ => host,
    }
}
