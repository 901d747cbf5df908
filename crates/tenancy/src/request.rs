use std::collections::BTreeMap;

/// Request metadata handed to the tenant resolver by the transport layer.
///
/// Header names are stored lowercase so lookups are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    headers: BTreeMap<String, String>,
    host: Option<String>,
    api_key: Option<String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Credential material extracted by the transport (e.g. from `Authorization`).
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Explicit credential first, then the conventional `x-api-key` header.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .or_else(|| self.header("x-api-key"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let ctx = RequestContext::new().with_header("X-Organization-Id", "abc");
        assert_eq!(ctx.header("x-organization-id"), Some("abc"));
        assert_eq!(ctx.header("X-ORGANIZATION-ID"), Some("abc"));
    }

    #[test]
    fn blank_header_is_absent() {
        let ctx = RequestContext::new().with_header("x-organization-id", "   ");
        assert_eq!(ctx.header("x-organization-id"), None);
    }

    #[test]
    fn explicit_api_key_wins_over_header() {
        let ctx = RequestContext::new()
            .with_header("x-api-key", "from-header")
            .with_api_key("from-credentials");
        assert_eq!(ctx.api_key(), Some("from-credentials"));
    }
}
