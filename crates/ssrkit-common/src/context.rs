//! Per-request values a fragment sees as globals.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Browser-shaped view of the request URL, injected as `location`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Location {
    pub hostname: String,
    pub host: String,
    pub protocol: String,
    pub origin: String,
    pub pathname: String,
    pub search: String,
    pub hash: String,
    pub port: String,
    pub href: String,
}

impl Location {
    /// Builds a location from raw request parts.
    ///
    /// `scheme` defaults to `http` when empty, `query` and `fragment` are
    /// given without their leading `?`/`#`.
    pub fn from_parts(scheme: &str, host: &str, path: &str, query: &str, fragment: &str) -> Self {
        let scheme = if scheme.is_empty() { "http" } else { scheme };
        let (hostname, port) = split_host(host);
        let pathname = if path.is_empty() { "/".to_string() } else { path.to_string() };
        let search = if query.is_empty() { String::new() } else { format!("?{}", query) };
        let hash = if fragment.is_empty() { String::new() } else { format!("#{}", fragment) };
        let origin = format!("{}://{}", scheme, host);
        let href = format!("{}{}{}{}", origin, pathname, search, hash);

        Self {
            hostname,
            host: host.to_string(),
            protocol: format!("{}:", scheme),
            origin,
            pathname,
            search,
            hash,
            port,
            href,
        }
    }

    /// Raw query string without the leading `?`.
    pub fn query(&self) -> &str {
        self.search.strip_prefix('?').unwrap_or(&self.search)
    }
}

fn split_host(host: &str) -> (String, String) {
    if let Some(rest) = host.strip_prefix('[') {
        // [v6]:port
        return match rest.split_once(']') {
            Some((addr, tail)) => (
                format!("[{}]", addr),
                tail.strip_prefix(':').unwrap_or("").to_string(),
            ),
            None => (host.to_string(), String::new()),
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => {
            (name.to_string(), port.to_string())
        }
        _ => (host.to_string(), String::new()),
    }
}

/// Everything the render protocol injects besides the payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestContext {
    pub location: Location,
    pub lang: String,
    /// Present only for authenticated requests
    pub user: Option<Value>,
    pub translations: Value,
    pub site: Value,
}

impl RequestContext {
    pub fn new(location: Location) -> Self {
        Self {
            location,
            lang: "en".to_string(),
            user: None,
            translations: Value::Object(Default::default()),
            site: Value::Object(Default::default()),
        }
    }

    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = lang.into();
        self
    }

    pub fn with_user(mut self, user: Option<Value>) -> Self {
        self.user = user;
        self
    }

    pub fn with_translations(mut self, translations: Value) -> Self {
        self.translations = translations;
        self
    }

    pub fn with_site(mut self, site: Value) -> Self {
        self.site = site;
        self
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new(Location::from_parts("http", "localhost", "/", "", ""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_location_defaults_scheme_to_http() {
        let loc = Location::from_parts("", "example.com", "/products", "page=2", "");
        assert_eq!(loc.protocol, "http:");
        assert_eq!(loc.origin, "http://example.com");
        assert_eq!(loc.search, "?page=2");
        assert_eq!(loc.query(), "page=2");
        assert_eq!(loc.href, "http://example.com/products?page=2");
        assert_eq!(loc.port, "");
    }

    #[test]
    fn test_location_splits_port() {
        let loc = Location::from_parts("https", "shop.test:8443", "", "", "top");
        assert_eq!(loc.hostname, "shop.test");
        assert_eq!(loc.port, "8443");
        assert_eq!(loc.host, "shop.test:8443");
        assert_eq!(loc.pathname, "/");
        assert_eq!(loc.hash, "#top");
        assert_eq!(loc.href, "https://shop.test:8443/#top");
    }

    #[test]
    fn test_location_ipv6_host() {
        let loc = Location::from_parts("http", "[::1]:3000", "/", "", "");
        assert_eq!(loc.hostname, "[::1]");
        assert_eq!(loc.port, "3000");
    }

    #[test]
    fn test_request_context_authentication() {
        let ctx = RequestContext::default();
        assert!(!ctx.is_authenticated());

        let ctx = ctx.with_user(Some(json!({"id": 7, "name": "Ada"}))).with_lang("de");
        assert!(ctx.is_authenticated());
        assert_eq!(ctx.lang, "de");
    }
}
