//! Request field extraction.
//!
//! Maps an inbound request onto the provenance fields recorded with every
//! write made while handling it. Everything here is pure: malformed input
//! degrades to absent fields and never to an error.

use crate::config::ExtractConfig;
use crate::types::{Actor, Identity};

/// Header consulted for a correlation id when the configured one is missing.
/// Populated by request-id middleware such as tower-http's `SetRequestIdLayer`.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Read-only view of an inbound request.
pub trait InboundRequest {
    /// Looks up a header value by (case-insensitive) name.
    fn header(&self, name: &str) -> Option<&str>;

    /// Transport-level peer address, as reported by the server.
    fn peer_addr(&self) -> Option<String>;

    /// Identity attached by the authentication layer.
    fn identity(&self) -> Option<&Identity>;

    /// Logical request path, e.g. `/api/orders/42`.
    fn path(&self) -> &str;
}

/// Provenance fields derived from one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestInfo {
    pub actor: Option<Actor>,
    pub remote_addr: Option<String>,
    pub path: Option<String>,
    pub domain_object_id: Option<String>,
    pub correlation_id: Option<String>,
}

impl RequestInfo {
    /// Extracts every provenance field from `req`.
    #[must_use]
    pub fn extract<R: InboundRequest + ?Sized>(req: &R, config: &ExtractConfig) -> Self {
        let (path, domain_object_id) = path_info(req.path(), config);
        Self {
            actor: actor(req),
            remote_addr: remote_addr(req, config),
            path,
            domain_object_id,
            correlation_id: correlation_id(req, config),
        }
    }
}

/// Client address: the first forwarded entry with its port stripped, or the
/// raw peer address when no (non-empty) forwarding header is present.
#[must_use]
pub fn remote_addr<R: InboundRequest + ?Sized>(req: &R, config: &ExtractConfig) -> Option<String> {
    match req.header(&config.forwarded_for_header) {
        Some(forwarded) if !forwarded.is_empty() => forwarded_client_addr(forwarded),
        _ => req.peer_addr(),
    }
}

/// Parses a forwarding header value down to the originating client address.
///
/// `203.0.113.7:443` becomes `203.0.113.7`, `[2001:db8::1]:443` becomes
/// `2001:db8::1`; anything else is returned as-is.
#[must_use]
pub fn forwarded_client_addr(forwarded: &str) -> Option<String> {
    let first = forwarded.split(',').next().unwrap_or_default().trim();
    if first.is_empty() {
        return None;
    }

    // Bracketed form first: `[::ffff:192.0.2.1]:80` also contains a dot.
    if let Some(rest) = first.strip_prefix('[') {
        let inner = rest.split(']').next().unwrap_or_default();
        return (!inner.is_empty()).then(|| inner.to_string());
    }

    if first.contains('.') && first.contains(':') {
        return first.split(':').next().map(str::to_string);
    }

    Some(first.to_string())
}

/// The authenticated actor of the request, if any.
#[must_use]
pub fn actor<R: InboundRequest + ?Sized>(req: &R) -> Option<Actor> {
    req.identity()
        .and_then(Identity::authenticated_actor)
        .cloned()
}

/// Splits a logical path into `(path, domain_object_id)`.
///
/// With the default config `/api/42/7/sub` yields `("42", "7")`. A missing
/// or empty segment is absent; the object id must be numeric.
#[must_use]
pub fn path_info(path: &str, config: &ExtractConfig) -> (Option<String>, Option<String>) {
    let segments: Vec<&str> = path.split('/').collect();

    let resource = segments
        .get(config.path_segment)
        .filter(|s| !s.is_empty())
        .map(|s| (*s).to_string());

    let object_id = segments
        .get(config.object_id_segment)
        .filter(|s| !s.is_empty() && s.chars().all(char::is_numeric))
        .map(|s| (*s).to_string());

    (resource, object_id)
}

/// Correlation id from the configured header, falling back to
/// [`REQUEST_ID_HEADER`].
#[must_use]
pub fn correlation_id<R: InboundRequest + ?Sized>(
    req: &R,
    config: &ExtractConfig,
) -> Option<String> {
    let header = config.correlation_id_header.as_deref()?;
    req.header(header)
        .or_else(|| req.header(REQUEST_ID_HEADER))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Owned request description for callers that are not on an `http` stack.
#[derive(Debug, Clone, Default)]
pub struct PlainRequest {
    pub headers: Vec<(String, String)>,
    pub peer_addr: Option<String>,
    pub identity: Option<Identity>,
    pub path: String,
}

impl PlainRequest {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_peer_addr(mut self, addr: impl Into<String>) -> Self {
        self.peer_addr = Some(addr.into());
        self
    }

    #[must_use]
    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }
}

impl InboundRequest for PlainRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    fn peer_addr(&self) -> Option<String> {
        self.peer_addr.clone()
    }

    fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    fn path(&self) -> &str {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn forwarded(value: &str) -> Option<String> {
        let req = PlainRequest::new("/").with_header("X-Forwarded-For", value);
        remote_addr(&req, &ExtractConfig::default())
    }

    #[test]
    fn ipv4_with_port_is_stripped() {
        assert_eq!(forwarded("203.0.113.7:443").as_deref(), Some("203.0.113.7"));
    }

    #[test]
    fn bracketed_ipv6_is_unwrapped() {
        assert_eq!(forwarded("[2001:db8::1]:443").as_deref(), Some("2001:db8::1"));
        assert_eq!(
            forwarded("[::ffff:192.0.2.1]:80").as_deref(),
            Some("::ffff:192.0.2.1")
        );
    }

    #[test]
    fn first_forwarded_entry_wins() {
        assert_eq!(
            forwarded("198.51.100.2, 10.0.0.1, 10.0.0.2").as_deref(),
            Some("198.51.100.2")
        );
    }

    #[test]
    fn bare_addresses_pass_through() {
        assert_eq!(forwarded("198.51.100.2").as_deref(), Some("198.51.100.2"));
        assert_eq!(forwarded("2001:db8::1").as_deref(), Some("2001:db8::1"));
    }

    #[test]
    fn peer_address_used_without_forwarding_header() {
        let config = ExtractConfig::default();
        let req = PlainRequest::new("/").with_peer_addr("10.0.0.5");
        assert_eq!(remote_addr(&req, &config).as_deref(), Some("10.0.0.5"));

        let empty = PlainRequest::new("/")
            .with_header("x-forwarded-for", "")
            .with_peer_addr("10.0.0.5");
        assert_eq!(remote_addr(&empty, &config).as_deref(), Some("10.0.0.5"));
    }

    #[test]
    fn path_and_object_id() {
        let config = ExtractConfig::default();
        assert_eq!(
            path_info("/api/42/7/sub", &config),
            (Some("42".to_string()), Some("7".to_string()))
        );
        assert_eq!(
            path_info("/api/orders/abc", &config),
            (Some("orders".to_string()), None)
        );
        assert_eq!(path_info("/api/orders", &config), (Some("orders".to_string()), None));
        assert_eq!(path_info("/api/", &config), (None, None));
        assert_eq!(path_info("/api", &config), (None, None));
        assert_eq!(path_info("", &config), (None, None));
    }

    #[test]
    fn custom_segments() {
        let config = ExtractConfig {
            path_segment: 3,
            object_id_segment: 4,
            ..ExtractConfig::default()
        };
        assert_eq!(
            path_info("/api/v2/orders/15", &config),
            (Some("orders".to_string()), Some("15".to_string()))
        );
    }

    #[test]
    fn actor_requires_authenticated_user() {
        let alice = Actor::new("1");
        let authed = PlainRequest::new("/").with_identity(Identity::authenticated(alice.clone()));
        assert_eq!(actor(&authed), Some(alice.clone()));

        let pending = PlainRequest::new("/").with_identity(Identity::User {
            actor: alice,
            authenticated: false,
        });
        assert!(actor(&pending).is_none());
        assert!(actor(&PlainRequest::new("/")).is_none());
    }

    #[test]
    fn correlation_id_falls_back_to_request_id() {
        let config = ExtractConfig::default();
        let explicit = PlainRequest::new("/")
            .with_header("X-Correlation-Id", "corr-1")
            .with_header("x-request-id", "req-1");
        assert_eq!(correlation_id(&explicit, &config).as_deref(), Some("corr-1"));

        let fallback = PlainRequest::new("/").with_header("x-request-id", "req-1");
        assert_eq!(correlation_id(&fallback, &config).as_deref(), Some("req-1"));

        let disabled = ExtractConfig {
            correlation_id_header: None,
            ..ExtractConfig::default()
        };
        assert!(correlation_id(&explicit, &disabled).is_none());
    }

    #[test]
    fn extract_collects_all_fields() {
        let req = PlainRequest::new("/api/invoices/12")
            .with_header("x-forwarded-for", "203.0.113.7:443")
            .with_peer_addr("10.0.0.5")
            .with_identity(Identity::authenticated(Actor::new("3")));
        let info = RequestInfo::extract(&req, &ExtractConfig::default());

        assert_eq!(info.actor, Some(Actor::new("3")));
        assert_eq!(info.remote_addr.as_deref(), Some("203.0.113.7"));
        assert_eq!(info.path.as_deref(), Some("invoices"));
        assert_eq!(info.domain_object_id.as_deref(), Some("12"));
        assert!(info.correlation_id.is_none());
    }

    proptest! {
        #[test]
        fn path_info_never_panics(path in ".*") {
            let _ = path_info(&path, &ExtractConfig::default());
        }

        #[test]
        fn ipv4_port_always_stripped(
            a in 0u8..=255, b in 0u8..=255, c in 0u8..=255, d in 0u8..=255, port in 1u16..=u16::MAX,
        ) {
            let addr = format!("{a}.{b}.{c}.{d}");
            let with_port = format!("{addr}:{port}");
            prop_assert_eq!(forwarded_client_addr(&with_port), Some(addr));
        }

        #[test]
        fn object_id_is_numeric_when_present(path in "(/[a-z0-9]{0,4}){0,6}") {
            let (_, object_id) = path_info(&path, &ExtractConfig::default());
            if let Some(id) = object_id {
                prop_assert!(!id.is_empty());
                prop_assert!(id.chars().all(|c| c.is_ascii_digit()));
            }
        }
    }
}
