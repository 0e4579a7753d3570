use axum::http::HeaderMap;
use std::net::IpAddr;

/// Identity used for clients whose address cannot be resolved.
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// Resolve the client identity from proxy headers and optional transport metadata.
///
/// Proxy headers are only consulted when `trust_proxy_headers` is set. Falls back to
/// [`UNKNOWN_IDENTITY`] so that unresolvable clients still share one bucket.
pub fn client_identity(headers: &HeaderMap, remote: Option<IpAddr>, trust_proxy_headers: bool) -> String {
    if trust_proxy_headers {
        if let Some(ip) = forwarded_ip(headers) {
            return ip.to_string();
        }
    }
    match remote {
        Some(ip) => ip.to_string(),
        None => UNKNOWN_IDENTITY.to_string(),
    }
}

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    if let Some(h) = headers.get("x-forwarded-for").and_then(|hv| hv.to_str().ok()) {
        if let Some(first) = h.split(',').next() {
            if let Ok(ip) = first.trim().parse::<IpAddr>() {
                return Some(ip);
            }
        }
    }
    if let Some(h) = headers.get("x-real-ip").and_then(|hv| hv.to_str().ok()) {
        if let Ok(ip) = h.trim().parse::<IpAddr>() {
            return Some(ip);
        }
    }
    None
}

/// Maps an empty identity to [`UNKNOWN_IDENTITY`].
pub fn normalize_identity(identity: &str) -> &str {
    let trimmed = identity.trim();
    if trimmed.is_empty() {
        UNKNOWN_IDENTITY
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn forwarded_for_wins_when_trusted() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        let remote = Some(IpAddr::from([10, 0, 0, 1]));

        assert_eq!(client_identity(&headers, remote, true), "203.0.113.7");
        assert_eq!(client_identity(&headers, remote, false), "10.0.0.1");
    }

    #[test]
    fn garbled_headers_fall_through() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("not-an-ip"));
        headers.insert("x-real-ip", HeaderValue::from_static("::1"));
        assert_eq!(client_identity(&headers, None, true), "::1");

        headers.insert("x-real-ip", HeaderValue::from_static("garbage"));
        assert_eq!(client_identity(&headers, None, true), UNKNOWN_IDENTITY);
    }

    #[test]
    fn empty_identity_maps_to_sentinel() {
        assert_eq!(normalize_identity(""), UNKNOWN_IDENTITY);
        assert_eq!(normalize_identity("   "), UNKNOWN_IDENTITY);
        assert_eq!(normalize_identity("192.0.2.1"), "192.0.2.1");
    }
}
