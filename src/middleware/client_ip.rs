use std::convert::Infallible;

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;

/// Caller address as reported by the reverse proxy, `N/A` when unknown.
#[derive(Debug, Clone)]
pub struct ClientIp(pub String);

impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = Infallible;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let ip = client_ip_from_headers(&parts.headers);
        async move { Ok(ClientIp(ip)) }
    }
}

pub fn client_ip_from_headers(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let real = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    forwarded.or(real).unwrap_or("N/A").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_forwarded_for_wins() {
        let mut h = HeaderMap::new();
        h.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1, 10.0.0.2"));
        h.insert("x-real-ip", HeaderValue::from_static("192.168.1.1"));
        assert_eq!(client_ip_from_headers(&h), "10.0.0.1");
    }

    #[test]
    fn test_fallbacks() {
        let mut h = HeaderMap::new();
        assert_eq!(client_ip_from_headers(&h), "N/A");
        h.insert("x-real-ip", HeaderValue::from_static("192.168.1.1"));
        assert_eq!(client_ip_from_headers(&h), "192.168.1.1");
    }
}
