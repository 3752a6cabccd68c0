use anyhow::{Result, anyhow};
use hyper::Request;
use hyper::header::{HeaderMap, HeaderValue};
use std::time::Duration;
use tracing::{debug, warn};

/// Extract a header value as a string
pub fn get_header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Extract cookie value by name
pub fn get_cookie(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    headers
        .get("cookie")
        .and_then(|v| v.to_str().ok())
        .and_then(|cookies| {
            cookies.split(';').find_map(|cookie| {
                let mut parts = cookie.trim().splitn(2, '=');
                let name = parts.next()?.trim();
                let value = parts.next()?.trim();
                if name == cookie_name {
                    Some(value.to_string())
                } else {
                    None
                }
            })
        })
}

/// Set a cookie with options
pub fn set_cookie(
    name: &str,
    value: &str,
    max_age: Option<Duration>,
    path: Option<&str>,
    http_only: bool,
    secure: bool,
) -> Result<HeaderValue> {
    let mut cookie = format!("{}={}", name, value);

    if let Some(age) = max_age {
        cookie.push_str(&format!("; Max-Age={}", age.as_secs()));
    }

    if let Some(p) = path {
        cookie.push_str(&format!("; Path={}", p));
    }

    if http_only {
        cookie.push_str("; HttpOnly");
    }

    if secure {
        cookie.push_str("; Secure");
    }

    cookie.push_str("; SameSite=Strict");

    debug!("Setting cookie: {}", name);

    HeaderValue::from_str(&cookie).map_err(|e| {
        warn!("Failed to create cookie header for {}: {}", name, e);
        anyhow!("Invalid cookie value: {}", e)
    })
}

/// Session-scoped cookie carrying the opaque session id.
pub fn create_session_cookie(
    name: &str,
    value: &str,
    max_age: Duration,
    secure: bool,
) -> Result<HeaderValue> {
    set_cookie(name, value, Some(max_age), Some("/"), true, secure)
}

/// Delete a cookie by setting it to expire
pub fn delete_cookie(name: &str) -> Result<HeaderValue> {
    set_cookie(
        name,
        "",
        Some(Duration::from_secs(0)),
        Some("/"),
        true,
        false,
    )
}

/// Extract the client IP address from the request
pub fn get_client_ip<T>(req: &Request<T>) -> Option<String> {
    // Check X-Forwarded-For header first (for proxied requests)
    if let Some(forwarded) = get_header_value(req.headers(), "x-forwarded-for") {
        return forwarded.split(',').next().map(|s| s.trim().to_string());
    }

    // Check X-Real-IP header
    if let Some(real_ip) = get_header_value(req.headers(), "x-real-ip") {
        return Some(real_ip);
    }

    // Fall back to the peer address the accept loop recorded.
    req.extensions()
        .get::<std::net::SocketAddr>()
        .map(|addr| addr.ip().to_string())
}

/// Extract the user agent string
pub fn get_user_agent<T>(req: &Request<T>) -> Option<String> {
    get_header_value(req.headers(), "user-agent")
}

/// Extract bearer token from Authorization header
/// Format: "Authorization: Bearer <token>"
pub fn get_bearer_token<T>(req: &Request<T>) -> Option<String> {
    get_header_value(req.headers(), "authorization").and_then(|auth| {
        auth.strip_prefix("Bearer ").map(|t| t.to_string())
    })
}

/// Extract the CSRF token from the `X-CSRF-Token` header.
pub fn get_csrf_token<T>(req: &Request<T>) -> Option<String> {
    get_header_value(req.headers(), "x-csrf-token")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(headers: &[(&str, &str)]) -> Request<()> {
        let mut builder = Request::builder().uri("/");
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn bearer_extraction_requires_the_scheme() {
        let req = request(&[("authorization", "Bearer abc.def.ghi")]);
        assert_eq!(get_bearer_token(&req).as_deref(), Some("abc.def.ghi"));

        let req = request(&[("authorization", "Basic dXNlcjpwdw==")]);
        assert_eq!(get_bearer_token(&req), None);
    }

    #[test]
    fn cookie_lookup_by_name() {
        let req = request(&[("cookie", "theme=dark; session_id=abc-123; lang=en")]);
        assert_eq!(
            get_cookie(req.headers(), "session_id").as_deref(),
            Some("abc-123")
        );
        assert_eq!(get_cookie(req.headers(), "missing"), None);
    }

    #[test]
    fn session_cookie_carries_security_attributes() {
        let cookie = create_session_cookie("session_id", "abc", Duration::from_secs(60), true)
            .unwrap();
        let s = cookie.to_str().unwrap();
        assert!(s.contains("HttpOnly"));
        assert!(s.contains("Secure"));
        assert!(s.contains("SameSite=Strict"));
        assert!(s.contains("Max-Age=60"));
    }

    #[test]
    fn forwarded_header_wins_over_peer_addr() {
        let mut req = request(&[("x-forwarded-for", "203.0.113.9, 10.0.0.1")]);
        req.extensions_mut()
            .insert("127.0.0.1:9999".parse::<std::net::SocketAddr>().unwrap());
        assert_eq!(get_client_ip(&req).as_deref(), Some("203.0.113.9"));
    }
}
