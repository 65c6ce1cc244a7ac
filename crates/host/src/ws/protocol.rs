//! Upgrade-request parsing for the stream gateway
//!
//! Extracts the endpoint (shell vs monitoring) and the bearer token from the
//! WebSocket upgrade request. The token can travel in the `Authorization`
//! header or, for browser WebSocket clients that cannot set headers, in a
//! `token` query parameter.

/// Which endpoint the client upgraded on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// `/ssh`: shell traffic and SFTP, multiplexed on one stream.
    Shell,
    /// `/monitor`: monitoring subscriptions, fan-out only.
    Monitor,
}

/// Classify the upgrade path. Unknown paths are rejected.
pub fn classify_path(uri: &str) -> Option<Endpoint> {
    let path = uri.split('?').next().unwrap_or(uri);
    match path.trim_end_matches('/') {
        "/ssh" => Some(Endpoint::Shell),
        "/monitor" => Some(Endpoint::Monitor),
        _ => None,
    }
}

/// Parse the bearer from a `token` query parameter.
pub fn parse_token_from_uri(uri: &str) -> Option<String> {
    let query = &uri[uri.find('?')? + 1..];
    for param in query.split('&') {
        if let Some(eq_pos) = param.find('=') {
            let key = &param[..eq_pos];
            let value = &param[eq_pos + 1..];
            if key == "token" && !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Parse the bearer from an `Authorization: Bearer <token>` header value.
pub fn parse_bearer_header(value: &str) -> Option<String> {
    let rest = value.strip_prefix("Bearer ").or_else(|| value.strip_prefix("bearer "))?;
    let rest = rest.trim();
    if rest.is_empty() {
        None
    } else {
        Some(rest.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_path() {
        assert_eq!(classify_path("/ssh"), Some(Endpoint::Shell));
        assert_eq!(classify_path("/ssh?token=abc"), Some(Endpoint::Shell));
        assert_eq!(classify_path("/monitor?token=x"), Some(Endpoint::Monitor));
        assert_eq!(classify_path("/"), None);
        assert_eq!(classify_path("/other"), None);
    }

    #[test]
    fn test_parse_token_from_uri() {
        assert_eq!(
            parse_token_from_uri("/ssh?token=abc123"),
            Some("abc123".to_string())
        );
        assert_eq!(
            parse_token_from_uri("/ssh?foo=bar&token=xyz"),
            Some("xyz".to_string())
        );
        assert_eq!(parse_token_from_uri("/ssh?token="), None);
        assert_eq!(parse_token_from_uri("/ssh"), None);
    }

    #[test]
    fn test_parse_bearer_header() {
        assert_eq!(
            parse_bearer_header("Bearer abc.def"),
            Some("abc.def".to_string())
        );
        assert_eq!(parse_bearer_header("Basic xyz"), None);
        assert_eq!(parse_bearer_header("Bearer "), None);
    }
}
