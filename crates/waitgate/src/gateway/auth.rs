// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bearer-token extraction for admin endpoints and client fingerprinting for
//! everything else, grounded on the teacher's `transport::auth` constant-time
//! comparison pattern (here via the `subtle`-backed helper already used by
//! the credential service).

use axum::http::HeaderMap;

use crate::credential::{compute_fingerprint, fingerprints_match};
use crate::error::WaitError;

/// Validate the `Authorization: Bearer <key>` header against the configured
/// admin key. `None` configured means admin endpoints are wide open — only
/// acceptable for local/dev use, matching the teacher's same escape hatch.
pub fn validate_admin_key(headers: &HeaderMap, expected: Option<&str>) -> Result<(), WaitError> {
    let Some(expected) = expected else { return Ok(()) };
    let header = headers.get("authorization").and_then(|v| v.to_str().ok()).ok_or(WaitError::Unauthorized)?;
    let token = header.strip_prefix("Bearer ").ok_or(WaitError::Unauthorized)?;
    if fingerprints_match(token, expected) {
        Ok(())
    } else {
        Err(WaitError::Forbidden)
    }
}

/// Extract the bearer credential from `Authorization: Bearer <token>`.
pub fn extract_bearer(headers: &HeaderMap) -> Result<&str, WaitError> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(WaitError::Unauthorized)
}

/// Client address used for fingerprinting: `X-Forwarded-For`'s first hop if
/// present (trusting it is a deployment concern, not this gateway's), else
/// the direct peer address.
pub fn client_ip(headers: &HeaderMap, peer: std::net::SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_owned())
        .unwrap_or_else(|| peer.ip().to_string())
}

pub fn fingerprint_of(salt: &str, headers: &HeaderMap, peer: std::net::SocketAddr) -> String {
    let ip = client_ip(headers, peer);
    let user_agent = headers.get("user-agent").and_then(|v| v.to_str().ok()).unwrap_or("");
    compute_fingerprint(salt, &ip, user_agent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn missing_admin_key_means_open() {
        let headers = HeaderMap::new();
        assert!(validate_admin_key(&headers, None).is_ok());
    }

    #[test]
    fn wrong_bearer_is_forbidden_not_unauthorized() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer wrong"));
        assert!(matches!(validate_admin_key(&headers, Some("right")), Err(WaitError::Forbidden)));
    }

    #[test]
    fn forwarded_for_takes_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("1.2.3.4, 5.6.7.8"));
        let peer: std::net::SocketAddr = "127.0.0.1:9".parse().unwrap();
        assert_eq!(client_ip(&headers, peer), "1.2.3.4");
    }
}
