//! Identity Resolver
//!
//! Best-effort caller identity for rate-limit bucketing. Nothing here checks a
//! signature, so the result must never be used to grant access; the verified
//! path lives in [`crate::validator`].

use base64::Engine;
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};

/// Network origin of a request, in resolution priority order
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestOrigin<'a> {
    /// Raw `X-Forwarded-For` header
    pub forwarded_for: Option<&'a str>,
    /// Raw `X-Real-IP` header
    pub real_ip: Option<&'a str>,
    /// Peer address of the connection
    pub socket: Option<SocketAddr>,
}

impl RequestOrigin<'_> {
    /// Client address: first forwarded-for hop, then real-ip, then the socket
    pub fn client_address(&self) -> Option<IpAddr> {
        self.forwarded_for
            .and_then(|h| h.split(',').next())
            .and_then(parse_ip)
            .or_else(|| self.real_ip.and_then(parse_ip))
            .or_else(|| self.socket.map(|s| s.ip()))
    }
}

fn parse_ip(raw: &str) -> Option<IpAddr> {
    raw.trim().parse().ok()
}

#[derive(Deserialize)]
struct UnverifiedClaims {
    sub: Option<String>,
    user_id: Option<String>,
}

/// Read the subject out of a JWT payload without verifying it
fn unverified_subject(token: &str) -> Option<String> {
    let payload = token.split('.').nth(1)?;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: UnverifiedClaims = serde_json::from_slice(&bytes).ok()?;
    claims
        .sub
        .or(claims.user_id)
        .filter(|s| !s.is_empty())
}

/// Bucket key for the caller. Never fails: an absent or unparsable credential
/// falls back to the client address, and a missing address to `ip:unknown`.
pub fn resolve_identity(bearer: Option<&str>, origin: &RequestOrigin<'_>) -> String {
    if let Some(sub) = bearer.and_then(unverified_subject) {
        return format!("user:{}", sub);
    }
    match origin.client_address() {
        Some(ip) => format!("ip:{}", ip),
        None => "ip:unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_with(payload: &str) -> String {
        let enc = base64::engine::general_purpose::URL_SAFE_NO_PAD;
        format!("{}.{}.sig", enc.encode(r#"{"alg":"HS256"}"#), enc.encode(payload))
    }

    #[test]
    fn test_bearer_subject_wins() {
        let origin = RequestOrigin {
            real_ip: Some("10.0.0.9"),
            ..Default::default()
        };
        let token = token_with(r#"{"sub":"alice","exp":1}"#);
        assert_eq!(resolve_identity(Some(&token), &origin), "user:alice");

        let legacy = token_with(r#"{"user_id":"bob"}"#);
        assert_eq!(resolve_identity(Some(&legacy), &origin), "user:bob");
    }

    #[test]
    fn test_garbage_credential_degrades_to_address() {
        let origin = RequestOrigin {
            forwarded_for: Some("203.0.113.7, 10.0.0.1"),
            real_ip: Some("10.0.0.9"),
            socket: Some("127.0.0.1:4000".parse().unwrap()),
        };
        assert_eq!(resolve_identity(Some("not-a-jwt"), &origin), "ip:203.0.113.7");
        assert_eq!(resolve_identity(Some("a.%%%.c"), &origin), "ip:203.0.113.7");
        assert_eq!(resolve_identity(None, &origin), "ip:203.0.113.7");
    }

    #[test]
    fn test_origin_priority() {
        let socket: SocketAddr = "192.0.2.1:5555".parse().unwrap();
        let origin = RequestOrigin {
            forwarded_for: Some("garbage"),
            real_ip: Some("198.51.100.4"),
            socket: Some(socket),
        };
        assert_eq!(origin.client_address(), Some("198.51.100.4".parse().unwrap()));

        let origin = RequestOrigin {
            socket: Some(socket),
            ..Default::default()
        };
        assert_eq!(resolve_identity(None, &origin), "ip:192.0.2.1");
        assert_eq!(resolve_identity(None, &RequestOrigin::default()), "ip:unknown");
    }
}
