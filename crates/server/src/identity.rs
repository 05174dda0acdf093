//! Client identity derivation.
//!
//! Rate limits key on a single canonical identity per client: the
//! left-most `X-Forwarded-For` entry when one is present and well-formed,
//! otherwise the direct peer address. Malformed headers are ignored, not
//! rejected; limiting degrades to the peer address.

use std::net::{IpAddr, SocketAddr};

use axum::http::HeaderMap;

pub fn client_identity(headers: &HeaderMap, peer: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(normalize_address)
        .unwrap_or_else(|| peer.ip().to_string())
}

/// Accepts `1.2.3.4`, `1.2.3.4:8080`, `::1`, and `[::1]:8080`; anything
/// else is malformed.
fn normalize_address(entry: &str) -> Option<String> {
    let entry = entry.trim();
    if entry.is_empty() {
        return None;
    }
    if let Ok(ip) = entry.parse::<IpAddr>() {
        return Some(ip.to_string());
    }
    if let Ok(sock) = entry.parse::<SocketAddr>() {
        return Some(sock.ip().to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer() -> SocketAddr {
        "10.0.0.1:52100".parse().unwrap()
    }

    fn headers(forwarded: &str) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert("x-forwarded-for", HeaderValue::from_str(forwarded).unwrap());
        map
    }

    #[test]
    fn uses_peer_without_header() {
        assert_eq!(client_identity(&HeaderMap::new(), peer()), "10.0.0.1");
    }

    #[test]
    fn takes_leftmost_forwarded_entry() {
        let map = headers("203.0.113.7, 70.41.3.18, 150.172.238.178");
        assert_eq!(client_identity(&map, peer()), "203.0.113.7");
    }

    #[test]
    fn strips_ports() {
        assert_eq!(client_identity(&headers("203.0.113.7:443"), peer()), "203.0.113.7");
        assert_eq!(client_identity(&headers("[2001:db8::1]:443"), peer()), "2001:db8::1");
    }

    #[test]
    fn accepts_ipv6() {
        assert_eq!(client_identity(&headers("2001:db8::1"), peer()), "2001:db8::1");
    }

    #[test]
    fn malformed_header_falls_back_to_peer() {
        assert_eq!(client_identity(&headers("not-an-ip"), peer()), "10.0.0.1");
        assert_eq!(client_identity(&headers(",,,"), peer()), "10.0.0.1");
        assert_eq!(client_identity(&headers("  "), peer()), "10.0.0.1");
    }

    #[test]
    fn whitespace_around_entries_is_trimmed() {
        let map = headers("  203.0.113.7 , 70.41.3.18");
        assert_eq!(client_identity(&map, peer()), "203.0.113.7");
    }
}
