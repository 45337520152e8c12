//! `osc.udp://host:port/` URL handling.
//!
//! Addresses are compared by their resolved host and port, never by
//! transport-object identity, so a reply stays routable across
//! restarts of whatever produced the URL.

use std::net::{SocketAddr, ToSocketAddrs};

/// The URL form of a peer address.
#[must_use]
pub fn format_osc_url(addr: SocketAddr) -> String {
    format!("osc.udp://{}:{}/", addr.ip(), addr.port())
}

/// Resolve an `osc.udp://host:port/` URL (or a bare `host:port`) to a
/// socket address.
#[must_use]
pub fn parse_osc_url(url: &str) -> Option<SocketAddr> {
    let trimmed = url
        .strip_prefix("osc.udp://")
        .unwrap_or(url)
        .trim_end_matches('/');
    trimmed.to_socket_addrs().ok()?.next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_and_parse_round_trip() {
        let addr: SocketAddr = "127.0.0.1:7777".parse().unwrap();
        let url = format_osc_url(addr);
        assert_eq!(url, "osc.udp://127.0.0.1:7777/");
        assert_eq!(parse_osc_url(&url), Some(addr));
    }

    #[test]
    fn bare_host_port_is_accepted() {
        assert_eq!(
            parse_osc_url("127.0.0.1:9000"),
            Some("127.0.0.1:9000".parse().unwrap())
        );
    }

    #[test]
    fn junk_is_rejected() {
        assert_eq!(parse_osc_url("not a url"), None);
        assert_eq!(parse_osc_url(""), None);
    }
}
