use crate::peer::types::ServerConfig;
use rand::Rng;
use std::net::IpAddr;

pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

// Adds the ICE URL scheme when the configured url has none
pub fn add_ice_url_scheme(config: &ServerConfig) -> String {
    if has_ice_scheme(&config.url) {
        config.url.clone()
    } else {
        let scheme = if config.r#type == "turn" {
            "turn:"
        } else {
            "stun:"
        };
        format!("{}{}", scheme, config.url)
    }
}

fn has_ice_scheme(url: &str) -> bool {
    ["stun:", "stuns:", "turn:", "turns:"]
        .iter()
        .any(|s| url.starts_with(s))
}

pub fn is_turn_url(url: &str) -> bool {
    url.starts_with("turn:") || url.starts_with("turns:")
}

/// true for `0.0.0.0`, `::` and their bracketed forms
pub fn is_unspecified_host(host: &str) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    host.parse::<IpAddr>()
        .map(|ip| ip.is_unspecified())
        .unwrap_or(false)
}

/// Connection address of an SDP candidate line
/// (`candidate:<foundation> <component> <proto> <priority> <address> <port> typ ...`).
pub fn candidate_address(candidate: &str) -> Option<&str> {
    let line = candidate.trim();
    let line = line.strip_prefix("a=").unwrap_or(line);
    let line = line.strip_prefix("candidate:").unwrap_or(line);
    line.split_whitespace().nth(4)
}

/// Host part of a `stun:`/`turn:` URL
pub fn ice_url_host(url: &str) -> Option<&str> {
    let (_, rest) = url.split_once(':')?;
    let rest = rest.trim_start_matches("//");
    let rest = rest.split('?').next().unwrap_or(rest);
    if let Some(v6) = rest.strip_prefix('[') {
        return v6.split(']').next();
    }
    rest.split(':').next().filter(|h| !h.is_empty())
}
