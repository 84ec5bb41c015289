//! Client IP extraction from HTTP headers with trust validation
//!
//! - X-Forwarded-For is walked right to left, skipping trusted proxies
//! - Forwarded (RFC 7239) is preferred when present
//! - CF-Connecting-IP is used in Cloudflare mode
//! - Falls back to the socket remote address when headers are untrusted

use axum::http::HeaderMap;
use ipnet::IpNet;
use std::net::IpAddr;
use tracing::warn;

use crate::config::{ClientIpConfig, TrustedProxyMode};

/// Parsed proxy trust settings.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxies {
    mode: TrustedProxyMode,
    networks: Vec<IpNet>,
    hops: Option<usize>,
}

impl TrustedProxies {
    pub fn from_config(config: &ClientIpConfig) -> anyhow::Result<Self> {
        let networks = config
            .trusted_proxies
            .iter()
            .map(|cidr| {
                cidr.parse::<IpNet>()
                    .map_err(|e| anyhow::anyhow!("invalid trusted proxy CIDR '{cidr}': {e}"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Self {
            mode: config.trusted_proxy_mode,
            networks,
            hops: config.num_trusted_proxies,
        })
    }

    pub fn mode(&self) -> TrustedProxyMode {
        self.mode
    }

    fn is_trusted(&self, ip: &IpAddr) -> bool {
        self.networks.iter().any(|net| net.contains(ip))
    }
}

/// Extract the client IP address according to the trust configuration.
///
/// `socket_addr` is the peer address of the connection, if known.
pub fn extract_client_ip(
    headers: &HeaderMap,
    socket_addr: Option<IpAddr>,
    proxies: &TrustedProxies,
) -> Option<IpAddr> {
    match proxies.mode {
        TrustedProxyMode::Cloudflare => extract_cloudflare_ip(headers).or_else(|| {
            warn!("CF-Connecting-IP header missing in Cloudflare mode, using socket address");
            socket_addr
        }),
        TrustedProxyMode::Standard => extract_standard_ip(headers, proxies).or(socket_addr),
        TrustedProxyMode::None => socket_addr,
    }
}

fn extract_cloudflare_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("cf-connecting-ip")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
}

fn extract_standard_ip(headers: &HeaderMap, proxies: &TrustedProxies) -> Option<IpAddr> {
    extract_from_forwarded(headers).or_else(|| extract_from_x_forwarded_for(headers, proxies))
}

/// First `for=` node of the RFC 7239 Forwarded header.
fn extract_from_forwarded(headers: &HeaderMap) -> Option<IpAddr> {
    let forwarded = headers.get("forwarded")?.to_str().ok()?;

    // Forwarded: for=192.0.2.60;proto=http;by=203.0.113.43
    for element in forwarded.split(',') {
        for param in element.split(';') {
            let param = param.trim();
            let Some(value) = param
                .strip_prefix("for=")
                .or_else(|| param.strip_prefix("For="))
            else {
                continue;
            };

            if let Some(ip) = parse_forwarded_node(value) {
                return Some(ip);
            }
        }
    }

    None
}

/// Parse `192.0.2.60`, `"192.0.2.60:4711"` or `"[2001:db8::1]:4711"`.
fn parse_forwarded_node(value: &str) -> Option<IpAddr> {
    let value = value.trim_matches('"');

    if let Some(rest) = value.strip_prefix('[') {
        return rest.split(']').next()?.parse().ok();
    }

    if let Ok(ip) = value.parse::<IpAddr>() {
        return Some(ip);
    }

    // IPv4 with port
    value.rsplit_once(':')?.0.parse().ok()
}

/// Walk X-Forwarded-For right to left and return the first untrusted hop.
fn extract_from_x_forwarded_for(headers: &HeaderMap, proxies: &TrustedProxies) -> Option<IpAddr> {
    let xff = headers.get("x-forwarded-for")?.to_str().ok()?;

    let ips: Vec<IpAddr> = xff
        .split(',')
        .filter_map(|s| s.trim().parse::<IpAddr>().ok())
        .collect();

    if ips.is_empty() {
        return None;
    }

    if let Some(hops) = proxies.hops {
        if ips.len() > hops {
            return Some(ips[ips.len() - hops - 1]);
        }
        // Chain shorter than the configured hops, take the leftmost entry
        return ips.first().copied();
    }

    if !proxies.networks.is_empty() {
        return ips
            .iter()
            .rev()
            .find(|ip| !proxies.is_trusted(ip))
            .or_else(|| ips.first())
            .copied();
    }

    ips.last().copied()
}

/// Whether the request arrived over TLS according to `X-Forwarded-Proto`.
/// Only meaningful when a proxy is trusted.
pub fn forwarded_https(headers: &HeaderMap, proxies: &TrustedProxies) -> bool {
    if proxies.mode == TrustedProxyMode::None {
        return false;
    }

    headers
        .get("x-forwarded-proto")
        .and_then(|h| h.to_str().ok())
        .map(|proto| proto.trim().eq_ignore_ascii_case("https"))
        .unwrap_or(false)
}
