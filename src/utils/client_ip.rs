use axum::http::HeaderMap;
use std::net::IpAddr;

/// Caller address used as a rate-limit key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    if let Some(forwarded) = headers.get("x-forwarded-for")
        && let Ok(val) = forwarded.to_str()
        && let Some(ip) = val.split(',').next().map(str::trim)
        && !ip.is_empty()
    {
        return Some(ip.to_string());
    }
    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Resolves the caller address. Proxy headers are only consulted when
/// `trust_proxy` is set or the socket peer is unknown.
pub fn extract_client_ip(headers: &HeaderMap, peer: Option<IpAddr>, trust_proxy: bool) -> ClientIp {
    if (trust_proxy || peer.is_none())
        && let Some(ip) = forwarded_ip(headers)
    {
        return ClientIp(ip);
    }
    ClientIp(
        peer.map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".to_string()),
    )
}
