//! Request handling and transformation.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers before forwarding
//! - Rewrite `Host` to the selected backend
//! - Append `X-Forwarded-For` / set `X-Forwarded-Host`
//!
//! # Design Decisions
//! - Original request preserved for logging; modified copy forwarded
//! - The request ID header set by the outer layer is forwarded untouched

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use std::net::SocketAddr;

use crate::load_balancer::backend::Backend;

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

const KEEP_ALIVE: HeaderName = HeaderName::from_static("keep-alive");

/// Headers meaningful only for a single transport hop.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    KEEP_ALIVE,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Remove hop-by-hop headers, including any named in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

/// Build the header map sent to `target` for a request from `client_addr`.
pub fn upstream_headers(original: &HeaderMap, target: &Backend, client_addr: SocketAddr) -> HeaderMap {
    let mut headers = original.clone();
    strip_hop_by_hop(&mut headers);

    if let Some(host) = original.get(header::HOST) {
        headers.insert(X_FORWARDED_HOST, host.clone());
    }
    if let Ok(host) = HeaderValue::from_str(target.authority().as_str()) {
        headers.insert(header::HOST, host);
    }

    let client_ip = client_addr.ip().to_string();
    let forwarded_for = match original.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(prior) if !prior.is_empty() => format!("{prior}, {client_ip}"),
        _ => client_ip,
    };
    if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
        headers.insert(X_FORWARDED_FOR, value);
    }

    headers
}
