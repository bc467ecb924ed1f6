use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::HeaderMap;
use axum::http::header::USER_AGENT;

/// Client address. The first `X-Forwarded-For` hop is honoured only when
/// `trust_forwarded_for` is set; otherwise clients could forge it.
pub fn client_origin(
    headers: &HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    trust_forwarded_for: bool,
) -> Option<String> {
    let forwarded = trust_forwarded_for
        .then(|| headers.get("x-forwarded-for"))
        .flatten()
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned);
    forwarded.or_else(|| peer.map(|ConnectInfo(addr)| addr.ip().to_string()))
}

/// Device descriptor from `User-Agent`.
pub fn device(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}
