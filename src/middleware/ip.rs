//! Client address resolution for rate limiting and brute force protection.
//!
//! # Resolution Order
//!
//! 1. The socket peer address from Axum's `ConnectInfo<SocketAddr>`
//! 2. If that peer is inside `TRUSTED_PROXIES`: the first `X-Forwarded-For`
//!    entry, then `X-Real-IP`
//! 3. Falls back to [`UNKNOWN_IP`] when no peer address is attached
//!
//! # Security Warning: IP Spoofing Risk
//!
//! Forwarding headers are client controlled. They are only honoured when the
//! TCP peer is a configured proxy, so a direct client cannot pick its own
//! rate limit key. Configure your proxy to overwrite (not append to) them:
//!
//! ```nginx
//! proxy_set_header X-Real-IP $remote_addr;
//! proxy_set_header X-Forwarded-For $remote_addr;
//! ```
//!
//! The server must be served with
//! `into_make_service_with_connect_info::<SocketAddr>()` for the peer address
//! to be available.

use std::borrow::Cow;
use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::Request;
use tracing::debug;

use super::rate_limit::TrustedProxyConfig;

/// Fallback value when no client address can be determined.
///
/// All such requests share one rate limit window.
pub const UNKNOWN_IP: &str = "unknown";

/// Where a forwarded address was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ForwardedIp<'a> {
    /// First entry of X-Forwarded-For.
    FromXff(&'a str),
    /// X-Real-IP value.
    FromRealIp(&'a str),
    NotFound,
}

/// Read the forwarded client address from proxy headers, without allocating.
#[inline]
fn forwarded_ip<B>(req: &Request<B>) -> ForwardedIp<'_> {
    // Format: "client, proxy1, proxy2" - we want the first (client) IP
    if let Some(forwarded) = req.headers().get("x-forwarded-for")
        && let Ok(value) = forwarded.to_str()
        && let Some(first_ip) = value.split(',').next().map(str::trim)
        && !first_ip.is_empty()
    {
        return ForwardedIp::FromXff(first_ip);
    }

    if let Some(real_ip) = req.headers().get("x-real-ip")
        && let Ok(value) = real_ip.to_str()
        && !value.trim().is_empty()
    {
        return ForwardedIp::FromRealIp(value.trim());
    }

    ForwardedIp::NotFound
}

/// The socket address of the connecting peer, if the server attached one.
#[inline]
pub fn peer_addr<B>(req: &Request<B>) -> Option<SocketAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

/// Resolve the address a request is attributed to.
///
/// # Returns
///
/// `Cow<'static, str>` - Borrowed for "unknown" (no allocation), owned otherwise.
#[inline]
pub fn resolve_client_ip<B>(req: &Request<B>, trusted_proxies: &TrustedProxyConfig) -> Cow<'static, str> {
    let Some(peer) = peer_addr(req) else {
        return Cow::Borrowed(UNKNOWN_IP);
    };
    let peer_ip = peer.ip();

    if !trusted_proxies.is_trusted(&peer_ip) {
        if trusted_proxies.is_enabled() && !matches!(forwarded_ip(req), ForwardedIp::NotFound) {
            debug!(peer = %peer_ip, "Ignoring forwarding headers from untrusted peer");
        }
        return Cow::Owned(peer_ip.to_string());
    }

    match forwarded_ip(req) {
        ForwardedIp::FromXff(ip) | ForwardedIp::FromRealIp(ip) => Cow::Owned(ip.to_string()),
        ForwardedIp::NotFound => {
            debug!(peer = %peer_ip, "Trusted proxy sent no forwarding headers");
            Cow::Owned(peer_ip.to_string())
        }
    }
}
