//! Per-client rate limiting with fixed one-minute windows.
//!
//! # Algorithm
//!
//! Each [`ClientIdentity`] owns a window `{ count, window_start }`. On every
//! request:
//!
//! 1. If `now - window_start >= 60s` the window restarts with `count = 0`
//! 2. If `count < limit` the request is granted and `count` incremented
//! 3. Otherwise it is rejected and the window is left untouched
//!
//! The reset-check-increment sequence runs under the DashMap shard lock for
//! that identity, so concurrent requests from one client can never be granted
//! more than `limit` times per window. Distinct clients never contend on the
//! same entry.
//!
//! # Memory
//!
//! Windows are replaced lazily on the next request, and [`FixedWindowLimiter::evict_expired`]
//! drops finished windows in bulk. `AppState` runs the eviction on a timer.
//!
//! # Response Headers
//!
//! On rate limit exceeded (429):
//! - `Retry-After`: Seconds until the client's window resets
//! - `X-RateLimit-Limit`: Configured requests per window
//! - `X-RateLimit-Remaining`: Always `0`

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::error::RateLimitError;

/// Length of one rate limit window.
pub const WINDOW: Duration = Duration::from_secs(60);

// =============================================================================
// Clock
// =============================================================================

/// Monotonic time source for the limiter.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock backed by [`Instant::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset_ms: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset_ms: AtomicU64::new(0),
        }
    }

    pub fn advance(&self, by: Duration) {
        let ms = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.offset_ms.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
    }
}

// =============================================================================
// Client Identity
// =============================================================================

/// Key a client is rate limited under.
///
/// An API key is only used once the auth gate has accepted it; otherwise
/// the client is identified by address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientIdentity {
    ApiKey(String),
    Address(String),
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientIdentity::ApiKey(key) => {
                let prefix: String = key.chars().take(4).collect();
                if key.chars().count() > 8 {
                    write!(f, "key:{prefix}***")
                } else {
                    f.write_str("key:***")
                }
            }
            ClientIdentity::Address(addr) => write!(f, "addr:{addr}"),
        }
    }
}

// =============================================================================
// Fixed Window Limiter
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    start: Instant,
}

/// Fixed-window request counter keyed by [`ClientIdentity`].
///
/// A limit of 0 disables limiting; every check is granted.
pub struct FixedWindowLimiter {
    limit: u32,
    window: Duration,
    windows: DashMap<ClientIdentity, Window>,
    clock: Arc<dyn Clock>,
}

impl FixedWindowLimiter {
    /// Create a limiter allowing `limit` requests per minute per client.
    pub fn new(limit: u32, clock: Arc<dyn Clock>) -> Self {
        Self::with_window(limit, WINDOW, clock)
    }

    pub fn with_window(limit: u32, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            limit,
            window,
            windows: DashMap::new(),
            clock,
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn is_enabled(&self) -> bool {
        self.limit > 0
    }

    /// Grant or reject one request for `identity`.
    ///
    /// Returns the requests remaining in the window when granted.
    pub fn check(&self, identity: &ClientIdentity) -> Result<u32, RateLimitError> {
        if !self.is_enabled() {
            return Ok(u32::MAX);
        }

        let now = self.clock.now();
        let mut entry = self
            .windows
            .entry(identity.clone())
            .or_insert(Window {
                count: 0,
                start: now,
            });
        let window = entry.value_mut();

        let elapsed = now.saturating_duration_since(window.start);
        if elapsed >= self.window {
            window.count = 0;
            window.start = now;
        }

        if window.count < self.limit {
            window.count += 1;
            return Ok(self.limit - window.count);
        }

        let retry_after = self
            .window
            .saturating_sub(now.saturating_duration_since(window.start));
        debug!(client = %identity, retry_after_ms = retry_after.as_millis() as u64, "Window exhausted");

        Err(RateLimitError {
            limit: self.limit,
            retry_after,
        })
    }

    /// Boolean form of [`check`](Self::check).
    pub fn try_acquire(&self, identity: &ClientIdentity) -> bool {
        self.check(identity).is_ok()
    }

    /// Drop every window that has run its full length. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.windows.len();
        self.windows
            .retain(|_, w| now.saturating_duration_since(w.start) < self.window);
        before.saturating_sub(self.windows.len())
    }

    /// Number of identities with a tracked window.
    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }
}

impl fmt::Debug for FixedWindowLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedWindowLimiter")
            .field("limit", &self.limit)
            .field("window", &self.window)
            .field("tracked_clients", &self.windows.len())
            .finish()
    }
}

// =============================================================================
// Trusted Proxy CIDR Matching
// =============================================================================

/// Parsed CIDR network range for trusted proxy validation.
#[derive(Debug, Clone)]
pub struct CidrRange {
    /// Network address
    network: IpAddr,
    /// Prefix length (e.g., 24 for /24)
    prefix_len: u8,
}

impl CidrRange {
    /// Parse a CIDR notation string (e.g., "10.0.0.0/8" or "::1/128").
    ///
    /// A bare address is treated as /32 (IPv4) or /128 (IPv6).
    /// Returns `None` if the format is invalid.
    pub fn parse(cidr: &str) -> Option<Self> {
        let (addr, prefix) = match cidr.trim().split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (cidr.trim(), None),
        };

        let network: IpAddr = addr.parse().ok()?;
        let max_prefix = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };

        let prefix_len = match prefix {
            Some(p) => p.parse::<u8>().ok().filter(|&p| p <= max_prefix)?,
            None => max_prefix,
        };

        Some(Self {
            network,
            prefix_len,
        })
    }

    /// Check if an IP address is contained within this CIDR range.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (&self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = u32::MAX
                    .checked_shl(32 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                (u32::from(*net) & mask) == (u32::from(*addr) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = u128::MAX
                    .checked_shl(128 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                (u128::from(*net) & mask) == (u128::from(*addr) & mask)
            }
            // IPv4 and IPv6 don't match
            _ => false,
        }
    }
}

/// Reverse proxies whose forwarding headers are believed.
///
/// With no ranges configured no peer is trusted, and clients are always
/// identified by their socket address.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxyConfig {
    ranges: Vec<CidrRange>,
}

impl TrustedProxyConfig {
    /// Create a new trusted proxy configuration from CIDR strings.
    ///
    /// Invalid CIDR strings are logged as warnings and skipped.
    pub fn new(cidrs: &[String]) -> Self {
        let ranges: Vec<CidrRange> = cidrs
            .iter()
            .filter_map(|cidr| {
                let parsed = CidrRange::parse(cidr);
                if parsed.is_none() {
                    warn!(cidr = %cidr, "Invalid CIDR range in TRUSTED_PROXIES, skipping");
                }
                parsed
            })
            .collect();

        if !ranges.is_empty() {
            debug!(count = ranges.len(), "Trusted proxy ranges configured");
        }

        Self { ranges }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ranges.is_empty()
    }

    /// Check if the connecting peer is one of our proxies.
    pub fn is_trusted(&self, peer: &IpAddr) -> bool {
        self.ranges.iter().any(|range| range.contains(peer))
    }
}
