//! API key authentication.
//!
//! # Security Features
//!
//! - **Constant-time comparison**: the provided key is compared against every
//!   configured key with `subtle`, without stopping at the first match
//! - **Two input methods**: `X-API-Key` header (preferred) or
//!   `Authorization: Bearer <key>`
//! - **Selective protection**: health and docs endpoints, plus CORS preflight,
//!   are reachable without a key
//! - **Brute force protection**: addresses that keep failing are locked out
//!   before their key is even examined
//!
//! # Usage
//!
//! Set `API_KEYS` to a comma-separated list to enable authentication:
//!
//! ```bash
//! API_KEYS=key-one,key-two cargo run
//! ```
//!
//! ```bash
//! curl -H "X-API-Key: key-one" http://localhost:8000/verify
//! curl -H "Authorization: Bearer key-one" http://localhost:8000/verify
//! ```

use std::collections::HashSet;
use std::num::NonZeroU32;
use std::time::{Duration, Instant};

use axum::http::{Method, Request, header::AUTHORIZATION};
use dashmap::DashMap;
use governor::clock::{Clock, DefaultClock};
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use subtle::{Choice, ConstantTimeEq};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{AuthError, RateLimitError};

/// Header name for API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Health and documentation routes, open whatever `AUTH_BYPASS_PATHS` says.
pub const ALWAYS_EXEMPT_PATHS: [&str; 3] = ["/health", "/docs", "/openapi.json"];

/// Default maximum auth failures per address per minute.
const DEFAULT_AUTH_FAILURE_LIMIT: NonZeroU32 = NonZeroU32::new(10).unwrap();

/// Default burst capacity for auth failure rate limiting.
const DEFAULT_AUTH_FAILURE_BURST: NonZeroU32 = NonZeroU32::new(5).unwrap();

/// Type alias for auth failure rate limiter (per address).
type AuthFailureLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Validates API keys against the configured set.
///
/// An empty key set disables authentication entirely.
///
/// # Path Matching Behavior
///
/// [`ALWAYS_EXEMPT_PATHS`] are always bypassed; configured paths are added on
/// top. Matching is **exact** against `request.uri().path()`: `/health` is
/// bypassed, `/health/` and `/HEALTH` are not.
pub struct AuthGate {
    keys: Vec<String>,
    bypass_paths: Vec<String>,
    /// Tracks failures per address (None when auth is disabled)
    failure_limiter: Option<AuthFailureLimiter>,
    /// Addresses that exhausted their failure budget, and until when
    lockouts: DashMap<String, Instant>,
}

impl AuthGate {
    pub fn new(keys: HashSet<String>, bypass_paths: Vec<String>) -> Self {
        let failure_limiter = if keys.is_empty() {
            None
        } else {
            // Only create rate limiter when auth is enabled
            let quota = Quota::per_minute(DEFAULT_AUTH_FAILURE_LIMIT)
                .allow_burst(DEFAULT_AUTH_FAILURE_BURST);
            Some(RateLimiter::keyed(quota))
        };

        Self {
            keys: keys.into_iter().collect(),
            bypass_paths,
            failure_limiter,
            lockouts: DashMap::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.api_keys.clone(), config.auth_bypass_paths.clone())
    }

    pub fn is_enabled(&self) -> bool {
        !self.keys.is_empty()
    }

    /// Whether `path` is reachable without credentials or rate limiting.
    pub fn is_bypass_path(&self, path: &str) -> bool {
        ALWAYS_EXEMPT_PATHS.contains(&path) || self.bypass_paths.iter().any(|p| p == path)
    }

    /// Decide whether a request may proceed.
    ///
    /// Always `Ok` when auth is disabled, for bypass paths and for `OPTIONS`.
    pub fn authorize(
        &self,
        provided: Option<&str>,
        path: &str,
        method: &Method,
    ) -> Result<(), AuthError> {
        if !self.is_enabled() || *method == Method::OPTIONS || self.is_bypass_path(path) {
            return Ok(());
        }

        match provided {
            None => Err(AuthError::Missing),
            Some(key) if self.key_matches(key) => Ok(()),
            Some(_) => Err(AuthError::Invalid),
        }
    }

    /// Compare against every configured key without short-circuiting.
    fn key_matches(&self, provided: &str) -> bool {
        let found = self
            .keys
            .iter()
            .fold(Choice::from(0), |acc, key| acc | ct_eq(provided, key));
        found.into()
    }

    /// Reject an address that is currently locked out for repeated failures.
    pub fn check_lockout(&self, client_ip: &str) -> Result<(), RateLimitError> {
        let Some(until) = self.lockouts.get(client_ip).map(|entry| *entry.value()) else {
            return Ok(());
        };

        let now = Instant::now();
        if now >= until {
            self.lockouts.remove(client_ip);
            return Ok(());
        }

        debug!(
            client_ip = %client_ip,
            retry_after_secs = (until - now).as_secs().max(1),
            "Request from locked out address"
        );
        Err(RateLimitError {
            limit: DEFAULT_AUTH_FAILURE_LIMIT.get(),
            retry_after: until - now,
        })
    }

    /// Count a failed attempt, locking the address out once over budget.
    pub fn record_failure(&self, client_ip: &str) {
        let Some(limiter) = &self.failure_limiter else {
            return;
        };

        if let Err(not_until) = limiter.check_key(&client_ip.to_string()) {
            let wait = not_until.wait_time_from(DefaultClock::default().now());
            let wait = wait.max(Duration::from_secs(1));
            let previous = self
                .lockouts
                .insert(client_ip.to_string(), Instant::now() + wait);
            if previous.is_none() {
                warn!(
                    client_ip = %client_ip,
                    lockout_secs = wait.as_secs(),
                    "Address locked out after repeated auth failures"
                );
            }
        }
    }

    /// Drop expired lockouts and idle failure counters.
    pub fn evict_expired(&self) {
        let now = Instant::now();
        self.lockouts.retain(|_, until| *until > now);
        if let Some(limiter) = &self.failure_limiter {
            limiter.retain_recent();
        }
    }
}

/// Extract the API key from `X-API-Key`, falling back to `Authorization: Bearer`.
pub fn extract_api_key<B>(req: &Request<B>) -> Option<&str> {
    if let Some(value) = req.headers().get(API_KEY_HEADER)
        && let Ok(key) = value.to_str()
    {
        return Some(key.trim());
    }

    let value = req.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") {
        Some(token.trim())
    } else {
        None
    }
}

/// Constant-time string comparison.
///
/// Differing lengths return early; only the key contents are protected.
fn ct_eq(a: &str, b: &str) -> Choice {
    a.as_bytes().ct_eq(b.as_bytes())
}
