//! HTTP middleware for authentication, rate limiting and response hardening.
//!
//! Everything runs inside a single [`PipelineLayer`] whose stages execute in a
//! fixed order:
//!
//! ```text
//! Request → preflight → auth → rate limit → body size → Handler → security headers
//!              ↓          ↓         ↓            ↓
//!            CORS       401/429    429          413
//! ```
//!
//! # Security Considerations
//!
//! - API key comparison uses constant-time equality to prevent timing attacks
//! - Clients that keep failing auth are locked out before their key is checked
//! - Rate limit identities come from accepted keys or peer addresses, never
//!   from unvalidated client input
//! - Forwarding headers are only trusted from configured proxy ranges

pub mod auth;
pub mod ip;
pub mod pipeline;
pub mod rate_limit;
pub mod security_headers;

pub use auth::{AuthGate, extract_api_key};
pub use ip::{UNKNOWN_IP, resolve_client_ip};
pub use pipeline::{Flow, Pipeline, PipelineLayer, RateQuota};
pub use rate_limit::{
    ClientIdentity, Clock, FixedWindowLimiter, ManualClock, SystemClock, TrustedProxyConfig,
};
