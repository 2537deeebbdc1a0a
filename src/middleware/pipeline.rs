//! The request pipeline: one tower service driving an ordered list of stages.
//!
//! # Stage Order
//!
//! ```text
//! Request
//!    │
//!    ▼
//! preflight ── OPTIONS ──────────────────────────────┐
//!    │                                               │
//!    ▼                                               │
//! auth ─────── 401 missing/invalid key               │
//!    │         429 address locked out                │
//!    ▼                                               │
//! rate_limit ─ 429 window exhausted                  │
//!    │                                               │
//!    ▼                                               │
//! body_size ── 413 Content-Length over limit         │
//!    │                                               │
//!    ▼                                               ▼
//! inner service (CORS → body limit → handler) ◄──────┘
//!    │
//!    ▼
//! security headers on every response
//! ```
//!
//! Each stage either lets the request continue or produces the response
//! itself; the driver stops at the first stage that responds.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Body;
use axum::http::header::CONTENT_LENGTH;
use axum::http::{HeaderValue, Method, Request};
use axum::response::{IntoResponse, Response};
use tower::{Layer, Service};
use tracing::debug;

use super::auth::{AuthGate, extract_api_key};
use super::ip::resolve_client_ip;
use super::rate_limit::{ClientIdentity, FixedWindowLimiter, TrustedProxyConfig};
use super::security_headers;
use crate::config::Config;
use crate::error::{AppError, SizeError};
use crate::metrics::{self, reasons};

/// What the driver should do after a stage.
pub enum Flow {
    /// Run the next stage.
    Continue,
    /// Skip the remaining stages and hand the request to the inner service.
    Forward,
    /// Stop and send this response.
    Respond(Response),
}

/// A pipeline step. May annotate the request through its extensions.
pub type Stage = fn(&Pipeline, &mut Request<Body>) -> Flow;

/// Stages in execution order.
pub const STAGES: [(&str, Stage); 4] = [
    ("preflight", preflight),
    ("auth", authenticate),
    ("rate_limit", rate_limit),
    ("body_size", body_size),
];

/// Rate limit state granted to a request, echoed in response headers.
#[derive(Debug, Clone, Copy)]
pub struct RateQuota {
    pub limit: u32,
    pub remaining: u32,
}

/// Shared state the stages consult.
pub struct Pipeline {
    auth: AuthGate,
    limiter: Arc<FixedWindowLimiter>,
    trusted_proxies: TrustedProxyConfig,
    max_body_size: usize,
}

impl Pipeline {
    pub fn new(
        auth: AuthGate,
        limiter: Arc<FixedWindowLimiter>,
        trusted_proxies: TrustedProxyConfig,
        max_body_size: usize,
    ) -> Self {
        Self {
            auth,
            limiter,
            trusted_proxies,
            max_body_size,
        }
    }

    pub fn from_config(config: &Config, limiter: Arc<FixedWindowLimiter>) -> Self {
        Self::new(
            AuthGate::from_config(config),
            limiter,
            TrustedProxyConfig::new(&config.trusted_proxies),
            config.max_image_size,
        )
    }

    pub fn auth(&self) -> &AuthGate {
        &self.auth
    }

    pub fn limiter(&self) -> &FixedWindowLimiter {
        &self.limiter
    }

    /// Run every stage in order until one responds or forwards.
    pub fn run(&self, req: &mut Request<Body>) -> Flow {
        for (name, stage) in STAGES {
            match stage(self, req) {
                Flow::Continue => {}
                Flow::Forward => {
                    debug!(stage = name, "Remaining stages skipped");
                    return Flow::Forward;
                }
                Flow::Respond(response) => {
                    debug!(stage = name, status = %response.status(), "Request stopped by pipeline");
                    return Flow::Respond(response);
                }
            }
        }
        Flow::Continue
    }

    /// Drop finished rate limit windows and expired auth lockouts.
    pub fn evict_expired(&self) -> usize {
        self.auth.evict_expired();
        let evicted = self.limiter.evict_expired();
        metrics::set_rate_limit_clients(self.limiter.tracked_clients());
        evicted
    }
}

// =============================================================================
// Stages
// =============================================================================

/// CORS preflight goes straight to the CORS layer.
fn preflight(_: &Pipeline, req: &mut Request<Body>) -> Flow {
    if req.method() == Method::OPTIONS {
        Flow::Forward
    } else {
        Flow::Continue
    }
}

/// Validate the API key and attach the caller's [`ClientIdentity`].
fn authenticate(pipeline: &Pipeline, req: &mut Request<Body>) -> Flow {
    let auth = &pipeline.auth;
    let client_ip = resolve_client_ip(req, &pipeline.trusted_proxies).into_owned();
    let path = req.uri().path();
    let guarded = auth.is_enabled() && !auth.is_bypass_path(path);

    if guarded && let Err(e) = auth.check_lockout(&client_ip) {
        metrics::record_rejection(reasons::AUTH_LOCKOUT);
        return Flow::Respond(AppError::from(e).into_response());
    }

    let provided = extract_api_key(req);
    if let Err(e) = auth.authorize(provided, path, req.method()) {
        auth.record_failure(&client_ip);
        metrics::record_rejection(reasons::AUTH);
        return Flow::Respond(AppError::from(e).into_response());
    }

    // A key only becomes the identity once it has been accepted
    let identity = match provided {
        Some(key) if guarded => ClientIdentity::ApiKey(key.to_string()),
        _ => ClientIdentity::Address(client_ip),
    };
    req.extensions_mut().insert(identity);
    Flow::Continue
}

fn rate_limit(pipeline: &Pipeline, req: &mut Request<Body>) -> Flow {
    let limiter = &pipeline.limiter;
    if !limiter.is_enabled() || pipeline.auth.is_bypass_path(req.uri().path()) {
        return Flow::Continue;
    }

    let Some(identity) = req.extensions().get::<ClientIdentity>() else {
        return Flow::Continue;
    };

    match limiter.check(identity) {
        Ok(remaining) => {
            let quota = RateQuota {
                limit: limiter.limit(),
                remaining,
            };
            req.extensions_mut().insert(quota);
            Flow::Continue
        }
        Err(e) => {
            tracing::warn!(client = %identity, path = %req.uri().path(), "Rate limit exceeded");
            metrics::record_rejection(reasons::RATE_LIMIT);
            Flow::Respond(AppError::from(e).into_response())
        }
    }
}

/// Reject declared bodies over the limit before reading them.
fn body_size(pipeline: &Pipeline, req: &mut Request<Body>) -> Flow {
    let declared = req
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    match declared {
        Some(len) if len > pipeline.max_body_size as u64 => {
            metrics::record_rejection(reasons::PAYLOAD_SIZE);
            let err = SizeError::PayloadTooLarge {
                max: pipeline.max_body_size,
            };
            Flow::Respond(AppError::from(err).into_response())
        }
        _ => Flow::Continue,
    }
}

// =============================================================================
// Tower Layer
// =============================================================================

/// Tower layer running the [`Pipeline`] in front of the wrapped service.
#[derive(Clone)]
pub struct PipelineLayer {
    pipeline: Arc<Pipeline>,
}

impl PipelineLayer {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }
}

impl<S> Layer<S> for PipelineLayer {
    type Service = PipelineService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        PipelineService {
            inner,
            pipeline: self.pipeline.clone(),
        }
    }
}

/// Pipeline service wrapper.
#[derive(Clone)]
pub struct PipelineService<S> {
    inner: S,
    pipeline: Arc<Pipeline>,
}

impl<S> Service<Request<Body>> for PipelineService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let start = Instant::now();
        let method = req.method().clone();
        let endpoint = endpoint_label(req.uri().path());

        let flow = self.pipeline.run(&mut req);
        let quota = req.extensions().get::<RateQuota>().copied();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let mut response = match flow {
                Flow::Respond(response) => response,
                Flow::Continue | Flow::Forward => inner.call(req).await?,
            };

            let headers = response.headers_mut();
            security_headers::inject(headers);
            if let Some(quota) = quota {
                headers.insert("x-ratelimit-limit", HeaderValue::from(quota.limit));
                headers
                    .entry("x-ratelimit-remaining")
                    .or_insert(HeaderValue::from(quota.remaining));
            }

            metrics::record_request_duration(
                endpoint,
                method.as_str(),
                response.status().as_str(),
                start.elapsed().as_secs_f64(),
            );

            Ok(response)
        })
    }
}

/// Bounded label for request metrics.
fn endpoint_label(path: &str) -> &'static str {
    match path {
        "/embedding" => "/embedding",
        "/verify" => "/verify",
        "/health" => "/health",
        "/docs" | "/openapi.json" => "/openapi.json",
        _ => "other",
    }
}
