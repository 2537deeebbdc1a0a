//! Application configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables with sensible defaults
//! for development. In production, configure via environment variables or a `.env` file.
//! The environment is only read here; every other component receives an
//! `Arc<Config>` that never changes after startup.
//!
//! # Image & Model Limits
//!
//! - `MAX_IMAGE_SIZE`: Maximum decoded image size in bytes (default: 2MB)
//! - `MAX_IMAGE_WIDTH`: Images wider than this are downscaled (default: 640)
//! - `MAX_FACES`: Maximum faces allowed per image (default: 1)
//! - `EMBEDDING_DIM`: Expected embedding length (default: 128)
//! - `SIMILARITY_THRESHOLD`: Default match threshold in [0, 1] (default: 0.85)
//!
//! # Security Configuration
//!
//! - `API_KEYS`: Comma-separated accepted keys; empty disables authentication
//! - `ALLOWED_ORIGINS`: Comma-separated CORS origins; empty or `*` allows all
//! - `RATE_LIMIT_PER_MINUTE`: Requests per client per minute (default: 60, 0 = off)

use std::collections::HashSet;
use std::env;
use std::net::SocketAddr;

use crate::error::ConfigError;

/// Service name reported by the health endpoint.
pub const SERVICE_NAME: &str = "frbox";

/// Application configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 8000)
    pub port: u16,

    // =========================================================================
    // Image Processing Limits
    // =========================================================================
    /// Maximum image size in bytes, applied to the encoded request body and
    /// to the decoded image bytes (default: 2MB)
    pub max_image_size: usize,

    /// Images wider than this are downscaled proportionally (default: 640)
    pub max_image_width: u32,

    /// Maximum number of faces accepted in one image (default: 1)
    pub max_faces: usize,

    // =========================================================================
    // Embedding Configuration
    // =========================================================================
    /// Length of every embedding vector (default: 128)
    pub embedding_dim: usize,

    /// Threshold used by `/verify` when the caller omits one (default: 0.85)
    pub similarity_threshold: f64,

    /// Base URL of the face detection service
    pub detector_url: String,

    // =========================================================================
    // Security Configuration
    // =========================================================================
    /// Accepted API keys. Empty means authentication is disabled.
    pub api_keys: HashSet<String>,

    /// Extra paths that bypass authentication and rate limiting, on top of
    /// `/health`, `/docs` and `/openapi.json` which are always exempt.
    /// Default: empty
    pub auth_bypass_paths: Vec<String>,

    /// Allowed CORS origins. Empty (or containing "*") allows any origin.
    pub allowed_origins: Vec<String>,

    /// Requests per client per minute (0 disables rate limiting)
    pub rate_limit_per_minute: u32,

    /// Trusted proxy CIDR ranges. `X-Forwarded-For` / `X-Real-IP` are only
    /// honoured when the peer address falls inside one of these ranges.
    ///
    /// Format: Comma-separated CIDR notation (e.g., "10.0.0.0/8,172.16.0.0/12")
    /// Default: Empty (forwarding headers ignored, peer address used)
    pub trusted_proxies: Vec<String>,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log level (e.g., "info", "debug", "trace")
    pub log_level: String,

    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if any value fails to parse or is out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable source.
    ///
    /// `lookup` returns the raw value for a variable name, or `None` when unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            // Server
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_var(&lookup, "PORT", defaults.port)?,

            // Image limits
            max_image_size: parse_var(&lookup, "MAX_IMAGE_SIZE", defaults.max_image_size)?,
            max_image_width: parse_var(&lookup, "MAX_IMAGE_WIDTH", defaults.max_image_width)?,
            max_faces: parse_var(&lookup, "MAX_FACES", defaults.max_faces)?,

            // Embedding
            embedding_dim: parse_var(&lookup, "EMBEDDING_DIM", defaults.embedding_dim)?,
            similarity_threshold: parse_var(
                &lookup,
                "SIMILARITY_THRESHOLD",
                defaults.similarity_threshold,
            )?,
            detector_url: lookup("DETECTOR_URL")
                .filter(|s| !s.trim().is_empty())
                .map(|s| s.trim().trim_end_matches('/').to_string())
                .unwrap_or(defaults.detector_url),

            // Security
            api_keys: split_list(lookup("API_KEYS").as_deref()).collect(),
            auth_bypass_paths: split_list(lookup("AUTH_BYPASS_PATHS").as_deref())
                .filter(|s| s.starts_with('/'))
                .collect(),
            allowed_origins: split_list(lookup("ALLOWED_ORIGINS").as_deref()).collect(),
            rate_limit_per_minute: parse_var(
                &lookup,
                "RATE_LIMIT_PER_MINUTE",
                defaults.rate_limit_per_minute,
            )?,
            trusted_proxies: split_list(lookup("TRUSTED_PROXIES").as_deref()).collect(),

            // Observability
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            metrics_port: parse_var(&lookup, "METRICS_PORT", defaults.metrics_port)?,
        };

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::OutOfRange` if validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(out_of_range(
                "SIMILARITY_THRESHOLD",
                format!("{} is not within [0, 1]", self.similarity_threshold),
            ));
        }

        if self.max_image_size == 0 {
            return Err(out_of_range("MAX_IMAGE_SIZE", "must be greater than 0"));
        }

        if self.max_image_width == 0 {
            return Err(out_of_range("MAX_IMAGE_WIDTH", "must be greater than 0"));
        }

        if self.max_faces == 0 {
            return Err(out_of_range("MAX_FACES", "must be at least 1"));
        }

        if self.embedding_dim == 0 {
            return Err(out_of_range("EMBEDDING_DIM", "must be greater than 0"));
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if rate limiting is enabled.
    pub fn rate_limiting_enabled(&self) -> bool {
        self.rate_limit_per_minute > 0
    }

    /// Check if API key authentication is enabled.
    pub fn auth_enabled(&self) -> bool {
        !self.api_keys.is_empty()
    }

    /// Check if any origin may call the API.
    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.is_empty() || self.allowed_origins.iter().any(|o| o == "*")
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        (self.metrics_port > 0).then(|| SocketAddr::from(([0, 0, 0, 0], self.metrics_port)))
    }
}

/// Parse a variable into the specified type, falling back to `default` when unset.
fn parse_var<T, F>(lookup: &F, name: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(val) => val.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name: name.to_string(),
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

/// Split a comma-separated value into trimmed, non-empty entries.
fn split_list(raw: Option<&str>) -> impl Iterator<Item = String> + '_ {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn out_of_range(name: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::OutOfRange {
        name: name.to_string(),
        reason: reason.into(),
    }
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Server
            host: "0.0.0.0".to_string(),
            port: 8000,
            // Image limits
            max_image_size: 2 * 1024 * 1024, // 2MB
            max_image_width: 640,
            max_faces: 1,
            // Embedding
            embedding_dim: 128,
            similarity_threshold: 0.85,
            detector_url: "http://127.0.0.1:8501".to_string(),
            // Security
            api_keys: HashSet::new(),
            auth_bypass_paths: vec![],
            allowed_origins: vec![],
            rate_limit_per_minute: 60,
            trusted_proxies: vec![],
            // Observability
            log_level: "info".to_string(),
            metrics_port: 9090,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = load(&[]).unwrap();

        assert_eq!(config.max_image_size, 2_097_152);
        assert_eq!(config.max_image_width, 640);
        assert_eq!(config.max_faces, 1);
        assert_eq!(config.embedding_dim, 128);
        assert!((config.similarity_threshold - 0.85).abs() < f64::EPSILON);
        assert!(config.api_keys.is_empty());
        assert!(config.allowed_origins.is_empty());
        assert_eq!(config.rate_limit_per_minute, 60);
    }

    #[test]
    fn test_parses_named_variables() {
        let config = load(&[
            ("MAX_IMAGE_SIZE", "1024"),
            ("MAX_IMAGE_WIDTH", "320"),
            ("MAX_FACES", "2"),
            ("EMBEDDING_DIM", "512"),
            ("SIMILARITY_THRESHOLD", "0.6"),
            ("API_KEYS", "alpha, beta,,"),
            ("ALLOWED_ORIGINS", "https://a.example,https://b.example"),
            ("RATE_LIMIT_PER_MINUTE", "10"),
        ])
        .unwrap();

        assert_eq!(config.max_image_size, 1024);
        assert_eq!(config.max_image_width, 320);
        assert_eq!(config.max_faces, 2);
        assert_eq!(config.embedding_dim, 512);
        assert!((config.similarity_threshold - 0.6).abs() < f64::EPSILON);
        assert_eq!(config.api_keys.len(), 2);
        assert!(config.api_keys.contains("alpha"));
        assert!(config.api_keys.contains("beta"));
        assert_eq!(config.allowed_origins.len(), 2);
        assert_eq!(config.rate_limit_per_minute, 10);
    }

    #[test]
    fn test_unparseable_number_fails() {
        let err = load(&[("MAX_IMAGE_SIZE", "two megabytes")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref name, .. } if name == "MAX_IMAGE_SIZE"));
    }

    #[test]
    fn test_threshold_out_of_range_fails() {
        let err = load(&[("SIMILARITY_THRESHOLD", "1.5")]).unwrap_err();
        assert!(err.to_string().contains("SIMILARITY_THRESHOLD"));

        let err = load(&[("SIMILARITY_THRESHOLD", "-0.1")]).unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { .. }));
    }

    #[test]
    fn test_zero_embedding_dim_fails() {
        assert!(load(&[("EMBEDDING_DIM", "0")]).is_err());
    }

    #[test]
    fn test_auth_enabled() {
        assert!(!load(&[]).unwrap().auth_enabled());
        assert!(load(&[("API_KEYS", "k1")]).unwrap().auth_enabled());
        assert!(!load(&[("API_KEYS", " , ")]).unwrap().auth_enabled());
    }

    #[test]
    fn test_allows_any_origin() {
        assert!(load(&[]).unwrap().allows_any_origin());
        assert!(load(&[("ALLOWED_ORIGINS", "*")]).unwrap().allows_any_origin());
        assert!(
            !load(&[("ALLOWED_ORIGINS", "https://app.example")])
                .unwrap()
                .allows_any_origin()
        );
    }

    #[test]
    fn test_bypass_paths_must_be_absolute() {
        let config = load(&[("AUTH_BYPASS_PATHS", "/status,metrics,/ready")]).unwrap();
        assert_eq!(config.auth_bypass_paths, vec!["/status", "/ready"]);
        assert!(load(&[]).unwrap().auth_bypass_paths.is_empty());
    }

    #[test]
    fn test_detector_url_trailing_slash_trimmed() {
        let config = load(&[("DETECTOR_URL", "http://detector:9000/")]).unwrap();
        assert_eq!(config.detector_url, "http://detector:9000");
    }

    #[test]
    fn test_metrics_addr() {
        assert!(load(&[("METRICS_PORT", "0")]).unwrap().metrics_addr().is_none());
        assert_eq!(
            load(&[]).unwrap().metrics_addr().unwrap().port(),
            9090
        );
    }

    #[test]
    fn test_server_addr_format() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.server_addr(), "127.0.0.1:8080");
    }
}
