//! Structured configuration for the middleware chain.
//!
//! [`HermesConfig`] groups one record per chain layer in chain order. All
//! records are serde round-trippable so the configuration endpoints can
//! serve and accept them as JSON. Invalid configuration fails fast at
//! construction or hot-reload time via [`HermesConfig::validate`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HermesError, HermesResult};

/// Default bearer-token lifetime in seconds (24 hours).
const DEFAULT_TOKEN_EXPIRATION_SECS: u64 = 24 * 60 * 60;

/// Default maximum request body size (10 MiB).
const DEFAULT_MAX_REQUEST_SIZE: usize = 10 * 1024 * 1024;

/// Complete configuration for the control plane, one section per layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HermesConfig {
    /// Error recovery (outermost layer).
    pub recovery: RecoveryConfig,
    /// Response shaping.
    pub shaper: ShaperConfig,
    /// Authentication.
    pub auth: AuthConfig,
    /// Request validation.
    pub validation: ValidationConfig,
    /// Real-time synchronization hub.
    pub sync: SyncConfig,
    /// Agent session layer.
    pub session: SessionConfig,
}

impl Default for HermesConfig {
    fn default() -> Self {
        Self {
            recovery: RecoveryConfig::default(),
            shaper: ShaperConfig::default(),
            auth: AuthConfig::default(),
            validation: ValidationConfig::default(),
            sync: SyncConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl HermesConfig {
    /// Builds the default configuration with environment overrides applied.
    ///
    /// Recognized variables: `HERMES_AUTH_SECRET`, `HERMES_BACKEND_ENDPOINT`.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(secret) = std::env::var("HERMES_AUTH_SECRET") {
            config.auth.secret = secret;
        }
        if let Ok(endpoint) = std::env::var("HERMES_BACKEND_ENDPOINT") {
            config.session.api_endpoint = endpoint;
        }
        config
    }

    /// Validates the configuration, failing fast on inconsistencies.
    ///
    /// # Errors
    ///
    /// Returns a validation error naming the offending field.
    pub fn validate(&self) -> HermesResult<()> {
        if self.auth.enabled && self.auth.secret.is_empty() {
            return Err(HermesError::validation(
                "auth secret cannot be empty when auth is enabled",
            ));
        }
        if self.validation.enabled && self.validation.max_request_size == 0 {
            return Err(HermesError::validation("max request size must be positive"));
        }
        if self.sync.enabled {
            if self.sync.buffer_size == 0 {
                return Err(HermesError::validation("sync buffer size must be positive"));
            }
            if self.sync.heartbeat_interval_secs == 0 {
                return Err(HermesError::validation(
                    "heartbeat interval must be positive",
                ));
            }
        }
        if self.session.enabled {
            if self.session.api_endpoint.is_empty() {
                return Err(HermesError::validation(
                    "backend endpoint cannot be empty when the session layer is enabled",
                ));
            }
            if self.session.timeout_seconds == 0 {
                return Err(HermesError::validation("backend timeout must be positive"));
            }
        }
        Ok(())
    }
}

/// Error recovery configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Whether the recovery layer participates in the chain.
    pub enabled: bool,
    /// Whether error messages keep their full detail.
    pub detailed_errors: bool,
    /// Whether failures are logged.
    pub log_errors: bool,
    /// Whether a call-site trace is attached to error envelopes.
    pub include_stack: bool,
    /// Whether error messages pass through the secret sanitizer.
    pub sanitize_secrets: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            detailed_errors: false,
            log_errors: true,
            include_stack: false,
            sanitize_secrets: true,
        }
    }
}

/// Response shaping configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaperConfig {
    /// Whether the shaper participates in the chain.
    pub enabled: bool,
    /// Whether payloads are wrapped in the standard envelope.
    pub standard_format: bool,
    /// Whether response metadata is attached to envelopes.
    pub include_meta: bool,
    /// Gzip level, 0 disables compression.
    pub compression_level: u32,
    /// `Cache-Control` header value; empty leaves the header unset.
    pub cache_control: String,
}

impl Default for ShaperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            standard_format: true,
            include_meta: true,
            compression_level: 6,
            cache_control: "no-cache".to_string(),
        }
    }
}

/// Authentication mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// Signed bearer tokens with HMAC verification.
    Bearer,
    /// Opaque API keys resolved against an in-memory registry.
    ApiKey,
}

/// Authentication configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Whether the authenticator participates in the chain.
    pub enabled: bool,
    /// The credential type accepted.
    pub mode: AuthMode,
    /// Symmetric secret for bearer-token verification.
    pub secret: String,
    /// Bearer-token lifetime in seconds.
    pub expiration_secs: u64,
    /// Expected `iss` claim.
    pub issuer: String,
}

impl AuthConfig {
    /// Returns the token lifetime as a [`Duration`].
    #[must_use]
    pub fn expiration(&self) -> Duration {
        Duration::from_secs(self.expiration_secs)
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: AuthMode::Bearer,
            secret: "default-secret-change-me".to_string(),
            expiration_secs: DEFAULT_TOKEN_EXPIRATION_SECS,
            issuer: "hermes".to_string(),
        }
    }
}

/// Request validation configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Whether the validator participates in the chain.
    pub enabled: bool,
    /// Whether strict checks (header presence, JSON shape) apply.
    pub strict_mode: bool,
    /// Maximum accepted `Content-Length` in bytes.
    pub max_request_size: usize,
    /// Whether header constraints are enforced at all.
    pub validate_headers: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strict_mode: false,
            max_request_size: DEFAULT_MAX_REQUEST_SIZE,
            validate_headers: true,
        }
    }
}

/// Real-time synchronization hub configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Whether the hub participates in the chain.
    pub enabled: bool,
    /// Whether duplex (WebSocket) subscriptions are accepted.
    pub websocket_enabled: bool,
    /// Whether one-way (SSE) subscriptions are accepted.
    pub sse_enabled: bool,
    /// Heartbeat period in seconds.
    pub heartbeat_interval_secs: u64,
    /// Capacity of the broadcast channel and of each outbound queue.
    pub buffer_size: usize,
}

impl SyncConfig {
    /// Returns the heartbeat period as a [`Duration`].
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            websocket_enabled: true,
            sse_enabled: true,
            heartbeat_interval_secs: 30,
            buffer_size: 1000,
        }
    }
}

/// Agent session layer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Whether the session layer participates in the chain.
    pub enabled: bool,
    /// The backend agent endpoint messages are forwarded to.
    pub api_endpoint: String,
    /// API version string reported in status responses.
    pub version: String,
    /// Extra forward attempts after the first on transport errors or 5xx.
    pub max_retries: u32,
    /// Per-request backend deadline in seconds.
    pub timeout_seconds: u64,
    /// Inactivity threshold after which a session is eligible for eviction,
    /// in seconds.
    pub idle_timeout_secs: u64,
    /// Period of the idle-session sweep, in seconds.
    pub gc_interval_secs: u64,
}

impl SessionConfig {
    /// Returns the backend deadline as a [`Duration`].
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Returns the idle threshold as a [`Duration`].
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Returns the sweep period as a [`Duration`].
    #[must_use]
    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_endpoint: "http://localhost:8080/api/claude".to_string(),
            version: "1.0".to_string(),
            max_retries: 3,
            timeout_seconds: 30,
            idle_timeout_secs: 30 * 60,
            gc_interval_secs: 5 * 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        HermesConfig::default().validate().expect("default config");
    }

    #[test]
    fn empty_auth_secret_rejected_when_enabled() {
        let mut config = HermesConfig::default();
        config.auth.secret = String::new();
        assert!(config.validate().is_err());

        config.auth.enabled = false;
        config.validate().expect("disabled auth skips the check");
    }

    #[test]
    fn zero_request_size_rejected() {
        let mut config = HermesConfig::default();
        config.validation.max_request_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_sync_buffer_rejected() {
        let mut config = HermesConfig::default();
        config.sync.buffer_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_heartbeat_rejected() {
        let mut config = HermesConfig::default();
        config.sync.heartbeat_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_backend_endpoint_rejected() {
        let mut config = HermesConfig::default();
        config.session.api_endpoint = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = HermesConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: HermesConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let parsed: HermesConfig =
            serde_json::from_str(r#"{"validation":{"strict_mode":true}}"#).unwrap();
        assert!(parsed.validation.strict_mode);
        assert_eq!(
            parsed.validation.max_request_size,
            DEFAULT_MAX_REQUEST_SIZE
        );
        assert!(parsed.sync.websocket_enabled);
    }

    #[test]
    fn durations_derive_from_seconds() {
        let config = HermesConfig::default();
        assert_eq!(config.sync.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(config.session.timeout(), Duration::from_secs(30));
        assert_eq!(config.session.idle_timeout(), Duration::from_secs(1800));
        assert_eq!(config.auth.expiration(), Duration::from_secs(86400));
    }
}
