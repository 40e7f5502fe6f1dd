//! Authentication.
//!
//! Two modes: **bearer** (HMAC-signed claims tokens) and **api_key**
//! (opaque keys resolved against an in-memory registry). On success the
//! principal is written into the request context; on failure the request
//! short-circuits with a 401 envelope carrying a single-line reason.

use std::collections::HashMap;
use std::sync::Arc;

use hermes_core::{AuthConfig, AuthMode, HermesError, HermesResult, RequestContext};
use http::header::AUTHORIZATION;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use parking_lot::{Mutex, RwLock};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::middleware::{BoxFuture, HandlerResult, Middleware, Next};
use crate::types::Request;

/// Paths that skip mandatory authentication.
///
/// `/health` accepts optional credentials; `/auth/login` is where
/// credentials come from in the first place.
const EXEMPT_PATHS: [&str; 2] = ["/health", "/auth/login"];

/// Claims carried in a bearer token.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenClaims {
    /// The authenticated principal.
    pub principal_id: String,
    /// Token issuer, matched against the configured issuer.
    pub iss: String,
    /// Expiry as a Unix timestamp.
    pub exp: i64,
    /// Issued-at as a Unix timestamp.
    pub iat: i64,
}

/// Verifies credentials and manages tokens and API keys.
pub struct Authenticator {
    config: RwLock<AuthConfig>,
    api_keys: Mutex<HashMap<String, String>>,
}

impl Authenticator {
    /// Creates an authenticator with the given configuration.
    #[must_use]
    pub fn new(config: AuthConfig) -> Self {
        Self {
            config: RwLock::new(config),
            api_keys: Mutex::new(HashMap::new()),
        }
    }

    /// Reapplies a configuration snapshot.
    pub fn configure(&self, config: AuthConfig) {
        *self.config.write() = config;
    }

    /// Returns a copy of the current configuration.
    #[must_use]
    pub fn config(&self) -> AuthConfig {
        self.config.read().clone()
    }

    /// Authenticates a request, returning the principal ID.
    ///
    /// # Errors
    ///
    /// Returns an authentication error with a single-line reason on any
    /// missing, malformed, expired, or unknown credential.
    pub fn authenticate(&self, request: &Request) -> HermesResult<String> {
        let mode = self.config.read().mode;
        match mode {
            AuthMode::Bearer => {
                let token = extract_bearer(request)?;
                self.verify_token(&token)
            }
            AuthMode::ApiKey => {
                let key = extract_api_key(request)?;
                self.verify_api_key(&key)
            }
        }
    }

    /// Returns `true` if the request carries a credential for the current
    /// mode, without verifying it.
    #[must_use]
    pub fn has_credential(&self, request: &Request) -> bool {
        match self.config.read().mode {
            AuthMode::Bearer => request.headers().contains_key(AUTHORIZATION),
            AuthMode::ApiKey => extract_api_key(request).is_ok(),
        }
    }

    /// Issues a bearer token for a principal.
    ///
    /// Returns the encoded token and its lifetime in seconds.
    ///
    /// # Errors
    ///
    /// Returns an internal error if signing fails.
    pub fn issue_token(&self, principal_id: &str) -> HermesResult<(String, u64)> {
        let config = self.config.read().clone();
        let now = chrono::Utc::now().timestamp();
        let claims = TokenClaims {
            principal_id: principal_id.to_string(),
            iss: config.issuer.clone(),
            exp: now + config.expiration_secs as i64,
            iat: now,
        };

        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(config.secret.as_bytes()),
        )
        .map_err(|e| HermesError::internal_with_source("failed to sign token", e))?;

        Ok((token, config.expiration_secs))
    }

    /// Verifies a bearer token and returns its principal.
    pub fn verify_token(&self, token: &str) -> HermesResult<String> {
        let config = self.config.read().clone();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_issuer(&[&config.issuer]);
        validation.set_required_spec_claims(&["exp", "iss"]);

        let data = decode::<TokenClaims>(
            token,
            &DecodingKey::from_secret(config.secret.as_bytes()),
            &validation,
        )
        .map_err(|_| HermesError::authentication("invalid or expired bearer token"))?;

        let now = chrono::Utc::now().timestamp();
        if data.claims.iat > now {
            return Err(HermesError::authentication("token not yet valid"));
        }

        Ok(data.claims.principal_id)
    }

    /// Mints a new API key for a principal and registers it.
    #[must_use]
    pub fn mint_api_key(&self, principal_id: &str) -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let key = hex::encode(bytes);

        self.api_keys
            .lock()
            .insert(key.clone(), principal_id.to_string());
        key
    }

    /// Revokes an API key. Unknown keys are a no-op.
    pub fn revoke_api_key(&self, key: &str) {
        self.api_keys.lock().remove(key);
    }

    /// Resolves an API key to its principal.
    fn verify_api_key(&self, key: &str) -> HermesResult<String> {
        self.api_keys
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| HermesError::authentication("unknown API key"))
    }
}

fn extract_bearer(request: &Request) -> HermesResult<String> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| HermesError::authentication("missing authorization header"))?;

    match header.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() => {
            Ok(token.to_string())
        }
        _ => Err(HermesError::authentication(
            "invalid authorization header format",
        )),
    }
}

fn extract_api_key(request: &Request) -> HermesResult<String> {
    if let Some(key) = request
        .headers()
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok())
    {
        if !key.is_empty() {
            return Ok(key.to_string());
        }
    }

    if let Some(query) = request.uri().query() {
        for pair in query.split('&') {
            if let Some(value) = pair.strip_prefix("api_key=") {
                if !value.is_empty() {
                    return Ok(value.to_string());
                }
            }
        }
    }

    Err(HermesError::authentication("missing API key"))
}

/// The authentication stage.
pub struct AuthStage {
    authenticator: Arc<Authenticator>,
}

impl AuthStage {
    /// Creates the stage around a shared authenticator.
    #[must_use]
    pub fn new(authenticator: Arc<Authenticator>) -> Self {
        Self { authenticator }
    }

    /// Returns the shared authenticator.
    #[must_use]
    pub fn authenticator(&self) -> Arc<Authenticator> {
        Arc::clone(&self.authenticator)
    }
}

impl Middleware for AuthStage {
    fn name(&self) -> &'static str {
        "auth"
    }

    fn enabled(&self) -> bool {
        self.authenticator.config.read().enabled
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            let path = request.uri().path().to_string();

            if EXEMPT_PATHS.contains(&path.as_str()) {
                // Optional auth: enrich the context when a valid credential
                // is present, proceed anonymously otherwise.
                if self.authenticator.has_credential(&request) {
                    if let Ok(principal) = self.authenticator.authenticate(&request) {
                        ctx.set_principal_id(principal);
                    }
                }
                return next.run(ctx, request).await;
            }

            match self.authenticator.authenticate(&request) {
                Ok(principal) => {
                    tracing::debug!(
                        request_id = %ctx.request_id(),
                        principal_id = %principal,
                        "request authenticated",
                    );
                    ctx.set_principal_id(principal);
                    next.run(ctx, request).await
                }
                Err(err) => {
                    tracing::debug!(request_id = %ctx.request_id(), "authentication failed");
                    Err(err)
                }
            }
        })
    }
}
