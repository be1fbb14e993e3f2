//! Bearer-token resource guard
//!
//! Per-request middleware for a protected resource: extracts the bearer
//! token from the `Authorization` header, verifies its signature against
//! the provider's key set, and runs the full claim validation. Any failure
//! short-circuits with 401 — or 403 for an insufficient scope, which is an
//! authorization rather than authentication failure — and the protected
//! handler never runs.

pub mod claims;
pub mod jwks;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

pub use claims::{AccessClaims, ClaimError, ExpectedClaims, validate};
pub use jwks::{JwksResolver, KeyResolver, KeyResolverError, VerificationKey};

/// Guard rejection reasons.
#[derive(Debug, Error)]
pub enum GuardError {
    /// No `Authorization` header on the request
    #[error("Missing Authorization Header")]
    MissingAuthorizationHeader,

    /// The token could not be decoded or its signature did not verify
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// A claim check failed
    #[error(transparent)]
    Claims(#[from] ClaimError),
}

impl GuardError {
    /// HTTP status for this rejection. Insufficient scope is the only 403;
    /// everything else is an authentication failure.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Claims(ClaimError::InsufficientScope) => StatusCode::FORBIDDEN,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for GuardError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// The validation pipeline for one protected resource.
pub struct ResourceGuard {
    resolver: Arc<dyn KeyResolver>,
    expected: ExpectedClaims,
}

impl ResourceGuard {
    /// Create a guard that validates against `expected` using keys from
    /// `resolver`.
    #[must_use]
    pub fn new(resolver: Arc<dyn KeyResolver>, expected: ExpectedClaims) -> Self {
        Self { resolver, expected }
    }

    /// Run the full check for one request's `Authorization` header value.
    ///
    /// # Errors
    ///
    /// Returns a [`GuardError`] naming the first failing step.
    pub async fn check(&self, auth_header: Option<&str>) -> Result<AccessClaims, GuardError> {
        let header_value = auth_header.ok_or(GuardError::MissingAuthorizationHeader)?;

        // Strip the literal "Bearer " scheme prefix. A header without the
        // prefix is passed through whole and fails signature verification.
        let token = header_value
            .strip_prefix("Bearer ")
            .unwrap_or(header_value);

        let claims = self.verify(token).await?;
        let now = unix_now();
        validate(&claims, &self.expected, now)?;

        Ok(claims)
    }

    /// Decode the token and verify its signature; claim checks are separate.
    async fn verify(&self, token: &str) -> Result<AccessClaims, GuardError> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| GuardError::InvalidToken(e.to_string()))?;

        let kid = header
            .kid
            .as_deref()
            .ok_or_else(|| GuardError::InvalidToken("missing 'kid' in header".to_string()))?;

        let vk = self
            .resolver
            .resolve(kid)
            .await
            .map_err(|e| GuardError::InvalidToken(format!("signature verification failed: {e}")))?;

        if header.alg != vk.algorithm {
            return Err(GuardError::InvalidToken(
                "algorithm does not match the published key".to_string(),
            ));
        }

        // Signature only. Claim validation runs afterwards, in a fixed
        // order, on the decoded claims.
        let mut validation = jsonwebtoken::Validation::new(vk.algorithm);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.leeway = 0;

        let data = jsonwebtoken::decode::<AccessClaims>(token, &vk.key, &validation)
            .map_err(|e| GuardError::InvalidToken(e.to_string()))?;

        Ok(data.claims)
    }
}

/// Seconds since the Unix epoch.
#[must_use]
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Axum middleware: validate the bearer token, inject the verified claims
/// into request extensions, or short-circuit with the guard's response.
pub async fn require_bearer(
    State(guard): State<Arc<ResourceGuard>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match guard.check(auth_header).await {
        Ok(verified) => {
            debug!(sub = verified.sub.as_deref().unwrap_or(""), "Authenticated request");
            request.extensions_mut().insert(verified);
            next.run(request).await
        }
        Err(err) => {
            warn!(error = %err, "Bearer token rejected");
            err.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};

    const SECRET: &[u8] = b"guard-test-secret";

    struct FixedKeyResolver;

    #[async_trait]
    impl KeyResolver for FixedKeyResolver {
        async fn resolve(&self, kid: &str) -> Result<VerificationKey, KeyResolverError> {
            if kid == "test-key" {
                Ok(VerificationKey {
                    key: DecodingKey::from_secret(SECRET),
                    algorithm: Algorithm::HS256,
                })
            } else {
                Err(KeyResolverError::UnknownKeyId(kid.to_string()))
            }
        }
    }

    fn sign(claims: &serde_json::Value) -> String {
        let mut header = jsonwebtoken::Header::new(Algorithm::HS256);
        header.kid = Some("test-key".to_string());
        jsonwebtoken::encode(&header, claims, &EncodingKey::from_secret(SECRET)).unwrap()
    }

    fn guard() -> ResourceGuard {
        ResourceGuard::new(
            Arc::new(FixedKeyResolver),
            ExpectedClaims {
                issuer: "https://idp.test/".to_string(),
                audience: "api:test".to_string(),
                required_scopes: vec!["test:read".to_string()],
            },
        )
    }

    fn valid_token() -> String {
        let now = unix_now();
        sign(&serde_json::json!({
            "iss": "https://idp.test/",
            "aud": "api:test",
            "exp": now + 600,
            "iat": now,
            "scp": ["test:read"]
        }))
    }

    #[tokio::test]
    async fn missing_header_is_rejected() {
        let err = guard().check(None).await.unwrap_err();
        assert!(matches!(err, GuardError::MissingAuthorizationHeader));
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn garbage_token_is_invalid() {
        let err = guard()
            .check(Some("Bearer not-a-jwt"))
            .await
            .unwrap_err();
        assert!(matches!(err, GuardError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn header_without_bearer_prefix_fails_verification_not_parsing() {
        // The whole header value is treated as the token.
        let err = guard().check(Some("Token abc")).await.unwrap_err();
        assert!(matches!(err, GuardError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn valid_token_is_accepted() {
        let token = valid_token();
        let claims = guard()
            .check(Some(&format!("Bearer {token}")))
            .await
            .unwrap();
        assert_eq!(claims.iss, "https://idp.test/");
    }

    #[tokio::test]
    async fn unknown_kid_fails_signature_step() {
        let now = unix_now();
        let mut header = jsonwebtoken::Header::new(Algorithm::HS256);
        header.kid = Some("rotated-away".to_string());
        let token = jsonwebtoken::encode(
            &header,
            &serde_json::json!({
                "iss": "https://idp.test/", "aud": "api:test",
                "exp": now + 600, "iat": now
            }),
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();

        let err = guard()
            .check(Some(&format!("Bearer {token}")))
            .await
            .unwrap_err();
        assert!(matches!(err, GuardError::InvalidToken(_)));
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn tampered_token_is_rejected() {
        let mut token = valid_token();
        // Flip a character in the signature segment.
        let flipped = if token.ends_with('a') { 'b' } else { 'a' };
        token.pop();
        token.push(flipped);

        let err = guard()
            .check(Some(&format!("Bearer {token}")))
            .await
            .unwrap_err();
        assert!(matches!(err, GuardError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn insufficient_scope_is_forbidden_not_unauthorized() {
        let now = unix_now();
        let token = sign(&serde_json::json!({
            "iss": "https://idp.test/",
            "aud": "api:test",
            "exp": now + 600,
            "iat": now,
            "scp": ["test:write"]
        }));

        let err = guard()
            .check(Some(&format!("Bearer {token}")))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GuardError::Claims(ClaimError::InsufficientScope)
        ));
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn expired_token_is_unauthorized() {
        let now = unix_now();
        let token = sign(&serde_json::json!({
            "iss": "https://idp.test/",
            "aud": "api:test",
            "exp": now - 1,
            "iat": now - 600,
            "scp": ["test:read"]
        }));

        let err = guard()
            .check(Some(&format!("Bearer {token}")))
            .await
            .unwrap_err();
        assert!(matches!(err, GuardError::Claims(ClaimError::TokenExpired)));
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }
}
