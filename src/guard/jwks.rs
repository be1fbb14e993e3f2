//! Signing-key resolution — JWKS fetch, cache, and kid lookup
//!
//! The resolver holds the provider's published key set as process-wide,
//! read-mostly state shared by every concurrent validation. A `kid` missing
//! from the cached set triggers exactly one refresh fetch before failing,
//! which tolerates legitimate key rotation without letting a flood of bogus
//! key ids turn into a refetch storm. Concurrent unknown-kid events share a
//! single refresh via the refresh guard.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::{
    Algorithm, DecodingKey,
    jwk::{AlgorithmParameters, EllipticCurve, JwkSet, KeyAlgorithm},
};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from key resolution.
#[derive(Debug, Error)]
pub enum KeyResolverError {
    /// The `kid` is not in the key set, even after a refresh
    #[error("unknown key id: {0}")]
    UnknownKeyId(String),

    /// The key exists but uses an unsupported key type or algorithm
    #[error("unsupported key type for key id: {0}")]
    UnsupportedKey(String),

    /// Network or HTTP error while fetching the key set
    #[error("key set fetch failed: {0}")]
    Fetch(String),
}

/// A verification key resolved for one token.
///
/// The algorithm comes from the key set, not from the token header, so a
/// token cannot talk the guard into a weaker algorithm than the key was
/// published for.
#[derive(Debug, Clone)]
pub struct VerificationKey {
    /// The decoding key
    pub key: DecodingKey,
    /// The signature algorithm this key verifies
    pub algorithm: Algorithm,
}

/// Resolves a token's key id to a verification key.
///
/// Injectable seam: production uses [`JwksResolver`]; tests substitute a
/// fixed key set.
#[async_trait]
pub trait KeyResolver: Send + Sync {
    /// Resolve `kid` to a verification key.
    async fn resolve(&self, kid: &str) -> Result<VerificationKey, KeyResolverError>;
}

struct CachedJwks {
    keys: JwkSet,
    fetched_at: Instant,
}

/// Key resolver backed by the provider's JWKS endpoint.
pub struct JwksResolver {
    http: reqwest::Client,
    jwks_uri: String,
    cached: parking_lot::RwLock<Option<Arc<CachedJwks>>>,
    /// Serializes refresh fetches (single flight).
    refresh_lock: tokio::sync::Mutex<()>,
    /// Minimum age before an unknown kid may trigger another fetch.
    refresh_cooldown: Duration,
}

impl JwksResolver {
    /// Create a resolver for the given JWKS endpoint.
    #[must_use]
    pub fn new(http: reqwest::Client, jwks_uri: String) -> Self {
        Self {
            http,
            jwks_uri,
            cached: parking_lot::RwLock::new(None),
            refresh_lock: tokio::sync::Mutex::new(()),
            refresh_cooldown: Duration::from_secs(30),
        }
    }

    /// Fetch the key set once, replacing the cache.
    ///
    /// Called at startup so a provider outage is visible at boot, and again
    /// on unknown `kid`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyResolverError::Fetch`] if the endpoint is unreachable or
    /// returns an unparsable document.
    pub async fn refresh(&self) -> Result<(), KeyResolverError> {
        debug!(jwks_uri = %self.jwks_uri, "Fetching JWKS");

        let keys: JwkSet = self
            .http
            .get(&self.jwks_uri)
            .send()
            .await
            .map_err(|e| KeyResolverError::Fetch(e.to_string()))?
            .json()
            .await
            .map_err(|e| KeyResolverError::Fetch(e.to_string()))?;

        *self.cached.write() = Some(Arc::new(CachedJwks {
            keys,
            fetched_at: Instant::now(),
        }));

        Ok(())
    }

    fn lookup(&self, kid: &str) -> Option<Result<VerificationKey, KeyResolverError>> {
        let cached = self.cached.read().clone()?;
        find_key(&cached.keys, kid)
    }

    fn cache_age(&self) -> Option<Duration> {
        self.cached
            .read()
            .as_ref()
            .map(|c| c.fetched_at.elapsed())
    }
}

#[async_trait]
impl KeyResolver for JwksResolver {
    async fn resolve(&self, kid: &str) -> Result<VerificationKey, KeyResolverError> {
        // Fast path: read-mostly cache, no locking beyond the RwLock read.
        if let Some(found) = self.lookup(kid) {
            return found;
        }

        // Unknown kid: refresh once, under a single-flight guard.
        let _guard = self.refresh_lock.lock().await;

        // Another task may have refreshed while we waited; a fresh-enough
        // cache that still lacks the kid means the key does not exist.
        if let Some(found) = self.lookup(kid) {
            return found;
        }
        if self.cache_age().is_some_and(|age| age < self.refresh_cooldown) {
            return Err(KeyResolverError::UnknownKeyId(kid.to_string()));
        }

        debug!(kid = %kid, "Key not found in cached JWKS, refreshing");
        if let Err(e) = self.refresh().await {
            warn!(error = %e, "JWKS refresh failed");
            return Err(e);
        }

        self.lookup(kid)
            .unwrap_or_else(|| Err(KeyResolverError::UnknownKeyId(kid.to_string())))
    }
}

/// Find a JWK by `kid` and convert it to a [`VerificationKey`].
fn find_key(jwks: &JwkSet, kid: &str) -> Option<Result<VerificationKey, KeyResolverError>> {
    let jwk = jwks
        .keys
        .iter()
        .find(|j| j.common.key_id.as_deref() == Some(kid))?;

    let converted = match &jwk.algorithm {
        AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e)
            .ok()
            .map(|key| VerificationKey {
                key,
                algorithm: rsa_algorithm(jwk.common.key_algorithm),
            }),
        AlgorithmParameters::EllipticCurve(ec) => DecodingKey::from_ec_components(&ec.x, &ec.y)
            .ok()
            .and_then(|key| {
                ec_algorithm(&ec.curve).map(|algorithm| VerificationKey { key, algorithm })
            }),
        AlgorithmParameters::OctetKey(_) | AlgorithmParameters::OctetKeyPair(_) => None,
    };

    Some(converted.ok_or_else(|| KeyResolverError::UnsupportedKey(kid.to_string())))
}

fn rsa_algorithm(key_algorithm: Option<KeyAlgorithm>) -> Algorithm {
    match key_algorithm {
        Some(KeyAlgorithm::RS384) => Algorithm::RS384,
        Some(KeyAlgorithm::RS512) => Algorithm::RS512,
        Some(KeyAlgorithm::PS256) => Algorithm::PS256,
        Some(KeyAlgorithm::PS384) => Algorithm::PS384,
        Some(KeyAlgorithm::PS512) => Algorithm::PS512,
        _ => Algorithm::RS256,
    }
}

fn ec_algorithm(curve: &EllipticCurve) -> Option<Algorithm> {
    match curve {
        EllipticCurve::P256 => Some(Algorithm::ES256),
        EllipticCurve::P384 => Some(Algorithm::ES384),
        _ => None,
    }
}
