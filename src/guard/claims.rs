//! Access-token claim validation
//!
//! Pure claim checks over already-decoded token payloads: issuer, audience,
//! time bounds and authorization scope. Signature trust is the key
//! resolver's job; nothing here performs I/O or mutates state, so every
//! check is testable without a network.
//!
//! The authorization-scope claim arrives in one of three encodings depending
//! on which issuance path produced the token: a space-delimited string under
//! `scope`, a string list under `scp`, or a string list under `permissions`.
//! The shapes are resolved once at decode time into a normalized set of
//! granted scopes; the validator never re-inspects raw shapes.

use std::collections::BTreeSet;

use serde::Deserialize;
use thiserror::Error;

/// A claim check that failed.
///
/// Messages name the failing check but never key material or expected
/// secret values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClaimError {
    /// `iss` does not equal the expected issuer
    #[error("invalid issuer")]
    InvalidIssuer,

    /// `aud` does not contain the expected audience
    #[error("invalid audience")]
    InvalidAudience,

    /// The token's expiry has passed
    #[error("token has expired")]
    TokenExpired,

    /// The token claims to be issued in the future (or carries no `iat`)
    #[error("token is not yet valid")]
    TokenNotYetValid,

    /// A required scope is granted under none of the supported encodings
    #[error("insufficient scope")]
    InsufficientScope,
}

/// Decoded, unverified-until-checked token claims.
///
/// `aud` is kept as a raw JSON value because providers emit either a single
/// string or an array of strings.
#[derive(Debug, Clone, Deserialize)]
pub struct AccessClaims {
    /// Issuer
    #[serde(default)]
    pub iss: String,

    /// Audience (string or array of strings)
    #[serde(default)]
    pub aud: serde_json::Value,

    /// Expiry (Unix seconds)
    #[serde(default)]
    pub exp: u64,

    /// Issued-at (Unix seconds)
    #[serde(default)]
    pub iat: Option<u64>,

    /// Subject
    #[serde(default)]
    pub sub: Option<String>,

    /// Display name (ID tokens)
    #[serde(default)]
    pub name: Option<String>,

    /// Scope encoding 1: space-delimited string
    #[serde(default)]
    pub scope: Option<String>,

    /// Scope encoding 2: list of scope strings
    #[serde(default)]
    pub scp: Option<Vec<String>>,

    /// Scope encoding 3: list of permission strings
    #[serde(default)]
    pub permissions: Option<Vec<String>>,
}

impl AccessClaims {
    /// Normalize the scope claim into a set of granted scope strings.
    ///
    /// A token normally carries exactly one of the three encodings; if it
    /// carries several, the union is granted.
    #[must_use]
    pub fn granted_scopes(&self) -> BTreeSet<&str> {
        let mut granted = BTreeSet::new();

        if let Some(ref scope) = self.scope {
            granted.extend(scope.split_whitespace());
        }
        if let Some(ref scp) = self.scp {
            granted.extend(scp.iter().map(String::as_str));
        }
        if let Some(ref permissions) = self.permissions {
            granted.extend(permissions.iter().map(String::as_str));
        }

        granted
    }
}

/// The values a token must match to be accepted.
#[derive(Debug, Clone)]
pub struct ExpectedClaims {
    /// Exact expected issuer
    pub issuer: String,
    /// Audience the token must include
    pub audience: String,
    /// Scopes the token must grant
    pub required_scopes: Vec<String>,
}

/// Validate claims against expected values at time `now` (Unix seconds).
///
/// Checks run in a fixed order and short-circuit on the first failure:
/// issuer, audience, expiry, issued-at, scopes. All five are mandatory.
/// A token is accepted while `now < exp` and rejected from `now == exp`.
///
/// # Errors
///
/// Returns the [`ClaimError`] for the first failing check.
pub fn validate(
    claims: &AccessClaims,
    expected: &ExpectedClaims,
    now: u64,
) -> Result<(), ClaimError> {
    if claims.iss != expected.issuer {
        return Err(ClaimError::InvalidIssuer);
    }

    if !audience_contains(&claims.aud, &expected.audience) {
        return Err(ClaimError::InvalidAudience);
    }

    if now >= claims.exp {
        return Err(ClaimError::TokenExpired);
    }

    // Reject tokens claiming to be issued in the future (clock-skew abuse
    // or forgery). A missing iat is rejected as well.
    match claims.iat {
        Some(iat) if iat <= now => {}
        _ => return Err(ClaimError::TokenNotYetValid),
    }

    let granted = claims.granted_scopes();
    for required in &expected.required_scopes {
        if !granted.contains(required.as_str()) {
            return Err(ClaimError::InsufficientScope);
        }
    }

    Ok(())
}

/// Whether the `aud` claim (string or array) contains the expected audience.
fn audience_contains(aud: &serde_json::Value, expected: &str) -> bool {
    match aud {
        serde_json::Value::String(s) => s == expected,
        serde_json::Value::Array(arr) => arr
            .iter()
            .any(|v| v.as_str().is_some_and(|s| s == expected)),
        _ => false,
    }
}
