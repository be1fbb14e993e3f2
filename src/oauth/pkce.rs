//! PKCE proof-key generation (RFC 7636)

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngExt;
use sha2::{Digest, Sha256};

/// Generate a fresh PKCE code verifier.
///
/// 32 random bytes, base64url-encoded without padding (43 characters,
/// within the RFC 7636 43-128 range). The verifier never leaves the
/// server; only its challenge is sent to the provider.
#[must_use]
pub fn generate_verifier() -> String {
    let verifier_bytes: [u8; 32] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(verifier_bytes)
}

/// Compute the S256 challenge for a verifier.
///
/// `challenge = BASE64URL(SHA256(verifier))`
#[must_use]
pub fn challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Generate a random `state` parameter for CSRF binding.
#[must_use]
pub fn generate_state() -> String {
    let state_bytes: [u8; 16] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(state_bytes)
}
