//! OIDC provider metadata discovery
//!
//! Fetches the provider's published discovery document
//! (`/.well-known/openid-configuration`) once at startup. The document is
//! the single source for the authorization, token, JWKS and end-session
//! endpoints; none of them are hand-built from the issuer URL.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// OIDC discovery document (the subset this broker consumes)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Issuer URL as published by the provider
    pub issuer: String,

    /// Authorization endpoint URL
    pub authorization_endpoint: String,

    /// Token endpoint URL
    pub token_endpoint: String,

    /// JSON Web Key Set endpoint URL
    pub jwks_uri: String,

    /// Userinfo endpoint (optional)
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,

    /// RP-initiated logout endpoint (optional)
    #[serde(default)]
    pub end_session_endpoint: Option<String>,

    /// Supported PKCE code challenge methods
    #[serde(default)]
    pub code_challenge_methods_supported: Vec<String>,
}

impl ProviderMetadata {
    /// Discover provider metadata from the issuer URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Discovery`] if the document is unreachable or does
    /// not parse. Callers treat this as startup-fatal.
    pub async fn discover(client: &Client, issuer: &str) -> Result<Self> {
        let url = format!(
            "{}/.well-known/openid-configuration",
            issuer.trim_end_matches('/')
        );
        debug!(url = %url, "Discovering OIDC provider metadata");

        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Discovery(format!("Failed to fetch discovery document: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Discovery(format!(
                "Discovery document fetch failed: HTTP {}",
                response.status()
            )));
        }

        let metadata: Self = response
            .json()
            .await
            .map_err(|e| Error::Discovery(format!("Failed to parse discovery document: {e}")))?;

        debug!(issuer = %metadata.issuer, "Discovered OIDC provider");
        Ok(metadata)
    }

    /// Check if the provider advertises S256 PKCE support.
    #[must_use]
    pub fn supports_pkce(&self) -> bool {
        self.code_challenge_methods_supported
            .contains(&"S256".to_string())
    }
}
