//! PKCE flow controller
//!
//! Orchestrates one login attempt across its two phases: `login` generates
//! the proof verifier, binds it to the caller's session and builds the
//! authorization redirect; `callback` redeems the returned code together
//! with the stored verifier at the provider's token endpoint and writes the
//! resulting tokens back into the session.
//!
//! Every step returns a typed value or a [`FlowError`]; translating those
//! into redirects and status codes is the HTTP layer's job.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::guard::{ExpectedClaims, KeyResolver, validate};
use crate::session::{Session, keys};
use crate::{Error, Result};

use super::metadata::ProviderMetadata;
use super::pkce;

/// Client registration values and flow parameters, from configuration.
#[derive(Debug, Clone)]
pub struct OAuthClientSettings {
    /// OAuth2 client identifier
    pub client_id: String,
    /// OAuth2 client secret
    pub client_secret: String,
    /// Registered redirect URI for the callback phase
    pub redirect_url: String,
    /// Scopes requested at authorization time
    pub scopes: Vec<String>,
    /// Optional audience parameter identifying the target API
    pub audience: Option<String>,
    /// Where the provider should send the browser after its own logout
    pub post_logout_redirect_url: Option<String>,
}

/// Token endpoint response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSet {
    /// Bearer credential for the resource server
    pub access_token: String,
    /// Signed identity token, when `openid` scope was granted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    /// Refresh credential, when `offline_access` was granted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

/// Failures within one login attempt.
#[derive(Debug, Error)]
pub enum FlowError {
    /// The callback arrived without an authorization code
    #[error("missing authorization code")]
    MissingAuthorizationCode,

    /// The callback has no session, or the session holds no verifier
    #[error("missing session or verifier")]
    MissingSessionOrVerifier,

    /// The callback supplied a state value that does not match the session
    #[error("state parameter mismatch")]
    StateMismatch,

    /// The direct-exchange variant is missing code, verifier or redirect URI
    #[error("missing parameters: code, verifier and redirectUri are required")]
    MissingParameters,

    /// The provider rejected the exchange, or it could not be reached
    #[error("token exchange failed: {0}")]
    TokenExchangeFailed(String),

    /// Identity verification failed; no partial claim data is exposed
    #[error("unauthorized")]
    Unauthorized,
}

/// Drives the Authorization-Code-with-PKCE exchange for one provider.
pub struct FlowController {
    http: reqwest::Client,
    provider: ProviderMetadata,
    settings: OAuthClientSettings,
    resolver: Arc<dyn KeyResolver>,
    authorize_url: Url,
}

impl FlowController {
    /// Build a controller from discovered provider metadata.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Discovery`] if the provider's authorization endpoint
    /// is not a valid URL. Callers treat this as startup-fatal.
    pub fn new(
        http: reqwest::Client,
        provider: ProviderMetadata,
        settings: OAuthClientSettings,
        resolver: Arc<dyn KeyResolver>,
    ) -> Result<Self> {
        let authorize_url = Url::parse(&provider.authorization_endpoint).map_err(|e| {
            Error::Discovery(format!("invalid authorization endpoint URL: {e}"))
        })?;

        Ok(Self {
            http,
            provider,
            settings,
            resolver,
            authorize_url,
        })
    }

    /// Phase one: bind a fresh verifier and state to the session and build
    /// the authorization redirect URL.
    ///
    /// The caller must persist the session before issuing the redirect; a
    /// login that redirects without saved state cannot be completed.
    #[must_use]
    pub fn login(&self, session: &mut Session, name: &str) -> Url {
        let verifier = pkce::generate_verifier();
        let challenge = pkce::challenge(&verifier);
        let state = pkce::generate_state();

        session.set(keys::USER, name);
        session.set(keys::VERIFIER, &verifier);
        session.set(keys::STATE, &state);

        let mut url = self.authorize_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.settings.client_id)
                .append_pair("redirect_uri", &self.settings.redirect_url)
                .append_pair("scope", &self.settings.scopes.join(" "))
                .append_pair("state", &state)
                .append_pair("code_challenge", &challenge)
                .append_pair("code_challenge_method", "S256");
            if let Some(audience) = &self.settings.audience {
                query.append_pair("audience", audience);
            }
        }

        debug!(user = name, "Login started, redirecting to provider");
        url
    }

    /// Phase two: redeem the authorization code with the stored verifier.
    ///
    /// The verifier is consumed whether or not the exchange succeeds; a
    /// failed exchange requires a fresh `/login`, not a replay. On success
    /// the tokens are stored into the session.
    ///
    /// # Errors
    ///
    /// Returns a [`FlowError`] naming the failing step. No token exchange is
    /// attempted unless code, verifier and (when supplied) state all check
    /// out.
    pub async fn callback(
        &self,
        session: &mut Session,
        code: Option<&str>,
        state: Option<&str>,
    ) -> std::result::Result<(), FlowError> {
        let code = match code {
            Some(c) if !c.is_empty() => c,
            _ => return Err(FlowError::MissingAuthorizationCode),
        };

        // The provider is not obliged to echo state back; when it does, it
        // must match what this session's login stored.
        let stored_state = session.take(keys::STATE);
        if let Some(returned) = state
            && stored_state.as_deref() != Some(returned)
        {
            warn!("Callback state does not match session state");
            return Err(FlowError::StateMismatch);
        }

        let verifier = session
            .take(keys::VERIFIER)
            .filter(|v| !v.is_empty())
            .ok_or(FlowError::MissingSessionOrVerifier)?;

        let tokens = self.exchange(code, &verifier, None).await?;

        session.set(keys::ACCESS_TOKEN, &tokens.access_token);
        if let Some(id_token) = &tokens.id_token {
            session.set(keys::ID_TOKEN, id_token);
        }
        if let Some(refresh_token) = &tokens.refresh_token {
            session.set(keys::REFRESH_TOKEN, refresh_token);
        }

        debug!("Authorization code exchanged, tokens stored in session");
        Ok(())
    }

    /// Direct exchange variant for callers that held the verifier
    /// themselves (native and SPA clients). All three parameters are
    /// required; `redirect_uri` is forwarded to the token endpoint since the
    /// provider validates it against the authorization request.
    ///
    /// # Errors
    ///
    /// [`FlowError::MissingParameters`] if any parameter is absent or empty;
    /// [`FlowError::TokenExchangeFailed`] if the provider rejects the code.
    pub async fn exchange_direct(
        &self,
        code: Option<&str>,
        verifier: Option<&str>,
        redirect_uri: Option<&str>,
    ) -> std::result::Result<TokenSet, FlowError> {
        let (Some(code), Some(verifier), Some(redirect_uri)) = (code, verifier, redirect_uri)
        else {
            return Err(FlowError::MissingParameters);
        };
        if code.is_empty() || verifier.is_empty() || redirect_uri.is_empty() {
            return Err(FlowError::MissingParameters);
        }

        self.exchange(code, verifier, Some(redirect_uri)).await
    }

    /// Verify the session's ID token and return the display name claim.
    ///
    /// # Errors
    ///
    /// [`FlowError::Unauthorized`] if the session holds no ID token or any
    /// verification step fails. Unverified claim data is never returned.
    pub async fn whoami(&self, session: &Session) -> std::result::Result<String, FlowError> {
        let id_token = session.get(keys::ID_TOKEN).ok_or(FlowError::Unauthorized)?;

        let header =
            jsonwebtoken::decode_header(id_token).map_err(|_| FlowError::Unauthorized)?;
        let kid = header.kid.as_deref().ok_or(FlowError::Unauthorized)?;

        let vk = self
            .resolver
            .resolve(kid)
            .await
            .map_err(|_| FlowError::Unauthorized)?;
        if header.alg != vk.algorithm {
            return Err(FlowError::Unauthorized);
        }

        let mut validation = jsonwebtoken::Validation::new(vk.algorithm);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;

        let data = jsonwebtoken::decode::<crate::guard::AccessClaims>(
            id_token,
            &vk.key,
            &validation,
        )
        .map_err(|_| FlowError::Unauthorized)?;

        // An ID token's audience is the client itself; no scopes apply.
        let expected = ExpectedClaims {
            issuer: self.provider.issuer.clone(),
            audience: self.settings.client_id.clone(),
            required_scopes: Vec::new(),
        };
        validate(&data.claims, &expected, crate::guard::unix_now())
            .map_err(|_| FlowError::Unauthorized)?;

        data.claims
            .name
            .or(data.claims.sub)
            .ok_or(FlowError::Unauthorized)
    }

    /// Provider-side logout URL, when the provider publishes an end-session
    /// endpoint. Local session clearing never depends on this.
    #[must_use]
    pub fn logout_url(&self) -> Option<Url> {
        let endpoint = self.provider.end_session_endpoint.as_deref()?;
        let mut url = Url::parse(endpoint).ok()?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("client_id", &self.settings.client_id);
            if let Some(return_to) = &self.settings.post_logout_redirect_url {
                query.append_pair("returnTo", return_to);
            }
        }
        Some(url)
    }

    /// Redeem `code` + `verifier` at the token endpoint.
    async fn exchange(
        &self,
        code: &str,
        verifier: &str,
        redirect_override: Option<&str>,
    ) -> std::result::Result<TokenSet, FlowError> {
        let redirect_uri = redirect_override.unwrap_or(&self.settings.redirect_url);

        let form = [
            ("grant_type", "authorization_code"),
            ("client_id", &self.settings.client_id),
            ("client_secret", &self.settings.client_secret),
            ("code", code),
            ("code_verifier", verifier),
            ("redirect_uri", redirect_uri),
        ];

        let response = self
            .http
            .post(&self.provider.token_endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|e| FlowError::TokenExchangeFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "Token endpoint rejected the exchange");
            return Err(FlowError::TokenExchangeFailed(format!(
                "token endpoint returned HTTP {status}: {body}"
            )));
        }

        response
            .json::<TokenSet>()
            .await
            .map_err(|e| FlowError::TokenExchangeFailed(format!("invalid token response: {e}")))
    }
}
