//! Login broker HTTP surface
//!
//! Route contract:
//!
//! | Route | Behavior |
//! |---|---|
//! | `GET /login?name=` | start a PKCE flow, redirect to the provider |
//! | `GET /oauth-callback?code=&state=` | redeem the code, redirect to `/profile` |
//! | `GET /oauth-exchange?code=&verifier=&redirectUri=` | sessionless direct exchange, JSON |
//! | `GET /profile` | stored access token as JSON, 401 if absent |
//! | `GET /tokens` | all stored tokens as JSON, 401 if absent |
//! | `GET /whoami` | verified ID-token identity, 401 on failure |
//! | `GET /logout` | clear the session, redirect to provider logout |
//! | `GET /whoops?error=` | generic error display, 500 |
//!
//! Flow logic lives in [`FlowController`]; this layer only translates typed
//! outcomes into redirects, cookies and status codes.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::get,
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::{Config, SessionConfig};
use crate::guard::JwksResolver;
use crate::oauth::{FlowController, FlowError, OAuthClientSettings, ProviderMetadata};
use crate::session::cookie::{clear_session_cookie, session_cookie};
use crate::session::redis::RedisSessionStore;
use crate::session::{Session, SessionStore, generate_session_id, keys};
use crate::{Error, Result};

/// Shared broker state
pub struct AppState {
    /// Session persistence
    pub store: Arc<dyn SessionStore>,
    /// PKCE flow orchestration
    pub flow: Arc<FlowController>,
    /// Cookie and TTL settings
    pub session: SessionConfig,
}

impl AppState {
    fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session.max_age_secs)
    }
}

/// Create the broker router
pub fn create_broker_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/login", get(login_handler))
        .route("/oauth-callback", get(callback_handler))
        .route("/oauth-exchange", get(exchange_handler))
        .route("/profile", get(profile_handler))
        .route("/tokens", get(tokens_handler))
        .route("/whoami", get(whoami_handler))
        .route("/logout", get(logout_handler))
        .route("/whoops", get(whoops_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the broker server. Discovery failure is startup-fatal.
pub async fn run_broker(config: Config) -> Result<()> {
    let http = super::provider_client()?;

    let provider = ProviderMetadata::discover(&http, &config.oidc.issuer).await?;
    if !provider.supports_pkce() {
        warn!("Provider does not advertise S256 PKCE support");
    }

    let resolver = Arc::new(JwksResolver::new(http.clone(), provider.jwks_uri.clone()));
    if let Err(e) = resolver.refresh().await {
        // Non-fatal: the resolver refreshes on demand at first use.
        warn!(error = %e, "Initial JWKS fetch failed");
    }

    let store = RedisSessionStore::connect(
        &config.session.redis_url,
        Duration::from_secs(config.session.op_timeout_secs),
    )
    .await
    .map_err(|e| Error::SessionStore(e.to_string()))?;

    let settings = OAuthClientSettings {
        client_id: config.oidc.client_id.clone(),
        client_secret: config.oidc.client_secret.clone(),
        redirect_url: config.broker.redirect_url.clone(),
        scopes: config.oidc.scopes.clone(),
        audience: config.oidc.audience.clone(),
        post_logout_redirect_url: config.broker.post_logout_redirect_url.clone(),
    };
    let flow = FlowController::new(http, provider, settings, resolver)?;

    let state = Arc::new(AppState {
        store: Arc::new(store),
        flow: Arc::new(flow),
        session: config.session.clone(),
    });

    info!(issuer = %config.oidc.issuer, "Login broker starting");
    super::serve(create_broker_router(state), config.broker.port).await
}

#[derive(Debug, Deserialize)]
struct LoginParams {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExchangeParams {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    verifier: Option<String>,
    #[serde(default, rename = "redirectUri")]
    redirect_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WhoopsParams {
    #[serde(default)]
    error: Option<String>,
}

/// Load the session identified by the request's cookie, if any.
async fn load_session(
    state: &AppState,
    jar: &CookieJar,
) -> std::result::Result<Option<(String, Session)>, Response> {
    let Some(cookie) = jar.get(&state.session.cookie.name) else {
        return Ok(None);
    };
    let id = cookie.value().to_string();

    match state.store.load(&id).await {
        Ok(Some(session)) => Ok(Some((id, session))),
        Ok(None) => Ok(None),
        Err(e) => {
            error!(error = %e, "Session load failed");
            Err(store_failure())
        }
    }
}

fn store_failure() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "session store unavailable" })),
    )
        .into_response()
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "unauthorized" })),
    )
        .into_response()
}

/// Build a redirect to the error page with a URL-encoded message.
fn whoops_redirect(message: &str) -> Redirect {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("error", message)
        .finish();
    Redirect::to(&format!("/whoops?{query}"))
}

async fn login_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(params): Query<LoginParams>,
) -> Response {
    // Reuse an existing session so a re-login replaces the pending flow
    // instead of stranding it under a new cookie.
    let (id, mut session) = match load_session(&state, &jar).await {
        Ok(Some(existing)) => existing,
        Ok(None) => (generate_session_id(), Session::new()),
        Err(response) => return response,
    };

    let name = params.name.unwrap_or_default();
    let authorize_url = state.flow.login(&mut session, &name);

    // The session must be durable before the redirect goes out; a login
    // that redirects without saved state cannot complete its callback.
    if let Err(e) = state.store.save(&id, &session, state.session_ttl()).await {
        error!(error = %e, "Session save failed during login");
        return store_failure();
    }

    let jar = jar.add(session_cookie(&state.session, &id));
    (jar, Redirect::to(authorize_url.as_str())).into_response()
}

async fn callback_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> Response {
    // A missing code is the provider's doing; no session state can fix
    // it, so it is reported before the session is even looked at.
    let code = match params.code.as_deref().filter(|c| !c.is_empty()) {
        Some(code) => code,
        None => {
            warn!("Callback arrived without an authorization code");
            return whoops_redirect(&FlowError::MissingAuthorizationCode.to_string())
                .into_response();
        }
    };

    // No session at all (lost cookie, expired store entry): restart the
    // flow rather than erroring.
    let (id, mut session) = match load_session(&state, &jar).await {
        Ok(Some(existing)) => existing,
        Ok(None) => return Redirect::to("/login").into_response(),
        Err(response) => return response,
    };

    let result = state
        .flow
        .callback(&mut session, Some(code), params.state.as_deref())
        .await;

    match result {
        Ok(()) => {
            if let Err(e) = state.store.save(&id, &session, state.session_ttl()).await {
                error!(error = %e, "Session save failed during callback");
                return store_failure();
            }
            Redirect::to("/profile").into_response()
        }
        Err(err) => {
            // The verifier was consumed; persist that so a replayed
            // callback cannot re-attempt the exchange with a dead code.
            if let Err(e) = state.store.save(&id, &session, state.session_ttl()).await {
                error!(error = %e, "Session save failed after callback failure");
            }
            warn!(error = %err, "Callback failed");
            whoops_redirect(&err.to_string()).into_response()
        }
    }
}

async fn exchange_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ExchangeParams>,
) -> Response {
    let result = state
        .flow
        .exchange_direct(
            params.code.as_deref(),
            params.verifier.as_deref(),
            params.redirect_uri.as_deref(),
        )
        .await;

    match result {
        Ok(tokens) => Json(tokens).into_response(),
        Err(err @ FlowError::MissingParameters) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": err.to_string() })),
        )
            .into_response(),
        Err(err) => {
            warn!(error = %err, "Direct exchange failed");
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": err.to_string() })),
            )
                .into_response()
        }
    }
}

async fn profile_handler(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let session = match load_session(&state, &jar).await {
        Ok(Some((_, session))) => session,
        Ok(None) => return unauthorized(),
        Err(response) => return response,
    };

    match session.get(keys::ACCESS_TOKEN) {
        Some(token) => Json(json!({ "access_token": token })).into_response(),
        None => unauthorized(),
    }
}

async fn tokens_handler(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let session = match load_session(&state, &jar).await {
        Ok(Some((_, session))) => session,
        Ok(None) => return unauthorized(),
        Err(response) => return response,
    };

    let Some(access_token) = session.get(keys::ACCESS_TOKEN) else {
        return unauthorized();
    };

    let mut body = json!({ "access_token": access_token });
    if let Some(id_token) = session.get(keys::ID_TOKEN) {
        body["id_token"] = json!(id_token);
    }
    if let Some(refresh_token) = session.get(keys::REFRESH_TOKEN) {
        body["refresh_token"] = json!(refresh_token);
    }
    Json(body).into_response()
}

async fn whoami_handler(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    let session = match load_session(&state, &jar).await {
        Ok(Some((_, session))) => session,
        Ok(None) => return unauthorized(),
        Err(response) => return response,
    };

    match state.flow.whoami(&session).await {
        Ok(name) => Json(json!({ "name": name })).into_response(),
        Err(err) => {
            warn!(error = %err, "Identity verification failed");
            unauthorized()
        }
    }
}

async fn logout_handler(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    // Local invalidation is unconditional; a store failure is logged but
    // never blocks clearing the cookie.
    if let Some(cookie) = jar.get(&state.session.cookie.name) {
        let id = cookie.value().to_string();
        if let Err(e) = state.store.delete(&id).await {
            warn!(error = %e, "Session delete failed during logout");
        }
    }

    let jar = jar.add(clear_session_cookie(&state.session));
    let target = state
        .flow
        .logout_url()
        .map_or_else(|| "/".to_string(), |url| url.to_string());

    (jar, Redirect::to(&target)).into_response()
}

async fn whoops_handler(Query(params): Query<WhoopsParams>) -> Response {
    let message = params
        .error
        .unwrap_or_else(|| "something went wrong".to_string());
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": message })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, header};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::guard::{KeyResolver, KeyResolverError, VerificationKey};
    use crate::session::memory::MemorySessionStore;

    use super::*;

    struct NoKeys;

    #[async_trait]
    impl KeyResolver for NoKeys {
        async fn resolve(&self, kid: &str) -> std::result::Result<VerificationKey, KeyResolverError> {
            Err(KeyResolverError::UnknownKeyId(kid.to_string()))
        }
    }

    fn test_state() -> Arc<AppState> {
        let provider = ProviderMetadata {
            issuer: "https://idp.test/".to_string(),
            authorization_endpoint: "https://idp.test/authorize".to_string(),
            token_endpoint: "http://127.0.0.1:1/oauth/token".to_string(),
            jwks_uri: "https://idp.test/jwks".to_string(),
            userinfo_endpoint: None,
            end_session_endpoint: None,
            code_challenge_methods_supported: vec!["S256".to_string()],
        };
        let settings = OAuthClientSettings {
            client_id: "client-123".to_string(),
            client_secret: "shhh".to_string(),
            redirect_url: "http://localhost:8080/oauth-callback".to_string(),
            scopes: vec!["openid".to_string()],
            audience: None,
            post_logout_redirect_url: None,
        };
        let flow =
            FlowController::new(reqwest::Client::new(), provider, settings, Arc::new(NoKeys))
                .unwrap();

        Arc::new(AppState {
            store: Arc::new(MemorySessionStore::new()),
            flow: Arc::new(flow),
            session: SessionConfig::default(),
        })
    }

    async fn get(router: Router, uri: &str, cookie: Option<&str>) -> axum::http::Response<Body> {
        let mut request = Request::builder().uri(uri);
        if let Some(cookie) = cookie {
            request = request.header(header::COOKIE, cookie);
        }
        router
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn login_sets_cookie_and_redirects_to_provider() {
        let state = test_state();
        let response = get(create_broker_router(state), "/login?name=alice", None).await;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let location = response.headers()[header::LOCATION].to_str().unwrap();
        assert!(location.starts_with("https://idp.test/authorize?"));
        assert!(location.contains("code_challenge="));

        let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        assert!(set_cookie.starts_with("session-id="));
        assert!(set_cookie.contains("HttpOnly"));
    }

    #[tokio::test]
    async fn callback_without_session_redirects_to_login() {
        let state = test_state();
        let response = get(create_broker_router(state), "/oauth-callback?code=abc", None).await;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/login");
    }

    #[tokio::test]
    async fn callback_without_code_redirects_to_whoops() {
        let state = test_state();

        // Establish a session first.
        let id = "fixed-session";
        let mut session = Session::new();
        session.set(keys::VERIFIER, "v");
        state
            .store
            .save(id, &session, Duration::from_secs(60))
            .await
            .unwrap();

        let response = get(
            create_broker_router(state),
            "/oauth-callback",
            Some(&format!("session-id={id}")),
        )
        .await;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let location = response.headers()[header::LOCATION].to_str().unwrap();
        assert!(location.starts_with("/whoops?error="));
    }

    #[tokio::test]
    async fn callback_without_code_and_without_session_redirects_to_whoops() {
        // The missing code is reported even when there is no session to
        // restart from; the session is never consulted.
        let state = test_state();
        let response = get(create_broker_router(state), "/oauth-callback", None).await;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let location = response.headers()[header::LOCATION].to_str().unwrap();
        assert!(location.starts_with("/whoops?error="));
    }

    #[tokio::test]
    async fn callback_with_empty_code_redirects_to_whoops() {
        let state = test_state();
        let response = get(create_broker_router(state), "/oauth-callback?code=", None).await;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let location = response.headers()[header::LOCATION].to_str().unwrap();
        assert!(location.starts_with("/whoops?error="));
    }

    #[tokio::test]
    async fn profile_without_token_is_unauthorized() {
        let state = test_state();
        let response = get(create_broker_router(state), "/profile", None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn profile_returns_stored_access_token() {
        let state = test_state();

        let id = "fixed-session";
        let mut session = Session::new();
        session.set(keys::ACCESS_TOKEN, "at-123");
        state
            .store
            .save(id, &session, Duration::from_secs(60))
            .await
            .unwrap();

        let response = get(
            create_broker_router(state),
            "/profile",
            Some(&format!("session-id={id}")),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["access_token"], "at-123");
    }

    #[tokio::test]
    async fn exchange_without_parameters_is_bad_request() {
        let state = test_state();
        let response = get(create_broker_router(state), "/oauth-exchange?code=abc", None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn logout_clears_session_and_cookie() {
        let state = test_state();

        let id = "fixed-session";
        let mut session = Session::new();
        session.set(keys::ACCESS_TOKEN, "at-123");
        state
            .store
            .save(id, &session, Duration::from_secs(60))
            .await
            .unwrap();

        let response = get(
            create_broker_router(Arc::clone(&state)),
            "/logout",
            Some(&format!("session-id={id}")),
        )
        .await;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        assert!(set_cookie.contains("Max-Age=0"));
        assert!(state.store.load(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn whoops_reports_the_error() {
        let state = test_state();
        let response = get(create_broker_router(state), "/whoops?error=nope", None).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "nope");
    }
}
