//! Protected resource HTTP surface
//!
//! A minimal API behind the bearer-token guard: every route under the
//! router requires a verified access token. Responses are 401 for
//! authentication failures, 403 for insufficient scope, 200 with a JSON
//! body on success.

use std::sync::Arc;

use axum::{Extension, Json, Router, middleware, routing::get};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::guard::{AccessClaims, ExpectedClaims, JwksResolver, ResourceGuard, require_bearer};
use crate::oauth::ProviderMetadata;
use crate::Result;

/// Create the resource router with every route behind the guard.
pub fn create_resource_router(guard: Arc<ResourceGuard>) -> Router {
    Router::new()
        .route("/resource", get(resource_handler))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&guard),
            require_bearer,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(guard)
}

/// Run the resource server. Discovery failure is startup-fatal.
pub async fn run_resource(config: Config) -> Result<()> {
    let http = super::provider_client()?;

    let provider = ProviderMetadata::discover(&http, &config.oidc.issuer).await?;

    let resolver = Arc::new(JwksResolver::new(http, provider.jwks_uri.clone()));
    if let Err(e) = resolver.refresh().await {
        // Non-fatal: the resolver refreshes on demand at first use.
        warn!(error = %e, "Initial JWKS fetch failed");
    }

    let guard = Arc::new(ResourceGuard::new(
        resolver,
        ExpectedClaims {
            issuer: provider.issuer.clone(),
            audience: config.resource.audience.clone(),
            required_scopes: config.resource.required_scopes.clone(),
        },
    ));

    info!(
        issuer = %provider.issuer,
        audience = %config.resource.audience,
        "Resource server starting"
    );
    super::serve(create_resource_router(guard), config.resource.port).await
}

/// The protected handler. Only runs after the guard verified the token;
/// the claims it validated arrive via request extensions.
async fn resource_handler(Extension(claims): Extension<AccessClaims>) -> Json<serde_json::Value> {
    Json(json!({
        "message": "You have access to the resource!",
        "sub": claims.sub,
    }))
}
