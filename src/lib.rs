//! Authentication broker and resource guard
//!
//! Two cooperating services around an OIDC identity provider:
//!
//! - **Broker**: front-channel Authorization-Code-with-PKCE login flow.
//!   Generates the proof verifier, binds it to a server-side session,
//!   redirects the browser to the provider, and exchanges the returned
//!   authorization code (plus verifier) for tokens.
//! - **Resource guard**: back-channel bearer-token validation for a
//!   protected API — signature verification against the provider's
//!   rotating key set plus issuer/audience/time/scope claim checks.
//!
//! The identity provider itself (discovery document, JWKS endpoint,
//! token endpoint) is an external collaborator, never implemented here.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod guard;
pub mod oauth;
pub mod server;
pub mod session;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
