//! HTTP servers
//!
//! Two independent surfaces share this module: the login broker
//! ([`broker`]) and the protected resource ([`resource`]). Each builds an
//! axum router, binds its own port and runs until a shutdown signal.

pub mod broker;
pub mod resource;

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;

use crate::{Error, Result};

/// Timeout for outbound calls to the identity provider (discovery, token
/// exchange, JWKS fetch).
const PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared HTTP client for provider-facing calls.
pub(crate) fn provider_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(PROVIDER_TIMEOUT)
        .build()?)
}

/// Bind `port` on all interfaces and serve `app` until shutdown.
pub(crate) async fn serve(app: Router, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(port, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| Error::Internal(e.to_string()))?;

    Ok(())
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
