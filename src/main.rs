//! auth-broker — OIDC authentication broker and resource guard
//!
//! Two serve modes: `broker` runs the front-channel PKCE login flow,
//! `resource` runs the bearer-token-guarded API.

use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use auth_broker::{
    cli::{Cli, Command},
    config::Config,
    server, setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env before clap reads env-backed arguments.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {e}");
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Some(Command::Resource) => {
            if let Some(port) = cli.port {
                config.resource.port = port;
            }
            server::resource::run_resource(config).await
        }
        Some(Command::Broker) | None => {
            if let Some(port) = cli.port {
                config.broker.port = port;
            }
            server::broker::run_broker(config).await
        }
    };

    if let Err(e) = result {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
