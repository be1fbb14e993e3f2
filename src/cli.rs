//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// OIDC authentication broker and bearer-token resource guard
#[derive(Parser, Debug)]
#[command(name = "auth-broker")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "AUTH_BROKER_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on (overrides the configured port)
    #[arg(short, long, env = "AUTH_BROKER_PORT")]
    pub port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "AUTH_BROKER_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "AUTH_BROKER_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to broker mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the login broker (default)
    Broker,

    /// Start the protected resource server
    Resource,
}
