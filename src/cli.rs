//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::auth::Role;

/// Weather Auth Gateway - OAuth2 client credentials in front of a weather API
#[derive(Parser, Debug)]
#[command(name = "weather-auth-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "WEATHER_AUTH_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "WEATHER_AUTH_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "WEATHER_AUTH_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "WEATHER_AUTH_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "WEATHER_AUTH_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the gateway server (default)
    Serve,

    /// Provision a client: prints its credentials and a client file entry
    GenClient {
        /// Display name, issued as the `name` claim
        #[arg(short, long)]
        name: String,

        /// Role granted to the client (READER, UPDATER, SYSTEM)
        #[arg(short, long)]
        role: Role,

        /// bcrypt cost factor
        #[arg(long, default_value_t = bcrypt::DEFAULT_COST)]
        cost: u32,
    },

    /// Hash a client secret for the client file
    HashSecret {
        /// Clear-text secret
        #[arg(required = true)]
        secret: String,

        /// bcrypt cost factor
        #[arg(long, default_value_t = bcrypt::DEFAULT_COST)]
        cost: u32,
    },

    /// Verify an access token against the configured public key
    VerifyToken {
        /// Compact JWT
        #[arg(required = true)]
        token: String,
    },
}
