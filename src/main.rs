//! Weather Auth Gateway - OAuth2 client credentials for the weather API

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use weather_auth_gateway::{
    auth::{RegisteredClient, Role, TokenVerifier, VerifyingKey, directory::ClientFile},
    cli::{Cli, Command},
    config::Config,
    gateway::Gateway,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    // Handle subcommands
    match cli.command {
        Some(Command::GenClient { ref name, role, cost }) => run_gen_client(name, role, cost),
        Some(Command::HashSecret { ref secret, cost }) => run_hash_secret(secret, cost),
        Some(Command::VerifyToken { ref token }) => run_verify_token(&cli, token),
        Some(Command::Serve) | None => run_server(cli).await,
    }
}

/// Print fresh credentials and the matching client file entry
fn run_gen_client(name: &str, role: Role, cost: u32) -> ExitCode {
    let (client, secret) = match RegisteredClient::generate(name, role, cost) {
        Ok(generated) => generated,
        Err(e) => {
            eprintln!("❌ Failed to generate client: {e}");
            return ExitCode::FAILURE;
        }
    };

    let entry = ClientFile {
        clients: vec![client.clone()],
    };
    let yaml = match serde_yaml::to_string(&entry) {
        Ok(yaml) => yaml,
        Err(e) => {
            eprintln!("❌ Failed to serialize client: {e}");
            return ExitCode::FAILURE;
        }
    };

    println!("client_id:     {}", client.client_id);
    println!("client_secret: {secret}");
    println!("role:          {role}");
    println!();
    println!("⚠️  The secret is shown once. Store it now.");
    println!();
    println!("# Client file entry");
    println!("{yaml}");
    ExitCode::SUCCESS
}

/// Print a bcrypt hash for a client secret
fn run_hash_secret(secret: &str, cost: u32) -> ExitCode {
    match bcrypt::hash(secret, cost) {
        Ok(hash) => {
            println!("{hash}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Failed to hash secret: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Verify a token with the configured issuer and public key
fn run_verify_token(cli: &Cli, token: &str) -> ExitCode {
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let key = match VerifyingKey::load(&config.auth.keys.public_key) {
        Ok(key) => key,
        Err(e) => {
            eprintln!("❌ Failed to load public key: {e}");
            return ExitCode::FAILURE;
        }
    };

    let verifier = TokenVerifier::new(key, &config.auth.issuer, config.auth.clock_skew);
    match verifier.verify(token) {
        Ok(grant) => {
            println!("✅ Token valid\n");
            println!(
                "{}",
                serde_json::to_string_pretty(&grant).unwrap_or_default()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Token rejected: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Run the gateway server
async fn run_server(cli: Cli) -> ExitCode {
    // Load configuration
    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            // Apply CLI overrides
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        auth = config.auth.enabled,
        "Starting Weather Auth Gateway"
    );

    // Create and run gateway
    let gateway = match Gateway::new(config) {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = gateway.run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Gateway shutdown complete");
    ExitCode::SUCCESS
}
