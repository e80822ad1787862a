//! Gateway server

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use super::auth::ResourceGate;
use super::router::{AppState, create_router};
use super::upstream::Upstream;
use crate::auth::{AuthMode, TOKEN_PATH};
use crate::config::Config;
use crate::{Error, Result};

/// Authorization gateway server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Auth wiring, selected once
    mode: AuthMode,
    /// Upstream weather service
    upstream: Option<Upstream>,
}

impl Gateway {
    /// Create a new gateway.
    ///
    /// Key material is loaded here, so a misconfigured issuer fails at startup.
    pub fn new(config: Config) -> Result<Self> {
        let mode = AuthMode::from_config(&config)?;
        let upstream = config
            .upstream
            .url
            .as_deref()
            .map(|url| Upstream::new(url, config.upstream.timeout))
            .transpose()?;

        Ok(Self {
            config,
            mode,
            upstream,
        })
    }

    /// Build the router without binding a socket.
    #[must_use]
    pub fn router(&self) -> axum::Router {
        let gate = Arc::new(ResourceGate::new(
            self.mode.clone(),
            self.config.auth.public_paths.clone(),
        ));
        create_router(Arc::new(AppState {
            gate,
            upstream: self.upstream.clone(),
            max_body_size: self.config.server.max_body_size,
        }))
    }

    /// Run the gateway
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let app = self.router();

        // Bind listener
        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("WEATHER AUTH GATEWAY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");

        if self.mode.is_enabled() {
            info!(
                issuer = %self.config.auth.issuer,
                ttl_minutes = self.config.auth.access_token_ttl_minutes,
                directory = %self.config.directory.path,
                "AUTHORIZATION enabled"
            );
            info!(
                "  POST http://{}:{}{TOKEN_PATH}  (client credentials)",
                self.config.server.host, self.config.server.port
            );
        } else {
            warn!("AUTHORIZATION disabled - gateway is open to all requests");
        }

        match &self.upstream {
            Some(upstream) => info!(url = %upstream.base_url(), "Forwarding /v1/* upstream"),
            None => warn!("No upstream configured - /v1/* will answer 503"),
        }
        info!("============================================================");

        // Run server with graceful shutdown
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        info!("Gateway stopped");
        Ok(())
    }
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
