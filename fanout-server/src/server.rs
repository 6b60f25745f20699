//! HTTP listener lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::config::RelayConfig;
use crate::relay::{Relay, SharedRelay};

pub struct Server {
    config: RelayConfig,
    relay: SharedRelay,
}

impl Server {
    /// Build the production relay from config.
    pub fn new(config: RelayConfig) -> Result<Self> {
        let relay = Arc::new(Relay::from_config(&config)?);
        Ok(Self { config, relay })
    }

    /// Serve an already-built relay, e.g. one with a scripted backend.
    pub fn with_relay(config: RelayConfig, relay: SharedRelay) -> Self {
        Self { config, relay }
    }

    /// Serve until ctrl-c, then close the worker pool.
    pub async fn run(self) -> Result<()> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;
        tracing::info!(
            providers = ?self.relay.providers().all(),
            workers = self.relay.workers(),
            "HTTP listener on {addr}"
        );

        let router = crate::web::router(Arc::clone(&self.relay));
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("Failed to listen for ctrl-c: {e}");
                }
                tracing::info!("Shutdown requested");
            })
            .await?;

        self.relay.shutdown();
        Ok(())
    }

    /// Start the server and return the bound address + task handle (for testing).
    pub async fn start(self) -> Result<(SocketAddr, JoinHandle<Result<()>>)> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        tracing::info!("Listening on {addr}");

        let router = crate::web::router(Arc::clone(&self.relay));
        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await?;
            Ok::<(), anyhow::Error>(())
        });
        Ok((addr, handle))
    }
}
