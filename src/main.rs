// src/main.rs
//! Mockhub Interactive Mock Server
//!
//! Serves the operator API and the interception entry point, optionally a
//! terminal listener, and keeps this instance's leadership row fresh.

use anyhow::{Context, Result};
use mockhub::observability::{init_metrics, init_tracing};
use mockhub::{MockApp, MockConfig};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = MockConfig::load().context("Failed to load configuration")?;

    // Initialize observability (tracing, metrics)
    init_tracing(&config.observability)?;
    init_metrics(&config.observability)?;

    info!("Starting Mockhub v{}", mockhub::VERSION);
    info!("Configuration loaded: {:?}", config);

    let app = Arc::new(MockApp::build(config).await.context("Failed to build mock server")?);
    let listener = app.bind().await?;

    // Graceful shutdown handler
    {
        let app = Arc::clone(&app);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received shutdown signal, cleaning up...");
                    app.shutdown();
                }
                Err(e) => error!("Failed to listen for shutdown signal: {}", e),
            }
        });
    }

    match app.run(listener).await {
        Ok(()) => {
            info!("Server stopped gracefully");
            Ok(())
        }
        Err(e) => {
            error!("Server error: {}", e);
            Err(e.into())
        }
    }
}
