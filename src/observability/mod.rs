// src/observability/mod.rs
//! Tracing and metrics bootstrap
//!
//! Logging goes through `tracing` with an `EnvFilter` (`RUST_LOG`, default
//! `info`). Counters are recorded through the `metrics` facade and exported
//! to Prometheus only when a scrape address is configured.

use crate::utils::config::{LogFormat, ObservabilityConfig};
use crate::utils::errors::{MockError, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Intercepted calls, labelled by `outcome`
pub const CALLS_TOTAL: &str = "mockhub_calls_total";

/// Calls relayed to the primary, labelled by `result`
pub const FORWARDED_TOTAL: &str = "mockhub_forwarded_total";

/// Notifications enqueued to interactive observers
pub const NOTIFICATIONS_DELIVERED: &str = "mockhub_notifications_delivered_total";

/// Notifications dropped because an observer queue was full
pub const NOTIFICATIONS_DROPPED: &str = "mockhub_notifications_dropped_total";

/// Pending calls force-resolved after the last operator left
pub const DRAINED_TOTAL: &str = "mockhub_drained_total";

/// Currently connected interactive observers
pub const INTERACTIVE_OBSERVERS: &str = "mockhub_interactive_observers";

/// Initialize the global tracing subscriber
pub fn init_tracing(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let result = match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(false)
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init(),
    };

    result.map_err(|e| MockError::ConfigError(format!("Failed to init tracing: {}", e)))
}

/// Install the Prometheus exporter if a scrape address is configured
pub fn init_metrics(config: &ObservabilityConfig) -> Result<()> {
    let Some(addr) = &config.metrics_addr else {
        return Ok(());
    };

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| MockError::ConfigError(format!("Invalid metrics address {}: {}", addr, e)))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| MockError::ConfigError(format!("Failed to install metrics exporter: {}", e)))?;

    info!("Prometheus metrics exposed on {}", addr);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_disabled_without_addr() {
        let config = ObservabilityConfig::default();
        assert!(init_metrics(&config).is_ok());
    }

    #[test]
    fn test_invalid_metrics_addr() {
        let config = ObservabilityConfig {
            metrics_addr: Some("nope".to_string()),
            ..Default::default()
        };
        assert!(init_metrics(&config).is_err());
    }
}
