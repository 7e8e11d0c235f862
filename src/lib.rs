// src/lib.rs
//! Mockhub Interactive Mock Server Library
//!
//! Intercepts inbound HTTP calls and terminal commands aimed at mock
//! endpoints, holds them open while a live operator composes a reply, and
//! otherwise answers from stored defaults or keyword rules.
//!
//! # Architecture
//!
//! - **broker**: event bus, pending-request registry, leader selection,
//!   heartbeat and housekeeping
//! - **interception**: HTTP front, intercept handler, forwarding proxy
//! - **terminal**: line-oriented interactive terminal transport
//! - **recording**: SQLite store for configuration and call history
//! - **observability**: tracing and metrics bootstrap
//! - **utils**: configuration and errors

pub mod app;
pub mod broker;
pub mod interception;
pub mod observability;
pub mod recording;
pub mod terminal;
pub mod utils;

// Re-export commonly used types
pub use app::MockApp;
pub use utils::config::MockConfig;
pub use utils::errors::{MockError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
