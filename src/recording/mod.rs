// src/recording/mod.rs
//! Persistent configuration and call history
//!
//! - **Models**: rows and admin payloads, serialized as camelCase JSON
//! - **Storage**: SQLite store behind one async lock
//!
//! # Tables
//!
//! ```text
//! configs ──< response_rules       ssh_configs
//! events                           ssh_events
//! service_instances (heartbeats)
//! ```

pub mod models;
pub mod storage;

// Re-export commonly used types
pub use models::{
    CallEvent, CallStatus, ConfigInput, EndpointConfig, HistoryQuery, Page, ResponseRule, ServiceInstance,
    SshConfig, SshConfigInput, SshEvent,
};
pub use storage::MockStore;
