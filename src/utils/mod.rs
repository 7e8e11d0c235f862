// src/utils/mod.rs
//! Shared configuration and error types

pub mod config;
pub mod errors;

pub use config::MockConfig;
pub use errors::{MockError, Result};
