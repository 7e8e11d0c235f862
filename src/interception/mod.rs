// src/interception/mod.rs
//! Call interception layer
//!
//! - **HTTP Interceptor**: hyper front serving the operator API and the
//!   catch-all interception entry point
//! - **Interceptor**: correlates a call with an operator answer
//! - **Forwarding Proxy**: relays calls from secondaries to the primary
//! - **Rules**: keyword overrides of the default response
//!
//! # Architecture
//!
//! ```text
//! caller ─► HTTP Interceptor ─┬─ secondary ─► Forwarding Proxy ─► primary
//!                             └─ primary ───► Interceptor ─► reply
//! ```

pub mod forwarder;
pub mod handler;
pub mod http_interceptor;
pub mod rules;

// Re-export commonly used types
pub use forwarder::{ForwardingProxy, FORWARDED_HEADER};
pub use handler::{InboundCall, InterceptOutcome, Interceptor, InterceptorSettings};
pub use http_interceptor::{HttpInterceptor, InterceptorConfig, ResponseBody};
pub use rules::{resolve_response, ResolvedResponse};
