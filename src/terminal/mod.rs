// src/terminal/mod.rs
//! Interactive terminal transport
//!
//! - **Session**: line editor plus command dispatch for one connection
//! - **Server**: SSH accept loop starting one session per shell channel

pub mod server;
pub mod session;

pub use server::{load_host_key, TerminalServer};
pub use session::{CommandOutcome, TerminalDispatcher, TerminalSession};
