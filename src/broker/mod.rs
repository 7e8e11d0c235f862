// src/broker/mod.rs
//! Correlation engine shared by every transport
//!
//! - **Event Bus**: fans call notifications out to observer connections
//! - **Pending Registry**: suspends a call until an operator answers
//! - **Leader Selector**: decides whether this process is primary
//! - **Heartbeat**: keeps this instance's leadership row fresh
//! - **Housekeeper**: drains calls left behind when no operator watches
//!
//! # Architecture
//!
//! ```text
//! call ─► Interceptor ─► register ─► PendingRegistry ◄─ resolve ◄─ operator
//!              │                                               ▲
//!              └──────► publish ─► EventBus ─► observer stream ┘
//! ```

pub mod event_bus;
pub mod heartbeat;
pub mod housekeeping;
pub mod leader;
pub mod pending;

// Re-export commonly used types
pub use event_bus::{EventBus, HttpCallNotice, Notification, ObserverMode, Subscription, TerminalCallNotice};
pub use heartbeat::Heartbeat;
pub use housekeeping::Housekeeper;
pub use leader::{LeaderSelector, PrimaryStatus};
pub use pending::{PendingRegistry, Resolution, ResultSlot};
