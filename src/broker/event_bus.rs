// src/broker/event_bus.rs
//! In-process publish/subscribe hub for call notifications
//!
//! Each observer owns a small bounded queue. Publishing is a non-blocking
//! enqueue into every `interactive` queue; a full queue drops the message
//! for that observer only. `keep-alive` observers are tracked but never
//! notified or counted.

use crate::observability::{INTERACTIVE_OBSERVERS, NOTIFICATIONS_DELIVERED, NOTIFICATIONS_DROPPED};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

/// Observer connection mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ObserverMode {
    /// Operator console; receives notifications and counts as "watching"
    Interactive,
    /// Passive listener; heartbeat only
    KeepAlive,
}

impl ObserverMode {
    /// Parse a `mode` query value; anything unrecognised is `keep-alive`
    pub fn from_query(value: Option<&str>) -> Self {
        match value {
            Some("interactive") => ObserverMode::Interactive,
            _ => ObserverMode::KeepAlive,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ObserverMode::Interactive => "interactive",
            ObserverMode::KeepAlive => "keep-alive",
        }
    }
}

/// Notification for an intercepted HTTP call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpCallNotice {
    pub request_id: String,
    pub payload: String,
    pub endpoint: String,
    pub default_response: String,
    pub project: String,
    pub source: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminalKind {
    #[serde(rename = "ssh")]
    Ssh,
}

/// Notification for a command typed on a terminal session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalCallNotice {
    pub request_id: String,
    pub command: String,
    pub project: String,
    pub default_response: String,
    #[serde(rename = "type")]
    pub kind: TerminalKind,
}

/// Message carried by the bus and written to observer streams as JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Notification {
    Terminal(TerminalCallNotice),
    Http(HttpCallNotice),
}

impl Notification {
    pub fn request_id(&self) -> &str {
        match self {
            Notification::Terminal(notice) => &notice.request_id,
            Notification::Http(notice) => &notice.request_id,
        }
    }
}

/// Identifier of one subscription
pub type SubscriberId = u64;

struct Subscriber {
    mode: ObserverMode,
    tx: mpsc::Sender<Notification>,
}

/// Receiving side of a subscription
pub struct Subscription {
    id: SubscriberId,
    mode: ObserverMode,
    rx: mpsc::Receiver<Notification>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn mode(&self) -> ObserverMode {
        self.mode
    }

    /// Next notification; `None` once unsubscribed and drained
    pub async fn recv(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Notification> {
        self.rx.try_recv().ok()
    }
}

/// Process-wide observer registry
pub struct EventBus {
    subscribers: Mutex<HashMap<SubscriberId, Subscriber>>,
    next_id: AtomicU64,
    queue_capacity: usize,
}

impl EventBus {
    /// Create a bus whose observer queues hold `queue_capacity` messages
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(1),
        }
    }

    pub fn subscribe(&self, mode: ObserverMode) -> Subscription {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut subscribers = self.subscribers.lock();
        subscribers.insert(id, Subscriber { mode, tx });
        let interactive = count_interactive(&subscribers);
        drop(subscribers);

        metrics::gauge!(INTERACTIVE_OBSERVERS).set(interactive as f64);
        info!("Observer {} subscribed with mode {}", id, mode.as_str());

        Subscription { id, mode, rx }
    }

    /// Remove a subscription and close its queue. Returns the number of
    /// interactive observers left, read under the same lock.
    pub fn unsubscribe(&self, id: SubscriberId) -> usize {
        let mut subscribers = self.subscribers.lock();
        let removed = subscribers.remove(&id).is_some();
        let interactive = count_interactive(&subscribers);
        drop(subscribers);

        if removed {
            metrics::gauge!(INTERACTIVE_OBSERVERS).set(interactive as f64);
            info!("Observer {} unsubscribed ({} interactive left)", id, interactive);
        }
        interactive
    }

    /// Deliver `notification` to every interactive observer without
    /// blocking. Returns how many queues accepted it.
    pub fn publish(&self, notification: &Notification) -> usize {
        let subscribers = self.subscribers.lock();
        let mut delivered = 0;
        let mut dropped = 0;

        for (id, subscriber) in subscribers.iter() {
            if subscriber.mode != ObserverMode::Interactive {
                continue;
            }
            match subscriber.tx.try_send(notification.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!("Observer {} queue full, dropping {}", id, notification.request_id());
                    dropped += 1;
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Observer {} queue closed", id);
                }
            }
        }
        drop(subscribers);

        metrics::counter!(NOTIFICATIONS_DELIVERED).increment(delivered as u64);
        if dropped > 0 {
            metrics::counter!(NOTIFICATIONS_DROPPED).increment(dropped);
        }
        debug!("Published {} to {} interactive observers", notification.request_id(), delivered);
        delivered
    }

    pub fn interactive_count(&self) -> usize {
        count_interactive(&self.subscribers.lock())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1)
    }
}

fn count_interactive(subscribers: &HashMap<SubscriberId, Subscriber>) -> usize {
    subscribers
        .values()
        .filter(|s| s.mode == ObserverMode::Interactive)
        .count()
}
