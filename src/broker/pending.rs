// src/broker/pending.rs
//! Registry of intercepted calls waiting for an operator answer
//!
//! Each entry owns a one-shot rendezvous slot. The map is guarded by a
//! single lock that is never held while waiting: callers await their
//! `ResultSlot` outside it.
//!
//! ```text
//! register ──► Created ──┬─ resolve ──────► Resolved-by-operator
//!                        ├─ deadline ─────► Resolved-by-timeout
//!                        ├─ caller gone ──► Resolved-by-disconnect
//!                        └─ drain_all ────► Resolved-by-drain
//! ```

use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::oneshot;
use tracing::{debug, info};

/// Value delivered through a result slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Body supplied by an operator
    Operator(String),
    /// Stored default, forced when the last operator left
    Drained(String),
}

impl Resolution {
    pub fn body(&self) -> &str {
        match self {
            Resolution::Operator(body) | Resolution::Drained(body) => body,
        }
    }

    pub fn into_body(self) -> String {
        match self {
            Resolution::Operator(body) | Resolution::Drained(body) => body,
        }
    }
}

struct PendingEntry {
    /// Taken by the first resolve; `None` afterwards
    slot: Option<oneshot::Sender<Resolution>>,
    default_response: String,
}

/// Waiting side of a registered call
pub struct ResultSlot {
    request_id: String,
    rx: oneshot::Receiver<Resolution>,
}

impl ResultSlot {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Wait for the slot to be written. Returns `None` if the entry was
    /// released without a resolution.
    pub async fn recv(&mut self) -> Option<Resolution> {
        (&mut self.rx).await.ok()
    }

    /// Stop accepting resolutions once the waiter has given up. A
    /// resolution that was delivered before the close is returned.
    pub fn close(&mut self) -> Option<Resolution> {
        self.rx.close();
        self.rx.try_recv().ok()
    }
}

/// Per-process map of pending calls
#[derive(Default)]
pub struct PendingRegistry {
    entries: Mutex<HashMap<String, PendingEntry>>,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the rendezvous slot for `request_id`
    pub fn register(&self, request_id: &str, default_response: &str) -> ResultSlot {
        let (tx, rx) = oneshot::channel();
        self.entries.lock().insert(
            request_id.to_string(),
            PendingEntry {
                slot: Some(tx),
                default_response: default_response.to_string(),
            },
        );
        debug!("Registered pending call {}", request_id);

        ResultSlot {
            request_id: request_id.to_string(),
            rx,
        }
    }

    /// Deliver an operator body. Only the first resolve for an id is
    /// accepted; later attempts, unknown ids and ids whose caller already
    /// left report `false`.
    pub fn resolve(&self, request_id: &str, body: &str) -> bool {
        let slot = self
            .entries
            .lock()
            .get_mut(request_id)
            .and_then(|entry| entry.slot.take());

        match slot {
            Some(tx) => tx.send(Resolution::Operator(body.to_string())).is_ok(),
            None => false,
        }
    }

    /// Forget `request_id` once its call has finished by any path
    pub fn release(&self, request_id: &str) {
        self.entries.lock().remove(request_id);
    }

    /// Force every still-pending call to its stored default and clear the
    /// map. Returns how many waiters were woken.
    pub fn drain_all(&self) -> usize {
        let drained: Vec<(String, PendingEntry)> = self.entries.lock().drain().collect();

        let mut woken = 0;
        for (request_id, mut entry) in drained {
            if let Some(tx) = entry.slot.take() {
                if tx.send(Resolution::Drained(entry.default_response)).is_ok() {
                    debug!("Drained pending call {}", request_id);
                    woken += 1;
                }
            }
        }

        if woken > 0 {
            info!("Force-resolved {} pending calls with their defaults", woken);
        }
        woken
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.entries.lock().contains_key(request_id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_resolve_delivers_once() {
        let registry = PendingRegistry::new();
        let mut slot = registry.register("r1", "D");

        assert!(registry.resolve("r1", "OK"));
        assert!(!registry.resolve("r1", "again"));
        assert_eq!(slot.recv().await, Some(Resolution::Operator("OK".to_string())));

        registry.release("r1");
        assert!(!registry.contains("r1"));
        assert!(!registry.resolve("r1", "late"));
    }

    #[test]
    fn test_resolve_unknown_id() {
        let registry = PendingRegistry::new();
        assert!(!registry.resolve("missing", "body"));
    }

    #[test]
    fn test_resolve_after_waiter_dropped() {
        let registry = PendingRegistry::new();
        let slot = registry.register("r1", "D");
        drop(slot);
        assert!(!registry.resolve("r1", "OK"));
    }

    #[tokio::test]
    async fn test_drain_uses_each_default() {
        let registry = PendingRegistry::new();
        let mut slots: Vec<_> = (0..3)
            .map(|i| registry.register(&format!("r{}", i), &format!("D{}", i)))
            .collect();

        assert_eq!(registry.drain_all(), 3);
        assert!(registry.is_empty());

        for (i, slot) in slots.iter_mut().enumerate() {
            assert_eq!(slot.recv().await, Some(Resolution::Drained(format!("D{}", i))));
        }
    }

    #[tokio::test]
    async fn test_drain_skips_already_resolved() {
        let registry = PendingRegistry::new();
        let mut first = registry.register("r1", "D1");
        let _second = registry.register("r2", "D2");

        assert!(registry.resolve("r1", "OK"));
        assert_eq!(registry.drain_all(), 1);
        assert_eq!(first.recv().await.unwrap().body(), "OK");
    }

    #[test]
    fn test_closed_slot_rejects_resolve() {
        let registry = PendingRegistry::new();
        let mut slot = registry.register("r1", "D");

        assert_eq!(slot.close(), None);
        assert!(registry.contains("r1"));
        assert!(!registry.resolve("r1", "late"));
    }

    #[test]
    fn test_close_returns_resolution_delivered_first() {
        let registry = PendingRegistry::new();
        let mut slot = registry.register("r1", "D");

        assert!(registry.resolve("r1", "OK"));
        assert_eq!(slot.close(), Some(Resolution::Operator("OK".to_string())));
    }

    #[tokio::test]
    async fn test_released_slot_yields_none() {
        let registry = PendingRegistry::new();
        let mut slot = registry.register("r1", "D");
        registry.release("r1");
        assert_eq!(slot.recv().await, None);
    }

    #[tokio::test]
    async fn test_concurrent_resolvers_single_winner() {
        let registry = Arc::new(PendingRegistry::new());
        let mut slot = registry.register("r1", "D");

        let mut handles = vec![];
        for i in 0..16 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry.resolve("r1", &format!("body{}", i))
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
        assert!(slot.recv().await.is_some());
    }
}
